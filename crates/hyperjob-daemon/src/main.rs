use clap::{Parser, Subcommand};
use hyperjob_core::config::HyperjobConfig;
use tracing::warn;

mod logging;
mod simulate;
mod watch;

#[derive(Parser)]
#[command(name = "hyperjob")]
#[command(about = "Network-aware job scheduler")]
#[command(version)]
struct Cli {
    /// Config file (defaults to $HYPERJOB_CONFIG, then ~/.hyperjob/hyperjob.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the network monitor and print every state change
    Watch,

    /// Print per-interface statistics as JSON
    Stats,

    /// Drive a synthetic workload through the scheduler
    Simulate {
        /// Number of jobs to submit
        #[arg(short, long, default_value_t = 12)]
        jobs: usize,

        /// Probability that an attempt fails with a transient error
        #[arg(long, default_value_t = 0.3)]
        failure_rate: f64,

        /// Simulated work per attempt, in milliseconds
        #[arg(long, default_value_t = 200)]
        work_ms: u64,

        /// Skip the network monitor so retries never wait on it
        #[arg(long)]
        offline: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // explicit path > HYPERJOB_CONFIG > ~/.hyperjob/hyperjob.toml
    let loaded = HyperjobConfig::load(cli.config.as_deref());
    let config = loaded.as_ref().cloned().unwrap_or_default();
    logging::init(&config.logging);
    if let Err(e) = &loaded {
        warn!(error = %e, "config load failed, using defaults");
    }

    match cli.command {
        Commands::Watch => watch::run(config.network).await,
        Commands::Stats => watch::stats(config.network),
        Commands::Simulate {
            jobs,
            failure_rate,
            work_ms,
            offline,
        } => {
            let opts = simulate::Options {
                jobs,
                failure_rate: failure_rate.clamp(0.0, 1.0),
                work: std::time::Duration::from_millis(work_ms),
                offline,
            };
            simulate::run(config, opts).await
        }
    }
}
