use hyperjob_core::config::NetworkConfig;
use hyperjob_network::NetworkMonitor;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Run the monitor until Ctrl-C, printing each published state.
pub async fn run(config: NetworkConfig) -> anyhow::Result<()> {
    let monitor = NetworkMonitor::new(config);
    let mut states = monitor.subscribe();
    let cancel = CancellationToken::new();
    monitor.start(cancel.clone()).await?;
    println!("{}", monitor.current_state());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            next = states.recv() => match next {
                Some(state) => println!("{state}"),
                None => break,
            },
        }
    }

    info!("stopping network monitor");
    cancel.cancel();
    monitor.stop().await;
    Ok(())
}

pub fn stats(config: NetworkConfig) -> anyhow::Result<()> {
    let monitor = NetworkMonitor::new(config);
    let stats = monitor.interface_stats()?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
