use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{HyperjobError, Result};
use crate::types::BackoffStrategy;

pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_EVENT_BUFFER: usize = 256;
pub const MAX_RETRY_ATTEMPTS: u32 = 10;
pub const DEFAULT_CHECK_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_CHECK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_LINK_POLL_MS: u64 = 250; // keeps link detection sub-second
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 16;
pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/net";

/// Top-level config (hyperjob.toml + HYPERJOB_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HyperjobConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Ceiling on concurrently Running jobs.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Cadence of the periodic dispatch pass. Submissions and completions
    /// also wake the loop, so this mostly bounds window/timeout latency.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Capacity of the lifecycle event broadcast channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default)]
    pub dependency_timeout: DependencyTimeoutPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            event_buffer: DEFAULT_EVENT_BUFFER,
            dependency_timeout: DependencyTimeoutPolicy::default(),
        }
    }
}

/// What happens to a dependent job when one of its dependencies times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyTimeoutPolicy {
    /// The dependent fails permanently.
    #[default]
    Fail,
    /// Each timeout costs one attempt of the dependent's retry policy and
    /// restarts the wait; the dependent fails when attempts run out.
    Retry,
}

/// Default retry policy applied to jobs that do not carry their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub strategy: BackoffStrategy,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "bool_true")]
    pub jitter: bool,
    /// Allow-list of retryable error categories. `None` means every
    /// category not in `never_retry_on` is retryable.
    #[serde(default)]
    pub retry_on: Option<Vec<String>>,
    #[serde(default)]
    pub never_retry_on: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            strategy: BackoffStrategy::default(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: true,
            retry_on: None,
            never_retry_on: Vec::new(),
        }
    }
}

/// A reachability probe target: reachable when any of its ports accepts a
/// TCP connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeTargetConfig {
    pub host: String,
    #[serde(default = "default_probe_ports")]
    pub ports: Vec<u16>,
}

impl ProbeTargetConfig {
    pub fn new(host: &str, ports: &[u16]) -> Self {
        Self {
            host: host.to_string(),
            ports: ports.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    /// Per-target dial timeout.
    #[serde(default = "default_check_timeout_ms")]
    pub check_timeout_ms: u64,
    #[serde(default = "default_targets")]
    pub targets: Vec<ProbeTargetConfig>,
    /// Interfaces whose link state counts. Empty = every non-loopback one.
    #[serde(default)]
    pub preferred_interfaces: Vec<String>,
    /// Watch sysfs for link up/down changes (Linux only).
    #[serde(default = "bool_true")]
    pub link_watch: bool,
    #[serde(default = "default_link_poll_ms")]
    pub link_poll_ms: u64,
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: String,
    /// Buffered states per subscriber before "latest wins" coalescing.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    /// Consecutive all-unreachable probe cycles before leaving Up/Degraded.
    #[serde(default = "default_down_after")]
    pub down_after: u32,
    /// Consecutive all-inconclusive probe cycles before forcing Down.
    #[serde(default = "default_inconclusive_after")]
    pub inconclusive_after: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_ms: DEFAULT_CHECK_INTERVAL_MS,
            check_timeout_ms: DEFAULT_CHECK_TIMEOUT_MS,
            targets: default_targets(),
            preferred_interfaces: Vec::new(),
            link_watch: true,
            link_poll_ms: DEFAULT_LINK_POLL_MS,
            sysfs_root: DEFAULT_SYSFS_ROOT.to_string(),
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            down_after: default_down_after(),
            inconclusive_after: default_inconclusive_after(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when RUST_LOG is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_max_concurrent_jobs() -> usize {
    DEFAULT_MAX_CONCURRENT_JOBS
}
fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}
fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_check_interval_ms() -> u64 {
    DEFAULT_CHECK_INTERVAL_MS
}
fn default_check_timeout_ms() -> u64 {
    DEFAULT_CHECK_TIMEOUT_MS
}
fn default_probe_ports() -> Vec<u16> {
    vec![53, 443]
}
fn default_targets() -> Vec<ProbeTargetConfig> {
    ["8.8.8.8", "1.1.1.1", "8.8.4.4"]
        .iter()
        .map(|h| ProbeTargetConfig::new(h, &default_probe_ports()))
        .collect()
}
fn default_link_poll_ms() -> u64 {
    DEFAULT_LINK_POLL_MS
}
fn default_sysfs_root() -> String {
    DEFAULT_SYSFS_ROOT.to_string()
}
fn default_subscriber_buffer() -> usize {
    DEFAULT_SUBSCRIBER_BUFFER
}
fn default_down_after() -> u32 {
    2
}
fn default_inconclusive_after() -> u32 {
    3
}
fn default_log_level() -> String {
    "info".to_string()
}

impl HyperjobConfig {
    /// Load config from a TOML file with HYPERJOB_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `HYPERJOB_SCHEDULER__MAX_CONCURRENT_JOBS=8`. A missing file is not an
    /// error; every section falls back to its defaults.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: HyperjobConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("HYPERJOB_").split("__"))
            .extract()
            .map_err(|e| HyperjobError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent_jobs == 0 {
            return Err(invalid("scheduler.max_concurrent_jobs", "must be at least 1"));
        }
        if self.scheduler.tick_interval_ms == 0 {
            return Err(invalid("scheduler.tick_interval_ms", "must be positive"));
        }
        if self.scheduler.event_buffer == 0 {
            return Err(invalid("scheduler.event_buffer", "must be positive"));
        }
        self.retry.validate()?;

        if self.network.enabled {
            let net = &self.network;
            if net.targets.is_empty() {
                return Err(invalid("network.targets", "at least one target is required"));
            }
            if let Some(t) = net.targets.iter().find(|t| t.ports.is_empty()) {
                return Err(invalid(
                    "network.targets",
                    &format!("target {} has no ports", t.host),
                ));
            }
            if net.check_interval_ms == 0 || net.check_timeout_ms == 0 || net.link_poll_ms == 0 {
                return Err(invalid("network", "intervals and timeouts must be positive"));
            }
            if net.subscriber_buffer == 0 {
                return Err(invalid("network.subscriber_buffer", "must be positive"));
            }
            if net.down_after == 0 || net.inconclusive_after == 0 {
                return Err(invalid("network", "hysteresis thresholds must be at least 1"));
            }
        }
        Ok(())
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 || self.max_attempts > MAX_RETRY_ATTEMPTS {
            return Err(invalid(
                "retry.max_attempts",
                &format!("must be within 1..={MAX_RETRY_ATTEMPTS}"),
            ));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(invalid(
                "retry.initial_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> HyperjobError {
    HyperjobError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn default_config_path() -> String {
    if let Ok(p) = std::env::var("HYPERJOB_CONFIG") {
        return p;
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.hyperjob/hyperjob.toml", home)
}
