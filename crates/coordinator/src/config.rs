use std::time::Duration;

use caseflow_core::worker::{HEARTBEAT_INTERVAL_SECS, HEARTBEAT_TIMEOUT_SECS};

/// Coordinator tuning loaded from environment variables.
///
/// All fields have defaults suitable for local development. Values that
/// fail to parse fall back to the default with a warning.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long a dispatched case may stay in flight without a result.
    pub running_timeout: Duration,
    /// How long a run may stay non-terminal (overridable per run).
    pub run_timeout: Duration,
    /// Repair re-enqueues allowed per case (overridable per run).
    pub max_repair_attempts: u32,
    /// Repair-exhausted cases tolerated before a run fails (overridable per run).
    pub max_failures: u32,
    /// Resolve repair records immediately instead of parking them for operators.
    pub auto_repair: bool,
    /// Interval of the timeout sweeper.
    pub sweep_interval: Duration,
    /// Interval between liveness probes.
    pub heartbeat_interval: Duration,
    /// Silence after which a worker is declared dead.
    pub heartbeat_timeout: Duration,
    /// Path prefix used to build `RunHandle::poll_endpoint`.
    pub poll_base_path: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            running_timeout: Duration::from_secs(600),
            run_timeout: Duration::from_secs(3600),
            max_repair_attempts: 3,
            max_failures: 0,
            auto_repair: true,
            sweep_interval: Duration::from_secs(15),
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            heartbeat_timeout: Duration::from_secs(HEARTBEAT_TIMEOUT_SECS),
            poll_base_path: "/api/v1/runs".to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default |
    /// |---------------------------|---------|
    /// | `RUNNING_TIMEOUT_SECS`    | `600`   |
    /// | `RUN_TIMEOUT_SECS`        | `3600`  |
    /// | `MAX_REPAIR_ATTEMPTS`     | `3`     |
    /// | `MAX_FAILURES`            | `0`     |
    /// | `AUTO_REPAIR`             | `true`  |
    /// | `SWEEP_INTERVAL_SECS`     | `15`    |
    /// | `HEARTBEAT_INTERVAL_SECS` | `30`    |
    /// | `HEARTBEAT_TIMEOUT_SECS`  | `90`    |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            running_timeout: env_secs("RUNNING_TIMEOUT_SECS", defaults.running_timeout),
            run_timeout: env_secs("RUN_TIMEOUT_SECS", defaults.run_timeout),
            max_repair_attempts: env_parse("MAX_REPAIR_ATTEMPTS", defaults.max_repair_attempts),
            max_failures: env_parse("MAX_FAILURES", defaults.max_failures),
            auto_repair: env_parse("AUTO_REPAIR", defaults.auto_repair),
            sweep_interval: env_secs("SWEEP_INTERVAL_SECS", defaults.sweep_interval),
            heartbeat_interval: env_secs("HEARTBEAT_INTERVAL_SECS", defaults.heartbeat_interval),
            heartbeat_timeout: env_secs("HEARTBEAT_TIMEOUT_SECS", defaults.heartbeat_timeout),
            poll_base_path: defaults.poll_base_path,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, "Unparseable value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_secs(name: &str, default: Duration) -> Duration {
    Duration::from_secs(env_parse(name, default.as_secs()))
}
