use std::time::Duration;

/// Worker process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Coordinator worker endpoint.
    pub coordinator_url: String,
    /// Independent loops (and connections) per process.
    pub concurrency: usize,
    /// Shell used to run case commands.
    pub shell: String,
    /// Per-case timeout when the case payload does not set one.
    pub case_timeout: Duration,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                                   |
    /// |--------------------------|-------------------------------------------|
    /// | `COORDINATOR_WS_URL`     | `ws://127.0.0.1:3000/api/v1/workers/ws`   |
    /// | `WORKER_CONCURRENCY`     | `1`                                       |
    /// | `WORKER_SHELL`           | `sh`                                      |
    /// | `CASE_TIMEOUT_SECS`      | `300`                                     |
    pub fn from_env() -> Self {
        Self {
            coordinator_url: std::env::var("COORDINATOR_WS_URL")
                .unwrap_or_else(|_| "ws://127.0.0.1:3000/api/v1/workers/ws".into()),
            concurrency: env_or("WORKER_CONCURRENCY", 1usize).max(1),
            shell: std::env::var("WORKER_SHELL").unwrap_or_else(|_| "sh".into()),
            case_timeout: Duration::from_secs(env_or("CASE_TIMEOUT_SECS", 300)),
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, "Unparseable value, using default");
            default
        }),
        Err(_) => default,
    }
}
