use caseflow_coordinator::CoordinatorConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long post-shutdown cleanup waits for each background task.
    pub shutdown_timeout_secs: u64,
    /// Named webhook connectors runs may refer to, as `(name, url)` pairs.
    pub connector_webhooks: Vec<(String, String)>,
    /// Dispatch, repair and liveness tuning.
    pub coordinator: CoordinatorConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                    |
    /// |-------------------------|----------------------------|
    /// | `HOST`                  | `0.0.0.0`                  |
    /// | `PORT`                  | `3000`                     |
    /// | `CORS_ORIGINS`          | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `5`                        |
    /// | `CONNECTOR_WEBHOOKS`    | (none)                     |
    ///
    /// `CONNECTOR_WEBHOOKS` is a comma-separated list of `name=url` entries.
    /// Coordinator settings are read by [`CoordinatorConfig::from_env`].
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let connector_webhooks = std::env::var("CONNECTOR_WEBHOOKS")
            .map(|raw| parse_connector_webhooks(&raw))
            .unwrap_or_default();

        Self {
            host,
            port: env_or("PORT", 3000),
            cors_origins,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 30),
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", 5),
            connector_webhooks,
            coordinator: CoordinatorConfig::from_env(),
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

/// Parse `name=url,name=url`. Malformed entries are skipped with a warning.
pub fn parse_connector_webhooks(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.split_once('=') {
            Some((name, url)) if !name.trim().is_empty() && !url.trim().is_empty() => {
                Some((name.trim().to_string(), url.trim().to_string()))
            }
            _ => {
                tracing::warn!(entry, "Ignoring malformed CONNECTOR_WEBHOOKS entry");
                None
            }
        })
        .collect()
}
