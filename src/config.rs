use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Engine settings. Sources, later ones winning: built-in defaults, an optional
/// config file, then `LOBX_*` environment variables (`.env` is loaded first).
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub symbols: Vec<String>,
    pub queue_capacity: usize,
    pub request_timeout_ms: u64,
    pub max_restarts: u32,
    pub restart_backoff_ms: u64,
    pub database_url: Option<String>,
    pub log_filter: String,
    pub metrics_port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            symbols: vec!["BTC-USD".to_string()],
            queue_capacity: 1024,
            request_timeout_ms: 5_000,
            max_restarts: 5,
            restart_backoff_ms: 200,
            database_url: None,
            log_filter: "info".to_string(),
            metrics_port: 9000,
        }
    }
}

impl EngineConfig {
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let defaults = EngineConfig::default();

        Config::builder()
            .set_default("symbols", defaults.symbols)?
            .set_default("queue_capacity", defaults.queue_capacity as u64)?
            .set_default("request_timeout_ms", defaults.request_timeout_ms)?
            .set_default("max_restarts", defaults.max_restarts as u64)?
            .set_default("restart_backoff_ms", defaults.restart_backoff_ms)?
            .set_default("log_filter", defaults.log_filter)?
            .set_default("metrics_port", defaults.metrics_port as u64)?
            .add_source(File::with_name(path.unwrap_or("lobx")).required(path.is_some()))
            .add_source(
                Environment::with_prefix("LOBX")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("symbols"),
            )
            .build()?
            .try_deserialize()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }
}
