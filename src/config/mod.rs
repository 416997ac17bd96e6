//! Configuration for the autoloom runtime
//!
//! Every field has a default and most can be overridden through environment
//! variables for container deployment.

use crate::runtime::engine::ConcurrencyPolicy;
use crate::triggers::interpreter::{DEFAULT_CRON, DEFAULT_TIMEZONE};
use crate::triggers::registry::TriggerDefaults;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub triggers: TriggerConfig,
    pub engine: EngineConfig,
    pub adapters: AdapterConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `execution_log.db`
    pub data_dir: String,
    /// Optional JSON array of stored workflows, loaded and armed at startup
    pub workflows_file: Option<String>,
}

impl StorageConfig {
    pub fn execution_log_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("execution_log.db")
    }
}

/// Fallbacks for trigger specs that leave something out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub default_cron: String,
    pub default_timezone: String,
    pub default_poll_interval_secs: u64,
}

impl TriggerConfig {
    pub fn defaults(&self) -> TriggerDefaults {
        TriggerDefaults {
            cron: self.default_cron.clone(),
            timezone: self.default_timezone.clone(),
            poll_interval: Duration::from_secs(self.default_poll_interval_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Skip a trigger firing while the same workflow already has a run in flight
    pub single_flight: bool,
}

impl EngineConfig {
    pub fn policy(&self) -> ConcurrencyPolicy {
        if self.single_flight {
            ConcurrencyPolicy::SingleFlight
        } else {
            ConcurrencyPolicy::Unbounded
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub http_timeout_secs: u64,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("AUTOLOOM_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_parse("AUTOLOOM_PORT", 3004),
            },
            storage: StorageConfig {
                data_dir: std::env::var("AUTOLOOM_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
                workflows_file: std::env::var("AUTOLOOM_WORKFLOWS_FILE").ok(),
            },
            triggers: TriggerConfig {
                default_cron: DEFAULT_CRON.to_string(),
                default_timezone: DEFAULT_TIMEZONE.to_string(),
                default_poll_interval_secs: env_parse("AUTOLOOM_POLL_INTERVAL_SECS", 60),
            },
            engine: EngineConfig {
                single_flight: env_parse("AUTOLOOM_SINGLE_FLIGHT", false),
            },
            adapters: AdapterConfig {
                http_timeout_secs: env_parse("AUTOLOOM_HTTP_TIMEOUT_SECS", 30),
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
