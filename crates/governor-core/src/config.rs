//! Process configuration, loaded from the environment: each variable is
//! read individually with a documented default, plus the two YAML files
//! the governance pipeline and finality evaluator consume.

use crate::error::ConfigError;
use std::env;
use std::time::Duration;

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse::<T>().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("could not parse {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}

/// Postgres connection settings shared by the WAL, dedup registry,
/// knowledge graph, and state machine.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Durable event bus connection settings.
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub nats_url: String,
    pub stream: String,
}

/// Object store settings for the abstracted S3 collaborator; never touched
/// by the core directly, only threaded through to workers that need it.
/// Kept optional since the core itself never performs blob I/O.
#[derive(Debug, Clone, Default)]
pub struct ObjectStoreConfig {
    pub bucket: Option<String>,
    pub endpoint: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

/// Finality thresholds, overridable by `finality.yaml`.
#[derive(Debug, Clone, Copy)]
pub struct FinalityThresholds {
    pub near: f64,
    pub auto: f64,
}

impl Default for FinalityThresholds {
    fn default() -> Self {
        Self {
            near: 0.75,
            auto: 0.92,
        }
    }
}

/// Watchdog timing.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogConfig {
    pub interval: Duration,
    pub quiescence_threshold: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            quiescence_threshold: Duration::from_secs(30),
        }
    }
}

/// Top-level process config, assembled from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub scope_id: Option<String>,
    pub agent_id: String,
    pub agent_role: Option<String>,
    pub governance_path: Option<String>,
    pub database: DatabaseConfig,
    pub bus: BusConfig,
    pub object_store: ObjectStoreConfig,
    pub logging: LoggingConfig,
    pub finality_thresholds: FinalityThresholds,
    pub watchdog: WatchdogConfig,
    pub mitl_port: u16,
    pub governance_yaml_path: String,
    pub finality_yaml_path: String,
}

impl Config {
    /// Reads every recognized environment variable, falling back to the
    /// documented defaults when absent. Only `DATABASE_URL` is required;
    /// everything else has a safe default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnv("DATABASE_URL".to_string()))?;

        let near = env_parsed("NEAR_FINALITY_THRESHOLD", 0.75)?;
        let auto = env_parsed("AUTO_FINALITY_THRESHOLD", 0.92)?;
        let watchdog_interval_ms: u64 = env_parsed("WATCHDOG_INTERVAL_MS", 15_000)?;
        let watchdog_quiescence_ms: u64 = env_parsed("WATCHDOG_QUIESCENCE_MS", 30_000)?;
        let mitl_port: u16 = env_parsed("MITL_PORT", 8088)?;

        Ok(Config {
            scope_id: env::var("SCOPE_ID").ok(),
            agent_id: env_string("AGENT_ID", "governor"),
            agent_role: env::var("AGENT_ROLE").ok(),
            governance_path: env::var("GOVERNANCE_PATH").ok(),
            database: DatabaseConfig {
                url: database_url,
                max_connections: env_parsed("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            bus: BusConfig {
                nats_url: env_string("NATS_URL", "nats://127.0.0.1:4222"),
                stream: env_string("NATS_STREAM", "swarm"),
            },
            object_store: ObjectStoreConfig {
                bucket: env::var("S3_BUCKET").ok(),
                endpoint: env::var("S3_ENDPOINT").ok(),
                region: env::var("S3_REGION").ok(),
            },
            logging: LoggingConfig {
                level: env_string("RUST_LOG", "info"),
                json: env_string("LOG_FORMAT", "pretty") == "json",
            },
            finality_thresholds: FinalityThresholds { near, auto },
            watchdog: WatchdogConfig {
                interval: Duration::from_millis(watchdog_interval_ms),
                quiescence_threshold: Duration::from_millis(watchdog_quiescence_ms),
            },
            mitl_port,
            governance_yaml_path: env_string("GOVERNANCE_CONFIG_PATH", "governance.yaml"),
            finality_yaml_path: env_string("FINALITY_CONFIG_PATH", "finality.yaml"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finality_thresholds_default_match_spec() {
        let t = FinalityThresholds::default();
        assert_eq!(t.near, 0.75);
        assert_eq!(t.auto, 0.92);
    }

    #[test]
    fn watchdog_config_default_match_spec() {
        let w = WatchdogConfig::default();
        assert_eq!(w.interval, Duration::from_secs(15));
        assert_eq!(w.quiescence_threshold, Duration::from_secs(30));
    }
}
