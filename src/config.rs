//! Configuration module for Sword.
//!
//! Server settings come from environment variables with sensible defaults.
//! Targets and observers come from a JSON file read once at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::db::{Observer, Target, TimeRange};

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite snapshot file (default: "sword.db")
    pub db_path: String,
    /// Path to the targets/observers JSON file (default: "sword.json")
    pub conf_file: String,
    /// Shared token agents and privileged clients must present
    pub token: String,
    /// Upper bound on the final save during shutdown
    pub shutdown_grace: Duration,
    /// Period between checkpoint saves; zero disables checkpointing
    pub checkpoint_interval: Duration,
    /// Period between retention sweeps
    pub retention_sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "sword.db".to_string(),
            conf_file: "sword.json".to_string(),
            token: String::new(),
            shutdown_grace: Duration::from_secs(10),
            checkpoint_interval: Duration::from_secs(300),
            retention_sweep_interval: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SWORD_HTTP_PORT`: HTTP port (default: 8080)
    /// - `SWORD_DB_PATH`: Snapshot database path (default: "sword.db")
    /// - `SWORD_CONF_FILE`: Targets/observers file (default: "sword.json")
    /// - `SWORD_TOKEN`: Access token (default: empty)
    /// - `SWORD_SHUTDOWN_GRACE_SECS`: Shutdown save timeout (default: 10)
    /// - `SWORD_CHECKPOINT_SECS`: Checkpoint period, 0 disables (default: 300)
    /// - `SWORD_RETENTION_SWEEP_SECS`: Retention sweep period (default: 60)
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(port_str) = env::var("SWORD_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http_port = port;
            }
        }

        if let Ok(db_path) = env::var("SWORD_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Ok(conf_file) = env::var("SWORD_CONF_FILE") {
            cfg.conf_file = conf_file;
        }

        if let Ok(token) = env::var("SWORD_TOKEN") {
            cfg.token = token;
        }

        if let Some(secs) = env_secs("SWORD_SHUTDOWN_GRACE_SECS") {
            cfg.shutdown_grace = secs;
        }

        if let Some(secs) = env_secs("SWORD_CHECKPOINT_SECS") {
            cfg.checkpoint_interval = secs;
        }

        if let Some(secs) = env_secs("SWORD_RETENTION_SWEEP_SECS") {
            if !secs.is_zero() {
                cfg.retention_sweep_interval = secs;
            }
        }

        cfg
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Targets, observers and dashboard defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub observers: Vec<Observer>,
    /// Range code used when a request omits one
    #[serde(default = "default_time_range")]
    pub default_time_range: i64,
    /// Stat interval in minutes used when a request omits one
    #[serde(default = "default_interval")]
    pub default_interval: i64,
}

fn default_time_range() -> i64 {
    TimeRange::Day.code()
}

fn default_interval() -> i64 {
    10
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            observers: Vec::new(),
            default_time_range: default_time_range(),
            default_interval: default_interval(),
        }
    }
}

impl MonitorConfig {
    /// Read and validate the configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let cfg: MonitorConfig = serde_json::from_str(&data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut observer_ids = HashSet::new();
        for observer in &self.observers {
            if !observer_ids.insert(observer.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate observer id {}",
                    observer.id
                )));
            }
        }

        let mut target_ids = HashSet::new();
        for target in &self.targets {
            if !target_ids.insert(target.id) {
                return Err(ConfigError::Invalid(format!("duplicate target id {}", target.id)));
            }
            for observer_id in target.observers.iter().flatten() {
                if !observer_ids.contains(observer_id) {
                    return Err(ConfigError::Invalid(format!(
                        "target {} references unknown observer {}",
                        target.id, observer_id
                    )));
                }
            }
        }

        TimeRange::from_code(self.default_time_range)
            .map_err(|e| ConfigError::Invalid(format!("default_time_range: {}", e)))?;

        if self.default_interval <= 0 {
            return Err(ConfigError::Invalid(format!(
                "default_interval must be positive, got {}",
                self.default_interval
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "sword.db");
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(10));
    }

    #[test]
    fn test_load_monitor_config() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(
            tmp,
            r#"{{
                "targets": [
                    {{"id": 1, "name": "web", "address": "10.0.0.1"}},
                    {{"id": 2, "name": "db", "address": "10.0.0.2", "observers": [1]}}
                ],
                "observers": [{{"id": 1, "name": "tokyo"}}, {{"id": 2, "name": "paris"}}],
                "default_interval": 5
            }}"#
        )
        .unwrap();

        let cfg = MonitorConfig::load(tmp.path()).unwrap();
        assert_eq!(cfg.targets.len(), 2);
        assert_eq!(cfg.targets[1].observers, Some(vec![1]));
        assert_eq!(cfg.default_time_range, 1);
        assert_eq!(cfg.default_interval, 5);
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        let observer = Observer { id: 1, name: "a".to_string() };
        let target = |id, observers| Target {
            id,
            name: "t".to_string(),
            address: String::new(),
            observers,
        };

        let duplicate_observer = MonitorConfig {
            observers: vec![observer.clone(), observer.clone()],
            ..Default::default()
        };
        assert!(duplicate_observer.validate().is_err());

        let duplicate_target = MonitorConfig {
            targets: vec![target(1, None), target(1, None)],
            observers: vec![observer.clone()],
            ..Default::default()
        };
        assert!(duplicate_target.validate().is_err());

        let unknown_observer = MonitorConfig {
            targets: vec![target(1, Some(vec![9]))],
            observers: vec![observer.clone()],
            ..Default::default()
        };
        assert!(unknown_observer.validate().is_err());

        let bad_range = MonitorConfig {
            default_time_range: 42,
            ..Default::default()
        };
        assert!(bad_range.validate().is_err());

        let bad_interval = MonitorConfig {
            default_interval: 0,
            ..Default::default()
        };
        assert!(bad_interval.validate().is_err());

        assert!(MonitorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            MonitorConfig::load("/nonexistent/sword.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
