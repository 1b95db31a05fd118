//! Configuration management for the scheduling engine.
//!
//! Values are assembled in increasing precedence: built-in defaults, then
//! environment variables (`TASKD_*`), then an optional config file, then
//! whatever the CLI front-end overrides explicitly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("error reading config file {path}: {message}")]
    IoError { path: String, message: String },

    #[error("error parsing config file {path}: {message}")]
    ParseError { path: String, message: String },
}

/// Core engine configuration (§6/§10.3).
///
/// Fields outside this set — bind address, TLS, base path, auth file — belong
/// to the external HTTP layer. They are accepted into `external` so one
/// config file/env profile can serve both without this crate parsing their
/// meaning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Per-run wall-clock cap, in seconds (§4.5).
    pub task_timeout_secs: u64,
    /// Condition-probe wall-clock cap, in seconds (§4.3).
    pub condition_timeout_secs: u64,
    /// Captured-log byte cap per result, before truncation (§3).
    pub log_cap_bytes: usize,
    /// Dispatcher tick period, in seconds (§4.4). Spec fixes this at 1s in
    /// production; configurable here so tests can drive it directly.
    pub dispatcher_tick_secs: u64,
    /// Bound on draining the Runner at shutdown, in seconds (§4.4/§5).
    pub shutdown_grace_secs: u64,
    /// Global cap on concurrently executing tasks (§4.5). `None` = unbounded.
    pub max_concurrent_tasks: Option<usize>,
    /// Logging verbosity, passed to `tracing_subscriber::EnvFilter`.
    pub log_level: String,
    /// `"human"` or `"json"`.
    pub log_format: String,
    /// Opaque passthrough for the external HTTP layer's own configuration.
    #[serde(default)]
    pub external: HashMap<String, String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            task_timeout_secs: 900,
            condition_timeout_secs: 60,
            log_cap_bytes: 256 * 1024,
            dispatcher_tick_secs: 1,
            shutdown_grace_secs: 30,
            max_concurrent_tasks: None,
            log_level: "info".to_string(),
            log_format: "human".to_string(),
            external: HashMap::new(),
        }
    }
}

fn default_db_path() -> PathBuf {
    let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("taskd").join("tasks.db")
}

impl CoreConfig {
    /// Start from defaults, then overlay `TASKD_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = env::var("TASKD_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Ok(v) = env::var("TASKD_TASK_TIMEOUT_SECS") {
            self.task_timeout_secs = parse_u64("TASKD_TASK_TIMEOUT_SECS", &v)?;
        }
        if let Ok(v) = env::var("TASKD_CONDITION_TIMEOUT_SECS") {
            self.condition_timeout_secs = parse_u64("TASKD_CONDITION_TIMEOUT_SECS", &v)?;
        }
        if let Ok(v) = env::var("TASKD_LOG_CAP_BYTES") {
            self.log_cap_bytes = parse_u64("TASKD_LOG_CAP_BYTES", &v)? as usize;
        }
        if let Ok(v) = env::var("TASKD_DISPATCHER_TICK_SECS") {
            self.dispatcher_tick_secs = parse_u64("TASKD_DISPATCHER_TICK_SECS", &v)?;
        }
        if let Ok(v) = env::var("TASKD_SHUTDOWN_GRACE_SECS") {
            self.shutdown_grace_secs = parse_u64("TASKD_SHUTDOWN_GRACE_SECS", &v)?;
        }
        if let Ok(v) = env::var("TASKD_MAX_CONCURRENT_TASKS") {
            self.max_concurrent_tasks = Some(parse_u64("TASKD_MAX_CONCURRENT_TASKS", &v)? as usize);
        }
        if let Ok(v) = env::var("TASKD_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = env::var("TASKD_LOG_FORMAT") {
            self.log_format = v;
        }
        Ok(())
    }

    /// Overlay a TOML config file on top of the current values.
    pub fn merge_file(&mut self, path: &std::path::Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let file_cfg: PartialConfig =
            toml::from_str(&text).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        file_cfg.apply_onto(self);
        Ok(())
    }
}

fn parse_u64(key: &str, v: &str) -> Result<u64, ConfigError> {
    v.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("expected an integer, got '{v}'"),
    })
}

/// Every field optional, for file-based overlay semantics.
#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    db_path: Option<PathBuf>,
    task_timeout_secs: Option<u64>,
    condition_timeout_secs: Option<u64>,
    log_cap_bytes: Option<usize>,
    dispatcher_tick_secs: Option<u64>,
    shutdown_grace_secs: Option<u64>,
    max_concurrent_tasks: Option<usize>,
    log_level: Option<String>,
    log_format: Option<String>,
    #[serde(default)]
    external: HashMap<String, String>,
}

impl PartialConfig {
    fn apply_onto(self, cfg: &mut CoreConfig) {
        if let Some(v) = self.db_path {
            cfg.db_path = v;
        }
        if let Some(v) = self.task_timeout_secs {
            cfg.task_timeout_secs = v;
        }
        if let Some(v) = self.condition_timeout_secs {
            cfg.condition_timeout_secs = v;
        }
        if let Some(v) = self.log_cap_bytes {
            cfg.log_cap_bytes = v;
        }
        if let Some(v) = self.dispatcher_tick_secs {
            cfg.dispatcher_tick_secs = v;
        }
        if let Some(v) = self.shutdown_grace_secs {
            cfg.shutdown_grace_secs = v;
        }
        if let Some(v) = self.max_concurrent_tasks {
            cfg.max_concurrent_tasks = Some(v);
        }
        if let Some(v) = self.log_level {
            cfg.log_level = v;
        }
        if let Some(v) = self.log_format {
            cfg.log_format = v;
        }
        cfg.external.extend(self.external);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.task_timeout_secs, 900);
        assert_eq!(cfg.condition_timeout_secs, 60);
        assert_eq!(cfg.log_cap_bytes, 256 * 1024);
        assert_eq!(cfg.dispatcher_tick_secs, 1);
        assert_eq!(cfg.shutdown_grace_secs, 30);
        assert!(cfg.max_concurrent_tasks.is_none());
    }

    #[test]
    fn merge_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskd.toml");
        std::fs::write(&path, "task_timeout_secs = 42\nlog_level = \"debug\"\n").unwrap();

        let mut cfg = CoreConfig::default();
        cfg.merge_file(&path).unwrap();
        assert_eq!(cfg.task_timeout_secs, 42);
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.condition_timeout_secs, 60);
    }

    #[test]
    fn invalid_env_value_is_rejected() {
        let err = parse_u64("TASKD_TASK_TIMEOUT_SECS", "not-a-number").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
