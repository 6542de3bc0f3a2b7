//! Runtime configuration for calibration sessions.
//!
//! Supports loading configuration from:
//! 1. Configuration files (YAML)
//! 2. Environment variables (with QCAL_ prefix)
//!
//! Environment variables take precedence over the file, the file over the
//! built-in defaults.
//!
//! ```yaml
//! project: chip-a
//! store: sqlite
//! retry:
//!   max_attempts: 16
//! validation:
//!   default_r2_threshold: 0.8
//!   bounds:
//!     - name_contains: fidelity
//!       min: 0.0
//!       max: 1.0
//! status_policy: any_failed_or_skipped
//! logging:
//!   level: debug
//!   format: json
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CalibError, CalibResult};
use crate::record::StatusPolicy;

/// Complete calibration runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibConfig {
    /// Project key; one calibration session may run per project at a time.
    #[serde(default = "default_project")]
    pub project: String,

    /// Directory holding execution records, history and artifacts.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Execution record backend.
    #[serde(default)]
    pub store: StoreKind,

    /// Optimistic lock retry budget.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Result quality gates.
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Terminal status aggregation of execution records.
    #[serde(default)]
    pub status_policy: StatusPolicy,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Execution record storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    #[default]
    Json,
    Sqlite,
}

impl std::str::FromStr for StoreKind {
    type Err = CalibError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "json" => Ok(StoreKind::Json),
            "sqlite" => Ok(StoreKind::Sqlite),
            other => Err(CalibError::Config(format!("unknown store: {other}"))),
        }
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreKind::Memory => write!(f, "memory"),
            StoreKind::Json => write!(f, "json"),
            StoreKind::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Retry budget for optimistic lock conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles on every further attempt.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl RetryConfig {
    /// Sleep before attempt number `attempt` (1-based; the first attempt has none).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1_u64 << (attempt - 2).min(20);
        Duration::from_millis(self.base_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms))
    }
}

/// Physical plausibility bound for output parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterBound {
    /// Applies to every parameter whose name contains this text.
    pub name_contains: String,
    pub min: f64,
    pub max: f64,
}

impl ParameterBound {
    pub fn new(name_contains: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name_contains: name_contains.into(),
            min,
            max,
        }
    }

    pub fn applies_to(&self, name: &str) -> bool {
        name.contains(&self.name_contains)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Quality gates applied by the task executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Minimum R² of a fit when the task does not set its own threshold.
    #[serde(default = "default_r2_threshold")]
    pub default_r2_threshold: f64,

    #[serde(default = "default_bounds")]
    pub bounds: Vec<ParameterBound>,
}

impl ValidationConfig {
    /// The first bound `value` violates for parameter `name`.
    pub fn violated_bound(&self, name: &str, value: f64) -> Option<&ParameterBound> {
        self.bounds
            .iter()
            .find(|b| b.applies_to(name) && !b.contains(value))
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable console output.
    #[default]
    Console,
    /// JSON structured logging.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

// Default value functions
fn default_project() -> String {
    "default".to_string()
}

fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("qcal"))
        .unwrap_or_else(|| std::env::temp_dir().join("qcal"))
}

fn default_max_attempts() -> u32 {
    32
}

fn default_base_backoff_ms() -> u64 {
    2
}

fn default_max_backoff_ms() -> u64 {
    200
}

fn default_r2_threshold() -> f64 {
    0.7
}

fn default_bounds() -> Vec<ParameterBound> {
    vec![ParameterBound::new("fidelity", 0.0, 1.0)]
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            default_r2_threshold: default_r2_threshold(),
            bounds: default_bounds(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl Default for CalibConfig {
    fn default() -> Self {
        Self {
            project: default_project(),
            state_dir: default_state_dir(),
            store: StoreKind::default(),
            retry: RetryConfig::default(),
            validation: ValidationConfig::default(),
            status_policy: StatusPolicy::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl CalibConfig {
    /// Load and validate configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> CalibResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CalibError::Config(format!("cannot read {}: {e}", path.as_ref().display()))
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate configuration from YAML.
    pub fn from_yaml_str(yaml: &str) -> CalibResult<Self> {
        let config: CalibConfig =
            serde_yaml_ng::from_str(yaml).map_err(|e| CalibError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> CalibResult<Self> {
        let config = Self::default().with_env_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional file, then apply environment overrides.
    pub fn load(config_file: Option<&Path>) -> CalibResult<Self> {
        let config = match config_file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.with_env_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `QCAL_*` overrides looked up through `lookup`.
    ///
    /// Only variables that are set override the current values.
    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> CalibResult<Self> {
        if let Some(v) = lookup("QCAL_PROJECT") {
            self.project = v;
        }
        if let Some(v) = lookup("QCAL_STATE_DIR") {
            self.state_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("QCAL_STORE") {
            self.store = v.parse()?;
        }
        if let Some(v) = lookup("QCAL_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_env("QCAL_RETRY_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("QCAL_R2_THRESHOLD") {
            self.validation.default_r2_threshold = parse_env("QCAL_R2_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("QCAL_STATUS_POLICY") {
            self.status_policy = v.parse()?;
        }
        if let Some(v) = lookup("QCAL_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("QCAL_LOG_FORMAT") {
            self.logging.format = match v.as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Console,
            };
        }
        Ok(self)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> CalibResult<()> {
        if self.project.trim().is_empty() {
            return Err(CalibError::Config("project cannot be empty".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(CalibError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.base_backoff_ms > self.retry.max_backoff_ms {
            return Err(CalibError::Config(
                "retry.base_backoff_ms cannot exceed retry.max_backoff_ms".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.validation.default_r2_threshold) {
            return Err(CalibError::Config(
                "validation.default_r2_threshold must be within [0, 1]".into(),
            ));
        }
        for bound in &self.validation.bounds {
            if bound.min > bound.max {
                return Err(CalibError::Config(format!(
                    "bound for '{}' has min > max",
                    bound.name_contains
                )));
            }
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(CalibError::Config(format!(
                "invalid log level: {}",
                self.logging.level
            )));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> CalibResult<T> {
    value
        .parse()
        .map_err(|_| CalibError::Config(format!("{key} has an invalid value: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = CalibConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store, StoreKind::Json);
        assert_eq!(config.status_policy, StatusPolicy::AnyFailed);
        assert_eq!(config.retry.max_attempts, 32);
    }

    #[test]
    fn test_yaml_partial_uses_defaults() {
        let config = CalibConfig::from_yaml_str(
            "project: chip-a\nstore: sqlite\nstatus_policy: any_failed_or_skipped\nlogging:\n  format: json\n",
        )
        .unwrap();
        assert_eq!(config.project, "chip-a");
        assert_eq!(config.store, StoreKind::Sqlite);
        assert_eq!(config.status_policy, StatusPolicy::AnyFailedOrSkipped);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.validation.bounds.len(), 1);
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        assert!(CalibConfig::from_yaml_str("retry:\n  max_attempts: 0\n").is_err());
        assert!(CalibConfig::from_yaml_str("store: mongo\n").is_err());
        assert!(CalibConfig::from_yaml_str("logging:\n  level: loud\n").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("QCAL_PROJECT", "chip-b"),
            ("QCAL_STATE_DIR", "/var/lib/qcal"),
            ("QCAL_STORE", "memory"),
            ("QCAL_RETRY_MAX_ATTEMPTS", "4"),
            ("QCAL_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();
        let config = CalibConfig::default()
            .with_env_from(|k| env.get(k).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.project, "chip-b");
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/qcal"));
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.logging.format, LogFormat::Json);

        let bad = CalibConfig::default().with_env_from(|k| {
            (k == "QCAL_RETRY_MAX_ATTEMPTS").then(|| "many".to_string())
        });
        assert!(bad.is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let retry = RetryConfig {
            max_attempts: 10,
            base_backoff_ms: 10,
            max_backoff_ms: 50,
        };
        assert_eq!(retry.backoff(1), Duration::ZERO);
        assert_eq!(retry.backoff(2), Duration::from_millis(10));
        assert_eq!(retry.backoff(3), Duration::from_millis(20));
        assert_eq!(retry.backoff(5), Duration::from_millis(50));
    }

    #[test]
    fn test_fidelity_bound() {
        let validation = ValidationConfig::default();
        assert!(validation.violated_bound("x90_gate_fidelity", 1.2).is_some());
        assert!(validation.violated_bound("x90_gate_fidelity", 0.99).is_none());
        assert!(validation.violated_bound("t1", 1.2).is_none());
    }
}
