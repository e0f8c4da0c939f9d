//! Configuration System
//!
//! Layered configuration: built-in defaults, then an optional TOML file, then
//! `TALLY_`-prefixed environment variables (`__` separates nested keys, e.g.
//! `TALLY_TRANSACTIONS__TIMING__BUDGET_MS=250`).

use crate::error::TallyError;
use crate::logging::LoggingConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TallyConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub transactions: TransactionConfig,

    #[serde(default)]
    pub operations: OperationsConfig,

    #[serde(default)]
    pub limiter: LimiterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sled database directory
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "tally")
        .map(|dirs| dirs.data_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from(".tally/db"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Wrap non-read requests in a transaction
    #[serde(default = "default_true")]
    pub wrap_mutations: bool,

    #[serde(default)]
    pub timing: TransactionTimingConfig,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            wrap_mutations: true,
            timing: TransactionTimingConfig::default(),
        }
    }
}

/// Observational timing around transactional requests. Never cancels work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionTimingConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Warn when more than this many ms pass between request start and
    /// transaction open
    #[serde(default = "default_budget_ms")]
    pub budget_ms: u64,
}

impl Default for TransactionTimingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            budget_ms: default_budget_ms(),
        }
    }
}

fn default_budget_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationsConfig {
    #[serde(default = "default_restore_kind")]
    pub restore: OperationKindConfig,

    /// Route prefixes never redirected while an operation runs (static assets,
    /// health checks)
    #[serde(default = "default_exempt_prefixes")]
    pub exempt_prefixes: Vec<String>,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            restore: default_restore_kind(),
            exempt_prefixes: default_exempt_prefixes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationKindConfig {
    /// Event name prefix, e.g. `restore` for `restore:started`
    pub name: String,
    /// Key of the single live progress record
    pub store_key: String,
    /// Route that shows progress; the only gated route never redirected
    pub progress_route: String,
}

fn default_restore_kind() -> OperationKindConfig {
    OperationKindConfig {
        name: "restore".to_string(),
        store_key: "restore-progress".to_string(),
        progress_route: "/restore-progress".to_string(),
    }
}

fn default_exempt_prefixes() -> Vec<String> {
    vec!["/static/".to_string(), "/health".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Quiet window before a coalesced refresh fires
    #[serde(default = "default_refresh_debounce_ms")]
    pub refresh_debounce_ms: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            refresh_debounce_ms: default_refresh_debounce_ms(),
        }
    }
}

fn default_refresh_debounce_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    Database(String),
    Transactions(String),
    Operations(String),
    Limiter(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Database(msg) => write!(f, "Database: {}", msg),
            ValidationError::Transactions(msg) => write!(f, "Transactions: {}", msg),
            ValidationError::Operations(msg) => write!(f, "Operations: {}", msg),
            ValidationError::Limiter(msg) => write!(f, "Limiter: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl TallyConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.database.path.as_os_str().is_empty() {
            errors.push(ValidationError::Database(
                "Database path cannot be empty".to_string(),
            ));
        }

        let timing = &self.transactions.timing;
        if timing.enabled && timing.budget_ms == 0 {
            errors.push(ValidationError::Transactions(
                "timing.budget_ms must be positive when timing is enabled".to_string(),
            ));
        }

        let restore = &self.operations.restore;
        if restore.name.is_empty() || restore.name.contains(':') {
            errors.push(ValidationError::Operations(format!(
                "Invalid operation name '{}'",
                restore.name
            )));
        }
        if restore.store_key.is_empty() {
            errors.push(ValidationError::Operations(
                "store_key cannot be empty".to_string(),
            ));
        }
        if !restore.progress_route.starts_with('/') {
            errors.push(ValidationError::Operations(format!(
                "progress_route '{}' must start with '/'",
                restore.progress_route
            )));
        }

        if self.limiter.refresh_debounce_ms == 0 {
            errors.push(ValidationError::Limiter(
                "refresh_debounce_ms must be positive".to_string(),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Loads `TallyConfig` from defaults, file and environment.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration, optionally from an explicit TOML file.
    pub fn load(config_file: Option<&Path>) -> Result<TallyConfig, TallyError> {
        let mut builder = builder_with_defaults()?;
        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("TALLY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        let config: TallyConfig = builder.build()?.try_deserialize()?;
        validated(config)
    }

    /// Load configuration from a single file without environment overrides.
    pub fn load_from_file(path: &Path) -> Result<TallyConfig, TallyError> {
        let config: TallyConfig = builder_with_defaults()?
            .add_source(File::from(path).required(true))
            .build()?
            .try_deserialize()?;
        validated(config)
    }
}

pub(crate) fn validated(config: TallyConfig) -> Result<TallyConfig, TallyError> {
    config.validate().map_err(|errors| {
        let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        TallyError::Config(format!(
            "Configuration validation failed:\n{}",
            error_msgs.join("\n")
        ))
    })?;
    Ok(config)
}

/// Config builder with defaults for keys that have no serde default of their own.
fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let restore = default_restore_kind();
    Config::builder()
        .set_default(
            "database.path",
            default_database_path().to_string_lossy().into_owned(),
        )?
        .set_default("operations.restore.name", restore.name)?
        .set_default("operations.restore.store_key", restore.store_key)?
        .set_default("operations.restore.progress_route", restore.progress_route)
}
