//! Logging System
//!
//! Structured logging using the `tracing` crate, plus the `LoggerFactory` held
//! by the global context. Spans produced by the factory carry the process
//! `context_id` and, inside a bound call chain, the `request_id` and
//! `route_id`, so every line logged by business code can be correlated back to
//! the request or cron job that caused it.

use crate::context::ambient;
use crate::error::TallyError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info_span, Span};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error, off
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: json, text
    #[serde(default = "default_format")]
    pub format: String,

    /// Output destination: stdout, stderr, file
    #[serde(default = "default_output")]
    pub output: String,

    /// Log file path (if output is "file")
    #[serde(default = "default_log_file")]
    pub file: PathBuf,

    /// Enable colored output (text format only)
    #[serde(default = "default_true")]
    pub color: bool,

    /// Module-specific log levels
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_output() -> String {
    "stdout".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from(".tally/tally.log")
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_format(),
            output: default_output(),
            file: default_log_file(),
            color: default_true(),
            modules: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    fn parse(raw: &str) -> Result<Self, TallyError> {
        match raw {
            "json" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            other => Err(TallyError::Config(format!(
                "Invalid log format: {} (must be 'json' or 'text')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LogTarget {
    Stdout,
    Stderr,
    File(PathBuf),
}

impl LogTarget {
    fn parse(raw: &str, file: &Path) -> Result<Self, TallyError> {
        match raw {
            "stdout" => Ok(LogTarget::Stdout),
            "stderr" => Ok(LogTarget::Stderr),
            "file" => Ok(LogTarget::File(file.to_path_buf())),
            other => Err(TallyError::Config(format!(
                "Invalid log output: {} (must be 'stdout', 'stderr' or 'file')",
                other
            ))),
        }
    }

    fn is_terminal(&self) -> bool {
        !matches!(self, LogTarget::File(_))
    }

    fn writer(&self) -> Result<BoxMakeWriter, TallyError> {
        Ok(match self {
            LogTarget::Stdout => BoxMakeWriter::new(std::io::stdout),
            LogTarget::Stderr => BoxMakeWriter::new(std::io::stderr),
            LogTarget::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        TallyError::Config(format!("Failed to create log directory: {}", e))
                    })?;
                }
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| {
                        TallyError::Config(format!("Failed to open log file {:?}: {}", path, e))
                    })?;
                BoxMakeWriter::new(Arc::new(file))
            }
        })
    }
}

/// Initialize the global tracing subscriber.
///
/// `TALLY_LOG`, `TALLY_LOG_FORMAT`, `TALLY_LOG_OUTPUT` and `TALLY_LOG_MODULES`
/// override the matching config fields. Fails if a subscriber is already
/// installed.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), TallyError> {
    let defaults = LoggingConfig::default();
    let config = config.unwrap_or(&defaults);

    let filter = env_filter(config)?;
    let format = LogFormat::parse(&env_or("TALLY_LOG_FORMAT", &config.format))?;
    let target = LogTarget::parse(&env_or("TALLY_LOG_OUTPUT", &config.output), &config.file)?;
    let ansi = config.color && format == LogFormat::Text && target.is_terminal();

    let layer = fmt::layer()
        .with_target(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_ansi(ansi)
        .with_writer(target.writer()?);
    let layer = match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Text => layer.boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| TallyError::Config(format!("Failed to install log subscriber: {}", e)))
}

fn env_or(var: &str, fallback: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| fallback.to_string())
}

/// Level plus per-module directives, config first, then `TALLY_LOG_MODULES`
/// (`module=level,...`). `TALLY_LOG` replaces all of it.
fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, TallyError> {
    if let Ok(filter) = EnvFilter::try_from_env("TALLY_LOG") {
        return Ok(filter);
    }
    if config.level == "off" {
        return Ok(EnvFilter::new("off"));
    }

    let from_env = std::env::var("TALLY_LOG_MODULES").unwrap_or_default();
    let env_directives = from_env.split(',').filter_map(|spec| {
        let (module, level) = spec.split_once('=')?;
        Some(format!("{}={}", module.trim(), level.trim()))
    });

    config
        .modules
        .iter()
        .map(|(module, level)| format!("{}={}", module, level))
        .chain(env_directives)
        .try_fold(EnvFilter::new(&config.level), |filter, directive| {
            let parsed: Directive = directive.parse().map_err(|e| {
                TallyError::Config(format!("Invalid log directive {}: {}", directive, e))
            })?;
            Ok(filter.add_directive(parsed))
        })
}

/// Hands out component spans tagged with the process and request identity.
#[derive(Debug, Clone)]
pub struct LoggerFactory {
    context_id: String,
}

impl LoggerFactory {
    pub fn new(context_id: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
        }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Span for `component`. Enter it (or `instrument` a future with it) to
    /// tag every event logged inside.
    pub fn component(&self, component: &'static str) -> Span {
        match ambient::try_request() {
            Some(request) => info_span!(
                "tally",
                component,
                context_id = %self.context_id,
                request_id = %request.request_id,
                route_id = %request.route_id,
            ),
            None => info_span!("tally", component, context_id = %self.context_id),
        }
    }
}
