//! Tally operator CLI
//!
//! Inspects and resets background-operation state and prints the effective
//! configuration. Opens the database directly, so run it while the server is
//! stopped.

use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::{Parser, Subcommand};
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use std::sync::Arc;
use tally::config::{ConfigLoader, TallyConfig};
use tally::db::Database;
use tally::logging::{init_logging, LoggingConfig};
use tally::operation::{BackgroundOperationProgress, OperationKind, OperationTracker, SledKeyValueStore};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Operator commands for the Tally context and operation layer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Background operation state
    Operation {
        #[command(subcommand)]
        command: OperationCommands,
    },
    /// Effective configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum OperationCommands {
    /// Show the live progress record
    Status {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Delete the progress record (unblocks gated users)
    Clear,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the merged configuration as TOML
    Show,
    /// Validate the configuration and report the result
    Check,
}

fn main() {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::default();
    logging.level = match (&cli.log_level, cli.verbose) {
        (Some(level), _) => level.clone(),
        (None, true) => "debug".to_string(),
        (None, false) => "off".to_string(),
    };
    logging.output = "stderr".to_string();
    if let Err(e) = init_logging(Some(&logging)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    match run(&cli) {
        Ok(output) => {
            info!("Command completed successfully");
            println!("{}", output);
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<String> {
    let config = ConfigLoader::load(cli.config.as_deref()).context("loading configuration")?;
    match &cli.command {
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                toml::to_string_pretty(&config).context("rendering configuration")
            }
            ConfigCommands::Check => Ok(format!(
                "Configuration OK (database: {})",
                config.database.path.display()
            )),
        },
        Commands::Operation { command } => {
            let tracker = open_tracker(&config)?;
            match command {
                OperationCommands::Status { format } => match tracker.current() {
                    None => Ok(format!("No {} operation recorded", tracker.kind().name)),
                    Some(record) if format == "json" => {
                        serde_json::to_string_pretty(&record).context("rendering progress record")
                    }
                    Some(record) => Ok(render_status(&record)),
                },
                OperationCommands::Clear => Ok(if tracker.clear() {
                    format!("Cleared {} progress record", tracker.kind().name)
                } else {
                    format!("No {} progress record to clear", tracker.kind().name)
                }),
            }
        }
    }
}

fn open_tracker(config: &TallyConfig) -> anyhow::Result<OperationTracker> {
    let db = Database::open(&config.database.path)
        .with_context(|| format!("opening database at {}", config.database.path.display()))?;
    let store = SledKeyValueStore::new(db.sled())?;
    let kind = OperationKind::from_config(&config.operations.restore);
    Ok(OperationTracker::new(kind, Arc::new(store)))
}

fn render_status(record: &BackgroundOperationProgress) -> String {
    let mut summary = Table::new();
    summary.load_preset(UTF8_FULL);
    summary.set_header(vec!["Operation", "Phase", "Progress", "Started", "Updated", "User"]);
    summary.add_row(vec![
        record.operation_id.clone(),
        record.phase.to_string(),
        format!("{}/{} ({}%)", record.current, record.total, record.percentage),
        record.started_at.to_rfc3339(),
        record.updated_at.to_rfc3339(),
        record.user_id.clone().unwrap_or_else(|| "-".to_string()),
    ]);

    let mut history = Table::new();
    history.load_preset(UTF8_FULL);
    history.set_header(vec!["#", "Action", "At", "Phase", "Percent", "Message"]);
    for (i, entry) in record.action_history.iter().enumerate() {
        history.add_row(vec![
            (i + 1).to_string(),
            entry.action.to_string(),
            entry.at.to_rfc3339(),
            entry.phase.to_string(),
            entry.percentage.to_string(),
            entry.message.clone().unwrap_or_default(),
        ]);
    }

    let mut out = summary.to_string();
    if let Some(error) = &record.error {
        out.push_str(&format!("\nError: {}", error));
    }
    out.push('\n');
    out.push_str(&history.to_string());
    out
}
