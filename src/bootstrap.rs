//! Process start-up.
//!
//! Order matters: logging first, then the database and the global context,
//! then crash recovery (a progress record left by a previous process is
//! discarded before any request can be gated by it), then event listeners.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{validated, TallyConfig};
use crate::context::{initialize_global, GlobalContext};
use crate::db::Database;
use crate::error::TallyError;
use crate::logging::init_logging;
use crate::operation::{OperationGate, OperationKind, OperationTracker};

/// Handles produced by a successful start.
#[derive(Debug, Clone)]
pub struct Services {
    pub global: Arc<GlobalContext>,
    pub restore: Arc<OperationTracker>,
    pub gate: OperationGate,
}

impl Services {
    /// Cancel pending debounced work and flush storage.
    pub fn shutdown(&self) -> Result<(), TallyError> {
        let cleared = self.global.rate_limiters().clear_all();
        self.global.db().flush()?;
        info!(cleared_limiters = cleared, "services shut down");
        Ok(())
    }
}

pub struct Bootstrap {
    config: TallyConfig,
    logging: bool,
    database: Option<Database>,
}

impl Bootstrap {
    pub fn new(config: TallyConfig) -> Self {
        Self {
            config,
            logging: true,
            database: None,
        }
    }

    /// Whether `start` installs the tracing subscriber.
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging = enabled;
        self
    }

    /// Use an already-open database instead of opening `database.path`.
    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    /// Start and register the process-wide context.
    ///
    /// If a global is already registered it is reused, and startup cleanup is
    /// skipped: it runs once, for the process that created the global.
    pub fn start(self) -> Result<Services, TallyError> {
        let Bootstrap {
            config,
            logging,
            database,
        } = self;
        let config = validated(config)?;
        if logging {
            install_logging(&config)?;
        }

        let mut created = false;
        let global = initialize_global(|| {
            created = true;
            build_global(config, database)
        })?;
        if !created {
            debug!(context_id = %global.context_id(), "attaching to registered global context");
        }
        wire(global, created)
    }

    /// Start without registering the singleton. Used by tests and tools that
    /// need several independent contexts in one process.
    pub fn start_unregistered(self) -> Result<Services, TallyError> {
        let Bootstrap {
            config,
            logging,
            database,
        } = self;
        let config = validated(config)?;
        if logging {
            install_logging(&config)?;
        }
        let global = Arc::new(build_global(config, database)?);
        wire(global, true)
    }
}

/// Install the subscriber unless one is already set, by an earlier start or
/// by a host application.
fn install_logging(config: &TallyConfig) -> Result<(), TallyError> {
    if tracing::dispatcher::has_been_set() {
        debug!("tracing subscriber already installed; keeping it");
        return Ok(());
    }
    init_logging(Some(&config.logging))
}

fn build_global(config: TallyConfig, database: Option<Database>) -> Result<GlobalContext, TallyError> {
    let db = match database {
        Some(db) => db,
        None => {
            if let Some(parent) = config.database.path.parent() {
                std::fs::create_dir_all(parent).map_err(crate::error::StorageError::from)?;
            }
            Database::open(&config.database.path)?
        }
    };
    Ok(GlobalContext::new(db, config))
}

fn wire(global: Arc<GlobalContext>, run_cleanup: bool) -> Result<Services, TallyError> {
    let operations = &global.config().operations;
    let kind = OperationKind::from_config(&operations.restore);
    let exempt = operations.exempt_prefixes.clone();

    let restore = Arc::new(OperationTracker::from_global(kind, &global)?);
    if run_cleanup && restore.cleanup_on_startup() {
        info!(operation = %restore.kind().name, "interrupted operation discarded");
    }
    restore.register(global.events());

    let gate = OperationGate::new(Arc::clone(&restore), exempt);
    info!(context_id = %global.context_id(), "services started");
    Ok(Services {
        global,
        restore,
        gate,
    })
}
