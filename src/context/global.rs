//! Process-wide context: database, loggers, event bus, config and rate limiters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::TallyConfig;
use crate::db::Database;
use crate::error::{ContextError, TallyError};
use crate::events::EventBus;
use crate::limiter::RateLimiterRegistry;
use crate::logging::LoggerFactory;

static GLOBAL: OnceLock<Arc<GlobalContext>> = OnceLock::new();
static INIT_LOCK: Mutex<()> = parking_lot::const_mutex(());
static CONTEXT_COUNTER: AtomicU64 = AtomicU64::new(1);

pub struct GlobalContext {
    context_id: String,
    db: Database,
    loggers: LoggerFactory,
    config: Arc<TallyConfig>,
    events: EventBus,
    rate_limiters: RateLimiterRegistry,
}

impl GlobalContext {
    pub fn new(db: Database, config: TallyConfig) -> Self {
        let context_id = format!(
            "ctx-{}-{}",
            Utc::now().timestamp_millis(),
            CONTEXT_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        Self {
            loggers: LoggerFactory::new(context_id.clone()),
            context_id,
            db,
            config: Arc::new(config),
            events: EventBus::new(),
            rate_limiters: RateLimiterRegistry::new(),
        }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Pooled handle. Inside a transaction use `ambient::db()` instead.
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn loggers(&self) -> &LoggerFactory {
        &self.loggers
    }

    pub fn config(&self) -> &Arc<TallyConfig> {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn rate_limiters(&self) -> &RateLimiterRegistry {
        &self.rate_limiters
    }
}

impl std::fmt::Debug for GlobalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalContext")
            .field("context_id", &self.context_id)
            .field("events", &self.events.event_names())
            .field("rate_limiters", &self.rate_limiters.names())
            .finish()
    }
}

/// Register the process-wide context, building it with `init` on first call.
///
/// Later calls do not run `init` and return the existing instance, so
/// resources (sled handles, subscribers) are never constructed twice.
pub fn initialize_global<F>(init: F) -> Result<Arc<GlobalContext>, TallyError>
where
    F: FnOnce() -> Result<GlobalContext, TallyError>,
{
    let _guard = INIT_LOCK.lock();
    if let Some(existing) = GLOBAL.get() {
        debug!(context_id = %existing.context_id, "global context already initialized");
        return Ok(Arc::clone(existing));
    }
    let global = Arc::new(init()?);
    // Cannot fail: we hold INIT_LOCK and checked GLOBAL above.
    let _ = GLOBAL.set(Arc::clone(&global));
    info!(context_id = %global.context_id, "global context initialized");
    Ok(global)
}

/// The registered process-wide context.
pub fn registered() -> Result<Arc<GlobalContext>, ContextError> {
    GLOBAL.get().cloned().ok_or(ContextError::GlobalNotInitialized)
}

pub fn is_initialized() -> bool {
    GLOBAL.get().is_some()
}
