//! Shared setup for integration tests.

use std::sync::Arc;
use std::time::Duration;

use tally::config::TallyConfig;
use tally::context::{GlobalContext, HttpMethod, RequestContext, UserIdentity};
use tally::db::Database;
use tally::operation::{BackgroundOperationProgress, OperationTracker};
use tally::{Bootstrap, Services};

/// Unregistered global over an in-memory database.
pub fn fresh_global() -> Arc<GlobalContext> {
    fresh_global_with(TallyConfig::default())
}

pub fn fresh_global_with(config: TallyConfig) -> Arc<GlobalContext> {
    Arc::new(GlobalContext::new(
        Database::temporary().expect("temporary database"),
        config,
    ))
}

/// Fully wired services (tracker registered, gate built) without touching
/// the process-wide singleton.
pub fn fresh_services() -> Services {
    Bootstrap::new(TallyConfig::default())
        .with_logging(false)
        .with_database(Database::temporary().expect("temporary database"))
        .start_unregistered()
        .expect("services start")
}

pub fn signed_in_get(url: &str) -> RequestContext {
    RequestContext::new("page", url, HttpMethod::Get).with_user(UserIdentity::new("u1", "ana"))
}

/// Poll until the tracker holds a terminal record, or give up after ~2s.
pub async fn wait_for_terminal(tracker: &OperationTracker) -> Option<BackgroundOperationProgress> {
    for _ in 0..200 {
        if let Some(record) = tracker.current().filter(|r| r.is_terminal()) {
            return Some(record);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}
