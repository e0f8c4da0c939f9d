//! Background operations
//!
//! A long-running job (a restore, an import) reports its lifecycle as events
//! named `<kind>:<action>` on the event bus. The tracker folds those events
//! into one persisted progress record per kind, the gate redirects users to
//! the progress page while that record is live, and the worker launcher turns
//! `triggered` events into jobs running in their own standalone context.

pub mod events;
pub mod gate;
pub mod progress;
pub mod store;
pub mod tracker;
pub mod worker;

pub use events::{
    OperationCompleted, OperationFailed, OperationProgress, OperationStarted, OperationTriggered,
};
pub use gate::{GateDecision, OperationGate};
pub use progress::{
    compute_percentage, ActionHistoryEntry, BackgroundOperationProgress, OperationAction,
    OperationPhase,
};
pub use store::{KeyValueStore, SledKeyValueStore};
pub use tracker::OperationTracker;
pub use worker::{launch_on_trigger, OperationReporter, OperationWorker};

use crate::config::OperationKindConfig;

/// Identity of one kind of background operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationKind {
    /// Event name prefix
    pub name: String,
    /// Key of the single live progress record
    pub store_key: String,
    pub progress_route: String,
}

impl OperationKind {
    pub fn new(
        name: impl Into<String>,
        store_key: impl Into<String>,
        progress_route: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            store_key: store_key.into(),
            progress_route: progress_route.into(),
        }
    }

    pub fn from_config(config: &OperationKindConfig) -> Self {
        Self::new(&config.name, &config.store_key, &config.progress_route)
    }

    /// `restore` + `Started` -> `restore:started`
    pub fn event_name(&self, action: OperationAction) -> String {
        format!("{}:{}", self.name, action.as_str())
    }
}
