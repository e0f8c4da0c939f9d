//! Folds lifecycle events into the persisted progress record.
//!
//! Phases only move forward: `starting -> <step>* -> completed | failed`.
//! A `started` event always opens a fresh record; every other event is
//! applied only to a live record with the same operation id. Storage
//! failures are logged and swallowed so a broken store degrades to "no
//! operation running" instead of failing the job that reports into it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::context::GlobalContext;
use crate::error::StorageError;
use crate::events::EventBus;
use crate::operation::events::{
    OperationCompleted, OperationFailed, OperationProgress, OperationStarted,
};
use crate::operation::progress::{
    compute_percentage, BackgroundOperationProgress, OperationAction, OperationPhase,
};
use crate::operation::store::{KeyValueStore, SledKeyValueStore};
use crate::operation::OperationKind;

pub struct OperationTracker {
    kind: OperationKind,
    store: Arc<dyn KeyValueStore>,
}

impl OperationTracker {
    pub fn new(kind: OperationKind, store: Arc<dyn KeyValueStore>) -> Self {
        Self { kind, store }
    }

    /// Tracker persisting into the global database's key-value tree.
    pub fn from_global(kind: OperationKind, global: &GlobalContext) -> Result<Self, StorageError> {
        let store = SledKeyValueStore::new(global.db().sled())?;
        Ok(Self::new(kind, Arc::new(store)))
    }

    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    pub fn current(&self) -> Option<BackgroundOperationProgress> {
        self.load()
    }

    /// A record exists and has not reached a terminal phase.
    pub fn is_active(&self) -> bool {
        self.load().map(|r| !r.is_terminal()).unwrap_or(false)
    }

    /// Discard any record left by a previous process. Returns whether one existed.
    pub fn cleanup_on_startup(&self) -> bool {
        match self.store.delete(&self.kind.store_key) {
            Ok(true) => {
                info!(
                    operation = %self.kind.name,
                    key = %self.kind.store_key,
                    "discarded progress record from previous process"
                );
                true
            }
            Ok(false) => false,
            Err(err) => {
                warn!(operation = %self.kind.name, error = %err, "startup cleanup failed");
                false
            }
        }
    }

    /// Operator reset. Same effect as startup cleanup.
    pub fn clear(&self) -> bool {
        match self.store.delete(&self.kind.store_key) {
            Ok(removed) => removed,
            Err(err) => {
                warn!(operation = %self.kind.name, error = %err, "failed to clear progress record");
                false
            }
        }
    }

    pub fn on_started(&self, event: &OperationStarted) {
        self.apply_started(event, Utc::now());
    }

    pub fn on_progress(&self, event: &OperationProgress) {
        self.apply_progress(event, Utc::now());
    }

    pub fn on_completed(&self, event: &OperationCompleted) {
        self.apply_completed(event, Utc::now());
    }

    pub fn on_failed(&self, event: &OperationFailed) {
        self.apply_failed(event, Utc::now());
    }

    /// Subscribe to this kind's lifecycle events, replacing earlier listeners.
    pub fn register(self: &Arc<Self>, bus: &EventBus) {
        for action in [
            OperationAction::Started,
            OperationAction::Progress,
            OperationAction::Completed,
            OperationAction::Failed,
        ] {
            let removed = bus.remove_all_listeners(&self.kind.event_name(action));
            if removed > 0 {
                debug!(operation = %self.kind.name, %action, removed, "replaced tracker listeners");
            }
        }

        let tracker = Arc::clone(self);
        bus.on(
            &self.kind.event_name(OperationAction::Started),
            move |event: OperationStarted| {
                tracker.on_started(&event);
                async { Ok(()) }
            },
        );
        let tracker = Arc::clone(self);
        bus.on(
            &self.kind.event_name(OperationAction::Progress),
            move |event: OperationProgress| {
                tracker.on_progress(&event);
                async { Ok(()) }
            },
        );
        let tracker = Arc::clone(self);
        bus.on(
            &self.kind.event_name(OperationAction::Completed),
            move |event: OperationCompleted| {
                tracker.on_completed(&event);
                async { Ok(()) }
            },
        );
        let tracker = Arc::clone(self);
        bus.on(
            &self.kind.event_name(OperationAction::Failed),
            move |event: OperationFailed| {
                tracker.on_failed(&event);
                async { Ok(()) }
            },
        );
    }

    fn apply_started(&self, event: &OperationStarted, at: DateTime<Utc>) {
        if let Some(previous) = self.load().filter(|r| !r.is_terminal()) {
            warn!(
                operation = %self.kind.name,
                previous = %previous.operation_id,
                next = %event.operation_id,
                "new run started over a live record"
            );
        }

        let mut record = BackgroundOperationProgress::starting(&event.operation_id, at);
        record.total = event.total;
        record.message = event.message.clone();
        record.user_id = event.user_id.clone();
        record.flags = event.flags.clone();
        record.record(OperationAction::Started, at);
        self.save(&record);
        info!(operation = %self.kind.name, operation_id = %record.operation_id, "operation started");
    }

    fn apply_progress(&self, event: &OperationProgress, at: DateTime<Utc>) {
        let Some(mut record) = self.live_record(&event.operation_id, OperationAction::Progress) else {
            return;
        };
        record.phase = OperationPhase::step(event.phase.as_str());
        record.current = event.current;
        record.total = event.total;
        record.percentage = compute_percentage(event.current, event.total);
        if event.message.is_some() {
            record.message = event.message.clone();
        }
        record.record(OperationAction::Progress, at);
        self.save(&record);
        debug!(
            operation = %self.kind.name,
            operation_id = %record.operation_id,
            phase = %record.phase,
            percentage = record.percentage,
            "operation progress"
        );
    }

    fn apply_completed(&self, event: &OperationCompleted, at: DateTime<Utc>) {
        let Some(mut record) = self.live_record(&event.operation_id, OperationAction::Completed)
        else {
            return;
        };
        record.phase = OperationPhase::Completed;
        record.percentage = 100;
        record.current = record.total;
        record.completed_at = Some(at);
        record.duration_ms = Some(event.duration_ms);
        if event.message.is_some() {
            record.message = event.message.clone();
        }
        record.record(OperationAction::Completed, at);
        self.save(&record);
        info!(
            operation = %self.kind.name,
            operation_id = %record.operation_id,
            duration_ms = event.duration_ms,
            "operation completed"
        );
    }

    fn apply_failed(&self, event: &OperationFailed, at: DateTime<Utc>) {
        let Some(mut record) = self.live_record(&event.operation_id, OperationAction::Failed) else {
            return;
        };
        record.phase = OperationPhase::Failed;
        record.failed_at = Some(at);
        record.error = Some(event.error.clone());
        record.duration_ms = Some(event.duration_ms);
        record.record(OperationAction::Failed, at);
        self.save(&record);
        warn!(
            operation = %self.kind.name,
            operation_id = %record.operation_id,
            error = %event.error,
            "operation failed"
        );
    }

    fn live_record(
        &self,
        operation_id: &str,
        action: OperationAction,
    ) -> Option<BackgroundOperationProgress> {
        let Some(record) = self.load() else {
            warn!(operation = %self.kind.name, %operation_id, %action, "no progress record; event ignored");
            return None;
        };
        if record.is_terminal() {
            warn!(
                operation = %self.kind.name,
                %operation_id,
                %action,
                phase = %record.phase,
                "record already terminal; event ignored"
            );
            return None;
        }
        if record.operation_id != operation_id {
            warn!(
                operation = %self.kind.name,
                %operation_id,
                live = %record.operation_id,
                %action,
                "event for a different run; ignored"
            );
            return None;
        }
        Some(record)
    }

    fn load(&self) -> Option<BackgroundOperationProgress> {
        let raw = match self.store.get(&self.kind.store_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(operation = %self.kind.name, error = %err, "failed to read progress record");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(operation = %self.kind.name, error = %err, "unreadable progress record");
                None
            }
        }
    }

    fn save(&self, record: &BackgroundOperationProgress) {
        let raw = match serde_json::to_string(record) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(operation = %self.kind.name, error = %err, "failed to encode progress record");
                return;
            }
        };
        if let Err(err) = self.store.set(&self.kind.store_key, &raw) {
            warn!(operation = %self.kind.name, error = %err, "failed to persist progress record");
        }
    }
}

impl std::fmt::Debug for OperationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationTracker")
            .field("kind", &self.kind)
            .finish()
    }
}
