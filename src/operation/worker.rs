//! Runs background work in response to `<kind>:triggered` events.

use std::sync::{Arc, Weak};
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error, info, Instrument};

use crate::context::{run_standalone_with, GlobalContext, RequestMeta};
use crate::error::TallyError;
use crate::events::{EventBus, ListenerId};
use crate::operation::events::{
    OperationCompleted, OperationFailed, OperationProgress, OperationStarted, OperationTriggered,
};
use crate::operation::progress::OperationAction;
use crate::operation::OperationKind;

/// The job behind one operation kind. Runs inside a standalone context, so
/// `ambient::db()` and friends are available.
#[async_trait]
pub trait OperationWorker: Send + Sync + 'static {
    async fn run(
        &self,
        trigger: OperationTriggered,
        reporter: &OperationReporter,
    ) -> Result<(), TallyError>;
}

/// Emits lifecycle events for a single run.
#[derive(Debug, Clone)]
pub struct OperationReporter {
    events: EventBus,
    kind: OperationKind,
    operation_id: String,
    started: Instant,
}

impl OperationReporter {
    pub fn new(events: EventBus, kind: OperationKind, operation_id: impl Into<String>) -> Self {
        Self {
            events,
            kind,
            operation_id: operation_id.into(),
            started: Instant::now(),
        }
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub async fn started(&self, event: OperationStarted) {
        self.emit(OperationAction::Started, event).await;
    }

    pub async fn progress(&self, step: &str, current: u64, total: u64) {
        let event = OperationProgress::new(&self.operation_id, step, current, total);
        self.emit(OperationAction::Progress, event).await;
    }

    pub async fn completed(&self, message: Option<String>) {
        let mut event = OperationCompleted::new(&self.operation_id, self.elapsed_ms());
        event.message = message;
        self.emit(OperationAction::Completed, event).await;
    }

    pub async fn failed(&self, error: impl Into<String>) {
        let event = OperationFailed::new(&self.operation_id, error, self.elapsed_ms());
        self.emit(OperationAction::Failed, event).await;
    }

    async fn emit<P>(&self, action: OperationAction, payload: P)
    where
        P: std::any::Any + Send + Sync,
    {
        self.events
            .emit(&self.kind.event_name(action), payload)
            .await;
    }
}

/// Subscribe `worker` to `<kind>:triggered`, replacing any launcher already
/// listening there.
///
/// Each trigger spawns a task that binds a standalone context with route
/// `operation/<kind>`, emits `started`, runs the worker, then emits
/// `completed` or `failed`. The listener holds the global weakly so the
/// subscription does not keep the context alive.
pub fn launch_on_trigger<W>(global: &Arc<GlobalContext>, kind: OperationKind, worker: Arc<W>) -> ListenerId
where
    W: OperationWorker,
{
    let event = kind.event_name(OperationAction::Triggered);
    let weak: Weak<GlobalContext> = Arc::downgrade(global);

    let removed = global.events().remove_all_listeners(&event);
    if removed > 0 {
        debug!(operation = %kind.name, removed, "replaced worker launcher");
    }
    global.events().on(&event, move |trigger: OperationTriggered| {
        let outcome = match weak.upgrade() {
            Some(global) => {
                spawn_run(global, kind.clone(), Arc::clone(&worker), trigger);
                Ok(())
            }
            None => Err(TallyError::Operation {
                operation: kind.name.clone(),
                message: "global context dropped before trigger".to_string(),
            }),
        };
        async move { outcome }
    })
}

fn spawn_run<W>(global: Arc<GlobalContext>, kind: OperationKind, worker: Arc<W>, trigger: OperationTriggered)
where
    W: OperationWorker,
{
    let meta = RequestMeta::route(format!("operation/{}", kind.name));
    let span = tracing::info_span!(
        "operation",
        kind = %kind.name,
        operation_id = %trigger.operation_id
    );

    tokio::spawn(
        async move {
            let events = global.events().clone();
            let operation = kind.name.clone();
            let result = run_standalone_with(global, meta, || async move {
                let reporter = OperationReporter::new(events, kind, &trigger.operation_id);
                reporter.started(OperationStarted::from(&trigger)).await;
                info!("operation worker running");
                match worker.run(trigger, &reporter).await {
                    Ok(()) => {
                        reporter.completed(None).await;
                        Ok(())
                    }
                    Err(err) => {
                        reporter.failed(err.to_string()).await;
                        Err(err)
                    }
                }
            })
            .await;

            if let Err(err) = result {
                error!(operation = %operation, error = %err, "operation worker failed");
            }
        }
        .instrument(span),
    );
}
