//! Restore lifecycle: event folding, crash cleanup, gating and worker launch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tally::context::{ambient, handle_request, HttpMethod, NeverWrap, RequestContext};
use tally::error::TallyError;
use tally::operation::{
    launch_on_trigger, GateDecision, KeyValueStore, OperationAction, OperationCompleted,
    OperationPhase, OperationProgress, OperationReporter, OperationStarted, OperationTriggered,
    OperationWorker, SledKeyValueStore,
};

use crate::integration::{fresh_services, signed_in_get, wait_for_terminal};

#[tokio::test]
async fn restore_scenario_end_to_end() {
    let services = fresh_services();
    let bus = services.global.events().clone();
    let trigger = OperationTriggered::new("b1")
        .by_user("u1")
        .with_flag("includeUsers", false);

    // Nothing launches workers in this test; the trigger is only a signal.
    assert_eq!(bus.emit("restore:triggered", trigger.clone()).await, 0);
    assert!(services.restore.current().is_none());

    bus.emit("restore:started", OperationStarted::from(&trigger)).await;
    let record = services.restore.current().unwrap();
    assert_eq!(record.phase, OperationPhase::Starting);
    assert_eq!(record.percentage, 0);
    assert_eq!(record.user_id.as_deref(), Some("u1"));
    assert_eq!(record.flags["includeUsers"], serde_json::json!(false));

    bus.emit(
        "restore:progress",
        OperationProgress::new("b1", "copying", 50, 200),
    )
    .await;
    let record = services.restore.current().unwrap();
    assert_eq!(record.percentage, 25);
    assert_eq!(record.phase.as_str(), "copying");

    bus.emit(
        "restore:completed",
        OperationCompleted::new("b1", 4000).with_message("restored 200 rows"),
    )
    .await;
    let record = services.restore.current().unwrap();
    assert_eq!(record.phase, OperationPhase::Completed);
    assert_eq!(record.percentage, 100);
    assert!(record.completed_at.is_some());
    assert_eq!(record.duration_ms, Some(4000));
    assert_eq!(record.action_history.len(), 3);
    assert!(!services.restore.is_active());
}

#[tokio::test]
async fn four_step_lifecycle_keeps_ordered_history() {
    let services = fresh_services();
    let bus = services.global.events();

    bus.emit("restore:started", OperationStarted::new("b2").with_total(100)).await;
    bus.emit("restore:progress", OperationProgress::new("b2", "copying", 30, 100)).await;
    bus.emit("restore:progress", OperationProgress::new("b2", "copying", 70, 100)).await;
    bus.emit("restore:completed", OperationCompleted::new("b2", 900)).await;

    let record = services.restore.current().unwrap();
    assert_eq!(record.phase, OperationPhase::Completed);
    assert_eq!(record.percentage, 100);
    let history: Vec<(OperationAction, u8)> = record
        .action_history
        .iter()
        .map(|e| (e.action, e.percentage))
        .collect();
    assert_eq!(
        history,
        vec![
            (OperationAction::Started, 0),
            (OperationAction::Progress, 30),
            (OperationAction::Progress, 70),
            (OperationAction::Completed, 100),
        ]
    );
    assert!(record
        .action_history
        .windows(2)
        .all(|pair| pair[0].at <= pair[1].at));
}

#[tokio::test]
async fn startup_cleanup_discards_progress_record() {
    let services = fresh_services();
    let store = SledKeyValueStore::new(services.global.db().sled()).unwrap();
    store
        .set(
            "restore-progress",
            &serde_json::json!({
                "operation_id": "crashed",
                "phase": "progress",
                "current": 10,
                "total": 40,
                "percentage": 25,
                "started_at": "2024-03-01T10:00:00Z",
                "updated_at": "2024-03-01T10:05:00Z"
            })
            .to_string(),
        )
        .unwrap();

    assert!(services.restore.is_active());
    assert!(services.restore.cleanup_on_startup());
    assert!(!services.restore.is_active());
    assert!(store.get("restore-progress").unwrap().is_none());
}

#[tokio::test]
async fn gate_redirects_everything_but_the_progress_route() {
    let services = fresh_services();
    assert_eq!(services.gate.check(&signed_in_get("/ledgers")), GateDecision::Proceed);

    services
        .global
        .events()
        .emit("restore:started", OperationStarted::new("b3"))
        .await;

    for url in ["/ledgers", "/accounts/7", "/budgets?month=3"] {
        assert_eq!(
            services.gate.check(&signed_in_get(url)),
            GateDecision::Redirect("/restore-progress".to_string())
        );
    }
    assert_eq!(
        services.gate.check(&signed_in_get("/restore-progress")),
        GateDecision::Proceed
    );
    assert_eq!(
        services.gate.check(&signed_in_get("/health")),
        GateDecision::Proceed
    );

    let gate = services.gate.clone();
    let decision = handle_request(
        services.global.clone(),
        signed_in_get("/ledgers"),
        &NeverWrap,
        || async move { gate.check_current().map_err(TallyError::from) },
    )
    .await
    .unwrap();
    assert_eq!(decision, GateDecision::Redirect("/restore-progress".to_string()));

    let anonymous = RequestContext::new("page", "/ledgers", HttpMethod::Get);
    assert_eq!(services.gate.check(&anonymous), GateDecision::Proceed);
}

struct CopyRows {
    rows: u64,
}

#[async_trait]
impl OperationWorker for CopyRows {
    async fn run(
        &self,
        trigger: OperationTriggered,
        reporter: &OperationReporter,
    ) -> Result<(), TallyError> {
        let request = ambient::request()?;
        let db = ambient::db()?;
        db.insert("restore:route", request.route_id.as_str())?;
        for copied in 1..=self.rows {
            db.insert(&format!("row:{}:{copied}", trigger.operation_id), "restored")?;
            reporter.progress("copying", copied, self.rows).await;
        }
        Ok(())
    }
}

struct BrokenArchive;

#[async_trait]
impl OperationWorker for BrokenArchive {
    async fn run(
        &self,
        _trigger: OperationTriggered,
        reporter: &OperationReporter,
    ) -> Result<(), TallyError> {
        reporter.progress("verifying", 1, 4).await;
        Err(TallyError::Operation {
            operation: "restore".to_string(),
            message: "archive checksum mismatch".to_string(),
        })
    }
}

#[tokio::test]
async fn triggered_worker_runs_in_standalone_context() {
    let services = fresh_services();
    launch_on_trigger(
        &services.global,
        services.restore.kind().clone(),
        Arc::new(CopyRows { rows: 4 }),
    );

    let invoked = services
        .global
        .events()
        .emit("restore:triggered", OperationTriggered::new("b4").by_user("u1"))
        .await;
    assert_eq!(invoked, 1);

    let record = wait_for_terminal(&services.restore).await.unwrap();
    assert_eq!(record.phase, OperationPhase::Completed);
    assert_eq!(record.user_id.as_deref(), Some("u1"));
    // started + 4 progress + completed
    assert_eq!(record.action_history.len(), 6);
    assert_eq!(
        services.global.db().get("restore:route").unwrap().as_deref(),
        Some(&b"operation/restore"[..])
    );
    assert!(services.global.db().get("row:b4:4").unwrap().is_some());
}

#[tokio::test]
async fn failing_worker_records_failure() {
    let services = fresh_services();
    launch_on_trigger(
        &services.global,
        services.restore.kind().clone(),
        Arc::new(BrokenArchive),
    );
    services
        .global
        .events()
        .emit("restore:triggered", OperationTriggered::new("b5"))
        .await;

    let record = wait_for_terminal(&services.restore).await.unwrap();
    assert_eq!(record.phase, OperationPhase::Failed);
    assert!(record.error.unwrap().contains("archive checksum mismatch"));
    assert!(record.failed_at.is_some());
    assert_eq!(record.percentage, 25);
}

struct CountRuns {
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl OperationWorker for CountRuns {
    async fn run(
        &self,
        _trigger: OperationTriggered,
        reporter: &OperationReporter,
    ) -> Result<(), TallyError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        reporter.progress("copying", 1, 1).await;
        Ok(())
    }
}

#[tokio::test]
async fn relaunching_worker_replaces_previous_listener() {
    let services = fresh_services();
    let runs = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        launch_on_trigger(
            &services.global,
            services.restore.kind().clone(),
            Arc::new(CountRuns {
                runs: Arc::clone(&runs),
            }),
        );
    }
    assert_eq!(services.global.events().listener_count("restore:triggered"), 1);

    let invoked = services
        .global
        .events()
        .emit("restore:triggered", OperationTriggered::new("b6"))
        .await;
    assert_eq!(invoked, 1);

    let record = wait_for_terminal(&services.restore).await.unwrap();
    assert_eq!(record.phase, OperationPhase::Completed);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}
