//! Process-wide registration. The only test in this binary that registers
//! the global context.

use tally::config::TallyConfig;
use tally::context::{ambient, run_standalone, RequestMeta};
use tally::db::Database;
use tally::error::TallyError;
use tally::operation::{KeyValueStore, OperationStarted, SledKeyValueStore};
use tally::Bootstrap;
use tempfile::TempDir;

#[tokio::test]
async fn start_registers_once_and_cleans_up_once() {
    let dir = TempDir::new().unwrap();
    let mut config = TallyConfig::default();
    config.database.path = dir.path().join("db");

    let db = Database::open(&config.database.path).unwrap();
    SledKeyValueStore::new(db.sled())
        .unwrap()
        .set(
            "restore-progress",
            r#"{"operation_id":"stale","phase":"starting","current":0,"total":0,"percentage":0,"started_at":"2024-01-01T00:00:00Z","updated_at":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();

    let before: Result<(), TallyError> =
        run_standalone(RequestMeta::new(), || async { Ok(()) }).await;
    assert!(before.unwrap_err().to_string().contains("not been initialized"));

    let first = Bootstrap::new(config.clone())
        .with_logging(false)
        .with_database(db)
        .start()
        .unwrap();
    assert!(first.restore.current().is_none());

    first
        .global
        .events()
        .emit("restore:started", OperationStarted::new("b1"))
        .await;

    // Second start attaches to the registered global and skips cleanup.
    let second = Bootstrap::new(config).with_logging(false).start().unwrap();
    assert_eq!(second.global.context_id(), first.global.context_id());
    assert!(second.restore.is_active());
    assert_eq!(first.global.events().listener_count("restore:started"), 1);

    let seen = run_standalone(RequestMeta::cron("audit"), || async {
        let global = ambient::global()?;
        let request = ambient::request()?;
        Ok::<_, TallyError>((global.context_id().to_string(), request.route_id.clone()))
    })
    .await
    .unwrap();
    assert_eq!(seen.0, first.global.context_id());
    assert_eq!(seen.1, "cron/audit");
}
