//! Cron jobs read ambient state through standalone contexts.

use std::time::Duration;

use tally::context::ambient;
use tally::cron::{run_cron_job_once, CronJob, CronScheduler, JobSchedule};
use tally::db::DbHandle;
use tally::error::TallyError;

use crate::integration::fresh_global;

async fn bump_rollup_counter() -> Result<(), TallyError> {
    let request = ambient::request()?;
    let db = ambient::db()?;
    let key = format!("{}:runs", request.route_id);
    let runs: u64 = db.get_json(&key)?.unwrap_or(0);
    db.put_json(&key, &(runs + 1))?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn scheduled_job_writes_through_ambient_db() {
    let global = fresh_global();
    let job = CronJob::new(
        "rollup",
        JobSchedule::IntervalWithStartup(Duration::from_secs(60)),
        bump_rollup_counter,
    );
    let handle = CronScheduler::start(global.clone(), vec![job]);

    tokio::time::sleep(Duration::from_secs(150)).await;
    handle.shutdown();

    let runs: Option<u64> = DbHandle::from(global.db().clone())
        .get_json("cron/rollup:runs")
        .unwrap();
    assert_eq!(runs, Some(3));
}

#[tokio::test]
async fn manual_run_returns_job_error() {
    let global = fresh_global();
    let job = CronJob::new(
        "reconcile",
        JobSchedule::Interval(Duration::from_secs(3600)),
        || async { Err(TallyError::Handler("bank feed offline".to_string())) },
    );
    let err = run_cron_job_once(&global, &job).await.unwrap_err();
    assert!(matches!(err, TallyError::Handler(_)));

    let ok = CronJob::new(
        "rollup",
        JobSchedule::Interval(Duration::from_secs(3600)),
        bump_rollup_counter,
    );
    run_cron_job_once(&global, &ok).await.unwrap();
    assert!(global.db().get("cron/rollup:runs").unwrap().is_some());
}
