//! Interval scheduler for recurring jobs.
//!
//! Each job gets its own task. Every tick runs the job body inside a
//! standalone context (`cron/<name>`), so job code reads the database, event
//! bus and logger exactly like request code does. A failing tick is logged
//! and the next tick proceeds.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::context::{run_standalone_with, GlobalContext, RequestMeta};
use crate::error::TallyError;

type JobBody = Arc<dyn Fn() -> BoxFuture<'static, Result<(), TallyError>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSchedule {
    /// First run one period after start
    Interval(Duration),
    /// First run immediately, then every period
    IntervalWithStartup(Duration),
}

impl JobSchedule {
    pub fn period(&self) -> Duration {
        match self {
            JobSchedule::Interval(period) | JobSchedule::IntervalWithStartup(period) => *period,
        }
    }

    fn first_delay(&self) -> Duration {
        match self {
            JobSchedule::Interval(period) => *period,
            JobSchedule::IntervalWithStartup(_) => Duration::ZERO,
        }
    }
}

#[derive(Clone)]
pub struct CronJob {
    name: String,
    schedule: JobSchedule,
    body: JobBody,
}

impl CronJob {
    pub fn new<F, Fut>(name: impl Into<String>, schedule: JobSchedule, body: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TallyError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            schedule,
            body: Arc::new(move || body().boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schedule(&self) -> JobSchedule {
        self.schedule
    }
}

impl std::fmt::Debug for CronJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronJob")
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .finish()
    }
}

/// Run one firing of `job` in its standalone context.
pub async fn run_cron_job_once(global: &Arc<GlobalContext>, job: &CronJob) -> Result<(), TallyError> {
    let body = Arc::clone(&job.body);
    let started = Instant::now();
    debug!(job = %job.name, "cron job starting");
    let result = run_standalone_with(Arc::clone(global), RequestMeta::cron(&job.name), move || body()).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &result {
        Ok(()) => debug!(job = %job.name, elapsed_ms, "cron job finished"),
        Err(err) => error!(job = %job.name, elapsed_ms, error = %err, "cron job failed"),
    }
    result
}

pub struct CronScheduler;

impl CronScheduler {
    /// Spawn one task per job. Jobs with a zero period are skipped.
    pub fn start(global: Arc<GlobalContext>, jobs: Vec<CronJob>) -> CronHandle {
        let mut tasks = Vec::with_capacity(jobs.len());
        for job in jobs {
            let period = job.schedule.period();
            if period.is_zero() {
                warn!(job = %job.name, "cron job has a zero period; not scheduled");
                continue;
            }
            info!(job = %job.name, period_ms = period.as_millis() as u64, "scheduling cron job");
            let name = job.name.clone();
            let global = Arc::clone(&global);
            let handle = tokio::spawn(async move {
                let start = tokio::time::Instant::now() + job.schedule.first_delay();
                let mut ticker = tokio::time::interval_at(start, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    // Errors are logged inside; the next tick still runs.
                    let _ = run_cron_job_once(&global, &job).await;
                }
            });
            tasks.push((name, handle));
        }
        CronHandle { tasks }
    }
}

pub struct CronHandle {
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl CronHandle {
    pub fn job_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Abort every job task. A tick in progress is cancelled at its next await.
    pub fn shutdown(self) {
        for (name, handle) in self.tasks {
            handle.abort();
            debug!(job = %name, "cron job stopped");
        }
    }
}
