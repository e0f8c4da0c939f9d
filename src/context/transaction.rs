//! Transactional execution of inbound requests.
//!
//! The HTTP layer hands each request to `handle_request`. Requests selected by
//! the policy (by default: anything that is not a safe read) resolve entirely
//! inside one transaction, so every write made anywhere below the handler is
//! committed or discarded as a unit. Safe reads are never wrapped.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{info, warn, Instrument};

use crate::config::TransactionTimingConfig;
use crate::context::ambient;
use crate::context::global::GlobalContext;
use crate::context::request::RequestContext;
use crate::error::TallyError;

/// Decides whether a request resolves inside a transaction.
pub trait TransactionPolicy: Send + Sync {
    fn wraps(&self, request: &RequestContext) -> bool;
}

/// Wrap every method that is not a safe read.
#[derive(Debug, Clone, Copy, Default)]
pub struct MutatingMethods;

impl TransactionPolicy for MutatingMethods {
    fn wraps(&self, request: &RequestContext) -> bool {
        !request.method.is_safe()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NeverWrap;

impl TransactionPolicy for NeverWrap {
    fn wraps(&self, _request: &RequestContext) -> bool {
        false
    }
}

impl<F> TransactionPolicy for F
where
    F: Fn(&RequestContext) -> bool + Send + Sync,
{
    fn wraps(&self, request: &RequestContext) -> bool {
        self(request)
    }
}

/// Bind `request` and resolve `handler`, inside a transaction when `policy` asks.
pub async fn handle_request<P, F, Fut, T, E>(
    global: Arc<GlobalContext>,
    request: RequestContext,
    policy: &P,
    handler: F,
) -> Result<T, E>
where
    P: TransactionPolicy + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<TallyError>,
{
    let settings = &global.config().transactions;
    let wrap = settings.wrap_mutations && policy.wraps(&request);
    let timing = settings.timing.clone();
    let request = Arc::new(request);

    ambient::run(global, Arc::clone(&request), async move {
        if !wrap {
            return handler().await;
        }
        if !timing.enabled {
            return ambient::run_transaction(handler).await;
        }
        timed_transaction(&request, &timing, handler).await
    })
    .await
}

async fn timed_transaction<F, Fut, T, E>(
    request: &RequestContext,
    timing: &TransactionTimingConfig,
    handler: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<TallyError>,
{
    let span = ambient::logger("transaction").map_err(|e| E::from(TallyError::from(e)))?;

    async move {
        if let Some(waited_ms) = budget_overrun(request.start_time, Utc::now(), timing.budget_ms) {
            warn!(
                method = %request.method,
                waited_ms,
                budget_ms = timing.budget_ms,
                "request waited past budget before its transaction opened"
            );
        }
        info!(method = %request.method, "transaction started");
        let started = Instant::now();
        let result = ambient::run_transaction(handler).await;
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            committed = result.is_ok(),
            "transaction finished"
        );
        result
    }
    .instrument(span)
    .await
}

/// Milliseconds spent before the transaction opened, if they exceed `budget_ms`.
pub fn budget_overrun(
    request_start: DateTime<Utc>,
    now: DateTime<Utc>,
    budget_ms: u64,
) -> Option<u64> {
    let waited_ms = (now - request_start).num_milliseconds().max(0) as u64;
    (waited_ms > budget_ms).then_some(waited_ms)
}
