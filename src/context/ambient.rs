//! Ambient context propagation.
//!
//! Two task-local slots travel with the current task across every `.await`:
//! the base binding (global + request) and an optional transaction override.
//! The override replaces only the database handle; logger, user and session
//! still come from the base binding. Task-locals do not cross `tokio::spawn`,
//! so a sibling task never observes another chain's binding or transaction.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, Span};

use crate::config::TallyConfig;
use crate::context::global::GlobalContext;
use crate::context::request::RequestContext;
use crate::db::{DbHandle, TransactionDb};
use crate::error::{ContextError, TallyError};
use crate::events::EventBus;

#[derive(Clone)]
struct Binding {
    global: Arc<GlobalContext>,
    request: Arc<RequestContext>,
}

tokio::task_local! {
    static BINDING: Binding;
    static TRANSACTION: Option<TransactionDb>;
}

/// Run `fut` with `(global, request)` bound for its whole extent.
///
/// A nested `run` starts a fresh chain: it shadows the outer binding and does
/// not inherit an outer transaction.
pub async fn run<F>(global: Arc<GlobalContext>, request: Arc<RequestContext>, fut: F) -> F::Output
where
    F: Future,
{
    BINDING
        .scope(Binding { global, request }, TRANSACTION.scope(None, fut))
        .await
}

/// Run `callback` inside a database transaction layered onto the current chain.
///
/// Commits when the callback returns `Ok`; rolls back and returns the
/// callback's error otherwise. If the chain is already inside a transaction
/// the callback joins it instead of opening a second one.
pub async fn run_transaction<F, Fut, T, E>(callback: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<TallyError>,
{
    let global = binding("run_transaction")
        .map(|b| b.global)
        .map_err(|e| E::from(TallyError::from(e)))?;

    if let Some(existing) = current_transaction() {
        debug!(transaction_id = existing.id(), "joining ambient transaction");
        return callback().await;
    }

    let tx = global.db().begin();
    let transaction_id = tx.id();
    let result = TRANSACTION
        .scope(Some(tx.clone()), async move { callback().await })
        .await;

    match result {
        Ok(value) => {
            tx.commit().map_err(|e| E::from(TallyError::Storage(e)))?;
            Ok(value)
        }
        Err(err) => {
            let dropped = tx.rollback();
            debug!(transaction_id, dropped, "transaction callback failed; rolled back");
            Err(err)
        }
    }
}

pub fn global() -> Result<Arc<GlobalContext>, ContextError> {
    binding("global").map(|b| b.global)
}

pub fn request() -> Result<Arc<RequestContext>, ContextError> {
    binding("request").map(|b| b.request)
}

/// Request for logging helpers that run both inside and outside a chain.
pub fn try_request() -> Option<Arc<RequestContext>> {
    BINDING.try_with(|b| Arc::clone(&b.request)).ok()
}

/// The transaction handle if one is layered on this chain, else the pooled one.
pub fn db() -> Result<DbHandle, ContextError> {
    let global = binding("db")?.global;
    match current_transaction() {
        Some(tx) => Ok(DbHandle::Transaction(tx)),
        None => Ok(DbHandle::Pooled(global.db().clone())),
    }
}

pub fn events() -> Result<EventBus, ContextError> {
    binding("events").map(|b| b.global.events().clone())
}

pub fn config() -> Result<Arc<TallyConfig>, ContextError> {
    binding("config").map(|b| Arc::clone(b.global.config()))
}

/// Span for `component` tagged with this chain's request identity.
pub fn logger(component: &'static str) -> Result<Span, ContextError> {
    binding("logger").map(|b| b.global.loggers().component(component))
}

pub fn in_transaction() -> bool {
    current_transaction().is_some()
}

fn binding(accessor: &'static str) -> Result<Binding, ContextError> {
    BINDING
        .try_with(Binding::clone)
        .map_err(|_| ContextError::Missing { accessor })
}

fn current_transaction() -> Option<TransactionDb> {
    TRANSACTION.try_with(|tx| tx.clone()).ok().flatten()
}
