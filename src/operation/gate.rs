//! Redirects signed-in users to the progress page while an operation runs.
//!
//! Advisory only: the HTTP layer decides what to do with the decision.

use std::sync::Arc;

use tracing::debug;

use crate::context::{ambient, RequestContext};
use crate::error::ContextError;
use crate::operation::tracker::OperationTracker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    Redirect(String),
}

#[derive(Debug, Clone)]
pub struct OperationGate {
    tracker: Arc<OperationTracker>,
    exempt_prefixes: Vec<String>,
}

impl OperationGate {
    pub fn new(tracker: Arc<OperationTracker>, exempt_prefixes: Vec<String>) -> Self {
        Self {
            tracker,
            exempt_prefixes,
        }
    }

    pub fn tracker(&self) -> &Arc<OperationTracker> {
        &self.tracker
    }

    pub fn check(&self, request: &RequestContext) -> GateDecision {
        if request.user.is_none() {
            return GateDecision::Proceed;
        }
        let route = self.tracker.kind().progress_route.as_str();
        let path = request.path();
        if is_under(path, route) || self.is_exempt(path) {
            return GateDecision::Proceed;
        }
        // Path checks first; this is the only one that reads the store.
        if !self.tracker.is_active() {
            return GateDecision::Proceed;
        }
        debug!(
            request_id = %request.request_id,
            path,
            redirect = route,
            "operation in progress; redirecting"
        );
        GateDecision::Redirect(route.to_string())
    }

    /// `check` against the request bound to the current chain.
    pub fn check_current(&self) -> Result<GateDecision, ContextError> {
        let request = ambient::request()?;
        Ok(self.check(&request))
    }

    fn is_exempt(&self, path: &str) -> bool {
        self.exempt_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

/// `path` is `route` itself or one of its sub-paths.
fn is_under(path: &str, route: &str) -> bool {
    match path.strip_prefix(route) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
