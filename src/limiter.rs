//! Trailing-edge debounce for expensive, idempotent refreshes.
//!
//! `update_last_request` moves the limiter to Pending and (re)sets the
//! deadline to `timeout` from now. When the deadline passes without another
//! signal the limiter returns to Idle and then runs its action once. A failing
//! action is logged; the limiter is Idle again either way.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::error::TallyError;

type Action = Arc<dyn Fn() -> BoxFuture<'static, Result<(), TallyError>> + Send + Sync>;

#[derive(Default)]
struct Pending {
    timer: Option<JoinHandle<()>>,
    deadline: Option<Instant>,
    // bumped on every reschedule/clear; a timer only fires for its own generation
    generation: u64,
}

#[derive(Clone)]
pub struct RateLimiter {
    name: Arc<str>,
    timeout: Duration,
    action: Action,
    pending: Arc<Mutex<Pending>>,
}

impl RateLimiter {
    pub fn new<F, Fut>(name: impl Into<String>, timeout: Duration, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TallyError>> + Send + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            timeout,
            action: Arc::new(move || action().boxed()),
            pending: Arc::new(Mutex::new(Pending::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Schedule the action `timeout` from now, replacing any pending firing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn update_last_request(&self) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(err) => {
                error!(limiter = %self.name, error = %err, "no tokio runtime; signal dropped");
                return;
            }
        };

        let mut pending = self.pending.lock();
        if let Some(timer) = pending.timer.take() {
            timer.abort();
        }
        pending.generation += 1;
        let generation = pending.generation;
        let deadline = Instant::now() + self.timeout;
        pending.deadline = Some(deadline);

        let limiter = self.clone();
        pending.timer = Some(handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            limiter.fire(generation).await;
        }));
    }

    /// Cancel a pending firing. Returns whether one was pending.
    pub fn clear_timeout(&self) -> bool {
        let mut pending = self.pending.lock();
        pending.generation += 1;
        pending.deadline = None;
        match pending.timer.take() {
            Some(timer) => {
                timer.abort();
                debug!(limiter = %self.name, "pending firing cleared");
                true
            }
            None => false,
        }
    }

    /// Whether a firing is scheduled.
    pub fn is_active(&self) -> bool {
        self.pending.lock().timer.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.lock().deadline
    }

    async fn fire(&self, generation: u64) {
        {
            let mut pending = self.pending.lock();
            if pending.generation != generation {
                return;
            }
            pending.timer = None;
            pending.deadline = None;
        }

        match (self.action)().await {
            Ok(()) => debug!(limiter = %self.name, "rate limited action ran"),
            Err(err) => warn!(
                limiter = %self.name,
                error = %err,
                "rate limited action failed; waiting for next signal"
            ),
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Named limiters shared through the global context.
#[derive(Clone, Default)]
pub struct RateLimiterRegistry {
    limiters: Arc<RwLock<HashMap<String, RateLimiter>>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the limiter's name. A replaced limiter has its pending
    /// firing cleared.
    pub fn register(&self, limiter: RateLimiter) -> Option<RateLimiter> {
        let replaced = self
            .limiters
            .write()
            .insert(limiter.name().to_string(), limiter);
        if let Some(old) = &replaced {
            old.clear_timeout();
        }
        replaced
    }

    pub fn get(&self, name: &str) -> Option<RateLimiter> {
        self.limiters.read().get(name).cloned()
    }

    /// Signal the named limiter. Returns false if no such limiter exists.
    pub fn trigger(&self, name: &str) -> bool {
        match self.get(name) {
            Some(limiter) => {
                limiter.update_last_request();
                true
            }
            None => {
                warn!(limiter = %name, "trigger for unknown rate limiter");
                false
            }
        }
    }

    /// Clear every pending firing (shutdown).
    pub fn clear_all(&self) -> usize {
        self.limiters
            .read()
            .values()
            .filter(|limiter| limiter.clear_timeout())
            .count()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.limiters.read().keys().cloned().collect();
        names.sort();
        names
    }
}
