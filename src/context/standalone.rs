//! Ambient context for work that no inbound request triggered.
//!
//! Cron ticks, event handlers and retry timers build a synthetic request from
//! whatever metadata they have, so business code reads the same ambient
//! context whether a request or a background trigger started it.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::context::ambient;
use crate::context::global::{self, GlobalContext};
use crate::context::request::{new_request_id, HttpMethod, RequestContext, SessionInfo, UserIdentity};
use crate::error::TallyError;

pub const DEFAULT_ROUTE_ID: &str = "standalone";
pub const DEFAULT_IP: &str = "127.0.0.1";

/// Request-shaped metadata where every field is optional.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub request_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub route_id: Option<String>,
    pub url: Option<String>,
    pub method: Option<HttpMethod>,
    pub user: Option<UserIdentity>,
    pub session: Option<SessionInfo>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(route_id: impl Into<String>) -> Self {
        Self {
            route_id: Some(route_id.into()),
            ..Self::default()
        }
    }

    /// Metadata for one firing of the named cron job (`cron/<name>`).
    pub fn cron(job_name: &str) -> Self {
        Self::route(format!("cron/{job_name}"))
    }

    pub fn with_user(mut self, user: UserIdentity) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Fill missing fields with synthetic defaults.
    pub fn into_request(self) -> RequestContext {
        let route_id = self.route_id.unwrap_or_else(|| DEFAULT_ROUTE_ID.to_string());
        RequestContext {
            request_id: self.request_id.unwrap_or_else(new_request_id),
            start_time: self.start_time.unwrap_or_else(Utc::now),
            url: self.url.unwrap_or_else(|| format!("internal://{route_id}")),
            route_id,
            method: self.method.unwrap_or(HttpMethod::Get),
            user: self.user,
            session: self.session,
            ip: self.ip.unwrap_or_else(|| DEFAULT_IP.to_string()),
            user_agent: self
                .user_agent
                .unwrap_or_else(|| format!("tally/{}", env!("CARGO_PKG_VERSION"))),
        }
    }
}

/// Run `callback` in a synthetic context over an explicit global.
///
/// The callback's output, error included, is returned unchanged: the caller
/// (usually a scheduler) owns logging and retry.
pub async fn run_standalone_with<F, Fut>(
    global: Arc<GlobalContext>,
    meta: RequestMeta,
    callback: F,
) -> Fut::Output
where
    F: FnOnce() -> Fut,
    Fut: Future,
{
    let request = Arc::new(meta.into_request());
    ambient::run(global, request, async move { callback().await }).await
}

/// Run `callback` in a synthetic context over the registered global.
pub async fn run_standalone<F, Fut, T, E>(meta: RequestMeta, callback: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<TallyError>,
{
    let global = global::registered().map_err(|e| E::from(TallyError::from(e)))?;
    run_standalone_with(global, meta, callback).await
}
