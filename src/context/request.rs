//! Per-request data bound alongside the global context.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a process-unique request id.
pub fn new_request_id() -> String {
    let ts = Utc::now().timestamp_millis();
    let pid = std::process::id();
    let seq = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("req-{ts}-{pid}-{seq}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
    Options,
    Trace,
    Post,
    Put,
    Patch,
    Delete,
    Other(String),
}

impl HttpMethod {
    /// Safe methods only read; everything else may write.
    pub fn is_safe(&self) -> bool {
        matches!(
            self,
            HttpMethod::Get | HttpMethod::Head | HttpMethod::Options | HttpMethod::Trace
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Trace => "TRACE",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Other(method) => method.as_str(),
        }
    }
}

impl From<&str> for HttpMethod {
    fn from(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "GET" => HttpMethod::Get,
            "HEAD" => HttpMethod::Head,
            "OPTIONS" => HttpMethod::Options,
            "TRACE" => HttpMethod::Trace,
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            "PATCH" => HttpMethod::Patch,
            "DELETE" => HttpMethod::Delete,
            other => HttpMethod::Other(other.to_string()),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: String,
    pub username: String,
    pub is_admin: bool,
}

impl UserIdentity {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            is_admin: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Immutable per-request metadata. Shared behind an `Arc` for the lifetime of
/// one bound call chain.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub start_time: DateTime<Utc>,
    pub route_id: String,
    pub url: String,
    pub method: HttpMethod,
    pub user: Option<UserIdentity>,
    pub session: Option<SessionInfo>,
    pub ip: String,
    pub user_agent: String,
}

impl RequestContext {
    pub fn new(route_id: impl Into<String>, url: impl Into<String>, method: HttpMethod) -> Self {
        Self {
            request_id: new_request_id(),
            start_time: Utc::now(),
            route_id: route_id.into(),
            url: url.into(),
            method,
            user: None,
            session: None,
            ip: String::new(),
            user_agent: String::new(),
        }
    }

    pub fn with_user(mut self, user: UserIdentity) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_session(mut self, session: SessionInfo) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_client(mut self, ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        self.ip = ip.into();
        self.user_agent = user_agent.into();
        self
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    /// Path component of `url`, without scheme, host or query.
    pub fn path(&self) -> &str {
        let without_scheme = match self.url.find("://") {
            Some(idx) => {
                let rest = &self.url[idx + 3..];
                rest.find('/').map(|slash| &rest[slash..]).unwrap_or("/")
            }
            None => self.url.as_str(),
        };
        let end = without_scheme
            .find(|c| c == '?' || c == '#')
            .unwrap_or(without_scheme.len());
        &without_scheme[..end]
    }
}
