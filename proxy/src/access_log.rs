//! Per-request access log.
//!
//! Every step of a request's lifecycle is emitted as one structured event on
//! the `access_log` tracing target, so it can be routed to its own sink with
//! an `EnvFilter` directive such as `access_log=info`.

use std::net::IpAddr;

use uuid::Uuid;

/// Lifecycle step being logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessEvent {
    /// Authentication failed.
    Rejected,
    /// The request body could not be parsed.
    RequestError,
    /// Scheduling failed (no backend, timeout).
    ScheduleError,
    /// A backend was reserved and the request is being forwarded.
    GenRequest,
    /// Forwarding failed.
    GenError,
    /// The request finished and its slot was released.
    GenDone,
    /// An unscheduled request was forwarded.
    ProxyRequest,
}

impl AccessEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::RequestError => "request_error",
            Self::ScheduleError => "schedule_error",
            Self::GenRequest => "gen_request",
            Self::GenError => "gen_error",
            Self::GenDone => "gen_done",
            Self::ProxyRequest => "proxy_request",
        }
    }
}

impl std::fmt::Display for AccessEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Access log context of one request.
#[derive(Debug, Clone)]
pub struct AccessLog {
    pub request_id: Uuid,
    pub client_ip: Option<IpAddr>,
    pub user: String,
    authorized: bool,
}

impl AccessLog {
    pub fn new(client_ip: Option<IpAddr>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            client_ip,
            user: "unknown".to_string(),
            authorized: false,
        }
    }

    /// Mark the request as authenticated for `user`.
    pub fn authorize(&mut self, user: &str) {
        self.user = user.to_string();
        self.authorized = true;
    }

    /// Emit one access log entry.
    ///
    /// `queued` is the backend's queue length, or -1 without a backend.
    pub fn log(&self, event: AccessEvent, server: Option<&str>, queued: i64, error: Option<&str>) {
        tracing::info!(
            target: "access_log",
            request_id = %self.request_id,
            event = %event,
            user = %self.user,
            ip = %self.client_ip.map(|ip| ip.to_string()).unwrap_or_default(),
            access = if self.authorized { "Authorized" } else { "Denied" },
            server = server.unwrap_or("None"),
            queued,
            error = error.unwrap_or(""),
            "access"
        );
    }
}
