//! Error types for warehouse-client.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// HTTP statuses that indicate a transient backend condition.
pub const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Structured error reasons (snake_case) that indicate a transient condition.
pub const RETRYABLE_REASONS: [&str; 7] = [
    "backend_error",
    "internal_error",
    "job_rate_limit_exceeded",
    "rate_limit_exceeded",
    "resources_exhausted",
    "resource_exhausted",
    "timeout",
];

/// Reasons that mean the caller is being throttled.
pub const RATE_LIMIT_REASONS: [&str; 2] = ["rate_limit_exceeded", "job_rate_limit_exceeded"];

/// Socket-level failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    Timeout,
    ConnectionRefused,
    ConnectionReset,
    ConnectionAborted,
    BrokenPipe,
    UnexpectedEof,
    Dns,
    /// Anything not known to be transient (TLS, malformed URL, ...).
    Other,
}

impl NetworkErrorKind {
    pub fn is_transient(self) -> bool {
        !matches!(self, NetworkErrorKind::Other)
    }
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetworkErrorKind::Timeout => "timeout",
            NetworkErrorKind::ConnectionRefused => "connection refused",
            NetworkErrorKind::ConnectionReset => "connection reset",
            NetworkErrorKind::ConnectionAborted => "connection aborted",
            NetworkErrorKind::BrokenPipe => "broken pipe",
            NetworkErrorKind::UnexpectedEof => "unexpected eof",
            NetworkErrorKind::Dns => "dns",
            NetworkErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Errors that can occur when talking to the warehouse.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// The request never produced an HTTP response.
    #[error("network error ({kind}): {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
    },

    /// The service answered with a non-success status.
    #[error("service error {status}{}: {message}", reason_suffix(.reason))]
    Service {
        status: u16,
        reason: Option<String>,
        message: String,
    },

    /// Refused locally because a rate-limit cooldown is active.
    #[error("rate limited ({reason}), cooling down for another {remaining:?}")]
    RateLimited { remaining: Duration, reason: String },

    /// The streaming insert endpoint rejected rows.
    #[error("insert rejected {count} row(s): {message}")]
    InsertRejected { count: usize, message: String },

    /// Token acquisition failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The response body did not have the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl WarehouseError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            WarehouseError::Network { kind, .. } => kind.is_transient(),
            WarehouseError::Service { status, reason, .. } => {
                RETRYABLE_STATUSES.contains(status)
                    || reason
                        .as_deref()
                        .is_some_and(|r| RETRYABLE_REASONS.contains(&r))
            }
            WarehouseError::RateLimited { .. } => true,
            _ => false,
        }
    }

    /// Whether this response should start a cooldown window.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            WarehouseError::Service { status, reason, .. } => {
                *status == 429
                    || reason
                        .as_deref()
                        .is_some_and(|r| RATE_LIMIT_REASONS.contains(&r))
            }
            WarehouseError::RateLimited { .. } => true,
            _ => false,
        }
    }

    /// The service's error message, if this is a service error.
    pub fn service_message(&self) -> Option<&str> {
        match self {
            WarehouseError::Service { message, .. } => Some(message),
            _ => None,
        }
    }
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|r| format!(" ({r})"))
        .unwrap_or_default()
}

/// Normalize `rateLimitExceeded` / `RESOURCE_EXHAUSTED` / `backend-error`
/// to snake_case.
pub fn normalize_reason(reason: &str) -> String {
    let mut out = String::with_capacity(reason.len() + 4);
    let mut prev_lower = false;
    for ch in reason.trim().chars() {
        if ch == '-' || ch == ' ' {
            out.push('_');
            prev_lower = false;
        } else if ch.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

impl From<reqwest::Error> for WarehouseError {
    fn from(err: reqwest::Error) -> Self {
        let kind = network_kind(&err);
        WarehouseError::Network {
            kind,
            message: err.to_string(),
        }
    }
}

fn network_kind(err: &reqwest::Error) -> NetworkErrorKind {
    if err.is_timeout() {
        return NetworkErrorKind::Timeout;
    }

    // Walk the source chain looking for the socket error.
    let mut source: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            use std::io::ErrorKind;
            return match io.kind() {
                ErrorKind::TimedOut => NetworkErrorKind::Timeout,
                ErrorKind::ConnectionRefused => NetworkErrorKind::ConnectionRefused,
                ErrorKind::ConnectionReset => NetworkErrorKind::ConnectionReset,
                ErrorKind::ConnectionAborted => NetworkErrorKind::ConnectionAborted,
                ErrorKind::BrokenPipe => NetworkErrorKind::BrokenPipe,
                ErrorKind::UnexpectedEof => NetworkErrorKind::UnexpectedEof,
                _ => NetworkErrorKind::Other,
            };
        }
        let text = cause.to_string().to_lowercase();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return NetworkErrorKind::Dns;
        }
        source = cause.source();
    }

    if err.is_connect() {
        NetworkErrorKind::ConnectionRefused
    } else if err.is_request() || err.is_body() {
        NetworkErrorKind::ConnectionReset
    } else {
        NetworkErrorKind::Other
    }
}
