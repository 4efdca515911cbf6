//! Request execution with retry, backoff, and rate-limit cooldown.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::{RetryConfig, WarehouseConfig};
use crate::cooldown::CooldownGate;
use crate::error::{normalize_reason, WarehouseError};
use crate::transport::{Transport, TransportResponse};

/// Error envelope returned by the REST API.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Issues API calls, retrying transient failures and honoring cooldowns.
///
/// Rate-limit responses start a cooldown window on this executor. While the
/// window is open every call fails fast with [`WarehouseError::RateLimited`]
/// and the transport is not touched.
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    retry: RetryConfig,
    cooldown: Duration,
    gate: CooldownGate,
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn Transport>, config: &WarehouseConfig) -> Self {
        Self {
            transport,
            retry: config.retry.clone(),
            cooldown: config.rate_limit_cooldown,
            gate: CooldownGate::new(config.cooldown_log_interval),
        }
    }

    /// POST `body` to `path` and return the decoded JSON response.
    pub async fn execute(&self, path: &str, body: &Value) -> Result<Value, WarehouseError> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.gate.check()?;

            let err = match self.send_once(path, body).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded after {} attempts", path, attempt);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if err.is_rate_limit() {
                let reason = match &err {
                    WarehouseError::Service {
                        reason: Some(reason),
                        ..
                    } => reason.clone(),
                    _ => "rate_limit_exceeded".to_string(),
                };
                warn!(
                    "Warehouse rate limit hit on {} ({}), cooling down for {:?}",
                    path, reason, self.cooldown
                );
                self.gate.trip(self.cooldown, reason);
                return Err(err);
            }

            if !err.is_retryable() {
                debug!("{} failed with non-retryable error: {}", path, err);
                return Err(err);
            }

            if !self.retry.should_retry(attempt) {
                error!("{} failed after {} attempts: {}", path, attempt, err);
                return Err(err);
            }

            let delay = self.retry.delay_for_attempt(attempt);
            warn!(
                "{} failed (attempt {}/{}): {}, retrying in {:?}",
                path, attempt, self.retry.max_attempts, err, delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Remaining cooldown, if a rate-limit window is open.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        self.gate.remaining()
    }

    async fn send_once(&self, path: &str, body: &Value) -> Result<Value, WarehouseError> {
        let response = self.transport.post_json(path, body).await?;
        decode_response(response)
    }
}

fn decode_response(response: TransportResponse) -> Result<Value, WarehouseError> {
    if response.is_success() {
        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        return Ok(serde_json::from_str(&response.body)?);
    }
    Err(classify_failure(response.status, &response.body))
}

/// Turn a non-success response into a classified service error.
pub(crate) fn classify_failure(status: u16, body: &str) -> WarehouseError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let detail = envelope.error.errors.first();
            let reason = detail
                .and_then(|d| d.reason.as_deref())
                .or(envelope.error.status.as_deref())
                .map(normalize_reason);
            let message = envelope
                .error
                .message
                .or_else(|| detail.and_then(|d| d.message.clone()))
                .unwrap_or_else(|| format!("HTTP {}", status));
            WarehouseError::Service {
                status,
                reason,
                message,
            }
        }
        Err(_) => WarehouseError::Service {
            status,
            reason: None,
            message: if body.trim().is_empty() {
                format!("HTTP {}", status)
            } else {
                body.trim().to_string()
            },
        },
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("retry", &self.retry)
            .field("cooldown", &self.cooldown)
            .field("cooldown_remaining", &self.cooldown_remaining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkErrorKind;
    use crate::testing::{ScriptedReply, ScriptedTransport};
    use serde_json::json;

    fn executor(transport: Arc<ScriptedTransport>) -> RequestExecutor {
        let config = WarehouseConfig::new("proj")
            .with_retry(RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
                jitter: Duration::ZERO,
            })
            .with_rate_limit_cooldown(Duration::from_secs(30));
        RequestExecutor::new(transport, &config)
    }

    fn error_body(reason: &str, message: &str) -> String {
        json!({
            "error": {
                "code": 403,
                "message": message,
                "errors": [{"reason": reason, "message": message}],
                "status": "PERMISSION_DENIED"
            }
        })
        .to_string()
    }

    #[test]
    fn test_classify_failure_reads_reason() {
        let err = classify_failure(403, &error_body("rateLimitExceeded", "Exceeded rate limits"));
        match err {
            WarehouseError::Service {
                status,
                reason,
                message,
            } => {
                assert_eq!(status, 403);
                assert_eq!(reason.as_deref(), Some("rate_limit_exceeded"));
                assert_eq!(message, "Exceeded rate limits");
            }
            other => panic!("unexpected {:?}", other),
        }

        let plain = classify_failure(502, "<html>bad gateway</html>");
        assert!(plain.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(ScriptedReply::status(503, ""));
        transport.push(ScriptedReply::network(NetworkErrorKind::ConnectionReset));
        transport.push(ScriptedReply::ok(json!({"ok": true})));

        let exec = executor(transport.clone());
        let value = exec.execute("/p", &json!({})).await.unwrap();
        assert_eq!(value, json!({"ok": true}));
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let transport = Arc::new(ScriptedTransport::new());
        for _ in 0..5 {
            transport.push(ScriptedReply::status(500, ""));
        }

        let exec = executor(transport.clone());
        let err = exec.execute("/p", &json!({})).await.unwrap_err();
        assert!(matches!(err, WarehouseError::Service { status: 500, .. }));
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(ScriptedReply::status(400, &error_body("invalidQuery", "Syntax error")));

        let exec = executor(transport.clone());
        let err = exec.execute("/p", &json!({})).await.unwrap_err();
        assert_eq!(err.service_message(), Some("Syntax error"));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_starts_cooldown() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(ScriptedReply::status(
            403,
            &error_body("rateLimitExceeded", "Exceeded rate limits"),
        ));
        transport.push(ScriptedReply::ok(json!({"after": "cooldown"})));

        let exec = executor(transport.clone());
        let err = exec.execute("/p", &json!({})).await.unwrap_err();
        assert!(err.is_rate_limit());
        assert_eq!(transport.request_count(), 1);

        // Inside the window: no network call.
        tokio::time::advance(Duration::from_secs(10)).await;
        let err = exec.execute("/p", &json!({})).await.unwrap_err();
        assert!(matches!(err, WarehouseError::RateLimited { .. }));
        assert!(err.is_retryable());
        assert_eq!(transport.request_count(), 1);

        // After the window: normal execution resumes.
        tokio::time::advance(Duration::from_secs(21)).await;
        let value = exec.execute("/p", &json!({})).await.unwrap();
        assert_eq!(value, json!({"after": "cooldown"}));
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_is_per_executor() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(ScriptedReply::status(429, ""));
        transport.push(ScriptedReply::ok(json!(1)));

        let first = executor(transport.clone());
        let second = executor(transport.clone());
        assert!(first.execute("/p", &json!({})).await.is_err());
        assert_eq!(second.execute("/p", &json!({})).await.unwrap(), json!(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_success_body_is_null() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(ScriptedReply::status(200, ""));
        let exec = executor(transport);
        assert_eq!(exec.execute("/p", &json!({})).await.unwrap(), Value::Null);
    }
}
