//! Scripted transport for tests.
//!
//! Replies are served from a FIFO queue; when the queue is empty an optional
//! handler computes the reply from the request. Every request is recorded.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{NetworkErrorKind, WarehouseError};
use crate::transport::{Transport, TransportResponse};

/// A canned transport outcome.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Response(TransportResponse),
    Network(NetworkErrorKind),
}

impl ScriptedReply {
    /// 200 with a JSON body.
    pub fn ok(body: Value) -> Self {
        Self::status(200, &body.to_string())
    }

    pub fn status(status: u16, body: &str) -> Self {
        ScriptedReply::Response(TransportResponse {
            status,
            body: body.to_string(),
        })
    }

    /// 400 shaped like an `invalidQuery` job failure.
    pub fn invalid_query(message: &str) -> Self {
        let body = serde_json::json!({
            "error": {
                "code": 400,
                "message": message,
                "errors": [{"reason": "invalidQuery", "message": message}],
                "status": "INVALID_ARGUMENT"
            }
        });
        Self::status(400, &body.to_string())
    }

    pub fn network(kind: NetworkErrorKind) -> Self {
        ScriptedReply::Network(kind)
    }
}

/// A request seen by the transport.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub body: Value,
}

impl RecordedRequest {
    /// The SQL text, for query requests.
    pub fn query(&self) -> Option<&str> {
        self.body.get("query").and_then(Value::as_str)
    }

    /// The `operation` job label, for query requests.
    pub fn operation(&self) -> Option<&str> {
        self.body
            .get("labels")
            .and_then(|l| l.get("operation"))
            .and_then(Value::as_str)
    }
}

type Handler = Box<dyn Fn(&str, &Value) -> ScriptedReply + Send + Sync>;

/// Transport that replays scripted replies.
#[derive(Default)]
pub struct ScriptedTransport {
    queue: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<RecordedRequest>>,
    handler: Option<Handler>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute replies from requests once the queue is drained.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&str, &Value) -> ScriptedReply + Send + Sync + 'static,
    {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::default()
        }
    }

    pub fn push(&self, reply: ScriptedReply) {
        self.queue
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(reply);
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post_json(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<TransportResponse, WarehouseError> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(RecordedRequest {
                path: path.to_string(),
                body: body.clone(),
            });

        let queued = self
            .queue
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        let reply = match (queued, &self.handler) {
            (Some(reply), _) => reply,
            (None, Some(handler)) => handler(path, body),
            (None, None) => {
                return Err(WarehouseError::Network {
                    kind: NetworkErrorKind::Other,
                    message: "no scripted reply".to_string(),
                })
            }
        };

        match reply {
            ScriptedReply::Response(response) => Ok(response),
            ScriptedReply::Network(kind) => Err(WarehouseError::Network {
                kind,
                message: format!("scripted {}", kind),
            }),
        }
    }
}
