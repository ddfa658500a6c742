//! Request/response correlation for calls sent to the child
//!
//! Ids come from one counter that lives as long as the relay, so an id is never
//! reused across incarnations. Each incarnation owns its own `PendingCalls`,
//! which is failed wholesale when that incarnation goes away.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::errors::RelayError;

pub type CallOutcome = Result<Value, RelayError>;

#[derive(Debug)]
pub struct RequestIds {
    next: AtomicU64,
}

impl RequestIds {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
struct ChildRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

#[derive(Debug, Serialize)]
struct ChildNotification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

/// Serializes a request as one newline-terminated line.
pub fn encode_request(id: u64, method: &str, params: Option<&Value>) -> Result<String, RelayError> {
    let mut line = serde_json::to_string(&ChildRequest {
        jsonrpc: "2.0",
        id,
        method,
        params,
    })?;
    line.push('\n');
    Ok(line)
}

pub fn encode_notification(method: &str, params: Option<&Value>) -> Result<String, RelayError> {
    let mut line = serde_json::to_string(&ChildNotification {
        jsonrpc: "2.0",
        method,
        params,
    })?;
    line.push('\n');
    Ok(line)
}

#[derive(Debug, Default)]
pub struct PendingCalls {
    calls: HashMap<u64, oneshot::Sender<CallOutcome>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: u64) -> oneshot::Receiver<CallOutcome> {
        let (sender, receiver) = oneshot::channel();
        if self.calls.insert(id, sender).is_some() {
            warn!(id, "request id registered twice; earlier call dropped");
        }
        receiver
    }

    pub fn remove(&mut self, id: u64) -> bool {
        self.calls.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Completes the pending call a child response belongs to. Messages that
    /// are not responses to a known id are logged and dropped.
    pub fn on_child_message(&mut self, message: Value) {
        if message.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            warn!(message = %message, "dropping child message without jsonrpc 2.0 marker");
            return;
        }

        // Requests from the child carry their own id space and can collide
        // with ours; only messages without a method are responses.
        if let Some(method) = message.get("method").and_then(Value::as_str) {
            match message.get("id") {
                Some(id) => warn!(method, id = %id, "dropping unhandled child request"),
                None => debug!(method, "dropping child notification"),
            }
            return;
        }

        let Some(id) = message.get("id").and_then(Value::as_u64) else {
            warn!(message = %message, "dropping child message without id");
            return;
        };

        let Some(sender) = self.calls.remove(&id) else {
            warn!(id, "dropping child response with unknown id");
            return;
        };

        let outcome = match message.get("error") {
            Some(error) => Err(RelayError::from_rpc_error(error)),
            None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
        };

        // The caller may have given up (timeout); nothing left to notify.
        let _ = sender.send(outcome);
    }

    /// Fails every outstanding call and leaves the table empty.
    pub fn fail_all(&mut self, reason: impl Fn() -> RelayError) {
        let count = self.calls.len();
        for (_, sender) in self.calls.drain() {
            let _ = sender.send(Err(reason()));
        }
        if count > 0 {
            debug!(count, "failed outstanding child calls");
        }
    }
}
