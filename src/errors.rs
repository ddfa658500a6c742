use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("child process is not running")]
    NotRunning,
    #[error("child process exited")]
    ChildExited,
    #[error("child process killed")]
    ChildKilled,
    #[error("failed to launch child process: {0}")]
    Launch(#[source] std::io::Error),
    #[error("child stdin is closed")]
    StdinClosed,
    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("child returned error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("no response to {method} within {seconds}s")]
    Timeout { method: String, seconds: u64 },
    #[error("invalid params: {0}")]
    InvalidParams(String),
}

impl RelayError {
    /// Builds an error from the `error` member of a child's JSON-RPC response.
    pub fn from_rpc_error(error: &Value) -> Self {
        Self::Rpc {
            code: error.get("code").and_then(Value::as_i64).unwrap_or(-32603),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
            data: error.get("data").cloned(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }
}
