use std::time::Instant;

use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Diagnostics go to stderr; stdout carries the host protocol.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

pub fn log_request_summary(
    method: &str,
    params: &serde_json::Value,
    failed: bool,
    started_at: Instant,
) {
    let elapsed_ms = started_at.elapsed().as_millis();

    info!(
        method = %method,
        params = %params,
        outcome = if failed { "failure" } else { "success" },
        duration_ms = elapsed_ms,
        "request summary"
    );

    if failed && method == "tools/call" {
        warn!(method = %method, "tool call failed");
    }
}
