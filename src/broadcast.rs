use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::mcp::rpc::json_rpc_notification;

pub const LIST_CHANGED_NOTIFICATIONS: [&str; 3] = [
    "notifications/tools/list_changed",
    "notifications/resources/list_changed",
    "notifications/prompts/list_changed",
];

/// Tells the host that the capability lists may have changed after a restart.
#[derive(Debug, Clone)]
pub struct ChangeBroadcaster {
    outbound: mpsc::UnboundedSender<Value>,
}

impl ChangeBroadcaster {
    pub fn new(outbound: mpsc::UnboundedSender<Value>) -> Self {
        Self { outbound }
    }

    /// Fire-and-forget; a closed host channel means the relay is going down.
    pub fn broadcast_list_changed(&self) {
        for method in LIST_CHANGED_NOTIFICATIONS {
            if self
                .outbound
                .send(json_rpc_notification(method, None))
                .is_err()
            {
                debug!(method, "host channel closed; notification dropped");
            }
        }
    }
}
