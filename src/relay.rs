//! The relay session
//!
//! One `Relay` exists per process. It owns the runtime values, the
//! args-updated flag and the supervisor, and decides for every inbound method
//! whether to answer locally, forward, or fall back.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::{
    broadcast::ChangeBroadcaster,
    config::Config,
    domain::update_tool::{acknowledgement, apply_arguments, UpdateTool},
    errors::RelayError,
    mcp::{methods::ForwardedMethod, server::LATEST_PROTOCOL_VERSION},
    placeholder,
    supervisor::{Incumbent, Supervisor},
};

pub struct Relay {
    supervisor: Supervisor,
    update_tool: UpdateTool,
    broadcaster: ChangeBroadcaster,
    values: Mutex<HashMap<String, String>>,
    args_updated: AtomicBool,
    client_init: Mutex<Option<Value>>,
}

impl Relay {
    /// `outbound` is the queue of messages written to the host.
    pub fn new(
        config: &Config,
        outbound: mpsc::UnboundedSender<Value>,
    ) -> Result<Self, RelayError> {
        let placeholders = placeholder::extract(&config.command_template);
        let update_tool = UpdateTool::new(config.update_tool_name.clone(), placeholders)?;

        info!(
            placeholders = ?update_tool.placeholders(),
            update_tool = %update_tool.name(),
            "relay configured"
        );

        Ok(Self {
            supervisor: Supervisor::new(config.command_template.clone(), config.call_timeout),
            update_tool,
            broadcaster: ChangeBroadcaster::new(outbound),
            values: Mutex::new(HashMap::new()),
            args_updated: AtomicBool::new(false),
            client_init: Mutex::new(None),
        })
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn update_tool(&self) -> &UpdateTool {
        &self.update_tool
    }

    pub fn args_updated(&self) -> bool {
        self.args_updated.load(Ordering::Acquire)
    }

    /// Keeps the host's `initialize` params for the child handshake.
    pub async fn remember_client_init(&self, params: Option<Value>) {
        *self.client_init.lock().await = params;
    }

    /// Applies new runtime values and restarts the child unconditionally.
    pub async fn update_args(
        &self,
        arguments: Option<&Map<String, Value>>,
    ) -> Result<Value, RelayError> {
        let updated = {
            let mut values = self.values.lock().await;
            let updated = apply_arguments(arguments, &mut values);
            // Still holding the values lock: concurrent updates restart in order.
            self.supervisor.spawn(&values).await;
            updated
        };

        self.args_updated.store(true, Ordering::Release);
        info!(updated = ?updated, "runtime arguments updated; child restarted");
        self.broadcaster.broadcast_list_changed();

        acknowledgement(&updated)
    }

    /// Forwards `method` to the child and applies the fallback policy.
    pub async fn forward(
        &self,
        method: ForwardedMethod,
        params: Option<&Value>,
    ) -> Result<Value, RelayError> {
        match self.forward_to_child(method.name(), params).await {
            Ok(result) if method == ForwardedMethod::ToolsList => {
                Ok(self.with_update_tool(result))
            }
            Ok(result) => Ok(result),
            Err(err) => match method.fallback() {
                Some(fallback) if !self.args_updated() => {
                    debug!(
                        method = method.name(),
                        error = %err,
                        "child unavailable before configuration; using fallback"
                    );
                    Ok(fallback.payload(self.update_tool.definition()))
                }
                _ => Err(err),
            },
        }
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }

    async fn forward_to_child(
        &self,
        method: &str,
        params: Option<&Value>,
    ) -> Result<Value, RelayError> {
        let incumbent = self.prepare_child().await?;
        self.call_child(incumbent.as_ref(), method, params).await
    }

    /// Starts the child if needed and makes sure it has been initialized.
    async fn prepare_child(&self) -> Result<Option<Incumbent>, RelayError> {
        let values = self.values.lock().await.clone();
        let Some(incumbent) = self.supervisor.ensure_running(&values).await else {
            return Ok(None);
        };
        self.handshake(&incumbent).await?;
        Ok(Some(incumbent))
    }

    /// A call bound to `incumbent` fails with `ChildKilled` if the child was
    /// replaced after its handshake.
    async fn call_child(
        &self,
        incumbent: Option<&Incumbent>,
        method: &str,
        params: Option<&Value>,
    ) -> Result<Value, RelayError> {
        match incumbent {
            Some(incumbent) => {
                self.supervisor
                    .call_on(incumbent.generation, method, params)
                    .await
            }
            // Surfaces the launch error, or NotRunning after shutdown.
            None => self.supervisor.call(method, params).await,
        }
    }

    /// Sends `initialize` and `notifications/initialized` once per incarnation.
    async fn handshake(&self, incumbent: &Incumbent) -> Result<(), RelayError> {
        incumbent
            .handshake
            .get_or_try_init(|| async {
                let params = self
                    .client_init
                    .lock()
                    .await
                    .clone()
                    .unwrap_or_else(default_initialize_params);

                self.supervisor
                    .call_on(incumbent.generation, "initialize", Some(&params))
                    .await?;
                self.supervisor
                    .notify_on(incumbent.generation, "notifications/initialized", None)
                    .await?;

                debug!(generation = incumbent.generation, "child initialized");
                Ok::<(), RelayError>(())
            })
            .await
            .map(|_| ())
    }

    fn with_update_tool(&self, mut result: Value) -> Value {
        let definition = self.update_tool.definition().clone();

        let Some(object) = result.as_object_mut() else {
            warn!("child tools/list result is not an object; reporting the update tool alone");
            return json!({ "tools": [definition] });
        };

        match object
            .entry("tools")
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            Value::Array(tools) => tools.push(definition),
            other => {
                warn!("child tools/list result has a non-array tools member; replacing it");
                *other = json!([definition]);
            }
        }
        result
    }
}

fn default_initialize_params() -> Value {
    json!({
        "protocolVersion": LATEST_PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;
    use tokio::sync::mpsc;

    use super::Relay;
    use crate::{
        config::Config,
        errors::RelayError,
        mcp::methods::ForwardedMethod,
        supervisor::tests::responder,
    };

    fn relay(template: &str) -> (Relay, mpsc::UnboundedReceiver<serde_json::Value>) {
        let config = Config::from_values(Some(template.to_string()), None, None)
            .expect("config should parse");
        let (outbound, queued) = mpsc::unbounded_channel();
        (Relay::new(&config, outbound).expect("relay builds"), queued)
    }

    #[tokio::test]
    async fn update_tool_schema_follows_template() {
        let (relay, _queued) = relay("run --user {{user}} --token {{ token }} {{user}}");
        assert_eq!(relay.update_tool().placeholders(), ["user", "token"]);
    }

    #[tokio::test]
    async fn n_updates_spawn_n_children() {
        let (relay, mut queued) = relay("cat > /dev/null # {{path}}");

        for round in 1..=3u64 {
            relay
                .update_args(json!({"path": format!("/tmp/{round}")}).as_object())
                .await
                .expect("update succeeds");
            assert_eq!(relay.supervisor().generation().await, round);
            assert!(relay.supervisor().is_running().await);
        }

        let mut notifications = 0;
        while queued.try_recv().is_ok() {
            notifications += 1;
        }
        assert_eq!(notifications, 9);
        assert!(relay.args_updated());
    }

    #[tokio::test]
    async fn tools_list_appends_update_tool() {
        let (relay, _queued) = relay(&responder(
            r#"{"tools":[{"name":"child_tool","inputSchema":{"type":"object"}}]}"#,
        ));

        let result = relay
            .forward(ForwardedMethod::ToolsList, Some(&json!({})))
            .await
            .expect("tools listed");
        let names = result["tools"]
            .as_array()
            .expect("tools array")
            .iter()
            .map(|tool| tool["name"].as_str().expect("tool name"))
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["child_tool", "update_args"]);
    }

    #[tokio::test]
    async fn non_object_tools_result_becomes_update_tool_only() {
        let (relay, _queued) = relay(&responder("null"));
        let result = relay
            .forward(ForwardedMethod::ToolsList, None)
            .await
            .expect("tools listed");
        assert_eq!(result["tools"].as_array().map(Vec::len), Some(1));
        assert_eq!(result["tools"][0]["name"], "update_args");
    }

    #[tokio::test]
    async fn failures_propagate_after_configuration() {
        let (relay, _queued) = relay("exit 1");

        let fallback = relay
            .forward(ForwardedMethod::PromptsList, None)
            .await
            .expect("fallback before update");
        assert_eq!(fallback, json!({"prompts": []}));

        relay.update_args(None).await.expect("update succeeds");

        relay
            .forward(ForwardedMethod::PromptsList, None)
            .await
            .expect_err("no fallback after update");
        relay
            .forward(ForwardedMethod::Ping, None)
            .await
            .expect_err("no ping fallback after update");
    }

    #[tokio::test]
    async fn methods_without_fallback_always_fail() {
        let (relay, _queued) = relay("exit 1");
        relay
            .forward(
                ForwardedMethod::ToolsCall,
                Some(&json!({"name": "missing_tool", "arguments": {}})),
            )
            .await
            .expect_err("tool call is never absorbed");
    }

    #[tokio::test]
    async fn call_after_replacement_does_not_reach_new_child() {
        let (relay, _queued) = relay(&responder("{}"));

        let incumbent = relay
            .prepare_child()
            .await
            .expect("handshake succeeds")
            .expect("child running");
        assert_eq!(incumbent.generation, 1);

        relay.supervisor().spawn(&HashMap::new()).await;

        let error = relay
            .call_child(Some(&incumbent), "tools/list", None)
            .await
            .expect_err("replaced child is not reused");
        assert!(matches!(error, RelayError::ChildKilled));
        assert_eq!(relay.supervisor().generation().await, 2);
        assert_eq!(relay.supervisor().pending_count().await, 0);
    }

    #[tokio::test]
    async fn shutdown_prevents_respawn() {
        let (relay, _queued) = relay(&responder("{}"));
        relay.shutdown().await;

        let fallback = relay
            .forward(ForwardedMethod::Ping, None)
            .await
            .expect("ping falls back");
        assert_eq!(fallback, json!({}));
        assert!(!relay.supervisor().is_running().await);
    }
}
