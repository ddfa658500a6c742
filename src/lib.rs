use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

pub mod broadcast;
pub mod config;
pub mod correlator;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod mcp;
pub mod placeholder;
pub mod relay;
pub mod supervisor;
pub mod transport;

use config::Config;
use errors::RelayError;
pub use relay::Relay;

/// The queue of messages bound for the host, shared by responses and
/// list-changed notifications.
pub struct HostChannel {
    pub outbound: mpsc::UnboundedSender<Value>,
    pub queued: mpsc::UnboundedReceiver<Value>,
}

pub fn build_relay(config: &Config) -> Result<(Arc<Relay>, HostChannel), RelayError> {
    let (outbound, queued) = mpsc::unbounded_channel();
    let relay = Relay::new(config, outbound.clone())?;
    Ok((Arc::new(relay), HostChannel { outbound, queued }))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::{json, Value};

    use super::*;
    use crate::{broadcast::LIST_CHANGED_NOTIFICATIONS, mcp::server::handle_json_rpc_value};

    const CHILD_TOOLS: &str =
        r#"{"tools":[{"name":"child_tool","description":"From the child","inputSchema":{"type":"object"}}]}"#;

    /// Fails to start until `token` is `abc`, then answers every request with
    /// the child tool list.
    fn gated_template() -> String {
        format!(
            "test '{{{{token}}}}' = abc && {}",
            crate::supervisor::tests::responder(CHILD_TOOLS)
        )
    }

    fn relay(template: &str) -> (Arc<Relay>, HostChannel) {
        let config = Config::from_values(Some(template.to_string()), None, None)
            .expect("config should parse");
        build_relay(&config).expect("relay builds")
    }

    async fn request(relay: &Relay, body: &str) -> Value {
        let payload: Value = serde_json::from_str(body).expect("valid request json");
        handle_json_rpc_value(relay, payload)
            .await
            .expect("requests get a response")
    }

    fn tool_names(response: &Value) -> Vec<String> {
        response["result"]["tools"]
            .as_array()
            .expect("tools array")
            .iter()
            .map(|tool| tool["name"].as_str().expect("tool name").to_string())
            .collect()
    }

    fn drain_notifications(host: &mut HostChannel) -> Vec<String> {
        let mut methods = Vec::new();
        while let Ok(message) = host.queued.try_recv() {
            methods.push(message["method"].as_str().expect("notification method").to_string());
        }
        methods
    }

    #[tokio::test]
    async fn initialize_is_answered_locally() {
        let (relay, _host) = relay("exit 1");
        let response = request(
            &relay,
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","clientInfo":{"name":"test-client","version":"1.0.0"},"capabilities":{}}}"#,
        )
        .await;

        assert_eq!(response["jsonrpc"], "2.0");
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(response["result"]["serverInfo"]["name"], env!("CARGO_PKG_NAME"));
        assert_eq!(response["result"]["capabilities"]["tools"]["listChanged"], true);
        assert_eq!(response["result"]["capabilities"]["prompts"]["listChanged"], true);
        assert_eq!(response["result"]["capabilities"]["resources"]["listChanged"], true);
        assert!(!relay.supervisor().is_running().await);
    }

    #[tokio::test]
    async fn unknown_method_returns_method_not_found() {
        let (relay, _host) = relay("exit 1");
        let response = request(&relay, r#"{"jsonrpc":"2.0","id":1,"method":"unknown"}"#).await;
        assert_eq!(
            serde_json::to_string(&response).expect("serialize"),
            "{\"error\":{\"code\":-32601,\"message\":\"Method not found\"},\"id\":1,\"jsonrpc\":\"2.0\"}"
        );
    }

    #[tokio::test]
    async fn unconfigured_child_presents_empty_surface() {
        let (relay, mut host) = relay(&gated_template());

        let tools = request(&relay, r#"{"jsonrpc":"2.0","id":1,"method":"tools/list","params":{}}"#).await;
        assert_eq!(tool_names(&tools), vec!["update_args"]);
        assert_eq!(
            tools["result"]["tools"][0]["inputSchema"]["properties"]["token"]["type"],
            "string"
        );

        let cases = [
            ("prompts/list", "prompts"),
            ("resources/list", "resources"),
            ("resources/templates/list", "resourceTemplates"),
            ("roots/list", "roots"),
        ];
        for (id, (method, key)) in cases.into_iter().enumerate() {
            let body = json!({"jsonrpc": "2.0", "id": id + 10, "method": method}).to_string();
            let response = request(&relay, &body).await;
            assert_eq!(response["result"][key], json!([]), "fallback for {method}");
            assert_eq!(response["result"].as_object().map(|result| result.len()), Some(1));
        }

        let ping = request(&relay, r#"{"jsonrpc":"2.0","id":20,"method":"ping"}"#).await;
        assert_eq!(ping["result"], json!({}));

        let call = request(
            &relay,
            r#"{"jsonrpc":"2.0","id":21,"method":"tools/call","params":{"name":"missing_tool","arguments":{}}}"#,
        )
        .await;
        assert!(call.get("error").is_some(), "tool calls are never absorbed");

        assert!(!relay.args_updated());
        assert!(drain_notifications(&mut host).is_empty());
    }

    #[tokio::test]
    async fn update_restarts_child_and_announces_changes() {
        let (relay, mut host) = relay(&gated_template());

        let before = request(&relay, r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).await;
        assert_eq!(tool_names(&before), vec!["update_args"]);
        let spawns_before_update = relay.supervisor().generation().await;

        let update = request(
            &relay,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"update_args","arguments":{"token":"abc"}}}"#,
        )
        .await;
        assert_eq!(update["id"], 2);
        assert_eq!(update["result"]["content"][0]["type"], "text");
        assert!(relay.args_updated());
        assert_eq!(relay.supervisor().generation().await, spawns_before_update + 1);

        let notifications = drain_notifications(&mut host);
        assert_eq!(notifications.len(), 3);
        assert_eq!(
            notifications.iter().map(String::as_str).collect::<HashSet<_>>(),
            LIST_CHANGED_NOTIFICATIONS.into_iter().collect::<HashSet<_>>()
        );

        let after = request(&relay, r#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#).await;
        assert_eq!(tool_names(&after), vec!["child_tool", "update_args"]);
        assert_eq!(relay.supervisor().generation().await, spawns_before_update + 1);
    }

    #[tokio::test]
    async fn errors_propagate_once_configured() {
        let (relay, _host) = relay("exit 1");

        request(
            &relay,
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"update_args","arguments":{}}}"#,
        )
        .await;

        let tools = request(&relay, r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#).await;
        assert_eq!(tools["error"]["code"], -32603);

        let prompts = request(&relay, r#"{"jsonrpc":"2.0","id":3,"method":"prompts/list"}"#).await;
        assert_eq!(prompts["error"]["code"], -32603);
    }

    #[tokio::test]
    async fn second_update_replaces_first_child() {
        let (relay, mut host) = relay(&format!(
            "{} # {{{{token}}}}",
            crate::supervisor::tests::SILENT_CHILD
        ));

        request(
            &relay,
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"update_args","arguments":{"token":"first"}}}"#,
        )
        .await;

        let stale = {
            let relay = relay.clone();
            tokio::spawn(async move {
                request(
                    &relay,
                    r#"{"jsonrpc":"2.0","id":2,"method":"resources/read","params":{"uri":"file:///a"}}"#,
                )
                .await
            })
        };
        for _ in 0..200 {
            if relay.supervisor().pending_count().await > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(relay.supervisor().pending_count().await, 1);

        request(
            &relay,
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"update_args","arguments":{"token":"second"}}}"#,
        )
        .await;

        let stale = stale.await.expect("request task");
        assert_eq!(stale["id"], 2);
        assert_eq!(stale["error"]["message"], "child process killed");
        assert_eq!(relay.supervisor().generation().await, 2);
        assert!(relay.supervisor().is_running().await);
        assert_eq!(drain_notifications(&mut host).len(), 6);
    }

    #[tokio::test]
    async fn update_tool_name_is_configurable() {
        let config = Config::from_values(
            Some("exit 1 # {{dir}}".to_string()),
            Some("configure".to_string()),
            None,
        )
        .expect("config should parse");
        let (relay, _host) = build_relay(&config).expect("relay builds");

        let tools = request(&relay, r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).await;
        assert_eq!(tool_names(&tools), vec!["configure"]);

        let update = request(
            &relay,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"configure","arguments":{"dir":"/srv"}}}"#,
        )
        .await;
        assert!(update.get("result").is_some());
        assert!(relay.args_updated());
    }
}
