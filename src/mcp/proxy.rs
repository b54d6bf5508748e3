//! MCP proxy
//!
//! Supervises the downstream child sessions and routes host traffic:
//! `initialize` fans out to every child and answers with the capability
//! union, list requests aggregate child inventories under
//! `<childId>/<name>` namespaces, calls strip the prefix and route to the
//! owning child, and `ping` is answered locally. Host request ids are
//! preserved exactly; children only ever see their own session's ids.

use super::child::ChildSession;
use super::protocol::{
    error_codes, methods, Capabilities, Info, InitializeResult, JsonRpcMessage,
    MCP_PROTOCOL_VERSION, PROXY_SERVER_NAME,
};
use super::transport::{MessageReader, MessageWriter};
use crate::errors::Result;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Wait this long for each child's initialize response
const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period between closing a child's stdin and killing it
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Buffered outbound messages to the host
const HOST_BUFFER: usize = 64;

struct Inner {
    children: Vec<Arc<ChildSession>>,
    /// uri -> owning child id, learned while serving resources/list
    resource_owners: RwLock<HashMap<String, String>>,
    init_timeout: Duration,
}

/// The MCP proxy over a set of child sessions
pub struct Proxy {
    inner: Arc<Inner>,
}

impl Proxy {
    pub fn new(children: Vec<Arc<ChildSession>>) -> Self {
        Self::with_init_timeout(children, DEFAULT_INIT_TIMEOUT)
    }

    pub fn with_init_timeout(children: Vec<Arc<ChildSession>>, init_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                children,
                resource_owners: RwLock::new(HashMap::new()),
                init_timeout,
            }),
        }
    }

    /// Spawn every configured server with the given environment. The
    /// returned sender clone feeds child notifications into the host loop.
    pub fn spawn_children(
        servers: &[crate::config::McpServerConfig],
        env: &HashMap<String, String>,
        upstream: mpsc::Sender<JsonRpcMessage>,
    ) -> Result<Vec<Arc<ChildSession>>> {
        servers.iter().map(|server| ChildSession::spawn(server, env, upstream.clone())).collect()
    }

    /// Run the proxy over the host streams until EOF or shutdown. Child
    /// notifications arriving on `upstream` are forwarded to the host.
    pub async fn run<R, W, S>(
        &self,
        input: R,
        output: W,
        mut upstream: mpsc::Receiver<JsonRpcMessage>,
        shutdown: S,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Send + Unpin + 'static,
        S: std::future::Future<Output = ()>,
    {
        let (host_tx, mut host_rx) = mpsc::channel::<JsonRpcMessage>(HOST_BUFFER);

        // Host writer: the single flow of control touching stdout.
        let writer_task = tokio::spawn(async move {
            let mut writer = MessageWriter::new(output);
            while let Some(message) = host_rx.recv().await {
                if let Err(e) = writer.write(&message).await {
                    warn!(error = %e, "Host write failed");
                    break;
                }
            }
        });

        // Child notifications pass through to the host untranslated.
        let notification_tx = host_tx.clone();
        let notification_task = tokio::spawn(async move {
            while let Some(message) = upstream.recv().await {
                if notification_tx.send(message).await.is_err() {
                    break;
                }
            }
        });

        let mut reader = MessageReader::new(input);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested, stopping proxy");
                    break;
                }
                message = reader.read() => match message {
                    Ok(Some(message)) => self.dispatch(message, &host_tx).await,
                    Ok(None) => {
                        debug!("Host closed stdin");
                        break;
                    }
                    Err(e) => {
                        debug!(error = %e, "Unreadable host message");
                        let _ = host_tx
                            .send(JsonRpcMessage::error_response(
                                Value::Null,
                                error_codes::PARSE_ERROR,
                                "parse error",
                            ))
                            .await;
                    }
                },
            }
        }

        notification_task.abort();
        drop(host_tx);
        self.shutdown_children().await;
        let _ = writer_task.await;
        Ok(())
    }

    async fn dispatch(&self, message: JsonRpcMessage, host_tx: &mpsc::Sender<JsonRpcMessage>) {
        if message.is_request() {
            // Each request is handled in its own task so several in-flight
            // host requests can fan out to several children concurrently.
            let inner = Arc::clone(&self.inner);
            let host_tx = host_tx.clone();
            tokio::spawn(async move {
                let response = inner.handle_request(message).await;
                let _ = host_tx.send(response).await;
            });
        } else if message.is_notification() {
            self.inner.forward_notification(message).await;
        } else {
            warn!(id = ?message.id, "Dropping unexpected response from host");
        }
    }

    async fn shutdown_children(&self) {
        let mut tasks = JoinSet::new();
        for child in &self.inner.children {
            let child = Arc::clone(child);
            tasks.spawn(async move { child.shutdown(SHUTDOWN_GRACE).await });
        }
        while tasks.join_next().await.is_some() {}
    }

    #[cfg(test)]
    async fn handle_request_for_test(&self, message: JsonRpcMessage) -> JsonRpcMessage {
        self.inner.handle_request(message).await
    }
}

impl Inner {
    fn child(&self, id: &str) -> Option<&Arc<ChildSession>> {
        self.children.iter().find(|child| child.id() == id)
    }

    async fn handle_request(&self, message: JsonRpcMessage) -> JsonRpcMessage {
        let host_id = message.id.clone().unwrap_or(Value::Null);
        let method = message.method.as_deref().unwrap_or("");

        match method {
            methods::INITIALIZE => self.handle_initialize(host_id, message.params).await,
            methods::PING => JsonRpcMessage::response(host_id, json!({})),
            methods::TOOLS_LIST => {
                self.aggregate_list(host_id, methods::TOOLS_LIST, "tools", |c| c.tools.is_some())
                    .await
            }
            methods::RESOURCES_LIST => {
                self.aggregate_list(host_id, methods::RESOURCES_LIST, "resources", |c| {
                    c.resources.is_some()
                })
                .await
            }
            methods::PROMPTS_LIST => {
                self.aggregate_list(host_id, methods::PROMPTS_LIST, "prompts", |c| {
                    c.prompts.is_some()
                })
                .await
            }
            methods::TOOLS_CALL | methods::PROMPTS_GET => {
                self.route_named(host_id, method, message.params).await
            }
            methods::RESOURCES_READ => self.route_resource_read(host_id, message.params).await,
            other => JsonRpcMessage::error_response(
                host_id,
                error_codes::METHOD_NOT_FOUND,
                format!("method not found: {}", other),
            ),
        }
    }

    /// Forward initialize to every child in parallel, record capabilities,
    /// and answer the host with the proxy's identity and the union.
    async fn handle_initialize(&self, host_id: Value, params: Option<Value>) -> JsonRpcMessage {
        let mut tasks = JoinSet::new();
        for child in &self.children {
            let child = Arc::clone(child);
            let params = params.clone();
            let timeout = self.init_timeout;
            tasks.spawn(async move {
                let outcome =
                    child.request_with_timeout(methods::INITIALIZE, params, timeout).await;
                (child, outcome)
            });
        }

        let mut capabilities = Capabilities::default();
        while let Some(joined) = tasks.join_next().await {
            let Ok((child, outcome)) = joined else { continue };
            match outcome {
                Ok(response) => {
                    let child_caps = response
                        .result
                        .as_ref()
                        .and_then(|result| result.get("capabilities"))
                        .and_then(|caps| {
                            serde_json::from_value::<Capabilities>(caps.clone()).ok()
                        })
                        .unwrap_or_default();
                    capabilities.merge(&child_caps);
                    child.set_capabilities(child_caps);
                    info!(server_id = %child.id(), "Child initialized");
                }
                Err(e) => {
                    warn!(server_id = %child.id(), error = %e, "Child failed to initialize");
                }
            }
        }

        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities,
            server_info: Info {
                name: PROXY_SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        match serde_json::to_value(&result) {
            Ok(result) => JsonRpcMessage::response(host_id, result),
            Err(e) => JsonRpcMessage::error_response(
                host_id,
                error_codes::INTERNAL_ERROR,
                e.to_string(),
            ),
        }
    }

    /// Fan a list request out to every capable child and merge the entries,
    /// prefixing each name with the child id. Child order follows the
    /// configuration so the aggregate is deterministic.
    async fn aggregate_list(
        &self,
        host_id: Value,
        method: &str,
        field: &str,
        capable: fn(&Capabilities) -> bool,
    ) -> JsonRpcMessage {
        let mut tasks = JoinSet::new();
        for (index, child) in self.children.iter().enumerate() {
            if !child.is_alive() || !capable(&child.capabilities()) {
                continue;
            }
            let child = Arc::clone(child);
            let method = method.to_string();
            tasks.spawn(async move {
                let outcome = child.request(&method, None).await;
                (index, child, outcome)
            });
        }

        let mut per_child: Vec<(usize, Arc<ChildSession>, Vec<Value>)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let Ok((index, child, outcome)) = joined else { continue };
            match outcome {
                Ok(response) => {
                    let entries = response
                        .result
                        .as_ref()
                        .and_then(|result| result.get(field))
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    per_child.push((index, child, entries));
                }
                Err(e) => {
                    warn!(server_id = %child.id(), error = %e, "List request failed");
                }
            }
        }
        per_child.sort_by_key(|(index, _, _)| *index);

        let mut aggregated = Vec::new();
        for (_, child, entries) in per_child {
            for mut entry in entries {
                if let Some(name) = entry.get("name").and_then(Value::as_str) {
                    let namespaced = format!("{}/{}", child.id(), name);
                    entry["name"] = Value::String(namespaced);
                }
                if field == "resources" {
                    if let Some(uri) = entry.get("uri").and_then(Value::as_str) {
                        self.resource_owners
                            .write()
                            .await
                            .insert(uri.to_string(), child.id().to_string());
                    }
                }
                aggregated.push(entry);
            }
        }

        JsonRpcMessage::response(host_id, json!({ field: aggregated }))
    }

    /// Route a `name`-addressed request (`tools/call`, `prompts/get`) to
    /// the child owning the namespace prefix.
    async fn route_named(
        &self,
        host_id: Value,
        method: &str,
        params: Option<Value>,
    ) -> JsonRpcMessage {
        let name = params
            .as_ref()
            .and_then(|params| params.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let Some(name) = name else {
            return JsonRpcMessage::error_response(
                host_id,
                error_codes::INVALID_PARAMS,
                "missing 'name' parameter",
            );
        };

        let Some((child_id, raw_name)) = name.split_once('/') else {
            return JsonRpcMessage::error_response(
                host_id,
                error_codes::METHOD_NOT_FOUND,
                format!("unknown tool or prompt: {}", name),
            );
        };

        let Some(child) = self.child(child_id) else {
            return JsonRpcMessage::error_response(
                host_id,
                error_codes::METHOD_NOT_FOUND,
                format!("unknown server prefix: {}", child_id),
            );
        };

        let mut params = params.unwrap_or_else(|| json!({}));
        params["name"] = Value::String(raw_name.to_string());

        self.forward_to_child(host_id, child, method, Some(params)).await
    }

    /// Route resources/read by the uri ownership learned from
    /// resources/list.
    async fn route_resource_read(&self, host_id: Value, params: Option<Value>) -> JsonRpcMessage {
        let uri = params
            .as_ref()
            .and_then(|params| params.get("uri"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let Some(uri) = uri else {
            return JsonRpcMessage::error_response(
                host_id,
                error_codes::INVALID_PARAMS,
                "missing 'uri' parameter",
            );
        };

        let owner = self.resource_owners.read().await.get(&uri).cloned();
        let Some(child) = owner.as_deref().and_then(|id| self.child(id)) else {
            return JsonRpcMessage::error_response(
                host_id,
                error_codes::METHOD_NOT_FOUND,
                format!("unknown resource: {}", uri),
            );
        };

        self.forward_to_child(host_id, child, methods::RESOURCES_READ, params).await
    }

    /// Forward a request to one child and rewrite the response onto the
    /// host id. The child's response body passes through unchanged.
    async fn forward_to_child(
        &self,
        host_id: Value,
        child: &Arc<ChildSession>,
        method: &str,
        params: Option<Value>,
    ) -> JsonRpcMessage {
        match child.request(method, params).await {
            Ok(child_response) => JsonRpcMessage {
                jsonrpc: super::protocol::JSONRPC_VERSION.to_string(),
                id: Some(host_id),
                method: None,
                params: None,
                result: child_response
                    .result
                    .or(if child_response.error.is_none() { Some(Value::Null) } else { None }),
                error: child_response.error,
            },
            Err(e) => JsonRpcMessage::error_response(
                host_id,
                error_codes::INTERNAL_ERROR,
                e.to_string(),
            ),
        }
    }

    async fn forward_notification(&self, message: JsonRpcMessage) {
        for child in &self.children {
            if !child.is_alive() {
                continue;
            }
            let method = message.method.clone().unwrap_or_default();
            if let Err(e) = child.notify(&method, message.params.clone()).await {
                debug!(server_id = %child.id(), error = %e, "Notification forward failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::ToolsCapability;

    /// Script a child that answers initialize with a tools capability and
    /// serves one tool named `tool_name`; tools/call responses embed the
    /// child tag, the received tool name, and the received request id.
    fn scripted_tool_child(
        id: &str,
        tool_name: &'static str,
        upstream: mpsc::Sender<JsonRpcMessage>,
    ) -> Arc<ChildSession> {
        let (stdin_theirs, stdin_ours) = tokio::io::duplex(8192);
        let (stdout_ours, stdout_theirs) = tokio::io::duplex(8192);
        let tag = id.to_string();

        tokio::spawn(async move {
            let mut reader = MessageReader::new(stdin_ours);
            let mut writer = MessageWriter::new(stdout_theirs);
            while let Ok(Some(msg)) = reader.read().await {
                if !msg.is_request() {
                    continue;
                }
                let id = msg.id.clone().unwrap();
                let response = match msg.method.as_deref().unwrap() {
                    methods::INITIALIZE => JsonRpcMessage::response(
                        id,
                        json!({
                            "protocolVersion": MCP_PROTOCOL_VERSION,
                            "capabilities": { "tools": {} },
                            "serverInfo": { "name": tag, "version": "1.0" },
                        }),
                    ),
                    methods::TOOLS_LIST => JsonRpcMessage::response(
                        id,
                        json!({
                            "tools": [
                                { "name": tool_name, "description": "a tool", "inputSchema": {} }
                            ]
                        }),
                    ),
                    methods::TOOLS_CALL => JsonRpcMessage::response(
                        id.clone(),
                        json!({
                            "served_by": tag,
                            "tool": msg.params.as_ref().unwrap()["name"],
                            "child_request_id": id,
                        }),
                    ),
                    _ => JsonRpcMessage::error_response(
                        id,
                        error_codes::METHOD_NOT_FOUND,
                        "unsupported",
                    ),
                };
                if writer.write(&response).await.is_err() {
                    break;
                }
            }
        });

        let child = ChildSession::from_streams(id, stdin_theirs, stdout_ours, upstream, None);
        child.set_capabilities(Capabilities {
            tools: Some(ToolsCapability::default()),
            ..Default::default()
        });
        child
    }

    fn two_child_proxy() -> Proxy {
        let (upstream, _rx) = mpsc::channel(16);
        let m1 = scripted_tool_child("m1", "t", upstream.clone());
        let m2 = scripted_tool_child("m2", "t", upstream);
        Proxy::new(vec![m1, m2])
    }

    #[tokio::test]
    async fn test_initialize_reports_proxy_identity_and_union() {
        let proxy = two_child_proxy();
        let response = proxy
            .handle_request_for_test(JsonRpcMessage::request(
                json!(1),
                methods::INITIALIZE,
                Some(json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": "host", "version": "1.0" },
                })),
            ))
            .await;

        let result = response.result.unwrap();
        assert_eq!(result["serverInfo"]["name"], PROXY_SERVER_NAME);
        assert_eq!(result["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn test_tools_list_namespaces_both_children() {
        let proxy = two_child_proxy();
        let response = proxy
            .handle_request_for_test(JsonRpcMessage::request(json!(2), methods::TOOLS_LIST, None))
            .await;

        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
        let names: Vec<&str> =
            tools.iter().map(|tool| tool["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["m1/t", "m2/t"]);
    }

    #[tokio::test]
    async fn test_tools_call_routes_to_named_child_with_stripped_prefix() {
        let proxy = two_child_proxy();
        let response = proxy
            .handle_request_for_test(JsonRpcMessage::request(
                json!("host-9"),
                methods::TOOLS_CALL,
                Some(json!({ "name": "m2/t", "arguments": {} })),
            ))
            .await;

        // Host id preserved exactly; the child saw only the raw name and
        // its own session-local id.
        assert_eq!(response.id, Some(json!("host-9")));
        let result = response.result.unwrap();
        assert_eq!(result["served_by"], "m2");
        assert_eq!(result["tool"], "t");
        assert_ne!(result["child_request_id"], json!("host-9"));
    }

    #[tokio::test]
    async fn test_unknown_prefix_is_method_not_found() {
        let proxy = two_child_proxy();
        let response = proxy
            .handle_request_for_test(JsonRpcMessage::request(
                json!(3),
                methods::TOOLS_CALL,
                Some(json!({ "name": "ghost/t" })),
            ))
            .await;

        assert_eq!(response.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ping_is_answered_locally() {
        let proxy = two_child_proxy();
        let response = proxy
            .handle_request_for_test(JsonRpcMessage::request(json!(4), methods::PING, None))
            .await;
        assert_eq!(response.result, Some(json!({})));
    }

    #[tokio::test]
    async fn test_unknown_method_is_method_not_found() {
        let proxy = two_child_proxy();
        let response = proxy
            .handle_request_for_test(JsonRpcMessage::request(json!(5), "logging/setLevel", None))
            .await;
        assert_eq!(response.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_dead_child_call_returns_internal_error() {
        let (upstream, _rx) = mpsc::channel(16);
        let m1 = scripted_tool_child("m1", "t", upstream);
        m1.shutdown(Duration::from_millis(10)).await;
        let proxy = Proxy::new(vec![m1]);

        let response = proxy
            .handle_request_for_test(JsonRpcMessage::request(
                json!(6),
                methods::TOOLS_CALL,
                Some(json!({ "name": "m1/t" })),
            ))
            .await;
        assert_eq!(response.error.unwrap().code, error_codes::INTERNAL_ERROR);
    }

    #[tokio::test]
    async fn test_run_loop_end_to_end_over_duplex() {
        let proxy = two_child_proxy();
        let (upstream_tx, upstream_rx) = mpsc::channel(16);
        drop(upstream_tx);

        let (host_side, proxy_side) = tokio::io::duplex(16384);
        let (proxy_read, proxy_write) = tokio::io::split(proxy_side);
        let (host_read, host_write) = tokio::io::split(host_side);

        let run = tokio::spawn(async move {
            proxy.run(proxy_read, proxy_write, upstream_rx, std::future::pending()).await
        });

        let mut host_writer = MessageWriter::new(host_write);
        let mut host_reader = MessageReader::new(host_read);

        host_writer
            .write(&JsonRpcMessage::request(json!(1), methods::PING, None))
            .await
            .unwrap();
        let pong = host_reader.read().await.unwrap().unwrap();
        assert_eq!(pong.id, Some(json!(1)));
        assert_eq!(pong.result, Some(json!({})));

        host_writer
            .write(&JsonRpcMessage::request(json!(2), methods::TOOLS_LIST, None))
            .await
            .unwrap();
        let listing = host_reader.read().await.unwrap().unwrap();
        assert_eq!(listing.id, Some(json!(2)));
        assert_eq!(listing.result.unwrap()["tools"].as_array().unwrap().len(), 2);

        // Closing the host side ends the run loop cleanly.
        drop(host_writer);
        drop(host_reader);
        run.await.unwrap().unwrap();
    }
}
