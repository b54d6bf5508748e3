//! MCP Protocol Types
//!
//! JSON-RPC 2.0 and MCP message types based on MCP specification
//! (version 2024-11-05). One message per newline-delimited line; messages
//! classify as requests (method + non-null id), notifications (method, no
//! id), or responses (result or error).

use serde::{Deserialize, Serialize};

/// JSON-RPC protocol version
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol version supported by this implementation
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Server name reported in the initialize handshake
pub const PROXY_SERVER_NAME: &str = "sstart-mcp-proxy";

/// JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// MCP method names
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const RESOURCES_READ: &str = "resources/read";
    pub const PROMPTS_LIST: &str = "prompts/list";
    pub const PROMPTS_GET: &str = "prompts/get";
    pub const PING: &str = "ping";
}

/// A generic JSON-RPC 2.0 message: request, notification, or response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcMessage {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcMessage {
    /// Build a request message
    pub fn request(
        id: serde_json::Value,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    /// Build a notification message (no id)
    pub fn notification(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    /// Build a success response
    pub fn response(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response
    pub fn error_response(
        id: serde_json::Value,
        code: i32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: None,
            error: Some(JsonRpcError { code, message: message.into(), data: None }),
        }
    }

    /// True for a request: has a method and a non-null id
    pub fn is_request(&self) -> bool {
        self.method.is_some() && matches!(&self.id, Some(id) if !id.is_null())
    }

    /// True for a notification: has a method and no (or null) id
    pub fn is_notification(&self) -> bool {
        self.method.is_some() && !matches!(&self.id, Some(id) if !id.is_null())
    }

    /// True for a response: carries a result or an error
    pub fn is_response(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Client or server identification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Info {
    pub name: String,
    pub version: String,
}

/// MCP capabilities for both sides of the handshake
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<serde_json::Value>,
}

impl Capabilities {
    /// Union with another capability set; list-changed and subscribe flags
    /// combine with OR.
    pub fn merge(&mut self, other: &Capabilities) {
        if let Some(tools) = &other.tools {
            let entry = self.tools.get_or_insert_with(Default::default);
            entry.list_changed = or_flags(entry.list_changed, tools.list_changed);
        }
        if let Some(resources) = &other.resources {
            let entry = self.resources.get_or_insert_with(Default::default);
            entry.list_changed = or_flags(entry.list_changed, resources.list_changed);
            entry.subscribe = or_flags(entry.subscribe, resources.subscribe);
        }
        if let Some(prompts) = &other.prompts {
            let entry = self.prompts.get_or_insert_with(Default::default);
            entry.list_changed = or_flags(entry.list_changed, prompts.list_changed);
        }
        if other.logging.is_some() && self.logging.is_none() {
            self.logging = other.logging.clone();
        }
    }
}

fn or_flags(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(false) || b.unwrap_or(false)),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesCapability {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptsCapability {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Result of the initialize request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: Capabilities,
    pub server_info: Info,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_classification() {
        let request = JsonRpcMessage::request(json!(1), "tools/list", None);
        assert!(request.is_request());
        assert!(!request.is_notification());
        assert!(!request.is_response());

        let notification = JsonRpcMessage::notification("notifications/initialized", None);
        assert!(notification.is_notification());
        assert!(!notification.is_request());

        let response = JsonRpcMessage::response(json!(1), json!({}));
        assert!(response.is_response());
        assert!(!response.is_request());

        let error = JsonRpcMessage::error_response(json!(1), error_codes::INTERNAL_ERROR, "boom");
        assert!(error.is_response());
    }

    #[test]
    fn test_string_ids_are_preserved() {
        let line = r#"{"jsonrpc":"2.0","id":"req-7","method":"ping"}"#;
        let msg: JsonRpcMessage = serde_json::from_str(line).unwrap();
        assert!(msg.is_request());
        assert_eq!(msg.id, Some(json!("req-7")));
    }

    #[test]
    fn test_null_id_is_a_notification() {
        let line = r#"{"jsonrpc":"2.0","id":null,"method":"notifications/progress"}"#;
        let msg: JsonRpcMessage = serde_json::from_str(line).unwrap();
        assert!(msg.is_notification());
    }

    #[test]
    fn test_response_serialization_omits_absent_fields() {
        let response = JsonRpcMessage::response(json!(42), json!({"ok": true}));
        let serialized = serde_json::to_string(&response).unwrap();
        assert!(!serialized.contains("method"));
        assert!(!serialized.contains("error"));
        assert!(serialized.contains("\"id\":42"));
    }

    #[test]
    fn test_capability_union() {
        let mut base = Capabilities::default();
        base.merge(&Capabilities {
            tools: Some(ToolsCapability { list_changed: Some(true) }),
            ..Default::default()
        });
        base.merge(&Capabilities {
            tools: Some(ToolsCapability { list_changed: None }),
            resources: Some(ResourcesCapability { subscribe: Some(true), list_changed: None }),
            ..Default::default()
        });

        assert_eq!(base.tools.unwrap().list_changed, Some(true));
        assert_eq!(base.resources.as_ref().unwrap().subscribe, Some(true));
        assert!(base.prompts.is_none());
    }

    #[test]
    fn test_initialize_result_camel_case() {
        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: Capabilities::default(),
            server_info: Info { name: PROXY_SERVER_NAME.to_string(), version: "0.4.0".to_string() },
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(value["serverInfo"]["name"], PROXY_SERVER_NAME);
    }
}
