use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::types::SystemInfo;

/// Inbound envelope from the control server
///
/// `request_id` is opaque: whatever JSON value the server sent is echoed back
/// untouched, so a numeric id stays numeric and an explicit `null` comes back
/// as `null`. Only a missing key is left out of the reply.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub request_id: Option<Value>,
    #[serde(default)]
    pub command: Option<Value>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

// Only called when the key exists, so `null` becomes `Some(Value::Null)`
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Envelope {
    /// Name used in the "received" log line
    pub fn label(&self) -> &str {
        self.action
            .as_deref()
            .or(self.kind.as_deref())
            .unwrap_or("unknown")
    }
}

/// Unsolicited messages from agent to server
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AgentMessage {
    /// Sent once right after the transport opens
    Auth { cliente_id: String, info: SystemInfo },
    /// Heartbeat payload
    StatusUpdate { cliente_id: String, info: SystemInfo },
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultAction {
    ExecResult,
    CamerasResult,
}

/// Body of a response, flattened next to `request_id` and `cliente_id`
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ResponsePayload {
    Info {
        info: SystemInfo,
    },
    Pong {
        pong: bool,
        timestamp: i64,
    },
    Cameras {
        action: ResultAction,
        arp_table: String,
        error: Option<String>,
    },
    Exec {
        action: ResultAction,
        success: bool,
        stdout: String,
        stderr: String,
        error: Option<String>,
    },
}

/// Reply to a server request, correlated only by the echoed `request_id`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
    pub cliente_id: String,
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

impl Response {
    pub fn new(request_id: Option<Value>, cliente_id: &str, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            cliente_id: cliente_id.to_string(),
            payload,
        }
    }
}
