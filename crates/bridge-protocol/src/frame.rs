use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: &str = "2.0";

/// A single U-WBP v2 frame. The wire `type` field selects which variant's
/// field set applies; see spec §3 for the per-type envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Request(RequestFrame),
    Response(ResponseFrame),
    Event(EventFrame),
    System(SystemFrame),
}

impl Frame {
    pub fn version(&self) -> &str {
        match self {
            Frame::Request(f) => &f.version,
            Frame::Response(f) => &f.version,
            Frame::Event(f) => &f.version,
            Frame::System(f) => &f.version,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Frame::Request(f) => f.timestamp,
            Frame::Response(f) => f.timestamp,
            Frame::Event(f) => f.timestamp,
            Frame::System(f) => f.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: String,
    pub op: String,
    #[serde(default = "default_data")]
    pub data: Value,
    pub timestamp: i64,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
    pub timestamp: i64,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub op: String,
    #[serde(default = "default_data")]
    pub data: Value,
    pub timestamp: i64,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemFrame {
    #[serde(rename = "systemOp")]
    pub system_op: SystemOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default = "default_data")]
    pub data: Value,
    pub timestamp: i64,
    pub version: String,
}

fn default_data() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemOp {
    Handshake,
    Disconnect,
    Ping,
    Pong,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

/// Payload of a `system/handshake` frame sent by a connecting server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakePayload {
    pub protocol_version: String,
    pub server_type: String,
    pub server_id: String,
    pub token: String,
    pub server_info: ServerInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub core_type: String,
    pub core_name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Payload of the `system/handshake` frame the bridge sends back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeAck {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
