//! §6: the newline-delimited JSON wire protocol.

use crate::error::Error;
use crate::model::Priority;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Maximum accepted frame size: 1 MiB message envelope + 64 KiB headroom.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024 + 64 * 1024;

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub project_id: Option<String>,
    pub agent: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub req_id: Option<String>,
    pub to: String,
    pub body: Value,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct WatchRequest {
    #[serde(default)]
    pub project_id: Option<String>,
    pub agent: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub req_id: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub since: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RelayRequest {
    #[serde(default)]
    pub project_id: Option<String>,
    pub agent: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub req_id: Option<String>,
    #[serde(default)]
    pub since: Option<String>,
}

/// Additional command (SPEC_FULL §4.8): mutate the calling agent's status.
#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    #[serde(default)]
    pub project_id: Option<String>,
    pub agent: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub req_id: Option<String>,
    pub status: String,
}

/// Additional command (SPEC_FULL §4.8): read-only topic listing.
#[derive(Debug, Deserialize)]
pub struct ListTopicsRequest {
    #[serde(default)]
    pub project_id: Option<String>,
    pub agent: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub req_id: Option<String>,
}

/// Additional command (SPEC_FULL §4.8): read-only agent listing.
#[derive(Debug, Deserialize)]
pub struct ListAgentsRequest {
    #[serde(default)]
    pub project_id: Option<String>,
    pub agent: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub req_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    Send(SendRequest),
    Watch(WatchRequest),
    Relay(RelayRequest),
    Status(StatusRequest),
    ListTopics(ListTopicsRequest),
    ListAgents(ListAgentsRequest),
}

/// Build an `{"ok":true, ...extra, "req_id"?}` frame.
pub fn success(req_id: Option<&str>, extra: Value) -> Value {
    let mut obj = Map::new();
    obj.insert("ok".to_string(), Value::Bool(true));
    if let Value::Object(fields) = extra {
        obj.extend(fields);
    }
    if let Some(id) = req_id {
        obj.insert("req_id".to_string(), Value::String(id.to_string()));
    }
    Value::Object(obj)
}

/// Build an `{"ok":false, "error":{code,message,retryable?}, "req_id"?}` frame.
pub fn failure(err: &Error, req_id: Option<&str>) -> Value {
    serde_json::json!({
        "ok": false,
        "error": {
            "code": err.code(),
            "message": err.to_string(),
            "retryable": err.retryable(),
        },
        "req_id": req_id,
    })
}

/// A `{"msg": <message>}` stream frame, §6.
pub fn msg_frame(msg: &crate::model::Message) -> Value {
    serde_json::json!({ "msg": msg })
}
