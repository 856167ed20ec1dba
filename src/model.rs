//! §3: data model entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Immutable once saved. `id` and `time` are filled in by the store if left
/// at their zero values (`""` and the Unix epoch respectively).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default = "epoch")]
    pub time: DateTime<Utc>,
    pub body: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl Message {
    pub fn is_zero_time(&self) -> bool {
        self.time == epoch()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub status: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// §6: `project.json` is exactly `{"id","created"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub created: DateTime<Utc>,
}

/// Per-topic summary row for `list_topics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicInfo {
    pub name: String,
    pub messages: usize,
    pub last_activity: DateTime<Utc>,
}
