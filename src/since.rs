//! §4.7: the `since` filter, parsed from the wire as either a message id or
//! an RFC3339 timestamp.

use crate::error::{Error, Result};
use crate::model::Message;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Since {
    id: Option<String>,
    time: Option<DateTime<Utc>>,
}

/// Whether `s` matches the sortable message-id shape `^\d{8}-\d{6}-\d{4}$`
/// (20 bytes total). Exposed for the standalone reader's filename-first
/// pre-filter (§9).
pub fn looks_like_id(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 20
        && bytes[0..8].iter().all(u8::is_ascii_digit)
        && bytes[8] == b'-'
        && bytes[9..15].iter().all(u8::is_ascii_digit)
        && bytes[15] == b'-'
        && bytes[16..20].iter().all(u8::is_ascii_digit)
}

impl Since {
    /// Parse the wire's `since` string: an id matching `^\d{8}-\d{6}-\d{4}$`,
    /// otherwise an RFC3339 timestamp (with or without fractional seconds),
    /// normalised to UTC.
    pub fn parse(input: &str) -> Result<Self> {
        if looks_like_id(input) {
            Ok(Since {
                id: Some(input.to_string()),
                time: None,
            })
        } else {
            let parsed = DateTime::parse_from_rfc3339(input)
                .map_err(|e| Error::InvalidRequest(format!("invalid since value: {e}")))?;
            Ok(Since {
                id: None,
                time: Some(parsed.with_timezone(&Utc)),
            })
        }
    }

    pub fn none() -> Self {
        Since::default()
    }

    pub fn from_id(id: impl Into<String>) -> Self {
        Since {
            id: Some(id.into()),
            time: None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.time
    }

    /// §4.7: `id` set ⇒ `msg.id > since.id`; else `time` set ⇒ `msg.time >
    /// since.time`; else unconditionally true.
    pub fn allows(&self, msg: &Message) -> bool {
        if let Some(ref id) = self.id {
            msg.id.as_str() > id.as_str()
        } else if let Some(time) = self.time {
            msg.time > time
        } else {
            true
        }
    }
}
