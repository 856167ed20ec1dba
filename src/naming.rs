//! L1: canonicalisation and target parsing. Pure, no I/O.

use crate::error::{Error, Result};

/// A parsed send/watch target: either a topic or a DM mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Topic(String),
    Dm(String),
}

impl Target {
    /// `to`/`topic` field from the wire: `@agent` selects a DM, anything else
    /// is a topic name. Both sides are canonicalised.
    pub fn parse(input: &str) -> Result<Self> {
        if let Some(agent) = input.strip_prefix('@') {
            Ok(Target::Dm(normalize_agent(agent)?))
        } else {
            Ok(Target::Topic(normalize_topic(input)?))
        }
    }

    /// The `to` value a saved message carries for this target.
    pub fn to_field(&self) -> String {
        match self {
            Target::Topic(name) => name.clone(),
            Target::Dm(agent) => format!("@{agent}"),
        }
    }
}

fn is_canonical(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Trim, lowercase, then assert the canonical pattern `^[a-z0-9-]+$`.
pub fn normalize_topic(input: &str) -> Result<String> {
    let canon = input.trim().to_lowercase();
    if is_canonical(&canon) {
        Ok(canon)
    } else {
        Err(Error::InvalidTopic(input.to_string()))
    }
}

/// Trim, lowercase, then assert the canonical pattern `^[a-z0-9-]+$`.
pub fn normalize_agent(input: &str) -> Result<String> {
    let canon = input.trim().to_lowercase();
    if is_canonical(&canon) {
        Ok(canon)
    } else {
        Err(Error::InvalidAgent(input.to_string()))
    }
}

/// Reject anything not already canonical, without attempting to fix it up.
pub fn validate_topic(input: &str) -> Result<()> {
    if is_canonical(input) {
        Ok(())
    } else {
        Err(Error::InvalidTopic(input.to_string()))
    }
}

pub fn validate_agent(input: &str) -> Result<()> {
    if is_canonical(input) {
        Ok(())
    } else {
        Err(Error::InvalidAgent(input.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(normalize_topic(" Task ").unwrap(), "task");
        assert_eq!(normalize_agent("Alice").unwrap(), "alice");
    }

    #[test]
    fn rejects_empty_and_invalid_chars() {
        assert!(normalize_topic("").is_err());
        assert!(normalize_topic("task!").is_err());
        assert!(normalize_agent("a b").is_err());
    }

    #[test]
    fn parses_dm_vs_topic() {
        assert_eq!(Target::parse("@Bob").unwrap(), Target::Dm("bob".to_string()));
        assert_eq!(Target::parse("Task").unwrap(), Target::Topic("task".to_string()));
    }

    #[test]
    fn to_field_round_trips() {
        assert_eq!(Target::parse("@bob").unwrap().to_field(), "@bob");
        assert_eq!(Target::parse("task").unwrap().to_field(), "task");
    }
}
