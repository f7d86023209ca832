use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Audio,
}

/// One chat bubble. Field names follow the persisted record layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    /// Whole seconds, only meaningful for audio messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    /// In-flight streaming reply; never persisted.
    #[serde(skip)]
    pub draft: bool,
}

impl Message {
    pub fn text(id: String, role: Role, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            timestamp,
            kind: MessageKind::Text,
            duration: None,
            draft: false,
        }
    }

    pub fn audio(id: String, transcript: impl Into<String>, duration_secs: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            role: Role::User,
            content: transcript.into(),
            timestamp,
            kind: MessageKind::Audio,
            duration: Some(duration_secs),
            draft: false,
        }
    }

    pub fn is_draft(&self) -> bool {
        self.draft
    }
}

/// Hands out millisecond-based message ids that strictly increase, even when
/// several messages are created inside the same millisecond.
#[derive(Debug, Default)]
pub struct MessageIdClock {
    last: i64,
}

impl MessageIdClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from an existing log so new ids sort after everything already stored.
    pub fn after(messages: &[Message]) -> Self {
        let last = messages
            .iter()
            .filter_map(|m| m.id.parse::<i64>().ok())
            .max()
            .unwrap_or(0);
        Self { last }
    }

    pub fn next_id(&mut self, now: DateTime<Utc>) -> String {
        let candidate = now.timestamp_millis();
        self.last = candidate.max(self.last + 1);
        self.last.to_string()
    }
}
