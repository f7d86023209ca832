//! Folds streamed deltas into one in-place draft, then replaces the draft
//! with the finalized reply segments.

use chrono::{DateTime, Duration, Utc};

use crate::llm_client::CompletionError;
use crate::message::{Message, MessageIdClock, Role};
use crate::prompt::SEGMENT_DELIMITER;

pub const ERROR_INDICATOR: &str = "❌";

/// Split a finished reply on the delimiter, dropping blank segments.
pub fn split_reply(text: &str) -> Vec<String> {
    text.split(SEGMENT_DELIMITER)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn error_message_content(error: &CompletionError) -> String {
    format!("{} {}", ERROR_INDICATOR, error)
}

#[derive(Debug)]
pub struct ReplyAssembler {
    draft_id: String,
    content: String,
    segment_spacing: Duration,
}

impl ReplyAssembler {
    pub fn new(draft_id: String, segment_spacing_ms: i64) -> Self {
        Self {
            draft_id,
            content: String::new(),
            segment_spacing: Duration::milliseconds(segment_spacing_ms.max(1)),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn draft_id(&self) -> &str {
        &self.draft_id
    }

    /// Append a delta and mirror the running text into the log's draft,
    /// creating the draft on the first non-empty delta. The draft is found
    /// by id, so messages appended after it do not fork a second draft.
    pub fn push_delta(&mut self, log: &mut Vec<Message>, delta: &str, now: DateTime<Utc>) {
        if delta.is_empty() {
            return;
        }
        self.content.push_str(delta);

        if let Some(draft) = log
            .iter_mut()
            .rev()
            .find(|m| m.is_draft() && m.id == self.draft_id)
        {
            draft.content.clone_from(&self.content);
            return;
        }

        let mut draft = Message::text(self.draft_id.clone(), Role::Assistant, self.content.clone(), now);
        draft.draft = true;
        log.push(draft);
    }

    /// Replace the draft with one finalized message per non-empty segment.
    /// Timestamps step forward per segment so re-sorting keeps the order.
    pub fn finish(self, log: &mut Vec<Message>, ids: &mut MessageIdClock, now: DateTime<Utc>) -> Vec<Message> {
        discard_draft(log, &self.draft_id);

        let finalized: Vec<Message> = split_reply(&self.content)
            .into_iter()
            .enumerate()
            .map(|(index, segment)| {
                let timestamp = now + self.segment_spacing * index as i32;
                Message::text(ids.next_id(now), Role::Assistant, segment, timestamp)
            })
            .collect();

        log.extend(finalized.iter().cloned());
        finalized
    }

    /// Drop the draft and append a visible error message instead.
    pub fn fail(
        self,
        log: &mut Vec<Message>,
        error: &CompletionError,
        ids: &mut MessageIdClock,
        now: DateTime<Utc>,
    ) -> Message {
        discard_draft(log, &self.draft_id);
        let message = Message::text(ids.next_id(now), Role::Assistant, error_message_content(error), now);
        log.push(message.clone());
        message
    }
}

fn discard_draft(log: &mut Vec<Message>, draft_id: &str) {
    log.retain(|m| !(m.is_draft() && m.id == draft_id));
}
