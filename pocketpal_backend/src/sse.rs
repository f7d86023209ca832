//! Incremental decoding of `text/event-stream` chat completion bodies.
//!
//! Bytes are buffered until a full line is available, so multi-byte
//! characters split across network chunks are only decoded once complete.

use serde_json::Value;

const DATA_PREFIX: &str = "data: ";
const DONE_TOKEN: &str = "[DONE]";

/// What a single event line contributes to the reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Delta(String),
    Done,
    Skip,
}

/// Classify one (untrimmed) line of the stream.
pub fn parse_data_line(line: &str) -> LineOutcome {
    let trimmed = line.trim();
    let Some(payload) = trimmed.strip_prefix(DATA_PREFIX) else {
        return LineOutcome::Skip;
    };
    if payload == DONE_TOKEN {
        return LineOutcome::Done;
    }

    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!("Skipping malformed stream line: {}", e);
            return LineOutcome::Skip;
        }
    };

    match value["choices"][0]["delta"]["content"].as_str() {
        Some(token) if !token.is_empty() => LineOutcome::Delta(token.to_string()),
        _ => LineOutcome::Skip,
    }
}

/// Splits a byte stream into complete lines across chunk boundaries.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns every line completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            lines.push(String::from_utf8_lossy(&self.pending[start..end]).into_owned());
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// Flush a trailing line that was never newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Line decoder plus delta extraction; yields text fragments only.
#[derive(Debug, Default)]
pub struct DeltaDecoder {
    lines: SseDecoder,
}

impl DeltaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.lines
            .push(chunk)
            .iter()
            .filter_map(|line| into_delta(parse_data_line(line)))
            .collect()
    }

    pub fn finish(&mut self) -> Option<String> {
        self.lines
            .finish()
            .and_then(|line| into_delta(parse_data_line(&line)))
    }
}

fn into_delta(outcome: LineOutcome) -> Option<String> {
    match outcome {
        LineOutcome::Delta(text) => Some(text),
        LineOutcome::Done | LineOutcome::Skip => None,
    }
}
