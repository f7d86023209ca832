//! Client for the speech-to-text endpoint behind voice messages.

use std::time::Duration;

use serde::Deserialize;

/// Recordings smaller than this are treated as accidental taps.
pub const MIN_AUDIO_BYTES: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranscriptionError {
    #[error("转录失败: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    pub duration_secs: u32,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    #[serde(default)]
    text: Option<String>,
}

/// Whole seconds, rounded, never less than one.
pub fn rounded_duration_secs(elapsed: Duration) -> u32 {
    let secs = (elapsed.as_millis() + 500) / 1000;
    u32::try_from(secs).unwrap_or(u32::MAX).max(1)
}

pub struct TranscriptionClient {
    client: reqwest::Client,
    url: String,
}

impl TranscriptionClient {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Upload a finished recording. Tiny payloads and responses without
    /// text yield `Ok(None)`.
    pub async fn transcribe(
        &self,
        audio: Vec<u8>,
        elapsed: Duration,
    ) -> Result<Option<Transcript>, TranscriptionError> {
        if audio.len() < MIN_AUDIO_BYTES {
            tracing::debug!("Skipping {} byte recording", audio.len());
            return Ok(None);
        }
        let duration_secs = rounded_duration_secs(elapsed);

        let part = reqwest::multipart::Part::bytes(audio).file_name("recording.webm");
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TranscriptionError::Failed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("Transcription endpoint returned {}: {}", status, body);
            return Err(TranscriptionError::Failed(status.to_string()));
        }

        let parsed: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| TranscriptionError::Failed(e.to_string()))?;

        Ok(parsed
            .text
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .map(|text| Transcript { text, duration_secs }))
    }
}
