//! Speech-to-text providers.

use crate::error::TranscriptionError;
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{AudioInput, CreateTranscriptionRequestArgs},
};
use async_trait::async_trait;
use tracing::debug;

/// Converts a recorded utterance into text.
///
/// An empty string means nothing intelligible was said; callers must not
/// start a reply for it.
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, TranscriptionError>;
}

/// Transcribes through a Whisper-compatible `audio/transcriptions` endpoint.
pub struct OpenAITranscriber {
    client: Client<OpenAIConfig>,
    model: String,
    /// The browser records `audio/webm`; the endpoint sniffs the container
    /// from the file name.
    filename: String,
}

impl OpenAITranscriber {
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            filename: "speech.webm".to_string(),
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }
}

#[async_trait]
impl TranscriptionProvider for OpenAITranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, TranscriptionError> {
        if audio.is_empty() {
            return Ok(String::new());
        }
        let request = CreateTranscriptionRequestArgs::default()
            .file(AudioInput::from_vec_u8(self.filename.clone(), audio.to_vec()))
            .model(&self.model)
            .build()?;

        let response = self.client.audio().transcribe(request).await?;
        debug!(bytes = audio.len(), "Transcription completed");
        Ok(response.text.trim().to_string())
    }
}

/// Returns a fixed transcript for any non-empty recording.
pub struct MockTranscriber {
    transcript: String,
}

impl MockTranscriber {
    pub fn new(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
        }
    }
}

#[async_trait]
impl TranscriptionProvider for MockTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, TranscriptionError> {
        if audio.is_empty() {
            return Ok(String::new());
        }
        Ok(self.transcript.clone())
    }
}
