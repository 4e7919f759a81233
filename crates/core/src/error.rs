//! Error types for the three speech/text providers.
//!
//! Each provider gets its own error enum so the session loop can tell which
//! stage of a turn failed. None of these are fatal to a connection.

use async_openai::error::OpenAIError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranscriptionError {
    #[error("transcription API error: {0}")]
    Api(#[from] OpenAIError),

    #[error("transcription failed: {0}")]
    Upstream(String),

    #[error("transcription timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("generation API error: {0}")]
    Api(#[from] OpenAIError),

    #[error("generation failed: {0}")]
    Upstream(String),

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("synthesis API error: {0}")]
    Api(#[from] OpenAIError),

    #[error("synthesis failed: {0}")]
    Upstream(String),

    #[error("synthesis timed out after {0:?}")]
    Timeout(Duration),

    #[error("voice profile unavailable: {0}")]
    VoiceProfile(String),
}
