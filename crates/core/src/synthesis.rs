//! Text-to-speech providers.

use crate::{error::SynthesisError, language::SpeechLanguage};
use anyhow::Context;
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{CreateSpeechRequestArgs, SpeechModel, SpeechResponseFormat, Voice},
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::{io::Cursor, path::PathBuf};
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Converts finished reply text into audio bytes.
#[async_trait]
pub trait SynthesisProvider: Send + Sync {
    /// One-time setup, run at startup before any session is accepted.
    async fn prepare_voice_profile(&self) -> Result<(), SynthesisError>;

    /// Synthesizes `text` spoken in `language`. May return an empty buffer.
    async fn synthesize(
        &self,
        text: &str,
        language: SpeechLanguage,
    ) -> Result<Vec<u8>, SynthesisError>;
}

/// Parses an API enum from its wire name, e.g. `"nova"` or `"tts-1-hd"`.
fn parse_wire_name<T: DeserializeOwned>(name: &str) -> anyhow::Result<T> {
    serde_json::from_value(serde_json::Value::String(name.to_string()))
        .with_context(|| format!("'{name}' is not a recognised value"))
}

/// Synthesizes through the OpenAI `audio/speech` endpoint, with one voice
/// per language.
pub struct OpenAISynthesizer {
    client: Client<OpenAIConfig>,
    model: SpeechModel,
    chinese_voice: Voice,
    english_voice: Voice,
}

impl OpenAISynthesizer {
    pub fn new(
        config: OpenAIConfig,
        model: &str,
        chinese_voice: &str,
        english_voice: &str,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::with_config(config),
            model: parse_wire_name(model).context("invalid speech model")?,
            chinese_voice: parse_wire_name(chinese_voice).context("invalid Chinese voice")?,
            english_voice: parse_wire_name(english_voice).context("invalid English voice")?,
        })
    }

    fn voice_for(&self, language: SpeechLanguage) -> Voice {
        match language {
            SpeechLanguage::Chinese => self.chinese_voice.clone(),
            SpeechLanguage::English => self.english_voice.clone(),
        }
    }
}

#[async_trait]
impl SynthesisProvider for OpenAISynthesizer {
    async fn prepare_voice_profile(&self) -> Result<(), SynthesisError> {
        info!(
            model = ?self.model,
            chinese_voice = ?self.chinese_voice,
            english_voice = ?self.english_voice,
            "Speech voices configured"
        );
        Ok(())
    }

    async fn synthesize(
        &self,
        text: &str,
        language: SpeechLanguage,
    ) -> Result<Vec<u8>, SynthesisError> {
        let request = CreateSpeechRequestArgs::default()
            .input(text)
            .model(self.model.clone())
            .voice(self.voice_for(language))
            .response_format(SpeechResponseFormat::Wav)
            .build()?;

        let response = self.client.audio().speech(request).await?;
        debug!(language = %language, bytes = response.bytes.len(), "Speech synthesized");
        Ok(response.bytes.to_vec())
    }
}

#[derive(Debug, Clone)]
enum ClipSource {
    File(PathBuf),
    Silence { millis: u32 },
}

/// Answers every request with the same pre-recorded clip.
///
/// The clip is read once in `prepare_voice_profile`; with no file configured
/// a short silent WAV is generated instead.
#[derive(Debug)]
pub struct StaticAudioSynthesizer {
    source: ClipSource,
    clip: OnceCell<Vec<u8>>,
}

impl StaticAudioSynthesizer {
    pub const SAMPLE_RATE: u32 = 24_000;

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: ClipSource::File(path.into()),
            clip: OnceCell::new(),
        }
    }

    pub fn silence(millis: u32) -> Self {
        Self {
            source: ClipSource::Silence { millis },
            clip: OnceCell::new(),
        }
    }
}

/// Mono 16-bit PCM WAV of `millis` milliseconds of silence.
pub fn silent_wav(sample_rate: u32, millis: u32) -> Result<Vec<u8>, SynthesisError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let wav_error = |e: hound::Error| SynthesisError::VoiceProfile(format!("wav encoding: {e}"));

    let samples = u64::from(sample_rate) * u64::from(millis) / 1000;
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(wav_error)?;
    for _ in 0..samples {
        writer.write_sample(0i16).map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)?;
    Ok(cursor.into_inner())
}

#[async_trait]
impl SynthesisProvider for StaticAudioSynthesizer {
    async fn prepare_voice_profile(&self) -> Result<(), SynthesisError> {
        let clip = match &self.source {
            ClipSource::File(path) => tokio::fs::read(path).await.map_err(|e| {
                SynthesisError::VoiceProfile(format!("cannot read {}: {e}", path.display()))
            })?,
            ClipSource::Silence { millis } => silent_wav(Self::SAMPLE_RATE, *millis)?,
        };
        info!(source = ?self.source, bytes = clip.len(), "Static voice clip loaded");
        // A second call keeps the clip from the first one.
        let _ = self.clip.set(clip);
        Ok(())
    }

    async fn synthesize(
        &self,
        _text: &str,
        _language: SpeechLanguage,
    ) -> Result<Vec<u8>, SynthesisError> {
        self.clip.get().cloned().ok_or_else(|| {
            SynthesisError::VoiceProfile("voice clip was never prepared".to_string())
        })
    }
}
