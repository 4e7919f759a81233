//! Defines the WebSocket message protocol between the browser client and the relay.
//!
//! Inbound frames carry `{format, content}`. Outbound frames are `Envelope`s:
//! `{sender, type, format, time, content, live2d_emotion?}`. Binary payloads
//! always travel as standard base64 text.

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::Utc;
use nova_core::emotion::Emotion;
use serde::{Deserialize, Serialize, Serializer};
use std::{borrow::Cow, fmt};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed input: {0}")]
pub struct MalformedInput(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

/// The envelope `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Message,
    Voice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    Text,
    TextChunk,
    Audio,
}

impl Format {
    fn carries_audio(self) -> bool {
        matches!(self, Format::Audio)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Text => f.write_str("text"),
            Format::TextChunk => f.write_str("text_chunk"),
            Format::Audio => f.write_str("audio"),
        }
    }
}

/// A message sent from the client (browser) to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Text(String),
    Audio(Vec<u8>),
}

/// Only the two required fields; anything else the browser adds is ignored.
#[derive(Deserialize)]
struct InboundWire {
    format: String,
    content: String,
}

/// Decodes base64, tolerating a `data:<mime>;base64,` prefix.
fn decode_base64(encoded: &str) -> Result<Vec<u8>, MalformedInput> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    };
    STANDARD
        .decode(payload.trim())
        .map_err(|e| MalformedInput(format!("audio content is not valid base64: {e}")))
}

impl InboundMessage {
    pub fn decode(raw: &str) -> Result<Self, MalformedInput> {
        let wire: InboundWire =
            serde_json::from_str(raw).map_err(|e| MalformedInput(e.to_string()))?;
        match wire.format.as_str() {
            "text" => Ok(Self::Text(wire.content)),
            "audio" => decode_base64(&wire.content).map(Self::Audio),
            other => Err(MalformedInput(format!("unsupported inbound format '{other}'"))),
        }
    }

    pub fn format(&self) -> Format {
        match self {
            Self::Text(_) => Format::Text,
            Self::Audio(_) => Format::Audio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Audio(Vec<u8>),
}

/// One outbound message. Constructed only through checked constructors, so
/// `format` and the content type always agree.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "EnvelopeWire<'static>")]
pub struct Envelope {
    sender: Sender,
    kind: Kind,
    format: Format,
    time: String,
    content: Content,
    emotion: Option<Emotion>,
}

/// Seconds since the Unix epoch with a microsecond fraction.
pub fn timestamp_now() -> String {
    let now = Utc::now();
    format!("{}.{:06}", now.timestamp(), now.timestamp_subsec_micros())
}

/// The envelope as it appears on the wire, with audio as base64 text.
#[derive(Serialize, Deserialize)]
struct EnvelopeWire<'a> {
    sender: Sender,
    #[serde(rename = "type")]
    kind: Kind,
    format: Format,
    time: Cow<'a, str>,
    content: Cow<'a, str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    live2d_emotion: Option<Emotion>,
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let content = match &self.content {
            Content::Text(text) => Cow::Borrowed(text.as_str()),
            Content::Audio(bytes) => Cow::Owned(STANDARD.encode(bytes)),
        };
        EnvelopeWire {
            sender: self.sender,
            kind: self.kind,
            format: self.format,
            time: Cow::Borrowed(&self.time),
            content,
            live2d_emotion: self.emotion,
        }
        .serialize(serializer)
    }
}

impl TryFrom<EnvelopeWire<'static>> for Envelope {
    type Error = MalformedInput;

    fn try_from(wire: EnvelopeWire<'static>) -> Result<Self, Self::Error> {
        let content = if wire.format.carries_audio() {
            Content::Audio(decode_base64(&wire.content)?)
        } else {
            Content::Text(wire.content.into_owned())
        };
        Self::new(
            wire.sender,
            wire.kind,
            wire.format,
            wire.time.into_owned(),
            content,
            wire.live2d_emotion,
        )
    }
}

impl Envelope {
    pub fn new(
        sender: Sender,
        kind: Kind,
        format: Format,
        time: String,
        content: Content,
        emotion: Option<Emotion>,
    ) -> Result<Self, MalformedInput> {
        let is_audio = matches!(content, Content::Audio(_));
        if format.carries_audio() != is_audio {
            return Err(MalformedInput(format!(
                "format '{format}' does not match its content"
            )));
        }
        Ok(Self {
            sender,
            kind,
            format,
            time,
            content,
            emotion,
        })
    }

    /// Echo of what the recognizer understood.
    pub fn user_transcript(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::User,
            kind: Kind::Message,
            format: Format::Text,
            time: timestamp_now(),
            content: Content::Text(text.into()),
            emotion: None,
        }
    }

    pub fn reply_chunk(fragment: impl Into<String>) -> Self {
        Self {
            sender: Sender::Ai,
            kind: Kind::Message,
            format: Format::TextChunk,
            time: timestamp_now(),
            content: Content::Text(fragment.into()),
            emotion: None,
        }
    }

    /// Empty text message that closes a streamed reply.
    pub fn turn_complete(emotion: Option<Emotion>) -> Self {
        Self {
            sender: Sender::Ai,
            kind: Kind::Message,
            format: Format::Text,
            time: timestamp_now(),
            content: Content::Text(String::new()),
            emotion,
        }
    }

    pub fn voice(audio: Vec<u8>) -> Self {
        Self {
            sender: Sender::Ai,
            kind: Kind::Voice,
            format: Format::Audio,
            time: timestamp_now(),
            content: Content::Audio(audio),
            emotion: None,
        }
    }

    pub fn sender(&self) -> Sender {
        self.sender
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn time(&self) -> &str {
        &self.time
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    /// The text content, or `None` for audio.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            Content::Text(text) => Some(text),
            Content::Audio(_) => None,
        }
    }

    pub fn emotion(&self) -> Option<Emotion> {
        self.emotion
    }

    /// Serializes to the wire form. Every field is a string or a unit enum,
    /// so this cannot fail.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("envelope fields always serialize")
    }

    pub fn decode(raw: &str) -> Result<Self, MalformedInput> {
        serde_json::from_str(raw).map_err(|e| MalformedInput(e.to_string()))
    }
}
