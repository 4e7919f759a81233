//! Emotion tags embedded in generated replies.
//!
//! The system prompt asks the model to place markers such as `[emo:happy]`
//! inside its reply. The avatar on the client reacts to the first recognised
//! marker, and the markers must never reach the speech synthesizer.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::LazyLock};
use thiserror::Error;

/// Matches a well-formed tag and captures its token.
static EMOTION_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[emo:([A-Za-z_]+)\]").expect("emotion tag pattern is valid")
});

/// Matches any tag-like markup, including unknown tokens and a marker that is
/// cut off at the end of the reply.
static EMOTION_MARKUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[emo:[^\]]*(?:\]|$)").expect("emotion markup pattern is valid")
});

/// The fixed vocabulary the client avatar understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Happy,
    Sad,
    Angry,
    Surprised,
    Wink,
    Blush,
}

impl Emotion {
    pub const ALL: [Emotion; 6] = [
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Surprised,
        Emotion::Wink,
        Emotion::Blush,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Surprised => "surprised",
            Emotion::Wink => "wink",
            Emotion::Blush => "blush",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown emotion '{0}'")]
pub struct UnknownEmotion(pub String);

impl FromStr for Emotion {
    type Err = UnknownEmotion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Emotion::ALL
            .into_iter()
            .find(|emotion| emotion.as_str() == s)
            .ok_or_else(|| UnknownEmotion(s.to_string()))
    }
}

/// Returns the first tag in `reply` whose token belongs to the vocabulary.
///
/// Tags with unknown tokens are skipped rather than ending the scan.
pub fn extract_emotion(reply: &str) -> Option<Emotion> {
    EMOTION_TAG
        .captures_iter(reply)
        .find_map(|caps| caps[1].parse::<Emotion>().ok())
}

/// Removes every `[emo:...]` marker from `reply`.
pub fn strip_emotion_tags(reply: &str) -> String {
    let mut cleaned = EMOTION_MARKUP.replace_all(reply, "").into_owned();
    // Removing one marker can splice two halves of another one together.
    while EMOTION_MARKUP.is_match(&cleaned) {
        cleaned = EMOTION_MARKUP.replace_all(&cleaned, "").into_owned();
    }
    cleaned
}
