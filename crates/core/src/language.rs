//! Coarse language routing for speech synthesis and reply instructions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The two languages the companion speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechLanguage {
    Chinese,
    English,
}

impl SpeechLanguage {
    /// ISO 639-1 code, as expected by speech APIs.
    pub fn code(&self) -> &'static str {
        match self {
            SpeechLanguage::Chinese => "zh",
            SpeechLanguage::English => "en",
        }
    }
}

impl fmt::Display for SpeechLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeechLanguage::Chinese => f.write_str("Chinese"),
            SpeechLanguage::English => f.write_str("English"),
        }
    }
}

/// Han ideographs, kana and hangul syllables.
pub fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30FF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{AC00}'..='\u{D7AF}'
        | '\u{F900}'..='\u{FAFF}'
    )
}

/// Any CJK character routes to Chinese; everything else to English.
pub fn detect_language(text: &str) -> SpeechLanguage {
    if text.chars().any(is_cjk) {
        SpeechLanguage::Chinese
    } else {
        SpeechLanguage::English
    }
}
