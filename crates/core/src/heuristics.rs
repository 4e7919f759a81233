use crate::{
    emotion::{self, Emotion},
    language::{self, SpeechLanguage},
};

/// The text heuristics applied to a finished reply.
///
/// Each field is a plain function so a different classifier can be dropped in
/// without touching the session loop.
#[derive(Debug, Clone, Copy)]
pub struct ReplyHeuristics {
    pub extract_emotion: fn(&str) -> Option<Emotion>,
    pub strip_markup: fn(&str) -> String,
    pub detect_language: fn(&str) -> SpeechLanguage,
}

impl Default for ReplyHeuristics {
    fn default() -> Self {
        Self {
            extract_emotion: emotion::extract_emotion,
            strip_markup: emotion::strip_emotion_tags,
            detect_language: language::detect_language,
        }
    }
}
