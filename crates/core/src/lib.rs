//! NOVA companion core: the speech and text providers a relay session drives,
//! plus the dialogue history and reply heuristics they share.

pub mod emotion;
pub mod error;
pub mod generation;
pub mod heuristics;
pub mod history;
pub mod language;
pub mod llm_client;
pub mod synthesis;
pub mod transcription;
