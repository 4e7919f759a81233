//! API Models
//!
//! Bookkeeping data structures exposed over the REST API and documented with
//! `utoipa`. Sessions live only in memory; nothing here is persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle of a relay session.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Closing,
    Closed,
}

/// Where a session's turn pipeline currently is.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    AwaitingInput,
    Transcribing,
    Generating,
    Synthesizing,
}

// Implement Display for easy conversion to a string, useful for logging.
impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnPhase::AwaitingInput => write!(f, "awaiting_input"),
            TurnPhase::Transcribing => write!(f, "transcribing"),
            TurnPhase::Generating => write!(f, "generating"),
            TurnPhase::Synthesizing => write!(f, "synthesizing"),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct SessionInfo {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    #[schema(value_type = String, example = "active")]
    pub status: SessionStatus,
    #[schema(value_type = String, example = "awaiting_input")]
    pub phase: TurnPhase,
    /// Completed turns since the connection opened.
    pub turns: u64,
    /// Messages currently held in the dialogue history.
    pub history_len: usize,
    pub connected_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    pub live_sessions: usize,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
