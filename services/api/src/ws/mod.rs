//! WebSocket Session Management
//!
//! This module contains the real-time relay behind `/ws/chat`:
//!
//! - `protocol`: The JSON envelope format exchanged with the browser.
//! - `manager`: Opens, tracks and closes per-connection sessions.
//! - `session`: The connection lifecycle and the per-session event loop.
//! - `cycle`: One turn, from inbound message to streamed reply and voice.

pub mod cycle;
pub mod manager;
pub mod protocol;
pub mod session;

pub use session::ws_handler;
