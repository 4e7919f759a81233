//! NOVA API Library Crate
//!
//! This library contains the web service around the companion core: the
//! application state, REST handlers, WebSocket relay and routing. The `api`
//! binary is a thin wrapper around it.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
