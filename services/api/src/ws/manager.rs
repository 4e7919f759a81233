//! Tracks the live relay sessions.
//!
//! Every connection gets its own `Session` with a dedicated generation
//! provider. The `Session` itself is owned by the connection's task; the
//! manager only holds a snapshot that the session republishes on every
//! phase, status or turn change.

use crate::models::{SessionInfo, SessionStatus, TurnPhase};
use chrono::{DateTime, Utc};
use nova_core::{
    generation::{GenerationFactory, GenerationProvider},
    history::DialogueHistory,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// A session's latest snapshot, written by its task and read by the manager.
type SharedInfo = Arc<Mutex<SessionInfo>>;

fn lock_info(shared: &SharedInfo) -> MutexGuard<'_, SessionInfo> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read_info(shared: &SharedInfo) -> SessionInfo {
    lock_info(shared).clone()
}

pub struct Session {
    id: Uuid,
    status: SessionStatus,
    phase: TurnPhase,
    generator: Box<dyn GenerationProvider>,
    connected_at: DateTime<Utc>,
    turns: u64,
    published: SharedInfo,
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn turns(&self) -> u64 {
        self.turns
    }

    pub fn history(&self) -> &DialogueHistory {
        self.generator.history()
    }

    pub(crate) fn generator_mut(&mut self) -> &mut dyn GenerationProvider {
        self.generator.as_mut()
    }

    pub(crate) fn set_phase(&mut self, phase: TurnPhase) {
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "Turn phase changed");
            self.phase = phase;
            self.publish();
        }
    }

    pub(crate) fn mark_closing(&mut self) {
        if self.status == SessionStatus::Active {
            self.status = SessionStatus::Closing;
            self.publish();
        }
    }

    pub(crate) fn complete_turn(&mut self) {
        self.turns += 1;
        self.publish();
    }

    fn publish(&self) {
        let info = self.info();
        *lock_info(&self.published) = info;
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            status: self.status,
            phase: self.phase,
            turns: self.turns,
            history_len: self.generator.history().len(),
            connected_at: self.connected_at,
        }
    }
}

pub struct SessionManager {
    factory: Arc<dyn GenerationFactory>,
    live: RwLock<HashMap<Uuid, SharedInfo>>,
}

impl SessionManager {
    pub fn new(factory: Arc<dyn GenerationFactory>) -> Self {
        Self {
            factory,
            live: RwLock::new(HashMap::new()),
        }
    }

    /// Allocates a session with empty history and its own generation provider.
    pub async fn open(&self) -> Session {
        let id = Uuid::new_v4();
        let generator = self.factory.create();
        let info = SessionInfo {
            id,
            status: SessionStatus::Active,
            phase: TurnPhase::AwaitingInput,
            turns: 0,
            history_len: generator.history().len(),
            connected_at: Utc::now(),
        };
        let published = Arc::new(Mutex::new(info.clone()));
        let session = Session {
            id,
            status: info.status,
            phase: info.phase,
            generator,
            connected_at: info.connected_at,
            turns: 0,
            published: Arc::clone(&published),
        };
        let mut live = self.live.write().await;
        live.insert(id, published);
        info!(session_id = %id, live_sessions = live.len(), "Session opened");
        session
    }

    /// Removes the session from the live set and releases its generation
    /// provider. Returns the final snapshot.
    pub async fn close(&self, mut session: Session) -> SessionInfo {
        session.status = SessionStatus::Closing;
        let remaining = {
            let mut live = self.live.write().await;
            live.remove(&session.id);
            live.len()
        };
        session.status = SessionStatus::Closed;
        let info = session.info();
        drop(session);
        info!(
            session_id = %info.id,
            turns = info.turns,
            live_sessions = remaining,
            "Session closed"
        );
        info
    }

    /// Live sessions, oldest first.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.live.read().await.values().map(read_info).collect();
        sessions.sort_by_key(|info| info.connected_at);
        sessions
    }

    pub async fn get(&self, id: Uuid) -> Option<SessionInfo> {
        self.live.read().await.get(&id).map(read_info)
    }

    pub async fn len(&self) -> usize {
        self.live.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.live.read().await.is_empty()
    }
}
