//! Manages the WebSocket connection lifecycle for a relay session.

use super::{
    cycle::{self, Pipeline},
    manager::Session,
    protocol::Envelope,
};
use crate::state::AppState;
use async_trait::async_trait;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{
    SinkExt, Stream, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::{collections::VecDeque, sync::Arc};
use thiserror::Error;
use tracing::{Instrument, debug, error, info, instrument, warn};

/// Frames queued while a turn is still running. Text frames beyond this are
/// dropped; a close is still honoured.
const MAX_PENDING_MESSAGES: usize = 8;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("client disconnected")]
    Disconnected,

    #[error("websocket send failed: {0}")]
    WebSocket(#[from] axum::Error),
}

/// Where outbound envelopes go. Implemented for the websocket sink; tests use
/// an in-memory recorder.
#[async_trait]
pub trait EnvelopeSink: Send {
    async fn send_envelope(&mut self, envelope: Envelope) -> Result<(), TransportError>;
}

#[async_trait]
impl EnvelopeSink for SplitSink<WebSocket, Message> {
    async fn send_envelope(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        self.send(Message::Text(envelope.encode().into())).await?;
        Ok(())
    }
}

/// A client frame as the session loop sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Closed,
}

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Entry point for a new connection: opens a session, drives it until the
/// client goes away, then releases it.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let mut session = state.sessions.open().await;
    let session_id = session.id();
    tracing::Span::current().record("session_id", &session_id.to_string());
    info!("New WebSocket connection accepted.");

    let (mut socket_tx, socket_rx) = socket.split();
    let mut inbound = Box::pin(inbound_frames(socket_rx));

    let session_span = tracing::info_span!("companion_session", %session_id);
    let result = run_session_loop(&state.pipeline, &mut session, &mut inbound, &mut socket_tx)
        .instrument(session_span)
        .await;

    match result {
        Ok(()) => info!("Client disconnected."),
        Err(e) => error!(error = %e, "Session terminated with transport error."),
    }

    session.mark_closing();
    let _ = socket_tx.close().await;
    state.sessions.close(session).await;
}

/// Maps raw websocket messages onto `InboundFrame`s. Binary frames are not
/// part of the protocol and are dropped.
fn inbound_frames(
    socket_rx: SplitStream<WebSocket>,
) -> impl Stream<Item = InboundFrame> + Send {
    socket_rx.filter_map(|result| async move {
        match result {
            Ok(Message::Text(text)) => Some(InboundFrame::Text(text.as_str().to_owned())),
            Ok(Message::Binary(data)) => {
                warn!(
                    bytes = data.len(),
                    "Ignoring binary frame; audio must be sent as base64 JSON."
                );
                None
            }
            Ok(Message::Close(_)) => Some(InboundFrame::Closed),
            Ok(Message::Ping(_) | Message::Pong(_)) => None,
            Err(e) => {
                warn!(error = %e, "Error receiving from client WebSocket.");
                Some(InboundFrame::Closed)
            }
        }
    })
}

/// The main event loop of one session.
///
/// Turns run strictly one at a time. While a turn is in flight the loop keeps
/// reading the socket, so a close frame or disconnect cancels the turn at its
/// next await point. Text frames that arrive meanwhile are queued and
/// processed in order once the turn ends.
pub async fn run_session_loop<R, S>(
    pipeline: &Pipeline,
    session: &mut Session,
    inbound: &mut R,
    sink: &mut S,
) -> Result<(), TransportError>
where
    R: Stream<Item = InboundFrame> + Unpin + Send,
    S: EnvelopeSink + ?Sized,
{
    let mut pending: VecDeque<String> = VecDeque::new();

    loop {
        let raw = match pending.pop_front() {
            Some(raw) => raw,
            None => match inbound.next().await {
                Some(InboundFrame::Text(raw)) => raw,
                Some(InboundFrame::Closed) | None => return Ok(()),
            },
        };

        let finished = {
            let turn = cycle::handle_turn(pipeline, session, &raw, sink);
            tokio::pin!(turn);
            loop {
                tokio::select! {
                    biased;
                    outcome = &mut turn => break Some(outcome),
                    frame = inbound.next() => match frame {
                        Some(InboundFrame::Text(next)) if pending.len() < MAX_PENDING_MESSAGES => {
                            pending.push_back(next);
                        }
                        Some(InboundFrame::Text(_)) => {
                            warn!(
                                limit = MAX_PENDING_MESSAGES,
                                "Pending queue is full; dropping inbound message."
                            );
                        }
                        Some(InboundFrame::Closed) | None => break None,
                    },
                }
            }
        };

        match finished {
            Some(Ok(outcome)) => debug!(?outcome, queued = pending.len(), "Turn finished."),
            Some(Err(e)) => return Err(e),
            None => {
                info!("Client left mid-turn; abandoning the reply.");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SessionStatus, TurnPhase};
    use crate::ws::{
        cycle::tests::{
            FixedTranscriber, RecordingSink, RecordingSynthesizer, ScriptedFactory, Step,
        },
        manager::SessionManager,
        protocol::Format,
    };
    use nova_core::heuristics::ReplyHeuristics;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    fn pipeline() -> Pipeline {
        Pipeline {
            transcriber: Arc::new(FixedTranscriber(Ok("unused"))),
            synthesizer: Arc::new(RecordingSynthesizer::default()),
            heuristics: ReplyHeuristics::default(),
            provider_timeout: Duration::from_millis(200),
        }
    }

    fn text(content: &str) -> InboundFrame {
        InboundFrame::Text(format!(r#"{{"format":"text","content":"{content}"}}"#))
    }

    fn scripted(script: Vec<Step>) -> SessionManager {
        SessionManager::new(Arc::new(ScriptedFactory::new(script)))
    }

    #[tokio::test]
    async fn test_turns_are_processed_in_arrival_order() {
        let manager = scripted(vec![Step::Fragment("ok")]);
        let mut session = manager.open().await;
        let (tx, rx) = mpsc::channel(16);
        let mut inbound = ReceiverStream::new(rx);
        let mut sink = RecordingSink::default();

        for frame in [text("one"), InboundFrame::Text("garbage".into()), text("two")] {
            tx.send(frame).await.unwrap();
        }
        drop(tx);

        run_session_loop(&pipeline(), &mut session, &mut inbound, &mut sink)
            .await
            .unwrap();

        // Two answered turns of chunk, terminator, voice; the garbage is dropped.
        let formats: Vec<Format> = sink.sent.iter().map(|e| e.format()).collect();
        assert_eq!(
            formats,
            vec![
                Format::TextChunk,
                Format::Text,
                Format::Audio,
                Format::TextChunk,
                Format::Text,
                Format::Audio,
            ]
        );
        let questions: Vec<&str> = session
            .history()
            .turns()
            .step_by(2)
            .map(|t| t.content.as_str())
            .collect();
        assert_eq!(questions, vec!["one", "two"]);
        assert_eq!(manager.get(session.id()).await.unwrap().turns, 2);
    }

    #[tokio::test]
    async fn test_disconnect_mid_turn_cancels_reply() {
        let manager = scripted(vec![Step::Fragment("Thinking"), Step::Stall]);
        let mut session = manager.open().await;
        let (tx, rx) = mpsc::channel(16);
        let mut inbound = ReceiverStream::new(rx);
        let mut sink = RecordingSink::default();
        let mut pipeline = pipeline();
        pipeline.provider_timeout = Duration::from_secs(30);

        tx.send(text("Hi")).await.unwrap();
        let closer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(InboundFrame::Closed).await.unwrap();
        });

        tokio::time::timeout(
            Duration::from_secs(5),
            run_session_loop(&pipeline, &mut session, &mut inbound, &mut sink),
        )
        .await
        .expect("loop should stop on disconnect")
        .unwrap();
        closer.await.unwrap();

        // The partial chunk went out but no terminator or voice followed.
        assert_eq!(sink.sent.len(), 1);
        assert_eq!(sink.sent[0].format(), Format::TextChunk);
        // The unanswered question is kept; no partial reply is recorded.
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn test_close_honoured_when_queue_is_full() {
        let factory = ScriptedFactory::new(vec![Step::Fragment("Thinking"), Step::Stall]);
        let observed = Arc::clone(&factory.observed);
        let manager = SessionManager::new(Arc::new(factory));
        let mut session = manager.open().await;
        let (tx, rx) = mpsc::channel(32);
        let mut inbound = ReceiverStream::new(rx);
        let mut sink = RecordingSink::default();
        let mut pipeline = pipeline();
        pipeline.provider_timeout = Duration::from_secs(30);

        tx.send(text("first")).await.unwrap();
        for n in 0..MAX_PENDING_MESSAGES + 4 {
            tx.send(text(&format!("queued {n}"))).await.unwrap();
        }
        tx.send(InboundFrame::Closed).await.unwrap();

        tokio::time::timeout(
            Duration::from_secs(5),
            run_session_loop(&pipeline, &mut session, &mut inbound, &mut sink),
        )
        .await
        .expect("close behind a full queue should end the session")
        .unwrap();

        // Only the first message reached the provider; the backlog was abandoned.
        assert_eq!(observed.lock().unwrap().requests.len(), 1);
        assert_eq!(sink.sent.len(), 1);
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn test_queue_keeps_earliest_messages_when_full() {
        let factory = ScriptedFactory::new(vec![Step::Pause(20), Step::Fragment("ok")]);
        let observed = Arc::clone(&factory.observed);
        let manager = SessionManager::new(Arc::new(factory));
        let mut session = manager.open().await;
        let id = session.id();
        let (tx, rx) = mpsc::channel(32);
        let mut inbound = ReceiverStream::new(rx);
        let mut sink = RecordingSink::default();

        let backlog = MAX_PENDING_MESSAGES + 3;
        for n in 0..=backlog {
            tx.send(text(&format!("q{n}"))).await.unwrap();
        }

        // The whole backlog is read while the first turn is still paused.
        let expected_turns = (MAX_PENDING_MESSAGES + 1) as u64;
        let closer = async {
            tokio::time::timeout(Duration::from_secs(5), async {
                while manager.get(id).await.unwrap().turns < expected_turns {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("queued turns never finished");
            tx.send(InboundFrame::Closed).await.unwrap();
        };
        let pipeline = pipeline();
        let (result, ()) = tokio::join!(
            run_session_loop(&pipeline, &mut session, &mut inbound, &mut sink),
            closer
        );
        result.unwrap();

        let asked: Vec<String> = observed
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter_map(|history| history.last().map(|turn| turn.content.clone()))
            .collect();
        let expected: Vec<String> = (0..=MAX_PENDING_MESSAGES)
            .map(|n| format!("q{n}"))
            .collect();
        assert_eq!(asked, expected);
    }

    #[tokio::test]
    async fn test_phase_visible_to_manager_mid_turn() {
        let manager = scripted(vec![Step::Fragment("Thinking"), Step::Stall]);
        let mut session = manager.open().await;
        let id = session.id();
        let (tx, rx) = mpsc::channel(16);
        let mut inbound = ReceiverStream::new(rx);
        let mut sink = RecordingSink::default();
        let mut pipeline = pipeline();
        pipeline.provider_timeout = Duration::from_secs(30);

        tx.send(text("Hi")).await.unwrap();

        let watcher = async {
            let seen = tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    let info = manager.get(id).await.unwrap();
                    if info.phase == TurnPhase::Generating {
                        break info;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("generating phase never became visible");
            tx.send(InboundFrame::Closed).await.unwrap();
            seen
        };
        let (result, seen) = tokio::join!(
            run_session_loop(&pipeline, &mut session, &mut inbound, &mut sink),
            watcher
        );
        result.unwrap();

        assert_eq!(seen.status, SessionStatus::Active);
        assert_eq!(seen.turns, 0);
        assert_eq!(seen.history_len, 1);
    }

    #[tokio::test]
    async fn test_transport_failure_ends_loop() {
        let manager = scripted(vec![Step::Fragment("ok")]);
        let mut session = manager.open().await;
        let (tx, rx) = mpsc::channel(16);
        let mut inbound = ReceiverStream::new(rx);
        let mut sink = RecordingSink {
            limit: Some(0),
            ..Default::default()
        };

        tx.send(text("Hi")).await.unwrap();
        tx.send(text("again")).await.unwrap();

        let result = run_session_loop(&pipeline(), &mut session, &mut inbound, &mut sink).await;
        assert!(matches!(result, Err(TransportError::Disconnected)));
        assert!(sink.sent.is_empty());
    }

    #[tokio::test]
    async fn test_mark_closing_then_close() {
        let manager = scripted(vec![]);
        let mut session = manager.open().await;
        session.mark_closing();
        assert_eq!(
            manager.get(session.id()).await.unwrap().status,
            SessionStatus::Closing
        );
        let info = manager.close(session).await;
        assert_eq!(info.status, SessionStatus::Closed);
        assert!(manager.is_empty().await);
    }
}
