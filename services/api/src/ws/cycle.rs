//! Contains the logic for a single relay turn.
//!
//! One inbound message is decoded, transcribed if it is audio, answered by
//! the session's generation provider as a live stream of chunks, closed with
//! an emotion-tagged terminator, and finally spoken by the synthesizer.

use super::{
    manager::Session,
    protocol::{Envelope, InboundMessage},
    session::{EnvelopeSink, TransportError},
};
use crate::models::TurnPhase;
use futures_util::StreamExt;
use nova_core::{
    error::{GenerationError, SynthesisError, TranscriptionError},
    heuristics::ReplyHeuristics,
    synthesis::SynthesisProvider,
    transcription::TranscriptionProvider,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

/// The shared, stateless collaborators every turn uses. The generation
/// provider is per session and lives on `Session` instead.
pub struct Pipeline {
    pub transcriber: Arc<dyn TranscriptionProvider>,
    pub synthesizer: Arc<dyn SynthesisProvider>,
    pub heuristics: ReplyHeuristics,
    /// Bound on each provider call, and on the wait for each reply fragment.
    pub provider_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Malformed or empty input. Nothing was sent.
    Ignored,
    /// Every stage ran.
    Completed,
    /// Generation failed part way; a diagnostic fragment was sent and the
    /// rest of the turn still ran.
    Degraded,
    /// Transcription or synthesis failed and the turn stopped early.
    Aborted,
}

async fn with_timeout<T, E>(
    limit: Duration,
    call: impl Future<Output = Result<T, E>>,
    on_timeout: fn(Duration) -> E,
) -> Result<T, E> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(on_timeout(limit)))
}

/// Handles one inbound message end to end.
///
/// Provider failures are contained here and reported through `TurnOutcome`;
/// only a failure to send to the client is returned as an error.
pub async fn handle_turn<S>(
    pipeline: &Pipeline,
    session: &mut Session,
    raw: &str,
    sink: &mut S,
) -> Result<TurnOutcome, TransportError>
where
    S: EnvelopeSink + ?Sized,
{
    let outcome = run_turn(pipeline, session, raw, sink).await;
    session.set_phase(TurnPhase::AwaitingInput);
    if matches!(
        outcome,
        Ok(TurnOutcome::Completed | TurnOutcome::Degraded | TurnOutcome::Aborted)
    ) {
        session.complete_turn();
    }
    outcome
}

async fn run_turn<S>(
    pipeline: &Pipeline,
    session: &mut Session,
    raw: &str,
    sink: &mut S,
) -> Result<TurnOutcome, TransportError>
where
    S: EnvelopeSink + ?Sized,
{
    let inbound = match InboundMessage::decode(raw) {
        Ok(inbound) => inbound,
        Err(e) => {
            warn!(error = %e, "Dropping malformed inbound message");
            return Ok(TurnOutcome::Ignored);
        }
    };
    debug!(format = %inbound.format(), "Inbound message accepted");

    let text = match inbound {
        InboundMessage::Text(text) => {
            if text.trim().is_empty() {
                debug!("Ignoring empty text message");
                return Ok(TurnOutcome::Ignored);
            }
            text
        }
        InboundMessage::Audio(audio) => {
            session.set_phase(TurnPhase::Transcribing);
            let transcribed = with_timeout(
                pipeline.provider_timeout,
                pipeline.transcriber.transcribe(&audio),
                TranscriptionError::Timeout,
            )
            .await;
            let text = match transcribed {
                Ok(text) => text,
                Err(e) => {
                    error!(error = %e, bytes = audio.len(), "Transcription failed");
                    return Ok(TurnOutcome::Aborted);
                }
            };
            if text.trim().is_empty() {
                info!(bytes = audio.len(), "No speech recognized; waiting for next message");
                return Ok(TurnOutcome::Ignored);
            }
            info!(text = %text, "Recognized speech");
            sink.send_envelope(Envelope::user_transcript(text.as_str())).await?;
            text
        }
    };

    // The provider records the user turn before it opens the stream.
    let mut fragments = session.generator_mut().stream_reply(&text);
    session.set_phase(TurnPhase::Generating);
    let mut reply = String::new();
    let mut failure = None;
    loop {
        match tokio::time::timeout(pipeline.provider_timeout, fragments.next()).await {
            Ok(Some(Ok(fragment))) => {
                if fragment.is_empty() {
                    continue;
                }
                reply.push_str(&fragment);
                sink.send_envelope(Envelope::reply_chunk(fragment)).await?;
            }
            Ok(Some(Err(e))) => {
                failure = Some(e);
                break;
            }
            Ok(None) => break,
            Err(_) => {
                failure = Some(GenerationError::Timeout(pipeline.provider_timeout));
                break;
            }
        }
    }
    drop(fragments);

    let generated_len = reply.len();
    if let Some(e) = &failure {
        error!(error = %e, received = generated_len, "Reply generation failed");
        let diagnostic = format!("\n[generation error: {e}]");
        reply.push_str(&diagnostic);
        sink.send_envelope(Envelope::reply_chunk(diagnostic)).await?;
    }

    let emotion = (pipeline.heuristics.extract_emotion)(&reply);
    sink.send_envelope(Envelope::turn_complete(emotion)).await?;
    session.generator_mut().record_reply(&reply[..generated_len]);
    info!(chars = reply.chars().count(), emotion = ?emotion, "Reply streamed");

    let finished = if failure.is_some() {
        TurnOutcome::Degraded
    } else {
        TurnOutcome::Completed
    };

    session.set_phase(TurnPhase::Synthesizing);
    let language = (pipeline.heuristics.detect_language)(&reply);
    let cleaned = (pipeline.heuristics.strip_markup)(&reply);
    let speech = cleaned.trim();
    if speech.is_empty() {
        debug!("Reply has nothing to speak; skipping synthesis");
        return Ok(finished);
    }

    let synthesized = with_timeout(
        pipeline.provider_timeout,
        pipeline.synthesizer.synthesize(speech, language),
        SynthesisError::Timeout,
    )
    .await;
    let audio = match synthesized {
        Ok(audio) => audio,
        Err(e) => {
            error!(error = %e, language = %language, "Speech synthesis failed");
            return Ok(TurnOutcome::Aborted);
        }
    };
    debug!(bytes = audio.len(), language = %language, "Sending synthesized voice");
    sink.send_envelope(Envelope::voice(audio)).await?;

    Ok(finished)
}
