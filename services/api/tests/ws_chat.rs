//! Drives the relay end to end over a real websocket with the offline providers.

use base64::{Engine, engine::general_purpose::STANDARD};
use futures_util::{SinkExt, StreamExt};
use nova_api::{
    router::create_router,
    state::AppState,
    ws::{
        cycle::Pipeline,
        manager::SessionManager,
        protocol::{Content, Envelope, Format, Kind, Sender},
    },
};
use nova_core::{
    emotion::Emotion,
    generation::CompanionFactory,
    heuristics::ReplyHeuristics,
    llm_client::EchoLLMClient,
    synthesis::{StaticAudioSynthesizer, SynthesisProvider, silent_wav},
    transcription::MockTranscriber,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLIP_MILLIS: u32 = 20;

async fn spawn_server() -> (SocketAddr, Arc<AppState>) {
    let synthesizer = StaticAudioSynthesizer::silence(CLIP_MILLIS);
    synthesizer.prepare_voice_profile().await.unwrap();

    let state = Arc::new(AppState {
        sessions: Arc::new(SessionManager::new(Arc::new(CompanionFactory::new(
            Arc::new(EchoLLMClient),
            Arc::new("You are NOVA.".to_string()),
            10,
        )))),
        pipeline: Arc::new(Pipeline {
            transcriber: Arc::new(MockTranscriber::new("Hello, this is a test.")),
            synthesizer: Arc::new(synthesizer),
            heuristics: ReplyHeuristics::default(),
            provider_timeout: Duration::from_secs(5),
        }),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/ws/chat")).await.unwrap();
    client
}

async fn next_envelope(client: &mut Client) -> Envelope {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for the relay")
            .expect("connection ended")
            .unwrap();
        if let Message::Text(text) = message {
            return Envelope::decode(text.as_str()).unwrap();
        }
    }
}

/// Reads one reply: every chunk up to and including the terminator.
async fn read_reply(client: &mut Client) -> (String, Envelope) {
    let mut reply = String::new();
    loop {
        let envelope = next_envelope(client).await;
        assert_eq!(envelope.sender(), Sender::Ai);
        match envelope.format() {
            Format::TextChunk => reply.push_str(envelope.text().unwrap()),
            Format::Text => return (reply, envelope),
            Format::Audio => panic!("voice arrived before the reply was complete"),
        }
    }
}

#[tokio::test]
async fn test_text_message_round_trip() {
    let (addr, _state) = spawn_server().await;
    let mut client = connect(addr).await;

    client
        .send(Message::Text(r#"{"format":"text","content":"Hi NOVA"}"#.into()))
        .await
        .unwrap();

    let (reply, terminator) = read_reply(&mut client).await;
    assert_eq!(reply, "You said: Hi NOVA [emo:happy]");
    assert_eq!(terminator.text(), Some(""));
    assert_eq!(terminator.emotion(), Some(Emotion::Happy));

    let voice = next_envelope(&mut client).await;
    assert_eq!(voice.kind(), Kind::Voice);
    assert_eq!(
        voice.content(),
        &Content::Audio(silent_wav(StaticAudioSynthesizer::SAMPLE_RATE, CLIP_MILLIS).unwrap())
    );
}

#[tokio::test]
async fn test_audio_message_echoes_transcript_first() {
    let (addr, _state) = spawn_server().await;
    let mut client = connect(addr).await;

    let audio = STANDARD.encode(b"RIFF fake recording");
    let frame = format!(
        r#"{{"sender":"user","type":"voice","format":"audio","content":"{audio}","time":"now"}}"#
    );
    client.send(Message::Text(frame.into())).await.unwrap();

    let transcript = next_envelope(&mut client).await;
    assert_eq!(transcript.sender(), Sender::User);
    assert_eq!(transcript.format(), Format::Text);
    assert_eq!(transcript.text(), Some("Hello, this is a test."));

    let (reply, _) = read_reply(&mut client).await;
    assert_eq!(reply, "You said: Hello, this is a test. [emo:happy]");
    assert_eq!(next_envelope(&mut client).await.format(), Format::Audio);
}

#[tokio::test]
async fn test_malformed_frames_keep_session_open() {
    let (addr, _state) = spawn_server().await;
    let mut client = connect(addr).await;

    client.send(Message::Text("Hello, Server!".into())).await.unwrap();
    client.send(Message::Binary(vec![1u8, 2, 3].into())).await.unwrap();
    client
        .send(Message::Text(r#"{"format":"text","content":"still here?"}"#.into()))
        .await
        .unwrap();

    // The first thing back answers the valid message.
    let (reply, _) = read_reply(&mut client).await;
    assert_eq!(reply, "You said: still here? [emo:happy]");
}

#[tokio::test]
async fn test_sessions_are_isolated_and_released() {
    let (addr, state) = spawn_server().await;
    let mut first = connect(addr).await;
    let mut second = connect(addr).await;

    first
        .send(Message::Text(r#"{"format":"text","content":"one"}"#.into()))
        .await
        .unwrap();
    read_reply(&mut first).await;
    next_envelope(&mut first).await;

    second
        .send(Message::Text(r#"{"format":"text","content":"two"}"#.into()))
        .await
        .unwrap();
    read_reply(&mut second).await;
    next_envelope(&mut second).await;

    // Bookkeeping is published by the session task as its turn finishes.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let sessions = state.sessions.list().await;
            if sessions.len() == 2 && sessions.iter().all(|info| info.history_len == 2) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("each session should hold only its own exchange");

    first.close(None).await.unwrap();
    second.close(None).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while !state.sessions.is_empty().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("sessions were not released after disconnect");
}
