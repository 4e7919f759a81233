//! Main Entrypoint for the NOVA API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Building the chat, transcription and synthesis providers.
//! 3. Preparing the voice profile before any connection is accepted.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use nova_api::{
    config::{ChatProvider, Config, DASHSCOPE_API_BASE, SpeechProvider},
    router::create_router,
    state::AppState,
    ws::{cycle::Pipeline, manager::SessionManager},
};
use nova_core::{
    generation::CompanionFactory,
    heuristics::ReplyHeuristics,
    llm_client::{EchoLLMClient, LLMClient, OpenAICompatibleClient},
    synthesis::{OpenAISynthesizer, StaticAudioSynthesizer, SynthesisProvider},
    transcription::{MockTranscriber, OpenAITranscriber, TranscriptionProvider},
};
use std::{collections::HashMap, fs, net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const MOCK_CLIP_MILLIS: u32 = 500;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal(sessions: Arc<SessionManager>) {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    let live_sessions = sessions.len().await;
    info!(
        live_sessions = live_sessions,
        "Received shutdown signal. Shutting down gracefully..."
    );
}

/// A helper function to load prompts from a directory.
fn load_prompts(prompts_path: &std::path::Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    for entry in std::fs::read_dir(prompts_path)
        .with_context(|| format!("Failed to read prompts from {}", prompts_path.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
}

fn openai_config(config: &Config) -> anyhow::Result<OpenAIConfig> {
    let api_key = config
        .openai_api_key
        .as_ref()
        .context("OPENAI_API_KEY is required for the openai provider")?;
    Ok(OpenAIConfig::new()
        .with_api_key(api_key)
        .with_api_base(OPENAI_API_BASE))
}

fn build_chat_client(config: &Config) -> anyhow::Result<Arc<dyn LLMClient>> {
    Ok(match config.chat_provider {
        ChatProvider::OpenAI => {
            info!("Using OpenAI chat provider.");
            Arc::new(OpenAICompatibleClient::new(
                openai_config(config)?,
                config.chat_model.clone(),
            ))
        }
        ChatProvider::DashScope => {
            info!("Using DashScope chat provider.");
            let api_key = config
                .dashscope_api_key
                .as_ref()
                .context("DASHSCOPE_API_KEY is required for the dashscope provider")?;
            let dashscope_config = OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base(DASHSCOPE_API_BASE);
            Arc::new(OpenAICompatibleClient::new(
                dashscope_config,
                config.chat_model.clone(),
            ))
        }
        ChatProvider::Mock => {
            info!("Using offline echo chat provider.");
            Arc::new(EchoLLMClient)
        }
    })
}

fn build_speech_providers(
    config: &Config,
) -> anyhow::Result<(Arc<dyn TranscriptionProvider>, Arc<dyn SynthesisProvider>)> {
    Ok(match config.speech_provider {
        SpeechProvider::OpenAI => {
            info!("Using OpenAI speech providers.");
            let openai_config = openai_config(config)?;
            (
                Arc::new(OpenAITranscriber::new(
                    openai_config.clone(),
                    config.transcription_model.clone(),
                )),
                Arc::new(OpenAISynthesizer::new(
                    openai_config,
                    &config.speech_model,
                    &config.voice_zh,
                    &config.voice_en,
                )?),
            )
        }
        SpeechProvider::Mock => {
            info!("Using mock speech providers.");
            let synthesizer = match &config.mock_audio_path {
                Some(path) => StaticAudioSynthesizer::from_file(path),
                None => StaticAudioSynthesizer::silence(MOCK_CLIP_MILLIS),
            };
            (
                Arc::new(MockTranscriber::new(config.mock_transcript.clone())),
                Arc::new(synthesizer),
            )
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing providers...");

    // --- 3. Initialize Providers ---
    let prompts = load_prompts(&config.prompts_path)?;
    let system_prompt = Arc::new(
        prompts
            .get("system_prompt")
            .context("system_prompt.md not found in prompts directory")?
            .clone(),
    );

    let llm_client = build_chat_client(&config)?;
    let (transcriber, synthesizer) = build_speech_providers(&config)?;

    synthesizer
        .prepare_voice_profile()
        .await
        .context("Failed to prepare the voice profile")?;
    info!("Voice profile ready.");

    let sessions = Arc::new(SessionManager::new(Arc::new(CompanionFactory::new(
        llm_client,
        system_prompt,
        config.history_max_exchanges,
    ))));
    let app_state = Arc::new(AppState {
        sessions: sessions.clone(),
        pipeline: Arc::new(Pipeline {
            transcriber,
            synthesizer,
            heuristics: ReplyHeuristics::default(),
            provider_timeout: config.provider_timeout,
        }),
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        chat_provider = ?config.chat_provider,
        speech_provider = ?config.speech_provider,
        model = %config.chat_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(sessions))
    .await?;

    info!("Server has shut down.");
    Ok(())
}
