use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// DashScope's OpenAI-compatible endpoint.
pub const DASHSCOPE_API_BASE: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Backend that generates replies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatProvider {
    OpenAI,
    DashScope,
    /// Offline echo client.
    Mock,
}

/// Backend for transcription and synthesis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpeechProvider {
    OpenAI,
    /// Fixed transcript and a static clip.
    Mock,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub chat_provider: ChatProvider,
    pub speech_provider: SpeechProvider,
    pub openai_api_key: Option<String>,
    pub dashscope_api_key: Option<String>,
    pub chat_model: String,
    pub transcription_model: String,
    pub speech_model: String,
    pub voice_zh: String,
    pub voice_en: String,
    pub mock_audio_path: Option<PathBuf>,
    pub mock_transcript: String,
    pub history_max_exchanges: usize,
    pub provider_timeout: Duration,
    pub log_level: Level,
    pub prompts_path: PathBuf,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_positive(name: &str, default: u64) -> Result<u64, ConfigError> {
    let raw = var_or(name, &default.to_string());
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("'{}' is not a positive integer", raw),
        )),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str = var_or("BIND_ADDRESS", "127.0.0.1:8000");
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let chat_provider = match var_or("CHAT_PROVIDER", "dashscope").to_lowercase().as_str() {
            "openai" => ChatProvider::OpenAI,
            "dashscope" => ChatProvider::DashScope,
            "mock" => ChatProvider::Mock,
            other => {
                return Err(ConfigError::InvalidValue(
                    "CHAT_PROVIDER".to_string(),
                    format!("'{}' is not one of openai, dashscope, mock", other),
                ));
            }
        };

        let speech_provider = match var_or("SPEECH_PROVIDER", "mock").to_lowercase().as_str() {
            "openai" => SpeechProvider::OpenAI,
            "mock" => SpeechProvider::Mock,
            other => {
                return Err(ConfigError::InvalidValue(
                    "SPEECH_PROVIDER".to_string(),
                    format!("'{}' is not one of openai, mock", other),
                ));
            }
        };

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let dashscope_api_key = std::env::var("DASHSCOPE_API_KEY").ok();

        let default_chat_model = match chat_provider {
            ChatProvider::OpenAI => "gpt-4o-mini",
            ChatProvider::DashScope | ChatProvider::Mock => "qwen-turbo",
        };
        let chat_model = var_or("CHAT_MODEL", default_chat_model);
        let transcription_model = var_or("TRANSCRIPTION_MODEL", "whisper-1");
        let speech_model = var_or("SPEECH_MODEL", "tts-1");
        let voice_zh = var_or("VOICE_ZH", "nova");
        let voice_en = var_or("VOICE_EN", "nova");

        let mock_audio_path = std::env::var("MOCK_AUDIO_PATH")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        let mock_transcript = var_or("MOCK_TRANSCRIPT", "Hello, this is a test.");

        let history_max_exchanges = parse_positive("HISTORY_MAX_EXCHANGES", 10)? as usize;
        let provider_timeout = Duration::from_secs(parse_positive("PROVIDER_TIMEOUT_SECS", 30)?);

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = std::env::var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./prompts"));

        let needs_openai_key =
            chat_provider == ChatProvider::OpenAI || speech_provider == SpeechProvider::OpenAI;
        if needs_openai_key && openai_api_key.is_none() {
            return Err(ConfigError::MissingVar(
                "OPENAI_API_KEY must be set for the 'openai' provider".to_string(),
            ));
        }
        if chat_provider == ChatProvider::DashScope && dashscope_api_key.is_none() {
            return Err(ConfigError::MissingVar(
                "DASHSCOPE_API_KEY must be set for the 'dashscope' chat provider".to_string(),
            ));
        }

        Ok(Self {
            bind_address,
            chat_provider,
            speech_provider,
            openai_api_key,
            dashscope_api_key,
            chat_model,
            transcription_model,
            speech_model,
            voice_zh,
            voice_en,
            mock_audio_path,
            mock_transcript,
            history_max_exchanges,
            provider_timeout,
            log_level,
            prompts_path,
        })
    }
}
