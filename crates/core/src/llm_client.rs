use crate::{
    error::GenerationError,
    history::{DialogueRole, DialogueTurn},
    language::{SpeechLanguage, detect_language},
};
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use futures::{Stream, StreamExt, stream};
use std::pin::Pin;

/// Represents the events that can be yielded from a streaming text response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LLMStreamEvent {
    TextChunk(String),
}

/// A stream of text chunks from the LLM.
pub type LLMStream = Pin<Box<dyn Stream<Item = Result<LLMStreamEvent, GenerationError>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message of a chat completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }
}

impl From<&DialogueTurn> for ChatMessage {
    fn from(turn: &DialogueTurn) -> Self {
        let role = match turn.role {
            DialogueRole::User => ChatRole::User,
            DialogueRole::Assistant => ChatRole::Assistant,
        };
        Self {
            role,
            content: turn.content.clone(),
        }
    }
}

/// A generic streaming chat client. Implementations are shared by every
/// session and hold no conversation state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Opens a streaming chat completion over `messages`.
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<LLMStream, GenerationError>;
}

/// An implementation of `LLMClient` for any OpenAI-compatible API
/// (OpenAI itself, or DashScope's compatible mode).
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The model identifier to use for chat completions (e.g., "qwen-turbo").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

fn to_request_message(message: ChatMessage) -> Result<ChatCompletionRequestMessage, OpenAIError> {
    Ok(match message.role {
        ChatRole::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(message.content)
            .build()?
            .into(),
        ChatRole::User => ChatCompletionRequestUserMessageArgs::default()
            .content(message.content)
            .build()?
            .into(),
        ChatRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(message.content)
            .build()?
            .into(),
    })
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<LLMStream, GenerationError> {
        let messages = messages
            .into_iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>, _>>()?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .stream(true)
            .build()?;

        let stream = self.client.chat().create_stream(request).await?;

        Ok(Box::pin(stream.filter_map(|result| async move {
            match result {
                Ok(response) => response
                    .choices
                    .first()
                    .and_then(|choice| choice.delta.content.clone())
                    .filter(|content| !content.is_empty())
                    .map(|content| Ok(LLMStreamEvent::TextChunk(content))),
                Err(e) => Some(Err(GenerationError::from(e))),
            }
        })))
    }
}

/// An `LLMClient` for local development that needs no API key.
///
/// It echoes the latest user message back word by word, followed by a
/// `[emo:happy]` tag, so the full relay pipeline can be exercised offline.
pub struct EchoLLMClient;

impl EchoLLMClient {
    fn reply_for(text: &str) -> String {
        match detect_language(text) {
            SpeechLanguage::Chinese => format!("你说：{text} [emo:happy]"),
            SpeechLanguage::English => format!("You said: {text} [emo:happy]"),
        }
    }
}

#[async_trait]
impl LLMClient for EchoLLMClient {
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<LLMStream, GenerationError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
            .ok_or_else(|| GenerationError::Upstream("no user message to echo".to_string()))?;

        let chunks: Vec<Result<LLMStreamEvent, GenerationError>> = Self::reply_for(last_user)
            .split_inclusive(' ')
            .map(|word| Ok(LLMStreamEvent::TextChunk(word.to_string())))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}
