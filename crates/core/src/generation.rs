//! Per-session reply generation.
//!
//! A `GenerationProvider` owns one conversation's history. The session
//! manager asks a `GenerationFactory` for a fresh provider on every new
//! connection, so histories never leak between users.

use crate::{
    error::GenerationError,
    history::DialogueHistory,
    language::detect_language,
    llm_client::{ChatMessage, LLMClient, LLMStreamEvent},
};
use futures::{
    StreamExt,
    future,
    stream::{self, BoxStream},
};
use std::sync::Arc;

/// A lazy, finite, non-restartable sequence of reply fragments.
///
/// `None` means the reply ended normally; an `Err` item means the upstream
/// failed and no further fragments should be expected.
pub type FragmentStream = BoxStream<'static, Result<String, GenerationError>>;

pub trait GenerationProvider: Send {
    /// Records `text` as a user turn, then opens a reply stream over the full
    /// history. Nothing is sent upstream until the stream is first polled.
    fn stream_reply(&mut self, text: &str) -> FragmentStream;

    /// Records a finished assistant reply. Empty replies are ignored.
    fn record_reply(&mut self, reply: &str);

    fn history(&self) -> &DialogueHistory;

    fn reset_history(&mut self);
}

/// Builds one `GenerationProvider` per session.
pub trait GenerationFactory: Send + Sync {
    fn create(&self) -> Box<dyn GenerationProvider>;
}

/// The NOVA companion: a system persona plus a bounded history, backed by a
/// shared chat client.
pub struct Companion {
    client: Arc<dyn LLMClient>,
    system_prompt: Arc<String>,
    history: DialogueHistory,
}

impl Companion {
    pub fn new(
        client: Arc<dyn LLMClient>,
        system_prompt: Arc<String>,
        max_exchanges: usize,
    ) -> Self {
        Self {
            client,
            system_prompt,
            history: DialogueHistory::new(max_exchanges),
        }
    }

    /// The persona prompt, a reply-language lock derived from the latest user
    /// text, then the whole history.
    fn build_messages(&self, text: &str) -> Vec<ChatMessage> {
        let language = detect_language(text);
        let mut messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::system(format!(
                "The user is speaking {language}. Respond ONLY in {language}."
            )),
        ];
        messages.extend(self.history.turns().map(ChatMessage::from));
        messages
    }
}

impl GenerationProvider for Companion {
    fn stream_reply(&mut self, text: &str) -> FragmentStream {
        self.history.push_user(text);
        let messages = self.build_messages(text);
        let client = Arc::clone(&self.client);

        stream::once(async move { client.stream_chat(messages).await })
            .flat_map(|opened| match opened {
                Ok(events) => events
                    .map(|event| event.map(|LLMStreamEvent::TextChunk(chunk)| chunk))
                    .boxed(),
                Err(e) => stream::once(future::ready(Err(e))).boxed(),
            })
            .boxed()
    }

    fn record_reply(&mut self, reply: &str) {
        if !reply.is_empty() {
            self.history.push_assistant(reply);
        }
    }

    fn history(&self) -> &DialogueHistory {
        &self.history
    }

    fn reset_history(&mut self) {
        self.history.clear();
    }
}

pub struct CompanionFactory {
    client: Arc<dyn LLMClient>,
    system_prompt: Arc<String>,
    max_exchanges: usize,
}

impl CompanionFactory {
    pub fn new(
        client: Arc<dyn LLMClient>,
        system_prompt: Arc<String>,
        max_exchanges: usize,
    ) -> Self {
        Self {
            client,
            system_prompt,
            max_exchanges,
        }
    }
}

impl GenerationFactory for CompanionFactory {
    fn create(&self) -> Box<dyn GenerationProvider> {
        Box::new(Companion::new(
            Arc::clone(&self.client),
            Arc::clone(&self.system_prompt),
            self.max_exchanges,
        ))
    }
}
