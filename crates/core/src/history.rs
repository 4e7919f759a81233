//! Bounded dialogue history.
//!
//! History is counted in exchanges: a user turn together with the assistant
//! turns that answer it. When a new user turn pushes the count over the cap,
//! whole exchanges are evicted from the front so the model never sees an
//! assistant reply without the question that produced it.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogueRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub role: DialogueRole,
    pub content: String,
}

impl DialogueTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: DialogueRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: DialogueRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DialogueHistory {
    turns: VecDeque<DialogueTurn>,
    max_exchanges: usize,
}

impl DialogueHistory {
    /// Ten exchanges, i.e. twenty messages.
    pub const DEFAULT_MAX_EXCHANGES: usize = 10;

    /// Creates an empty history. A cap of zero is treated as one so the
    /// current question is always kept.
    pub fn new(max_exchanges: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_exchanges: max_exchanges.max(1),
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push_back(DialogueTurn::user(content));
        while self.exchange_count() > self.max_exchanges {
            self.evict_oldest_exchange();
        }
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push_back(DialogueTurn::assistant(content));
    }

    pub fn turns(&self) -> impl Iterator<Item = &DialogueTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn max_exchanges(&self) -> usize {
        self.max_exchanges
    }

    pub fn exchange_count(&self) -> usize {
        self.turns
            .iter()
            .filter(|turn| turn.role == DialogueRole::User)
            .count()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    fn evict_oldest_exchange(&mut self) {
        if self.turns.pop_front().is_none() {
            return;
        }
        while self
            .turns
            .front()
            .is_some_and(|turn| turn.role == DialogueRole::Assistant)
        {
            self.turns.pop_front();
        }
    }
}

impl Default for DialogueHistory {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_EXCHANGES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(history: &DialogueHistory) -> Vec<&str> {
        history.turns().map(|t| t.content.as_str()).collect()
    }

    #[test]
    fn test_alternating_turns_are_kept_in_order() {
        let mut history = DialogueHistory::new(3);
        history.push_user("hi");
        history.push_assistant("hello");
        history.push_user("how are you?");
        history.push_assistant("great");

        assert_eq!(contents(&history), vec!["hi", "hello", "how are you?", "great"]);
        assert_eq!(history.exchange_count(), 2);
    }

    #[test]
    fn test_cap_evicts_oldest_pair() {
        let mut history = DialogueHistory::new(2);
        for i in 0..3 {
            history.push_user(format!("q{i}"));
            history.push_assistant(format!("a{i}"));
        }

        assert_eq!(contents(&history), vec!["q1", "a1", "q2", "a2"]);
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn test_eviction_happens_before_generation_sees_history() {
        let mut history = DialogueHistory::new(2);
        history.push_user("q0");
        history.push_assistant("a0");
        history.push_user("q1");
        history.push_assistant("a1");
        history.push_user("q2");

        assert_eq!(contents(&history), vec!["q1", "a1", "q2"]);
    }

    #[test]
    fn test_unanswered_user_turn_is_evicted_alone() {
        let mut history = DialogueHistory::new(2);
        history.push_user("lost");
        history.push_user("q1");
        history.push_assistant("a1");
        history.push_user("q2");

        assert_eq!(contents(&history), vec!["q1", "a1", "q2"]);
        assert_eq!(history.turns().next().map(|t| t.role), Some(DialogueRole::User));
    }

    #[test]
    fn test_zero_cap_keeps_current_question() {
        let mut history = DialogueHistory::new(0);
        history.push_user("q0");
        history.push_assistant("a0");
        history.push_user("q1");

        assert_eq!(history.max_exchanges(), 1);
        assert_eq!(contents(&history), vec!["q1"]);
    }

    #[test]
    fn test_clear() {
        let mut history = DialogueHistory::default();
        history.push_user("hi");
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.max_exchanges(), DialogueHistory::DEFAULT_MAX_EXCHANGES);
    }
}
