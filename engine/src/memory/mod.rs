//! Conversation Memory
//!
//! Per-session turn history with a fixed capacity. Each session keeps at most
//! `window_turns` completed exchanges; appending past the capacity evicts the
//! oldest exchange first.
//!
//! The [`SessionStore`] is the only mutable state shared between concurrent
//! turns. It is passed by handle into every turn and guarded by a
//! `tokio::sync::Mutex` that is held only while a snapshot is copied out or a
//! finished turn is appended, never across an external call.

use crate::llm::{Message, MessageRole};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Messages rendered into the context summary (three exchanges)
pub const SUMMARY_MESSAGES: usize = 6;

/// Per-message character cap inside the context summary
pub const SUMMARY_MESSAGE_CHARS: usize = 200;

/// A single utterance. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One completed exchange
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub user: ChatMessage,
    pub assistant: ChatMessage,
}

impl Turn {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: ChatMessage::user(user),
            assistant: ChatMessage::assistant(assistant),
        }
    }
}

/// Bounded FIFO of completed turns
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    turns: VecDeque<Turn>,
    capacity: usize,
}

impl ConversationMemory {
    /// Create an empty memory holding at most `capacity` turns (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a turn, evicting the oldest when full
    pub fn push(&mut self, turn: Turn) {
        while self.turns.len() >= self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Flatten the history into alternating user/assistant messages
    pub fn as_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.turns.len() * 2);
        for turn in &self.turns {
            messages.push(Message::user(turn.user.text.clone()));
            messages.push(Message::assistant(turn.assistant.text.clone()));
        }
        messages
    }

    /// Short plain-text rendering of the most recent exchanges
    ///
    /// Covers the last [`SUMMARY_MESSAGES`] messages, each cut to
    /// [`SUMMARY_MESSAGE_CHARS`] characters. Empty when there is no history.
    pub fn context_summary(&self) -> String {
        let messages: Vec<&ChatMessage> = self
            .turns
            .iter()
            .flat_map(|turn| [&turn.user, &turn.assistant])
            .collect();

        let start = messages.len().saturating_sub(SUMMARY_MESSAGES);

        messages[start..]
            .iter()
            .map(|msg| {
                let speaker = match msg.role {
                    MessageRole::User => "User",
                    _ => "Assistant",
                };
                format!(
                    "{}: {}",
                    speaker,
                    truncate_chars(&msg.text, SUMMARY_MESSAGE_CHARS)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Cut `text` to at most `max` characters (not bytes)
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// A session's history plus its last activity time
#[derive(Debug, Clone)]
struct Session {
    memory: ConversationMemory,
    last_active: Instant,
}

/// Session id → memory map shared by every turn
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    window_turns: usize,
}

impl SessionStore {
    /// Create an empty store whose sessions each hold `window_turns` turns
    pub fn new(window_turns: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            window_turns,
        }
    }

    /// Copy out a session's memory at the start of a turn
    ///
    /// Unknown sessions read as empty; only `append` creates one.
    pub async fn snapshot(&self, session_id: &str) -> ConversationMemory {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(session_id) {
            Some(session) => {
                session.last_active = Instant::now();
                session.memory.clone()
            }
            None => ConversationMemory::new(self.window_turns),
        }
    }

    /// Record a completed turn
    ///
    /// Appends are serialized by the store lock, so the order of turns is the
    /// order in which synthesis finished.
    pub async fn append(&self, session_id: &str, turn: Turn) {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::debug!("Creating session '{}'", session_id);
                Session {
                    memory: ConversationMemory::new(self.window_turns),
                    last_active: Instant::now(),
                }
            });
        session.memory.push(turn);
        session.last_active = Instant::now();
    }

    /// Empty a session's history
    ///
    /// Idempotent: clearing an unknown or already-empty session is a no-op.
    /// Returns the number of turns that were removed.
    pub async fn clear(&self, session_id: &str) -> usize {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(session_id) {
            Some(session) => {
                let removed = session.memory.len();
                session.memory.clear();
                session.last_active = Instant::now();
                removed
            }
            None => 0,
        }
    }

    /// Number of turns currently held for a session
    pub async fn len(&self, session_id: &str) -> usize {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(|s| s.memory.len())
            .unwrap_or(0)
    }

    /// Number of live sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Drop every session idle for longer than `max_idle`
    ///
    /// Returns how many sessions were torn down.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        let now = Instant::now();
        sessions.retain(|_, session| now.duration_since(session.last_active) <= max_idle);
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::info!("Evicted {} idle session(s)", evicted);
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_evicts_oldest() {
        let mut memory = ConversationMemory::new(2);
        memory.push(Turn::new("q1", "a1"));
        memory.push(Turn::new("q2", "a2"));
        memory.push(Turn::new("q3", "a3"));

        assert_eq!(memory.len(), 2);
        let first = memory.turns().next().unwrap();
        assert_eq!(first.user.text, "q2");
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let mut memory = ConversationMemory::new(0);
        memory.push(Turn::new("q", "a"));
        assert_eq!(memory.capacity(), 1);
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn test_context_summary_keeps_last_six_messages() {
        let mut memory = ConversationMemory::new(10);
        for i in 0..5 {
            memory.push(Turn::new(format!("question {}", i), format!("answer {}", i)));
        }

        let summary = memory.context_summary();
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines.len(), SUMMARY_MESSAGES);
        assert_eq!(lines[0], "User: question 2");
        assert_eq!(lines[5], "Assistant: answer 4");
    }

    #[test]
    fn test_context_summary_truncates_long_messages() {
        let mut memory = ConversationMemory::new(10);
        memory.push(Turn::new("é".repeat(500), "ok"));

        let summary = memory.context_summary();
        let first = summary.lines().next().unwrap();
        assert_eq!(first.chars().count(), "User: ".len() + SUMMARY_MESSAGE_CHARS);
    }

    #[test]
    fn test_empty_summary() {
        assert_eq!(ConversationMemory::new(3).context_summary(), "");
    }

    #[test]
    fn test_as_messages_alternates_roles() {
        let mut memory = ConversationMemory::new(3);
        memory.push(Turn::new("hi", "hello"));
        let messages = memory.as_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn test_store_append_and_snapshot() {
        let store = SessionStore::new(3);
        store.append("s1", Turn::new("q", "a")).await;

        let snapshot = store.snapshot("s1").await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.len("s2").await, 0);
    }

    #[tokio::test]
    async fn test_snapshot_does_not_create_sessions() {
        let store = SessionStore::new(3);

        let snapshot = store.snapshot("visitor").await;
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.capacity(), 3);
        assert_eq!(store.session_count().await, 0);

        store.append("visitor", Turn::new("q", "a")).await;
        assert_eq!(store.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let store = SessionStore::new(3);
        assert_eq!(store.clear("missing").await, 0);

        store.append("s1", Turn::new("q", "a")).await;
        assert_eq!(store.clear("s1").await, 1);
        assert_eq!(store.clear("s1").await, 0);
        assert_eq!(store.len("s1").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_idle_sessions() {
        let store = SessionStore::new(3);
        store.append("old", Turn::new("q", "a")).await;

        tokio::time::advance(Duration::from_secs(120)).await;
        store.append("fresh", Turn::new("q", "a")).await;

        let evicted = store.evict_idle(Duration::from_secs(60)).await;
        assert_eq!(evicted, 1);
        assert_eq!(store.session_count().await, 1);
        assert_eq!(store.len("fresh").await, 1);
    }
}
