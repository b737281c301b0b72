//! Session history store
//!
//! In-memory, process-lifetime storage of per-session message histories.
//! Histories are never evicted; a long-running process grows with the number
//! of sessions and the length of each conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::OwnedMutexGuard;

use crate::llm::Message;

/// Point-in-time summary of a session history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
struct HistoryState {
    messages: Vec<Message>,
    last_index: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Ordered message history of one session.
///
/// Handed out as `Arc<SessionHistory>` by [`SessionStore`]. All access goes
/// through `append`/`messages`; the underlying vector is never exposed.
#[derive(Debug)]
pub struct SessionHistory {
    session_id: String,
    state: Mutex<HistoryState>,
    turn: Arc<tokio::sync::Mutex<()>>,
}

impl SessionHistory {
    fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            state: Mutex::new(HistoryState {
                messages: Vec::new(),
                last_index: 0,
                created_at: now,
                updated_at: now,
            }),
            turn: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn state(&self) -> MutexGuard<'_, HistoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a message, assigning the next sequence index.
    ///
    /// Returns the stored message.
    pub fn append(&self, message: Message) -> Message {
        let mut state = self.state();
        Self::push(&mut state, message)
    }

    /// Append several messages under a single lock acquisition.
    ///
    /// Concurrent readers observe either none or all of them.
    pub fn append_all(&self, messages: impl IntoIterator<Item = Message>) -> Vec<Message> {
        let mut state = self.state();
        messages
            .into_iter()
            .map(|message| Self::push(&mut state, message))
            .collect()
    }

    /// Record the inputs of one exchange followed by the reply, atomically.
    ///
    /// Returns the stored reply.
    pub fn record_exchange(
        &self,
        inputs: impl IntoIterator<Item = Message>,
        reply: Message,
    ) -> Message {
        let mut state = self.state();
        for message in inputs {
            Self::push(&mut state, message);
        }
        Self::push(&mut state, reply)
    }

    fn push(state: &mut HistoryState, message: Message) -> Message {
        state.last_index += 1;
        let stored = message.indexed(state.last_index);
        state.messages.push(stored.clone());
        state.updated_at = Utc::now();
        stored
    }

    /// Snapshot of the history in sequence order.
    pub fn messages(&self) -> Vec<Message> {
        self.state().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.state().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().messages.is_empty()
    }

    /// Drop all messages. Sequence indices keep increasing afterwards.
    pub fn clear(&self) {
        let mut state = self.state();
        state.messages.clear();
        state.updated_at = Utc::now();
    }

    pub fn info(&self) -> SessionInfo {
        let state = self.state();
        SessionInfo {
            session_id: self.session_id.clone(),
            message_count: state.messages.len(),
            created_at: state.created_at,
            updated_at: state.updated_at,
        }
    }

    /// Acquire the exchange lock for this session.
    ///
    /// Held by the orchestrator for the duration of one exchange so that
    /// exchanges on the same session are applied one at a time.
    pub async fn lock_turn(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.turn).lock_owned().await
    }
}

/// Store of session histories keyed by session id.
///
/// The map lock is only held to look up or insert a handle; each history has
/// its own lock, so sessions do not contend with each other.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<SessionHistory>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the history for `session_id`, creating an empty one on first use.
    pub fn get_or_create(&self, session_id: &str) -> Arc<SessionHistory> {
        if let Some(history) = self.get(session_id) {
            return history;
        }

        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(sessions.entry(session_id.to_string()).or_insert_with(|| {
            tracing::debug!(session_id, "Created session history");
            Arc::new(SessionHistory::new(session_id))
        }))
    }

    /// Get the history for `session_id` without creating it.
    pub fn get(&self, session_id: &str) -> Option<Arc<SessionHistory>> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
    }

    /// Append a message to a session, creating the session if needed.
    pub fn append(&self, session_id: &str, message: Message) -> Message {
        self.get_or_create(session_id).append(message)
    }

    /// Append several messages to a session atomically.
    pub fn append_all(
        &self,
        session_id: &str,
        messages: impl IntoIterator<Item = Message>,
    ) -> Vec<Message> {
        self.get_or_create(session_id).append_all(messages)
    }

    /// Snapshot of a session's messages. Unknown sessions read as empty and
    /// are not created.
    pub fn read(&self, session_id: &str) -> Vec<Message> {
        self.get(session_id)
            .map(|history| history.messages())
            .unwrap_or_default()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(session_id)
    }

    /// Remove a session. Outstanding handles keep working but are detached.
    pub fn remove(&self, session_id: &str) -> Option<Arc<SessionHistory>> {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id)
    }

    /// Drop all messages of a session, keeping the session itself.
    ///
    /// Returns `false` if the session does not exist.
    pub fn clear(&self, session_id: &str) -> bool {
        match self.get(session_id) {
            Some(history) => {
                history.clear();
                true
            }
            None => false,
        }
    }

    /// Known session ids, sorted.
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Number of sessions
    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn info(&self, session_id: &str) -> Option<SessionInfo> {
        self.get(session_id).map(|history| history.info())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MessageRole;

    #[test]
    fn test_appends_read_back_in_order() {
        let store = SessionStore::new();
        let contents = ["hi! I'm Bob", "Hello Bob!", "what's my name?", "Bob."];
        for (i, content) in contents.iter().enumerate() {
            let message = if i % 2 == 0 {
                Message::user(*content)
            } else {
                Message::assistant(*content)
            };
            let stored = store.append("abc2", message);
            assert_eq!(stored.sequence_index(), i as u64 + 1);
        }

        let messages = store.read("abc2");
        let read: Vec<&str> = messages.iter().map(|m| m.content()).collect();
        assert_eq!(read, contents);
        assert!(
            messages
                .windows(2)
                .all(|w| w[0].sequence_index() < w[1].sequence_index())
        );
        assert_eq!(messages[1].role(), MessageRole::Assistant);
    }

    #[test]
    fn test_get_or_create_returns_shared_handle() {
        let store = SessionStore::new();
        let first = store.get_or_create("abc2");
        let second = store.get_or_create("abc2");

        first.append(Message::user("one"));
        second.append(Message::assistant("two"));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 2);
        assert_eq!(second.messages()[0].content(), "one");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_read_does_not_create() {
        let store = SessionStore::new();
        assert!(store.read("missing").is_empty());
        assert!(!store.contains("missing"));
        assert!(store.is_empty());
        assert!(store.info("missing").is_none());
    }

    #[test]
    fn test_sessions_are_isolated() {
        let store = SessionStore::new();
        store.append("abc2", Message::user("hi! I'm Bob"));
        store.append("abc3", Message::user("what's my name?"));

        assert_eq!(store.read("abc2").len(), 1);
        assert_eq!(store.read("abc3")[0].sequence_index(), 1);
        assert_eq!(store.session_ids(), vec!["abc2", "abc3"]);
    }

    #[test]
    fn test_append_all_assigns_consecutive_indices() {
        let store = SessionStore::new();
        store.append("s", Message::system("be nice"));
        let stored = store.append_all("s", vec![Message::user("q"), Message::assistant("a")]);

        let indices: Vec<u64> = stored.iter().map(|m| m.sequence_index()).collect();
        assert_eq!(indices, vec![2, 3]);
        assert_eq!(store.read("s").len(), 3);
    }

    #[test]
    fn test_clear_keeps_indices_increasing() {
        let store = SessionStore::new();
        store.append("s", Message::user("one"));
        store.append("s", Message::user("two"));
        assert!(store.clear("s"));
        assert!(store.read("s").is_empty());
        assert!(store.contains("s"));

        let stored = store.append("s", Message::user("three"));
        assert_eq!(stored.sequence_index(), 3);
        assert!(!store.clear("missing"));
    }

    #[test]
    fn test_remove_detaches_session() {
        let store = SessionStore::new();
        let handle = store.get_or_create("s");
        handle.append(Message::user("one"));

        let removed = store.remove("s").unwrap();
        assert!(Arc::ptr_eq(&handle, &removed));
        assert!(!store.contains("s"));
        assert!(store.read("s").is_empty());

        let fresh = store.get_or_create("s");
        assert!(fresh.is_empty());
    }

    #[test]
    fn test_info_tracks_updates() {
        let store = SessionStore::new();
        let history = store.get_or_create("s");
        let created = history.info();
        assert_eq!(created.message_count, 0);
        assert_eq!(created.created_at, created.updated_at);

        history.append(Message::user("hello"));
        let info = store.info("s").unwrap();
        assert_eq!(info.session_id, "s");
        assert_eq!(info.message_count, 1);
        assert!(info.updated_at >= created.updated_at);
    }

    #[test]
    fn test_concurrent_appends_keep_strict_order() {
        let store = Arc::new(SessionStore::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.append("shared", Message::user(format!("{t}-{i}")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let messages = store.read("shared");
        assert_eq!(messages.len(), 400);
        let indices: Vec<u64> = messages.iter().map(|m| m.sequence_index()).collect();
        assert_eq!(indices, (1..=400).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_turn_lock_serializes_exchanges() {
        let store = SessionStore::new();
        let history = store.get_or_create("s");

        let guard = history.lock_turn().await;
        let other = store.get_or_create("s");
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            other.lock_turn(),
        )
        .await;
        assert!(pending.is_err());

        drop(guard);
        let _guard = other.lock_turn().await;

        // A different session is never blocked
        let _unrelated = store.get_or_create("t").lock_turn().await;
    }
}
