// Copyright 2026 The Parley Project
// SPDX-License-Identifier: Apache-2.0

// Session state management.
//
// Maps opaque session keys to conversation history. The map itself is a
// `DashMap` so turns on different keys never contend; each session sits
// behind its own `tokio::sync::Mutex`, which a turn holds from the first
// append until commit or rollback. The reaper acquires the same lock via
// `try_lock` and skips sessions with an in-flight turn.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::message::{Message, Role};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A single conversation: ordered messages plus a last-active timestamp.
///
/// Invariant: `messages[0]` is always the system message. No operation in
/// this module or in the turn controller removes or reorders it.
#[derive(Debug)]
pub struct Session {
    pub messages: Vec<Message>,
    pub last_active: DateTime<Utc>,
}

impl Session {
    /// Create a session seeded with the fixed system message.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::new(Role::System, system_prompt)],
            last_active: Utc::now(),
        }
    }

    /// Update the last-active timestamp. Called on every turn.
    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// History trimming
// ---------------------------------------------------------------------------

/// Trim a message sequence to at most `max` entries, counting the system
/// message, by removing the oldest non-system messages. Order of the
/// survivors is preserved. Idempotent: trimming an already-trimmed sequence
/// is a no-op.
pub fn trim_history(messages: &mut Vec<Message>, max: usize) {
    let keep = max.max(1);
    if messages.len() <= keep {
        return;
    }
    let excess = messages.len() - keep;
    // Drain starts at 1: the system message at index 0 is never removed.
    messages.drain(1..1 + excess);
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// Shared handle to one session's state. Lock it to run a turn.
pub type SessionHandle = Arc<Mutex<Session>>;

/// In-memory session store. Volatile: sessions do not survive a restart.
pub struct SessionStore {
    sessions: DashMap<String, SessionHandle>,
    system_prompt: String,
}

impl SessionStore {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            sessions: DashMap::new(),
            system_prompt: system_prompt.into(),
        }
    }

    /// Return the session for `key`, creating it (seeded with the system
    /// message and the current timestamp) if this is the first turn.
    pub fn get_or_create(&self, key: &str) -> SessionHandle {
        self.sessions
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(self.system_prompt.clone()))))
            .clone()
    }

    /// Remove every session inactive for longer than `max_inactive`.
    ///
    /// A session whose lock is currently held (a turn is in flight) is
    /// skipped, extending its effective lifetime until the next sweep.
    /// Returns the number of sessions evicted.
    pub fn sweep(&self, max_inactive: Duration) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, handle| match handle.try_lock() {
            Ok(session) => {
                let age = now
                    .signed_duration_since(session.last_active)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                age <= max_inactive
            }
            // Lock held: turn in flight, never delete out from under it.
            Err(_) => true,
        });
        before - self.sessions.len()
    }

    /// Number of live sessions (for logging and tests).
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn message(role: Role, content: &str) -> Message {
        Message::new(role, content)
    }

    // ---------------------------------------------------------------
    // Session tests
    // ---------------------------------------------------------------

    #[test]
    fn new_session_holds_only_the_system_message() {
        let session = Session::new("You are helpful");
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].role, Role::System);
        assert_eq!(session.messages[0].content, "You are helpful");
    }

    #[test]
    fn touch_advances_last_active() {
        let mut session = Session::new("sys");
        let before = session.last_active;
        session.last_active = before - chrono::Duration::seconds(10);
        session.touch();
        assert!(session.last_active >= before);
    }

    // ---------------------------------------------------------------
    // trim_history tests
    // ---------------------------------------------------------------

    fn history(turns: usize) -> Vec<Message> {
        let mut messages = vec![message(Role::System, "sys")];
        for i in 0..turns {
            messages.push(message(Role::User, &format!("q{i}")));
            messages.push(message(Role::Assistant, &format!("a{i}")));
        }
        messages
    }

    #[test]
    fn trim_removes_oldest_non_system_messages() {
        let mut messages = history(3); // sys + 6
        trim_history(&mut messages, 3);

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "q2");
        assert_eq!(messages[2].content, "a2");
    }

    #[test]
    fn trim_under_limit_is_a_no_op() {
        let mut messages = history(2); // sys + 4
        let snapshot = messages.clone();
        trim_history(&mut messages, 10);
        assert_eq!(messages, snapshot);
    }

    #[test]
    fn trim_is_idempotent() {
        let mut messages = history(5);
        trim_history(&mut messages, 4);
        let once = messages.clone();
        trim_history(&mut messages, 4);
        assert_eq!(messages, once);
    }

    #[test]
    fn trim_preserves_survivor_order() {
        let mut messages = history(4); // sys + 8
        trim_history(&mut messages, 5);

        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["sys", "q2", "a2", "q3", "a3"]);
    }

    #[test]
    fn trim_never_removes_the_system_message() {
        let mut messages = history(5);
        trim_history(&mut messages, 1);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::System);
    }

    // ---------------------------------------------------------------
    // SessionStore tests
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn get_or_create_seeds_new_sessions() {
        let store = SessionStore::new("sys prompt");
        let handle = store.get_or_create("s1");
        let session = handle.lock().await;
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].content, "sys prompt");
    }

    #[tokio::test]
    async fn get_or_create_returns_the_same_session() {
        let store = SessionStore::new("sys");
        {
            let handle = store.get_or_create("s1");
            handle
                .lock()
                .await
                .messages
                .push(message(Role::User, "hello"));
        }
        let handle = store.get_or_create("s1");
        let session = handle.lock().await;
        assert_eq!(session.messages.len(), 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn sweep_removes_inactive_sessions() {
        let store = SessionStore::new("sys");
        store.get_or_create("fresh");
        {
            let handle = store.get_or_create("stale");
            handle.lock().await.last_active = Utc::now() - chrono::Duration::seconds(7200);
        }

        let evicted = store.sweep(Duration::from_secs(3600));

        assert_eq!(evicted, 1);
        assert_eq!(store.len(), 1);
        let survivor = store.get_or_create("fresh");
        assert_eq!(survivor.lock().await.messages.len(), 1);
    }

    #[tokio::test]
    async fn sweep_skips_sessions_with_an_in_flight_turn() {
        let store = SessionStore::new("sys");
        let handle = store.get_or_create("busy");
        {
            let mut session = handle.lock().await;
            session.last_active = Utc::now() - chrono::Duration::seconds(7200);
            // Lock still held: simulates a turn in flight during the sweep.
            let evicted = store.sweep(Duration::from_secs(3600));
            assert_eq!(evicted, 0);
            assert_eq!(store.len(), 1);
            session.touch();
        }

        // Lock released and freshly touched: next sweep keeps it too.
        assert_eq!(store.sweep(Duration::from_secs(3600)), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn sweep_with_zero_threshold_clears_released_sessions() {
        let store = SessionStore::new("sys");
        {
            let handle = store.get_or_create("s1");
            handle.lock().await.last_active = Utc::now() - chrono::Duration::seconds(1);
        }
        store.sweep(Duration::ZERO);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn concurrent_creation_across_keys() {
        let store = Arc::new(SessionStore::new("sys"));
        let mut handles = Vec::new();
        for i in 0..10 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let handle = store.get_or_create(&format!("s{i}"));
                handle.lock().await.touch();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.len(), 10);
    }
}
