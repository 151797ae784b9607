use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use rand::{Rng, distr::Alphanumeric};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// Role of one stored conversation turn. Only what the upstream prompt
/// distinguishes: the caller and the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
}

/// Point-in-time copy of a session handed to a completion in flight.
///
/// Concurrent completions for the same key each snapshot independently; the
/// store serializes individual operations but not whole request cycles, so
/// two interleaved turns may both build their prompts from the same history.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub upstream_session_id: String,
    pub history: Vec<ConversationTurn>,
}

/// Inspection data for `GET /v1/session`.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub upstream_session_id: String,
    pub turn_count: usize,
    pub ttl_remaining: Duration,
}

struct SessionEntry {
    upstream_session_id: String,
    history: Vec<ConversationTurn>,
    expires_at: Instant,
}

impl SessionEntry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// In-memory session map with lazy TTL expiry: `expires_at` is checked on
/// every access instead of arming per-session delete timers.
pub struct SessionStore {
    ttl: Duration,
    max_history_turns: Option<usize>,
    inner: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    #[must_use]
    pub fn new(ttl: Duration, max_history_turns: Option<usize>) -> Self {
        Self {
            ttl,
            max_history_turns,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the live session for `key`, creating one with a fresh
    /// upstream session id and empty history when none exists or the
    /// previous one expired.
    pub async fn get_or_create(&self, key: &str) -> SessionSnapshot {
        use std::collections::hash_map::Entry;

        let now = Instant::now();
        let mut sessions = self.inner.lock().await;

        let entry = match sessions.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expired(now) {
                    *occupied.get_mut() = fresh_entry(key, now + self.ttl);
                }
                occupied.into_mut()
            }
            Entry::Vacant(vacant) => vacant.insert(fresh_entry(key, now + self.ttl)),
        };

        SessionSnapshot {
            upstream_session_id: entry.upstream_session_id.clone(),
            history: entry.history.clone(),
        }
    }

    /// Appends one user turn and one assistant turn, extends the TTL, and
    /// applies the configured history bound.
    pub async fn record_turn(&self, key: &str, user: String, assistant: String) {
        let now = Instant::now();
        let mut sessions = self.inner.lock().await;

        let entry = sessions
            .entry(key.to_string())
            .and_modify(|entry| {
                if entry.expired(now) {
                    *entry = fresh_entry(key, now + self.ttl);
                }
            })
            .or_insert_with(|| fresh_entry(key, now + self.ttl));

        entry.history.push(ConversationTurn {
            role: TurnRole::User,
            content: user,
        });
        entry.history.push(ConversationTurn {
            role: TurnRole::Assistant,
            content: assistant,
        });

        if let Some(bound) = self.max_history_turns {
            let excess = entry.history.len().saturating_sub(bound);
            if excess > 0 {
                entry.history.drain(..excess);
            }
        }

        entry.expires_at = now + self.ttl;
        debug!(session_key = %key, turns = entry.history.len(), "session context updated");
    }

    /// Extends the TTL of a live session. Returns `false` when the key is
    /// absent or already expired.
    pub async fn touch(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut sessions = self.inner.lock().await;

        match sessions.get_mut(key) {
            Some(entry) if !entry.expired(now) => {
                entry.expires_at = now + self.ttl;
                true
            }
            _ => false,
        }
    }

    /// Removes the session immediately. Returns whether a live session was
    /// actually cleared.
    pub async fn clear(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut sessions = self.inner.lock().await;

        match sessions.remove(key) {
            Some(entry) => {
                let was_live = !entry.expired(now);
                if was_live {
                    info!(session_key = %key, "session cleared");
                }
                was_live
            }
            None => false,
        }
    }

    /// Returns inspection data for a live session, `None` otherwise.
    pub async fn info(&self, key: &str) -> Option<SessionInfo> {
        let now = Instant::now();
        let sessions = self.inner.lock().await;

        sessions.get(key).and_then(|entry| {
            if entry.expired(now) {
                return None;
            }
            Some(SessionInfo {
                upstream_session_id: entry.upstream_session_id.clone(),
                turn_count: entry.history.len(),
                ttl_remaining: entry.expires_at - now,
            })
        })
    }
}

fn fresh_entry(key: &str, expires_at: Instant) -> SessionEntry {
    let entry = SessionEntry {
        upstream_session_id: new_upstream_session_id(),
        history: Vec::new(),
        expires_at,
    };
    info!(
        session_key = %key,
        upstream_session_id = %entry.upstream_session_id,
        "created new session"
    );
    metrics::counter!("sessions_created_total").increment(1);
    entry
}

/// Identifier the upstream uses to correlate a conversation, stable for the
/// session's lifetime: `session_<unix millis>_<9 random alphanumerics>`.
fn new_upstream_session_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("session_{}_{}", Utc::now().timestamp_millis(), suffix)
}
