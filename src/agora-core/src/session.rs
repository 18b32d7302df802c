//! Conversation sessions for the transport servers.
//!
//! A session is created on first use, keeps a bounded window of chat turns and
//! expires after a period without access.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::model::ChatTurn;

/// History of one conversation.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    pub turns: Vec<ChatTurn>,
}

struct SessionEntry {
    state: ConversationState,
    last_used: Instant,
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    ttl: Duration,
    history_limit: usize,
}

impl SessionRegistry {
    pub fn new(ttl: Duration, history_limit: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
            history_limit: history_limit.max(2),
        }
    }

    /// The session's history, creating an empty session if needed.
    pub async fn history(&self, id: &str) -> Vec<ChatTurn> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        self.evict_locked(&mut sessions, now);
        let entry = sessions.entry(id.to_string()).or_insert_with(|| {
            debug!(session = id, "session created");
            SessionEntry {
                state: ConversationState::default(),
                last_used: now,
            }
        });
        entry.last_used = now;
        entry.state.turns.clone()
    }

    /// Append a completed exchange, trimming the oldest turns beyond the limit.
    pub async fn record(&self, id: &str, user: ChatTurn, assistant: ChatTurn) {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        let entry = sessions.entry(id.to_string()).or_insert_with(|| SessionEntry {
            state: ConversationState::default(),
            last_used: now,
        });
        entry.last_used = now;

        let turns = &mut entry.state.turns;
        turns.push(user);
        turns.push(assistant);
        if turns.len() > self.history_limit {
            let excess = turns.len() - self.history_limit;
            turns.drain(..excess);
        }
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.sessions.lock().await.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Drop every session idle for longer than the TTL. Returns how many went.
    pub async fn evict_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        self.evict_locked(&mut sessions, Instant::now())
    }

    fn evict_locked(&self, sessions: &mut HashMap<String, SessionEntry>, now: Instant) -> usize {
        let before = sessions.len();
        sessions.retain(|_, entry| now.duration_since(entry.last_used) <= self.ttl);
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, "expired sessions evicted");
        }
        evicted
    }

    /// Evict expired sessions every `period` until the registry is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.evict_expired().await;
            }
        })
    }
}
