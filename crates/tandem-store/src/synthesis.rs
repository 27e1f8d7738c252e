use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tandem_core::ids::SynthesisSessionId;

use crate::error::StoreError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    Requirement,
    Feedback,
}

/// One request/response exchange with the code generator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisTurn {
    pub kind: TurnKind,
    pub input: String,
    pub code: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisState {
    Drafted,
    Revised,
    Approved,
}

#[derive(Clone, Debug)]
pub struct SynthesisSession {
    pub id: SynthesisSessionId,
    pub turns: Vec<SynthesisTurn>,
    pub state: SynthesisState,
    pub created_at: DateTime<Utc>,
    last_active: Instant,
}

impl SynthesisSession {
    fn new(id: SynthesisSessionId) -> Self {
        Self {
            id,
            turns: Vec::new(),
            state: SynthesisState::Drafted,
            created_at: Utc::now(),
            last_active: Instant::now(),
        }
    }

    /// The first requirement that opened this session.
    pub fn original_requirement(&self) -> Option<&str> {
        self.turns
            .iter()
            .find(|t| t.kind == TurnKind::Requirement)
            .map(|t| t.input.as_str())
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }
}

/// Synthesis sessions keyed by id, separate from conversation threads.
pub struct SynthesisSessionStore {
    sessions: DashMap<SynthesisSessionId, SynthesisSession>,
    ttl: Duration,
}

impl SynthesisSessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Snapshot of the session, creating an empty one if absent.
    pub fn get_or_create(&self, id: &SynthesisSessionId) -> SynthesisSession {
        self.sessions
            .entry(id.clone())
            .or_insert_with(|| SynthesisSession::new(id.clone()))
            .clone()
    }

    pub fn get(&self, id: &SynthesisSessionId) -> Option<SynthesisSession> {
        self.sessions.get(id).map(|s| s.clone())
    }

    pub fn contains(&self, id: &SynthesisSessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Append a turn. Feedback moves the session to `Revised`.
    pub fn append_turn(&self, id: &SynthesisSessionId, turn: SynthesisTurn) -> Result<(), StoreError> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("synthesis session {id}")))?;
        if turn.kind == TurnKind::Feedback {
            session.state = SynthesisState::Revised;
        }
        session.turns.push(turn);
        session.last_active = Instant::now();
        Ok(())
    }

    /// Remove the session, returning its final state as `Approved`.
    pub fn approve(&self, id: &SynthesisSessionId) -> Option<SynthesisSession> {
        self.sessions.remove(id).map(|(_, mut session)| {
            session.state = SynthesisState::Approved;
            session
        })
    }

    pub fn remove(&self, id: &SynthesisSessionId) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Drop sessions idle longer than the configured TTL.
    pub fn purge_expired(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.idle_for() < self.ttl);
        let purged = before.saturating_sub(self.sessions.len());
        if purged > 0 {
            debug!(purged, "expired synthesis sessions removed");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SynthesisSessionStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(3_600))
    }
}
