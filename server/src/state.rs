//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds a map of live sessions behind one `RwLock`, which is the global
//! ordering point: every mutation of a session's log or registry, and the
//! fan-out that follows it, happens while holding the write guard. Arrival
//! order at that lock is the total order every client converges to.
//!
//! Sessions live only in memory. One is created by the first join and
//! evicted when its last participant leaves.

use std::collections::HashMap;
use std::sync::Arc;

use canvas::presence::ParticipantId;
use canvas::stroke::{Point, Stroke, StrokeId};
use frames::Frame;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::services::presence::PresenceTracker;

pub type SessionId = Uuid;

// =============================================================================
// SESSION LOG
// =============================================================================

/// A stroke as the store keeps it. `author` and `completed` never go on the
/// wire.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedStroke {
    pub stroke: Stroke,
    pub author: ParticipantId,
    pub completed: bool,
}

/// Authoritative, ordered stroke list for one session.
#[derive(Debug, Default)]
pub struct SessionLog {
    entries: Vec<CommittedStroke>,
    index: HashMap<StrokeId, usize>,
    next_seq: u64,
}

impl SessionLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: StrokeId) -> Option<&CommittedStroke> {
        self.index.get(&id).map(|&i| &self.entries[i])
    }

    /// Append a new stroke. Returns its sequence number, which keeps growing
    /// across clears.
    pub fn append(&mut self, stroke: Stroke, author: ParticipantId) -> u64 {
        self.next_seq += 1;
        self.index.insert(stroke.id, self.entries.len());
        self.entries.push(CommittedStroke { stroke, author, completed: false });
        self.next_seq
    }

    /// Append points to an existing stroke. Returns false if it is unknown.
    pub fn extend(&mut self, id: StrokeId, points: &[Point]) -> bool {
        let Some(&i) = self.index.get(&id) else {
            return false;
        };
        self.entries[i].stroke.points.extend_from_slice(points);
        true
    }

    pub fn complete(&mut self, id: StrokeId) -> bool {
        let Some(&i) = self.index.get(&id) else {
            return false;
        };
        self.entries[i].completed = true;
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    /// Ordered copy of every stroke, for join replies and HTTP reads.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Stroke> {
        self.entries.iter().map(|e| e.stroke.clone()).collect()
    }
}

// =============================================================================
// SESSION STATE
// =============================================================================

/// Per-session live state.
#[derive(Debug, Default)]
pub struct SessionState {
    pub log: SessionLog,
    pub presence: PresenceTracker,
    /// Connected participants: `participant_id` -> sender for outgoing frames.
    pub clients: HashMap<ParticipantId, mpsc::Sender<Frame>>,
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<RwLock<HashMap<SessionId, SessionState>>>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self { sessions: Arc::new(RwLock::new(HashMap::new())), config: Arc::new(config) }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
