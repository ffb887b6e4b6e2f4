//! Participants and the client's cached view of the session registry.
//!
//! The store owns the canonical registry. Clients only ever replace their
//! cache wholesale from `presence:active` broadcasts and patch cursor
//! positions from `cursor:move` fan-out. Nothing here is part of the stroke
//! log or of undo/redo.

#[cfg(test)]
#[path = "presence_test.rs"]
mod presence_test;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stroke::Point;

/// Connection-scoped participant id, assigned by the store at join.
pub type ParticipantId = Uuid;

/// Name used when a participant joins without one.
pub const ANONYMOUS: &str = "anonymous";

/// One connected participant as broadcast by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    pub color: String,
    #[serde(default)]
    pub cursor: Option<Point>,
}

/// Read-only cache of the registry, in join order.
#[derive(Debug, Clone, Default)]
pub struct PresenceView {
    participants: Vec<Participant>,
}

impl PresenceView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    #[must_use]
    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    /// Everyone except `local`.
    pub fn others(&self, local: ParticipantId) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(move |p| p.id != local)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Install a full registry from the store.
    ///
    /// Cursor positions already known locally survive when the incoming
    /// entry has none, since registry broadcasts and cursor fan-out travel
    /// separately.
    pub fn replace_all(&mut self, incoming: Vec<Participant>) {
        let previous = std::mem::take(&mut self.participants);
        self.participants = incoming
            .into_iter()
            .map(|mut p| {
                if p.cursor.is_none() {
                    p.cursor = previous.iter().find(|old| old.id == p.id).and_then(|old| old.cursor);
                }
                p
            })
            .collect();
    }

    /// Last-write-wins cursor update. Returns false for unknown participants.
    pub fn apply_cursor(&mut self, id: ParticipantId, at: Point) -> bool {
        let Some(participant) = self.participants.iter_mut().find(|p| p.id == id) else {
            return false;
        };
        participant.cursor = Some(at);
        true
    }

    pub fn clear(&mut self) {
        self.participants.clear();
    }
}
