//! Presence tracker: the canonical participant registry of one session.
//!
//! Entries are ephemeral. They are created at join, patched by cursor moves
//! and identity checks, and removed on leave or eviction. Nothing here is
//! part of the stroke log.

use canvas::presence::{ANONYMOUS, Participant, ParticipantId};
use canvas::stroke::Point;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

/// Presence colors handed out in join order when a client brings none.
pub const PALETTE: [&str; 6] = ["red", "blue", "green", "black", "orange", "yellow"];

/// Identity fields a client supplies on `session:join` and `presence:check`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ParticipantInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl ParticipantInfo {
    /// Read identity fields from a frame payload. A malformed payload counts
    /// as empty.
    #[must_use]
    pub fn from_payload(data: &Value) -> Self {
        Self::deserialize(data).unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct PresenceTracker {
    participants: Vec<Participant>,
    joins: usize,
}

impl PresenceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new participant under a fresh id.
    pub fn register(&mut self, info: ParticipantInfo) -> Participant {
        let color = non_blank(info.color).unwrap_or_else(|| PALETTE[self.joins % PALETTE.len()].to_owned());
        self.joins += 1;

        let participant = Participant {
            id: Uuid::new_v4(),
            display_name: non_blank(info.name).unwrap_or_else(|| ANONYMOUS.to_owned()),
            email: info.email.unwrap_or_default(),
            color,
            cursor: None,
        };
        self.participants.push(participant.clone());
        participant
    }

    pub fn remove(&mut self, id: ParticipantId) -> Option<Participant> {
        let pos = self.participants.iter().position(|p| p.id == id)?;
        Some(self.participants.remove(pos))
    }

    /// Last write wins. Returns the updated entry, or `None` if unknown.
    pub fn update_cursor(&mut self, id: ParticipantId, at: Point) -> Option<&Participant> {
        let participant = self.participants.iter_mut().find(|p| p.id == id)?;
        participant.cursor = Some(at);
        Some(&*participant)
    }

    /// Overwrite the identity fields the client supplied; absent fields keep
    /// their current value.
    pub fn update_identity(&mut self, id: ParticipantId, info: ParticipantInfo) -> Option<&Participant> {
        let participant = self.participants.iter_mut().find(|p| p.id == id)?;
        if let Some(name) = info.name {
            participant.display_name = if name.trim().is_empty() { ANONYMOUS.to_owned() } else { name };
        }
        if let Some(email) = info.email {
            participant.email = email;
        }
        if let Some(color) = non_blank(info.color) {
            participant.color = color;
        }
        Some(&*participant)
    }

    #[must_use]
    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    /// Registry in join order.
    #[must_use]
    pub fn list(&self) -> &[Participant] {
        &self.participants
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
