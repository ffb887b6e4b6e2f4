//! Session store: join/leave, delta append, clear and fan-out.
//!
//! DESIGN
//! ======
//! Every operation takes the global write lock once, validates against the
//! locked session, mutates once, and fans out before releasing the lock.
//! Fan-out and acknowledgements both go through the bounded per-connection
//! queues with `try_send`, so one connection sees frames in store order and
//! no operation ever waits on a slow client.
//!
//! OVERFLOW
//! ========
//! A participant whose queue is full (or closed) is evicted on the spot:
//! its sender is dropped, which ends its connection task, and the rest of the
//! session receives the updated registry. Dropping frames instead would leave
//! that client permanently diverged.

use std::collections::HashMap;

use canvas::delta::StrokeDelta;
use canvas::presence::{Participant, ParticipantId};
use canvas::stroke::{Point, Stroke};
use frames::{ErrorCode, Frame, syscall};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};

use crate::services::delta::{self, DeltaError};
use crate::services::presence::ParticipantInfo;
use crate::state::{AppState, SessionId, SessionState};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not joined to a session")]
    NotJoined,
    #[error("already joined to session {0}")]
    AlreadyJoined(SessionId),
    #[error("session not found: {0}")]
    NotFound(SessionId),
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(&'static str),
    #[error(transparent)]
    Delta(#[from] DeltaError),
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotJoined => "E_NOT_JOINED",
            Self::AlreadyJoined(_) => "E_ALREADY_JOINED",
            Self::NotFound(_) => "E_SESSION_NOT_FOUND",
            Self::InvalidSessionId(_) => "E_INVALID_SESSION_ID",
            Self::InvalidPayload(_) => "E_INVALID_PAYLOAD",
            Self::Delta(e) => e.error_code(),
        }
    }
}

/// Everything a joining client needs to start rendering.
#[derive(Debug, Clone, Serialize)]
pub struct JoinSnapshot {
    pub participant: Participant,
    pub strokes: Vec<Stroke>,
    pub participants: Vec<Participant>,
}

/// One row of `GET /api/sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub participants: usize,
    pub strokes: usize,
}

/// Chat payload, relayed untouched.
#[derive(Debug, Clone, Serialize)]
pub struct ChatPayload {
    pub name: String,
    pub message: String,
    pub email: String,
}

/// Who receives a fan-out frame.
#[derive(Debug, Clone, Copy)]
enum Audience {
    All,
    AllExcept(ParticipantId),
    Only(ParticipantId),
}

impl Audience {
    fn includes(self, id: ParticipantId) -> bool {
        match self {
            Self::All => true,
            Self::AllExcept(excluded) => id != excluded,
            Self::Only(target) => id == target,
        }
    }
}

// =============================================================================
// JOIN / LEAVE
// =============================================================================

/// Register a participant and return its snapshot. The snapshot read and the
/// registration of `tx` happen under one write guard, so the first frame on
/// `tx` is the first mutation after the snapshot.
pub async fn join(
    state: &AppState,
    session_id: SessionId,
    info: ParticipantInfo,
    tx: mpsc::Sender<Frame>,
) -> JoinSnapshot {
    let mut sessions = state.sessions.write().await;
    let session = sessions.entry(session_id).or_insert_with(|| {
        info!(%session_id, "session created");
        SessionState::new()
    });

    let participant = session.presence.register(info);
    let snapshot = JoinSnapshot {
        participant: participant.clone(),
        strokes: session.log.snapshot(),
        participants: session.presence.list().to_vec(),
    };
    session.clients.insert(participant.id, tx);
    info!(%session_id, participant_id = %participant.id, clients = session.clients.len(), strokes = snapshot.strokes.len(), "participant joined");

    let registry = registry_frame(session_id, session);
    fan_out(session_id, session, Audience::AllExcept(participant.id), &registry);
    evict_if_empty(&mut sessions, session_id);
    snapshot
}

/// Remove a participant. Evicts the session when it was the last one.
/// Returns false if the participant was not registered (already evicted).
pub async fn leave(state: &AppState, session_id: SessionId, participant_id: ParticipantId) -> bool {
    let mut sessions = state.sessions.write().await;
    let Some(session) = sessions.get_mut(&session_id) else {
        return false;
    };

    let was_present = session.clients.remove(&participant_id).is_some();
    session.presence.remove(participant_id);
    if was_present {
        info!(%session_id, %participant_id, remaining = session.clients.len(), "participant left");
        if !session.clients.is_empty() {
            let registry = registry_frame(session_id, session);
            fan_out(session_id, session, Audience::All, &registry);
        }
    }
    evict_if_empty(&mut sessions, session_id);
    was_present
}

// =============================================================================
// STROKE LOG
// =============================================================================

/// Append a validated delta to the session log and fan it out.
///
/// A `draw:begin` is acknowledged with `{stroke_id, seq}` through the
/// sender's own queue, behind every frame the store ordered before it.
///
/// # Errors
///
/// Returns [`SessionError::NotFound`] / [`SessionError::NotJoined`] when the
/// sender is no longer registered, or the identity violation from
/// [`delta::check`]. Nothing is applied on error.
pub async fn append_delta(
    state: &AppState,
    session_id: SessionId,
    participant_id: ParticipantId,
    req: &Frame,
    delta: StrokeDelta,
) -> Result<(), SessionError> {
    let mut sessions = state.sessions.write().await;
    let session = member_session(&mut sessions, session_id, participant_id)?;

    delta::check(&session.log, participant_id, &delta, &state.config.log_caps())?;
    let seq = delta::apply(&mut session.log, participant_id, &delta);

    let broadcast = Frame::request(delta.syscall(), delta.to_payload())
        .with_session_id(session_id)
        .with_from(participant_id);
    fan_out(session_id, session, Audience::AllExcept(participant_id), &broadcast);

    if let Some(seq) = seq {
        let ack = req.done_with(json!({ "stroke_id": delta.stroke_id().to_string(), "seq": seq }));
        fan_out(session_id, session, Audience::Only(participant_id), &ack);
    }
    evict_if_empty(&mut sessions, session_id);
    Ok(())
}

/// Empty the session log. Peers get `canvas:cleared`, the sender an ack.
///
/// # Errors
///
/// Returns [`SessionError::NotFound`] / [`SessionError::NotJoined`].
pub async fn clear_session(
    state: &AppState,
    session_id: SessionId,
    participant_id: ParticipantId,
    req: &Frame,
) -> Result<(), SessionError> {
    let mut sessions = state.sessions.write().await;
    let session = member_session(&mut sessions, session_id, participant_id)?;

    let dropped = session.log.len();
    session.log.clear();
    info!(%session_id, %participant_id, dropped, "session cleared");

    let cleared = Frame::request(syscall::CANVAS_CLEARED, Value::Null)
        .with_session_id(session_id)
        .with_from(participant_id);
    fan_out(session_id, session, Audience::AllExcept(participant_id), &cleared);
    fan_out(session_id, session, Audience::Only(participant_id), &req.done());
    evict_if_empty(&mut sessions, session_id);
    Ok(())
}

// =============================================================================
// PRESENCE
// =============================================================================

/// Record a cursor position and fan it out to peers. Unknown participants
/// are ignored.
pub async fn update_cursor(state: &AppState, session_id: SessionId, participant_id: ParticipantId, at: Point) {
    let mut sessions = state.sessions.write().await;
    let Ok(session) = member_session(&mut sessions, session_id, participant_id) else {
        return;
    };
    let Some(participant) = session.presence.update_cursor(participant_id, at) else {
        return;
    };

    let frame = Frame::request(
        syscall::CURSOR_MOVE,
        json!({
            "participant_id": participant_id.to_string(),
            "x": at.x,
            "y": at.y,
            "color": participant.color,
        }),
    )
    .with_session_id(session_id)
    .with_from(participant_id);
    fan_out(session_id, session, Audience::AllExcept(participant_id), &frame);
    evict_if_empty(&mut sessions, session_id);
}

/// Refresh a participant's identity fields. Peers get the new registry; the
/// caller gets it back for a direct reply.
///
/// # Errors
///
/// Returns [`SessionError::NotFound`] / [`SessionError::NotJoined`].
pub async fn update_identity(
    state: &AppState,
    session_id: SessionId,
    participant_id: ParticipantId,
    info: ParticipantInfo,
) -> Result<Vec<Participant>, SessionError> {
    let mut sessions = state.sessions.write().await;
    let session = member_session(&mut sessions, session_id, participant_id)?;

    session.presence.update_identity(participant_id, info);
    let participants = session.presence.list().to_vec();
    let registry = registry_frame(session_id, session);
    fan_out(session_id, session, Audience::AllExcept(participant_id), &registry);
    evict_if_empty(&mut sessions, session_id);
    Ok(participants)
}

/// Relay a chat message to everyone in the session, sender included.
///
/// # Errors
///
/// Returns [`SessionError::NotFound`] / [`SessionError::NotJoined`].
pub async fn relay_chat(
    state: &AppState,
    session_id: SessionId,
    participant_id: ParticipantId,
    chat: ChatPayload,
) -> Result<(), SessionError> {
    let mut sessions = state.sessions.write().await;
    let session = member_session(&mut sessions, session_id, participant_id)?;

    let data = serde_json::to_value(&chat).unwrap_or_default();
    let frame = Frame::request(syscall::CHAT_MESSAGE, data)
        .with_session_id(session_id)
        .with_from(participant_id);
    fan_out(session_id, session, Audience::All, &frame);
    evict_if_empty(&mut sessions, session_id);
    Ok(())
}

// =============================================================================
// READ-ONLY ACCESS
// =============================================================================

/// Live sessions, ordered by id.
pub async fn session_summaries(state: &AppState) -> Vec<SessionSummary> {
    let sessions = state.sessions.read().await;
    let mut summaries: Vec<SessionSummary> = sessions
        .iter()
        .map(|(id, s)| SessionSummary { id: *id, participants: s.clients.len(), strokes: s.log.len() })
        .collect();
    summaries.sort_by_key(|s| s.id);
    summaries
}

/// Ordered stroke list of a live session.
pub async fn session_strokes(state: &AppState, session_id: SessionId) -> Option<Vec<Stroke>> {
    let sessions = state.sessions.read().await;
    sessions.get(&session_id).map(|s| s.log.snapshot())
}

// =============================================================================
// FAN-OUT
// =============================================================================

fn member_session(
    sessions: &mut HashMap<SessionId, SessionState>,
    session_id: SessionId,
    participant_id: ParticipantId,
) -> Result<&mut SessionState, SessionError> {
    let session = sessions.get_mut(&session_id).ok_or(SessionError::NotFound(session_id))?;
    if !session.clients.contains_key(&participant_id) {
        return Err(SessionError::NotJoined);
    }
    Ok(session)
}

fn registry_frame(session_id: SessionId, session: &SessionState) -> Frame {
    Frame::request(syscall::PRESENCE_ACTIVE, json!({ "participants": session.presence.list() }))
        .with_session_id(session_id)
}

/// Queue `frame` for `audience`, evicting anyone whose queue cannot take it.
fn fan_out(session_id: SessionId, session: &mut SessionState, audience: Audience, frame: &Frame) {
    let mut lagging = Vec::new();
    for (participant_id, tx) in &session.clients {
        if !audience.includes(*participant_id) {
            continue;
        }
        if let Err(e) = tx.try_send(frame.clone()) {
            let reason = match e {
                TrySendError::Full(_) => "queue full",
                TrySendError::Closed(_) => "queue closed",
            };
            warn!(%session_id, %participant_id, syscall = %frame.syscall, reason, "evicting participant");
            lagging.push(*participant_id);
        }
    }
    evict(session_id, session, lagging);
}

/// Drop lagging participants, then tell the rest. Telling the rest can lag
/// someone else, so this repeats until a round evicts nobody.
fn evict(session_id: SessionId, session: &mut SessionState, mut lagging: Vec<ParticipantId>) {
    while !lagging.is_empty() {
        for participant_id in std::mem::take(&mut lagging) {
            session.clients.remove(&participant_id);
            session.presence.remove(participant_id);
        }
        if session.clients.is_empty() {
            return;
        }

        let registry = registry_frame(session_id, session);
        for (participant_id, tx) in &session.clients {
            if tx.try_send(registry.clone()).is_err() {
                warn!(%session_id, %participant_id, "evicting participant during registry update");
                lagging.push(*participant_id);
            }
        }
    }
}

fn evict_if_empty(sessions: &mut HashMap<SessionId, SessionState>, session_id: SessionId) {
    if sessions.get(&session_id).is_some_and(|s| s.clients.is_empty()) {
        sessions.remove(&session_id);
        info!(%session_id, "evicted session from memory");
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
