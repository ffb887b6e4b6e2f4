//! Client synchronization engine: one connection's view of a session.
//!
//! DESIGN
//! ======
//! [`SyncClient`] is a pure state machine. The host feeds it every decoded
//! inbound frame through [`SyncClient::handle_frame`] and ships every frame
//! its local entry points return. It never touches a socket, so the same
//! engine drives the CLI, a browser shell and the in-process tests.
//!
//! ```text
//! Connecting ──join done──▶ Joined ──first delta──▶ Active
//!      ▲                       │                      │
//!      └──── reconnect() ──── Disconnected ◀──────────┘
//!                              (leave, transport loss)
//! ```
//!
//! Acknowledgements arrive on the same ordered stream as broadcasts, so the
//! log can tell which strokes the store has already ordered (see
//! [`crate::log`]).

#[cfg(test)]
#[path = "sync_test.rs"]
mod sync_test;

use frames::{Frame, Status, syscall};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::delta::{Change, PayloadError, RemoteUpdate, StrokeDelta, strokes_from_value};
use crate::log::{EditLog, LogError, StrokeHandle};
use crate::presence::{Participant, ParticipantId, PresenceView};
use crate::stroke::{Point, Stroke, StrokeId, Tool};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Joined,
    Active,
    Disconnected,
}

/// Identity fields sent on join and presence checks. Opaque to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
    /// Presence color; the store assigns one from its palette when absent.
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub email: String,
}

/// What changed as a result of an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Connected { connection_id: String },
    Joined { participant_id: ParticipantId },
    LogChanged,
    PresenceChanged,
    Chat(ChatMessage),
    /// The store refused one of our requests.
    Rejected { syscall: String, code: String, message: String },
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("connection is closed")]
    Disconnected,
    #[error("not joined to a session")]
    NotJoined,
    #[error(transparent)]
    Log(#[from] LogError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

#[derive(Deserialize)]
struct JoinReply {
    participant: Participant,
    strokes: Value,
    #[serde(default)]
    participants: Vec<Participant>,
}

#[derive(Deserialize)]
struct StrokeAck {
    stroke_id: StrokeId,
}

#[derive(Deserialize)]
struct CursorPayload {
    participant_id: ParticipantId,
    x: f64,
    y: f64,
}

#[derive(Deserialize)]
struct RegistryPayload {
    participants: Vec<Participant>,
}

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Debug)]
pub struct SyncClient {
    session_id: Uuid,
    identity: Identity,
    state: ConnectionState,
    connection_id: Option<String>,
    participant_id: Option<ParticipantId>,
    log: EditLog,
    presence: PresenceView,
}

impl SyncClient {
    #[must_use]
    pub fn new(session_id: Uuid, identity: Identity) -> Self {
        Self::with_log(session_id, identity, EditLog::new())
    }

    /// Start from a preconfigured log (custom stroke limits).
    #[must_use]
    pub fn with_log(session_id: Uuid, identity: Identity, log: EditLog) -> Self {
        Self {
            session_id,
            identity,
            state: ConnectionState::Connecting,
            connection_id: None,
            participant_id: None,
            log,
            presence: PresenceView::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    #[must_use]
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    #[must_use]
    pub fn participant_id(&self) -> Option<ParticipantId> {
        self.participant_id
    }

    #[must_use]
    pub fn log(&self) -> &EditLog {
        &self.log
    }

    #[must_use]
    pub fn strokes(&self) -> &[Stroke] {
        self.log.strokes()
    }

    #[must_use]
    pub fn presence(&self) -> &PresenceView {
        &self.presence
    }

    #[must_use]
    pub fn join_frame(&self) -> Frame {
        self.request(syscall::SESSION_JOIN, self.identity_payload())
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Apply one inbound frame.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Disconnected`] after leave or transport loss and
    /// [`SyncError::Payload`] when a frame we act on has the wrong shape.
    pub fn handle_frame(&mut self, frame: &Frame) -> Result<Vec<SyncEvent>, SyncError> {
        if self.state == ConnectionState::Disconnected {
            return Err(SyncError::Disconnected);
        }

        match (frame.syscall.as_str(), frame.status) {
            (syscall::SESSION_CONNECTED, _) => {
                let connection_id = frame.str_field("connection_id").unwrap_or_default().to_owned();
                self.connection_id = Some(connection_id.clone());
                Ok(vec![SyncEvent::Connected { connection_id }])
            }
            (syscall::SESSION_JOIN, Status::Done) => self.on_joined(frame),
            (_, Status::Error) => Ok(self.on_rejected(frame)),
            _ if !self.is_joined() => {
                debug!(syscall = %frame.syscall, "frame before join ignored");
                Ok(Vec::new())
            }
            (syscall::DRAW_BEGIN, Status::Done) => {
                let ack = decode::<StrokeAck>(frame)?;
                self.log.acknowledge_stroke(ack.stroke_id);
                Ok(Vec::new())
            }
            (syscall::CANVAS_CLEAR, Status::Done) => {
                let changed = self.log.acknowledge_clear();
                Ok(changed.then_some(SyncEvent::LogChanged).into_iter().collect())
            }
            (syscall::DRAW_BEGIN | syscall::DRAW_EXTEND | syscall::DRAW_COMPLETE, Status::Request) => {
                let delta = StrokeDelta::from_payload(&frame.syscall, &frame.data)?;
                self.apply_remote(RemoteUpdate::Stroke(delta))
            }
            (syscall::CANVAS_CLEARED, Status::Request) => self.apply_remote(RemoteUpdate::Clear),
            (syscall::CURSOR_MOVE, Status::Request) => {
                let cursor = decode::<CursorPayload>(frame)?;
                let moved = self.presence.apply_cursor(cursor.participant_id, Point::new(cursor.x, cursor.y));
                Ok(moved.then_some(SyncEvent::PresenceChanged).into_iter().collect())
            }
            (syscall::PRESENCE_ACTIVE, _) | (syscall::PRESENCE_CHECK, Status::Done) => {
                let registry = decode::<RegistryPayload>(frame)?;
                self.presence.replace_all(registry.participants);
                Ok(vec![SyncEvent::PresenceChanged])
            }
            (syscall::CHAT_MESSAGE, _) => Ok(vec![SyncEvent::Chat(decode::<ChatMessage>(frame)?)]),
            _ => {
                debug!(syscall = %frame.syscall, status = ?frame.status, "unhandled frame");
                Ok(Vec::new())
            }
        }
    }

    fn on_joined(&mut self, frame: &Frame) -> Result<Vec<SyncEvent>, SyncError> {
        let reply = decode::<JoinReply>(frame)?;
        let strokes = strokes_from_value(&frame.syscall, &reply.strokes)?;
        let participant_id = reply.participant.id;

        self.log.apply(Change::Remote(RemoteUpdate::Snapshot(strokes)))?;
        self.presence.replace_all(reply.participants);
        self.participant_id = Some(participant_id);
        self.state = ConnectionState::Joined;

        info!(session_id = %self.session_id, %participant_id, strokes = self.log.strokes().len(), "joined session");
        Ok(vec![SyncEvent::Joined { participant_id }, SyncEvent::LogChanged, SyncEvent::PresenceChanged])
    }

    fn on_rejected(&mut self, frame: &Frame) -> Vec<SyncEvent> {
        let code = frame.error_code().unwrap_or_default().to_owned();
        let message = frame.str_field(frames::FRAME_MESSAGE).unwrap_or_default().to_owned();
        warn!(syscall = %frame.syscall, %code, %message, "request rejected");

        let mut events = Vec::new();
        match frame.syscall.as_str() {
            syscall::DRAW_BEGIN => {
                if let Some(Ok(stroke_id)) = frame.str_field("stroke_id").map(Uuid::parse_str) {
                    if self.log.reject_stroke(stroke_id) {
                        events.push(SyncEvent::LogChanged);
                    }
                }
            }
            syscall::CANVAS_CLEAR => {
                self.log.reject_clear();
            }
            _ => {}
        }
        events.push(SyncEvent::Rejected { syscall: frame.syscall.clone(), code, message });
        events
    }

    fn apply_remote(&mut self, update: RemoteUpdate) -> Result<Vec<SyncEvent>, SyncError> {
        self.mark_active();
        let changed = self.log.apply(Change::Remote(update))?;
        Ok(changed.then_some(SyncEvent::LogChanged).into_iter().collect())
    }

    // =========================================================================
    // LOCAL ENTRY POINTS
    // =========================================================================

    /// Start a stroke locally. Returns the handle and the frame to send.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotJoined`] / [`SyncError::Disconnected`] outside a
    /// session, [`SyncError::Log`] when the stroke is invalid.
    pub fn begin_stroke(
        &mut self,
        tool: Tool,
        color: impl Into<String>,
        width: u32,
        origin: Point,
    ) -> Result<(StrokeHandle, Frame), SyncError> {
        self.require_joined()?;
        let (handle, delta) = self.log.begin_stroke(tool, color, width, origin)?;
        self.mark_active();
        Ok((handle, self.delta_frame(&delta)))
    }

    /// Append one point. Each call produces exactly one frame.
    ///
    /// # Errors
    ///
    /// See [`SyncClient::begin_stroke`].
    pub fn extend_stroke(&mut self, handle: StrokeHandle, point: Point) -> Result<Frame, SyncError> {
        self.require_joined()?;
        let delta = self.log.extend_stroke(handle, point)?;
        Ok(self.delta_frame(&delta))
    }

    /// # Errors
    ///
    /// See [`SyncClient::begin_stroke`].
    pub fn complete_stroke(&mut self, handle: StrokeHandle) -> Result<Frame, SyncError> {
        self.require_joined()?;
        let delta = self.log.complete_stroke(handle)?;
        Ok(self.delta_frame(&delta))
    }

    /// Clear locally and return the `canvas:clear` request.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotJoined`] / [`SyncError::Disconnected`] outside a session.
    pub fn clear(&mut self) -> Result<Frame, SyncError> {
        self.require_joined()?;
        self.log.clear();
        self.mark_active();
        Ok(self.request(syscall::CANVAS_CLEAR, Value::Null))
    }

    /// Local-only; nothing is sent.
    pub fn undo(&mut self) -> &[Stroke] {
        self.log.undo()
    }

    /// Local-only; nothing is sent.
    pub fn redo(&mut self) -> &[Stroke] {
        self.log.redo()
    }

    /// # Errors
    ///
    /// [`SyncError::NotJoined`] / [`SyncError::Disconnected`] outside a session.
    pub fn cursor_move(&mut self, at: Point) -> Result<Frame, SyncError> {
        self.require_joined()?;
        Ok(self.request(syscall::CURSOR_MOVE, json!({ "x": at.x, "y": at.y })))
    }

    /// # Errors
    ///
    /// [`SyncError::NotJoined`] / [`SyncError::Disconnected`] outside a session.
    pub fn chat(&self, message: impl Into<String>) -> Result<Frame, SyncError> {
        self.require_joined()?;
        let data = json!({
            "name": self.identity.name,
            "message": message.into(),
            "email": self.identity.email,
        });
        Ok(self.request(syscall::CHAT_SEND, data))
    }

    /// # Errors
    ///
    /// [`SyncError::NotJoined`] / [`SyncError::Disconnected`] outside a session.
    pub fn invite(&self, email: impl Into<String>) -> Result<Frame, SyncError> {
        self.require_joined()?;
        Ok(self.request(syscall::INVITE_SEND, json!({ "email": email.into() })))
    }

    /// Push updated identity fields and refresh the registry.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotJoined`] / [`SyncError::Disconnected`] outside a session.
    pub fn check_presence(&mut self, identity: Identity) -> Result<Frame, SyncError> {
        self.require_joined()?;
        self.identity = identity;
        Ok(self.request(syscall::PRESENCE_CHECK, self.identity_payload()))
    }

    /// Explicitly leave. Returns the frame to send, if we were in a session.
    pub fn leave(&mut self) -> Option<Frame> {
        let was_joined = self.is_joined();
        self.state = ConnectionState::Disconnected;
        was_joined.then(|| self.request(syscall::SESSION_LEAVE, Value::Null))
    }

    /// The transport dropped. Terminal until [`SyncClient::reconnect`].
    pub fn transport_lost(&mut self) -> SyncEvent {
        if self.state != ConnectionState::Disconnected {
            warn!(session_id = %self.session_id, "transport lost");
        }
        self.state = ConnectionState::Disconnected;
        SyncEvent::Disconnected
    }

    /// Reset for a fresh connection and return its join request. The log is
    /// kept until the new snapshot replaces it; in-flight work is discarded
    /// then.
    pub fn reconnect(&mut self) -> Frame {
        self.state = ConnectionState::Connecting;
        self.connection_id = None;
        self.participant_id = None;
        self.presence.clear();
        self.join_frame()
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn is_joined(&self) -> bool {
        matches!(self.state, ConnectionState::Joined | ConnectionState::Active)
    }

    fn require_joined(&self) -> Result<(), SyncError> {
        match self.state {
            ConnectionState::Joined | ConnectionState::Active => Ok(()),
            ConnectionState::Connecting => Err(SyncError::NotJoined),
            ConnectionState::Disconnected => Err(SyncError::Disconnected),
        }
    }

    fn mark_active(&mut self) {
        if self.state == ConnectionState::Joined {
            self.state = ConnectionState::Active;
        }
    }

    fn request(&self, syscall: &str, data: Value) -> Frame {
        Frame::request(syscall, data).with_session_id(self.session_id)
    }

    fn delta_frame(&self, delta: &StrokeDelta) -> Frame {
        self.request(delta.syscall(), delta.to_payload())
    }

    fn identity_payload(&self) -> Value {
        let mut data = Map::new();
        data.insert("name".into(), Value::String(self.identity.name.clone()));
        data.insert("email".into(), Value::String(self.identity.email.clone()));
        if let Some(color) = &self.identity.color {
            data.insert("color".into(), Value::String(color.clone()));
        }
        Value::Object(data)
    }
}

fn decode<T: for<'de> Deserialize<'de>>(frame: &Frame) -> Result<T, PayloadError> {
    T::deserialize(&frame.data).map_err(|source| PayloadError::Malformed { syscall: frame.syscall.clone(), source })
}
