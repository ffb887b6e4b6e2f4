//! WebSocket handler — bidirectional frame relay.
//!
//! DESIGN
//! ======
//! On upgrade, generates a connection ID and enters a `select!` loop:
//! - Incoming client frames → decode + dispatch by syscall prefix
//! - Frames queued by the session store → forward to client
//!
//! Handler functions are pure protocol translation — they validate, call the
//! session store, and return an `Outcome`. The dispatch layer owns the direct
//! reply to the sender. Everything ordered relative to other participants
//! (fan-out, stroke and clear acks) travels through the outbound queue the
//! store writes to.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `connection_id`
//! 2. `session:join` → fresh outbound queue registered with the store, reply
//!    carries the snapshot
//! 3. Client sends frames → dispatch → handler returns Outcome
//! 4. Close, `session:leave`, or store eviction (queue closed) → `leave()`

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use canvas::presence::ParticipantId;
use canvas::stroke::Point;
use frames::{CodecError, ErrorCode, Frame, Status, syscall};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::services;
use crate::services::presence::ParticipantInfo;
use crate::services::session::{ChatPayload, SessionError};
use crate::state::{AppState, SessionId};

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide what the sender gets back directly.
enum Outcome {
    /// Send done+data to sender.
    Reply(Value),
    /// Send empty done to sender.
    Done,
    /// Nothing direct. Any ack travels through the outbound queue.
    NoReply,
}

/// Frame-level failures outside any session operation.
#[derive(Debug, thiserror::Error)]
enum GatewayError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("invalid json frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown syscall: {0}")]
    UnknownSyscall(String),
}

impl ErrorCode for GatewayError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Codec(_) | Self::Json(_) => "E_DECODE",
            Self::UnknownSyscall(_) => "E_UNKNOWN_SYSCALL",
        }
    }
}

// =============================================================================
// CONNECTION
// =============================================================================

/// Per-socket protocol state.
struct Connection {
    id: Uuid,
    joined: Option<(SessionId, ParticipantId)>,
    /// Present while joined. The store holds the only sender, so `None` from
    /// `recv` means the store evicted us.
    outbound: Option<mpsc::Receiver<Frame>>,
}

impl Connection {
    fn new() -> Self {
        Self { id: Uuid::new_v4(), joined: None, outbound: None }
    }

    fn session_id(&self) -> Option<SessionId> {
        self.joined.map(|(sid, _)| sid)
    }

    fn require_joined(&self) -> Result<(SessionId, ParticipantId), SessionError> {
        self.joined.ok_or(SessionError::NotJoined)
    }

    fn detach(&mut self) -> Option<(SessionId, ParticipantId)> {
        self.outbound = None;
        self.joined.take()
    }
}

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let mut conn = Connection::new();

    let welcome = Frame::request(syscall::SESSION_CONNECTED, json!({ "connection_id": conn.id.to_string() }));
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }
    info!(connection_id = %conn.id, "ws: client connected");

    'relay: loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                let replies = match msg {
                    Message::Binary(bytes) => process_inbound_bytes(&state, &mut conn, &bytes).await,
                    Message::Text(text) => process_inbound_text(&state, &mut conn, text.as_str()).await,
                    Message::Close(_) => break,
                    _ => continue,
                };
                for frame in replies {
                    if send_frame(&mut socket, &frame).await.is_err() {
                        break 'relay;
                    }
                }
            }
            queued = recv_outbound(&mut conn.outbound) => {
                let Some(frame) = queued else {
                    warn!(connection_id = %conn.id, "ws: evicted by session store");
                    break;
                };
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some((session_id, participant_id)) = conn.detach() {
        services::session::leave(&state, session_id, participant_id).await;
    }
    info!(connection_id = %conn.id, "ws: client disconnected");
}

/// Next queued frame, or pending forever while not joined.
async fn recv_outbound(outbound: &mut Option<mpsc::Receiver<Frame>>) -> Option<Frame> {
    match outbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Decode one binary (protobuf) frame and process it.
async fn process_inbound_bytes(state: &AppState, conn: &mut Connection, bytes: &[u8]) -> Vec<Frame> {
    match frames::decode_frame(bytes) {
        Ok(req) => process_frame(state, conn, req).await,
        Err(e) => vec![gateway_error(conn, &GatewayError::from(e))],
    }
}

/// Decode one JSON text frame and process it.
async fn process_inbound_text(state: &AppState, conn: &mut Connection, text: &str) -> Vec<Frame> {
    match serde_json::from_str::<Frame>(text) {
        Ok(req) => process_frame(state, conn, req).await,
        Err(e) => vec![gateway_error(conn, &GatewayError::from(e))],
    }
}

/// Dispatch a decoded frame and return frames for the sender.
async fn process_frame(state: &AppState, conn: &mut Connection, mut req: Frame) -> Vec<Frame> {
    if let Some((session_id, participant_id)) = conn.joined {
        req.from = Some(participant_id.to_string());
        if req.session_id.is_none() {
            req.session_id = Some(session_id.to_string());
        }
    }

    let prefix = req.prefix();
    if prefix != "cursor" {
        info!(connection_id = %conn.id, id = %req.id, syscall = %req.syscall, "ws: recv frame");
    }

    let result = match prefix {
        "session" => handle_session(state, conn, &req).await,
        "draw" => handle_draw(state, conn, &req).await,
        "canvas" => handle_canvas(state, conn, &req).await,
        "cursor" => Ok(handle_cursor(state, conn, &req).await),
        "presence" => handle_presence(state, conn, &req).await,
        "chat" => handle_chat(state, conn, &req).await,
        "invite" => handle_invite(conn, &req),
        _ => Err(req.error_from(&GatewayError::UnknownSyscall(req.syscall.clone()))),
    };

    let reply = match result {
        Ok(Outcome::Reply(data)) => req.done_with(data),
        Ok(Outcome::Done) => req.done(),
        Ok(Outcome::NoReply) => return Vec::new(),
        Err(err_frame) => err_frame,
    };
    match conn.session_id() {
        Some(sid) if reply.session_id.is_none() => vec![reply.with_session_id(sid)],
        _ => vec![reply],
    }
}

// =============================================================================
// SESSION HANDLERS
// =============================================================================

async fn handle_session(state: &AppState, conn: &mut Connection, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "join" => {
            if let Some(current) = conn.session_id() {
                return Err(req.error_from(&SessionError::AlreadyJoined(current)));
            }
            let raw = req
                .session_id
                .as_deref()
                .or_else(|| req.str_field("session_id"))
                .unwrap_or_default();
            let session_id: SessionId =
                raw.parse().map_err(|_| req.error_from(&SessionError::InvalidSessionId(raw.to_owned())))?;
            let identity = ParticipantInfo::from_payload(&req.data);

            let (tx, rx) = mpsc::channel(state.config.outbound_queue_capacity);
            let snapshot = services::session::join(state, session_id, identity, tx).await;
            conn.joined = Some((session_id, snapshot.participant.id));
            conn.outbound = Some(rx);

            let data = serde_json::to_value(&snapshot).unwrap_or_default();
            Ok(Outcome::Reply(data))
        }
        "leave" => {
            let Some((session_id, participant_id)) = conn.detach() else {
                return Err(req.error_from(&SessionError::NotJoined));
            };
            services::session::leave(state, session_id, participant_id).await;
            Ok(Outcome::Done)
        }
        op => Err(req.error_from(&GatewayError::UnknownSyscall(format!("session:{op}")))),
    }
}

// =============================================================================
// DRAW / CANVAS HANDLERS
// =============================================================================

async fn handle_draw(state: &AppState, conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    let (session_id, participant_id) = conn.require_joined().map_err(|e| nack(req, &e))?;
    let delta = services::delta::parse_and_validate(req, &state.config.limits).map_err(|e| nack(req, &e))?;
    services::session::append_delta(state, session_id, participant_id, req, delta)
        .await
        .map_err(|e| nack(req, &e))?;
    Ok(Outcome::NoReply)
}

async fn handle_canvas(state: &AppState, conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "clear" => {
            let (session_id, participant_id) = conn.require_joined().map_err(|e| req.error_from(&e))?;
            services::session::clear_session(state, session_id, participant_id, req)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::NoReply)
        }
        op => Err(req.error_from(&GatewayError::UnknownSyscall(format!("canvas:{op}")))),
    }
}

// =============================================================================
// PRESENCE HANDLERS
// =============================================================================

async fn handle_cursor(state: &AppState, conn: &Connection, req: &Frame) -> Outcome {
    // Silently ignore cursor moves before joining.
    let Some((session_id, participant_id)) = conn.joined else {
        return Outcome::NoReply;
    };

    let x = req.field("x").and_then(Value::as_f64);
    let y = req.field("y").and_then(Value::as_f64);
    if let (Some(x), Some(y)) = (x, y) {
        let at = Point::new(x, y);
        if at.is_finite() {
            services::session::update_cursor(state, session_id, participant_id, at).await;
        }
    }
    Outcome::NoReply
}

async fn handle_presence(state: &AppState, conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "check" => {
            let (session_id, participant_id) = conn.require_joined().map_err(|e| req.error_from(&e))?;
            let identity = ParticipantInfo::from_payload(&req.data);
            let participants = services::session::update_identity(state, session_id, participant_id, identity)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(json!({ "participants": participants })))
        }
        op => Err(req.error_from(&GatewayError::UnknownSyscall(format!("presence:{op}")))),
    }
}

async fn handle_chat(state: &AppState, conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "send" => {
            let (session_id, participant_id) = conn.require_joined().map_err(|e| req.error_from(&e))?;
            let Some(message) = req.str_field("message") else {
                return Err(req.error_from(&SessionError::InvalidPayload("message required")));
            };
            let chat = ChatPayload {
                name: req.str_field("name").unwrap_or_default().to_owned(),
                message: message.to_owned(),
                email: req.str_field("email").unwrap_or_default().to_owned(),
            };
            services::session::relay_chat(state, session_id, participant_id, chat)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Done)
        }
        op => Err(req.error_from(&GatewayError::UnknownSyscall(format!("chat:{op}")))),
    }
}

fn handle_invite(conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    let (session_id, participant_id) = conn.require_joined().map_err(|e| req.error_from(&e))?;
    let Some(email) = req.str_field("email").filter(|e| !e.trim().is_empty()) else {
        return Err(req.error_from(&SessionError::InvalidPayload("email required")));
    };
    info!(%session_id, %participant_id, %email, "invite requested");
    Ok(Outcome::Done)
}

// =============================================================================
// HELPERS
// =============================================================================

/// Error reply for a rejected delta. A rejected `draw:begin` names its stroke
/// so the client can drop it.
fn nack(req: &Frame, err: &impl ErrorCode) -> Frame {
    warn!(syscall = %req.syscall, code = err.error_code(), error = %err, "ws: delta rejected");
    let frame = req.error_from(err);
    match req.str_field("stroke_id") {
        Some(stroke_id) if req.syscall == syscall::DRAW_BEGIN => frame.with_data("stroke_id", stroke_id),
        _ => frame,
    }
}

fn gateway_error(conn: &Connection, err: &GatewayError) -> Frame {
    warn!(connection_id = %conn.id, error = %err, "ws: invalid inbound frame");
    let mut frame = Frame::request(syscall::GATEWAY_ERROR, Value::Null)
        .with_data(frames::FRAME_CODE, err.error_code())
        .with_data(frames::FRAME_MESSAGE, err.to_string())
        .with_data(frames::FRAME_RETRYABLE, err.retryable());
    frame.status = Status::Error;
    frame
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), axum::Error> {
    if !frame.syscall.starts_with("cursor:") {
        if frame.status == Status::Error {
            let code = frame.error_code().unwrap_or("-");
            let message = frame.str_field(frames::FRAME_MESSAGE).unwrap_or("-");
            warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
        } else {
            info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
        }
    }
    socket.send(Message::Binary(frames::encode_frame(frame).into())).await
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
