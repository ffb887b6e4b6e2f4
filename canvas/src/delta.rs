//! Deltas: incremental drawing updates and their payload encoding.
//!
//! A [`StrokeDelta`] is scoped to one stroke identity. Deltas reach an
//! [`crate::log::EditLog`] tagged as [`Change::Local`] (fed by input, undoable)
//! or [`Change::Remote`] (fed by the session store, never undoable).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stroke::{Point, Stroke, StrokeId};

/// One incremental update to a single stroke.
#[derive(Debug, Clone, PartialEq)]
pub enum StrokeDelta {
    /// A new stroke with its first point(s).
    Begin(Stroke),
    /// Points appended to the end of an existing stroke.
    Extend { stroke_id: StrokeId, points: Vec<Point> },
    /// The author released the pointer; no more points follow.
    Complete { stroke_id: StrokeId },
}

/// Update originating from the session store.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteUpdate {
    Stroke(StrokeDelta),
    /// Full ordered stroke list, received once per join.
    Snapshot(Vec<Stroke>),
    Clear,
}

/// Mutation originating from this client's own input.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalChange {
    Stroke(StrokeDelta),
    Clear,
}

/// A change tagged with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Local(LocalChange),
    Remote(RemoteUpdate),
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("malformed {syscall} payload: {source}")]
    Malformed {
        syscall: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("not a stroke syscall: {0}")]
    UnknownSyscall(String),
}

#[derive(Serialize, Deserialize)]
struct ExtendPayload {
    stroke_id: StrokeId,
    points: Vec<Point>,
}

#[derive(Serialize, Deserialize)]
struct CompletePayload {
    stroke_id: StrokeId,
}

impl StrokeDelta {
    #[must_use]
    pub fn stroke_id(&self) -> StrokeId {
        match self {
            Self::Begin(stroke) => stroke.id,
            Self::Extend { stroke_id, .. } | Self::Complete { stroke_id } => *stroke_id,
        }
    }

    /// Points carried by this delta (empty for `Complete`).
    #[must_use]
    pub fn points(&self) -> &[Point] {
        match self {
            Self::Begin(stroke) => &stroke.points,
            Self::Extend { points, .. } => points,
            Self::Complete { .. } => &[],
        }
    }

    /// Syscall this delta travels under.
    #[must_use]
    pub fn syscall(&self) -> &'static str {
        match self {
            Self::Begin(_) => frames::syscall::DRAW_BEGIN,
            Self::Extend { .. } => frames::syscall::DRAW_EXTEND,
            Self::Complete { .. } => frames::syscall::DRAW_COMPLETE,
        }
    }

    /// Encode as a frame payload.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        let encoded = match self {
            Self::Begin(stroke) => serde_json::to_value(stroke),
            Self::Extend { stroke_id, points } => {
                serde_json::to_value(ExtendPayload { stroke_id: *stroke_id, points: points.clone() })
            }
            Self::Complete { stroke_id } => serde_json::to_value(CompletePayload { stroke_id: *stroke_id }),
        };
        // These payload structs contain only strings, integers and floats.
        encoded.unwrap_or(Value::Null)
    }

    /// Decode a delta from a `draw:*` syscall and its payload.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::UnknownSyscall`] for anything other than the
    /// three `draw:*` syscalls, and [`PayloadError::Malformed`] when the
    /// payload does not have the expected shape.
    pub fn from_payload(syscall: &str, data: &Value) -> Result<Self, PayloadError> {
        let malformed = |source| PayloadError::Malformed { syscall: syscall.to_owned(), source };
        match syscall {
            frames::syscall::DRAW_BEGIN => Stroke::deserialize(data).map(Self::Begin).map_err(malformed),
            frames::syscall::DRAW_EXTEND => ExtendPayload::deserialize(data)
                .map(|p| Self::Extend { stroke_id: p.stroke_id, points: p.points })
                .map_err(malformed),
            frames::syscall::DRAW_COMPLETE => CompletePayload::deserialize(data)
                .map(|p| Self::Complete { stroke_id: p.stroke_id })
                .map_err(malformed),
            other => Err(PayloadError::UnknownSyscall(other.to_owned())),
        }
    }
}

/// Decode an ordered stroke list (snapshot payloads).
///
/// # Errors
///
/// Returns [`PayloadError::Malformed`] if any entry is not a stroke.
pub fn strokes_from_value(syscall: &str, value: &Value) -> Result<Vec<Stroke>, PayloadError> {
    Vec::<Stroke>::deserialize(value).map_err(|source| PayloadError::Malformed { syscall: syscall.to_owned(), source })
}
