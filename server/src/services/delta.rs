//! Delta validation and application against a session log.
//!
//! DESIGN
//! ======
//! Validation is split in two so nothing is ever half-applied:
//! - [`parse_and_validate`] checks payload shape and limits. It needs no
//!   session state and runs before the lock is taken.
//! - [`check`] checks stroke identity (known, owned by the sender, not yet
//!   completed, not a duplicate) and the [`LogCaps`] size bounds against the
//!   locked log.
//!
//! Only after both pass does [`apply`] mutate the log, exactly once.

use canvas::delta::StrokeDelta;
use canvas::presence::ParticipantId;
use canvas::stroke::{StrokeId, StrokeLimits, validate_points};
use frames::{ErrorCode, Frame};

use crate::state::SessionLog;

#[derive(Debug, thiserror::Error)]
pub enum DeltaError {
    #[error("invalid delta: {0}")]
    Invalid(String),
    #[error("unknown stroke: {0}")]
    UnknownStroke(StrokeId),
    #[error("stroke {0} belongs to another participant")]
    NotAuthor(StrokeId),
    #[error("stroke {0} is already completed")]
    Completed(StrokeId),
    #[error("stroke {0} already exists")]
    Duplicate(StrokeId),
    #[error("session holds the maximum of {max} strokes")]
    LogFull { max: usize },
    #[error("stroke {id} would exceed {max} points")]
    StrokeTooLong { id: StrokeId, max: usize },
}

/// Size bounds on the stored log, as opposed to the per-payload
/// [`StrokeLimits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogCaps {
    pub max_strokes: usize,
    pub max_points_per_stroke: usize,
}

impl ErrorCode for DeltaError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Invalid(_) => "E_INVALID_DELTA",
            Self::UnknownStroke(_) => "E_UNKNOWN_STROKE",
            Self::NotAuthor(_) => "E_NOT_STROKE_AUTHOR",
            Self::Completed(_) => "E_STROKE_COMPLETED",
            Self::Duplicate(_) => "E_DUPLICATE_STROKE",
            Self::LogFull { .. } => "E_SESSION_FULL",
            Self::StrokeTooLong { .. } => "E_STROKE_TOO_LONG",
        }
    }
}

/// Decode a `draw:*` request and check it against payload limits.
///
/// # Errors
///
/// Returns [`DeltaError::Invalid`] for malformed payloads and limit
/// violations.
pub fn parse_and_validate(req: &Frame, limits: &StrokeLimits) -> Result<StrokeDelta, DeltaError> {
    let delta = StrokeDelta::from_payload(&req.syscall, &req.data).map_err(|e| DeltaError::Invalid(e.to_string()))?;
    let checked = match &delta {
        StrokeDelta::Begin(stroke) => stroke.validate(limits),
        StrokeDelta::Extend { points, .. } => validate_points(points, limits),
        StrokeDelta::Complete { .. } => Ok(()),
    };
    checked.map_err(|e| DeltaError::Invalid(e.to_string()))?;
    Ok(delta)
}

/// Check stroke identity against the current log. Read-only.
///
/// # Errors
///
/// Returns the identity violation, if any.
pub fn check(log: &SessionLog, author: ParticipantId, delta: &StrokeDelta, caps: &LogCaps) -> Result<(), DeltaError> {
    let id = delta.stroke_id();
    if let StrokeDelta::Begin(stroke) = delta {
        if log.get(id).is_some() {
            return Err(DeltaError::Duplicate(id));
        }
        if log.len() >= caps.max_strokes {
            return Err(DeltaError::LogFull { max: caps.max_strokes });
        }
        if stroke.points.len() > caps.max_points_per_stroke {
            return Err(DeltaError::StrokeTooLong { id, max: caps.max_points_per_stroke });
        }
        return Ok(());
    }

    let Some(entry) = log.get(id) else {
        return Err(DeltaError::UnknownStroke(id));
    };
    if entry.author != author {
        return Err(DeltaError::NotAuthor(id));
    }
    if entry.completed {
        return Err(DeltaError::Completed(id));
    }
    let total = entry.stroke.points.len().saturating_add(delta.points().len());
    if total > caps.max_points_per_stroke {
        return Err(DeltaError::StrokeTooLong { id, max: caps.max_points_per_stroke });
    }
    Ok(())
}

/// Apply a delta that already passed [`check`]. Returns the sequence number
/// for a `Begin`.
pub fn apply(log: &mut SessionLog, author: ParticipantId, delta: &StrokeDelta) -> Option<u64> {
    match delta {
        StrokeDelta::Begin(stroke) => Some(log.append(stroke.clone(), author)),
        StrokeDelta::Extend { stroke_id, points } => {
            log.extend(*stroke_id, points);
            None
        }
        StrokeDelta::Complete { stroke_id } => {
            log.complete(*stroke_id);
            None
        }
    }
}

#[cfg(test)]
#[path = "delta_test.rs"]
mod tests;
