//! Local edit log: a client's working copy of the session log.
//!
//! DESIGN
//! ======
//! The log is an ordered stroke list plus two stacks of by-value snapshots.
//! Every local mutation that starts something (a new stroke, a clear) pushes
//! the pre-mutation list onto `undo` and empties `redo`. Remote updates mutate
//! the list but never touch either stack.
//!
//! RECONCILIATION
//! ==============
//! The store orders strokes by arrival, so a local stroke drawn while a peer's
//! stroke was in flight can land after it on the store. The log keeps local
//! operations in `pending` until the store acknowledges them:
//! - remote strokes are inserted ahead of the first pending stroke, so every
//!   pending stroke sits after every committed one;
//! - a remote clear drops committed strokes and keeps pending ones, which the
//!   store orders after that clear;
//! - our own clear already emptied the list locally, so its ack only drops
//!   the remote strokes that arrived while it was in flight (the store ordered
//!   those before it). Strokes brought back by undo/redo stay;
//! - a rejected stroke is removed outright, from the list and from every
//!   undo/redo snapshot.
//!
//! Undo and redo swap whole snapshots and do not retract anything on the
//! store; the restored list may differ from the session log afterwards.

#[cfg(test)]
#[path = "log_test.rs"]
mod log_test;

use std::collections::VecDeque;

use tracing::debug;

use crate::delta::{Change, LocalChange, RemoteUpdate, StrokeDelta};
use crate::stroke::{Point, Stroke, StrokeError, StrokeId, StrokeLimits, Tool, validate_points};

/// Handle to the stroke currently being drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrokeHandle(StrokeId);

impl StrokeHandle {
    #[must_use]
    pub fn id(self) -> StrokeId {
        self.0
    }
}

/// A local operation sent to the store and not yet acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pending {
    Stroke(StrokeId),
    Clear,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LogError {
    #[error("no active stroke for handle {0}")]
    InvalidHandle(StrokeId),
    #[error("stroke {0} already exists")]
    DuplicateStroke(StrokeId),
    #[error("invalid stroke: {0}")]
    InvalidStroke(#[from] StrokeError),
}

#[derive(Debug, Clone, Default)]
pub struct EditLog {
    strokes: Vec<Stroke>,
    undo: Vec<Vec<Stroke>>,
    redo: Vec<Vec<Stroke>>,
    pending: VecDeque<Pending>,
    /// Remote strokes received while one of our clears was in flight.
    before_clear: Vec<StrokeId>,
    active: Option<StrokeId>,
    limits: StrokeLimits,
}

impl EditLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limits(limits: StrokeLimits) -> Self {
        Self { limits, ..Self::default() }
    }

    /// Current ordered stroke list, for rendering.
    #[must_use]
    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    #[must_use]
    pub fn stroke(&self, id: StrokeId) -> Option<&Stroke> {
        self.strokes.iter().find(|s| s.id == id)
    }

    #[must_use]
    pub fn active(&self) -> Option<StrokeHandle> {
        self.active.map(StrokeHandle)
    }

    #[must_use]
    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    #[must_use]
    pub fn redo_depth(&self) -> usize {
        self.redo.len()
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> &VecDeque<Pending> {
        &self.pending
    }

    #[must_use]
    pub fn is_pending(&self, id: StrokeId) -> bool {
        self.pending.contains(&Pending::Stroke(id))
    }

    // =========================================================================
    // STROKE API
    // =========================================================================

    /// Start a stroke at `origin`. The returned delta must be forwarded.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidStroke`] if the stroke breaks the limits.
    pub fn begin_stroke(
        &mut self,
        tool: Tool,
        color: impl Into<String>,
        width: u32,
        origin: Point,
    ) -> Result<(StrokeHandle, StrokeDelta), LogError> {
        let stroke = Stroke::new(tool, color, width, origin);
        let handle = StrokeHandle(stroke.id);
        let delta = StrokeDelta::Begin(stroke);
        self.apply_local(LocalChange::Stroke(delta.clone()))?;
        Ok((handle, delta))
    }

    /// Append one point to the active stroke. Each accepted point is its own
    /// delta and should go out as its own frame.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidHandle`] if `handle` is not the active
    /// stroke (unknown, completed, or removed by a clear/undo/snapshot).
    pub fn extend_stroke(&mut self, handle: StrokeHandle, point: Point) -> Result<StrokeDelta, LogError> {
        let delta = StrokeDelta::Extend { stroke_id: handle.0, points: vec![point] };
        self.apply_local(LocalChange::Stroke(delta.clone()))?;
        Ok(delta)
    }

    /// Finish the active stroke.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidHandle`] under the same conditions as
    /// [`EditLog::extend_stroke`].
    pub fn complete_stroke(&mut self, handle: StrokeHandle) -> Result<StrokeDelta, LogError> {
        let delta = StrokeDelta::Complete { stroke_id: handle.0 };
        self.apply_local(LocalChange::Stroke(delta.clone()))?;
        Ok(delta)
    }

    /// Empty the log as a local, undoable mutation.
    pub fn clear(&mut self) {
        self.snapshot_for_undo();
        self.redo.clear();
        self.strokes.clear();
        self.pending.push_back(Pending::Clear);
        self.active = None;
    }

    // =========================================================================
    // APPLY
    // =========================================================================

    /// Apply a tagged change.
    ///
    /// # Errors
    ///
    /// Only local changes can fail; remote updates are applied best-effort.
    pub fn apply(&mut self, change: Change) -> Result<bool, LogError> {
        match change {
            Change::Local(local) => self.apply_local(local).map(|()| true),
            Change::Remote(remote) => Ok(self.apply_remote(remote)),
        }
    }

    /// Optimistically apply a local change.
    ///
    /// # Errors
    ///
    /// See [`EditLog::begin_stroke`] and [`EditLog::extend_stroke`].
    pub fn apply_local(&mut self, change: LocalChange) -> Result<(), LogError> {
        match change {
            LocalChange::Clear => {
                self.clear();
                Ok(())
            }
            LocalChange::Stroke(StrokeDelta::Begin(stroke)) => {
                stroke.validate(&self.limits)?;
                if self.stroke(stroke.id).is_some() {
                    return Err(LogError::DuplicateStroke(stroke.id));
                }
                self.snapshot_for_undo();
                self.redo.clear();
                self.active = Some(stroke.id);
                self.pending.push_back(Pending::Stroke(stroke.id));
                self.strokes.push(stroke);
                Ok(())
            }
            LocalChange::Stroke(StrokeDelta::Extend { stroke_id, points }) => {
                validate_points(&points, &self.limits)?;
                let stroke = self.active_stroke_mut(stroke_id)?;
                stroke.points.extend(points);
                self.redo.clear();
                Ok(())
            }
            LocalChange::Stroke(StrokeDelta::Complete { stroke_id }) => {
                self.active_stroke_mut(stroke_id)?;
                self.active = None;
                Ok(())
            }
        }
    }

    /// Apply an update from the session store. Returns whether the stroke
    /// list changed. Never touches undo/redo.
    pub fn apply_remote(&mut self, update: RemoteUpdate) -> bool {
        match update {
            RemoteUpdate::Snapshot(strokes) => {
                self.strokes = strokes;
                self.pending.clear();
                self.before_clear.clear();
                self.active = None;
                true
            }
            RemoteUpdate::Clear => self.drop_committed(),
            RemoteUpdate::Stroke(StrokeDelta::Begin(stroke)) => {
                if self.stroke(stroke.id).is_some() {
                    debug!(stroke_id = %stroke.id, "remote begin for known stroke ignored");
                    return false;
                }
                if self.pending.contains(&Pending::Clear) {
                    self.before_clear.push(stroke.id);
                }
                let at = self.committed_end();
                self.strokes.insert(at, stroke);
                true
            }
            RemoteUpdate::Stroke(StrokeDelta::Extend { stroke_id, points }) => {
                let Some(stroke) = self.strokes.iter_mut().find(|s| s.id == stroke_id) else {
                    debug!(%stroke_id, "remote extend for unknown stroke ignored");
                    return false;
                };
                stroke.points.extend(points);
                true
            }
            RemoteUpdate::Stroke(StrokeDelta::Complete { .. }) => false,
        }
    }

    // =========================================================================
    // ACKNOWLEDGEMENT
    // =========================================================================

    /// The store committed our stroke. Returns false if it was not pending.
    pub fn acknowledge_stroke(&mut self, id: StrokeId) -> bool {
        let Some(pos) = self.pending.iter().position(|p| *p == Pending::Stroke(id)) else {
            return false;
        };
        self.pending.remove(pos);
        true
    }

    /// The store applied our clear. Drops the remote strokes it ordered
    /// before the clear; the rest of the list is already post-clear.
    pub fn acknowledge_clear(&mut self) -> bool {
        if !self.take_pending_clear() {
            return false;
        }
        let superseded = std::mem::take(&mut self.before_clear);
        self.strokes.retain(|s| !superseded.contains(&s.id));
        self.retain_active();
        true
    }

    /// The store refused our clear. The optimistic empty list stays; a host
    /// that needs the store's view re-joins for a fresh snapshot.
    pub fn reject_clear(&mut self) -> bool {
        if !self.take_pending_clear() {
            return false;
        }
        if !self.pending.contains(&Pending::Clear) {
            self.before_clear.clear();
        }
        true
    }

    /// The store refused our stroke. Removes it from the log.
    pub fn reject_stroke(&mut self, id: StrokeId) -> bool {
        let Some(pos) = self.pending.iter().position(|p| *p == Pending::Stroke(id)) else {
            return false;
        };
        self.pending.remove(pos);
        self.strokes.retain(|s| s.id != id);
        for snapshot in self.undo.iter_mut().chain(self.redo.iter_mut()) {
            snapshot.retain(|s| s.id != id);
        }
        self.retain_active();
        true
    }

    // =========================================================================
    // UNDO / REDO
    // =========================================================================

    /// Push a by-value copy of the current list onto the undo stack.
    pub fn snapshot_for_undo(&mut self) {
        self.undo.push(self.strokes.clone());
    }

    /// Restore the list from before the last local mutation. No-op when the
    /// undo stack is empty.
    pub fn undo(&mut self) -> &[Stroke] {
        if let Some(previous) = self.undo.pop() {
            let current = std::mem::replace(&mut self.strokes, previous);
            self.redo.push(current);
            self.retain_active();
        }
        &self.strokes
    }

    /// Re-apply the last undone list. No-op when the redo stack is empty.
    pub fn redo(&mut self) -> &[Stroke] {
        if let Some(next) = self.redo.pop() {
            let current = std::mem::replace(&mut self.strokes, next);
            self.undo.push(current);
            self.retain_active();
        }
        &self.strokes
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn active_stroke_mut(&mut self, id: StrokeId) -> Result<&mut Stroke, LogError> {
        if self.active != Some(id) {
            return Err(LogError::InvalidHandle(id));
        }
        self.strokes
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(LogError::InvalidHandle(id))
    }

    fn take_pending_clear(&mut self) -> bool {
        let Some(pos) = self.pending.iter().position(|p| *p == Pending::Clear) else {
            return false;
        };
        self.pending.remove(pos);
        true
    }

    /// Index just past the last committed stroke.
    fn committed_end(&self) -> usize {
        self.strokes
            .iter()
            .position(|s| self.is_pending(s.id))
            .unwrap_or(self.strokes.len())
    }

    fn drop_committed(&mut self) -> bool {
        let before = self.strokes.len();
        let pending = &self.pending;
        self.strokes
            .retain(|s| pending.contains(&Pending::Stroke(s.id)));
        self.retain_active();
        self.strokes.len() != before
    }

    fn retain_active(&mut self) {
        if let Some(id) = self.active {
            if self.stroke(id).is_none() {
                self.active = None;
            }
        }
    }
}
