//! Stroke model: the unit of drawing data and its wire shape.
//!
//! A stroke is one continuous gesture. It is append-only while being drawn:
//! points are only ever pushed onto the end of `points`, never inserted or
//! removed, until the author completes it.

#[cfg(test)]
#[path = "stroke_test.rs"]
mod stroke_test;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Unique identifier for a stroke. Generated by the authoring client.
pub type StrokeId = Uuid;

/// Default upper bound on stroke width accepted by [`StrokeLimits`].
pub const DEFAULT_MAX_WIDTH: u32 = 200;

/// Default upper bound on color string length, in bytes.
pub const DEFAULT_MAX_COLOR_LEN: usize = 64;

/// Default upper bound on points carried by a single delta.
pub const DEFAULT_MAX_POINTS_PER_DELTA: usize = 4096;

/// Drawing tool. Erasers are strokes too; the renderer composites them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Pen,
    Eraser,
}

/// A canvas position. Serialized as a two-element `[x, y]` array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// One continuous drawing gesture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    #[serde(rename = "stroke_id", alias = "id")]
    pub id: StrokeId,
    pub tool: Tool,
    pub color: String,
    #[serde(deserialize_with = "deserialize_width")]
    pub width: u32,
    pub points: Vec<Point>,
}

impl Stroke {
    /// Start a new stroke at `origin` with a freshly generated id.
    #[must_use]
    pub fn new(tool: Tool, color: impl Into<String>, width: u32, origin: Point) -> Self {
        Self { id: Uuid::new_v4(), tool, color: color.into(), width, points: vec![origin] }
    }

    /// Check the stroke against payload limits.
    ///
    /// # Errors
    ///
    /// Returns the first [`StrokeError`] the stroke violates.
    pub fn validate(&self, limits: &StrokeLimits) -> Result<(), StrokeError> {
        if self.color.trim().is_empty() {
            return Err(StrokeError::EmptyColor);
        }
        if self.color.len() > limits.max_color_len {
            return Err(StrokeError::ColorTooLong { len: self.color.len(), max: limits.max_color_len });
        }
        if self.width == 0 {
            return Err(StrokeError::ZeroWidth);
        }
        if self.width > limits.max_width {
            return Err(StrokeError::WidthTooLarge { width: self.width, max: limits.max_width });
        }
        validate_points(&self.points, limits)
    }
}

/// Check a batch of points destined for one delta.
///
/// # Errors
///
/// Rejects empty batches, batches over `max_points_per_delta`, and any
/// non-finite coordinate.
pub fn validate_points(points: &[Point], limits: &StrokeLimits) -> Result<(), StrokeError> {
    if points.is_empty() {
        return Err(StrokeError::NoPoints);
    }
    if points.len() > limits.max_points_per_delta {
        return Err(StrokeError::TooManyPoints { count: points.len(), max: limits.max_points_per_delta });
    }
    if !points.iter().all(|p| p.is_finite()) {
        return Err(StrokeError::NonFinitePoint);
    }
    Ok(())
}

/// Bounds applied to stroke payloads on both ends of the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrokeLimits {
    pub max_width: u32,
    pub max_color_len: usize,
    pub max_points_per_delta: usize,
}

impl Default for StrokeLimits {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_WIDTH,
            max_color_len: DEFAULT_MAX_COLOR_LEN,
            max_points_per_delta: DEFAULT_MAX_POINTS_PER_DELTA,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StrokeError {
    #[error("stroke color is empty")]
    EmptyColor,
    #[error("stroke color is {len} bytes (max {max})")]
    ColorTooLong { len: usize, max: usize },
    #[error("stroke width must be positive")]
    ZeroWidth,
    #[error("stroke width {width} exceeds {max}")]
    WidthTooLarge { width: u32, max: u32 },
    #[error("delta carries no points")]
    NoPoints,
    #[error("delta carries {count} points (max {max})")]
    TooManyPoints { count: usize, max: usize },
    #[error("point coordinates must be finite")]
    NonFinitePoint,
}

/// Accept integral floats for `width`: the protobuf leg turns every JSON
/// number into a double.
fn deserialize_width<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    if raw.fract() != 0.0 || raw < 0.0 || raw > f64::from(u32::MAX) {
        return Err(serde::de::Error::custom(format!("width must be a non-negative integer, got {raw}")));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(raw as u32)
}
