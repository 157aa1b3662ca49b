//! # Curvelab Common Crate
//!
//! This crate provides the data structures, color palettes, and utilities
//! shared across the curvelab core crates: points and curves, curve id
//! generation, the fixed color palettes, bezier evaluation, document
//! persistence, and the time provider used to keep timestamps deterministic
//! under test.

use serde::{Deserialize, Serialize};

pub mod bezier;
pub mod persist;
pub mod time;

pub use bezier::evaluate;
pub use persist::{parse_document, CurveDocument};
pub use time::{FixedTimeProvider, SystemTimeProvider, TimeProvider};

/// A position in the 2D plane. Coordinates are finite reals; inputs are
/// validated at the persistence boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Check that both coordinates are finite (no NaN or infinities).
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Euclidean distance to another point.
    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// A parametric curve: a stable opaque id, a palette color, and an ordered
/// sequence of control points. A curve with fewer than two points is inert
/// (rendered but not evaluable); zero points is allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Curve {
    pub id: String,
    pub color: String,
    pub points: Vec<Point>,
}

impl Curve {
    pub fn new(id: String, color: String) -> Self {
        Self {
            id,
            color,
            points: Vec::new(),
        }
    }

    /// A curve needs at least two control points to be evaluable.
    pub fn is_evaluable(&self) -> bool {
        self.points.len() >= 2
    }
}

/// The fixed curve palette, cycled in order when curves are created.
pub const CURVE_PALETTE: [&str; 6] = [
    "#4a9eff", "#ff4a9e", "#4aff9e", "#ff9e4a", "#9e4aff", "#4afff9",
];

/// The presence palette (distinct from the curve palette); assigned
/// uniformly at random per user.
pub const PRESENCE_PALETTE: [&str; 6] = [
    "#ff6b6b", "#4ecdc4", "#45b7d1", "#96ceb4", "#ffeaa7", "#dfe6e9",
];

/// Human-readable name for a curve palette color, used in history
/// descriptions. Unknown hex values map to "unknown".
pub fn color_name(hex: &str) -> &'static str {
    match hex {
        "#4a9eff" => "blue",
        "#ff4a9e" => "pink",
        "#4aff9e" => "green",
        "#ff9e4a" => "orange",
        "#9e4aff" => "purple",
        "#4afff9" => "cyan",
        _ => "unknown",
    }
}

/// Generate a fresh opaque curve id with 64 bits of entropy.
pub fn fresh_curve_id() -> String {
    format!("curve-{}", hex::encode(fastrand::u64(..).to_be_bytes()))
}

/// Pick a presence color uniformly at random.
pub fn random_presence_color() -> String {
    PRESENCE_PALETTE[fastrand::usize(..PRESENCE_PALETTE.len())].to_string()
}

/// Non-authoritative per-user metadata propagated through the replicated
/// document: cursor, selection, name, and color.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    /// Per-session opaque user id.
    pub id: String,
    pub name: String,
    /// A presence palette color, distinct from the curve palette.
    pub color: String,
    pub cursor: Option<Point>,
    pub active_curve_id: Option<String>,
    /// Millisecond timestamp of the last presence refresh.
    pub last_seen: u64,
}

/// Errors shared across curvelab crates.
#[derive(Debug, thiserror::Error)]
pub enum CommonError {
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for common operations.
pub type CommonResult<T> = Result<T, CommonError>;
