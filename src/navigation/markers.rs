//! Visualization markers for goals
//!
//! Every marker carries an id drawn from a process-wide counter, so ids are
//! unique and strictly increasing across all goal sets and threads.

use crate::common::types::Point;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_MARKER_ID: AtomicU32 = AtomicU32::new(0);

/// Take the next marker id.
pub fn next_marker_id() -> u32 {
    NEXT_MARKER_ID.fetch_add(1, Ordering::Relaxed)
}

/// What a goal marker represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerRole {
    /// Accepted and waiting in the ordered sequence
    Pending,
    /// The goal currently being driven to
    Active,
    /// Reached
    Reached,
    /// Dropped by map validation or planning
    Rejected,
}

impl MarkerRole {
    /// RGB display color.
    pub fn color(&self) -> [f32; 3] {
        match self {
            MarkerRole::Pending => [0.0, 0.0, 1.0],
            MarkerRole::Active => [0.0, 1.0, 0.0],
            MarkerRole::Reached => [0.5, 0.5, 0.5],
            MarkerRole::Rejected => [1.0, 0.0, 0.0],
        }
    }
}

/// A visualization record for external display.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub id: u32,
    /// Id of the goal this marker belongs to
    pub goal_id: u32,
    pub position: Point,
    pub role: MarkerRole,
    pub color: [f32; 3],
    /// Arrow heading (rad) for goals detected with one
    pub orientation: Option<f64>,
}

impl Marker {
    pub fn new(goal_id: u32, position: Point, role: MarkerRole) -> Self {
        Marker {
            id: next_marker_id(),
            goal_id,
            position,
            role,
            color: role.color(),
            orientation: None,
        }
    }

    pub fn with_orientation(mut self, orientation: Option<f64>) -> Self {
        self.orientation = orientation;
        self
    }
}
