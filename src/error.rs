//! Error types for the ArtBot control core

use thiserror::Error;

/// Failures surfaced by the control core.
///
/// Only `Config` (and the I/O/parse errors that produce it) is fatal; every
/// other variant is recovered from locally by dropping the offending goal or
/// retrying on the next tick.
#[derive(Error, Debug)]
pub enum NavError {
    #[error("Goal ({x:.2}, {y:.2}) lies outside the occupancy grid")]
    OutOfBoundsGoal { x: f64, y: f64 },

    #[error("No feasible path from ({:.2}, {:.2}) to ({:.2}, {:.2})", start.0, start.1, end.0, end.1)]
    NoFeasiblePath { start: (f64, f64), end: (f64, f64) },

    #[error("Cannot build a trajectory from {points} distinct point(s), need at least 2")]
    InfeasibleTrajectory { points: usize },

    #[error("Map is {width}x{height} but carries {cells} cells")]
    MapDimensionMismatch {
        width: usize,
        height: usize,
        cells: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, NavError>;
