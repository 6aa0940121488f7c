//! Path planning seam
//!
//! The global planner is an external collaborator: given a start, an end and
//! the occupancy grid it returns an ordered list of points or reports that no
//! path exists. Closures with the same shape can stand in for it.

use super::occupancy_grid::OccupancyGrid;
use crate::common::types::Point;
use crate::error::{NavError, Result};

/// Trait for path planning algorithms
pub trait PathPlanner: Send + Sync {
    /// Plan a path from start to end. The returned points start at `start`
    /// and finish at `end`.
    fn plan(&self, start: Point, end: Point, grid: &OccupancyGrid) -> Result<Vec<Point>>;
}

impl<F> PathPlanner for F
where
    F: Fn(Point, Point, &OccupancyGrid) -> Result<Vec<Point>> + Send + Sync,
{
    fn plan(&self, start: Point, end: Point, grid: &OccupancyGrid) -> Result<Vec<Point>> {
        self(start, end, grid)
    }
}

/// Reference planner: a straight segment, accepted only if every cell it
/// crosses is free.
#[derive(Debug, Clone)]
pub struct StraightLinePlanner {
    spacing: f64,
}

impl StraightLinePlanner {
    /// Create a planner emitting points every `spacing` meters.
    pub fn new(spacing: f64) -> Self {
        StraightLinePlanner {
            spacing: spacing.max(1e-3),
        }
    }
}

impl PathPlanner for StraightLinePlanner {
    fn plan(&self, start: Point, end: Point, grid: &OccupancyGrid) -> Result<Vec<Point>> {
        if !grid.is_segment_free(&start, &end) {
            return Err(NavError::NoFeasiblePath {
                start: (start.x, start.y),
                end: (end.x, end.y),
            });
        }

        let distance = nalgebra::distance(&start, &end);
        let steps = ((distance / self.spacing).ceil() as usize).max(1);
        Ok((0..=steps)
            .map(|i| start + (end - start) * (i as f64 / steps as f64))
            .collect())
    }
}
