//! Occupancy grid
//!
//! Row-major grid of cells, each free, occupied or unknown, with a resolution
//! and an origin mapping cell indices to map-frame coordinates. The grid is
//! replaced wholesale on every map update and never mutated in place.

use crate::common::types::Point;
use crate::error::{NavError, Result};

/// Occupancy of a single cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupancy {
    Free,
    Occupied,
    Unknown,
}

impl Occupancy {
    /// Classify a raw map value: -1 (or any negative) is unknown, values at
    /// or above `threshold` are occupied.
    pub fn from_raw(value: i8, threshold: i8) -> Self {
        if value < 0 {
            Occupancy::Unknown
        } else if value >= threshold {
            Occupancy::Occupied
        } else {
            Occupancy::Free
        }
    }
}

/// An occupancy grid map.
#[derive(Debug, Clone, PartialEq)]
pub struct OccupancyGrid {
    width: usize,
    height: usize,
    resolution: f64,
    origin: Point,
    cells: Vec<Occupancy>,
}

impl OccupancyGrid {
    /// Create a grid, checking that `width * height == cells.len()`.
    pub fn new(width: usize, height: usize, resolution: f64, origin: Point, cells: Vec<Occupancy>) -> Result<Self> {
        if width * height != cells.len() {
            return Err(NavError::MapDimensionMismatch {
                width,
                height,
                cells: cells.len(),
            });
        }
        if !(resolution > 0.0) {
            return Err(NavError::Config(format!("Map resolution must be positive, got {}", resolution)));
        }

        Ok(OccupancyGrid {
            width,
            height,
            resolution,
            origin,
            cells,
        })
    }

    /// Create a grid from raw occupancy values (0-100, -1 unknown).
    pub fn from_raw(
        width: usize,
        height: usize,
        resolution: f64,
        origin_x: f64,
        origin_y: f64,
        data: &[i8],
        occupied_threshold: i8,
    ) -> Result<Self> {
        let cells = data
            .iter()
            .map(|v| Occupancy::from_raw(*v, occupied_threshold))
            .collect();
        Self::new(width, height, resolution, Point::new(origin_x, origin_y), cells)
    }

    /// Grid with every cell set to `value`.
    pub fn filled(width: usize, height: usize, resolution: f64, origin: Point, value: Occupancy) -> Result<Self> {
        Self::new(width, height, resolution, origin, vec![value; width * height])
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn origin(&self) -> Point {
        self.origin
    }

    /// Convert world coordinates to cell indices, `None` outside the grid.
    pub fn world_to_map(&self, point: &Point) -> Option<(usize, usize)> {
        let gx = ((point.x - self.origin.x) / self.resolution).floor();
        let gy = ((point.y - self.origin.y) / self.resolution).floor();
        if gx < 0.0 || gy < 0.0 || gx >= self.width as f64 || gy >= self.height as f64 {
            return None;
        }
        Some((gx as usize, gy as usize))
    }

    /// Convert cell indices to world coordinates (cell center).
    pub fn map_to_world(&self, gx: usize, gy: usize) -> Point {
        Point::new(
            self.origin.x + (gx as f64 + 0.5) * self.resolution,
            self.origin.y + (gy as f64 + 0.5) * self.resolution,
        )
    }

    /// Occupancy of a cell; anything outside the grid is unknown.
    pub fn cell(&self, gx: i64, gy: i64) -> Occupancy {
        if gx < 0 || gy < 0 || gx >= self.width as i64 || gy >= self.height as i64 {
            return Occupancy::Unknown;
        }
        self.cells[gy as usize * self.width + gx as usize]
    }

    /// Set a cell; out of range indices are ignored.
    pub fn set_cell(&mut self, gx: usize, gy: usize, value: Occupancy) {
        if gx < self.width && gy < self.height {
            self.cells[gy * self.width + gx] = value;
        }
    }

    /// Occupancy at a world position.
    pub fn occupancy_at(&self, point: &Point) -> Occupancy {
        match self.world_to_map(point) {
            Some((gx, gy)) => self.cell(gx as i64, gy as i64),
            None => Occupancy::Unknown,
        }
    }

    /// Whether every cell crossed by the segment is free.
    pub fn is_segment_free(&self, start: &Point, end: &Point) -> bool {
        let distance = nalgebra::distance(start, end);
        let steps = (distance / (self.resolution * 0.5)).ceil() as usize;

        (0..=steps).all(|i| {
            let t = if steps > 0 { i as f64 / steps as f64 } else { 0.0 };
            let point = *start + (*end - *start) * t;
            self.occupancy_at(&point) == Occupancy::Free
        })
    }

    /// Indices of all free cells.
    pub fn free_cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == Occupancy::Free)
            .map(move |(i, _)| (i % self.width, i / self.width))
    }
}
