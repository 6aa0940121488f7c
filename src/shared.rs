//! Shared state between the producer contexts and the control loop.
//!
//! Pose, scan, map and external path point updates arrive asynchronously and
//! are written here; the control loop copies each field out once per tick.
//! Every field has its own lock and no two locks are ever held together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use log::info;

use crate::common::types::Point;
use crate::common::Pose;
use crate::navigation::occupancy_grid::OccupancyGrid;
use crate::perception::scan::RangeScan;

/// A value together with when it arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct Stamped<T> {
    pub value: T,
    pub received_at: Instant,
    /// Per-field update counter, starting at 1
    pub seq: u64,
}

impl<T> Stamped<T> {
    /// Time since arrival, as seen at `now`.
    pub fn age(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.received_at)
    }
}

/// Reply to a mission or mode request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionResponse {
    pub success: bool,
    pub message: String,
}

impl MissionResponse {
    fn ok(message: &str) -> Self {
        MissionResponse {
            success: true,
            message: message.to_string(),
        }
    }
}

/// One independently locked field.
#[derive(Debug)]
struct Slot<T> {
    value: Mutex<Option<Stamped<T>>>,
}

impl<T: Clone> Slot<T> {
    fn new() -> Self {
        Slot {
            value: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Stamped<T>>> {
        // Values are replaced wholesale, so a poisoned slot never holds a torn value
        self.value.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set(&self, value: T) {
        let mut slot = self.lock();
        let seq = slot.as_ref().map_or(0, |previous| previous.seq) + 1;
        *slot = Some(Stamped {
            value,
            received_at: Instant::now(),
            seq,
        });
    }

    fn snapshot(&self) -> Option<Stamped<T>> {
        self.lock().clone()
    }
}

/// Shared state between the update callbacks and the control loop.
#[derive(Debug)]
pub struct SharedState {
    pose: Slot<Pose>,
    scan: Slot<RangeScan>,
    map: Slot<Arc<OccupancyGrid>>,
    external_point: Slot<Point>,

    /// Mission active flag
    running: AtomicBool,

    /// Real robot (true) or simulation (false)
    real: AtomicBool,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub fn new() -> Self {
        SharedState {
            pose: Slot::new(),
            scan: Slot::new(),
            map: Slot::new(),
            external_point: Slot::new(),
            running: AtomicBool::new(false),
            real: AtomicBool::new(false),
        }
    }

    pub fn set_pose(&self, pose: Pose) {
        self.pose.set(pose);
    }

    pub fn set_scan(&self, scan: RangeScan) {
        self.scan.set(scan);
    }

    pub fn set_map(&self, map: OccupancyGrid) {
        self.map.set(Arc::new(map));
    }

    pub fn set_external_path_point(&self, point: Point) {
        self.external_point.set(point);
    }

    pub fn snapshot_pose(&self) -> Option<Stamped<Pose>> {
        self.pose.snapshot()
    }

    pub fn snapshot_scan(&self) -> Option<Stamped<RangeScan>> {
        self.scan.snapshot()
    }

    /// The map handle is shared; the grid itself is never mutated in place.
    pub fn snapshot_map(&self) -> Option<Stamped<Arc<OccupancyGrid>>> {
        self.map.snapshot()
    }

    pub fn snapshot_external_path_point(&self) -> Option<Stamped<Point>> {
        self.external_point.snapshot()
    }

    /// Start or stop the mission. Repeating the current state is a no-op
    /// that still succeeds.
    pub fn request_mission(&self, start: bool) -> MissionResponse {
        let previous = self.running.swap(start, Ordering::SeqCst);
        let message = match (start, previous) {
            (true, false) => "Mission started",
            (true, true) => "Mission already running",
            (false, true) => "Mission stopped",
            (false, false) => "Mission already stopped",
        };
        info!("{}", message);
        MissionResponse::ok(message)
    }

    /// Select real (true) or simulated (false) robot mode.
    pub fn request_mode(&self, real: bool) -> MissionResponse {
        self.real.store(real, Ordering::SeqCst);
        let message = if real { "Real robot mode" } else { "Simulation mode" };
        info!("{}", message);
        MissionResponse::ok(message)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_real(&self) -> bool {
        self.real.load(Ordering::SeqCst)
    }

    /// Clear the mission flag from the control side.
    pub fn stop_mission(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
