//! Path following

use crate::common::types::Point;
use crate::common::Pose;
use crate::control::trajectory::TrajectoryProfile;
use crate::perception::scan::RangeScan;
use std::fmt::Debug;

/// Drive command sent to the base.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DriveCommand {
    /// Linear velocity (m/s)
    pub linear: f64,
    /// Angular velocity (rad/s)
    pub angular: f64,
}

impl DriveCommand {
    pub fn stop() -> Self {
        DriveCommand::default()
    }
}

/// The goal currently being tracked and where it sits on the profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedGoal {
    pub position: Point,
    /// Profile index at which the goal is passed
    pub profile_index: usize,
}

/// Why a tick produced the command it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PursuitStatus {
    /// Following the profile
    Tracking,
    /// Profile exhausted, creeping toward the goal
    Approaching,
    /// Safety interlock engaged
    TooClose,
    /// No profile, or an empty one
    EmptyProfile,
}

/// Output of one control tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PursuitOutput {
    pub command: DriveCommand,
    pub status: PursuitStatus,
    /// The tracked goal was reached this tick
    pub goal_reached: bool,
    /// Curvature of the pursuit arc (1/m)
    pub curvature: f64,
}

/// Trait for path following algorithms
pub trait PathFollower: Debug + Send {
    /// Compute the command for one tick. Never fails: missing inputs degrade
    /// to a stop command.
    fn compute_command(
        &mut self,
        pose: &Pose,
        profile: Option<&TrajectoryProfile>,
        scan: Option<&RangeScan>,
        goal: Option<TrackedGoal>,
    ) -> PursuitOutput;

    /// Forget tracking progress, e.g. after the profile is regenerated.
    fn restart_profile(&mut self);

    /// Forget everything, including the last command.
    fn reset(&mut self);

    /// Linear velocity commanded on the previous tick.
    fn last_linear(&self) -> f64;

    /// Get the name of this path follower
    fn name(&self) -> &str;
}

pub mod pure_pursuit;

pub use pure_pursuit::PurePursuitFollower;
