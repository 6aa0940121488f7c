//! Control module for the ArtBot robot
//!
//! `ControlLoop` is the periodic driver. Each tick it snapshots the shared
//! state once, moves goal and trajectory state forward and produces exactly
//! one drive command.
pub mod trajectory;

use self::trajectory::{TrajectoryGenerator, TrajectoryProfile};
use crate::common::distance_to_goal;
use crate::common::Pose;
use crate::config::ControllerConfig;
use crate::error::Result;
use crate::navigation::goals::{GoalProgress, GoalSet};
use crate::navigation::markers::Marker;
use crate::navigation::occupancy_grid::OccupancyGrid;
use crate::navigation::path_follower::{
    DriveCommand, PathFollower, PurePursuitFollower, PursuitStatus, TrackedGoal,
};
use crate::navigation::planner::{PathPlanner, StraightLinePlanner};
use crate::perception::scan::RangeScan;
use crate::shared::{SharedState, Stamped};
use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

/// Mission state of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Mission inactive
    Idle,
    /// Waiting for a goal sequence and a trajectory
    Planning,
    /// Following the trajectory
    Tracking,
    /// Holding position until the way ahead is safe
    Blocked,
    /// Every goal reached
    Complete,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Idle => "Idle",
            LoopState::Planning => "Planning",
            LoopState::Tracking => "Tracking",
            LoopState::Blocked => "Blocked",
            LoopState::Complete => "Complete",
        };
        write!(f, "{}", name)
    }
}

/// Why the loop is holding in `Blocked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Obstacle inside the stop distance
    TooClose,
    /// No recent pose or scan
    SensorStale,
}

/// Everything one tick hands to the outside world.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlOutput {
    pub command: DriveCommand,
    pub state: LoopState,
    pub block_reason: Option<BlockReason>,
    /// Pursuit status, when the follower ran this tick
    pub status: Option<PursuitStatus>,
    /// Goal markers produced this tick
    pub markers: Vec<Marker>,
    /// Real robot (true) or simulation (false)
    pub real_mode: bool,
}

/// Periodic mission driver
pub struct ControlLoop {
    config: ControllerConfig,
    shared: Arc<SharedState>,
    goals: GoalSet,
    generator: TrajectoryGenerator,
    follower: Box<dyn PathFollower>,
    planner: Box<dyn PathPlanner>,
    state: LoopState,
    profile: Option<TrajectoryProfile>,
    tracked_goal: Option<TrackedGoal>,
    /// Goal set revision the current profile was generated from
    profile_revision: u64,
    planning_failures: u32,
    last_external_seq: u64,
}

impl fmt::Debug for ControlLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlLoop")
            .field("state", &self.state)
            .field("follower", &self.follower.name())
            .field("goals", &self.goals.remaining().len())
            .field("planning_failures", &self.planning_failures)
            .finish()
    }
}

impl ControlLoop {
    /// Create a loop with the pure pursuit follower and the straight-line planner.
    pub fn new(config: ControllerConfig, shared: Arc<SharedState>) -> Result<Self> {
        let planner = StraightLinePlanner::new(config.planner_spacing);
        Self::with_planner(config, shared, planner)
    }

    /// Create a loop around an external planner.
    ///
    /// Fails with `NavError::Config` when the configuration is rejected by
    /// `ControllerConfig::validate`.
    pub fn with_planner<P: PathPlanner + 'static>(
        config: ControllerConfig,
        shared: Arc<SharedState>,
        planner: P,
    ) -> Result<Self> {
        config.validate()?;
        Ok(ControlLoop {
            generator: TrajectoryGenerator::new(&config),
            follower: Box::new(PurePursuitFollower::new(&config)),
            planner: Box::new(planner),
            config,
            shared,
            goals: GoalSet::new(),
            state: LoopState::Idle,
            profile: None,
            tracked_goal: None,
            profile_revision: 0,
            planning_failures: 0,
            last_external_seq: 0,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn goals(&self) -> &GoalSet {
        &self.goals
    }

    /// Goal intake for producers that own the loop, e.g. a marker detector.
    pub fn goals_mut(&mut self) -> &mut GoalSet {
        &mut self.goals
    }

    pub fn profile(&self) -> Option<&TrajectoryProfile> {
        self.profile.as_ref()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Run one control period.
    pub fn tick(&mut self, now: Instant) -> ControlOutput {
        if !self.shared.is_running() {
            if self.state != LoopState::Idle {
                self.enter_idle();
            }
            return self.output(DriveCommand::stop(), None, None);
        }

        if self.state == LoopState::Idle {
            info!("Mission start requested");
            self.follower.reset();
            self.planning_failures = 0;
            self.set_state(LoopState::Planning);
        }

        let pose = self.shared.snapshot_pose();
        let scan = self.shared.snapshot_scan();
        let map = self.shared.snapshot_map();
        self.collect_external_point();

        match self.state {
            LoopState::Planning => {
                self.plan(pose.as_ref().map(|p| p.value), map.as_ref().map(|m| m.value.as_ref()));
                self.output(DriveCommand::stop(), None, None)
            }
            LoopState::Tracking | LoopState::Blocked => self.track(now, pose, scan, map),
            LoopState::Complete => {
                self.shared.stop_mission();
                self.output(DriveCommand::stop(), None, None)
            }
            LoopState::Idle => self.output(DriveCommand::stop(), None, None),
        }
    }

    /// Drive the loop at the configured period until `shutdown` turns true
    /// or the receiver goes away.
    pub async fn run(mut self, tx: mpsc::Sender<ControlOutput>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.control_period());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Control loop running every {:?}", self.config.control_period());

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let output = self.tick(Instant::now());
                    if tx.send(output).await.is_err() {
                        info!("Command receiver dropped, stopping control loop");
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested, stopping control loop");
                        break;
                    }
                }
            }
        }
    }

    fn collect_external_point(&mut self) {
        if let Some(point) = self.shared.snapshot_external_path_point() {
            if point.seq > self.last_external_seq {
                self.last_external_seq = point.seq;
                info!("External path point ({:.2}, {:.2}) collected", point.value.x, point.value.y);
                self.goals.collect_goal(point.value, None);
            }
        }
    }

    fn plan(&mut self, pose: Option<Pose>, map: Option<&OccupancyGrid>) {
        let (pose, map) = match (pose, map) {
            (Some(pose), Some(map)) => (pose, map),
            _ => {
                self.planning_failed("waiting for pose and map");
                return;
            }
        };

        self.sequence_candidates(&pose, map);

        // Goals the robot already sits on are reached without driving
        while let Some(active) = self.goals.active_goal() {
            if distance_to_goal(&active.position, &pose) >= self.config.goal_distance {
                break;
            }
            if self.goals.advance() == GoalProgress::MissionComplete {
                self.set_state(LoopState::Complete);
                return;
            }
        }

        if self.goals.active_goal().is_none() {
            self.planning_failed("no goals to drive to");
            return;
        }

        match self.regenerate(&pose) {
            Ok(()) => {
                self.planning_failures = 0;
                self.set_state(LoopState::Tracking);
            }
            Err(e) => self.planning_failed(&e.to_string()),
        }
    }

    fn sequence_candidates(&mut self, pose: &Pose, map: &OccupancyGrid) {
        if !self.goals.has_candidates() {
            return;
        }
        self.goals.validate_candidates(map, self.config.robot_half_width());
        let appended = self.goals.sequence_goals(pose.position, map, self.planner.as_ref());
        debug!("Sequenced {} new goals", appended.len());
    }

    fn planning_failed(&mut self, reason: &str) {
        self.planning_failures += 1;
        warn!(
            "Planning attempt {}/{} failed: {}",
            self.planning_failures, self.config.max_planning_failures, reason
        );
        if self.planning_failures >= self.config.max_planning_failures {
            warn!("Giving up on the mission after repeated planning failures");
            self.shared.stop_mission();
            self.enter_idle();
        }
    }

    /// Rebuild the profile from the remaining goals, starting at the current
    /// pose and commanded velocity.
    fn regenerate(&mut self, pose: &Pose) -> Result<()> {
        let waypoints = self.goals.remaining_waypoints(&pose.position);
        let profile = self
            .generator
            .generate_from(&waypoints.points, pose, self.follower.last_linear())?;

        self.tracked_goal = match (self.goals.active_goal(), profile.knot_index(waypoints.active_goal)) {
            (Some(goal), Some(profile_index)) => Some(TrackedGoal {
                position: goal.position,
                profile_index,
            }),
            _ => None,
        };
        info!(
            "Trajectory generated: {} points over {:.2}m",
            profile.len(),
            profile.length()
        );
        self.profile = Some(profile);
        self.profile_revision = self.goals.revision();
        self.follower.restart_profile();
        Ok(())
    }

    fn track(
        &mut self,
        now: Instant,
        pose: Option<Stamped<Pose>>,
        scan: Option<Stamped<RangeScan>>,
        map: Option<Stamped<Arc<OccupancyGrid>>>,
    ) -> ControlOutput {
        let timeout = self.config.sensor_timeout();
        let pose = match pose.filter(|p| p.age(now) <= timeout) {
            Some(pose) => pose.value,
            None => {
                warn!("Pose is stale, holding position");
                self.set_state(LoopState::Blocked);
                return self.output(DriveCommand::stop(), Some(BlockReason::SensorStale), None);
            }
        };
        let scan = scan.filter(|s| s.age(now) <= timeout).map(|s| s.value);

        if let Some(map) = map.as_ref() {
            self.sequence_candidates(&pose, &map.value);
        }

        if self.goals.revision() != self.profile_revision {
            if let Err(e) = self.regenerate(&pose) {
                warn!("Trajectory regeneration failed: {}", e);
                self.profile = None;
                self.tracked_goal = None;
                self.set_state(LoopState::Planning);
                return self.output(DriveCommand::stop(), None, None);
            }
        }

        let out = self
            .follower
            .compute_command(&pose, self.profile.as_ref(), scan.as_ref(), self.tracked_goal);

        if out.goal_reached {
            match self.goals.advance() {
                GoalProgress::Next(goal) => {
                    debug!("Next goal {} at ({:.2}, {:.2})", goal.id, goal.position.x, goal.position.y);
                }
                GoalProgress::MissionComplete => {
                    info!("All goals reached");
                    self.profile = None;
                    self.tracked_goal = None;
                    self.set_state(LoopState::Complete);
                    return self.output(DriveCommand::stop(), None, Some(out.status));
                }
            }
        }

        match out.status {
            PursuitStatus::TooClose => {
                let reason = if scan.is_some() {
                    BlockReason::TooClose
                } else {
                    BlockReason::SensorStale
                };
                self.set_state(LoopState::Blocked);
                self.output(DriveCommand::stop(), Some(reason), Some(out.status))
            }
            _ => {
                self.set_state(LoopState::Tracking);
                self.output(out.command, None, Some(out.status))
            }
        }
    }

    fn enter_idle(&mut self) {
        self.profile = None;
        self.tracked_goal = None;
        self.follower.reset();
        self.set_state(LoopState::Idle);
    }

    fn set_state(&mut self, state: LoopState) {
        if self.state != state {
            info!("Control state {} -> {}", self.state, state);
            self.state = state;
        }
    }

    fn output(&mut self, command: DriveCommand, block_reason: Option<BlockReason>, status: Option<PursuitStatus>) -> ControlOutput {
        ControlOutput {
            command,
            state: self.state,
            block_reason,
            status,
            markers: self.goals.take_markers(),
            real_mode: self.shared.is_real(),
        }
    }
}
