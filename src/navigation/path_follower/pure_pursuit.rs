//! Pure Pursuit path follower implementation

use super::{DriveCommand, PathFollower, PursuitOutput, PursuitStatus, TrackedGoal};
use crate::common::types::Point;
use crate::common::{distance_to_goal, goal_angle, Pose};
use crate::config::ControllerConfig;
use crate::control::trajectory::TrajectoryProfile;
use crate::perception::scan::RangeScan;
use log::debug;

/// Per-mission tracking state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerState {
    /// Profile index nearest to the robot, once located
    pub profile_idx: Option<usize>,
    /// Profile index of the current lookahead point
    pub lookahead_idx: usize,
    /// Time index into the velocity profile (one step per tick)
    pub smooth_vel_idx: usize,
    /// Safety interlock engaged on the last tick
    pub too_close: bool,
    /// Distance to the tracked goal (m)
    pub distance_error: f64,
    /// Heading error toward the tracked goal (rad)
    pub angle_error: f64,
    /// Linear velocity commanded on the last tick (m/s)
    pub last_linear: f64,
}

/// Pure Pursuit path follower for the robot
#[derive(Debug)]
pub struct PurePursuitFollower {
    lookahead_dist: f64,
    steering_sens: f64,
    goal_distance: f64,
    stop_distance: f64,
    sensor_offset: f64,
    forward_sector: f64,
    approach_vel: f64,
    /// Largest velocity change per tick
    accel_step: f64,
    state: ControllerState,
}

impl PurePursuitFollower {
    pub fn new(config: &ControllerConfig) -> Self {
        PurePursuitFollower {
            lookahead_dist: config.lookahead_dist,
            steering_sens: config.steering_sens,
            goal_distance: config.goal_distance,
            stop_distance: config.stop_distance,
            sensor_offset: config.sensor_offset,
            forward_sector: config.forward_sector,
            approach_vel: config.approach_vel,
            accel_step: config.max_accel * config.dt(),
            state: ControllerState::default(),
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Safety interlock: closest forward obstacle, measured from the robot,
    /// is inside the stop distance. Missing scan data counts as unsafe.
    pub fn is_too_close(&self, scan: Option<&RangeScan>) -> bool {
        match scan {
            Some(scan) => scan
                .min_forward_range(self.forward_sector)
                .map_or(false, |range| range - self.sensor_offset < self.stop_distance),
            None => true,
        }
    }

    /// Target velocity at `idx`, limited so it changes by at most one
    /// acceleration step from the previous command. Past the end of the
    /// profile the target is the approach velocity.
    pub fn smooth_vel(&self, profile: &TrajectoryProfile, idx: usize) -> f64 {
        let target = match profile.get(idx) {
            Some(point) => point.velocity,
            None => self.approach_vel,
        };
        self.rate_limit(target)
    }

    /// Signed curvature of the arc from the robot to `target`.
    pub fn compute_curvature(&self, target: &Point, pose: &Pose) -> f64 {
        if distance_to_goal(target, pose) < f64::EPSILON {
            return 0.0;
        }
        let alpha = goal_angle(target, pose);
        2.0 * alpha.sin() / self.lookahead_dist
    }

    fn rate_limit(&self, target: f64) -> f64 {
        let last = self.state.last_linear;
        target.clamp(last - self.accel_step, last + self.accel_step).max(0.0)
    }

    /// Nearest profile index, walking forward from the previous one.
    fn search_nearest(&mut self, pose: &Pose, profile: &TrajectoryProfile) -> usize {
        let points = profile.points();
        let distance = |i: usize| distance_to_goal(&points[i].position, pose);

        let mut ind = match self.state.profile_idx {
            Some(previous) => previous.min(points.len() - 1),
            None => (0..points.len())
                .min_by(|a, b| distance(*a).partial_cmp(&distance(*b)).unwrap_or(std::cmp::Ordering::Equal))
                .unwrap_or(0),
        };

        let mut distance_this_index = distance(ind);
        while ind + 1 < points.len() {
            let distance_next_index = distance(ind + 1);
            if distance_this_index < distance_next_index {
                break;
            }
            ind += 1;
            distance_this_index = distance_next_index;
        }

        self.state.profile_idx = Some(ind);
        ind
    }

    /// First point at least `lookahead_dist` away, scanning forward from
    /// `from`; the final point if none is.
    fn find_lookahead(&self, pose: &Pose, profile: &TrajectoryProfile, from: usize) -> usize {
        let points = profile.points();
        (from..points.len())
            .find(|i| distance_to_goal(&points[*i].position, pose) >= self.lookahead_dist)
            .unwrap_or(points.len() - 1)
    }

    fn stopped(&mut self, status: PursuitStatus, goal_reached: bool) -> PursuitOutput {
        self.state.last_linear = 0.0;
        PursuitOutput {
            command: DriveCommand::stop(),
            status,
            goal_reached,
            curvature: 0.0,
        }
    }
}

impl PathFollower for PurePursuitFollower {
    fn compute_command(
        &mut self,
        pose: &Pose,
        profile: Option<&TrajectoryProfile>,
        scan: Option<&RangeScan>,
        goal: Option<TrackedGoal>,
    ) -> PursuitOutput {
        let too_close = self.is_too_close(scan);
        self.state.too_close = too_close;

        if let Some(g) = goal {
            self.state.distance_error = distance_to_goal(&g.position, pose);
            self.state.angle_error = goal_angle(&g.position, pose);
        }
        let within_goal = goal.is_some() && self.state.distance_error < self.goal_distance;

        let profile = match profile {
            Some(p) if !p.is_empty() => p,
            _ => {
                let status = if too_close {
                    PursuitStatus::TooClose
                } else {
                    PursuitStatus::EmptyProfile
                };
                return self.stopped(status, within_goal);
            }
        };

        let nearest = self.search_nearest(pose, profile);
        let passed = goal.map_or(false, |g| nearest > g.profile_index);
        let goal_reached = within_goal || passed;

        if too_close {
            debug!("Obstacle inside stop distance, holding position");
            return self.stopped(PursuitStatus::TooClose, goal_reached);
        }

        let lookahead_idx = self.find_lookahead(pose, profile, nearest);
        self.state.lookahead_idx = lookahead_idx;
        let target = profile.points()[lookahead_idx].position;
        let curvature = self.compute_curvature(&target, pose);

        let idx = self.state.smooth_vel_idx;
        let (linear, status) = if idx < profile.len() {
            (self.smooth_vel(profile, idx), PursuitStatus::Tracking)
        } else {
            let remaining = profile
                .last()
                .map_or(0.0, |p| distance_to_goal(&p.position, pose));
            let target_vel = if remaining > self.goal_distance {
                self.approach_vel
            } else {
                0.0
            };
            (self.rate_limit(target_vel), PursuitStatus::Approaching)
        };
        self.state.smooth_vel_idx = (idx + 1).min(profile.len());
        self.state.last_linear = linear;

        let angular = curvature * self.steering_sens;
        debug!(
            "Pursuit: nearest={} lookahead={} vel_idx={} linear={:.3} angular={:.3}",
            nearest, lookahead_idx, idx, linear, angular
        );

        PursuitOutput {
            command: DriveCommand { linear, angular },
            status,
            goal_reached,
            curvature,
        }
    }

    fn restart_profile(&mut self) {
        self.state.profile_idx = None;
        self.state.lookahead_idx = 0;
        self.state.smooth_vel_idx = 0;
    }

    fn reset(&mut self) {
        self.state = ControllerState::default();
    }

    fn last_linear(&self) -> f64 {
        self.state.last_linear
    }

    fn name(&self) -> &str {
        "PurePursuitFollower"
    }
}
