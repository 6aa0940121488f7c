//! Trajectory generation module
//!
//! Turns an ordered waypoint sequence into a time-parameterised profile: one
//! profile point per control period, positions on a cubic spline through the
//! waypoints, velocities following a jerk-limited S-curve that brakes to zero
//! on the last waypoint.

pub mod cubic_spline;

use self::cubic_spline::{cumulative_length, Spline2D};
use crate::common::types::Point;
use crate::common::Pose;
use crate::config::ControllerConfig;
use crate::error::{NavError, Result};
use log::debug;

/// Waypoints closer than this are merged.
const MIN_KNOT_SPACING: f64 = 1e-6;

/// One sample of a trajectory profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfilePoint {
    pub index: usize,
    pub position: Point,
    /// Path tangent (rad)
    pub heading: f64,
    /// Target linear velocity (m/s)
    pub velocity: f64,
    /// Arc length from the start of the profile (m)
    pub distance: f64,
}

/// A time-parameterised path, one point per control period.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrajectoryProfile {
    points: Vec<ProfilePoint>,
    /// First profile index at or beyond each supplied waypoint
    knot_indices: Vec<usize>,
    length: f64,
}

impl TrajectoryProfile {
    pub fn points(&self) -> &[ProfilePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ProfilePoint> {
        self.points.get(index)
    }

    pub fn last(&self) -> Option<&ProfilePoint> {
        self.points.last()
    }

    /// Profile index reached when passing waypoint `waypoint`.
    pub fn knot_index(&self, waypoint: usize) -> Option<usize> {
        self.knot_indices.get(waypoint).copied()
    }

    /// Arc length of the path (m).
    pub fn length(&self) -> f64 {
        self.length
    }

    /// Check the velocity, acceleration and jerk bounds of the profile.
    pub fn within_limits(&self, config: &ControllerConfig, tolerance: f64) -> bool {
        let dt = config.dt();
        let accel_step = config.max_accel * dt + tolerance;
        let jerk_step = config.max_jerk * dt * dt + tolerance;
        let v: Vec<f64> = self.points.iter().map(|p| p.velocity).collect();

        v.iter().all(|vi| *vi >= -tolerance && *vi <= config.max_vel + tolerance)
            && v.windows(2).all(|w| (w[1] - w[0]).abs() <= accel_step)
            && v.windows(3).all(|w| (w[2] - 2.0 * w[1] + w[0]).abs() <= jerk_step)
    }
}

/// A trajectory generator for the robot
#[derive(Debug, Clone)]
pub struct TrajectoryGenerator {
    max_vel: f64,
    /// Largest velocity change per period
    accel_step: f64,
    /// Largest change of the velocity change per period
    jerk_step: f64,
    dt: f64,
}

impl TrajectoryGenerator {
    /// Create a new trajectory generator
    pub fn new(config: &ControllerConfig) -> Self {
        let dt = config.dt();
        TrajectoryGenerator {
            max_vel: config.max_vel,
            accel_step: config.max_accel * dt,
            jerk_step: config.max_jerk * dt * dt,
            dt,
        }
    }

    /// Generate a profile from standstill at `start` through `waypoints`.
    pub fn generate(&self, waypoints: &[Point], start: &Pose) -> Result<TrajectoryProfile> {
        self.generate_from(waypoints, start, 0.0)
    }

    /// Generate a profile starting at `initial_velocity`.
    pub fn generate_from(&self, waypoints: &[Point], start: &Pose, initial_velocity: f64) -> Result<TrajectoryProfile> {
        let mut control = Vec::with_capacity(waypoints.len() + 1);
        control.push(start.position);
        control.extend_from_slice(waypoints);

        // Spline parameter of every supplied waypoint
        let waypoint_s: Vec<f64> = cumulative_length(&control)[1..].to_vec();

        let mut knots: Vec<Point> = Vec::with_capacity(control.len());
        for p in control {
            if knots.last().map_or(true, |last| nalgebra::distance(last, &p) > MIN_KNOT_SPACING) {
                knots.push(p);
            }
        }
        if knots.len() < 2 {
            return Err(NavError::InfeasibleTrajectory { points: knots.len() });
        }

        let spline = Spline2D::new(&knots).ok_or(NavError::InfeasibleTrajectory { points: knots.len() })?;
        let length = spline.arc_length();

        let velocities = self.velocity_profile(length, initial_velocity.clamp(0.0, self.max_vel));

        let mut points = Vec::with_capacity(velocities.len());
        let mut s = 0.0;
        for (index, v) in velocities.iter().enumerate() {
            if index > 0 {
                s += 0.5 * (velocities[index - 1] + v) * self.dt;
            }
            let (at, param) = if index + 1 == velocities.len() {
                (length, spline.length())
            } else {
                let at = s.min(length);
                (at, spline.param_at(at))
            };
            points.push(ProfilePoint {
                index,
                position: spline.calc_position(param),
                heading: spline.calc_yaw(param),
                velocity: *v,
                distance: at,
            });
        }

        let knot_indices = waypoint_s
            .iter()
            .map(|ws| {
                let arc = spline.arc_at(*ws);
                points
                    .iter()
                    .position(|p| p.distance >= arc - MIN_KNOT_SPACING)
                    .unwrap_or(points.len() - 1)
            })
            .collect();

        debug!(
            "Generated profile: {:.2}m over {} points ({:.1}s)",
            length,
            points.len(),
            points.len() as f64 * self.dt
        );

        Ok(TrajectoryProfile {
            points,
            knot_indices,
            length,
        })
    }

    /// Velocity per period covering exactly `length`, ending at rest.
    ///
    /// Picks the shortest S-curve that covers the path, then scales it down
    /// onto the path length. Scaling down keeps every bound satisfied.
    fn velocity_profile(&self, length: f64, v0: f64) -> Vec<f64> {
        let full_distance = self.distance(&self.s_curve(v0, self.max_vel, 1));

        let v = if full_distance >= length {
            // Smallest peak velocity whose profile still covers the path
            let (mut lo, mut hi) = (0.0, self.max_vel);
            for _ in 0..48 {
                let mid = 0.5 * (lo + hi);
                if self.distance(&self.s_curve(v0, mid, 1)) >= length {
                    hi = mid;
                } else {
                    lo = mid;
                }
            }
            self.s_curve(v0, hi, 1)
        } else {
            let cruise_step = self.max_vel * self.dt;
            let extra = ((length - full_distance) / cruise_step).ceil() as usize;
            self.s_curve(v0, self.max_vel, 1 + extra)
        };

        let covered = self.distance(&v);
        if covered <= length {
            return v;
        }
        let scale = length / covered;
        v.into_iter().map(|vi| vi * scale).collect()
    }

    /// v0 -> peak, `cruise` points at peak, peak -> 0.
    fn s_curve(&self, v0: f64, peak: f64, cruise: usize) -> Vec<f64> {
        let mut v = vec![v0];
        let mut current = v0;

        for step in self.ramp(peak - v0) {
            current = (current + step).clamp(0.0, self.max_vel);
            v.push(current);
        }
        let peak = current;
        v.extend(std::iter::repeat(peak).take(cruise));
        for step in self.ramp(-peak) {
            current = (current + step).clamp(0.0, self.max_vel);
            v.push(current);
        }
        if let Some(last) = v.last_mut() {
            *last = 0.0;
        }
        v
    }

    /// Per-period velocity increments summing to `delta`, with zero
    /// acceleration at both ends.
    ///
    /// Increments ramp up by `jerk_step`, saturate at `accel_step`, and ramp
    /// back down symmetrically; the whole sequence is then scaled down so it
    /// sums to `delta` exactly. Scaling down keeps every bound satisfied.
    fn ramp(&self, delta: f64) -> Vec<f64> {
        let magnitude = delta.abs();
        if magnitude < 1e-12 {
            return Vec::new();
        }

        let mut rise: Vec<f64> = Vec::new();
        let mut hold = 0usize;
        loop {
            let rise_sum: f64 = rise.iter().sum();
            let total = 2.0 * rise_sum + hold as f64 * self.accel_step;
            if (!rise.is_empty() || hold > 0) && total >= magnitude {
                break;
            }
            let next = (rise.len() + 1) as f64 * self.jerk_step;
            if next < self.accel_step {
                rise.push(next);
            } else {
                hold += 1;
            }
        }

        let mut increments = rise.clone();
        increments.extend(std::iter::repeat(self.accel_step).take(hold));
        increments.extend(rise.iter().rev());

        let total: f64 = increments.iter().sum();
        let scale = delta / total;
        increments.iter().map(|i| i * scale).collect()
    }

    /// Distance covered by a velocity sequence (trapezoidal).
    fn distance(&self, v: &[f64]) -> f64 {
        v.windows(2).map(|w| 0.5 * (w[0] + w[1]) * self.dt).sum()
    }
}
