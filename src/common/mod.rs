//! Common utilities and types for the ArtBot control core

use nalgebra::Point2;
use std::f64::consts::PI;

/// Common types used across the codebase
pub mod types {
    /// A 2D point in the map frame (m)
    pub type Point = nalgebra::Point2<f64>;
}

use self::types::Point;

/// Position and heading of the robot in the map frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Point2<f64>,
    /// Heading (rad), counter-clockwise from the map x axis
    pub heading: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, heading: f64) -> Self {
        Pose {
            position: Point2::new(x, y),
            heading,
        }
    }

    /// Build a pose from a position and an orientation quaternion (yaw only).
    pub fn from_quaternion(x: f64, y: f64, qx: f64, qy: f64, qz: f64, qw: f64) -> Self {
        let heading = (2.0 * (qw * qz + qx * qy)).atan2(1.0 - 2.0 * (qy * qy + qz * qz));
        Pose::new(x, y, heading)
    }
}

impl Default for Pose {
    fn default() -> Self {
        Pose::new(0.0, 0.0, 0.0)
    }
}

/// Normalize angle to (-pi, pi].
pub fn normalize_angle(angle: f64) -> f64 {
    let mut a = angle % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a <= -PI {
        a += 2.0 * PI;
    }
    a
}

/// Straight-line distance from the robot to a goal (m).
pub fn distance_to_goal(goal: &Point, robot: &Pose) -> f64 {
    nalgebra::distance(goal, &robot.position)
}

/// Straight-line distance between two consecutive goals (m).
pub fn distance_between_goals(goal1: &Point, goal2: &Point) -> f64 {
    nalgebra::distance(goal1, goal2)
}

/// Turn required to face the goal from the current heading (rad).
pub fn goal_angle(goal: &Point, robot: &Pose) -> f64 {
    let delta = *goal - robot.position;
    if delta.norm() < f64::EPSILON {
        return 0.0;
    }
    normalize_angle(delta.y.atan2(delta.x) - robot.heading)
}

/// Length of a polyline (m).
pub fn path_length(points: &[Point]) -> f64 {
    points
        .windows(2)
        .map(|w| nalgebra::distance(&w[0], &w[1]))
        .sum()
}
