//! Controller configuration
//!
//! All motion limits and thresholds live in one immutable structure that is
//! handed to the trajectory generator, the pursuit controller and the control
//! loop at construction time. Values can be loaded from a YAML parameter file;
//! any field left out falls back to its default.

use crate::error::{NavError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Motion limits and controller tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Maximum linear velocity (m/s)
    pub max_vel: f64,
    /// Maximum linear acceleration (m/s^2)
    pub max_accel: f64,
    /// Maximum linear jerk (m/s^3)
    pub max_jerk: f64,
    /// Effective obstacle range below which the robot stops (m)
    pub stop_distance: f64,
    /// Offset between the laser frame and the robot frame (m)
    pub sensor_offset: f64,
    /// Distance at which a goal counts as reached (m)
    pub goal_distance: f64,
    /// Gain applied to the pursuit curvature to get the angular command
    pub steering_sens: f64,
    /// Pure pursuit lookahead distance (m)
    pub lookahead_dist: f64,
    /// Robot width, half of it is the clearance required around a goal (m)
    pub robot_width: f64,
    /// Control loop period (ms)
    pub control_period_ms: u64,
    /// Half-angle of the forward scan sector checked by the safety interlock (rad)
    pub forward_sector: f64,
    /// Creep velocity used once the profile is exhausted short of the goal (m/s)
    pub approach_vel: f64,
    /// Pose/scan age after which sensor data is considered stale (ms)
    pub sensor_timeout_ms: u64,
    /// Consecutive planning failures tolerated before the mission is dropped
    pub max_planning_failures: u32,
    /// Point spacing of the reference straight-line planner (m)
    pub planner_spacing: f64,
    /// Occupancy value (0-100) at or above which a cell is occupied
    pub occupied_threshold: i8,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_vel: 0.26,
            max_accel: 0.43,
            max_jerk: 1.0,
            stop_distance: 0.24,
            sensor_offset: 0.12,
            goal_distance: 0.1,
            steering_sens: 0.8,
            lookahead_dist: 0.4,
            robot_width: 0.3,
            control_period_ms: 100,
            forward_sector: 0.52,
            approach_vel: 0.05,
            sensor_timeout_ms: 500,
            max_planning_failures: 30,
            planner_spacing: 0.5,
            occupied_threshold: 50,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: ControllerConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject limits that would make the controller meaningless.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_vel", self.max_vel),
            ("max_accel", self.max_accel),
            ("max_jerk", self.max_jerk),
            ("goal_distance", self.goal_distance),
            ("steering_sens", self.steering_sens),
            ("lookahead_dist", self.lookahead_dist),
            ("robot_width", self.robot_width),
            ("forward_sector", self.forward_sector),
            ("planner_spacing", self.planner_spacing),
        ];
        for (name, value) in positive {
            if !(value > 0.0) || !value.is_finite() {
                return Err(NavError::Config(format!("{} must be positive, got {}", name, value)));
            }
        }

        if self.stop_distance < 0.0 || self.sensor_offset < 0.0 || self.approach_vel < 0.0 {
            return Err(NavError::Config(
                "stop_distance, sensor_offset and approach_vel must be non-negative".to_string(),
            ));
        }

        if self.approach_vel > self.max_vel {
            return Err(NavError::Config(format!(
                "approach_vel ({}) exceeds max_vel ({})",
                self.approach_vel, self.max_vel
            )));
        }

        if self.control_period_ms == 0 {
            return Err(NavError::Config("control_period_ms must be non-zero".to_string()));
        }

        if !(0..=100).contains(&self.occupied_threshold) {
            return Err(NavError::Config(format!(
                "occupied_threshold must be within 0..=100, got {}",
                self.occupied_threshold
            )));
        }

        Ok(())
    }

    /// Control period as a duration.
    pub fn control_period(&self) -> Duration {
        Duration::from_millis(self.control_period_ms)
    }

    /// Control period in seconds.
    pub fn dt(&self) -> f64 {
        self.control_period_ms as f64 / 1000.0
    }

    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor_timeout_ms)
    }

    /// Clearance required on each side of a goal.
    pub fn robot_half_width(&self) -> f64 {
        self.robot_width / 2.0
    }
}
