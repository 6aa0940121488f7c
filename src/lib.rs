//! Motion control core for the ArtBot mobile robot
//!
//! Drives the robot along a smoothed trajectory through a sequence of goals,
//! one command per control period, and stops short of obstacles.
pub mod common;
pub mod config;
pub mod control;
pub mod error;
pub mod navigation;
pub mod perception;
pub mod shared;

pub use crate::config::ControllerConfig;
pub use crate::control::{ControlLoop, ControlOutput, LoopState};
pub use crate::error::{NavError, Result};
pub use crate::shared::{MissionResponse, SharedState};
