//! Navigation module for the ArtBot robot
//!
//! Goal handling, the occupancy grid, the planner seam and path following.
pub mod goals;
pub mod markers;
pub mod occupancy_grid;
pub mod path_follower;
pub mod planner;

pub use self::goals::{Goal, GoalProgress, GoalSet};
pub use self::markers::{Marker, MarkerRole};
pub use self::occupancy_grid::{Occupancy, OccupancyGrid};
pub use self::path_follower::{DriveCommand, PathFollower, PurePursuitFollower};
pub use self::planner::{PathPlanner, StraightLinePlanner};
