//! Perception module for the ArtBot robot
pub mod scan;

pub use self::scan::RangeScan;
