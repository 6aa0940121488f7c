//! Laser range scans
//!
//! The driver layer hands over a finite ordered sequence of ranges at a fixed
//! angular resolution. Readings outside `[range_min, range_max]`, or not
//! finite, are range-exceeded and are never used.

use crate::common::normalize_angle;

/// One laser sweep in the laser frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeScan {
    /// Angle of the first reading (rad)
    pub angle_min: f64,
    /// Angular resolution between consecutive readings (rad)
    pub angle_increment: f64,
    /// Smallest valid range (m)
    pub range_min: f64,
    /// Largest valid range (m)
    pub range_max: f64,
    /// Measured distances (m)
    pub ranges: Vec<f64>,
}

impl RangeScan {
    pub fn new(angle_min: f64, angle_increment: f64, range_min: f64, range_max: f64, ranges: Vec<f64>) -> Self {
        RangeScan {
            angle_min,
            angle_increment,
            range_min,
            range_max,
            ranges,
        }
    }

    /// Full sweep with every reading at `range`, starting straight ahead.
    pub fn uniform(readings: usize, range: f64, range_max: f64) -> Self {
        let increment = if readings == 0 {
            0.0
        } else {
            2.0 * std::f64::consts::PI / readings as f64
        };
        RangeScan::new(0.0, increment, 0.0, range_max, vec![range; readings])
    }

    /// Whether a reading is inside the sensor's valid range.
    pub fn is_valid(&self, range: f64) -> bool {
        range.is_finite() && range >= self.range_min && range <= self.range_max
    }

    /// Angle of reading `index`, normalized to (-pi, pi].
    pub fn angle_at(&self, index: usize) -> f64 {
        normalize_angle(self.angle_min + index as f64 * self.angle_increment)
    }

    /// Valid `(angle, range)` samples.
    pub fn samples(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.ranges
            .iter()
            .enumerate()
            .filter(|(_, r)| self.is_valid(**r))
            .map(move |(i, r)| (self.angle_at(i), *r))
    }

    /// Closest valid reading within `half_angle` of straight ahead.
    ///
    /// Returns `None` when every reading in the sector is range-exceeded.
    pub fn min_forward_range(&self, half_angle: f64) -> Option<f64> {
        self.samples()
            .filter(|(angle, _)| angle.abs() <= half_angle)
            .map(|(_, range)| range)
            .fold(None, |min: Option<f64>, r| Some(min.map_or(r, |m| m.min(r))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn scan_with(readings: &[(usize, f64)]) -> RangeScan {
        let mut scan = RangeScan::uniform(360, f64::INFINITY, 3.5);
        for (index, range) in readings {
            scan.ranges[*index] = *range;
        }
        scan
    }

    #[test]
    fn test_forward_sector_wraps_around_zero() {
        // index 355 is -5 degrees, index 5 is +5 degrees
        let scan = scan_with(&[(355, 0.8), (5, 1.2), (90, 0.1)]);
        let min = scan.min_forward_range(10f64.to_radians()).unwrap();
        assert!((min - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_readings_outside_sector_are_ignored() {
        let scan = scan_with(&[(180, 0.05), (270, 0.05)]);
        assert_eq!(scan.min_forward_range(PI / 6.0), None);
    }

    #[test]
    fn test_invalid_readings_are_skipped() {
        let mut scan = scan_with(&[(0, f64::NAN), (1, 7.0), (2, 0.5)]);
        scan.range_min = 0.12;
        scan.ranges[3] = 0.01;
        assert_eq!(scan.samples().count(), 1);
        assert_eq!(scan.min_forward_range(0.1), Some(0.5));
    }

    #[test]
    fn test_empty_scan_has_no_forward_range() {
        let scan = RangeScan::uniform(0, 1.0, 3.5);
        assert_eq!(scan.min_forward_range(PI), None);
    }
}
