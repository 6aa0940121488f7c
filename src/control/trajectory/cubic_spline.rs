//! Natural cubic spline through 2D waypoints
//!
//! Each coordinate is a 1D spline over the cumulative chord length of the
//! waypoints, so evaluating at arc-length parameter `s` walks the curve.

use crate::common::types::Point;
use nalgebra::{DMatrix, DVector};

/// 1D natural cubic spline.
#[derive(Debug, Clone)]
pub struct Spline1D {
    x: Vec<f64>,
    a: Vec<f64>,
    b: Vec<f64>,
    c: Vec<f64>,
    d: Vec<f64>,
}

impl Spline1D {
    /// Fit a spline through `(x[i], y[i])`. `x` must be strictly increasing
    /// and hold at least two knots.
    pub fn new(x: &[f64], y: &[f64]) -> Option<Self> {
        let n = x.len();
        if n < 2 || y.len() != n {
            return None;
        }

        let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
        if h.iter().any(|hi| !(*hi > 0.0)) {
            return None;
        }

        let a = y.to_vec();

        // Tridiagonal system for the second-derivative coefficients
        let mut mat = DMatrix::<f64>::zeros(n, n);
        let mut rhs = DVector::<f64>::zeros(n);
        mat[(0, 0)] = 1.0;
        mat[(n - 1, n - 1)] = 1.0;
        for i in 1..n - 1 {
            mat[(i, i - 1)] = h[i - 1];
            mat[(i, i)] = 2.0 * (h[i - 1] + h[i]);
            mat[(i, i + 1)] = h[i];
            rhs[i] = 3.0 * (a[i + 1] - a[i]) / h[i] - 3.0 * (a[i] - a[i - 1]) / h[i - 1];
        }
        let c = mat.lu().solve(&rhs)?;
        let c: Vec<f64> = c.iter().copied().collect();

        let mut b = Vec::with_capacity(n - 1);
        let mut d = Vec::with_capacity(n - 1);
        for i in 0..n - 1 {
            d.push((c[i + 1] - c[i]) / (3.0 * h[i]));
            b.push((a[i + 1] - a[i]) / h[i] - h[i] * (c[i + 1] + 2.0 * c[i]) / 3.0);
        }

        Some(Spline1D {
            x: x.to_vec(),
            a,
            b,
            c,
            d,
        })
    }

    /// Segment index and offset for parameter `t`, clamped to the knot range.
    fn locate(&self, t: f64) -> (usize, f64) {
        let last = self.x.len() - 1;
        let t = t.clamp(self.x[0], self.x[last]);
        let idx = match self.x.partition_point(|xi| *xi <= t) {
            0 => 0,
            p => (p - 1).min(last - 1),
        };
        (idx, t - self.x[idx])
    }

    pub fn calc(&self, t: f64) -> f64 {
        let (i, dx) = self.locate(t);
        self.a[i] + self.b[i] * dx + self.c[i] * dx.powi(2) + self.d[i] * dx.powi(3)
    }

    pub fn calc_first_derivative(&self, t: f64) -> f64 {
        let (i, dx) = self.locate(t);
        self.b[i] + 2.0 * self.c[i] * dx + 3.0 * self.d[i] * dx.powi(2)
    }

    pub fn calc_second_derivative(&self, t: f64) -> f64 {
        let (i, dx) = self.locate(t);
        2.0 * self.c[i] + 6.0 * self.d[i] * dx
    }
}

/// Parameter step used to tabulate arc length (m of chord parameter).
const ARC_SAMPLE_STEP: f64 = 0.01;

/// 2D spline parameterised by cumulative chord length.
///
/// The chord parameter is shorter than the curve wherever it bends, so an
/// arc-length table is kept to move along the curve at a known speed.
#[derive(Debug, Clone)]
pub struct Spline2D {
    s: Vec<f64>,
    sx: Spline1D,
    sy: Spline1D,
    /// `(parameter, arc length)` samples, both strictly increasing
    arc: Vec<(f64, f64)>,
}

impl Spline2D {
    /// Fit through `points`; consecutive duplicates must already be removed.
    pub fn new(points: &[Point]) -> Option<Self> {
        let s = cumulative_length(points);
        let xs: Vec<f64> = points.iter().map(|p| p.x).collect();
        let ys: Vec<f64> = points.iter().map(|p| p.y).collect();

        let mut spline = Spline2D {
            sx: Spline1D::new(&s, &xs)?,
            sy: Spline1D::new(&s, &ys)?,
            s,
            arc: Vec::new(),
        };
        spline.arc = spline.arc_table();
        Some(spline)
    }

    /// Dense polyline length, sampled so every knot is a sample.
    fn arc_table(&self) -> Vec<(f64, f64)> {
        let mut table = vec![(self.s[0], 0.0)];
        let mut previous = self.calc_position(self.s[0]);
        let mut arc = 0.0;

        for w in self.s.windows(2) {
            let steps = ((w[1] - w[0]) / ARC_SAMPLE_STEP).ceil().max(1.0) as usize;
            for k in 1..=steps {
                let t = w[0] + (w[1] - w[0]) * k as f64 / steps as f64;
                let p = self.calc_position(t);
                arc += nalgebra::distance(&previous, &p);
                table.push((t, arc));
                previous = p;
            }
        }
        table
    }

    /// Parameter value at the last knot.
    pub fn length(&self) -> f64 {
        self.s.last().copied().unwrap_or(0.0)
    }

    /// Length of the curve itself (m).
    pub fn arc_length(&self) -> f64 {
        self.arc.last().map_or(0.0, |(_, a)| *a)
    }

    /// Arc length reached at parameter `s`.
    pub fn arc_at(&self, s: f64) -> f64 {
        interpolate(&self.arc, s, |(t, _)| *t, |(_, a)| *a)
    }

    /// Parameter at which the curve has covered `arc` meters.
    pub fn param_at(&self, arc: f64) -> f64 {
        interpolate(&self.arc, arc, |(_, a)| *a, |(t, _)| *t)
    }

    pub fn calc_position(&self, s: f64) -> Point {
        Point::new(self.sx.calc(s), self.sy.calc(s))
    }

    pub fn calc_yaw(&self, s: f64) -> f64 {
        let dx = self.sx.calc_first_derivative(s);
        let dy = self.sy.calc_first_derivative(s);
        dy.atan2(dx)
    }
}

/// Piecewise-linear lookup in a table sorted by `key`, clamped at both ends.
fn interpolate<K, V>(table: &[(f64, f64)], at: f64, key: K, value: V) -> f64
where
    K: Fn(&(f64, f64)) -> f64,
    V: Fn(&(f64, f64)) -> f64,
{
    let (first, last) = match (table.first(), table.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return 0.0,
    };
    if at <= key(first) {
        return value(first);
    }
    if at >= key(last) {
        return value(last);
    }

    let i = table.partition_point(|e| key(e) <= at).max(1);
    let (lo, hi) = (&table[i - 1], &table[i]);
    let span = key(hi) - key(lo);
    if span <= 0.0 {
        return value(lo);
    }
    value(lo) + (value(hi) - value(lo)) * (at - key(lo)) / span
}

/// Cumulative chord length along `points`, starting at 0.
pub fn cumulative_length(points: &[Point]) -> Vec<f64> {
    let mut s = Vec::with_capacity(points.len());
    let mut acc = 0.0;
    for (i, p) in points.iter().enumerate() {
        if i > 0 {
            acc += nalgebra::distance(&points[i - 1], p);
        }
        s.push(acc);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_spline_passes_through_knots() {
        let x = [0.0, 1.0, 2.5, 4.0];
        let y = [0.0, 2.0, -1.0, 0.5];
        let spline = Spline1D::new(&x, &y).unwrap();
        for (xi, yi) in x.iter().zip(y.iter()) {
            assert_relative_eq!(spline.calc(*xi), *yi, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_natural_boundary_conditions() {
        let spline = Spline1D::new(&[0.0, 1.0, 2.0], &[0.0, 1.0, 0.0]).unwrap();
        assert_relative_eq!(spline.calc_second_derivative(0.0), 0.0, epsilon = 1e-9);
        assert_relative_eq!(spline.calc_second_derivative(2.0), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rejects_repeated_knots() {
        assert!(Spline1D::new(&[0.0, 0.0], &[1.0, 2.0]).is_none());
        assert!(Spline1D::new(&[0.0], &[1.0]).is_none());
    }

    #[test]
    fn test_straight_line_arc_matches_chord() {
        let spline = Spline2D::new(&[Point::new(0.0, 0.0), Point::new(1.0, 1.0), Point::new(3.0, 3.0)]).unwrap();
        let half = spline.length() / 2.0;
        assert_relative_eq!(spline.calc_yaw(half), std::f64::consts::FRAC_PI_4, epsilon = 1e-9);
        assert_relative_eq!(spline.arc_length(), spline.length(), epsilon = 1e-9);
        let mid = spline.calc_position(half);
        assert_relative_eq!(mid.x, 1.5, epsilon = 1e-9);
        assert_relative_eq!(mid.y, 1.5, epsilon = 1e-9);
    }

    #[test]
    fn test_arc_length_of_bent_curve_exceeds_chord() {
        let points = [Point::new(0.0, 0.0), Point::new(1.0, 0.0), Point::new(1.0, 1.0), Point::new(0.0, 1.0)];
        let spline = Spline2D::new(&points).unwrap();
        assert!(spline.arc_length() > spline.length() + 0.1);

        // Lookups invert each other and hit the knots
        for knot in [0.0, 1.0, 2.0, 3.0] {
            let arc = spline.arc_at(knot);
            assert_relative_eq!(spline.param_at(arc), knot, epsilon = 1e-9);
        }
        assert_relative_eq!(spline.arc_at(spline.length()), spline.arc_length(), epsilon = 1e-12);
        assert_relative_eq!(spline.param_at(-1.0), 0.0);
        assert_relative_eq!(spline.param_at(100.0), spline.length());
    }
}
