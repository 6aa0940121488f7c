//! Goal collection, validation and sequencing
//!
//! Candidates (detected markers, externally pushed points, random picks) land
//! in an unordered pool. Planning validates each candidate against the
//! occupancy grid, then orders the survivors by repeatedly planning from the
//! robot (or the previous goal) to every remaining candidate and taking the
//! shortest route. The robot then drives the ordered goals one at a time.

use super::markers::{Marker, MarkerRole};
use super::occupancy_grid::{Occupancy, OccupancyGrid};
use super::planner::PathPlanner;
use crate::common::path_length;
use crate::common::types::Point;
use crate::error::{NavError, Result};
use log::{debug, info, warn};
use rand::Rng;

/// A destination waypoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Goal {
    pub id: u32,
    pub position: Point,
    /// Heading (rad) the goal was detected with. Shown on its markers only,
    /// the controller does not turn in place to match it.
    pub orientation: Option<f64>,
    /// Intermediate planner points leading to this goal, excluding both ends
    pub route: Vec<Point>,
}

impl Goal {
    fn new(id: u32, position: Point, orientation: Option<f64>) -> Self {
        Goal {
            id,
            position,
            orientation,
            route: Vec::new(),
        }
    }

    fn marker(&self, role: MarkerRole) -> Marker {
        Marker::new(self.id, self.position, role).with_orientation(self.orientation)
    }
}

/// Result of advancing past the active goal.
#[derive(Debug, Clone, PartialEq)]
pub enum GoalProgress {
    /// The next goal is now active
    Next(Goal),
    /// No goals remain
    MissionComplete,
}

/// Waypoints still to be driven, ready for trajectory generation.
#[derive(Debug, Clone, PartialEq)]
pub struct RemainingWaypoints {
    pub points: Vec<Point>,
    /// Index into `points` of the active goal
    pub active_goal: usize,
}

/// Ordered goal sequence plus the pool of unsequenced candidates.
#[derive(Debug, Default)]
pub struct GoalSet {
    ordered: Vec<Goal>,
    candidates: Vec<Goal>,
    active: usize,
    next_goal_id: u32,
    revision: u64,
    markers: Vec<Marker>,
}

impl GoalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a detected candidate to the unordered pool and return its id.
    pub fn collect_goal(&mut self, position: Point, orientation: Option<f64>) -> u32 {
        let id = self.next_goal_id;
        self.next_goal_id += 1;
        debug!("Collected candidate goal {} at ({:.2}, {:.2})", id, position.x, position.y);
        self.candidates.push(Goal::new(id, position, orientation));
        id
    }

    /// Add several detected candidates, returning their ids in order.
    pub fn collect_goals<I>(&mut self, detections: I) -> Vec<u32>
    where
        I: IntoIterator<Item = (Point, Option<f64>)>,
    {
        detections
            .into_iter()
            .map(|(position, orientation)| self.collect_goal(position, orientation))
            .collect()
    }

    /// Check a candidate against the grid.
    ///
    /// The robot footprint is the square `[x - w, x + w] x [y - w, y + w]`
    /// with `w = robot_half_width`. Every cell it touches must be free.
    /// Cells beyond the map edge count as unknown.
    pub fn validate(candidate: &Point, grid: &OccupancyGrid, robot_half_width: f64) -> Result<bool> {
        if grid.world_to_map(candidate).is_none() {
            return Err(NavError::OutOfBoundsGoal {
                x: candidate.x,
                y: candidate.y,
            });
        }

        let half = robot_half_width.max(0.0);
        let origin = grid.origin();
        let cell_of = |v: f64, o: f64| ((v - o) / grid.resolution()).floor() as i64;
        let (x_lo, x_hi) = (cell_of(candidate.x - half, origin.x), cell_of(candidate.x + half, origin.x));
        let (y_lo, y_hi) = (cell_of(candidate.y - half, origin.y), cell_of(candidate.y + half, origin.y));

        for gy in y_lo..=y_hi {
            for gx in x_lo..=x_hi {
                if grid.cell(gx, gy) != Occupancy::Free {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Drop every candidate that fails validation. Returns the number dropped.
    pub fn validate_candidates(&mut self, grid: &OccupancyGrid, robot_half_width: f64) -> usize {
        let before = self.candidates.len();
        let mut kept = Vec::with_capacity(before);

        for candidate in self.candidates.drain(..) {
            match Self::validate(&candidate.position, grid, robot_half_width) {
                Ok(true) => kept.push(candidate),
                Ok(false) => {
                    warn!(
                        "Goal {} at ({:.2}, {:.2}) rejected: too close to an obstacle",
                        candidate.id, candidate.position.x, candidate.position.y
                    );
                    self.markers.push(candidate.marker(MarkerRole::Rejected));
                }
                Err(e) => {
                    warn!("Goal {} dropped: {}", candidate.id, e);
                    self.markers.push(candidate.marker(MarkerRole::Rejected));
                }
            }
        }

        self.candidates = kept;
        before - self.candidates.len()
    }

    /// Order the candidate pool and append it to the goal sequence.
    ///
    /// Starting from the last remaining goal (or `start` when none remain),
    /// plans to every candidate and visits the one with the shortest route
    /// next. Candidates the planner cannot reach are dropped. Returns the ids
    /// appended, in visiting order.
    pub fn sequence_goals(&mut self, start: Point, grid: &OccupancyGrid, planner: &dyn PathPlanner) -> Vec<u32> {
        let mut from = self.remaining().last().map(|g| g.position).unwrap_or(start);
        let mut pool: Vec<Goal> = self.candidates.drain(..).collect();
        let mut appended = Vec::new();

        while !pool.is_empty() {
            let mut best: Option<(usize, f64, Vec<Point>)> = None;
            let mut unreachable = Vec::new();

            for (i, candidate) in pool.iter().enumerate() {
                match planner.plan(from, candidate.position, grid) {
                    Ok(path) if !path.is_empty() => {
                        let cost = path_length(&path);
                        if best.as_ref().map_or(true, |(_, c, _)| cost < *c) {
                            best = Some((i, cost, path));
                        }
                    }
                    Ok(_) | Err(NavError::NoFeasiblePath { .. }) => unreachable.push(i),
                    Err(e) => {
                        warn!("Planner failed for goal {}: {}", candidate.id, e);
                        unreachable.push(i);
                    }
                }
            }

            // Drop unreachable candidates, highest index first so the rest stay valid
            for &i in unreachable.iter().rev() {
                let dropped = pool.remove(i);
                warn!(
                    "Goal {} at ({:.2}, {:.2}) dropped: no feasible path",
                    dropped.id, dropped.position.x, dropped.position.y
                );
                self.markers.push(dropped.marker(MarkerRole::Rejected));
                if let Some((best_idx, _, _)) = best.as_mut() {
                    if *best_idx > i {
                        *best_idx -= 1;
                    }
                }
            }

            let Some((idx, cost, path)) = best else { break };
            let mut goal = pool.remove(idx);
            goal.route = route_between(&path);
            info!(
                "Sequenced goal {} at ({:.2}, {:.2}), route {:.2}m",
                goal.id, goal.position.x, goal.position.y, cost
            );
            self.markers.push(goal.marker(MarkerRole::Pending));
            from = goal.position;
            appended.push(goal.id);
            self.ordered.push(goal);
        }

        if !appended.is_empty() {
            self.revision += 1;
            self.mark_active();
        }
        appended
    }

    /// Move past the active goal.
    pub fn advance(&mut self) -> GoalProgress {
        if let Some(done) = self.ordered.get(self.active) {
            info!("Reached goal {} at ({:.2}, {:.2})", done.id, done.position.x, done.position.y);
            let marker = done.marker(MarkerRole::Reached);
            self.markers.push(marker);
            self.active += 1;
            self.revision += 1;
        }

        match self.ordered.get(self.active) {
            Some(next) => {
                let next = next.clone();
                self.mark_active();
                GoalProgress::Next(next)
            }
            None => GoalProgress::MissionComplete,
        }
    }

    /// Generate up to `count` random candidates on free cells that pass
    /// validation. Returns the ids collected.
    pub fn generate_random_candidates<R: Rng>(
        &mut self,
        grid: &OccupancyGrid,
        count: usize,
        robot_half_width: f64,
        rng: &mut R,
    ) -> Vec<u32> {
        let free: Vec<Point> = grid
            .free_cells()
            .map(|(gx, gy)| grid.map_to_world(gx, gy))
            .filter(|p| matches!(Self::validate(p, grid, robot_half_width), Ok(true)))
            .collect();

        let mut ids = Vec::with_capacity(count);
        if free.is_empty() {
            warn!("No free cell can host a random goal");
            return ids;
        }

        for _ in 0..count {
            let position = free[rng.gen_range(0..free.len())];
            ids.push(self.collect_goal(position, None));
        }
        ids
    }

    /// The goal currently being driven to.
    pub fn active_goal(&self) -> Option<&Goal> {
        self.ordered.get(self.active)
    }

    /// Goals not yet reached, active goal first.
    pub fn remaining(&self) -> &[Goal] {
        self.ordered.get(self.active..).unwrap_or(&[])
    }

    /// Every sequenced goal, reached or not.
    pub fn ordered(&self) -> &[Goal] {
        &self.ordered
    }

    /// Candidates waiting for validation and sequencing.
    pub fn candidates(&self) -> &[Goal] {
        &self.candidates
    }

    pub fn has_candidates(&self) -> bool {
        !self.candidates.is_empty()
    }

    /// Bumped whenever the remaining sequence changes.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Waypoints for the remaining goals.
    ///
    /// The active goal's route is resumed from the projection of `from` onto
    /// it: route points behind that projection are skipped, the rest are kept.
    pub fn remaining_waypoints(&self, from: &Point) -> RemainingWaypoints {
        let mut points = Vec::new();
        let mut active_goal = 0;

        for (i, goal) in self.remaining().iter().enumerate() {
            points.extend_from_slice(&goal.route);
            points.push(goal.position);
            if i == 0 {
                let resume = resume_index(&points, from);
                points.drain(..resume);
                active_goal = points.len() - 1;
            }
        }

        RemainingWaypoints { points, active_goal }
    }

    /// Forget every goal and candidate.
    pub fn clear(&mut self) {
        self.ordered.clear();
        self.candidates.clear();
        self.active = 0;
        self.revision += 1;
    }

    /// Visualization records produced since the last call.
    pub fn take_markers(&mut self) -> Vec<Marker> {
        std::mem::take(&mut self.markers)
    }

    fn mark_active(&mut self) {
        if let Some(goal) = self.ordered.get(self.active) {
            let marker = goal.marker(MarkerRole::Active);
            self.markers.push(marker);
        }
    }
}

/// Index of the first polyline point ahead of the projection of `from`.
fn resume_index(polyline: &[Point], from: &Point) -> usize {
    let mut best = (f64::INFINITY, 0);
    for (k, w) in polyline.windows(2).enumerate() {
        let seg = w[1] - w[0];
        let len_sq = seg.norm_squared();
        let t = if len_sq > 0.0 {
            ((*from - w[0]).dot(&seg) / len_sq).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let d = nalgebra::distance(&(w[0] + seg * t), from);
        if d < best.0 {
            best = (d, if t > 0.0 { k + 1 } else { k });
        }
    }
    best.1
}

/// Planner points strictly between the two ends.
fn route_between(path: &[Point]) -> Vec<Point> {
    if path.len() <= 2 {
        return Vec::new();
    }
    path[1..path.len() - 1].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::planner::StraightLinePlanner;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rstest::rstest;

    const HALF_WIDTH: f64 = 0.15;

    fn free_grid() -> OccupancyGrid {
        OccupancyGrid::filled(10, 10, 0.5, Point::new(-2.5, -2.5), Occupancy::Free).unwrap()
    }

    #[rstest]
    #[case(Occupancy::Occupied, 0.15)]
    #[case(Occupancy::Unknown, 0.15)]
    #[case(Occupancy::Occupied, 0.3)]
    #[case(Occupancy::Unknown, 0.3)]
    fn test_validate_exhaustive(#[case] blocker: Occupancy, #[case] half_width: f64) {
        // From a cell centre the footprint reaches into the neighbours once
        // it is wider than half a cell
        let reach: i64 = if half_width < 0.25 { 0 } else { 1 };
        for (bx, by) in [(0usize, 0usize), (4, 5), (9, 3)] {
            let mut grid = free_grid();
            grid.set_cell(bx, by, blocker);

            for gy in 0..10i64 {
                for gx in 0..10i64 {
                    let candidate = grid.map_to_world(gx as usize, gy as usize);
                    let near = (gx - bx as i64).abs() <= reach && (gy - by as i64).abs() <= reach;
                    let off_map = gx < reach || gy < reach || gx > 9 - reach || gy > 9 - reach;
                    let accepted = GoalSet::validate(&candidate, &grid, half_width).unwrap();
                    assert_eq!(
                        accepted,
                        !near && !off_map,
                        "cell ({}, {}) with blocker at ({}, {})",
                        gx,
                        gy,
                        bx,
                        by
                    );
                }
            }
        }
    }

    #[test]
    fn test_validate_uses_world_footprint() {
        // Footprint [0.10, 0.40] stays inside cell 5, clear of the obstacle in cell 6
        let mut grid = free_grid();
        grid.set_cell(6, 5, Occupancy::Occupied);
        assert!(GoalSet::validate(&Point::new(0.25, 0.25), &grid, HALF_WIDTH).unwrap());

        // Footprint [0.30, 0.60] crosses into it
        assert!(!GoalSet::validate(&Point::new(0.45, 0.25), &grid, HALF_WIDTH).unwrap());
    }

    #[test]
    fn test_validate_footprint_past_map_edge() {
        let grid = free_grid();
        assert!(GoalSet::validate(&Point::new(2.2, 2.2), &grid, HALF_WIDTH).unwrap());
        assert!(!GoalSet::validate(&Point::new(2.4, 2.4), &grid, HALF_WIDTH).unwrap());
    }

    #[test]
    fn test_validate_out_of_bounds() {
        let err = GoalSet::validate(&Point::new(10.0, 0.0), &free_grid(), HALF_WIDTH).unwrap_err();
        assert!(matches!(err, NavError::OutOfBoundsGoal { .. }));
    }

    #[test]
    fn test_collect_validate_sequence_round_trip() {
        let grid = free_grid();
        let mut goals = GoalSet::new();
        let ids = goals.collect_goals(vec![
            (Point::new(2.0, 2.0), None),
            (Point::new(1.0, 0.0), None),
            (Point::new(-2.0, 1.5), Some(0.5)),
        ]);
        assert_eq!(ids, vec![0, 1, 2]);

        assert_eq!(goals.validate_candidates(&grid, HALF_WIDTH), 0);
        let order = goals.sequence_goals(Point::origin(), &grid, &StraightLinePlanner::new(0.5));

        // Nearest first: (1,0), then (2,2), then (-2,1.5)
        assert_eq!(order, vec![1, 0, 2]);
        for id in ids {
            assert_eq!(goals.ordered().iter().filter(|g| g.id == id).count(), 1);
        }
        assert!(!goals.has_candidates());
        assert_eq!(goals.active_goal().map(|g| g.id), Some(1));
    }

    #[test]
    fn test_rejected_candidate_is_dropped_with_marker() {
        let mut grid = free_grid();
        grid.set_cell(7, 5, Occupancy::Occupied);
        let mut goals = GoalSet::new();
        goals.collect_goal(Point::new(1.25, 0.25), None);
        goals.collect_goal(Point::new(-1.0, -1.0), None);
        goals.collect_goal(Point::new(40.0, 0.0), None);

        assert_eq!(goals.validate_candidates(&grid, HALF_WIDTH), 2);
        assert_eq!(goals.candidates().len(), 1);
        let markers = goals.take_markers();
        assert_eq!(markers.len(), 2);
        assert!(markers.iter().all(|m| m.role == MarkerRole::Rejected));
        assert!(markers[1].id > markers[0].id);
    }

    #[test]
    fn test_planner_failure_drops_only_that_candidate() {
        let grid = free_grid();
        let planner = |start: Point, end: Point, _grid: &OccupancyGrid| -> Result<Vec<Point>> {
            if end.y < 0.0 {
                Err(NavError::NoFeasiblePath {
                    start: (start.x, start.y),
                    end: (end.x, end.y),
                })
            } else {
                Ok(vec![start, end])
            }
        };

        let mut goals = GoalSet::new();
        goals.collect_goal(Point::new(1.0, -1.0), None);
        goals.collect_goal(Point::new(1.0, 1.0), None);
        goals.collect_goal(Point::new(2.0, 1.0), None);

        let order = goals.sequence_goals(Point::origin(), &grid, &planner);
        assert_eq!(order, vec![1, 2]);
        assert_eq!(goals.ordered().len(), 2);
        assert!(goals.take_markers().iter().any(|m| m.goal_id == 0 && m.role == MarkerRole::Rejected));
    }

    #[test]
    fn test_advance_until_complete() {
        let grid = free_grid();
        let mut goals = GoalSet::new();
        goals.collect_goal(Point::new(1.0, 0.0), None);
        goals.collect_goal(Point::new(2.0, 0.0), None);
        goals.sequence_goals(Point::origin(), &grid, &StraightLinePlanner::new(0.5));
        let revision = goals.revision();

        match goals.advance() {
            GoalProgress::Next(goal) => assert_eq!(goal.position, Point::new(2.0, 0.0)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(goals.revision() > revision);
        assert_eq!(goals.advance(), GoalProgress::MissionComplete);
        assert!(goals.remaining().is_empty());
        assert_eq!(goals.advance(), GoalProgress::MissionComplete);
    }

    #[test]
    fn test_new_candidates_are_appended_after_remaining_goals() {
        let grid = free_grid();
        let planner = StraightLinePlanner::new(0.5);
        let mut goals = GoalSet::new();
        goals.collect_goal(Point::new(2.0, 0.0), None);
        goals.sequence_goals(Point::origin(), &grid, &planner);

        goals.collect_goal(Point::new(0.5, 0.0), None);
        goals.sequence_goals(Point::origin(), &grid, &planner);
        let positions: Vec<Point> = goals.remaining().iter().map(|g| g.position).collect();
        assert_eq!(positions, vec![Point::new(2.0, 0.0), Point::new(0.5, 0.0)]);
    }

    #[test]
    fn test_remaining_waypoints_resume_route() {
        let grid = free_grid();
        let mut goals = GoalSet::new();
        goals.collect_goal(Point::new(2.0, 0.0), None);
        goals.collect_goal(Point::new(2.0, 1.0), None);
        goals.sequence_goals(Point::origin(), &grid, &StraightLinePlanner::new(0.5));

        let waypoints = goals.remaining_waypoints(&Point::new(1.1, 0.0));
        assert_eq!(waypoints.points[0], Point::new(1.5, 0.0));
        assert_eq!(waypoints.points[waypoints.active_goal], Point::new(2.0, 0.0));
        assert_eq!(*waypoints.points.last().unwrap(), Point::new(2.0, 1.0));
    }

    #[test]
    fn test_remaining_waypoints_keep_detour_start() {
        let grid = free_grid();
        let planner = |start: Point, end: Point, _grid: &OccupancyGrid| -> Result<Vec<Point>> {
            Ok(vec![start, Point::new(0.0, 1.0), Point::new(2.0, 1.0), end])
        };
        let mut goals = GoalSet::new();
        goals.collect_goal(Point::new(2.0, 0.0), None);
        goals.sequence_goals(Point::origin(), &grid, &planner);

        let waypoints = goals.remaining_waypoints(&Point::origin());
        assert_eq!(
            waypoints.points,
            vec![Point::new(0.0, 1.0), Point::new(2.0, 1.0), Point::new(2.0, 0.0)]
        );
        assert_eq!(waypoints.active_goal, 2);

        // Halfway along the top leg, only its end and the goal remain
        let waypoints = goals.remaining_waypoints(&Point::new(1.0, 1.05));
        assert_eq!(waypoints.points, vec![Point::new(2.0, 1.0), Point::new(2.0, 0.0)]);
    }

    #[test]
    fn test_markers_carry_goal_orientation() {
        let grid = free_grid();
        let mut goals = GoalSet::new();
        goals.collect_goal(Point::new(1.0, 0.0), Some(0.5));
        goals.collect_goal(Point::new(2.0, 0.0), None);
        goals.sequence_goals(Point::origin(), &grid, &StraightLinePlanner::new(0.5));

        let markers = goals.take_markers();
        let pending: Vec<_> = markers.iter().filter(|m| m.role == MarkerRole::Pending).collect();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].orientation, Some(0.5));
        assert_eq!(pending[1].orientation, None);

        goals.advance();
        let reached = goals.take_markers();
        assert_eq!(reached[0].role, MarkerRole::Reached);
        assert_eq!(reached[0].orientation, Some(0.5));
    }

    #[test]
    fn test_random_candidates_are_valid() {
        let mut grid = free_grid();
        grid.set_cell(5, 5, Occupancy::Occupied);
        let mut goals = GoalSet::new();
        let mut rng = StdRng::seed_from_u64(7);

        let ids = goals.generate_random_candidates(&grid, 20, HALF_WIDTH, &mut rng);
        assert_eq!(ids.len(), 20);
        for goal in goals.candidates() {
            assert!(GoalSet::validate(&goal.position, &grid, HALF_WIDTH).unwrap());
        }
    }
}
