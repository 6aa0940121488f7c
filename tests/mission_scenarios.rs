use approx::assert_relative_eq;
use artbot_core::common::types::Point;
use artbot_core::common::{distance_to_goal, Pose};
use artbot_core::control::trajectory::TrajectoryGenerator;
use artbot_core::control::{BlockReason, ControlLoop, LoopState};
use artbot_core::navigation::occupancy_grid::{Occupancy, OccupancyGrid};
use artbot_core::navigation::path_follower::{PathFollower, PurePursuitFollower};
use artbot_core::navigation::planner::{PathPlanner, StraightLinePlanner};
use artbot_core::navigation::{GoalSet, MarkerRole};
use artbot_core::perception::scan::RangeScan;
use artbot_core::{ControllerConfig, NavError, SharedState};
use std::sync::Arc;
use std::time::Instant;

fn free_grid() -> OccupancyGrid {
    OccupancyGrid::filled(10, 10, 0.5, Point::new(-2.5, -2.5), Occupancy::Free).unwrap()
}

fn clear_scan() -> RangeScan {
    RangeScan::uniform(360, 3.0, 3.5)
}

fn shared_with_sensors(pose: Pose) -> Arc<SharedState> {
    let shared = Arc::new(SharedState::new());
    shared.set_pose(pose);
    shared.set_scan(clear_scan());
    shared.set_map(free_grid());
    shared
}

/// Integrate a unicycle for one control period.
fn step(pose: &mut Pose, linear: f64, angular: f64, dt: f64) {
    pose.heading += angular * dt;
    pose.position.x += linear * pose.heading.cos() * dt;
    pose.position.y += linear * pose.heading.sin() * dt;
}

#[test]
fn straight_goal_pieces() {
    let config = ControllerConfig::default();
    let grid = free_grid();
    let start = Pose::default();
    let goal = Point::new(2.0, 0.0);

    assert!(GoalSet::validate(&goal, &grid, config.robot_half_width()).unwrap());

    let path = StraightLinePlanner::new(1.0).plan(start.position, goal, &grid).unwrap();
    assert_eq!(path, vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0), Point::new(2.0, 0.0)]);

    let profile = TrajectoryGenerator::new(&config).generate(&path[1..], &start).unwrap();
    assert_relative_eq!(profile.last().unwrap().velocity, 0.0);

    let mut follower = PurePursuitFollower::new(&config);
    let out = follower.compute_command(&start, Some(&profile), Some(&clear_scan()), None);
    assert_relative_eq!(out.curvature, 0.0, epsilon = 1e-9);
}

#[test]
fn closed_loop_reaches_straight_goal() {
    let config = ControllerConfig::default();
    let dt = config.dt();
    let mut pose = Pose::default();
    let shared = shared_with_sensors(pose);
    let mut control = ControlLoop::new(config.clone(), Arc::clone(&shared)).unwrap();
    control.goals_mut().collect_goal(Point::new(2.0, 0.0), None);
    shared.request_mission(true);

    let mut reached_at = None;
    let mut last_marker_id = None;
    for tick in 0..400 {
        let out = control.tick(Instant::now());
        for marker in &out.markers {
            if let Some(previous) = last_marker_id {
                assert!(marker.id > previous);
            }
            last_marker_id = Some(marker.id);
        }

        if out.state == LoopState::Tracking {
            assert!(out.command.linear >= 0.0 && out.command.linear <= config.max_vel + 1e-9);
            assert!(out.command.angular.abs() < 1e-6, "tick {} angular {}", tick, out.command.angular);
        }
        if out.state == LoopState::Complete {
            reached_at = Some(pose);
            break;
        }

        step(&mut pose, out.command.linear, out.command.angular, dt);
        shared.set_pose(pose);
        shared.set_scan(clear_scan());
    }

    let reached_at = reached_at.expect("mission never completed");
    assert!(distance_to_goal(&Point::new(2.0, 0.0), &reached_at) < config.goal_distance);

    // Complete hands back to Idle and clears the mission flag
    let out = control.tick(Instant::now());
    assert_eq!(out.command.linear, 0.0);
    let out = control.tick(Instant::now());
    assert_eq!(out.state, LoopState::Idle);
    assert!(!shared.is_running());
}

#[test]
fn closed_loop_visits_every_goal_once() {
    let config = ControllerConfig::default();
    let dt = config.dt();
    let mut pose = Pose::default();
    let shared = shared_with_sensors(pose);
    let mut control = ControlLoop::new(config, Arc::clone(&shared)).unwrap();
    let ids = control
        .goals_mut()
        .collect_goals([(Point::new(1.5, 1.0), None), (Point::new(1.0, 0.0), None)]);
    shared.request_mission(true);

    let mut reached = Vec::new();
    for _ in 0..1000 {
        let out = control.tick(Instant::now());
        reached.extend(
            out.markers
                .iter()
                .filter(|m| m.role == MarkerRole::Reached)
                .map(|m| m.goal_id),
        );
        if out.state == LoopState::Complete {
            break;
        }
        step(&mut pose, out.command.linear, out.command.angular, dt);
        shared.set_pose(pose);
        shared.set_scan(clear_scan());
    }

    // Nearest first
    assert_eq!(reached, vec![ids[1], ids[0]]);
}

#[test]
fn obstacle_ahead_blocks_the_robot() {
    let config = ControllerConfig::default();
    let shared = shared_with_sensors(Pose::default());
    let mut control = ControlLoop::new(config, Arc::clone(&shared)).unwrap();
    control.goals_mut().collect_goal(Point::new(2.0, 0.0), None);
    shared.request_mission(true);
    assert_eq!(control.tick(Instant::now()).state, LoopState::Tracking);

    // 0.15 - 0.12 = 0.03 < 0.24
    let mut scan = clear_scan();
    scan.ranges[0] = 0.15;
    shared.set_scan(scan);

    for _ in 0..5 {
        let out = control.tick(Instant::now());
        assert_eq!(out.state, LoopState::Blocked);
        assert_eq!(out.block_reason, Some(BlockReason::TooClose));
        assert_eq!(out.command.linear, 0.0);
        assert_eq!(out.command.angular, 0.0);
    }
}

#[test]
fn collected_goals_appear_once_after_sequencing() {
    let config = ControllerConfig::default();
    let mut grid = free_grid();
    grid.set_cell(2, 2, Occupancy::Occupied);

    let mut goals = GoalSet::new();
    let ids = goals.collect_goals([
        (Point::new(2.0, 0.0), None),
        (Point::new(-1.5, -1.5), None),
        (Point::new(0.0, 2.0), None),
        (Point::new(9.0, 9.0), None),
        (Point::new(-1.0, 1.0), None),
    ]);

    let rejected = goals.validate_candidates(&grid, config.robot_half_width());
    assert_eq!(rejected, 2);

    let planner = StraightLinePlanner::new(config.planner_spacing);
    let order = goals.sequence_goals(Point::origin(), &grid, &planner);

    let mut sorted = order.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), order.len());
    assert_eq!(order.len(), 3);
    for id in [ids[0], ids[2], ids[4]] {
        assert_eq!(goals.ordered().iter().filter(|g| g.id == id).count(), 1);
    }
}

#[test]
fn planner_failure_drops_only_that_goal() {
    let config = ControllerConfig::default();
    let grid = free_grid();
    let blocked = Point::new(-2.0, -2.0);
    let planner = move |start: Point, end: Point, _grid: &OccupancyGrid| {
        if end == blocked {
            Err(NavError::NoFeasiblePath {
                start: (start.x, start.y),
                end: (end.x, end.y),
            })
        } else {
            Ok(vec![start, end])
        }
    };

    let shared = shared_with_sensors(Pose::default());
    let mut control = ControlLoop::with_planner(config, Arc::clone(&shared), planner).unwrap();
    control
        .goals_mut()
        .collect_goals([(Point::new(1.0, 0.0), None), (blocked, None)]);
    shared.request_mission(true);

    let out = control.tick(Instant::now());
    assert_eq!(out.state, LoopState::Tracking);
    assert_eq!(control.goals().remaining().len(), 1);
    assert!(out.markers.iter().any(|m| m.role == MarkerRole::Rejected && m.position == blocked));
    assert!(GoalSet::validate(&blocked, &grid, 0.15).unwrap());
}

#[test]
fn stop_request_cancels_motion() {
    let config = ControllerConfig::default();
    let shared = shared_with_sensors(Pose::default());
    let mut control = ControlLoop::new(config, Arc::clone(&shared)).unwrap();
    control.goals_mut().collect_goal(Point::new(2.0, 0.0), None);
    shared.request_mission(true);
    for _ in 0..10 {
        control.tick(Instant::now());
    }

    let response = shared.request_mission(false);
    assert!(response.success);
    let out = control.tick(Instant::now());
    assert_eq!(out.state, LoopState::Idle);
    assert_eq!(out.command.linear, 0.0);

    // Stopping again is a successful no-op
    assert!(shared.request_mission(false).success);
    assert_eq!(control.tick(Instant::now()).state, LoopState::Idle);
}
