use anyhow::Result;
use artbot_core::common::types::Point;
use artbot_core::common::Pose;
use artbot_core::control::trajectory::TrajectoryGenerator;
use artbot_core::navigation::occupancy_grid::{Occupancy, OccupancyGrid};
use artbot_core::navigation::path_follower::{PathFollower, PurePursuitFollower};
use artbot_core::navigation::planner::StraightLinePlanner;
use artbot_core::navigation::GoalSet;
use artbot_core::perception::scan::RangeScan;
use artbot_core::ControllerConfig;

fn main() -> Result<()> {
    println!("Initializing ArtBot Core...");

    let config = ControllerConfig::default();
    let grid = OccupancyGrid::filled(10, 10, 0.5, Point::new(-2.5, -2.5), Occupancy::Free)?;
    let start = Pose::default();

    // Collect, validate and sequence a few goals
    let mut goals = GoalSet::new();
    goals.collect_goals([
        (Point::new(2.0, 0.0), None),
        (Point::new(1.0, 1.0), None),
        (Point::new(2.2, 2.2), None),
    ]);
    let rejected = goals.validate_candidates(&grid, config.robot_half_width());
    let planner = StraightLinePlanner::new(config.planner_spacing);
    let order = goals.sequence_goals(start.position, &grid, &planner);
    println!("Rejected {} candidates, visiting order {:?}", rejected, order);

    let waypoints = goals.remaining_waypoints(&start.position);
    println!("Waypoints: {:?}", waypoints.points.iter().map(|p| (p.x, p.y)).collect::<Vec<_>>());

    let profile = TrajectoryGenerator::new(&config).generate(&waypoints.points, &start)?;
    println!(
        "Profile: {} points, {:.2}m, {:.1}s, within limits: {}",
        profile.len(),
        profile.length(),
        profile.len() as f64 * config.dt(),
        profile.within_limits(&config, 1e-9)
    );
    for point in profile.points().iter().step_by(10) {
        println!(
            "  [{:3}] ({:5.2}, {:5.2}) heading={:5.2} v={:.3}",
            point.index, point.position.x, point.position.y, point.heading, point.velocity
        );
    }

    // One pursuit step from the start
    let mut follower = PurePursuitFollower::new(&config);
    let scan = RangeScan::uniform(360, 3.0, 3.5);
    let output = follower.compute_command(&start, Some(&profile), Some(&scan), None);
    println!(
        "Using path follower: {}, first command linear={:.3}, angular={:.3}",
        follower.name(),
        output.command.linear,
        output.command.angular
    );

    Ok(())
}
