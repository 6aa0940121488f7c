use anyhow::{Context, Result};
use artbot_core::common::types::Point;
use artbot_core::common::Pose;
use artbot_core::control::{ControlLoop, ControlOutput, LoopState};
use artbot_core::navigation::occupancy_grid::{Occupancy, OccupancyGrid};
use artbot_core::navigation::path_follower::DriveCommand;
use artbot_core::navigation::GoalSet;
use artbot_core::perception::scan::RangeScan;
use artbot_core::{ControllerConfig, SharedState};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const SIM_PERIOD: Duration = Duration::from_millis(20);
const SCAN_READINGS: usize = 360;
const SCAN_RANGE_MAX: f64 = 3.5;
const RANDOM_GOALS: usize = 2;

/// Producer side of the shared state: odometry, laser and map callbacks as
/// a transport layer would deliver them.
struct ArtBotNode {
    shared: Arc<SharedState>,
}

impl ArtBotNode {
    fn new(shared: Arc<SharedState>) -> Self {
        ArtBotNode { shared }
    }

    fn odom_callback(&self, x: f64, y: f64, qx: f64, qy: f64, qz: f64, qw: f64) {
        let pose = Pose::from_quaternion(x, y, qx, qy, qz, qw);
        debug!(
            "Updated pose from odom: x={:.2}, y={:.2}, theta={:.2}",
            pose.position.x, pose.position.y, pose.heading
        );
        self.shared.set_pose(pose);
    }

    fn scan_callback(&self, scan: RangeScan) {
        self.shared.set_scan(scan);
    }

    fn map_callback(&self, grid: OccupancyGrid) {
        info!(
            "Received map {}x{} at {:.2}m/cell",
            grid.width(),
            grid.height(),
            grid.resolution()
        );
        self.shared.set_map(grid);
    }

    fn goal_callback(&self, x: f64, y: f64) {
        info!("Received new goal: x={}, y={}", x, y);
        self.shared.set_external_path_point(Point::new(x, y));
    }
}

/// A 5m x 5m room with a pillar.
fn build_map(config: &ControllerConfig) -> Result<OccupancyGrid> {
    let (width, height) = (50, 50);
    let mut raw = vec![0i8; width * height];
    for gy in 30..34 {
        for gx in 12..16 {
            raw[gy * width + gx] = 100;
        }
    }
    let grid = OccupancyGrid::from_raw(width, height, 0.1, -2.5, -2.5, &raw, config.occupied_threshold)?;
    Ok(grid)
}

/// Ray-march the grid to fake a laser sweep from `pose`.
fn simulate_scan(grid: &OccupancyGrid, pose: &Pose) -> RangeScan {
    let mut scan = RangeScan::uniform(SCAN_READINGS, f64::INFINITY, SCAN_RANGE_MAX);
    let step = grid.resolution() / 2.0;
    for i in 0..SCAN_READINGS {
        let direction = pose.heading + scan.angle_at(i);
        let mut range = step;
        while range <= SCAN_RANGE_MAX {
            let hit = Point::new(
                pose.position.x + range * direction.cos(),
                pose.position.y + range * direction.sin(),
            );
            if grid.occupancy_at(&hit) == Occupancy::Occupied {
                scan.ranges[i] = range;
                break;
            }
            range += step;
        }
    }
    scan
}

/// Unicycle model driven by the latest command.
async fn simulate_robot(
    node: Arc<ArtBotNode>,
    grid: OccupancyGrid,
    commands: watch::Receiver<DriveCommand>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut pose = Pose::default();
    let mut interval = tokio::time::interval(SIM_PERIOD);
    let dt = SIM_PERIOD.as_secs_f64();

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let command = *commands.borrow();
                pose.heading += command.angular * dt;
                pose.position.x += command.linear * pose.heading.cos() * dt;
                pose.position.y += command.linear * pose.heading.sin() * dt;

                let half = pose.heading / 2.0;
                node.odom_callback(pose.position.x, pose.position.y, 0.0, 0.0, half.sin(), half.cos());
                node.scan_callback(simulate_scan(&grid, &pose));
            }
            _ = shutdown.changed() => break,
        }
    }
}

fn load_config() -> Result<ControllerConfig> {
    match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => ControllerConfig::load(&path)
            .with_context(|| format!("Failed to load parameters from {}", path.display())),
        None => Ok(ControllerConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Initializing ArtBot Node...");

    let config = load_config()?;
    let shared = Arc::new(SharedState::new());
    let node = Arc::new(ArtBotNode::new(Arc::clone(&shared)));

    let grid = build_map(&config)?;
    node.map_callback(grid.clone());
    node.odom_callback(0.0, 0.0, 0.0, 0.0, 0.0, 1.0);
    node.scan_callback(simulate_scan(&grid, &Pose::default()));

    let mut control = ControlLoop::new(config.clone(), Arc::clone(&shared))?;
    control.goals_mut().collect_goals([
        (Point::new(1.5, 0.0), None),
        (Point::new(1.5, 1.5), Some(std::f64::consts::FRAC_PI_2)),
    ]);
    let mut rng = StdRng::seed_from_u64(7);
    let mut random = GoalSet::new();
    random.generate_random_candidates(&grid, RANDOM_GOALS, config.robot_half_width(), &mut rng);
    control
        .goals_mut()
        .collect_goals(random.candidates().iter().map(|g| (g.position, g.orientation)));
    node.goal_callback(-1.0, -1.0);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (command_tx, command_rx) = watch::channel(DriveCommand::stop());
    let (output_tx, mut output_rx) = mpsc::channel::<ControlOutput>(16);

    let sim = tokio::spawn(simulate_robot(
        Arc::clone(&node),
        grid,
        command_rx,
        shutdown_rx.clone(),
    ));
    let control_task = tokio::spawn(control.run(output_tx, shutdown_rx));

    let response = shared.request_mode(false);
    info!("{}", response.message);
    let response = shared.request_mission(true);
    info!("{}", response.message);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut previous = LoopState::Idle;
    let mut started = false;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Shutdown requested.");
                shared.request_mission(false);
                break;
            }
            output = output_rx.recv() => {
                let Some(output) = output else {
                    warn!("Control loop ended unexpectedly");
                    break;
                };
                for marker in &output.markers {
                    match marker.orientation {
                        Some(heading) => info!(
                            "Marker {} goal {} {:?} at ({:.2}, {:.2}) facing {:.2}",
                            marker.id, marker.goal_id, marker.role, marker.position.x, marker.position.y, heading
                        ),
                        None => info!(
                            "Marker {} goal {} {:?} at ({:.2}, {:.2})",
                            marker.id, marker.goal_id, marker.role, marker.position.x, marker.position.y
                        ),
                    }
                }
                if output.state != previous {
                    info!("Loop state: {}", output.state);
                    previous = output.state;
                }
                started |= output.state != LoopState::Idle;
                if command_tx.send(output.command).is_err() {
                    break;
                }
                if started && output.state == LoopState::Idle {
                    info!("Mission finished");
                    break;
                }
            }
        }
    }

    let _ = command_tx.send(DriveCommand::stop());
    let _ = shutdown_tx.send(true);
    control_task.await?;
    sim.await?;
    info!("ArtBot Node stopped");
    Ok(())
}
