// Replanning around a spherical obstacle sitting on a straight reference.
// The robot follows the waypoint queue fed by the replanner.
//
// usage: replan_demo [config.json]

use std::error::Error;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rrt_replanner::common::{distance, Bounds3D, Point3};
use rrt_replanner::mission_planning::{ReplanState, Replanner};
use rrt_replanner::path_planning::PlannerConfig;
use rrt_replanner::utils::{PolylineTrajectory, SphereField, WaypointQueue};

const ROBOT_SPEED: f64 = 1.5;
const SIM_DT: f64 = 0.05;
const MAX_STEPS: usize = 4000;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("rrt_replanner=info".parse()?))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => PlannerConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => PlannerConfig {
            fixed_height: Some(1.0),
            episode_budget_secs: Some(5.0),
            ..PlannerConfig::default()
        },
    };

    let field = SphereField::try_new(Bounds3D::new(Point3::new(-2.0, -6.0, 0.0), Point3::new(22.0, 6.0, 2.0)), 0.25)?
        .with_sphere(Point3::new(10.0, 0.0, 1.0), 1.5);
    let reference = PolylineTrajectory::new(vec![Point3::new(0.0, 0.0, 1.0), Point3::new(20.0, 0.0, 1.0)], 2.0)?;
    let end = Point3::new(20.0, 0.0, 1.0);
    let queue = WaypointQueue::new(config.step_length);

    let mut replanner = Replanner::new(config, Some(Arc::new(field.clone())), reference, queue)?;
    let mut robot = Point3::new(0.0, 0.0, 1.0);
    let mut min_clearance = f64::INFINITY;

    for step in 0..MAX_STEPS {
        let state = replanner.tick(robot)?;
        if let Some(goal) = replanner.sink_mut().next_point(&robot) {
            let offset = goal - robot;
            let reach = ROBOT_SPEED * SIM_DT;
            robot += if offset.norm() > reach { offset.normalize() * reach } else { offset };
        }
        min_clearance = min_clearance.min(field.clearance_at(&robot));

        if step % 40 == 0 {
            tracing::info!(step, %state, robot = ?robot, "tick");
        }
        if state == ReplanState::Idle && distance(&robot, &end) < 1e-3 {
            break;
        }
        sleep(Duration::from_millis(10));
    }

    let transitions = replanner.history().len();
    let snapshot = replanner.snapshot();
    replanner.shutdown()?;
    let queue = replanner.into_sink();
    tracing::info!(
        waypoints = queue.len(),
        transitions,
        min_clearance,
        scan_time = snapshot.scan_time,
        "replanning run finished"
    );
    println!("{}", serde_json::to_string_pretty(queue.points())?);
    Ok(())
}
