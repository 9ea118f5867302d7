//! rrt_replanner - anytime RRT* local replanning around obstructed trajectories
//!
//! This crate watches a reference trajectory ahead of a robot, runs an
//! anytime RRT* search on a background thread whenever the trajectory
//! crosses obstacles, and streams the planned detour into a waypoint sink.

// Core modules
pub mod common;
pub mod utils;

// Algorithm modules
pub mod path_planning;
pub mod mission_planning;

// Re-export common types for convenience
pub use common::{Point3, Bounds3D, NodeId, ScanPoint, Path3D};
pub use common::{PathPlanner, DistanceField, ReferenceTrajectory, TrajectorySink};
pub use common::{PlannerError, PlannerResult};
pub use path_planning::{PlannerConfig, RrtStar, PlanningEpisode, PlannerSnapshot};
pub use mission_planning::{Replanner, ReplanState};
