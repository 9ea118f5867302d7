//! Reference collaborators for rrt_replanner

pub mod distance_field;
pub mod polyline;
pub mod waypoint_queue;

pub use distance_field::*;
pub use polyline::*;
pub use waypoint_queue::*;
