// Anytime RRT* planning engine

pub mod config;
pub mod collision;
pub mod tree;
pub mod sampler;
pub mod solution;
pub mod rrt_star;
pub mod episode;
pub mod telemetry;

pub use config::*;
pub use collision::*;
pub use tree::*;
pub use sampler::*;
pub use solution::*;
pub use rrt_star::*;
pub use episode::*;
pub use telemetry::*;
