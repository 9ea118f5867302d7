// Replanning coordinator module

pub mod state_machine;
pub mod replanner;

pub use state_machine::*;
pub use replanner::*;
