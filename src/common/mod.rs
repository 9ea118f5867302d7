//! Common types, traits, and error definitions for rrt_replanner
//!
//! This module provides the foundational building blocks shared by the
//! planning engine and the replanning coordinator.

pub mod types;
pub mod traits;
pub mod error;

pub use types::*;
pub use traits::*;
pub use error::*;
