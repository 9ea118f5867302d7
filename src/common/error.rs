//! Error types for rrt_replanner

use thiserror::Error;

use crate::common::types::NodeId;

/// Main error type for the planner
#[derive(Debug, Error)]
pub enum PlannerError {
    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// No distance field attached; every query fails closed
    #[error("Distance field unavailable")]
    MissingDistanceField,
    /// Obstruction too short to justify a planning episode
    #[error("Not enough obstruction to justify planning: {observed} obstructed samples, {required} required")]
    NotEnoughObstruction { observed: usize, required: usize },
    /// Node handle outside the arena
    #[error("Unknown node {0:?}")]
    UnknownNode(NodeId),
    /// Reparenting would create a cycle
    #[error("Reparenting {node:?} under {new_parent:?} would create a cycle")]
    CycleDetected { node: NodeId, new_parent: NodeId },
    /// Solution chain no longer reachable from the root
    #[error("Solution chain is no longer reachable from the root")]
    InvalidChain,
    /// Coordinator state machine refused a transition
    #[error("Invalid transition: <{state}> : [{event}]")]
    InvalidTransition { state: String, event: String },
    /// A planning episode is already running
    #[error("A planning episode is already running")]
    EpisodeActive,
    /// One-shot planning ended without reaching the goal region
    #[error("No path found after {iterations} iterations")]
    NoPathFound { iterations: usize },
    /// Planning thread could not be started
    #[error("Failed to spawn planning thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),
    /// Planning thread panicked before acknowledging cancellation
    #[error("Planning thread panicked")]
    WorkerPanicked,
    /// Configuration could not be parsed
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result type alias for planner operations
pub type PlannerResult<T> = Result<T, PlannerError>;
