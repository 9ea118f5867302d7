//! Read-only planner snapshots for visualization and logging

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::common::{Edge, Point3};

/// Informed sampling region at the current best cost
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EllipsoidSnapshot {
    pub center: Point3,
    pub orientation: UnitQuaternion<f64>,
    /// Semi-axis lengths, major axis first
    pub axes: Vector3<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerSnapshot {
    pub nodes: Vec<Point3>,
    pub edges: Vec<Edge>,
    /// Published chain from the sub-root, ending at the goal for a true solution
    pub chain: Vec<Point3>,
    pub ellipsoid: Option<EllipsoidSnapshot>,
    pub start: Point3,
    pub goal: Point3,
    pub sub_root: Option<Point3>,
    pub best_cost: Option<f64>,
    pub temporary: bool,
    pub iterations: usize,
}

impl PlannerSnapshot {
    pub fn active_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(|e| e.active)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_planning::episode::SearchState;

    #[test]
    fn test_snapshot_marks_chain_edges() {
        let mut state = SearchState::new(Point3::new(0.0, 0.0, 0.0), Point3::new(3.0, 0.0, 0.0));
        let a = state.tree.insert(state.tree.root(), Point3::new(1.0, 0.0, 0.0)).unwrap();
        let b = state.tree.insert(a, Point3::new(2.0, 0.0, 0.0)).unwrap();
        state.tree.insert(state.tree.root(), Point3::new(0.0, 1.0, 0.0)).unwrap();
        state.tracker.consider(&state.tree, b, &state.goal, 1.5).unwrap();
        state.tracker.update(&state.tree, state.sub_root, &state.goal, 1.5, 2.0).unwrap();

        let snapshot = state.snapshot(1.5);
        assert_eq!(snapshot.nodes.len(), 4);
        assert_eq!(snapshot.edges.len(), 3);
        assert_eq!(snapshot.active_edges().count(), 2);
        assert_eq!(snapshot.chain.len(), 4);
        assert_eq!(snapshot.best_cost, Some(3.0));

        let ellipsoid = snapshot.ellipsoid.clone().unwrap();
        assert_eq!(ellipsoid.center, Point3::new(1.5, 0.0, 0.0));
        assert!((ellipsoid.axes.x - 1.5).abs() < 1e-12);
        assert!(ellipsoid.axes.y.abs() < 1e-6);
    }

    #[test]
    fn test_snapshot_json_roundtrip() {
        let state = SearchState::new(Point3::new(0.0, 0.0, 1.0), Point3::new(4.0, 3.0, 1.0));
        let snapshot = state.snapshot(1.5);
        let json = snapshot.to_json().unwrap();
        let parsed: PlannerSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.goal, snapshot.goal);
        assert!(parsed.ellipsoid.is_none());
        assert_eq!(parsed.nodes.len(), 1);
    }
}
