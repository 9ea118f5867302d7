//! Common traits defining the planner's collaborator interfaces

use crate::common::error::PlannerError;
use crate::common::types::*;

/// Trait for one-shot path planning algorithms
pub trait PathPlanner {
    /// Plan a path from start to goal
    fn plan(&self, start: Point3, goal: Point3) -> Result<Path3D, PlannerError>;
}

/// Occupancy / Euclidean distance field queried by the planner.
///
/// Implementations are shared between the planning thread and the
/// coordinator, so they must be `Send + Sync`.
pub trait DistanceField: Send + Sync {
    /// True if `point` lies within `radius` of an obstacle
    fn near_obstacle(&self, point: &Point3, radius: f64) -> bool;

    /// Classify a batch of points
    fn near_obstacle_batch(&self, points: &[Point3], radius: f64) -> Vec<ScanPoint> {
        points
            .iter()
            .map(|p| ScanPoint::new(*p, self.near_obstacle(p, radius)))
            .collect()
    }

    /// True if the cell is occupied
    fn occupied(&self, cell: &CellIndex) -> bool;

    /// Cell containing `point`
    fn index_of(&self, point: &Point3) -> CellIndex;

    /// Extent of the known volume
    fn volume_bounds(&self) -> Bounds3D;

    /// Cell at the center of the known volume
    fn volume_center(&self) -> CellIndex;

    /// True if every point lies inside the known volume
    fn inside_volume(&self, points: &[Point3]) -> bool;
}

/// Reference trajectory the robot is already following (read-only)
pub trait ReferenceTrajectory {
    /// Total duration [s]
    fn duration(&self) -> f64;

    /// `window` samples starting at `time`, spaced by `step` seconds
    fn sample(&self, time: f64, step: f64, window: usize, derivative_order: usize) -> Vec<Point3>;

    /// Value at the end of the polynomial segment containing `time`
    fn evaluate_segment_end(&self, time: f64, derivative_order: usize) -> Point3;
}

/// Output trajectory fed with planned waypoints. Append-only.
pub trait TrajectorySink {
    fn append_waypoint(&mut self, point: Point3);
}

impl TrajectorySink for Vec<Point3> {
    fn append_waypoint(&mut self, point: Point3) {
        self.push(point);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct WallField;

    impl DistanceField for WallField {
        fn near_obstacle(&self, point: &Point3, radius: f64) -> bool {
            (point.x - 5.0).abs() < radius
        }
        fn occupied(&self, cell: &CellIndex) -> bool {
            cell.x == 5
        }
        fn index_of(&self, point: &Point3) -> CellIndex {
            CellIndex::new(point.x.floor() as i32, point.y.floor() as i32, point.z.floor() as i32)
        }
        fn volume_bounds(&self) -> Bounds3D {
            Bounds3D::new(Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 10.0, 10.0))
        }
        fn volume_center(&self) -> CellIndex {
            CellIndex::new(5, 5, 5)
        }
        fn inside_volume(&self, points: &[Point3]) -> bool {
            points.iter().all(|p| self.volume_bounds().contains(p))
        }
    }

    #[test]
    fn test_default_batch_query() {
        let field = WallField;
        let points = vec![Point3::new(1.0, 0.0, 0.0), Point3::new(4.8, 0.0, 0.0)];
        let classified = field.near_obstacle_batch(&points, 0.5);
        assert_eq!(classified.len(), 2);
        assert!(!classified[0].obstructed);
        assert!(classified[1].obstructed);
        assert_eq!(classified[1].position, points[1]);
    }

    #[test]
    fn test_vec_sink_appends() {
        let mut sink: Vec<Point3> = Vec::new();
        sink.append_waypoint(Point3::new(1.0, 2.0, 3.0));
        assert_eq!(sink.len(), 1);
    }
}
