use crate::common::{distance, Point3, TrajectorySink};

/// Append-only waypoint sink consumed by a robot following it
#[derive(Debug, Clone)]
pub struct WaypointQueue {
    points: Vec<Point3>,
    cursor: usize,
    advance_radius: f64,
}

impl WaypointQueue {
    pub fn new(advance_radius: f64) -> Self {
        WaypointQueue {
            points: Vec::new(),
            cursor: 0,
            advance_radius,
        }
    }

    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Waypoints not yet handed out
    pub fn remaining(&self) -> usize {
        self.points.len().saturating_sub(self.cursor + 1)
    }

    /// Current goal for the robot; moves on once the robot is within the
    /// advance radius of it
    pub fn next_point(&mut self, robot: &Point3) -> Option<Point3> {
        while let Some(current) = self.points.get(self.cursor) {
            if distance(robot, current) < self.advance_radius && self.cursor + 1 < self.points.len() {
                self.cursor += 1;
            } else {
                break;
            }
        }
        self.points.get(self.cursor).copied()
    }
}

impl TrajectorySink for WaypointQueue {
    fn append_waypoint(&mut self, point: Point3) {
        self.points.push(point);
    }
}
