//! Common types used throughout rrt_replanner

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Configuration (3D position) in the planning frame
pub type Point3 = Vector3<f64>;

/// Voxel index into a distance field
pub type CellIndex = Vector3<i32>;

/// Euclidean distance between two points
pub fn distance(a: &Point3, b: &Point3) -> f64 {
    (b - a).norm()
}

pub fn midpoint(a: &Point3, b: &Point3) -> Point3 {
    (a + b) / 2.0
}

/// Axis-aligned volume bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds3D {
    pub min: Point3,
    pub max: Point3,
}

impl Bounds3D {
    pub fn new(min: Point3, max: Point3) -> Self {
        Self { min, max }
    }

    /// Bounds are usable only when every axis has `min <= max`
    pub fn is_valid(&self) -> bool {
        (0..3).all(|i| self.min[i].is_finite() && self.max[i].is_finite() && self.min[i] <= self.max[i])
    }

    pub fn contains(&self, point: &Point3) -> bool {
        (0..3).all(|i| point[i] >= self.min[i] && point[i] <= self.max[i])
    }

    pub fn center(&self) -> Point3 {
        midpoint(&self.min, &self.max)
    }
}

/// Stable handle into the node arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A reference-trajectory sample classified against the distance field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanPoint {
    pub position: Point3,
    pub obstructed: bool,
}

impl ScanPoint {
    pub fn new(position: Point3, obstructed: bool) -> Self {
        Self { position, obstructed }
    }
}

/// Tree edge exported for telemetry, never stored
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub parent: Point3,
    pub child: Point3,
    /// Edge lies on the published solution chain
    pub active: bool,
}

/// Path represented as a sequence of 3D points
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Path3D {
    pub points: Vec<Point3>,
}

impl Path3D {
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    pub fn from_points(points: Vec<Point3>) -> Self {
        Self { points }
    }

    pub fn push(&mut self, point: Point3) {
        self.points.push(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&Point3> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&Point3> {
        self.points.last()
    }

    pub fn total_length(&self) -> f64 {
        if self.points.len() < 2 {
            return 0.0;
        }
        self.points.windows(2)
            .map(|w| distance(&w[0], &w[1]))
            .sum()
    }
}
