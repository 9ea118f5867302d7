// analytic distance field built from spheres over a voxelized volume

use crate::common::{distance, Bounds3D, CellIndex, DistanceField, PlannerError, PlannerResult, Point3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    pub center: Point3,
    pub radius: f64,
}

/// Spherical obstacles inside an axis-aligned volume with cubic voxels
#[derive(Debug, Clone)]
pub struct SphereField {
    bounds: Bounds3D,
    resolution: f64,
    spheres: Vec<Sphere>,
}

impl SphereField {
    pub fn new(bounds: Bounds3D, resolution: f64) -> Self {
        Self {
            bounds,
            resolution,
            spheres: Vec::new(),
        }
    }

    pub fn try_new(bounds: Bounds3D, resolution: f64) -> PlannerResult<Self> {
        if !bounds.is_valid() {
            return Err(PlannerError::InvalidParameter("volume bounds must satisfy min <= max".to_string()));
        }
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(PlannerError::InvalidParameter(format!("resolution must be positive, got {}", resolution)));
        }
        Ok(Self::new(bounds, resolution))
    }

    pub fn with_sphere(mut self, center: Point3, radius: f64) -> Self {
        self.add_sphere(center, radius);
        self
    }

    pub fn add_sphere(&mut self, center: Point3, radius: f64) {
        self.spheres.push(Sphere { center, radius });
    }

    pub fn spheres(&self) -> &[Sphere] {
        &self.spheres
    }

    /// Signed distance to the closest sphere surface
    pub fn clearance_at(&self, point: &Point3) -> f64 {
        self.spheres
            .iter()
            .map(|s| distance(point, &s.center) - s.radius)
            .fold(f64::INFINITY, f64::min)
    }

    fn cell_center(&self, cell: &CellIndex) -> Point3 {
        self.bounds.min + cell.map(|c| (c as f64 + 0.5) * self.resolution)
    }
}

impl DistanceField for SphereField {
    fn near_obstacle(&self, point: &Point3, radius: f64) -> bool {
        self.clearance_at(point) < radius
    }

    fn occupied(&self, cell: &CellIndex) -> bool {
        self.clearance_at(&self.cell_center(cell)) < 0.0
    }

    fn index_of(&self, point: &Point3) -> CellIndex {
        (point - self.bounds.min).map(|v| (v / self.resolution).floor() as i32)
    }

    fn volume_bounds(&self) -> Bounds3D {
        self.bounds
    }

    fn volume_center(&self) -> CellIndex {
        self.index_of(&self.bounds.center())
    }

    fn inside_volume(&self, points: &[Point3]) -> bool {
        points.iter().all(|p| self.bounds.contains(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field() -> SphereField {
        SphereField::try_new(
            Bounds3D::new(Point3::new(0.0, -5.0, 0.0), Point3::new(10.0, 5.0, 2.0)),
            0.5,
        )
        .unwrap()
        .with_sphere(Point3::new(5.0, 0.0, 1.0), 1.5)
    }

    #[test]
    fn test_near_obstacle_uses_radius() {
        let field = field();
        assert!(field.near_obstacle(&Point3::new(5.0, 1.0, 1.0), 0.0));
        assert!(!field.near_obstacle(&Point3::new(5.0, 1.7, 1.0), 0.1));
        assert!(field.near_obstacle(&Point3::new(5.0, 1.7, 1.0), 0.3));
        assert!(!field.near_obstacle(&Point3::new(0.0, 0.0, 1.0), 1.0));
    }

    #[test]
    fn test_voxel_indexing() {
        let field = field();
        let cell = field.index_of(&Point3::new(5.1, 0.1, 1.1));
        assert_eq!(cell, CellIndex::new(10, 10, 2));
        assert!(field.occupied(&cell));
        assert!(!field.occupied(&CellIndex::new(0, 0, 0)));
        assert_eq!(field.volume_center(), CellIndex::new(10, 10, 2));
    }

    #[test]
    fn test_inside_volume() {
        let field = field();
        assert!(field.inside_volume(&[Point3::new(1.0, 1.0, 1.0), Point3::new(9.0, -4.0, 0.5)]));
        assert!(!field.inside_volume(&[Point3::new(1.0, 1.0, 1.0), Point3::new(11.0, 0.0, 1.0)]));
    }

    #[test]
    fn test_invalid_construction() {
        let inverted = Bounds3D::new(Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 1.0));
        assert!(SphereField::try_new(inverted, 0.5).is_err());
        let bounds = Bounds3D::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
        assert!(SphereField::try_new(bounds, 0.0).is_err());
    }
}
