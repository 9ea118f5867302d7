//! Collision queries against a shared distance field
//!
//! Every query fails closed: without a field, segments and points are
//! reported as colliding and cells as occupied.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::warn;

use crate::common::{midpoint, Bounds3D, DistanceField, Point3, ScanPoint};

type FieldSlot = Arc<RwLock<Option<Arc<dyn DistanceField>>>>;

/// Clearance-aware collision predicate shared by the planning thread and
/// the coordinator. Cloning shares the same field slot.
#[derive(Clone)]
pub struct CollisionChecker {
    field: FieldSlot,
    clearance: f64,
    warned: Arc<AtomicBool>,
}

impl CollisionChecker {
    /// Checker with no field attached yet
    pub fn new(clearance: f64) -> Self {
        Self {
            field: Arc::new(RwLock::new(None)),
            clearance,
            warned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_field(field: Arc<dyn DistanceField>, clearance: f64) -> Self {
        let checker = Self::new(clearance);
        checker.set_field(Some(field));
        checker
    }

    /// Swap the field, e.g. after a map update
    pub fn set_field(&self, field: Option<Arc<dyn DistanceField>>) {
        let mut slot = self.field.write().unwrap_or_else(PoisonError::into_inner);
        *slot = field;
        self.warned.store(false, Ordering::Relaxed);
    }

    pub fn has_field(&self) -> bool {
        self.current().is_some()
    }

    pub fn clearance(&self) -> f64 {
        self.clearance
    }

    // The lock is held only while cloning the handle; queries run unlocked.
    fn current(&self) -> Option<Arc<dyn DistanceField>> {
        let slot = self.field.read().unwrap_or_else(PoisonError::into_inner);
        slot.clone()
    }

    fn field_or_warn(&self) -> Option<Arc<dyn DistanceField>> {
        let field = self.current();
        if field.is_none() && !self.warned.swap(true, Ordering::Relaxed) {
            warn!("distance field unavailable, treating every query as collision");
        }
        field
    }

    /// Segment test at both endpoints and the midpoint
    pub fn segment_in_collision(&self, from: &Point3, to: &Point3) -> bool {
        match self.field_or_warn() {
            Some(field) => {
                let mid = midpoint(from, to);
                [from, &mid, to]
                    .iter()
                    .any(|p| field.near_obstacle(p, self.clearance))
            }
            None => true,
        }
    }

    pub fn point_in_collision(&self, point: &Point3) -> bool {
        match self.field_or_warn() {
            Some(field) => field.near_obstacle(point, self.clearance),
            None => true,
        }
    }

    /// Classify reference samples with an explicit radius
    pub fn classify(&self, points: &[Point3], radius: f64) -> Vec<ScanPoint> {
        match self.field_or_warn() {
            Some(field) => field.near_obstacle_batch(points, radius),
            None => points.iter().map(|p| ScanPoint::new(*p, true)).collect(),
        }
    }

    pub fn inside_volume(&self, points: &[Point3]) -> bool {
        match self.field_or_warn() {
            Some(field) => field.inside_volume(points),
            None => false,
        }
    }

    /// True when the cell holding `point` is occupied
    pub fn occupied_at(&self, point: &Point3) -> bool {
        match self.field_or_warn() {
            Some(field) => field.occupied(&field.index_of(point)),
            None => true,
        }
    }

    pub fn volume_bounds(&self) -> Option<Bounds3D> {
        self.field_or_warn()
            .map(|field| field.volume_bounds())
            .filter(Bounds3D::is_valid)
    }
}

impl std::fmt::Debug for CollisionChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollisionChecker")
            .field("has_field", &self.has_field())
            .field("clearance", &self.clearance)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::CellIndex;

    struct SlabField;

    impl DistanceField for SlabField {
        fn near_obstacle(&self, point: &Point3, radius: f64) -> bool {
            (point.x - 5.0).abs() < 0.5 + radius
        }
        fn occupied(&self, cell: &CellIndex) -> bool {
            cell.x == 5
        }
        fn index_of(&self, point: &Point3) -> CellIndex {
            CellIndex::new(point.x.floor() as i32, point.y.floor() as i32, point.z.floor() as i32)
        }
        fn volume_bounds(&self) -> Bounds3D {
            Bounds3D::new(Point3::new(0.0, -5.0, 0.0), Point3::new(10.0, 5.0, 2.0))
        }
        fn volume_center(&self) -> CellIndex {
            CellIndex::new(5, 0, 1)
        }
        fn inside_volume(&self, points: &[Point3]) -> bool {
            points.iter().all(|p| self.volume_bounds().contains(p))
        }
    }

    #[test]
    fn test_missing_field_fails_closed() {
        let checker = CollisionChecker::new(0.3);
        let a = Point3::new(0.0, 0.0, 1.0);
        let b = Point3::new(1.0, 0.0, 1.0);
        assert!(!checker.has_field());
        assert!(checker.segment_in_collision(&a, &b));
        assert!(checker.point_in_collision(&a));
        assert!(checker.occupied_at(&a));
        assert!(!checker.inside_volume(&[a]));
        assert!(checker.volume_bounds().is_none());
        assert!(checker.classify(&[a, b], 0.3).iter().all(|s| s.obstructed));
    }

    #[test]
    fn test_segment_uses_midpoint() {
        let checker = CollisionChecker::with_field(Arc::new(SlabField), 0.1);
        // Endpoints are clear, the midpoint sits inside the slab
        let a = Point3::new(4.0, 0.0, 1.0);
        let b = Point3::new(6.0, 0.0, 1.0);
        assert!(!checker.point_in_collision(&a));
        assert!(!checker.point_in_collision(&b));
        assert!(checker.segment_in_collision(&a, &b));
        assert!(!checker.segment_in_collision(&a, &Point3::new(3.0, 0.0, 1.0)));
    }

    #[test]
    fn test_field_swap_is_shared_between_clones() {
        let checker = CollisionChecker::new(0.1);
        let clone = checker.clone();
        checker.set_field(Some(Arc::new(SlabField)));
        assert!(clone.has_field());
        assert!(!clone.point_in_collision(&Point3::new(1.0, 0.0, 1.0)));
        clone.set_field(None);
        assert!(checker.point_in_collision(&Point3::new(1.0, 0.0, 1.0)));
    }
}
