//! Sampling strategies for the growth loop
//!
//! Before a solution exists a uniform draw `P` chooses between goal-line,
//! uniform and informed-ellipsoid sampling. Once the best cost is finite only
//! the informed ellipsoid is used.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::common::{distance, midpoint, Point3};
use crate::path_planning::collision::CollisionChecker;
use crate::path_planning::config::PlannerConfig;
use crate::path_planning::tree::steer;

const CONTAINMENT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingStrategy {
    /// One step from the node nearest the goal toward the goal
    GoalLine,
    /// Uniform over the known volume
    Uniform,
    /// Prolate spheroid with foci at start and target
    Ellipsoid,
}

/// Informed sampling region, rebuilt whenever the target changes
#[derive(Debug, Clone, PartialEq)]
pub struct InformedEllipsoid {
    pub start: Point3,
    pub target: Point3,
    pub c_min: f64,
    pub rotation: Matrix3<f64>,
}

impl InformedEllipsoid {
    pub fn new(start: Point3, target: Point3) -> Self {
        let c_min = distance(&start, &target);
        InformedEllipsoid {
            start,
            target,
            c_min,
            rotation: Self::rotation_to_world(&start, &target, c_min),
        }
    }

    // C = U * diag(1, 1, det(U) det(V)) * V^T from the SVD of a1 * e1^T
    fn rotation_to_world(start: &Point3, target: &Point3, c_min: f64) -> Matrix3<f64> {
        if c_min <= f64::EPSILON {
            return Matrix3::identity();
        }
        let a1 = (target - start) / c_min;
        let m = a1 * Vector3::x().transpose();
        let svd = m.svd(true, true);
        match (svd.u, svd.v_t) {
            (Some(u), Some(v_t)) => {
                let fix = u.determinant() * v_t.determinant();
                u * Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, fix)) * v_t
            }
            _ => Matrix3::identity(),
        }
    }

    pub fn center(&self) -> Point3 {
        midpoint(&self.start, &self.target)
    }

    /// Semi-axis lengths for a given best cost
    pub fn axes(&self, c_best: f64) -> Vector3<f64> {
        let major = c_best / 2.0;
        let minor = (c_best * c_best - self.c_min * self.c_min).max(0.0).sqrt() / 2.0;
        Vector3::new(major, minor, minor)
    }

    pub fn quaternion(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(self.rotation))
    }

    /// Map a point of the unit ball into the world frame
    pub fn transform(&self, ball: &Vector3<f64>, c_best: f64) -> Point3 {
        let scaled = self.axes(c_best).component_mul(ball);
        self.rotation * scaled + self.center()
    }

    pub fn contains(&self, point: &Point3, c_best: f64) -> bool {
        distance(point, &self.start) + distance(point, &self.target)
            <= c_best + CONTAINMENT_TOLERANCE * c_best.abs().max(1.0)
    }

    /// Uniform draw inside the ellipsoid; `c_best` must be finite
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, c_best: f64) -> Point3 {
        self.transform(&sample_unit_ball(rng), c_best)
    }
}

/// Uniform draw from the unit ball: normal direction, radius `u^(1/3)`
pub fn sample_unit_ball<R: Rng + ?Sized>(rng: &mut R) -> Vector3<f64> {
    loop {
        let direction = Vector3::new(
            rng.sample::<f64, _>(StandardNormal),
            rng.sample::<f64, _>(StandardNormal),
            rng.sample::<f64, _>(StandardNormal),
        );
        let norm = direction.norm();
        if norm > 1e-12 {
            let radius = rng.gen::<f64>().cbrt();
            return direction * (radius / norm);
        }
    }
}

#[derive(Debug, Clone)]
pub struct Sampler {
    alpha: f64,
    beta: f64,
    step_length: f64,
    fixed_height: Option<f64>,
    max_attempts: usize,
}

impl Sampler {
    pub fn from_config(config: &PlannerConfig) -> Self {
        Sampler {
            alpha: config.sampling_alpha,
            beta: config.sampling_beta,
            step_length: config.step_length,
            fixed_height: config.fixed_height,
            max_attempts: config.max_sample_attempts,
        }
    }

    pub fn choose_strategy(&self, draw: f64, c_best: f64) -> SamplingStrategy {
        if c_best.is_finite() {
            SamplingStrategy::Ellipsoid
        } else if draw > 1.0 - self.alpha {
            SamplingStrategy::GoalLine
        } else if draw <= 1.0 - self.alpha / self.beta {
            SamplingStrategy::Uniform
        } else {
            SamplingStrategy::Ellipsoid
        }
    }

    /// Draw one candidate configuration. `anchor` is the tree node nearest to
    /// the goal. Returns `None` when every attempt landed in an occupied cell
    /// or no volume is known.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        c_best: f64,
        ellipsoid: &InformedEllipsoid,
        anchor: &Point3,
        goal: &Point3,
        checker: &CollisionChecker,
    ) -> Option<Point3> {
        let strategy = self.choose_strategy(rng.gen::<f64>(), c_best);

        if strategy == SamplingStrategy::GoalLine {
            let point = self.pin_height(steer(anchor, goal, self.step_length));
            return (!checker.occupied_at(&point)).then_some(point);
        }

        for _ in 0..self.max_attempts {
            let candidate = match strategy {
                SamplingStrategy::Ellipsoid if c_best.is_finite() => ellipsoid.sample(rng, c_best),
                _ => self.sample_uniform(rng, checker)?,
            };
            let candidate = self.pin_height(candidate);
            if !checker.occupied_at(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    fn sample_uniform<R: Rng + ?Sized>(&self, rng: &mut R, checker: &CollisionChecker) -> Option<Point3> {
        let bounds = checker.volume_bounds()?;
        Some(Point3::new(
            rng.gen_range(bounds.min.x..=bounds.max.x),
            rng.gen_range(bounds.min.y..=bounds.max.y),
            rng.gen_range(bounds.min.z..=bounds.max.z),
        ))
    }

    fn pin_height(&self, mut point: Point3) -> Point3 {
        if let Some(z) = self.fixed_height {
            point.z = z;
        }
        point
    }
}
