//! Constant-speed piecewise-linear reference trajectory

use crate::common::{distance, PlannerError, PlannerResult, Point3, ReferenceTrajectory};

#[derive(Debug, Clone)]
pub struct PolylineTrajectory {
    waypoints: Vec<Point3>,
    /// Arrival time at each waypoint
    times: Vec<f64>,
    speed: f64,
}

impl PolylineTrajectory {
    pub fn new(waypoints: Vec<Point3>, speed: f64) -> PlannerResult<Self> {
        if !(speed.is_finite() && speed > 0.0) {
            return Err(PlannerError::InvalidParameter(format!("speed must be positive, got {}", speed)));
        }
        let mut points: Vec<Point3> = Vec::with_capacity(waypoints.len());
        for p in waypoints {
            if points.last().map_or(true, |last| distance(last, &p) > f64::EPSILON) {
                points.push(p);
            }
        }
        if points.is_empty() {
            return Err(PlannerError::InvalidParameter("trajectory needs at least one waypoint".to_string()));
        }

        let mut times = vec![0.0];
        for pair in points.windows(2) {
            let last = times.last().copied().unwrap_or(0.0);
            times.push(last + distance(&pair[0], &pair[1]) / speed);
        }
        Ok(PolylineTrajectory {
            waypoints: points,
            times,
            speed,
        })
    }

    pub fn waypoints(&self) -> &[Point3] {
        &self.waypoints
    }

    /// Index of the segment active at `time`, clamped to the last segment
    fn segment(&self, time: f64) -> usize {
        let segments = self.waypoints.len().saturating_sub(1);
        if segments == 0 {
            return 0;
        }
        self.times[1..]
            .iter()
            .position(|&t| time < t)
            .unwrap_or(segments - 1)
    }

    fn segment_velocity(&self, segment: usize) -> Point3 {
        match (self.waypoints.get(segment), self.waypoints.get(segment + 1)) {
            (Some(a), Some(b)) => (b - a).normalize() * self.speed,
            _ => Point3::zeros(),
        }
    }

    pub fn evaluate(&self, time: f64, derivative_order: usize) -> Point3 {
        let time = time.clamp(0.0, self.duration());
        let k = self.segment(time);
        match derivative_order {
            0 => match self.waypoints.get(k + 1) {
                Some(_) => self.waypoints[k] + self.segment_velocity(k) * (time - self.times[k]),
                None => self.waypoints[k],
            },
            1 => self.segment_velocity(k),
            _ => Point3::zeros(),
        }
    }
}

impl ReferenceTrajectory for PolylineTrajectory {
    fn duration(&self) -> f64 {
        self.times.last().copied().unwrap_or(0.0)
    }

    fn sample(&self, time: f64, step: f64, window: usize, derivative_order: usize) -> Vec<Point3> {
        (0..window)
            .map(|i| self.evaluate(time + i as f64 * step, derivative_order))
            .collect()
    }

    fn evaluate_segment_end(&self, time: f64, derivative_order: usize) -> Point3 {
        let k = self.segment(time.clamp(0.0, self.duration()));
        let end = self.times.get(k + 1).copied().unwrap_or_else(|| self.duration());
        match derivative_order {
            0 => self.waypoints.get(k + 1).copied().unwrap_or(self.waypoints[k]),
            _ => self.evaluate(end, derivative_order),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trajectory() -> PolylineTrajectory {
        PolylineTrajectory::new(
            vec![
                Point3::new(0.0, 0.0, 1.0),
                Point3::new(10.0, 0.0, 1.0),
                Point3::new(10.0, 0.0, 1.0),
                Point3::new(10.0, 6.0, 1.0),
            ],
            2.0,
        )
        .unwrap()
    }

    #[test]
    fn test_duration_and_dedup() {
        let traj = trajectory();
        assert_eq!(traj.waypoints().len(), 3);
        assert!((traj.duration() - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_sampling() {
        let traj = trajectory();
        let samples = traj.sample(4.0, 0.5, 4, 0);
        assert_eq!(samples.len(), 4);
        assert!((samples[0] - Point3::new(8.0, 0.0, 1.0)).norm() < 1e-12);
        assert!((samples[3] - Point3::new(10.0, 1.0, 1.0)).norm() < 1e-12);
        let beyond = traj.sample(20.0, 0.5, 2, 0);
        assert_eq!(beyond[1], Point3::new(10.0, 6.0, 1.0));
        let velocity = traj.sample(1.0, 0.5, 1, 1);
        assert!((velocity[0] - Point3::new(2.0, 0.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn test_segment_end() {
        let traj = trajectory();
        assert_eq!(traj.evaluate_segment_end(2.0, 0), Point3::new(10.0, 0.0, 1.0));
        assert_eq!(traj.evaluate_segment_end(6.0, 0), Point3::new(10.0, 6.0, 1.0));
        assert_eq!(traj.evaluate_segment_end(100.0, 0), Point3::new(10.0, 6.0, 1.0));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(PolylineTrajectory::new(vec![Point3::zeros()], 0.0).is_err());
        assert!(PolylineTrajectory::new(Vec::new(), 1.0).is_err());
        let single = PolylineTrajectory::new(vec![Point3::new(1.0, 2.0, 3.0)], 1.0).unwrap();
        assert_eq!(single.duration(), 0.0);
        assert_eq!(single.sample(0.0, 0.5, 2, 0), vec![Point3::new(1.0, 2.0, 3.0); 2]);
    }
}
