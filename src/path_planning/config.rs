//! Planner configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::{PlannerError, PlannerResult};

/// Configuration for the replanning RRT*
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Maximum steer distance per growth iteration [m]
    pub step_length: f64,
    /// Neighbourhood radius multiplier (`step_length * expansion_factor`)
    pub expansion_factor: f64,
    /// Clearance radius for collision queries [m]
    pub clearance: f64,
    /// Extra clearance when classifying reference-trajectory samples [m]
    pub scan_margin: f64,
    /// Wall-clock period of the episode tick [s]
    pub solve_interval_secs: f64,
    /// Spacing between reference-trajectory samples [s]
    pub scan_dt: f64,
    /// Number of reference samples inspected per coordinator tick
    pub scan_window: usize,
    /// Probability of goal-line sampling before a solution exists
    pub sampling_alpha: f64,
    /// Mixing parameter between uniform and ellipsoid sampling
    pub sampling_beta: f64,
    /// Pin every sample to this height
    pub fixed_height: Option<f64>,
    /// Goal-region radius multiplier (`step_length * goal_region_factor`)
    pub goal_region_factor: f64,
    /// Radius around the sub-root searched for a temporary solution [m]
    pub temporary_radius: f64,
    /// Sub-root advance radius multiplier (`step_length * advance_factor`)
    pub advance_factor: f64,
    /// Scan time is held while the robot lags further than this [m]
    pub hold_distance: f64,
    /// Consecutive obstructed samples needed to commit to an episode
    pub min_obstructed_samples: usize,
    /// Copies of the start point appended when an episode starts
    pub start_anchor_copies: usize,
    /// Rejection-sampling attempts before a draw is abandoned
    pub max_sample_attempts: usize,
    /// Iteration cap for one-shot planning
    pub max_iterations: usize,
    /// Optional wall-clock budget for one episode [s]
    pub episode_budget_secs: Option<f64>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            step_length: 0.5,
            expansion_factor: 1.1,
            clearance: 1.0,
            scan_margin: 0.1,
            solve_interval_secs: 1.0,
            scan_dt: 0.5,
            scan_window: 4,
            sampling_alpha: 0.2,
            sampling_beta: 0.5,
            fixed_height: None,
            goal_region_factor: 3.0,
            temporary_radius: 2.0,
            advance_factor: 2.0,
            hold_distance: 2.5,
            min_obstructed_samples: 3,
            start_anchor_copies: 5,
            max_sample_attempts: 100,
            max_iterations: 5000,
            episode_budget_secs: None,
        }
    }
}

impl PlannerConfig {
    /// Parse and validate a JSON configuration. Missing fields take defaults.
    pub fn from_json(json: &str) -> PlannerResult<Self> {
        let config: PlannerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PlannerResult<()> {
        fn positive(name: &str, value: f64) -> PlannerResult<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(PlannerError::InvalidParameter(format!("{} must be positive, got {}", name, value)))
            }
        }

        positive("step_length", self.step_length)?;
        positive("expansion_factor", self.expansion_factor)?;
        positive("solve_interval_secs", self.solve_interval_secs)?;
        positive("scan_dt", self.scan_dt)?;
        positive("goal_region_factor", self.goal_region_factor)?;
        positive("temporary_radius", self.temporary_radius)?;
        positive("advance_factor", self.advance_factor)?;
        positive("hold_distance", self.hold_distance)?;
        positive("sampling_beta", self.sampling_beta)?;
        if !(self.clearance.is_finite() && self.clearance >= 0.0) {
            return Err(PlannerError::InvalidParameter(format!("clearance must be non-negative, got {}", self.clearance)));
        }
        if !(self.scan_margin.is_finite() && self.scan_margin >= 0.0) {
            return Err(PlannerError::InvalidParameter(format!("scan_margin must be non-negative, got {}", self.scan_margin)));
        }
        if !(0.0..=1.0).contains(&self.sampling_alpha) {
            return Err(PlannerError::InvalidParameter(format!(
                "sampling_alpha must lie in [0, 1], got {}",
                self.sampling_alpha
            )));
        }
        if self.scan_window < 2 {
            return Err(PlannerError::InvalidParameter("scan_window must cover at least 2 samples".to_string()));
        }
        if self.min_obstructed_samples == 0 {
            return Err(PlannerError::InvalidParameter("min_obstructed_samples must be at least 1".to_string()));
        }
        if self.max_sample_attempts == 0 {
            return Err(PlannerError::InvalidParameter("max_sample_attempts must be at least 1".to_string()));
        }
        if let Some(budget) = self.episode_budget_secs {
            positive("episode_budget_secs", budget)?;
        }
        Ok(())
    }

    /// Radius of the rewiring neighbourhood
    pub fn neighborhood_radius(&self) -> f64 {
        self.step_length * self.expansion_factor
    }

    /// Radius of the goal region feeding the solution set
    pub fn goal_region_radius(&self) -> f64 {
        self.step_length * self.goal_region_factor
    }

    /// Sub-root distance to the goal that ends an episode
    pub fn convergence_radius(&self) -> f64 {
        self.step_length * self.expansion_factor
    }

    /// Robot distance to the sub-root that triggers an advance
    pub fn advance_radius(&self) -> f64 {
        self.step_length * self.advance_factor
    }

    pub fn solve_interval(&self) -> Duration {
        Duration::from_secs_f64(self.solve_interval_secs)
    }

    pub fn episode_budget(&self) -> Option<Duration> {
        self.episode_budget_secs.map(Duration::from_secs_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = PlannerConfig::default();
        assert_eq!(config.step_length, 0.5);
        assert_eq!(config.min_obstructed_samples, 3);
        assert!(config.validate().is_ok());
        assert!((config.neighborhood_radius() - 0.55).abs() < 1e-12);
        assert!((config.goal_region_radius() - 1.5).abs() < 1e-12);
        assert!((config.advance_radius() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_config_from_partial_json() {
        let config = PlannerConfig::from_json(r#"{ "step_length": 0.25, "fixed_height": 1.2 }"#).unwrap();
        assert_eq!(config.step_length, 0.25);
        assert_eq!(config.fixed_height, Some(1.2));
        assert_eq!(config.scan_window, 4);
    }

    #[test]
    fn test_config_rejects_bad_alpha() {
        let config = PlannerConfig {
            sampling_alpha: 1.5,
            ..PlannerConfig::default()
        };
        assert!(matches!(config.validate(), Err(PlannerError::InvalidParameter(_))));
    }

    #[test]
    fn test_config_rejects_zero_threshold() {
        let err = PlannerConfig::from_json(r#"{ "min_obstructed_samples": 0 }"#).unwrap_err();
        assert!(matches!(err, PlannerError::InvalidParameter(_)));
    }

    #[test]
    fn test_config_malformed_json() {
        let err = PlannerConfig::from_json("{ step_length: }").unwrap_err();
        assert!(matches!(err, PlannerError::Config(_)));
    }
}
