//! Planning episodes: the shared search state and the thread growing it

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::common::{distance, NodeId, PlannerError, PlannerResult, Point3};
use crate::path_planning::rrt_star::RrtStar;
use crate::path_planning::sampler::InformedEllipsoid;
use crate::path_planning::solution::SolutionTracker;
use crate::path_planning::telemetry::{EllipsoidSnapshot, PlannerSnapshot};
use crate::path_planning::tree::Tree;

/// Lock the search state, recovering from poisoning. Every critical section
/// leaves the state consistent, so a panic elsewhere does not corrupt it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpisodeOutcome {
    Running,
    /// Sub-root reached the goal
    Converged,
    BudgetExhausted,
    Cancelled,
    /// No distance field attached, so no edge can ever be validated
    Infeasible,
}

/// Everything one episode shares between the planning thread and the
/// coordinator
#[derive(Debug, Clone)]
pub struct SearchState {
    pub tree: Tree,
    pub tracker: SolutionTracker,
    pub sub_root: NodeId,
    pub start: Point3,
    pub goal: Point3,
    pub ellipsoid: InformedEllipsoid,
    /// Latest robot position reported by the coordinator
    pub robot_position: Option<Point3>,
    pub iterations: usize,
    pub outcome: EpisodeOutcome,
    pub(crate) sub_root_retargeted: bool,
}

impl SearchState {
    /// Fresh arena rooted at `start` with the sub-root on the root
    pub fn new(start: Point3, goal: Point3) -> Self {
        let tree = Tree::new(start);
        let sub_root = tree.root();
        SearchState {
            tree,
            tracker: SolutionTracker::new(),
            sub_root,
            start,
            goal,
            ellipsoid: InformedEllipsoid::new(start, goal),
            robot_position: None,
            iterations: 0,
            outcome: EpisodeOutcome::Running,
            sub_root_retargeted: false,
        }
    }

    /// Move the goal placeholder; the informed region follows the new target
    pub fn set_goal(&mut self, goal: Point3) {
        if distance(&goal, &self.goal) < f64::EPSILON {
            return;
        }
        self.goal = goal;
        self.ellipsoid = InformedEllipsoid::new(self.start, goal);
        self.tracker.invalidate_goal();
    }

    /// Step the sub-root to the next node of the published chain. Returns the
    /// new sub-root position.
    pub fn advance_sub_root(&mut self) -> Option<Point3> {
        let next = self.tracker.next_after(self.sub_root)?;
        let position = self.tree.position(next).ok()?;
        self.sub_root = next;
        Some(position)
    }

    pub fn sub_root_position(&self) -> PlannerResult<Point3> {
        self.tree.position(self.sub_root)
    }

    /// True once after the planning thread moved the sub-root to a new chain
    pub fn take_retarget(&mut self) -> bool {
        std::mem::take(&mut self.sub_root_retargeted)
    }

    pub fn snapshot(&self, goal_radius: f64) -> PlannerSnapshot {
        let c_best = self.tracker.best_cost(&self.tree, &self.goal, goal_radius);
        let ellipsoid = c_best.is_finite().then(|| EllipsoidSnapshot {
            center: self.ellipsoid.center(),
            orientation: self.ellipsoid.quaternion(),
            axes: self.ellipsoid.axes(c_best),
        });
        PlannerSnapshot {
            nodes: self.tree.ids().filter_map(|id| self.tree.position(id).ok()).collect(),
            edges: self.tree.edges(self.tracker.published()),
            chain: self.tracker.chain_positions(&self.tree, self.sub_root, &self.goal),
            ellipsoid,
            start: self.start,
            goal: self.goal,
            sub_root: self.sub_root_position().ok(),
            best_cost: c_best.is_finite().then_some(c_best),
            temporary: self.tracker.is_temporary(),
            iterations: self.iterations,
        }
    }
}

/// A running planning thread and the state it grows.
///
/// Dropping the episode requests cancellation and joins the thread, so the
/// state can never be torn down under an in-flight iteration.
pub struct PlanningEpisode {
    state: Arc<Mutex<SearchState>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<EpisodeOutcome>>,
}

impl PlanningEpisode {
    /// Start an episode sampling from the planning thread's own `thread_rng`
    pub fn spawn(planner: Arc<RrtStar>, start: Point3, goal: Point3) -> PlannerResult<Self> {
        Self::spawn_with(planner, start, goal, rand::thread_rng)
    }

    /// Deterministic variant for tests and replays
    pub fn spawn_seeded(planner: Arc<RrtStar>, start: Point3, goal: Point3, seed: u64) -> PlannerResult<Self> {
        Self::spawn_with(planner, start, goal, move || StdRng::seed_from_u64(seed))
    }

    fn spawn_with<R, F>(planner: Arc<RrtStar>, start: Point3, goal: Point3, make_rng: F) -> PlannerResult<Self>
    where
        R: Rng,
        F: FnOnce() -> R + Send + 'static,
    {
        let state = Arc::new(Mutex::new(SearchState::new(start, goal)));
        let stop = Arc::new(AtomicBool::new(false));

        let thread_state = Arc::clone(&state);
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("rrt-episode".to_string())
            .spawn(move || {
                let mut rng = make_rng();
                planner.run(&thread_state, &thread_stop, &mut rng)
            })?;

        debug!(?start, ?goal, "episode thread spawned");
        Ok(PlanningEpisode {
            state,
            stop,
            handle: Some(handle),
        })
    }

    /// The planning thread is still growing the tree
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Run `f` inside one critical section
    pub fn with_state<T>(&self, f: impl FnOnce(&mut SearchState) -> T) -> T {
        let mut state = lock(&self.state);
        f(&mut state)
    }

    pub fn outcome(&self) -> EpisodeOutcome {
        self.with_state(|s| s.outcome)
    }

    pub fn set_robot_position(&self, position: Point3) {
        self.with_state(|s| s.robot_position = Some(position));
    }

    pub fn retarget(&self, goal: Point3) {
        self.with_state(|s| s.set_goal(goal));
    }

    /// Request cancellation, wait for the thread and return how it ended
    pub fn finish(mut self) -> PlannerResult<EpisodeOutcome> {
        self.stop.store(true, Ordering::Release);
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| PlannerError::WorkerPanicked),
            None => Ok(self.outcome()),
        }
    }
}

impl Drop for PlanningEpisode {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.stop.store(true, Ordering::Release);
            if handle.join().is_err() {
                warn!("planning thread panicked during teardown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Bounds3D, CellIndex, DistanceField};
    use crate::path_planning::collision::CollisionChecker;
    use crate::path_planning::config::PlannerConfig;
    use std::time::{Duration, Instant};

    struct OpenField;

    impl DistanceField for OpenField {
        fn near_obstacle(&self, _point: &Point3, _radius: f64) -> bool {
            false
        }
        fn occupied(&self, _cell: &CellIndex) -> bool {
            false
        }
        fn index_of(&self, point: &Point3) -> CellIndex {
            CellIndex::new(point.x.floor() as i32, point.y.floor() as i32, point.z.floor() as i32)
        }
        fn volume_bounds(&self) -> Bounds3D {
            Bounds3D::new(Point3::new(-1.0, -3.0, 0.0), Point3::new(8.0, 3.0, 2.0))
        }
        fn volume_center(&self) -> CellIndex {
            CellIndex::new(3, 0, 1)
        }
        fn inside_volume(&self, points: &[Point3]) -> bool {
            points.iter().all(|p| self.volume_bounds().contains(p))
        }
    }

    fn planner(config: PlannerConfig) -> Arc<RrtStar> {
        let checker = CollisionChecker::with_field(Arc::new(OpenField), config.clearance);
        Arc::new(RrtStar::new(config, checker).unwrap())
    }

    #[test]
    fn test_new_state_initializes_episode() {
        let start = Point3::new(0.0, 0.0, 1.0);
        let goal = Point3::new(5.0, 0.0, 1.0);
        let state = SearchState::new(start, goal);
        assert_eq!(state.tree.len(), 1);
        assert_eq!(state.sub_root, state.tree.root());
        assert_eq!(state.sub_root_position().unwrap(), start);
        assert_eq!(state.outcome, EpisodeOutcome::Running);
        assert!(state.snapshot(1.5).ellipsoid.is_none());
    }

    #[test]
    fn test_set_goal_rebuilds_ellipsoid() {
        let mut state = SearchState::new(Point3::new(0.0, 0.0, 1.0), Point3::new(5.0, 0.0, 1.0));
        state.set_goal(Point3::new(0.0, 5.0, 1.0));
        assert_eq!(state.ellipsoid.target, Point3::new(0.0, 5.0, 1.0));
        assert!((state.ellipsoid.c_min - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_advance_follows_published_chain() {
        let mut state = SearchState::new(Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 0.0, 0.0));
        let a = state.tree.insert(state.tree.root(), Point3::new(1.0, 0.0, 0.0)).unwrap();
        let b = state.tree.insert(a, Point3::new(1.8, 0.0, 0.0)).unwrap();
        state.tracker.consider(&state.tree, b, &state.goal, 1.5).unwrap();
        state.tracker.update(&state.tree, state.sub_root, &state.goal, 1.5, 2.0).unwrap();

        assert_eq!(state.advance_sub_root(), Some(Point3::new(1.0, 0.0, 0.0)));
        assert_eq!(state.sub_root, a);
        assert_eq!(state.advance_sub_root(), Some(Point3::new(1.8, 0.0, 0.0)));
        assert_eq!(state.advance_sub_root(), None);
        assert!(!state.take_retarget());
    }

    #[test]
    fn test_episode_converges_in_open_space() {
        let config = PlannerConfig {
            clearance: 0.3,
            fixed_height: Some(1.0),
            solve_interval_secs: 0.01,
            ..PlannerConfig::default()
        };
        let episode = PlanningEpisode::spawn_seeded(
            planner(config),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(3.0, 0.0, 1.0),
            17,
        )
        .unwrap();

        // Walk the robot along the chain until the planning thread stops
        let deadline = Instant::now() + Duration::from_secs(20);
        while episode.is_running() && Instant::now() < deadline {
            episode.with_state(|s| {
                if let Some(p) = s.advance_sub_root() {
                    s.robot_position = Some(p);
                }
            });
            thread::sleep(Duration::from_millis(5));
        }
        let outcome = episode.finish().unwrap();
        assert_eq!(outcome, EpisodeOutcome::Converged);
    }

    #[test]
    fn test_finish_cancels_running_episode() {
        let config = PlannerConfig {
            clearance: 0.3,
            ..PlannerConfig::default()
        };
        let episode = PlanningEpisode::spawn(
            planner(config),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(7.0, 2.0, 1.0),
        )
        .unwrap();
        let outcome = episode.finish().unwrap();
        assert!(matches!(outcome, EpisodeOutcome::Cancelled | EpisodeOutcome::Converged));
    }
}
