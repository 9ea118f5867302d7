//! Anytime RRT* growth and rewiring
//!
//! One `grow` call is one RRT* iteration. The search state lives behind a
//! single mutex shared with the coordinator; it is locked only for short
//! tree reads and writes and never while the distance field is queried.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Instant;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::common::{distance, NodeId, Path3D, PathPlanner, PlannerError, PlannerResult, Point3};
use crate::path_planning::collision::CollisionChecker;
use crate::path_planning::config::PlannerConfig;
use crate::path_planning::episode::{lock, EpisodeOutcome, SearchState};
use crate::path_planning::sampler::Sampler;
use crate::path_planning::solution::MergeOutcome;
use crate::path_planning::tree::steer;

const MIN_STEER_DISTANCE: f64 = 1e-9;
const SECONDARY_CHAIN_TAIL: usize = 3;

/// What a single growth iteration did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GrowthStep {
    Inserted {
        node: NodeId,
        parent: NodeId,
        rewired: usize,
        in_goal_region: bool,
    },
    /// Steer edge hit an obstacle
    Collision,
    /// No sample could be drawn
    SampleRejected,
    /// Sample coincided with an existing node
    Degenerate,
}

pub struct RrtStar {
    config: PlannerConfig,
    checker: CollisionChecker,
    sampler: Sampler,
}

impl RrtStar {
    pub fn new(config: PlannerConfig, checker: CollisionChecker) -> PlannerResult<Self> {
        config.validate()?;
        let sampler = Sampler::from_config(&config);
        Ok(RrtStar {
            config,
            checker,
            sampler,
        })
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn checker(&self) -> &CollisionChecker {
        &self.checker
    }

    /// One RRT* iteration against the shared search state
    pub fn grow<R: Rng + ?Sized>(&self, state: &Mutex<SearchState>, rng: &mut R) -> PlannerResult<GrowthStep> {
        let goal_radius = self.config.goal_region_radius();

        let (c_best, ellipsoid, anchor, goal) = {
            let s = lock(state);
            let c_best = s.tracker.best_cost(&s.tree, &s.goal, goal_radius);
            let anchor = s.tree.position(s.tree.nearest(&s.goal))?;
            (c_best, s.ellipsoid.clone(), anchor, s.goal)
        };

        let Some(sample) = self
            .sampler
            .sample(rng, c_best, &ellipsoid, &anchor, &goal, &self.checker)
        else {
            return Ok(GrowthStep::SampleRejected);
        };

        let (nearest, nearest_position, nearest_cost) = {
            let s = lock(state);
            let id = s.tree.nearest(&sample);
            let node = s.tree.node(id)?;
            (id, node.position, node.cost)
        };

        let candidate = steer(&nearest_position, &sample, self.config.step_length);
        if distance(&candidate, &nearest_position) < MIN_STEER_DISTANCE {
            return Ok(GrowthStep::Degenerate);
        }
        if self.checker.segment_in_collision(&nearest_position, &candidate) {
            return Ok(GrowthStep::Collision);
        }

        self.connect(state, (nearest, nearest_position, nearest_cost), candidate)
    }

    /// Parent choice, insertion and rewiring of `candidate`. The segment from
    /// `nearest` to `candidate` must already be known to be free.
    fn connect(
        &self,
        state: &Mutex<SearchState>,
        (nearest, nearest_position, nearest_cost): (NodeId, Point3, f64),
        candidate: Point3,
    ) -> PlannerResult<GrowthStep> {
        let goal_radius = self.config.goal_region_radius();
        let (neighbours, goal): (Vec<(NodeId, Point3, f64)>, Point3) = {
            let s = lock(state);
            let neighbours = s
                .tree
                .within_radius(&candidate, self.config.neighborhood_radius())
                .into_iter()
                .filter(|&id| id != nearest)
                .filter_map(|id| s.tree.node(id).ok().map(|n| (id, n.position, n.cost)))
                .collect();
            (neighbours, s.goal)
        };

        // Parent choice; the nearest node is already known to be reachable
        let mut parent = nearest;
        let mut new_cost = nearest_cost + distance(&nearest_position, &candidate);
        for &(id, position, cost) in &neighbours {
            let through = cost + distance(&position, &candidate);
            if through < new_cost && !self.checker.segment_in_collision(&position, &candidate) {
                parent = id;
                new_cost = through;
            }
        }

        // The nearest node is a rewire candidate too once it is not the parent
        let rewire: Vec<NodeId> = neighbours
            .iter()
            .chain(std::iter::once(&(nearest, nearest_position, nearest_cost)))
            .filter(|&&(id, _, _)| id != parent)
            .filter(|&&(_, position, cost)| new_cost + distance(&candidate, &position) < cost)
            .filter(|&&(_, position, _)| !self.checker.segment_in_collision(&candidate, &position))
            .map(|&(id, _, _)| id)
            .collect();

        let reaches_goal =
            distance(&candidate, &goal) < goal_radius && !self.checker.segment_in_collision(&candidate, &goal);

        let mut s = lock(state);
        let node = s.tree.insert(parent, candidate)?;
        let mut rewired = 0;
        for id in rewire {
            let new_cost = s.tree.cost(node)? + distance(&candidate, &s.tree.position(id)?);
            if new_cost < s.tree.cost(id)? && !s.tree.is_ancestor(id, node) {
                s.tree.reparent(id, node)?;
                rewired += 1;
            }
        }
        let goal = s.goal;
        let SearchState { tree, tracker, .. } = &mut *s;
        let in_goal_region = reaches_goal && tracker.consider(tree, node, &goal, goal_radius)?;

        Ok(GrowthStep::Inserted {
            node,
            parent,
            rewired,
            in_goal_region,
        })
    }

    /// Episode tick: merge the best chain into the published one
    pub fn tick(&self, state: &mut SearchState) -> Option<MergeOutcome> {
        let SearchState {
            tree,
            tracker,
            sub_root,
            goal,
            ..
        } = state;
        let result = tracker.update(
            tree,
            *sub_root,
            goal,
            self.config.goal_region_radius(),
            self.config.temporary_radius,
        );
        match result {
            Ok(outcome) => {
                match outcome {
                    MergeOutcome::Replaced { sub_root: retarget }
                    | MergeOutcome::Published {
                        sub_root: Some(retarget),
                    }
                    | MergeOutcome::Recomputed {
                        sub_root: Some(retarget),
                    } => {
                        state.sub_root = retarget;
                        state.sub_root_retargeted = true;
                    }
                    _ => {}
                }
                debug!(
                    ?outcome,
                    nodes = state.tree.len(),
                    chain = state.tracker.published().len(),
                    "episode tick"
                );
                Some(outcome)
            }
            Err(PlannerError::InvalidChain) => {
                warn!("published chain unreachable from root, recomputing");
                state.tracker.clear_published();
                None
            }
            Err(e) => {
                warn!(error = %e, "episode tick failed");
                None
            }
        }
    }

    /// Sub-root reached the goal. Primary rule: within the convergence
    /// radius. Secondary rule: within two steps and among the last published
    /// nodes. The sub-root also converges once it is the last node of a true
    /// solution. Every rule requires a free segment to the goal.
    pub fn converged(&self, state: &Mutex<SearchState>) -> bool {
        let (sub_root_position, goal, near_end, chain_end) = {
            let s = lock(state);
            let Ok(position) = s.tree.position(s.sub_root) else {
                return false;
            };
            (
                position,
                s.goal,
                s.tracker.is_near_chain_end(s.sub_root, SECONDARY_CHAIN_TAIL),
                s.tracker.is_chain_end(s.sub_root),
            )
        };
        let d = distance(&sub_root_position, &goal);
        let primary = d < self.config.convergence_radius();
        let secondary = d < 2.0 * self.config.step_length && near_end;
        (primary || secondary || chain_end) && !self.checker.segment_in_collision(&sub_root_position, &goal)
    }

    /// Growth loop of one episode; returns when converged, out of budget or
    /// cancelled through `stop`
    pub fn run<R: Rng + ?Sized>(&self, state: &Mutex<SearchState>, stop: &AtomicBool, rng: &mut R) -> EpisodeOutcome {
        let started = Instant::now();
        let mut last_tick = Instant::now();
        let budget = self.config.episode_budget();
        let interval = self.config.solve_interval();
        {
            let s = lock(state);
            info!(start = ?s.start, goal = ?s.goal, "planning episode started");
        }

        let outcome = loop {
            if stop.load(Ordering::Acquire) {
                break EpisodeOutcome::Cancelled;
            }
            if !self.checker.has_field() {
                warn!("no distance field attached, episode is infeasible");
                break EpisodeOutcome::Infeasible;
            }
            if budget.map_or(false, |b| started.elapsed() >= b) {
                break EpisodeOutcome::BudgetExhausted;
            }
            if self.converged(state) {
                break EpisodeOutcome::Converged;
            }

            let step = match self.grow(state, rng) {
                Ok(step) => step,
                Err(e) => {
                    warn!(error = %e, "growth iteration failed");
                    GrowthStep::SampleRejected
                }
            };

            let mut s = lock(state);
            s.iterations += 1;
            let robot_close = match (s.robot_position, s.tree.position(s.sub_root)) {
                (Some(robot), Ok(sub_root)) => distance(&robot, &sub_root) < self.config.advance_radius(),
                _ => false,
            };
            if last_tick.elapsed() >= interval || robot_close {
                self.tick(&mut s);
                last_tick = Instant::now();
            }
            drop(s);

            if step == GrowthStep::SampleRejected {
                thread::yield_now();
            }
        };

        let mut s = lock(state);
        self.tick(&mut s);
        s.outcome = outcome;
        info!(
            ?outcome,
            iterations = s.iterations,
            nodes = s.tree.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "planning episode finished"
        );
        outcome
    }

    /// Bounded one-shot search that stops at the first node reaching the goal
    /// region with a free segment to the goal
    pub fn plan_with_rng<R: Rng + ?Sized>(&self, start: Point3, goal: Point3, rng: &mut R) -> PlannerResult<Path3D> {
        let state = Mutex::new(SearchState::new(start, goal));

        for i in 0..self.config.max_iterations {
            let step = self.grow(&state, rng)?;
            let GrowthStep::Inserted {
                node,
                in_goal_region: true,
                ..
            } = step
            else {
                continue;
            };
            let s = lock(&state);
            let mut path = Path3D::new();
            for id in s.tree.path_from_root(node)? {
                path.push(s.tree.position(id)?);
            }
            path.push(goal);
            debug!(iterations = i + 1, nodes = s.tree.len(), length = path.total_length(), "path found");
            return Ok(path);
        }

        Err(PlannerError::NoPathFound {
            iterations: self.config.max_iterations,
        })
    }
}

impl PathPlanner for RrtStar {
    fn plan(&self, start: Point3, goal: Point3) -> Result<Path3D, PlannerError> {
        self.plan_with_rng(start, goal, &mut rand::thread_rng())
    }
}
