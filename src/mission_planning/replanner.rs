//! Replanning coordinator
//!
//! Scans the reference trajectory ahead of the robot, runs a planning
//! episode across every obstructed stretch long enough to matter, and
//! splices the planned waypoints into the output sink. The coordinator never
//! waits on the planning thread; it only takes short looks at the shared
//! search state.

use std::sync::Arc;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::common::{
    distance, midpoint, DistanceField, PlannerError, PlannerResult, Point3, ReferenceTrajectory, ScanPoint,
    TrajectorySink,
};
use crate::mission_planning::state_machine::{ReplanEvent, ReplanState, StateMachine, Transition};
use crate::path_planning::{CollisionChecker, EpisodeOutcome, PlannerConfig, PlannerSnapshot, PlanningEpisode, RrtStar};

const EMIT_TOLERANCE: f64 = 1e-6;

/// Reference sample tagged with its trajectory time
#[derive(Debug, Clone, Copy, PartialEq)]
struct TimedSample {
    time: f64,
    scan: ScanPoint,
}

/// Goal of the current episode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpisodeTarget {
    pub time: f64,
    pub position: Point3,
    /// False while the end of the obstruction has not been seen yet
    pub confirmed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplannerSnapshot {
    pub state: ReplanState,
    pub scan_time: f64,
    pub scan_points: Vec<ScanPoint>,
    pub start: Option<Point3>,
    pub target: Option<EpisodeTarget>,
    pub planner: Option<PlannerSnapshot>,
}

pub struct Replanner<T, S> {
    config: PlannerConfig,
    planner: Arc<RrtStar>,
    checker: CollisionChecker,
    reference: T,
    sink: S,
    machine: StateMachine,
    episode: Option<PlanningEpisode>,
    seed: Option<u64>,
    /// Reference time of the first sample of the next scan window
    scan_time: f64,
    /// Latest reference time already forwarded to the sink
    emitted_until: f64,
    /// Obstructions up to this reference time were judged too short
    dismissed_until: f64,
    start: Option<(f64, Point3)>,
    obstructed: Vec<TimedSample>,
    target: Option<EpisodeTarget>,
    scan_log: Vec<ScanPoint>,
    last_emitted: Option<Point3>,
    last_infeasibility: Option<PlannerError>,
}

impl<T: ReferenceTrajectory, S: TrajectorySink> Replanner<T, S> {
    pub fn new(
        config: PlannerConfig,
        field: Option<Arc<dyn DistanceField>>,
        reference: T,
        sink: S,
    ) -> PlannerResult<Self> {
        let checker = CollisionChecker::new(config.clearance);
        checker.set_field(field);
        let planner = Arc::new(RrtStar::new(config.clone(), checker.clone())?);

        Ok(Replanner {
            config,
            planner,
            checker,
            reference,
            sink,
            machine: StateMachine::new(),
            episode: None,
            seed: None,
            scan_time: 0.0,
            emitted_until: f64::NEG_INFINITY,
            dismissed_until: f64::NEG_INFINITY,
            start: None,
            obstructed: Vec::new(),
            target: None,
            scan_log: Vec::new(),
            last_emitted: None,
            last_infeasibility: None,
        })
    }

    /// Seed every planning episode deterministically
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn state(&self) -> ReplanState {
        self.machine.current()
    }

    pub fn history(&self) -> &[Transition] {
        self.machine.history()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(mut self) -> S {
        if let Some(episode) = self.episode.take() {
            if let Err(e) = episode.finish() {
                warn!(error = %e, "episode teardown failed");
            }
        }
        self.sink
    }

    /// Shared collision checker; swap its field on map updates
    pub fn checker(&self) -> &CollisionChecker {
        &self.checker
    }

    pub fn scan_time(&self) -> f64 {
        self.scan_time
    }

    /// Classified samples of the latest scan window
    pub fn scan_points(&self) -> &[ScanPoint] {
        &self.scan_log
    }

    pub fn target(&self) -> Option<EpisodeTarget> {
        self.target
    }

    /// Most recent reason an obstruction was given up without a planned detour
    pub fn last_infeasibility(&self) -> Option<&PlannerError> {
        self.last_infeasibility.as_ref()
    }

    pub fn episode_running(&self) -> bool {
        self.episode.as_ref().map_or(false, PlanningEpisode::is_running)
    }

    /// One coordinator step at the current robot position
    pub fn tick(&mut self, robot: Point3) -> PlannerResult<ReplanState> {
        let samples = self
            .reference
            .sample(self.scan_time, self.config.scan_dt, self.config.scan_window, 0);
        self.scan_log = self
            .checker
            .classify(&samples, self.config.clearance + self.config.scan_margin);
        let holding = samples
            .first()
            .map_or(false, |p| distance(p, &robot) > self.config.hold_distance);

        if !self.checker.has_field() {
            self.report_missing_field()?;
            return Ok(self.machine.current());
        }
        let in_volume = self.checker.inside_volume(&samples);

        match self.machine.current() {
            ReplanState::Idle | ReplanState::SearchingStart => {
                if holding {
                    debug!(scan_time = self.scan_time, "robot lagging behind the scan, holding");
                } else if !in_volume {
                    debug!(scan_time = self.scan_time, "scan window leaves the mapped volume, waiting");
                } else {
                    self.scan(robot)?;
                }
            }
            ReplanState::Planning => {
                self.follow(robot)?;
                let provisional = self.target.map_or(false, |t| !t.confirmed);
                if self.machine.current() == ReplanState::Planning && provisional {
                    self.machine.process(ReplanEvent::TargetProvisional)?;
                }
            }
            ReplanState::SearchingEnd => {
                self.follow(robot)?;
                if self.machine.current() == ReplanState::SearchingEnd && in_volume {
                    self.scan(robot)?;
                }
            }
            ReplanState::Finishing => {}
        }

        if self.machine.current() == ReplanState::Finishing {
            self.finish_episode()?;
        }
        Ok(self.machine.current())
    }

    /// Walk consecutive sample pairs of the latest window
    fn scan(&mut self, robot: Point3) -> PlannerResult<()> {
        let dt = self.config.scan_dt;
        let timed: Vec<TimedSample> = self
            .scan_log
            .iter()
            .enumerate()
            .map(|(i, scan)| TimedSample {
                time: self.scan_time + i as f64 * dt,
                scan: *scan,
            })
            .collect();

        let mut consumed = 0usize;
        for (prev, next) in timed.into_iter().tuple_windows() {
            let keep_scanning = match self.machine.current() {
                ReplanState::Idle => self.scan_idle(prev, next, robot)?,
                ReplanState::SearchingStart => self.scan_start(next)?,
                ReplanState::SearchingEnd => self.scan_end(next)?,
                _ => false,
            };
            consumed += 1;
            if !keep_scanning {
                break;
            }
        }

        let duration = self.reference.duration();
        self.scan_time = (self.scan_time + consumed as f64 * dt).min(duration);
        let at_end = self.scan_time >= duration;

        match self.machine.current() {
            ReplanState::SearchingStart if self.obstructed.len() >= self.config.min_obstructed_samples => {
                let last = self.obstructed.last().map_or(self.scan_time, |s| s.time);
                let target = EpisodeTarget {
                    time: last,
                    position: self.reference.evaluate_segment_end(last, 0),
                    confirmed: false,
                };
                self.commit(target)?;
            }
            ReplanState::SearchingStart if at_end => self.dismiss()?,
            ReplanState::SearchingEnd if at_end => {
                let target = EpisodeTarget {
                    time: duration,
                    position: self.reference.evaluate_segment_end(duration, 0),
                    confirmed: true,
                };
                self.retarget(target)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn scan_idle(&mut self, prev: TimedSample, next: TimedSample, robot: Point3) -> PlannerResult<bool> {
        if !prev.scan.obstructed && prev.time > self.emitted_until {
            self.emit(prev.scan.position);
            self.emitted_until = prev.time;
        }
        if next.scan.obstructed && next.time > self.dismissed_until {
            let start = if prev.scan.obstructed {
                self.last_emitted.unwrap_or(robot)
            } else {
                prev.scan.position
            };
            info!(start = ?start, time = next.time, "obstruction ahead on reference trajectory");
            self.start = Some((prev.time, start));
            self.obstructed = vec![next];
            self.machine.process(ReplanEvent::ObstructionAhead)?;
        }
        Ok(true)
    }

    fn scan_start(&mut self, next: TimedSample) -> PlannerResult<bool> {
        if next.scan.obstructed {
            self.obstructed.push(next);
            return Ok(true);
        }
        if self.obstructed.len() >= self.config.min_obstructed_samples {
            self.commit(EpisodeTarget {
                time: next.time,
                position: next.scan.position,
                confirmed: true,
            })?;
            return Ok(false);
        }
        self.dismiss()?;
        Ok(true)
    }

    fn scan_end(&mut self, next: TimedSample) -> PlannerResult<bool> {
        if next.scan.obstructed {
            self.obstructed.push(next);
            return Ok(true);
        }
        self.retarget(EpisodeTarget {
            time: next.time,
            position: next.scan.position,
            confirmed: true,
        })?;
        Ok(false)
    }

    /// Too few obstructed samples: remember them and go back to idle
    fn dismiss(&mut self) -> PlannerResult<()> {
        let observed = self.obstructed.len();
        let required = self.config.min_obstructed_samples;
        self.dismiss_obstruction();
        let err = PlannerError::NotEnoughObstruction { observed, required };
        warn!(observed, required, "{}", err);
        self.last_infeasibility = Some(err);
        self.obstructed.clear();
        self.start = None;
        self.machine.process(ReplanEvent::NotEnoughObstruction)?;
        Ok(())
    }

    /// Anchor the output at the start and spawn the planning thread
    fn commit(&mut self, target: EpisodeTarget) -> PlannerResult<()> {
        let (_, start) = self
            .start
            .ok_or_else(|| PlannerError::InvalidParameter("episode committed without a start point".to_string()))?;
        if self.episode.is_some() {
            return Err(PlannerError::EpisodeActive);
        }

        for _ in 0..self.config.start_anchor_copies {
            self.sink.append_waypoint(start);
        }
        self.last_emitted = Some(start);

        let planner = Arc::clone(&self.planner);
        let episode = match self.seed {
            Some(seed) => PlanningEpisode::spawn_seeded(planner, start, target.position, seed)?,
            None => PlanningEpisode::spawn(planner, start, target.position)?,
        };
        self.episode = Some(episode);
        self.target = Some(target);
        info!(
            start = ?start,
            target = ?target.position,
            confirmed = target.confirmed,
            obstructed = self.obstructed.len(),
            "planning episode committed"
        );
        self.machine.process(ReplanEvent::Committed)?;
        Ok(())
    }

    /// The real end of the obstruction was found
    fn retarget(&mut self, target: EpisodeTarget) -> PlannerResult<()> {
        if let Some(episode) = &self.episode {
            episode.retarget(target.position);
        }
        info!(target = ?target.position, "episode target confirmed");
        self.target = Some(target);
        self.machine.process(ReplanEvent::EndFound)?;
        Ok(())
    }

    /// Track the robot along the published chain while the episode runs
    fn follow(&mut self, robot: Point3) -> PlannerResult<()> {
        let Some(episode) = &self.episode else {
            return Ok(());
        };
        episode.set_robot_position(robot);
        let (retargeted, sub_root) = episode.with_state(|s| (s.take_retarget(), s.sub_root_position().ok()));
        let running = episode.is_running();

        if let Some(sub_root) = sub_root {
            if retargeted {
                self.emit_bridge(sub_root);
            }
            if distance(&robot, &sub_root) < self.config.advance_radius() {
                self.emit_bridge(sub_root);
                if let Some(episode) = &self.episode {
                    if let Some(next) = episode.with_state(|s| s.advance_sub_root()) {
                        debug!(sub_root = ?next, "sub-root advanced");
                    }
                }
            }
        }

        if !running {
            let outcome = self.episode.as_ref().map_or(EpisodeOutcome::Cancelled, PlanningEpisode::outcome);
            match outcome {
                EpisodeOutcome::Cancelled => self.abandon_episode()?,
                EpisodeOutcome::Infeasible => self.report_missing_field()?,
                _ => {
                    self.machine.process(ReplanEvent::EpisodeEnded)?;
                }
            }
        }
        Ok(())
    }

    /// Splice the rest of the chain, tear the episode down and resume scanning
    fn finish_episode(&mut self) -> PlannerResult<()> {
        let Some(episode) = self.episode.take() else {
            self.machine.process(ReplanEvent::Finished)?;
            return Ok(());
        };
        let (chain, temporary, goal, iterations) = episode.with_state(|s| {
            (
                s.tracker.chain_positions(&s.tree, s.sub_root, &s.goal),
                s.tracker.is_temporary(),
                s.goal,
                s.iterations,
            )
        });
        let outcome = episode.finish().unwrap_or_else(|e| {
            warn!(error = %e, "planning thread did not shut down cleanly");
            EpisodeOutcome::Cancelled
        });

        let spliced = matches!(outcome, EpisodeOutcome::Converged | EpisodeOutcome::BudgetExhausted) && !chain.is_empty();
        if !spliced {
            warn!(?outcome, "episode ended without a chain, giving the obstruction up");
            self.dismiss_obstruction();
            if let Some((time, _)) = self.start {
                self.scan_time = time;
            }
        } else if temporary && outcome != EpisodeOutcome::Converged {
            // Out of budget on a temporary chain: follow it, then give the obstruction up
            for point in &chain {
                self.emit(*point);
            }
            let err = PlannerError::NoPathFound { iterations };
            warn!(iterations, end = ?chain.last(), "{}", err);
            self.last_infeasibility = Some(err);
            self.dismiss_obstruction();
            self.resume_after_target(false);
        } else {
            let nodes = if temporary { &chain[..] } else { &chain[..chain.len() - 1] };
            for point in nodes {
                self.emit(*point);
            }
            self.emit_bridge(goal);
            self.resume_after_target(true);
            info!(?outcome, goal = ?goal, "episode finished, resuming scan");
        }

        self.start = None;
        self.obstructed.clear();
        self.target = None;
        self.machine.process(ReplanEvent::Finished)?;
        Ok(())
    }

    /// Obstructed samples seen so far never trigger another episode
    fn dismiss_obstruction(&mut self) {
        if let Some(last) = self.obstructed.last() {
            self.dismissed_until = self.dismissed_until.max(last.time);
        }
    }

    /// Resume scanning just before the target; `reached` marks the target as
    /// already forwarded
    fn resume_after_target(&mut self, reached: bool) {
        if let Some(target) = self.target {
            let resume = if target.confirmed { target.time - self.config.scan_dt } else { target.time };
            self.scan_time = resume.max(0.0);
            if reached {
                self.emitted_until = self.emitted_until.max(target.time);
            }
        }
    }

    /// Without a field nothing can be classified: drop any episode and stay idle
    fn report_missing_field(&mut self) -> PlannerResult<()> {
        if !matches!(self.last_infeasibility, Some(PlannerError::MissingDistanceField)) {
            warn!("distance field unavailable, replanning suspended");
            self.last_infeasibility = Some(PlannerError::MissingDistanceField);
        }
        if self.episode.is_some() || self.machine.current() != ReplanState::Idle {
            self.abandon_episode()?;
        }
        Ok(())
    }

    fn abandon_episode(&mut self) -> PlannerResult<()> {
        if let Some(episode) = self.episode.take() {
            let outcome = episode.finish()?;
            debug!(?outcome, "episode abandoned");
        }
        if let Some((time, _)) = self.start {
            self.scan_time = time;
        }
        self.start = None;
        self.obstructed.clear();
        self.target = None;
        if self.machine.can_process(ReplanEvent::Cancelled) {
            self.machine.process(ReplanEvent::Cancelled)?;
        }
        Ok(())
    }

    /// Stop any running episode and return to idle
    pub fn shutdown(&mut self) -> PlannerResult<()> {
        match self.machine.current() {
            ReplanState::Finishing => self.finish_episode(),
            _ => self.abandon_episode(),
        }
    }

    pub fn snapshot(&self) -> ReplannerSnapshot {
        let goal_radius = self.config.goal_region_radius();
        ReplannerSnapshot {
            state: self.machine.current(),
            scan_time: self.scan_time,
            scan_points: self.scan_log.clone(),
            start: self.start.map(|(_, p)| p),
            target: self.target,
            planner: self
                .episode
                .as_ref()
                .map(|episode| episode.with_state(|s| s.snapshot(goal_radius))),
        }
    }

    fn emit(&mut self, point: Point3) {
        if self
            .last_emitted
            .map_or(true, |last| distance(&last, &point) > EMIT_TOLERANCE)
        {
            self.sink.append_waypoint(point);
            self.last_emitted = Some(point);
        }
    }

    /// Midpoint from the last emitted waypoint, then `point`
    fn emit_bridge(&mut self, point: Point3) {
        if let Some(last) = self.last_emitted {
            if distance(&last, &point) > EMIT_TOLERANCE {
                self.emit(midpoint(&last, &point));
            }
        }
        self.emit(point);
    }
}
