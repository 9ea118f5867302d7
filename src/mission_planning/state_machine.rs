/*!
 * State machine for the replanning coordinator
 *
 * States and events are closed enums; the allowed transitions live in a
 * table keyed by `(state, event)`. Every accepted transition is recorded so
 * callers can inspect how the coordinator got where it is.
 */

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::{PlannerError, PlannerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplanState {
    /// No obstruction ahead
    Idle,
    /// Obstruction found, counting consecutive obstructed samples
    SearchingStart,
    /// Episode running
    Planning,
    /// Episode running while the real end of the obstruction is searched
    SearchingEnd,
    /// Splicing the final waypoints and tearing the episode down
    Finishing,
}

impl fmt::Display for ReplanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplanState::Idle => "IDLE",
            ReplanState::SearchingStart => "SEARCHING_START",
            ReplanState::Planning => "PLANNING",
            ReplanState::SearchingEnd => "SEARCHING_END",
            ReplanState::Finishing => "FINISHING",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplanEvent {
    ObstructionAhead,
    NotEnoughObstruction,
    Committed,
    TargetProvisional,
    EndFound,
    EpisodeEnded,
    Cancelled,
    Finished,
}

impl fmt::Display for ReplanEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One accepted transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: ReplanState,
    pub event: ReplanEvent,
    pub to: ReplanState,
}

pub struct StateMachine {
    current: ReplanState,
    transitions: HashMap<(ReplanState, ReplanEvent), ReplanState>,
    history: Vec<Transition>,
}

impl StateMachine {
    pub fn new() -> Self {
        use ReplanEvent::*;
        use ReplanState::*;

        let table = [
            (Idle, ObstructionAhead, SearchingStart),
            (SearchingStart, NotEnoughObstruction, Idle),
            (SearchingStart, Committed, Planning),
            (SearchingStart, Cancelled, Idle),
            (Planning, TargetProvisional, SearchingEnd),
            (SearchingEnd, EndFound, Planning),
            (Planning, EpisodeEnded, Finishing),
            (SearchingEnd, EpisodeEnded, Finishing),
            (Planning, Cancelled, Idle),
            (SearchingEnd, Cancelled, Idle),
            (Finishing, Finished, Idle),
        ];

        StateMachine {
            current: Idle,
            transitions: table
                .into_iter()
                .map(|(from, event, to)| ((from, event), to))
                .collect(),
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> ReplanState {
        self.current
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// True if `event` is accepted in the current state
    pub fn can_process(&self, event: ReplanEvent) -> bool {
        self.transitions.contains_key(&(self.current, event))
    }

    /// Apply `event`, returning the new state
    pub fn process(&mut self, event: ReplanEvent) -> PlannerResult<ReplanState> {
        let Some(&to) = self.transitions.get(&(self.current, event)) else {
            return Err(PlannerError::InvalidTransition {
                state: self.current.to_string(),
                event: event.to_string(),
            });
        };
        debug!(from = %self.current, %event, %to, "state transition");
        self.history.push(Transition {
            from: self.current,
            event,
            to,
        });
        self.current = to;
        Ok(to)
    }

    /// Consecutive `(from, to)` pairs of the recorded history
    pub fn path(&self) -> Vec<(ReplanState, ReplanState)> {
        self.history.iter().map(|t| (t.from, t.to)).collect()
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle() {
        let mut machine = StateMachine::new();
        assert_eq!(machine.current(), ReplanState::Idle);
        machine.process(ReplanEvent::ObstructionAhead).unwrap();
        machine.process(ReplanEvent::Committed).unwrap();
        machine.process(ReplanEvent::TargetProvisional).unwrap();
        machine.process(ReplanEvent::EndFound).unwrap();
        machine.process(ReplanEvent::EpisodeEnded).unwrap();
        assert_eq!(machine.process(ReplanEvent::Finished).unwrap(), ReplanState::Idle);
        assert_eq!(machine.history().len(), 6);
        assert_eq!(
            machine.path()[..2],
            [
                (ReplanState::Idle, ReplanState::SearchingStart),
                (ReplanState::SearchingStart, ReplanState::Planning),
            ]
        );
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut machine = StateMachine::new();
        let err = machine.process(ReplanEvent::Committed).unwrap_err();
        assert_eq!(format!("{}", err), "Invalid transition: <IDLE> : [Committed]");
        assert_eq!(machine.current(), ReplanState::Idle);
        assert!(machine.history().is_empty());
        assert!(!machine.can_process(ReplanEvent::Finished));
    }

    #[test]
    fn test_not_enough_returns_to_idle() {
        let mut machine = StateMachine::new();
        machine.process(ReplanEvent::ObstructionAhead).unwrap();
        machine.process(ReplanEvent::NotEnoughObstruction).unwrap();
        assert_eq!(machine.current(), ReplanState::Idle);
        assert_eq!(format!("{}", ReplanState::SearchingStart), "SEARCHING_START");
    }
}
