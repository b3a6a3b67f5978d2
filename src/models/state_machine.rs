// Operation phase state machine with validation

use super::Phase;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateTransitionError {
    #[error("Invalid phase transition from {from} to {to}")]
    InvalidTransition { from: Phase, to: Phase },

    #[error("Operation already in terminal phase: {0}")]
    AlreadyTerminal(Phase),

    #[error("Operation is already in phase {0}")]
    SamePhase(Phase),

    #[error("Phase {0} is only reachable through a recorded merge")]
    RequiresMergeRecord(Phase),

    #[error("Invalid transition table: {0}")]
    InvalidTable(String),
}

/// Events that move an operation between phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Event {
    Plan,
    Queue,
    Start,
    Merge,
    Cancel,
    Fail,
}

/// Explicit `(from, event) -> to` table, checked once when built
#[derive(Debug, Clone)]
pub struct TransitionTable {
    rows: BTreeMap<(Phase, Event), Phase>,
}

impl TransitionTable {
    /// Build a table from rows, rejecting tables that break the phase graph
    pub fn new(rows: &[(Phase, Event, Phase)]) -> Result<Self, StateTransitionError> {
        let mut map = BTreeMap::new();

        for &(from, event, to) in rows {
            if from.is_terminal() {
                return Err(StateTransitionError::InvalidTable(format!(
                    "row leaves terminal phase {} on {:?}",
                    from, event
                )));
            }
            if from == to {
                return Err(StateTransitionError::InvalidTable(format!(
                    "self-loop on {} for {:?}",
                    from, event
                )));
            }
            if map.insert((from, event), to).is_some() {
                return Err(StateTransitionError::InvalidTable(format!(
                    "duplicate row for ({}, {:?})",
                    from, event
                )));
            }
        }

        let table = Self { rows: map };
        let reachable = table.reachable_from(Phase::Init);
        for phase in Phase::all() {
            if !phase.is_terminal() && !reachable.contains(phase) {
                return Err(StateTransitionError::InvalidTable(format!(
                    "phase {} is unreachable from init",
                    phase
                )));
            }
        }

        Ok(table)
    }

    /// The operation lifecycle graph:
    /// init -> planned -> queued -> executing -> merged,
    /// with cancel and fail allowed from every non-terminal phase.
    pub fn standard() -> &'static TransitionTable {
        static TABLE: OnceLock<TransitionTable> = OnceLock::new();
        TABLE.get_or_init(|| {
            let mut rows = vec![
                (Phase::Init, Event::Plan, Phase::Planned),
                (Phase::Planned, Event::Queue, Phase::Queued),
                (Phase::Queued, Event::Start, Phase::Executing),
                (Phase::Executing, Event::Merge, Phase::Merged),
            ];
            for from in Phase::all().iter().filter(|p| !p.is_terminal()) {
                rows.push((*from, Event::Cancel, Phase::Cancelled));
                rows.push((*from, Event::Fail, Phase::Failed));
            }
            match TransitionTable::new(&rows) {
                Ok(table) => table,
                Err(e) => unreachable!("standard transition table is invalid: {}", e),
            }
        })
    }

    /// The event that moves `from` to `to`, if the graph has that edge
    pub fn event_for(&self, from: Phase, to: Phase) -> Option<Event> {
        self.rows
            .iter()
            .find(|((f, _), t)| *f == from && **t == to)
            .map(|((_, event), _)| *event)
    }

    /// Apply an event to a phase
    pub fn apply(&self, from: Phase, event: Event) -> Option<Phase> {
        self.rows.get(&(from, event)).copied()
    }

    /// Validates and returns the target phase
    pub fn transition(&self, from: Phase, to: Phase) -> Result<Phase, StateTransitionError> {
        if from.is_terminal() {
            return Err(StateTransitionError::AlreadyTerminal(from));
        }
        if from == to {
            return Err(StateTransitionError::SamePhase(from));
        }
        match self.event_for(from, to) {
            Some(_) => Ok(to),
            None => Err(StateTransitionError::InvalidTransition { from, to }),
        }
    }

    /// All phases directly reachable from `from`
    pub fn valid_next_phases(&self, from: Phase) -> Vec<Phase> {
        let next: BTreeSet<Phase> = self
            .rows
            .iter()
            .filter(|((f, _), _)| *f == from)
            .map(|(_, to)| *to)
            .collect();
        next.into_iter().collect()
    }

    fn reachable_from(&self, start: Phase) -> BTreeSet<Phase> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(phase) = queue.pop_front() {
            if !seen.insert(phase) {
                continue;
            }
            for next in self.valid_next_phases(phase) {
                queue.push_back(next);
            }
        }
        seen
    }
}

/// Validates a transition against the standard table
pub fn transition_state(current: Phase, target: Phase) -> Result<Phase, StateTransitionError> {
    TransitionTable::standard().transition(current, target)
}

/// Validates if an operation can move from one phase to another
pub fn can_transition(from: Phase, to: Phase) -> bool {
    transition_state(from, to).is_ok()
}
