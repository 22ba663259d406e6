//! Engine State
//!
//! Lifecycle of a long-lived component (trigger engine or macro runner):
//!
//! ```text
//! Idle -> Armed -> Running -> Armed      (trigger engine; Running while a playback is in flight)
//! Idle -> Running                        (macro runner)
//! any  -> Cancelling -> Idle             (stop / fault teardown)
//! ```
//!
//! Each owner keeps its own [`StateCell`]; transitions are compare-and-swap so
//! concurrent callers cannot both win the same edge.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EngineState {
    Idle = 0,
    Armed = 1,
    Running = 2,
    Cancelling = 3,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => EngineState::Armed,
            2 => EngineState::Running,
            3 => EngineState::Cancelling,
            _ => EngineState::Idle,
        }
    }

    /// Whether trigger events should be dispatched in this state
    pub fn accepts_triggers(self) -> bool {
        matches!(self, EngineState::Armed | EngineState::Running)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Idle => "idle",
            EngineState::Armed => "armed",
            EngineState::Running => "running",
            EngineState::Cancelling => "cancelling",
        };
        f.write_str(name)
    }
}

/// Atomic holder for an [`EngineState`]
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(EngineState::Idle as u8))
    }

    pub fn get(&self) -> EngineState {
        EngineState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Unconditional store, used by teardown paths
    pub fn set(&self, state: EngineState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Move `from -> to`; on failure returns the state actually observed
    pub fn transition(&self, from: EngineState, to: EngineState) -> Result<(), EngineState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(EngineState::from_u8)
    }

    pub fn is_idle(&self) -> bool {
        self.get() == EngineState::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_only_from_expected_state() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), EngineState::Idle);
        assert!(cell.transition(EngineState::Idle, EngineState::Armed).is_ok());
        assert_eq!(
            cell.transition(EngineState::Idle, EngineState::Armed),
            Err(EngineState::Armed)
        );
        assert!(cell.get().accepts_triggers());

        cell.set(EngineState::Cancelling);
        assert!(!cell.get().accepts_triggers());
        assert_eq!(cell.get().to_string(), "cancelling");
    }
}
