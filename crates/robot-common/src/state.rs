//! Engine lifecycle state machine.
//!
//! SETUP → RUN → FAULT → STOPPED
//!
//! Commands may only be registered in SETUP. Fault is reachable from SETUP
//! (a failed startup check) and RUN; both FAULT and RUN may be stopped.

use crate::error::{RobotError, RobotResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of the cooperative engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    /// Commands are being registered; the loop has not started.
    #[default]
    Setup,
    /// Dispatch passes are running.
    Run,
    /// A fatal condition was detected; Commands were driven to their safe state.
    Fault,
    /// Orderly shutdown completed.
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup => write!(f, "SETUP"),
            Self::Run => write!(f, "RUN"),
            Self::Fault => write!(f, "FAULT"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl EngineState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: EngineState) -> bool {
        use EngineState::{Fault, Run, Setup, Stopped};

        matches!(
            (self, target),
            (Setup, Run)
                | (Setup, Fault)
                | (Run, Fault)
                | (Run, Stopped)
                | (Fault, Stopped)
                | (Setup, Stopped)
        )
    }

    /// Returns true once the loop has stopped for good.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Fault | Self::Stopped)
    }
}

/// State machine wrapper with transition history tracking.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: EngineState,
    previous: Option<EngineState>,
    transition_count: u64,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a new state machine starting in SETUP.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: EngineState::Setup,
            previous: None,
            transition_count: 0,
        }
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.current
    }

    /// Get the previous state (if any transition occurred).
    #[must_use]
    pub fn previous_state(&self) -> Option<EngineState> {
        self.previous
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a state transition.
    pub fn transition(&mut self, target: EngineState) -> RobotResult<()> {
        if self.current.can_transition_to(target) {
            self.previous = Some(self.current);
            self.current = target;
            self.transition_count += 1;
            Ok(())
        } else {
            Err(RobotError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }

    /// Force a transition to FAULT (no-op if already terminal).
    pub fn enter_fault(&mut self) {
        if self.current.can_transition_to(EngineState::Fault) {
            self.previous = Some(self.current);
            self.current = EngineState::Fault;
            self.transition_count += 1;
        }
    }
}
