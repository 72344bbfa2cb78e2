//! Turn state machine
//!
//! Enforces strict turn-taking between the user and the assistant: only one
//! party holds the floor at any instant. The machine cycles for the lifetime
//! of a session; there is no terminal state.

use serde::{Deserialize, Serialize};

/// Who holds the floor right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Ready for the user to speak
    #[default]
    Idle,
    /// User audio is being accepted and buffered
    Listening,
    /// User stopped, waiting for assistant audio
    Thinking,
    /// Assistant audio is being forwarded to the user
    Speaking,
}

/// Fixed-transition-table state machine
///
/// Transitions outside the table are rejected as no-ops; they are reported
/// through a diagnostic and never panic. A session is driven by a single
/// task, so no interior locking is needed.
#[derive(Debug, Default)]
pub struct TurnMachine {
    state: TurnState,
}

impl TurnMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Attempt a transition; returns whether the state changed.
    ///
    /// Allowed edges: Idle→Listening, Listening→Thinking, Thinking→Speaking,
    /// Thinking→Idle, Speaking→Idle.
    pub fn try_transition(&mut self, target: TurnState) -> bool {
        if Self::allowed(self.state, target) {
            tracing::trace!(from = ?self.state, to = ?target, "turn transition");
            self.state = target;
            true
        } else {
            tracing::debug!(from = ?self.state, to = ?target, "invalid turn transition ignored");
            false
        }
    }

    /// Force the machine back to Idle, used for fatal-error recovery.
    pub fn reset(&mut self) {
        if self.state != TurnState::Idle {
            tracing::debug!(from = ?self.state, "turn machine reset to idle");
        }
        self.state = TurnState::Idle;
    }

    fn allowed(from: TurnState, to: TurnState) -> bool {
        use TurnState::*;
        matches!(
            (from, to),
            (Idle, Listening) | (Listening, Thinking) | (Thinking, Speaking) | (Thinking, Idle) | (Speaking, Idle)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_idle() {
        let machine = TurnMachine::new();
        assert_eq!(machine.state(), TurnState::Idle);
    }

    #[test]
    fn test_full_turn_cycle() {
        let mut machine = TurnMachine::new();
        assert!(machine.try_transition(TurnState::Listening));
        assert!(machine.try_transition(TurnState::Thinking));
        assert!(machine.try_transition(TurnState::Speaking));
        assert!(machine.try_transition(TurnState::Idle));
        assert_eq!(machine.state(), TurnState::Idle);
    }

    #[test]
    fn test_thinking_may_fall_back_to_idle() {
        let mut machine = TurnMachine::new();
        machine.try_transition(TurnState::Listening);
        machine.try_transition(TurnState::Thinking);
        assert!(machine.try_transition(TurnState::Idle));
    }

    #[test]
    fn test_invalid_transitions_leave_state_unchanged() {
        let mut machine = TurnMachine::new();
        assert!(!machine.try_transition(TurnState::Thinking));
        assert!(!machine.try_transition(TurnState::Speaking));
        assert!(!machine.try_transition(TurnState::Idle));
        assert_eq!(machine.state(), TurnState::Idle);

        machine.try_transition(TurnState::Listening);
        assert!(!machine.try_transition(TurnState::Speaking));
        assert!(!machine.try_transition(TurnState::Idle));
        assert_eq!(machine.state(), TurnState::Listening);
    }

    #[test]
    fn test_arbitrary_sequences_stay_in_set() {
        use TurnState::*;
        let targets = [Speaking, Idle, Listening, Listening, Thinking, Speaking, Thinking, Idle];
        let mut machine = TurnMachine::new();
        for target in targets {
            machine.try_transition(target);
            assert!(matches!(machine.state(), Idle | Listening | Thinking | Speaking));
        }
    }

    #[test]
    fn test_reset_forces_idle_from_any_state() {
        let mut machine = TurnMachine::new();
        machine.try_transition(TurnState::Listening);
        machine.try_transition(TurnState::Thinking);
        machine.try_transition(TurnState::Speaking);
        machine.reset();
        assert_eq!(machine.state(), TurnState::Idle);
        // Reset is unconditional, also from Idle.
        machine.reset();
        assert_eq!(machine.state(), TurnState::Idle);
    }
}
