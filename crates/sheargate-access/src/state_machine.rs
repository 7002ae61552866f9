//! Access cycle state machine.
//!
//! Tracks where the access manager is in the unlock/relock cycle and rejects
//! any transition the cycle does not allow.
//!
//! # States
//!
//! - `Idle`: locked, waiting for a card
//! - `AwaitingAuthorization`: a card is being checked against the allow-list
//! - `Unlocking`: relay energized, waiting for the door to open
//! - `Unlocked`: door confirmed open (or confirmed by timer)
//! - `Relocking`: relay and green LED being switched off
//! - `Error`: the I/O module is unavailable; no output commands are issued
//!
//! # Valid Transitions
//!
//! - Idle → AwaitingAuthorization → Unlocking → Unlocked → Relocking → Idle
//! - AwaitingAuthorization → Idle (denied)
//! - Unlocking → Relocking (window elapsed before the door opened)
//! - any state → Error → Idle
//!
//! # Examples
//!
//! ```
//! use sheargate_access::{AccessState, StateMachine};
//!
//! let mut machine = StateMachine::new();
//! assert_eq!(machine.current_state(), AccessState::Idle);
//!
//! machine.transition_to(AccessState::AwaitingAuthorization).unwrap();
//! assert!(machine.transition_to(AccessState::Unlocked).is_err());
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use sheargate_core::{Error, Result};

/// Maximum number of state transitions to keep in history.
const MAX_HISTORY_SIZE: usize = 100;

/// Phase of the access cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessState {
    /// Locked, waiting for a card.
    #[default]
    Idle,

    /// Card received, allow-list lookup in progress.
    AwaitingAuthorization,

    /// Relay and green LED on, door not yet confirmed open.
    Unlocking,

    /// Door confirmed open.
    Unlocked,

    /// Relay and green LED being switched off.
    Relocking,

    /// I/O module lost; outputs are not driven until it is back.
    Error,
}

impl fmt::Display for AccessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_str = match self {
            AccessState::Idle => "Idle",
            AccessState::AwaitingAuthorization => "AwaitingAuthorization",
            AccessState::Unlocking => "Unlocking",
            AccessState::Unlocked => "Unlocked",
            AccessState::Relocking => "Relocking",
            AccessState::Error => "Error",
        };
        write!(f, "{}", state_str)
    }
}

impl AccessState {
    /// Check if transition to target state is valid from this state.
    ///
    /// # Examples
    ///
    /// ```
    /// use sheargate_access::AccessState;
    ///
    /// assert!(AccessState::Idle.can_transition_to(AccessState::AwaitingAuthorization));
    /// assert!(AccessState::Unlocked.can_transition_to(AccessState::Error));
    /// assert!(!AccessState::Idle.can_transition_to(AccessState::Unlocked));
    /// ```
    pub fn can_transition_to(self, target: AccessState) -> bool {
        use AccessState::{AwaitingAuthorization, Idle, Relocking, Unlocked, Unlocking};

        matches!(
            (self, target),
            (Idle, AwaitingAuthorization)
                | (AwaitingAuthorization, Unlocking | Idle)
                | (Unlocking, Unlocked | Relocking)
                | (Unlocked, Relocking)
                | (Relocking, Idle)
                | (AccessState::Error, Idle)
        ) || (target == AccessState::Error && self != AccessState::Error)
    }

    /// States during which an access session exists.
    pub fn is_session_active(self) -> bool {
        matches!(
            self,
            AccessState::Unlocking | AccessState::Unlocked | AccessState::Relocking
        )
    }
}

/// Represents a single state transition with timestamp.
///
/// The `timestamp` field is not serialized as `Instant` is process-specific.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// The state transitioned from.
    pub from: AccessState,

    /// The state transitioned to.
    pub to: AccessState,

    /// When the transition occurred.
    #[serde(skip, default = "Instant::now")]
    pub timestamp: Instant,
}

impl StateTransition {
    pub fn new(from: AccessState, to: AccessState) -> Self {
        Self {
            from,
            to,
            timestamp: Instant::now(),
        }
    }

    /// Get the duration since this transition occurred.
    pub fn elapsed(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

/// Validated access state with a bounded transition history.
///
/// Not synchronized: the access manager owns it and is the only caller.
#[derive(Debug)]
pub struct StateMachine {
    current_state: AccessState,
    state_entered_at: Instant,
    history: VecDeque<StateTransition>,
}

impl StateMachine {
    /// Create a new state machine in the Idle state.
    pub fn new() -> Self {
        Self {
            current_state: AccessState::Idle,
            state_entered_at: Instant::now(),
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
        }
    }

    pub fn current_state(&self) -> AccessState {
        self.current_state
    }

    /// Get the time elapsed in the current state.
    pub fn time_in_current_state(&self) -> Duration {
        self.state_entered_at.elapsed()
    }

    /// Recent transitions, oldest first.
    pub fn history(&self) -> &VecDeque<StateTransition> {
        &self.history
    }

    /// Get the last N state transitions, oldest first.
    pub fn last_transitions(&self, count: usize) -> Vec<StateTransition> {
        let skip = self.history.len().saturating_sub(count);
        self.history.iter().skip(skip).cloned().collect()
    }

    /// Transition to a new state, validating the transition.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidStateTransition` if the cycle does not allow
    /// moving from the current state to `new_state`. The state is left
    /// unchanged.
    ///
    /// # Examples
    ///
    /// ```
    /// use sheargate_access::{AccessState, StateMachine};
    ///
    /// let mut machine = StateMachine::new();
    ///
    /// let transition = machine.transition_to(AccessState::AwaitingAuthorization).unwrap();
    /// assert_eq!(transition.from, AccessState::Idle);
    ///
    /// assert!(machine.transition_to(AccessState::Relocking).is_err());
    /// assert_eq!(machine.current_state(), AccessState::AwaitingAuthorization);
    /// ```
    pub fn transition_to(&mut self, new_state: AccessState) -> Result<StateTransition> {
        if !self.current_state.can_transition_to(new_state) {
            return Err(Error::InvalidStateTransition {
                from: self.current_state.to_string(),
                to: new_state.to_string(),
            });
        }

        let transition = StateTransition::new(self.current_state, new_state);
        self.current_state = new_state;
        self.state_entered_at = Instant::now();
        self.add_to_history(transition.clone());

        Ok(transition)
    }

    fn add_to_history(&mut self, transition: StateTransition) {
        self.history.push_back(transition);
        if self.history.len() > MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
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
    use rstest::rstest;
    use std::thread;
    use AccessState::{AwaitingAuthorization, Idle, Relocking, Unlocked, Unlocking};

    #[test]
    fn test_new_machine_starts_idle() {
        let machine = StateMachine::new();
        assert_eq!(machine.current_state(), Idle);
        assert_eq!(machine.history().len(), 0);
    }

    #[rstest]
    #[case(Idle, AwaitingAuthorization)]
    #[case(AwaitingAuthorization, Unlocking)]
    #[case(AwaitingAuthorization, Idle)]
    #[case(Unlocking, Unlocked)]
    #[case(Unlocking, Relocking)]
    #[case(Unlocked, Relocking)]
    #[case(Relocking, Idle)]
    #[case(AccessState::Error, Idle)]
    #[case(Idle, AccessState::Error)]
    #[case(Unlocked, AccessState::Error)]
    #[case(Relocking, AccessState::Error)]
    fn test_valid_transitions(#[case] from: AccessState, #[case] to: AccessState) {
        assert!(from.can_transition_to(to));
    }

    #[rstest]
    #[case(Idle, Unlocking)]
    #[case(Idle, Unlocked)]
    #[case(AwaitingAuthorization, Unlocked)]
    #[case(Unlocked, Idle)]
    #[case(Unlocked, Unlocking)]
    #[case(Relocking, Unlocked)]
    #[case(AccessState::Error, Unlocking)]
    #[case(AccessState::Error, AccessState::Error)]
    fn test_invalid_transitions(#[case] from: AccessState, #[case] to: AccessState) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn test_invalid_transition_leaves_state() {
        let mut machine = StateMachine::new();
        let err = machine.transition_to(Unlocked).unwrap_err();

        assert!(matches!(err, Error::InvalidStateTransition { .. }));
        assert_eq!(machine.current_state(), Idle);
        assert!(machine.history().is_empty());
    }

    #[test]
    fn test_complete_granted_cycle() {
        let mut machine = StateMachine::new();
        for state in [AwaitingAuthorization, Unlocking, Unlocked, Relocking, Idle] {
            machine.transition_to(state).unwrap();
        }

        assert_eq!(machine.current_state(), Idle);
        assert_eq!(machine.history().len(), 5);
        assert_eq!(machine.history()[2].from, Unlocking);
        assert_eq!(machine.history()[2].to, Unlocked);
    }

    #[test]
    fn test_fault_and_recovery() {
        let mut machine = StateMachine::new();
        machine.transition_to(AwaitingAuthorization).unwrap();
        machine.transition_to(Unlocking).unwrap();
        machine.transition_to(AccessState::Error).unwrap();
        machine.transition_to(Idle).unwrap();

        assert_eq!(machine.current_state(), Idle);
    }

    #[test]
    fn test_last_transitions_returns_most_recent() {
        let mut machine = StateMachine::new();
        machine.transition_to(AwaitingAuthorization).unwrap();
        machine.transition_to(Idle).unwrap();
        machine.transition_to(AccessState::Error).unwrap();

        let last = machine.last_transitions(2);
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].to, Idle);
        assert_eq!(last[1].to, AccessState::Error);
        assert_eq!(machine.last_transitions(10).len(), 3);
    }

    #[test]
    fn test_history_size_limit() {
        let mut machine = StateMachine::new();
        for _ in 0..60 {
            machine.transition_to(AwaitingAuthorization).unwrap();
            machine.transition_to(Idle).unwrap();
        }

        assert_eq!(machine.history().len(), MAX_HISTORY_SIZE);
        assert_eq!(machine.history().back().unwrap().to, Idle);
    }

    #[test]
    fn test_time_in_current_state() {
        let mut machine = StateMachine::new();
        machine.transition_to(AwaitingAuthorization).unwrap();
        thread::sleep(Duration::from_millis(10));

        assert!(machine.time_in_current_state() >= Duration::from_millis(10));
        assert!(machine.history()[0].elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_session_active_states() {
        assert!(Unlocking.is_session_active());
        assert!(Unlocked.is_session_active());
        assert!(Relocking.is_session_active());
        assert!(!Idle.is_session_active());
        assert!(!AwaitingAuthorization.is_session_active());
        assert!(!AccessState::Error.is_session_active());
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_string(&AwaitingAuthorization).unwrap(),
            "\"awaiting_authorization\""
        );
        assert_eq!(Unlocked.to_string(), "Unlocked");
    }
}
