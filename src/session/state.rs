//! Session state machine.

use serde::Serialize;

/// Represents the lifecycle state of a shell session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Shell is up and idle.
    #[default]
    Running,
    /// A command is in flight.
    Busy,
    /// Session has been closed and cannot be reused.
    Closed,
}

impl SessionState {
    /// Check if transition to target state is valid.
    ///
    /// Valid transitions:
    /// - Running -> Busy
    /// - Busy -> Running
    /// - Running -> Closed
    /// - Busy -> Closed
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (*self, target),
            (Running, Busy) | (Busy, Running) | (Running, Closed) | (Busy, Closed)
        )
    }

    /// Move to `target` if the transition is valid.
    ///
    /// Returns whether the state changed.
    pub fn transition_to(&mut self, target: SessionState) -> bool {
        if self.can_transition_to(target) {
            *self = target;
            true
        } else {
            false
        }
    }

    /// Check if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed)
    }

    /// Check if session can accept a new command right now.
    pub fn can_execute(&self) -> bool {
        matches!(self, SessionState::Running)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Running => "running",
            SessionState::Busy => "busy",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let mut state = SessionState::Running;
        assert!(state.transition_to(SessionState::Busy));
        assert_eq!(state, SessionState::Busy);

        assert!(state.transition_to(SessionState::Running));
        assert_eq!(state, SessionState::Running);

        assert!(state.transition_to(SessionState::Closed));
        assert_eq!(state, SessionState::Closed);
    }

    #[test]
    fn test_busy_can_close() {
        let mut state = SessionState::Busy;
        assert!(state.transition_to(SessionState::Closed));
    }

    #[test]
    fn test_closed_is_final() {
        let mut state = SessionState::Closed;
        assert!(!state.transition_to(SessionState::Running));
        assert!(!state.transition_to(SessionState::Busy));
        assert!(!state.transition_to(SessionState::Closed));
        assert_eq!(state, SessionState::Closed);
    }

    #[test]
    fn test_is_terminal() {
        assert!(!SessionState::Running.is_terminal());
        assert!(!SessionState::Busy.is_terminal());
        assert!(SessionState::Closed.is_terminal());
    }

    #[test]
    fn test_can_execute() {
        assert!(SessionState::Running.can_execute());
        assert!(!SessionState::Busy.can_execute());
        assert!(!SessionState::Closed.can_execute());
    }

    #[test]
    fn test_serde_and_display() {
        assert_eq!(serde_json::to_string(&SessionState::Busy).unwrap(), "\"busy\"");
        assert_eq!(SessionState::Running.to_string(), "running");
        assert_eq!(SessionState::default(), SessionState::Running);
    }
}
