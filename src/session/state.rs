//! Session state management

use serde::Serialize;

/// Connection state machine for one camera session
///
/// Transitions are validated to keep the lifecycle honest: the happy path
/// runs `Disconnected → IotcConnecting → AvConnecting → Connected →
/// Authenticating → AuthenticationSucceeded`; the failure states are
/// reachable from any in-progress state, and a forced disconnect may land
/// on `Disconnected` from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Not yet connected
    Disconnected,

    /// Bringing up the transport session
    IotcConnecting,

    /// Transport session up, starting the AV channel
    AvConnecting,

    /// Fully connected, not yet authenticated
    Connected,

    /// Connection failed, no longer connected
    ConnectingFailed,

    /// Running the challenge/response exchange
    Authenticating,

    /// Fully connected and authenticated; frames may flow
    AuthenticationSucceeded,

    /// Authentication failed, no longer connected
    AuthenticationFailed,
}

impl SessionState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;

        match (*self, target) {
            // Self-transitions
            (a, b) if a == b => true,

            // A forced disconnect is legal from anywhere
            (_, Disconnected) => true,

            // Happy path
            (Disconnected, IotcConnecting) => true,
            (IotcConnecting, AvConnecting) => true,
            (AvConnecting, Connected) => true,
            (Connected, Authenticating) => true,
            (Authenticating, AuthenticationSucceeded) => true,

            // Failure states from any in-progress state
            (IotcConnecting | AvConnecting | Connected, ConnectingFailed) => true,
            (Connected | Authenticating, AuthenticationFailed) => true,

            // The frame pipeline parks the session here when it stops
            (AuthenticationSucceeded, ConnectingFailed) => true,

            // Cleanup runs disconnect first, then records the failure
            (Disconnected, ConnectingFailed | AuthenticationFailed) => true,

            _ => false,
        }
    }

    /// True while the session holds a live AV channel
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            SessionState::Connected
                | SessionState::Authenticating
                | SessionState::AuthenticationSucceeded
        )
    }

    /// True in the transient states of connect/auth
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            SessionState::IotcConnecting
                | SessionState::AvConnecting
                | SessionState::Authenticating
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            SessionState::ConnectingFailed | SessionState::AuthenticationFailed
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::IotcConnecting => "IotcConnecting",
            SessionState::AvConnecting => "AvConnecting",
            SessionState::Connected => "Connected",
            SessionState::ConnectingFailed => "ConnectingFailed",
            SessionState::Authenticating => "Authenticating",
            SessionState::AuthenticationSucceeded => "AuthenticationSucceeded",
            SessionState::AuthenticationFailed => "AuthenticationFailed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(Disconnected.can_transition_to(IotcConnecting));
        assert!(IotcConnecting.can_transition_to(AvConnecting));
        assert!(AvConnecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Authenticating));
        assert!(Authenticating.can_transition_to(AuthenticationSucceeded));

        // Self-transitions
        assert!(Connected.can_transition_to(Connected));
    }

    #[test]
    fn test_failure_transitions() {
        assert!(IotcConnecting.can_transition_to(ConnectingFailed));
        assert!(AvConnecting.can_transition_to(ConnectingFailed));
        assert!(Authenticating.can_transition_to(AuthenticationFailed));
        assert!(AuthenticationSucceeded.can_transition_to(ConnectingFailed));
    }

    #[test]
    fn test_invalid_transitions() {
        // Success is only reachable through the authentication exchange
        assert!(!Connected.can_transition_to(AuthenticationSucceeded));
        assert!(!Disconnected.can_transition_to(AuthenticationSucceeded));
        assert!(!ConnectingFailed.can_transition_to(AuthenticationSucceeded));

        // No skipping connect phases
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!IotcConnecting.can_transition_to(Connected));

        // Failed states don't resurrect a channel
        assert!(!ConnectingFailed.can_transition_to(Authenticating));
    }

    #[test]
    fn test_forced_disconnect_from_anywhere() {
        for state in [
            Disconnected,
            IotcConnecting,
            AvConnecting,
            Connected,
            ConnectingFailed,
            Authenticating,
            AuthenticationSucceeded,
            AuthenticationFailed,
        ] {
            assert!(state.can_transition_to(Disconnected));
        }
    }

    #[test]
    fn test_state_checks() {
        assert!(Connected.is_connected());
        assert!(AuthenticationSucceeded.is_connected());
        assert!(!Disconnected.is_connected());
        assert!(Authenticating.is_in_progress());
        assert!(ConnectingFailed.is_failed());
        assert!(!Connected.is_failed());
    }
}
