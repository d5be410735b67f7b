//! Connection state published to observers.

use std::fmt;

/// Where the client is in its lifecycle.
///
/// `Disconnected → Connecting → Connected → Disconnected → …`, ending in
/// `Stopped` after shutdown or once reconnecting gives up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// No transport.
    #[default]
    Disconnected,
    /// Dialing or handshaking.
    Connecting,
    /// Session loops running.
    Connected,
    /// Terminal.
    Stopped,
}

impl ClientState {
    /// Whether a session is up.
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// Whether the client will never connect again.
    pub fn is_terminal(self) -> bool {
        self == Self::Stopped
    }

    /// Lowercase name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected() {
        assert_eq!(ClientState::default(), ClientState::Disconnected);
    }

    #[test]
    fn predicates() {
        assert!(ClientState::Connected.is_connected());
        assert!(!ClientState::Connecting.is_connected());
        assert!(ClientState::Stopped.is_terminal());
        assert!(!ClientState::Disconnected.is_terminal());
    }

    #[test]
    fn display() {
        assert_eq!(ClientState::Connecting.to_string(), "connecting");
    }
}
