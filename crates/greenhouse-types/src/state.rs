//! Connection state reported by a transport session.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Lifecycle of the link to the sensor.
///
/// Only the transport session mutates this; everything else observes it
/// through a watch channel.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new states
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub enum ConnectionState {
    /// No link and no connection attempt in flight.
    #[default]
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// The link is up and every required characteristic resolved.
    Connected,
    /// No target device has ever been chosen, so there is nothing to
    /// connect to. Distinct from [`Disconnected`](Self::Disconnected) so a
    /// UI can prompt for device selection instead of retrying.
    NoDeviceSelected,
}

impl ConnectionState {
    /// Whether the session is ready for characteristic I/O.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::NoDeviceSelected => write!(f, "no device selected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_is_connected() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(!ConnectionState::NoDeviceSelected.is_connected());
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(
            ConnectionState::NoDeviceSelected.to_string(),
            "no device selected"
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serialization() {
        assert_eq!(
            serde_json::to_string(&ConnectionState::Connecting).unwrap(),
            "\"Connecting\""
        );
    }
}
