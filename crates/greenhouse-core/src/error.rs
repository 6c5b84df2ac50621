//! Error types for greenhouse-core.
//!
//! This module defines all error types that can occur when talking to the
//! greenhouse sensor over Bluetooth Low Energy.
//!
//! Two failure classes deliberately never surface as errors:
//!
//! - A stale record response (the sensor echoing a different offset than the
//!   one requested) is retried inside the record engine; if the retry budget
//!   runs out the record is reported as absent, not failed.
//! - Connect and scan failures surface as
//!   [`ConnectionState`](greenhouse_types::ConnectionState) transitions on
//!   the session's watch channel, so observers see `Disconnected` rather
//!   than catching an error.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur when communicating with the sensor.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No Bluetooth adapter available on this host.
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    /// Device not found during scan or connection.
    #[error("Device not found: {identifier}")]
    DeviceNotFound {
        /// The address or name that was searched for.
        identifier: String,
    },

    /// Operation attempted while not connected to the sensor.
    #[error("Not connected to device")]
    NotConnected,

    /// The characteristic was not resolved during service discovery.
    #[error("Unknown characteristic: {uuid}")]
    UnknownCharacteristic {
        /// The UUID that was requested.
        uuid: Uuid,
    },

    /// The characteristic exists but does not support reads.
    #[error("Characteristic {uuid} is not readable")]
    NotReadable {
        /// The UUID that was read.
        uuid: Uuid,
    },

    /// The platform BLE stack rejected the operation before it started.
    #[error("Failed to initiate {operation} on {uuid}: {reason}")]
    OperationInitiationFailed {
        /// The operation that was rejected ("read" or "write").
        operation: &'static str,
        /// The characteristic involved.
        uuid: Uuid,
        /// Platform-reported reason.
        reason: String,
    },

    /// A non-empty record frame was shorter than the record layout.
    #[error("Malformed record frame: expected {expected} bytes, got {actual}")]
    MalformedFrame {
        /// Number of bytes the layout requires.
        expected: usize,
        /// Number of bytes actually received.
        actual: usize,
    },

    /// A write's completion wait elapsed. The transport reports this as an
    /// unacknowledged write (`Ok(false)`) at its public boundary.
    #[error("Write did not complete within {duration:?}")]
    WriteTimeout {
        /// The completion wait that elapsed.
        duration: Duration,
    },

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Operation was cancelled, typically by a disconnect.
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a device not found error for a specific identifier.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound {
            identifier: identifier.into(),
        }
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create an operation initiation failure for a characteristic.
    pub fn initiation_failed(
        operation: &'static str,
        uuid: Uuid,
        reason: impl ToString,
    ) -> Self {
        Self::OperationInitiationFailed {
            operation,
            uuid,
            reason: reason.to_string(),
        }
    }
}

impl From<greenhouse_types::ParseError> for Error {
    fn from(err: greenhouse_types::ParseError) -> Self {
        match err {
            greenhouse_types::ParseError::TruncatedRecord { expected, actual } => {
                Error::MalformedFrame { expected, actual }
            }
            // Handle future ParseError variants (non_exhaustive)
            _ => Error::MalformedFrame {
                expected: greenhouse_types::RECORD_LEN,
                actual: 0,
            },
        }
    }
}

/// Result type alias using greenhouse-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
