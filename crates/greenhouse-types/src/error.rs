//! Error types for data parsing in greenhouse-types.

use thiserror::Error;

/// Errors that can occur when parsing sensor data.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in greenhouse-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A non-empty record payload was shorter than the fixed record layout.
    ///
    /// An empty payload means "no record at that index" and is not an error;
    /// a truncated one means the frame was corrupted in transit.
    #[error("Truncated record: expected {expected} bytes, got {actual}")]
    TruncatedRecord {
        /// Number of bytes the record layout requires.
        expected: usize,
        /// Number of bytes actually received.
        actual: usize,
    },
}

/// Result type alias using greenhouse-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
