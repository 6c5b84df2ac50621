//! Platform-agnostic types for the greenhouse sensor record protocol.
//!
//! This crate provides the wire codec and shared types used by the native
//! BLE implementation in greenhouse-core.
//!
//! # Features
//!
//! - [`SensorRecord`] and its fixed 14-byte little-endian codec
//! - Record-index request encoding
//! - UUID constants for the sensor's record service
//! - [`ConnectionState`] for observing a transport session
//! - Error types for data parsing

pub mod error;
pub mod record;
pub mod state;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use record::{
    CURRENT_RECORD_INDEX, RECORD_LEN, RECORDS_PER_DAY, SensorRecord, encode_index,
};
pub use state::ConnectionState;
pub use uuid::{GattEndpoint, record_endpoint};
pub use uuid as uuids;
