//! Core BLE library for greenhouse temperature and humidity sensors.
//!
//! This crate talks the record staging protocol the sensor exposes over
//! GATT: the host writes a record index to the request characteristic and
//! reads the staged record back from the data characteristic, one record at
//! a time.
//!
//! # Features
//!
//! - **Device discovery**: Scan for nearby sensors via BLE
//! - **Current reading**: Fetch the most recent temperature/humidity record
//! - **Historical data**: Walk a day of stored records with stale-response
//!   retries and progress snapshots
//! - **Request pacing**: All GATT traffic is serialized with a minimum
//!   spacing, matching what the sensor firmware tolerates
//! - **Persisted selection**: The chosen device address survives restarts
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use greenhouse_core::{BleSession, FileAddressStore, SensorHub};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Arc::new(BleSession::new().await?);
//!     let store = Arc::new(FileAddressStore::from_platform_dir()?);
//!     let hub = SensorHub::new(session, store);
//!
//!     if let Some(record) = hub.current_record().await {
//!         println!("{record}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod history;
pub mod hub;
pub mod mock;
pub mod pacing;
pub mod records;
pub mod session;
pub mod store;
pub mod transport;

// Core exports
pub use error::{Error, Result};
pub use history::{HISTORY_WINDOW, SERIES_GAP, filter_window, split_series};
pub use hub::SensorHub;
pub use mock::{MockSession, MockSessionBuilder, OpSpan};
pub use pacing::{MIN_REQUEST_SPACING, RequestSerializer};
pub use records::{HistoryOptions, MAX_READ_ATTEMPTS, RETRY_DELAY, RecordClient, SnapshotCallback};
pub use session::{DeviceHandle, DeviceTarget, GattSession};
pub use store::{AddressStore, FileAddressStore, MemoryAddressStore};
pub use transport::BleSession;

// Re-export from greenhouse-types
pub use greenhouse_types::uuid as uuids;
pub use greenhouse_types::{
    CURRENT_RECORD_INDEX, ConnectionState, GattEndpoint, RECORDS_PER_DAY, SensorRecord,
    record_endpoint,
};
