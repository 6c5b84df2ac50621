//! Bluetooth UUIDs for the greenhouse sensor.
//!
//! This module contains the UUIDs needed to communicate with the sensor's
//! record service over Bluetooth Low Energy.

use uuid::{Uuid, uuid};

/// Record synchronization service exposed by the sensor firmware.
pub const RECORD_SERVICE: Uuid = uuid!("4fafc201-1fb5-459e-8fcc-c5c9c331914b");

/// Record request characteristic (write-only).
///
/// The host writes a 2-byte little-endian record index here to ask the
/// sensor to stage that record on [`RECORD_DATA`].
pub const RECORD_REQUEST: Uuid = uuid!("00000001-1fb5-459e-8fcc-c5c9c331914b");

/// Record data characteristic (read/notify).
///
/// Reading this returns the record most recently staged by a write to
/// [`RECORD_REQUEST`], or an empty payload when no record exists.
pub const RECORD_DATA: Uuid = uuid!("00000002-1fb5-459e-8fcc-c5c9c331914b");

/// A GATT service together with the characteristics a session must resolve
/// before it reports itself connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattEndpoint {
    /// Service UUID to discover.
    pub service: Uuid,
    /// Characteristics that must all be present under the service.
    pub characteristics: Vec<Uuid>,
}

impl GattEndpoint {
    /// Create an endpoint from a service and its characteristics.
    pub fn new(service: Uuid, characteristics: impl Into<Vec<Uuid>>) -> Self {
        Self {
            service,
            characteristics: characteristics.into(),
        }
    }
}

/// The record service endpoint: [`RECORD_SERVICE`] with both record
/// characteristics.
#[must_use]
pub fn record_endpoint() -> GattEndpoint {
    GattEndpoint::new(RECORD_SERVICE, [RECORD_REQUEST, RECORD_DATA])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_service_uuid() {
        let expected = "4fafc201-1fb5-459e-8fcc-c5c9c331914b";
        assert_eq!(RECORD_SERVICE.to_string(), expected);
    }

    #[test]
    fn test_record_request_uuid() {
        let expected = "00000001-1fb5-459e-8fcc-c5c9c331914b";
        assert_eq!(RECORD_REQUEST.to_string(), expected);
    }

    #[test]
    fn test_record_data_uuid() {
        let expected = "00000002-1fb5-459e-8fcc-c5c9c331914b";
        assert_eq!(RECORD_DATA.to_string(), expected);
    }

    #[test]
    fn test_record_uuids_are_distinct() {
        assert_ne!(RECORD_SERVICE, RECORD_REQUEST);
        assert_ne!(RECORD_REQUEST, RECORD_DATA);
        assert_ne!(RECORD_SERVICE, RECORD_DATA);
    }

    #[test]
    fn test_characteristics_share_service_suffix() {
        // Both characteristics live in the same 128-bit base as the service
        let suffix = "-1fb5-459e-8fcc-c5c9c331914b";
        assert!(RECORD_REQUEST.to_string().ends_with(suffix));
        assert!(RECORD_DATA.to_string().ends_with(suffix));
    }

    #[test]
    fn test_record_endpoint_contents() {
        let endpoint = record_endpoint();
        assert_eq!(endpoint.service, RECORD_SERVICE);
        assert_eq!(endpoint.characteristics, vec![RECORD_REQUEST, RECORD_DATA]);
    }
}
