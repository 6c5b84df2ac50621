//! Sensor record wire codec.
//!
//! Records travel over BLE as a fixed 14-byte little-endian frame:
//!
//! - bytes 0-1: record offset (u16 LE)
//! - bytes 2-5: temperature in °C (f32 LE)
//! - bytes 6-9: relative humidity in % (f32 LE)
//! - bytes 10-13: capture time, seconds since the Unix epoch (u32 LE)
//!
//! An empty payload is the sensor's answer for "no record stored at that
//! index" and decodes to `None`. Any other length below 14 bytes is a
//! malformed frame.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

/// Number of bytes in an encoded [`SensorRecord`].
pub const RECORD_LEN: usize = 14;

/// Reserved request index meaning "the most recent record".
pub const CURRENT_RECORD_INDEX: u16 = 0xFFFF;

/// Records captured per day: the sensor samples once every 20 minutes.
pub const RECORDS_PER_DAY: u16 = 72;

/// A single temperature/humidity sample stored on the sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorRecord {
    /// Slot the record occupies in the sensor's ring buffer. Responses echo
    /// the requested index here, which is how stale responses are detected.
    pub offset: u16,
    /// Temperature in degrees Celsius.
    pub temperature: f32,
    /// Relative humidity percentage (0-100).
    pub humidity: f32,
    /// Capture time in seconds since the Unix epoch.
    pub timestamp: u32,
}

impl SensorRecord {
    /// Decode a record from a characteristic payload.
    ///
    /// Returns `Ok(None)` for an empty payload (no record at that index).
    /// Payloads longer than [`RECORD_LEN`] are accepted and the extra bytes
    /// ignored, matching what the firmware's MTU padding can produce.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::TruncatedRecord`] if `data` is non-empty but
    /// shorter than [`RECORD_LEN`].
    #[must_use = "parsing returns a Result that should be handled"]
    pub fn from_bytes(data: &[u8]) -> ParseResult<Option<Self>> {
        use bytes::Buf;

        if data.is_empty() {
            return Ok(None);
        }
        if data.len() < RECORD_LEN {
            return Err(ParseError::TruncatedRecord {
                expected: RECORD_LEN,
                actual: data.len(),
            });
        }

        let mut buf = data;
        let offset = buf.get_u16_le();
        let temperature = buf.get_f32_le();
        let humidity = buf.get_f32_le();
        let timestamp = buf.get_u32_le();

        Ok(Some(SensorRecord {
            offset,
            temperature,
            humidity,
            timestamp,
        }))
    }

    /// Encode the record into its wire layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        out[0..2].copy_from_slice(&self.offset.to_le_bytes());
        out[2..6].copy_from_slice(&self.temperature.to_le_bytes());
        out[6..10].copy_from_slice(&self.humidity.to_le_bytes());
        out[10..14].copy_from_slice(&self.timestamp.to_le_bytes());
        out
    }

    /// Capture time as an [`time::OffsetDateTime`] (UTC).
    #[must_use]
    pub fn date(&self) -> time::OffsetDateTime {
        time::OffsetDateTime::from_unix_timestamp(i64::from(self.timestamp))
            .unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
    }
}

impl fmt::Display for SensorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{}: {:.1}°C {:.1}% @ {}",
            self.offset,
            self.temperature,
            self.humidity,
            self.date()
        )
    }
}

/// Encode a record index as the sensor's 2-byte little-endian request
/// payload.
#[must_use]
pub fn encode_index(index: u16) -> [u8; 2] {
    index.to_le_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bytes() -> [u8; RECORD_LEN] {
        // offset 3, temperature 21.5, humidity 48.25, timestamp 1_700_000_000
        let mut bytes = [0u8; RECORD_LEN];
        bytes[0..2].copy_from_slice(&3u16.to_le_bytes());
        bytes[2..6].copy_from_slice(&21.5f32.to_le_bytes());
        bytes[6..10].copy_from_slice(&48.25f32.to_le_bytes());
        bytes[10..14].copy_from_slice(&1_700_000_000u32.to_le_bytes());
        bytes
    }

    #[test]
    fn test_decode_valid_record() {
        let record = SensorRecord::from_bytes(&sample_bytes()).unwrap().unwrap();
        assert_eq!(record.offset, 3);
        assert!((record.temperature - 21.5).abs() < f32::EPSILON);
        assert!((record.humidity - 48.25).abs() < f32::EPSILON);
        assert_eq!(record.timestamp, 1_700_000_000);
    }

    #[test]
    fn test_decode_empty_payload_is_absent() {
        assert!(SensorRecord::from_bytes(&[]).unwrap().is_none());
    }

    #[test]
    fn test_decode_truncated_payload_is_error() {
        for len in 1..RECORD_LEN {
            let err = SensorRecord::from_bytes(&sample_bytes()[..len]).unwrap_err();
            let msg = err.to_string();
            assert!(msg.contains("14"), "message should name the expected size");
            assert!(msg.contains(&len.to_string()));
        }
    }

    #[test]
    fn test_decode_extra_bytes_ignored() {
        let mut bytes = sample_bytes().to_vec();
        bytes.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        let record = SensorRecord::from_bytes(&bytes).unwrap().unwrap();
        assert_eq!(record.offset, 3);
        assert_eq!(record.timestamp, 1_700_000_000);
    }

    #[test]
    fn test_roundtrip() {
        let record = SensorRecord {
            offset: 71,
            temperature: -4.75,
            humidity: 99.5,
            timestamp: 1_234_567,
        };
        let decoded = SensorRecord::from_bytes(&record.to_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_encode_index_little_endian() {
        assert_eq!(encode_index(0), [0x00, 0x00]);
        assert_eq!(encode_index(1), [0x01, 0x00]);
        assert_eq!(encode_index(0x0203), [0x03, 0x02]);
        assert_eq!(encode_index(CURRENT_RECORD_INDEX), [0xFF, 0xFF]);
    }

    #[test]
    fn test_date_from_timestamp() {
        let record = SensorRecord {
            offset: 0,
            temperature: 0.0,
            humidity: 0.0,
            timestamp: 0,
        };
        assert_eq!(record.date(), time::OffsetDateTime::UNIX_EPOCH);
    }

    #[test]
    fn test_records_per_day() {
        // One sample per 20 minutes
        assert_eq!(RECORDS_PER_DAY, 24 * 3);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_roundtrip() {
        let record = SensorRecord {
            offset: 5,
            temperature: 19.0,
            humidity: 55.0,
            timestamp: 1_700_000_000,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"offset\":5"));
        let back: SensorRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn roundtrip_any_record(
                offset in any::<u16>(),
                temperature in -40.0f32..85.0,
                humidity in 0.0f32..100.0,
                timestamp in any::<u32>(),
            ) {
                let record = SensorRecord { offset, temperature, humidity, timestamp };
                let decoded = SensorRecord::from_bytes(&record.to_bytes()).unwrap().unwrap();
                prop_assert_eq!(decoded, record);
            }

            #[test]
            fn short_payloads_never_panic(data in proptest::collection::vec(any::<u8>(), 0..RECORD_LEN)) {
                let result = SensorRecord::from_bytes(&data);
                if data.is_empty() {
                    prop_assert!(matches!(result, Ok(None)));
                } else {
                    prop_assert!(result.is_err());
                }
            }
        }
    }
}
