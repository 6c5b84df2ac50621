//! Trait abstraction for GATT transport sessions.
//!
//! This module provides the [`GattSession`] trait that abstracts over the
//! real Bluetooth transport ([`BleSession`](crate::transport::BleSession))
//! and the mock session used in tests.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::platform::Peripheral;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::error::Result;
use greenhouse_types::{ConnectionState, GattEndpoint};

/// A device seen during a scan, carrying everything needed to connect to it.
///
/// The native peripheral is optional: a handle rebuilt from a persisted
/// address has none, and the session falls back to resolving the address
/// against the adapter when asked to connect.
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    /// Platform device identifier (MAC address on Linux/Windows, a
    /// CoreBluetooth UUID on macOS).
    pub address: String,
    /// Advertised local name, or `"<unknown>"` when the advertisement
    /// carried none.
    pub name: String,
    pub(crate) peripheral: Option<Peripheral>,
}

impl DeviceHandle {
    /// Create a handle from an address and name, without a native peripheral.
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            peripheral: None,
        }
    }

    pub(crate) fn with_peripheral(
        address: impl Into<String>,
        name: impl Into<String>,
        peripheral: Peripheral,
    ) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            peripheral: Some(peripheral),
        }
    }
}

/// What a connect attempt should aim at.
#[derive(Debug, Clone)]
pub enum DeviceTarget {
    /// A device picked from a scan.
    Handle(DeviceHandle),
    /// A persisted address from an earlier session.
    Address(String),
}

impl From<DeviceHandle> for DeviceTarget {
    fn from(handle: DeviceHandle) -> Self {
        DeviceTarget::Handle(handle)
    }
}

impl DeviceTarget {
    /// The address this target resolves through.
    #[must_use]
    pub fn address(&self) -> &str {
        match self {
            DeviceTarget::Handle(handle) => &handle.address,
            DeviceTarget::Address(address) => address,
        }
    }
}

/// Trait abstracting a GATT transport session.
///
/// This trait enables writing protocol code that works with both the real
/// Bluetooth transport and a mock session for testing. Connection lifecycle
/// is observable, never queried: callers subscribe to the state channel and
/// react to transitions.
#[async_trait]
pub trait GattSession: Send + Sync {
    /// Subscribe to connection state transitions.
    fn connection_state(&self) -> watch::Receiver<ConnectionState>;

    /// Trigger a connection to `target`, resolving every characteristic in
    /// `endpoint` before the state reaches
    /// [`Connected`](ConnectionState::Connected).
    ///
    /// Returns once the attempt is in flight; the outcome is reported on the
    /// state channel. A new call supersedes a previous in-flight attempt.
    async fn connect(&self, target: DeviceTarget, endpoint: GattEndpoint);

    /// Tear down the link and any in-flight scan or connect attempt.
    ///
    /// Operations suspended on the link observe the state transition and
    /// fail with [`Cancelled`](crate::Error::Cancelled) instead of hanging.
    async fn disconnect(&self);

    /// Record that no target device has been chosen, so observers see
    /// [`NoDeviceSelected`](ConnectionState::NoDeviceSelected) instead of a
    /// retryable `Disconnected`.
    fn mark_no_device_selected(&self);

    /// Read the value of a resolved characteristic.
    ///
    /// # Errors
    ///
    /// - [`NotConnected`](crate::Error::NotConnected) without a live link
    /// - [`UnknownCharacteristic`](crate::Error::UnknownCharacteristic) for
    ///   a uuid that was not resolved at connect time
    /// - [`NotReadable`](crate::Error::NotReadable) if the characteristic
    ///   lacks the READ property
    /// - [`OperationInitiationFailed`](crate::Error::OperationInitiationFailed)
    ///   if the platform rejects the read
    async fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>>;

    /// Write to a resolved characteristic without response, waiting a fixed
    /// interval for completion.
    ///
    /// Returns `Ok(true)` when the write went out, `Ok(false)` when it could
    /// not be delivered (unknown uuid, platform failure, or completion
    /// timeout). Only the absence of a link is an error.
    async fn write_characteristic(&self, uuid: Uuid, data: &[u8]) -> Result<bool>;

    /// Start a device scan, streaming discoveries for `duration`.
    ///
    /// Dropping the receiver stops the radio scan early. A new scan
    /// supersedes a previous one.
    async fn start_scan(&self, duration: Duration) -> Result<mpsc::Receiver<DeviceHandle>>;

    /// Stop an in-flight scan, if any.
    async fn stop_scan(&self);
}
