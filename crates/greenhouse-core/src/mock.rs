//! Mock session implementation for testing.
//!
//! This module provides a mock transport that can be used for unit testing
//! without requiring actual BLE hardware.
//!
//! The [`MockSession`] implements the [`GattSession`] trait, allowing it to
//! be used interchangeably with the real transport in generic code.
//!
//! # Features
//!
//! - **Scripted responses**: Answer record reads from a queue or a function
//!   of the last requested index
//! - **Failure injection**: Fail reads or writes, transiently or until reset
//! - **Latency simulation**: Add artificial delays to simulate slow BLE
//! - **Operation log**: Start/finish instants of every GATT operation, for
//!   asserting serialization and pacing

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc, watch};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::pacing::RequestSerializer;
use crate::session::{DeviceHandle, DeviceTarget, GattSession};
use greenhouse_types::uuids::{RECORD_DATA, RECORD_REQUEST};
use greenhouse_types::{
    CURRENT_RECORD_INDEX, ConnectionState, GattEndpoint, RECORDS_PER_DAY, SensorRecord,
};

/// How the mock answers reads of the record data characteristic.
pub enum Responder {
    /// Pop one payload per read; an exhausted queue answers with an empty
    /// payload (no record).
    Queue(StdMutex<VecDeque<Vec<u8>>>),
    /// Compute the payload from the most recently requested index.
    Fn(Box<dyn Fn(u16) -> Vec<u8> + Send + Sync>),
}

/// A completed GATT operation, for asserting serialization and pacing.
#[derive(Debug, Clone, Copy)]
pub struct OpSpan {
    /// `"read"` or `"write"`.
    pub kind: &'static str,
    /// When the operation entered the critical section.
    pub started: Instant,
    /// When it left.
    pub finished: Instant,
}

/// A mock GATT session for testing.
///
/// Starts disconnected; `connect` resolves whatever endpoint it is given
/// and moves straight to `Connected` unless told to fail.
pub struct MockSession {
    state_tx: watch::Sender<ConnectionState>,
    serializer: RequestSerializer,
    resolved: RwLock<HashSet<Uuid>>,
    responder: Responder,
    /// Index from the last request write, echoed by the default responder.
    last_requested: StdMutex<Option<u16>>,
    op_log: StdMutex<Vec<OpSpan>>,
    discoverable: Vec<DeviceHandle>,
    read_count: AtomicU32,
    write_count: AtomicU32,
    fail_connect: AtomicBool,
    fail_writes: AtomicBool,
    /// Number of upcoming reads to fail before succeeding again.
    transient_read_failures: AtomicU32,
    read_latency_ms: AtomicU64,
}

impl std::fmt::Debug for MockSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSession")
            .field("state", &*self.state_tx.borrow())
            .field("read_count", &self.read_count.load(Ordering::Relaxed))
            .field("write_count", &self.write_count.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MockSession {
    /// Create a mock answering every index from the default record
    /// generator.
    pub fn new() -> Self {
        MockSessionBuilder::new().build()
    }

    /// Start building a mock with custom behavior.
    pub fn builder() -> MockSessionBuilder {
        MockSessionBuilder::new()
    }

    /// Synthesize a plausible record for an index: one sample per 20
    /// minutes counting back from now, newest at the highest index.
    ///
    /// The requested index is echoed back as the offset, exactly as the
    /// firmware does, including `0xFFFF` for the most recent record.
    pub fn default_record(index: u16) -> SensorRecord {
        let slot = if index == CURRENT_RECORD_INDEX {
            RECORDS_PER_DAY - 1
        } else {
            index.min(RECORDS_PER_DAY - 1)
        };
        let age_slots = u32::from(RECORDS_PER_DAY - 1 - slot);
        let now = time::OffsetDateTime::now_utc().unix_timestamp() as u32;
        SensorRecord {
            offset: index,
            temperature: 20.0 + f32::from(slot) * 0.05,
            humidity: 50.0 + f32::from(slot % 10),
            timestamp: now - age_slots * 20 * 60,
        }
    }

    /// Number of characteristic reads performed.
    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::Relaxed)
    }

    /// Number of characteristic writes performed.
    pub fn write_count(&self) -> u32 {
        self.write_count.load(Ordering::Relaxed)
    }

    /// Snapshot of the operation log.
    pub fn operation_log(&self) -> Vec<OpSpan> {
        self.op_log.lock().expect("op log poisoned").clone()
    }

    /// Fail the next `count` reads with an initiation failure.
    pub fn set_transient_read_failures(&self, count: u32) {
        self.transient_read_failures
            .store(count, Ordering::Relaxed);
    }

    /// Make every write report as unacknowledged.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Make the next connect attempt end in `Disconnected`.
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::Relaxed);
    }

    fn check_connected(&self) -> Result<()> {
        if self.state_tx.borrow().is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn log_op(&self, kind: &'static str, started: Instant) {
        self.op_log.lock().expect("op log poisoned").push(OpSpan {
            kind,
            started,
            finished: Instant::now(),
        });
    }

    fn respond(&self) -> Vec<u8> {
        match &self.responder {
            Responder::Queue(queue) => queue
                .lock()
                .expect("queue poisoned")
                .pop_front()
                .unwrap_or_default(),
            Responder::Fn(generate) => {
                let index = self
                    .last_requested
                    .lock()
                    .expect("last_requested poisoned")
                    .unwrap_or(CURRENT_RECORD_INDEX);
                generate(index)
            }
        }
    }
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GattSession for MockSession {
    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    async fn connect(&self, _target: DeviceTarget, endpoint: GattEndpoint) {
        self.state_tx.send_replace(ConnectionState::Connecting);
        if self.fail_connect.load(Ordering::Relaxed) {
            self.state_tx.send_replace(ConnectionState::Disconnected);
            return;
        }
        {
            let mut resolved = self.resolved.write().await;
            resolved.clear();
            resolved.extend(endpoint.characteristics.iter().copied());
        }
        self.state_tx.send_replace(ConnectionState::Connected);
    }

    async fn disconnect(&self) {
        self.resolved.write().await.clear();
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }

    fn mark_no_device_selected(&self) {
        self.state_tx
            .send_replace(ConnectionState::NoDeviceSelected);
    }

    async fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>> {
        self.check_connected()?;
        if !self.resolved.read().await.contains(&uuid) {
            return Err(Error::UnknownCharacteristic { uuid });
        }

        self.serializer
            .run(async {
                let started = Instant::now();
                let latency = self.read_latency_ms.load(Ordering::Relaxed);
                if latency > 0 {
                    tokio::time::sleep(Duration::from_millis(latency)).await;
                }
                self.read_count.fetch_add(1, Ordering::Relaxed);

                let remaining = self.transient_read_failures.load(Ordering::Relaxed);
                if remaining > 0 {
                    self.transient_read_failures
                        .store(remaining - 1, Ordering::Relaxed);
                    self.log_op("read", started);
                    return Err(Error::initiation_failed("read", uuid, "injected failure"));
                }

                let payload = if uuid == RECORD_DATA {
                    self.respond()
                } else {
                    Vec::new()
                };
                self.log_op("read", started);
                Ok(payload)
            })
            .await
    }

    async fn write_characteristic(&self, uuid: Uuid, data: &[u8]) -> Result<bool> {
        self.check_connected()?;
        if !self.resolved.read().await.contains(&uuid) {
            return Ok(false);
        }

        self.serializer
            .run(async {
                let started = Instant::now();
                self.write_count.fetch_add(1, Ordering::Relaxed);

                if self.fail_writes.load(Ordering::Relaxed) {
                    self.log_op("write", started);
                    return Ok(false);
                }

                if uuid == RECORD_REQUEST && data.len() >= 2 {
                    let index = u16::from_le_bytes([data[0], data[1]]);
                    *self
                        .last_requested
                        .lock()
                        .expect("last_requested poisoned") = Some(index);
                }
                self.log_op("write", started);
                Ok(true)
            })
            .await
    }

    async fn start_scan(&self, _duration: Duration) -> Result<mpsc::Receiver<DeviceHandle>> {
        let (tx, rx) = mpsc::channel(32);
        let devices = self.discoverable.clone();
        tokio::spawn(async move {
            for device in devices {
                if tx.send(device).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn stop_scan(&self) {}
}

/// Builder for [`MockSession`].
#[derive(Default)]
#[must_use]
pub struct MockSessionBuilder {
    responder: Option<Responder>,
    discoverable: Vec<DeviceHandle>,
    read_latency_ms: u64,
    connected_endpoint: Option<GattEndpoint>,
}

impl MockSessionBuilder {
    /// Create a builder with default behavior.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer record reads by computing a payload from the last requested
    /// index.
    pub fn respond_with(mut self, generate: impl Fn(u16) -> Vec<u8> + Send + Sync + 'static) -> Self {
        self.responder = Some(Responder::Fn(Box::new(generate)));
        self
    }

    /// Answer record reads from a fixed queue of payloads.
    pub fn respond_from_queue(mut self, payloads: impl IntoIterator<Item = Vec<u8>>) -> Self {
        self.responder = Some(Responder::Queue(StdMutex::new(
            payloads.into_iter().collect(),
        )));
        self
    }

    /// Add artificial latency to every read.
    pub fn read_latency(mut self, latency: Duration) -> Self {
        self.read_latency_ms = latency.as_millis() as u64;
        self
    }

    /// Devices a scan should discover.
    pub fn discoverable(mut self, devices: impl IntoIterator<Item = DeviceHandle>) -> Self {
        self.discoverable = devices.into_iter().collect();
        self
    }

    /// Start in the connected state with `endpoint` already resolved.
    pub fn connected(mut self, endpoint: GattEndpoint) -> Self {
        self.connected_endpoint = Some(endpoint);
        self
    }

    /// Build the session.
    pub fn build(self) -> MockSession {
        let initial = if self.connected_endpoint.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        let (state_tx, _) = watch::channel(initial);
        let resolved = self
            .connected_endpoint
            .map(|endpoint| endpoint.characteristics.into_iter().collect())
            .unwrap_or_default();

        MockSession {
            state_tx,
            serializer: RequestSerializer::new(),
            resolved: RwLock::new(resolved),
            responder: self.responder.unwrap_or_else(|| {
                Responder::Fn(Box::new(|index| {
                    MockSession::default_record(index).to_bytes().to_vec()
                }))
            }),
            last_requested: StdMutex::new(None),
            op_log: StdMutex::new(Vec::new()),
            discoverable: self.discoverable,
            read_count: AtomicU32::new(0),
            write_count: AtomicU32::new(0),
            fail_connect: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            transient_read_failures: AtomicU32::new(0),
            read_latency_ms: AtomicU64::new(self.read_latency_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use greenhouse_types::record_endpoint;

    #[tokio::test]
    async fn test_read_requires_connection() {
        let session = MockSession::new();
        let err = session.read_characteristic(RECORD_DATA).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_connect_resolves_endpoint() {
        let session = MockSession::new();
        session
            .connect(
                DeviceTarget::Address("MOCK".to_string()),
                record_endpoint(),
            )
            .await;
        assert!(session.connection_state().borrow().is_connected());

        let payload = session.read_characteristic(RECORD_DATA).await.unwrap();
        assert!(!payload.is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_read_is_unknown_characteristic() {
        let session = MockSession::builder().connected(record_endpoint()).build();
        let bogus = uuid::Uuid::new_v4();
        let err = session.read_characteristic(bogus).await.unwrap_err();
        assert!(matches!(err, Error::UnknownCharacteristic { .. }));
    }

    #[tokio::test]
    async fn test_unresolved_write_reports_unacknowledged() {
        let session = MockSession::builder().connected(record_endpoint()).build();
        let bogus = uuid::Uuid::new_v4();
        let acknowledged = session.write_characteristic(bogus, &[0, 0]).await.unwrap();
        assert!(!acknowledged);
    }

    #[tokio::test]
    async fn test_responder_echoes_requested_index() {
        let session = MockSession::builder().connected(record_endpoint()).build();
        session
            .write_characteristic(RECORD_REQUEST, &greenhouse_types::encode_index(7))
            .await
            .unwrap();
        let payload = session.read_characteristic(RECORD_DATA).await.unwrap();
        let record = SensorRecord::from_bytes(&payload).unwrap().unwrap();
        assert_eq!(record.offset, 7);
    }

    #[tokio::test]
    async fn test_default_responder_echoes_current_index() {
        let session = MockSession::builder().connected(record_endpoint()).build();
        session
            .write_characteristic(
                RECORD_REQUEST,
                &greenhouse_types::encode_index(CURRENT_RECORD_INDEX),
            )
            .await
            .unwrap();
        let payload = session.read_characteristic(RECORD_DATA).await.unwrap();
        let record = SensorRecord::from_bytes(&payload).unwrap().unwrap();
        assert_eq!(record.offset, CURRENT_RECORD_INDEX);
    }

    #[tokio::test]
    async fn test_queue_responder_exhausts_to_empty() {
        let session = MockSession::builder()
            .respond_from_queue([MockSession::default_record(0).to_bytes().to_vec()])
            .connected(record_endpoint())
            .build();

        assert!(!session.read_characteristic(RECORD_DATA).await.unwrap().is_empty());
        assert!(session.read_characteristic(RECORD_DATA).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_read_failures_recover() {
        let session = MockSession::builder().connected(record_endpoint()).build();
        session.set_transient_read_failures(2);

        assert!(session.read_characteristic(RECORD_DATA).await.is_err());
        assert!(session.read_characteristic(RECORD_DATA).await.is_err());
        assert!(session.read_characteristic(RECORD_DATA).await.is_ok());
        assert_eq!(session.read_count(), 3);
    }

    #[tokio::test]
    async fn test_scan_yields_scripted_devices() {
        let session = MockSession::builder()
            .discoverable([
                DeviceHandle::new("AA:AA:AA:AA:AA:AA", "greenhouse-01"),
                DeviceHandle::new("BB:BB:BB:BB:BB:BB", "<unknown>"),
            ])
            .build();

        let mut rx = session.start_scan(Duration::from_secs(1)).await.unwrap();
        let mut found = Vec::new();
        while let Some(device) = rx.recv().await {
            found.push(device.address);
        }
        assert_eq!(found, vec!["AA:AA:AA:AA:AA:AA", "BB:BB:BB:BB:BB:BB"]);
    }
}
