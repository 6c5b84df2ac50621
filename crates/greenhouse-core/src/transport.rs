//! Bluetooth transport session.
//!
//! [`BleSession`] owns the adapter, the link to the sensor, and the
//! connection state channel. Connection attempts run in a background task so
//! `connect` returns immediately; the outcome is observable on the state
//! channel. All characteristic I/O is routed through a
//! [`RequestSerializer`](crate::pacing::RequestSerializer) so operations
//! never overlap and starts stay paced.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::Stream;
use futures::stream::StreamExt;
use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::pacing::RequestSerializer;
use crate::session::{DeviceHandle, DeviceTarget, GattSession};
use greenhouse_types::{ConnectionState, GattEndpoint};

/// Timeout for establishing a BLE connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for service discovery after connection.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for characteristic reads.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Completion wait for writes without response. An elapsed wait is reported
/// as an unacknowledged write, not an error.
const WRITE_COMPLETION_WAIT: Duration = Duration::from_secs(1);

/// Fallback scan attempts when connecting by an address the adapter does not
/// already know.
const RESOLVE_SCAN_ATTEMPTS: u32 = 3;

type EventStream = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

/// An established link: the peripheral plus the characteristics resolved
/// from the endpoint's service.
struct Link {
    peripheral: Peripheral,
    characteristics: HashMap<Uuid, Characteristic>,
}

#[derive(Default)]
struct TaskSet {
    connect: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
    scan: Option<JoinHandle<()>>,
}

struct SessionInner {
    adapter: Adapter,
    state_tx: watch::Sender<ConnectionState>,
    serializer: RequestSerializer,
    link: RwLock<Option<Link>>,
    // Guards are held only for handle swaps, never across an await.
    tasks: StdMutex<TaskSet>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for handle in [
                tasks.connect.take(),
                tasks.watcher.take(),
                tasks.scan.take(),
            ]
            .into_iter()
            .flatten()
            {
                handle.abort();
            }
        }
    }
}

/// The real Bluetooth transport session.
///
/// Cheap to clone; clones share the same adapter, link, and state channel.
#[derive(Clone)]
pub struct BleSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for BleSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleSession")
            .field("state", &*self.inner.state_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl BleSession {
    /// Create a session on the first available Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoAdapter`] when the host has no usable adapter.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::NoAdapter)?;
        Ok(Self::with_adapter(adapter))
    }

    /// Create a session on a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(SessionInner {
                adapter,
                state_tx,
                serializer: RequestSerializer::new(),
                link: RwLock::new(None),
                tasks: StdMutex::new(TaskSet::default()),
            }),
        }
    }

    fn abort_connect_tasks(&self) {
        let mut tasks = self.inner.tasks.lock().expect("task set poisoned");
        if let Some(handle) = tasks.connect.take() {
            handle.abort();
        }
        if let Some(handle) = tasks.watcher.take() {
            handle.abort();
        }
    }

    fn abort_scan_task(&self) {
        if let Some(handle) = self
            .inner
            .tasks
            .lock()
            .expect("task set poisoned")
            .scan
            .take()
        {
            handle.abort();
        }
    }
}

#[async_trait]
impl GattSession for BleSession {
    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    #[tracing::instrument(level = "info", skip_all, fields(target = %target.address()))]
    async fn connect(&self, target: DeviceTarget, endpoint: GattEndpoint) {
        self.abort_connect_tasks();
        self.inner
            .state_tx
            .send_replace(ConnectionState::Connecting);

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            match establish(&inner, target, endpoint).await {
                Ok(()) => {
                    info!("connected");
                    inner.state_tx.send_replace(ConnectionState::Connected);
                }
                Err(e) => {
                    warn!("connection attempt failed: {e}");
                    inner.link.write().await.take();
                    inner.state_tx.send_replace(ConnectionState::Disconnected);
                }
            }
        });
        self.inner.tasks.lock().expect("task set poisoned").connect = Some(handle);
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn disconnect(&self) {
        self.abort_scan_task();
        self.abort_connect_tasks();

        if let Some(link) = self.inner.link.write().await.take() {
            if let Err(e) = link.peripheral.disconnect().await {
                debug!("peripheral disconnect failed: {e}");
            }
        }
        self.inner
            .state_tx
            .send_replace(ConnectionState::Disconnected);
    }

    fn mark_no_device_selected(&self) {
        self.inner
            .state_tx
            .send_replace(ConnectionState::NoDeviceSelected);
    }

    async fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>> {
        let (peripheral, characteristic) = {
            let link = self.inner.link.read().await;
            let link = link.as_ref().ok_or(Error::NotConnected)?;
            let characteristic = link
                .characteristics
                .get(&uuid)
                .ok_or(Error::UnknownCharacteristic { uuid })?
                .clone();
            (link.peripheral.clone(), characteristic)
        };
        if !characteristic.properties.contains(CharPropFlags::READ) {
            return Err(Error::NotReadable { uuid });
        }

        let mut state = self.inner.state_tx.subscribe();
        self.inner
            .serializer
            .run(async {
                tokio::select! {
                    result = timeout(READ_TIMEOUT, peripheral.read(&characteristic)) => match result {
                        Ok(Ok(data)) => Ok(data),
                        Ok(Err(e)) => Err(Error::initiation_failed("read", uuid, e)),
                        Err(_) => Err(Error::timeout(format!("read characteristic {uuid}"), READ_TIMEOUT)),
                    },
                    // A lost link would otherwise leave the read suspended on
                    // a platform event that never fires.
                    _ = state.wait_for(|s| !s.is_connected()) => Err(Error::Cancelled),
                }
            })
            .await
    }

    async fn write_characteristic(&self, uuid: Uuid, data: &[u8]) -> Result<bool> {
        let (peripheral, characteristic) = {
            let link = self.inner.link.read().await;
            let link = link.as_ref().ok_or(Error::NotConnected)?;
            match link.characteristics.get(&uuid) {
                Some(characteristic) => (link.peripheral.clone(), characteristic.clone()),
                None => {
                    warn!(%uuid, "write requested for unresolved characteristic");
                    return Ok(false);
                }
            }
        };

        self.inner
            .serializer
            .run(async {
                match timeout(
                    WRITE_COMPLETION_WAIT,
                    peripheral.write(&characteristic, data, WriteType::WithoutResponse),
                )
                .await
                {
                    Ok(Ok(())) => Ok(true),
                    Ok(Err(e)) => {
                        warn!(%uuid, "write failed: {e}");
                        Ok(false)
                    }
                    Err(_) => {
                        let err = Error::WriteTimeout {
                            duration: WRITE_COMPLETION_WAIT,
                        };
                        warn!(%uuid, "{err}");
                        Ok(false)
                    }
                }
            })
            .await
    }

    #[tracing::instrument(level = "info", skip(self), fields(duration_secs = duration.as_secs()))]
    async fn start_scan(&self, duration: Duration) -> Result<mpsc::Receiver<DeviceHandle>> {
        self.abort_scan_task();

        self.inner.adapter.start_scan(ScanFilter::default()).await?;
        let events = self.inner.adapter.events().await?;
        let (tx, rx) = mpsc::channel(32);

        let adapter = self.inner.adapter.clone();
        let handle = tokio::spawn(run_scan(adapter, events, tx, duration));
        self.inner.tasks.lock().expect("task set poisoned").scan = Some(handle);
        Ok(rx)
    }

    async fn stop_scan(&self) {
        self.abort_scan_task();
        if let Err(e) = self.inner.adapter.stop_scan().await {
            debug!("stop_scan failed: {e}");
        }
    }
}

/// Forward discovery events until the deadline passes or the receiver is
/// dropped, then stop the radio scan.
async fn run_scan(
    adapter: Adapter,
    mut events: EventStream,
    tx: mpsc::Sender<DeviceHandle>,
    duration: Duration,
) {
    let deadline = tokio::time::Instant::now() + duration;
    loop {
        tokio::select! {
            _ = sleep_until(deadline) => break,
            _ = tx.closed() => break,
            event = events.next() => match event {
                Some(CentralEvent::DeviceDiscovered(id)) => {
                    if let Some(handle) = discovered_handle(&adapter, &id).await {
                        debug!(address = %handle.address, name = %handle.name, "discovered device");
                        if tx.send(handle).await.is_err() {
                            break;
                        }
                    }
                }
                Some(_) => {}
                None => break,
            },
        }
    }
    if let Err(e) = adapter.stop_scan().await {
        debug!("stop_scan failed: {e}");
    }
    info!("scan finished");
}

async fn discovered_handle(adapter: &Adapter, id: &PeripheralId) -> Option<DeviceHandle> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok()??;
    let name = properties
        .local_name
        .unwrap_or_else(|| "<unknown>".to_string());
    let address = peripheral_identifier(&properties.address.to_string(), id);
    Some(DeviceHandle::with_peripheral(address, name, peripheral))
}

/// Resolve the target, connect, discover, and populate the link. The caller
/// flips the state channel based on the result.
async fn establish(
    inner: &Arc<SessionInner>,
    target: DeviceTarget,
    endpoint: GattEndpoint,
) -> Result<()> {
    let peripheral = resolve_target(&inner.adapter, target).await?;

    info!("connecting...");
    timeout(CONNECT_TIMEOUT, peripheral.connect())
        .await
        .map_err(|_| Error::timeout("connect to device", CONNECT_TIMEOUT))??;

    debug!("discovering services...");
    timeout(DISCOVERY_TIMEOUT, peripheral.discover_services())
        .await
        .map_err(|_| Error::timeout("discover services", DISCOVERY_TIMEOUT))??;

    let mut characteristics = HashMap::new();
    for service in peripheral.services() {
        if service.uuid != endpoint.service {
            continue;
        }
        for characteristic in &service.characteristics {
            debug!("  characteristic: {}", characteristic.uuid);
            characteristics.insert(characteristic.uuid, characteristic.clone());
        }
    }
    for uuid in &endpoint.characteristics {
        if !characteristics.contains_key(uuid) {
            return Err(Error::UnknownCharacteristic { uuid: *uuid });
        }
    }

    // Watch for link loss so suspended operations get cancelled and
    // observers see the transition.
    let events = inner.adapter.events().await?;
    let watcher = tokio::spawn(watch_link(Arc::clone(inner), peripheral.id(), events));
    inner
        .tasks
        .lock()
        .expect("task set poisoned")
        .watcher
        .replace(watcher);

    *inner.link.write().await = Some(Link {
        peripheral,
        characteristics,
    });
    Ok(())
}

async fn watch_link(inner: Arc<SessionInner>, id: PeripheralId, mut events: EventStream) {
    while let Some(event) = events.next().await {
        if let CentralEvent::DeviceDisconnected(gone) = event
            && gone == id
        {
            warn!("link lost");
            inner.link.write().await.take();
            inner.state_tx.send_replace(ConnectionState::Disconnected);
            return;
        }
    }
}

/// Resolve a connect target to a peripheral: use the scan-provided handle if
/// present, then the adapter's known peripherals, then bounded fallback
/// scans with increasing durations.
async fn resolve_target(adapter: &Adapter, target: DeviceTarget) -> Result<Peripheral> {
    if let DeviceTarget::Handle(DeviceHandle {
        peripheral: Some(peripheral),
        ..
    }) = &target
    {
        return Ok(peripheral.clone());
    }

    let address = target.address().to_string();
    if let Some(peripheral) = known_peripheral(adapter, &address).await? {
        debug!("found device among known peripherals (no scan needed)");
        return Ok(peripheral);
    }

    for attempt in 1..=RESOLVE_SCAN_ATTEMPTS {
        let scan_duration = Duration::from_secs(2) * attempt;
        info!(
            "scan attempt {}/{} ({}s)...",
            attempt,
            RESOLVE_SCAN_ATTEMPTS,
            scan_duration.as_secs()
        );

        adapter.start_scan(ScanFilter::default()).await?;
        sleep(scan_duration).await;
        adapter.stop_scan().await?;

        if let Some(peripheral) = known_peripheral(adapter, &address).await? {
            return Ok(peripheral);
        }
    }

    warn!("device not found: {address}");
    Err(Error::device_not_found(address))
}

/// Search the adapter's known peripherals for one matching the identifier,
/// by peripheral ID (macOS) or Bluetooth address (Linux/Windows).
async fn known_peripheral(adapter: &Adapter, identifier: &str) -> Result<Option<Peripheral>> {
    let wanted = identifier.to_lowercase().replace(':', "");

    for peripheral in adapter.peripherals().await? {
        let id = format!("{:?}", peripheral.id()).to_lowercase();
        if id.contains(&wanted) {
            return Ok(Some(peripheral));
        }

        if let Ok(Some(properties)) = peripheral.properties().await {
            let address = properties.address.to_string().to_lowercase();
            if address != "00:00:00:00:00:00" && address.replace(':', "") == wanted {
                return Ok(Some(peripheral));
            }
        }
    }
    Ok(None)
}

/// Pick the stable identifier for a peripheral: its address where the
/// platform exposes one, the peripheral ID on macOS where it does not.
fn peripheral_identifier(address: &str, id: &PeripheralId) -> String {
    if address == "00:00:00:00:00:00" {
        format!("{:?}", id)
            .trim_start_matches("PeripheralId(")
            .trim_end_matches(')')
            .to_string()
    } else {
        address.to_string()
    }
}
