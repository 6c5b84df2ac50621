//! Session orchestrator.
//!
//! [`SensorHub`] ties the pieces together: it owns the transport session,
//! the record client, and the persisted device selection, and exposes the
//! operations an application calls. Connection management is lazy: reading
//! triggers a connect from the persisted address when no link exists, and a
//! missing selection surfaces as
//! [`NoDeviceSelected`](ConnectionState::NoDeviceSelected) with no radio
//! activity at all.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::history::{HISTORY_WINDOW, filter_window};
use crate::records::{HistoryOptions, RecordClient};
use crate::session::{DeviceHandle, DeviceTarget, GattSession};
use crate::store::AddressStore;
use greenhouse_types::{
    CURRENT_RECORD_INDEX, ConnectionState, RECORDS_PER_DAY, SensorRecord, record_endpoint,
};

/// High-level entry point over a session, a record client, and a device
/// store.
pub struct SensorHub<S> {
    session: Arc<S>,
    client: Arc<RecordClient<S>>,
    store: Arc<dyn AddressStore>,
}

impl<S> Clone for SensorHub<S> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            client: Arc::clone(&self.client),
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> std::fmt::Debug for SensorHub<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorHub").finish_non_exhaustive()
    }
}

impl<S: GattSession + 'static> SensorHub<S> {
    /// Create a hub over a session and an address store.
    pub fn new(session: Arc<S>, store: Arc<dyn AddressStore>) -> Self {
        let client = Arc::new(RecordClient::new(Arc::clone(&session)));
        Self {
            session,
            client,
            store,
        }
    }

    /// Subscribe to connection state transitions.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.session.connection_state()
    }

    /// Scan for nearby devices for `duration`.
    pub async fn scan_for_devices(
        &self,
        duration: Duration,
    ) -> Result<mpsc::Receiver<DeviceHandle>> {
        self.session.start_scan(duration).await
    }

    /// Connect to an explicitly chosen device, or to the persisted one when
    /// `device` is `None`.
    ///
    /// An explicit choice is persisted before connecting so the next run
    /// reconnects without a scan. Already connecting or connected, this is
    /// a no-op. With nothing chosen and nothing persisted, the state moves
    /// to [`NoDeviceSelected`](ConnectionState::NoDeviceSelected) and no
    /// GATT traffic happens.
    #[tracing::instrument(level = "debug", skip_all, fields(explicit = device.is_some()))]
    pub async fn connect(
        &self,
        device: Option<DeviceHandle>,
    ) -> Result<watch::Receiver<ConnectionState>> {
        let state = self.session.connection_state();
        let current = *state.borrow();
        match current {
            ConnectionState::Connected | ConnectionState::Connecting => return Ok(state),
            ConnectionState::Disconnected | ConnectionState::NoDeviceSelected => {}
            _ => {}
        }

        if let Some(device) = device {
            self.store.save(&device.address).await?;
            self.session
                .connect(DeviceTarget::Handle(device), record_endpoint())
                .await;
        } else if let Some(address) = self.store.load().await? {
            debug!(%address, "connecting to persisted device");
            self.session
                .connect(DeviceTarget::Address(address), record_endpoint())
                .await;
        } else {
            debug!("no device selected and none persisted");
            self.session.mark_no_device_selected();
        }
        Ok(self.session.connection_state())
    }

    /// Tear down the link.
    pub async fn disconnect(&self) {
        self.session.disconnect().await;
    }

    /// Connect if needed and wait for the attempt to settle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] when no device is selected or the
    /// attempt ends in `Disconnected`.
    async fn await_connected(&self) -> Result<()> {
        let mut state = self.connect(None).await?;
        loop {
            match *state.borrow_and_update() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::NoDeviceSelected | ConnectionState::Disconnected => {
                    return Err(Error::NotConnected);
                }
                ConnectionState::Connecting => {}
                _ => {}
            }
            state.changed().await.map_err(|_| Error::Cancelled)?;
        }
    }

    /// Read the most recent record.
    ///
    /// Every failure degrades to `None`: connecting failed, no device was
    /// ever selected, the sensor holds no records yet, or the read itself
    /// failed.
    pub async fn current_record(&self) -> Option<SensorRecord> {
        if let Err(e) = self.await_connected().await {
            warn!("current record unavailable: {e}");
            return None;
        }
        match self.client.read_record(CURRENT_RECORD_INDEX).await {
            Ok(record) => record,
            Err(e) => {
                warn!("current record read failed: {e}");
                None
            }
        }
    }

    /// Stream a day's worth of history as growing snapshots.
    ///
    /// Each snapshot is the accumulated download so far, filtered to the
    /// trailing [`HISTORY_WINDOW`]. The channel closes when the walk
    /// finishes; a failed connect yields a stream that closes without
    /// emitting.
    pub fn record_history(&self) -> mpsc::Receiver<Vec<SensorRecord>> {
        // One snapshot per index; capacity covers a full walk even if the
        // receiver never polls.
        let (tx, rx) = mpsc::channel(usize::from(RECORDS_PER_DAY) + 1);
        let hub = self.clone();

        tokio::spawn(async move {
            if let Err(e) = hub.await_connected().await {
                warn!("history unavailable: {e}");
                return;
            }

            let snapshot_tx = tx.clone();
            let options = HistoryOptions::new().with_snapshot(move |records: &[SensorRecord]| {
                let visible = filter_window(records, HISTORY_WINDOW, OffsetDateTime::now_utc());
                if snapshot_tx.try_send(visible).is_err() {
                    debug!("history snapshot dropped, receiver gone or lagging");
                }
            });

            if let Err(e) = hub.client.request_records(RECORDS_PER_DAY, options).await {
                warn!("history download failed: {e}");
            }
        });

        rx
    }
}
