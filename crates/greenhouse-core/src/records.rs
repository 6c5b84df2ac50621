//! Record protocol engine.
//!
//! The sensor stages one record at a time: the host writes a 2-byte
//! little-endian index to the request characteristic, then reads the staged
//! record back from the data characteristic. The response echoes the
//! requested offset, which is how a stale answer (the previously staged
//! record still sitting in the characteristic) is detected.
//!
//! Stale answers and transient transport failures are retried with a small
//! backoff; running out of attempts means the record is reported absent,
//! never failed. A truncated frame is the one hard error, since it means
//! corruption rather than timing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::session::GattSession;
use greenhouse_types::uuids::{RECORD_DATA, RECORD_REQUEST};
use greenhouse_types::{SensorRecord, encode_index};

/// Total attempts (first try included) per record before it is reported
/// absent.
pub const MAX_READ_ATTEMPTS: u32 = 5;

/// Delay before retrying after a stale or failed attempt.
pub const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Callback invoked with the accumulated records after each history index.
pub type SnapshotCallback = Arc<dyn Fn(&[SensorRecord]) + Send + Sync>;

/// Options for a history download.
#[derive(Clone, Default)]
pub struct HistoryOptions {
    /// Snapshot callback (optional). Receives the accumulated prefix after
    /// every index, present or not, so consumers can render progress.
    pub snapshot_callback: Option<SnapshotCallback>,
}

impl std::fmt::Debug for HistoryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryOptions")
            .field("snapshot_callback", &self.snapshot_callback.is_some())
            .finish()
    }
}

impl HistoryOptions {
    /// Create options with no callback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the snapshot callback.
    #[must_use]
    pub fn with_snapshot(mut self, callback: impl Fn(&[SensorRecord]) + Send + Sync + 'static) -> Self {
        self.snapshot_callback = Some(Arc::new(callback));
        self
    }
}

/// What a single write-then-read attempt produced.
enum Attempt {
    /// The sensor answered for the requested index.
    Record(SensorRecord),
    /// The sensor has no record at that index.
    Absent,
    /// The sensor echoed a different offset than the one requested.
    Stale { got: u16 },
}

/// Client for the record staging protocol.
///
/// Two mutexes layer above the session's request serializer: `exchange`
/// keeps a whole write-read-retry sequence atomic so interleaved callers
/// cannot re-stage the characteristic mid-exchange, and `history` keeps a
/// full index walk atomic for the same reason.
pub struct RecordClient<S> {
    session: Arc<S>,
    exchange: Mutex<()>,
    history: Mutex<()>,
}

impl<S: GattSession> RecordClient<S> {
    /// Create a client over a session.
    pub fn new(session: Arc<S>) -> Self {
        Self {
            session,
            exchange: Mutex::new(()),
            history: Mutex::new(()),
        }
    }

    /// Read one record by index.
    ///
    /// Index [`CURRENT_RECORD_INDEX`](crate::CURRENT_RECORD_INDEX) asks for
    /// the most recent record; the sensor echoes `0xFFFF` back as its
    /// offset, so it takes the identical match-or-retry path.
    ///
    /// Returns `Ok(None)` when the sensor has no record at that index or
    /// when every attempt came back stale or failed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFrame`] for a truncated response frame.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn read_record(&self, index: u16) -> Result<Option<SensorRecord>> {
        let _exchange = self.exchange.lock().await;

        for attempt in 1..=MAX_READ_ATTEMPTS {
            if attempt > 1 {
                sleep(RETRY_DELAY).await;
            }
            match self.attempt_read(index).await {
                Ok(Attempt::Record(record)) => return Ok(Some(record)),
                Ok(Attempt::Absent) => return Ok(None),
                Ok(Attempt::Stale { got }) => {
                    debug!(index, got, attempt, "stale response, retrying");
                }
                Err(e @ Error::MalformedFrame { .. }) => return Err(e),
                Err(e) => {
                    warn!(index, attempt, "record read attempt failed: {e}");
                }
            }
        }

        debug!(index, "retry budget exhausted, reporting record absent");
        Ok(None)
    }

    async fn attempt_read(&self, index: u16) -> Result<Attempt> {
        let acknowledged = self
            .session
            .write_characteristic(RECORD_REQUEST, &encode_index(index))
            .await?;
        if !acknowledged {
            // The write may still have landed; the echoed offset check below
            // catches it if it did not.
            debug!(index, "request write unacknowledged, reading anyway");
        }

        let payload = self.session.read_characteristic(RECORD_DATA).await?;
        match SensorRecord::from_bytes(&payload)? {
            None => Ok(Attempt::Absent),
            Some(record) if record.offset == index => Ok(Attempt::Record(record)),
            Some(record) => Ok(Attempt::Stale { got: record.offset }),
        }
    }

    /// Download records for indices `0..count` in order.
    ///
    /// Absent and failed indices are skipped, so the result can be shorter
    /// than `count`. The snapshot callback, when set, fires after every
    /// index with the records accumulated so far. A repeated call walks the
    /// indices from the start again.
    #[tracing::instrument(level = "debug", skip(self, options))]
    pub async fn request_records(
        &self,
        count: u16,
        options: HistoryOptions,
    ) -> Result<Vec<SensorRecord>> {
        let _history = self.history.lock().await;

        let mut records = Vec::with_capacity(usize::from(count));
        for index in 0..count {
            match self.read_record(index).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => debug!(index, "no record stored"),
                Err(e) => warn!(index, "skipping record: {e}"),
            }
            if let Some(callback) = &options.snapshot_callback {
                callback(&records);
            }
        }

        debug!(
            requested = count,
            received = records.len(),
            "history walk complete"
        );
        Ok(records)
    }
}

impl<S> std::fmt::Debug for RecordClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordClient").finish_non_exhaustive()
    }
}
