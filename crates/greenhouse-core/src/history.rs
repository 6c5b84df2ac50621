//! History post-processing.
//!
//! Pure functions over downloaded records, independent of the protocol
//! state machine: trailing-window filtering and segmentation into
//! contiguous series for plotting.

use time::{Duration, OffsetDateTime};

use greenhouse_types::SensorRecord;

/// Trailing window of history the orchestrator exposes.
pub const HISTORY_WINDOW: Duration = Duration::days(30);

/// Maximum gap between consecutive records in one plotted series. The
/// sensor samples every 20 minutes, so anything beyond 25 minutes means at
/// least one sample is missing.
pub const SERIES_GAP: Duration = Duration::minutes(25);

/// Keep records whose capture time falls within the trailing `window`
/// ending at `now`, preserving order.
#[must_use]
pub fn filter_window(
    records: &[SensorRecord],
    window: Duration,
    now: OffsetDateTime,
) -> Vec<SensorRecord> {
    let cutoff = now - window;
    records
        .iter()
        .copied()
        .filter(|record| record.date() > cutoff)
        .collect()
}

/// Partition an ordered sequence into maximal runs where consecutive
/// records are at most `max_gap` apart.
///
/// The record that opens a new run belongs to that run. Empty runs are
/// never produced; an empty input yields no runs.
#[must_use]
pub fn split_series(records: &[SensorRecord], max_gap: Duration) -> Vec<Vec<SensorRecord>> {
    let mut runs = Vec::new();
    let mut current: Vec<SensorRecord> = Vec::new();

    for &record in records {
        if let Some(previous) = current.last() {
            let gap = (record.date() - previous.date()).abs();
            if gap > max_gap {
                runs.push(std::mem::take(&mut current));
            }
        }
        current.push(record);
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}
