//! GATT request serialization and pacing.
//!
//! The sensor firmware services one GATT operation at a time and drops
//! requests that arrive back to back. Every characteristic read and write in
//! a session goes through one [`RequestSerializer`], which holds a critical
//! section for the duration of the operation and keeps consecutive
//! operation starts at least [`MIN_REQUEST_SPACING`] apart.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};

/// Minimum spacing between the starts of consecutive GATT operations.
pub const MIN_REQUEST_SPACING: Duration = Duration::from_millis(10);

/// Serializes GATT operations and paces their starts.
///
/// Callers suspend until their turn comes; nothing is ever rejected. The
/// internal mutex guard is held across the whole operation, so no two
/// operations routed through the same serializer can overlap.
#[derive(Debug)]
pub struct RequestSerializer {
    last_start: Mutex<Option<Instant>>,
    spacing: Duration,
}

impl RequestSerializer {
    /// Create a serializer with the default [`MIN_REQUEST_SPACING`].
    pub fn new() -> Self {
        Self::with_spacing(MIN_REQUEST_SPACING)
    }

    /// Create a serializer with custom spacing.
    pub fn with_spacing(spacing: Duration) -> Self {
        Self {
            last_start: Mutex::new(None),
            spacing,
        }
    }

    /// Run `op` inside the critical section.
    ///
    /// If the previous operation started less than the configured spacing
    /// ago, the start of `op` is delayed to honor it.
    pub async fn run<F, T>(&self, op: F) -> T
    where
        F: Future<Output = T>,
    {
        let mut last_start = self.last_start.lock().await;
        if let Some(previous) = *last_start {
            sleep_until(previous + self.spacing).await;
        }
        *last_start = Some(Instant::now());
        op.await
    }
}

impl Default for RequestSerializer {
    fn default() -> Self {
        Self::new()
    }
}
