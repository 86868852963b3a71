//! Sample callback bridge.
//!
//! Capture hardware delivers buffers on its own thread, at its own cadence. The
//! renderer polls once per frame. `SampleBridge` sits between the two: the hardware
//! side publishes the newest sample, the render side reads snapshots of it.
//!
//! The bridge:
//! - Stamps each buffer with a 100-ns tick timestamp
//! - Keeps only the most recent sample (no queue, no eviction policy)
//! - Swaps timestamp and payload together under one lock
//! - Stops accepting writes once closed
//!
//! Reads never wait for a future sample. Before the first sample they return
//! [`NO_TIMESTAMP`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Instant;

use crate::format::TICKS_PER_SECOND;

/// Timestamp reported when no sample has arrived.
pub const NO_TIMESTAMP: i64 = -1;

/// Receiver for buffers delivered by a capture stage.
///
/// Implementations are called from the hardware thread and must not block.
pub trait SampleSink: Send + Sync {
    /// A buffer stamped by the device, in 100-ns ticks.
    fn on_sample(&self, timestamp: i64, data: &[u8]);

    /// A buffer without a device timestamp; stamped on arrival.
    fn on_buffer(&self, data: &[u8]) {
        self.on_sample(now_ticks(), data);
    }
}

/// One captured frame plus its capture timestamp.
///
/// Cloning is cheap: the payload is shared.
#[derive(Clone, Debug)]
pub struct FrameSample {
    /// Capture time in 100-ns ticks.
    pub timestamp: i64,
    /// 1-based count of samples accepted by the bridge.
    pub frame_index: u64,
    payload: Arc<[u8]>,
}

impl FrameSample {
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Ticks elapsed on a process-wide monotonic clock.
pub fn now_ticks() -> i64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let elapsed = EPOCH.get_or_init(Instant::now).elapsed();
    let ticks = elapsed.as_nanos() / (1_000_000_000 / TICKS_PER_SECOND as u128);
    i64::try_from(ticks).unwrap_or(i64::MAX)
}

#[derive(Default)]
struct Published {
    latest: Option<FrameSample>,
    closed: bool,
}

/// Counters for a bridge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub frames_received: u64,
    pub frames_dropped: u64,
}

/// Single-writer, multi-reader cell holding the newest sample.
pub struct SampleBridge {
    published: Mutex<Published>,
    expected_size: Option<usize>,
    received: AtomicU64,
    dropped: AtomicU64,
}

impl SampleBridge {
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Published::default()),
            expected_size: None,
            received: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Bridge that drops buffers whose length differs from `size`.
    pub fn with_expected_size(size: usize) -> Self {
        Self {
            expected_size: Some(size),
            ..Self::new()
        }
    }

    fn lock(&self) -> MutexGuard<'_, Published> {
        // A panicking reader must not wedge the hardware thread.
        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish a buffer captured at `timestamp`.
    ///
    /// Timestamps never go backwards: an older stamp is raised to the previous one.
    /// Returns false when the buffer was dropped (closed bridge or wrong size).
    pub fn publish(&self, timestamp: i64, data: &[u8]) -> bool {
        if let Some(expected) = self.expected_size {
            if data.len() != expected {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "SampleBridge: dropped {} byte buffer, expected {}",
                    data.len(),
                    expected
                );
                return false;
            }
        }

        // Copy outside the critical section.
        let payload: Arc<[u8]> = Arc::from(data);

        let mut published = self.lock();
        if published.closed {
            return false;
        }
        let floor = published
            .latest
            .as_ref()
            .map_or(NO_TIMESTAMP, |sample| sample.timestamp);
        let frame_index = self.received.fetch_add(1, Ordering::AcqRel) + 1;
        published.latest = Some(FrameSample {
            timestamp: timestamp.max(floor),
            frame_index,
            payload,
        });
        true
    }

    /// Snapshot of the newest sample. Does not consume it.
    pub fn latest(&self) -> Option<FrameSample> {
        self.lock().latest.clone()
    }

    /// Timestamp of the newest sample, or [`NO_TIMESTAMP`].
    pub fn timestamp(&self) -> i64 {
        self.lock()
            .latest
            .as_ref()
            .map_or(NO_TIMESTAMP, |sample| sample.timestamp)
    }

    /// True once a sample has arrived and the bridge is still open.
    pub fn is_enabled(&self) -> bool {
        let published = self.lock();
        !published.closed && published.latest.is_some()
    }

    /// Count of samples accepted so far.
    pub fn frames_received(&self) -> u64 {
        self.received.load(Ordering::Acquire)
    }

    /// Stop accepting samples and drop the held payload.
    ///
    /// After `close` returns, no further write lands in the bridge.
    pub fn close(&self) {
        let mut published = self.lock();
        published.closed = true;
        published.latest = None;
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            frames_received: self.received.load(Ordering::Acquire),
            frames_dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for SampleBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSink for SampleBridge {
    fn on_sample(&self, timestamp: i64, data: &[u8]) {
        self.publish(timestamp, data);
    }
}
