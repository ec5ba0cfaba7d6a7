//! ECN feedback consumed by the tunnel once per interval.

use std::sync::Arc;

use parking_lot::Mutex;

/// Per-interval tally of ECN-marked versus total bytes.
///
/// The tunnel reads the tally at the end of every interval and then calls
/// [`reset`](EcnRecorder::reset).
pub trait EcnRecorder: Send {
    /// Marked bytes over total bytes. Must be `0.0` when no traffic was seen.
    fn marked_ratio(&self) -> f64;

    /// Bytes that carried a congestion mark during the interval.
    fn marked_bytes(&self) -> u64;

    /// Starts a new interval.
    fn reset(&mut self);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Tally {
    marked_bytes: u64,
    total_bytes: u64,
}

/// Byte counter shared between a tunnel and whatever observes the marks.
///
/// The tunnel owns the `EcnCounter`; the receiving side records observations
/// through an [`EcnFeedback`] obtained from [`EcnCounter::feedback`].
#[derive(Debug, Default)]
pub struct EcnCounter {
    tally: Arc<Mutex<Tally>>,
}

impl EcnCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feedback(&self) -> EcnFeedback {
        EcnFeedback {
            tally: Arc::clone(&self.tally),
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.tally.lock().total_bytes
    }
}

impl EcnRecorder for EcnCounter {
    fn marked_ratio(&self) -> f64 {
        let tally = *self.tally.lock();
        if tally.total_bytes == 0 {
            return 0.0;
        }
        tally.marked_bytes as f64 / tally.total_bytes as f64
    }

    fn marked_bytes(&self) -> u64 {
        self.tally.lock().marked_bytes
    }

    fn reset(&mut self) {
        *self.tally.lock() = Tally::default();
    }
}

/// Recording side of an [`EcnCounter`].
#[derive(Debug, Clone)]
pub struct EcnFeedback {
    tally: Arc<Mutex<Tally>>,
}

impl EcnFeedback {
    /// Records `bytes` delivered, `marked` of which carried a congestion mark.
    ///
    /// `marked` is capped at `bytes`.
    pub fn record(&self, bytes: u64, marked: u64) {
        let mut tally = self.tally.lock();
        tally.total_bytes = tally.total_bytes.saturating_add(bytes);
        tally.marked_bytes = tally.marked_bytes.saturating_add(marked.min(bytes));
    }

    /// Records one packet, marked or not.
    pub fn record_packet(&self, size: usize, ce_marked: bool) {
        let size = size as u64;
        self.record(size, if ce_marked { size } else { 0 });
    }

    /// Whether the owning counter is still alive.
    pub fn is_connected(&self) -> bool {
        Arc::strong_count(&self.tally) > 1
    }
}
