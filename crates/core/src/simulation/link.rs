//! Bottleneck link model with ECN marking.
//!
//! The link carries at most `capacity * window / 8` bytes per window. Bytes
//! beyond that are still delivered but carry a congestion mark, the way a
//! marking queue signals a standing backlog instead of dropping. Every
//! transmission is reported to the tunnel's [`EcnFeedback`].

use std::time::Duration;

use super::time::TimeSource;
use crate::tunnel::{DataRate, EcnFeedback};

/// Statistics about a simulated link.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    pub packets: u64,
    pub bytes: u64,
    pub marked_packets: u64,
    pub marked_bytes: u64,
    /// Windows in which at least one byte was marked.
    pub congested_windows: u64,
}

impl LinkStats {
    /// Fraction of carried bytes that were marked.
    pub fn marked_fraction(&self) -> f64 {
        if self.bytes == 0 {
            0.0
        } else {
            self.marked_bytes as f64 / self.bytes as f64
        }
    }
}

pub struct BottleneckLink<T: TimeSource> {
    capacity: DataRate,
    window: Duration,
    window_budget: u64,
    time: T,
    current_window: u64,
    window_bytes: u64,
    window_marked: bool,
    feedback: Vec<EcnFeedback>,
    stats: LinkStats,
}

impl<T: TimeSource> BottleneckLink<T> {
    /// A link of `capacity` whose queue is sampled every `window`.
    ///
    /// A zero `window` is treated as one nanosecond.
    pub fn new(capacity: DataRate, window: Duration, time: T) -> Self {
        let window = window.max(Duration::from_nanos(1));
        let current_window = time.now_nanos() / window.as_nanos() as u64;
        Self {
            capacity,
            window,
            window_budget: capacity.bytes_per(window),
            time,
            current_window,
            window_bytes: 0,
            window_marked: false,
            feedback: Vec::new(),
            stats: LinkStats::default(),
        }
    }

    /// Reports every transmission to `feedback` from now on.
    pub fn attach(&mut self, feedback: EcnFeedback) {
        self.feedback.push(feedback);
    }

    /// Forgets receivers whose tunnel has gone away.
    pub fn prune_detached(&mut self) -> usize {
        let before = self.feedback.len();
        self.feedback.retain(EcnFeedback::is_connected);
        before - self.feedback.len()
    }

    pub fn capacity(&self) -> DataRate {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Bytes the link carries unmarked per window.
    pub fn window_budget(&self) -> u64 {
        self.window_budget
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Carries `size` bytes; returns how many of them were marked.
    pub fn transmit(&mut self, size: usize) -> u64 {
        self.roll_window();

        let size = size as u64;
        let unmarked = self.window_budget.saturating_sub(self.window_bytes).min(size);
        let marked = size - unmarked;
        self.window_bytes = self.window_bytes.saturating_add(size);

        self.stats.packets += 1;
        self.stats.bytes += size;
        if marked > 0 {
            self.stats.marked_packets += 1;
            self.stats.marked_bytes += marked;
            if !self.window_marked {
                self.window_marked = true;
                self.stats.congested_windows += 1;
                tracing::trace!(
                    window = self.current_window,
                    budget = self.window_budget,
                    "Link over capacity, marking"
                );
            }
        }

        for feedback in &self.feedback {
            feedback.record(size, marked);
        }
        marked
    }

    fn roll_window(&mut self) {
        let window = self.time.now_nanos() / self.window.as_nanos() as u64;
        if window != self.current_window {
            self.current_window = window;
            self.window_bytes = 0;
            self.window_marked = false;
        }
    }
}

impl<T: TimeSource> std::fmt::Debug for BottleneckLink<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BottleneckLink")
            .field("capacity", &self.capacity)
            .field("window", &self.window)
            .field("window_bytes", &self.window_bytes)
            .field("stats", &self.stats)
            .finish()
    }
}
