//! Time abstraction layer for deterministic simulation.
//!
//! This module provides:
//! - `TimeSource` trait for abstracting "what time is it"
//! - `RealTime` implementation backed by a monotonic clock
//! - `VirtualTime` implementation that only moves when stepped

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

/// Abstraction over time supporting both real and virtual clocks.
pub trait TimeSource: Send + Sync + Clone + 'static {
    /// Returns the current time as nanoseconds since an arbitrary epoch.
    fn now_nanos(&self) -> u64;

    /// Returns the current time as a Duration since an arbitrary epoch.
    fn now(&self) -> Duration {
        Duration::from_nanos(self.now_nanos())
    }
}

/// Real-time implementation reading the monotonic clock.
#[derive(Clone)]
pub struct RealTime {
    epoch: std::time::Instant,
}

impl Default for RealTime {
    fn default() -> Self {
        Self::new()
    }
}

impl RealTime {
    pub fn new() -> Self {
        Self {
            epoch: std::time::Instant::now(),
        }
    }
}

impl TimeSource for RealTime {
    fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

/// Virtual time for deterministic simulation.
///
/// Time only advances when explicitly stepped via `advance()` or `advance_to()`.
/// Clones share the same clock, so a scheduler and the models it drives always
/// observe the same instant.
#[derive(Clone, Debug)]
pub struct VirtualTime {
    current_nanos: Arc<AtomicU64>,
}

impl Default for VirtualTime {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualTime {
    /// Creates a new virtual time starting at 0.
    pub fn new() -> Self {
        Self::with_initial_time(0)
    }

    /// Creates a new virtual time starting at the given nanoseconds.
    pub fn with_initial_time(initial_nanos: u64) -> Self {
        Self {
            current_nanos: Arc::new(AtomicU64::new(initial_nanos)),
        }
    }

    /// Advances time by the given duration.
    pub fn advance(&self, duration: Duration) {
        let target = self
            .current_nanos
            .load(Ordering::SeqCst)
            .saturating_add(duration.as_nanos() as u64);
        self.advance_to(target);
    }

    /// Advances time to the given absolute nanoseconds.
    ///
    /// Time never moves backwards; a target in the past is ignored and
    /// `false` is returned.
    pub fn advance_to(&self, target_nanos: u64) -> bool {
        self.current_nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (target_nanos > current).then_some(target_nanos)
            })
            .is_ok()
    }
}

impl TimeSource for VirtualTime {
    fn now_nanos(&self) -> u64 {
        self.current_nanos.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_time_starts_at_zero() {
        let vt = VirtualTime::new();
        assert_eq!(vt.now_nanos(), 0);
    }

    #[test]
    fn test_virtual_time_advance() {
        let vt = VirtualTime::new();
        vt.advance(Duration::from_secs(10));
        assert_eq!(vt.now_nanos(), 10_000_000_000);
        assert_eq!(vt.now(), Duration::from_secs(10));
    }

    #[test]
    fn test_virtual_time_never_goes_backwards() {
        let vt = VirtualTime::with_initial_time(1_000);
        assert!(!vt.advance_to(500));
        assert_eq!(vt.now_nanos(), 1_000);
        assert!(vt.advance_to(1_500));
        assert_eq!(vt.now_nanos(), 1_500);
    }

    #[test]
    fn test_clones_share_the_clock() {
        let vt = VirtualTime::new();
        let observer = vt.clone();
        vt.advance(Duration::from_micros(100));
        assert_eq!(observer.now_nanos(), 100_000);
    }

    #[test]
    fn test_real_time_basic() {
        let rt = RealTime::new();
        let t1 = rt.now_nanos();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = rt.now_nanos();
        assert!(t2 > t1);
    }
}
