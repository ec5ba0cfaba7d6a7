//! [`TickTimer`] backed by the deterministic scheduler.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;

use super::scheduler::{EventId, Scheduler, TunnelId};
use crate::tunnel::TickTimer;

/// Timer that registers its expiries as events on a shared [`Scheduler`].
///
/// The expiry is delivered back to the tunnel by whoever pops the event
/// (normally [`TunnelSim`](super::TunnelSim)).
#[derive(Debug)]
pub struct SimTimer {
    scheduler: Arc<Mutex<Scheduler>>,
    tunnel: TunnelId,
    pending: Option<EventId>,
}

impl SimTimer {
    pub fn new(scheduler: Arc<Mutex<Scheduler>>, tunnel: TunnelId) -> Self {
        Self {
            scheduler,
            tunnel,
            pending: None,
        }
    }

    pub fn tunnel(&self) -> TunnelId {
        self.tunnel
    }
}

impl TickTimer for SimTimer {
    fn schedule(&mut self, delay: Duration) {
        let mut scheduler = self.scheduler.lock();
        if let Some(id) = self.pending.take() {
            scheduler.cancel(id);
        }
        self.pending = Some(scheduler.schedule_after(delay, self.tunnel));
    }

    fn cancel(&mut self) {
        if let Some(id) = self.pending.take() {
            self.scheduler.lock().cancel(id);
        }
    }

    fn is_pending(&self) -> bool {
        self.pending
            .is_some_and(|id| self.scheduler.lock().is_pending(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> Arc<Mutex<Scheduler>> {
        Arc::new(Mutex::new(Scheduler::new()))
    }

    #[test]
    fn test_schedule_replaces_pending_expiry() {
        let scheduler = shared();
        let mut timer = SimTimer::new(scheduler.clone(), TunnelId(1));

        timer.schedule(Duration::from_micros(100));
        timer.schedule(Duration::from_micros(300));
        assert!(timer.is_pending());
        assert_eq!(scheduler.lock().pending_count(), 1);

        let event = scheduler.lock().step().unwrap();
        assert_eq!(event.timestamp, 300_000);
        assert_eq!(event.tunnel, TunnelId(1));
        assert!(!timer.is_pending());
    }

    #[test]
    fn test_rearm_after_delivery_leaves_one_expiry() {
        let scheduler = shared();
        let mut timer = SimTimer::new(scheduler.clone(), TunnelId(3));

        for tick in 1..=3u64 {
            timer.schedule(Duration::from_micros(100));
            let event = scheduler.lock().step().unwrap();
            assert_eq!(event.timestamp, tick * 100_000);
            assert!(!timer.is_pending());
        }
        timer.schedule(Duration::from_micros(100));
        assert_eq!(scheduler.lock().pending_count(), 1);
        assert_eq!(scheduler.lock().next_event_time(), Some(400_000));
    }

    #[test]
    fn test_cancel_removes_expiry() {
        let scheduler = shared();
        let mut timer = SimTimer::new(scheduler.clone(), TunnelId(2));

        timer.cancel(); // idle cancel is harmless
        timer.schedule(Duration::ZERO);
        timer.cancel();
        assert!(!timer.is_pending());
        assert!(scheduler.lock().step().is_none());
    }
}
