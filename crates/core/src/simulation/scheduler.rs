//! Deterministic timer scheduler for simulation.
//!
//! Expiries are delivered in a total order:
//! 1. Event timestamp (earlier first)
//! 2. Tunnel id (for same timestamp)
//! 3. Event ID (registration order)
//!
//! Cancelled expiries are dropped lazily: they stay in the heap until they
//! surface and are discarded then, so a cancel never scans the heap.

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashSet},
    fmt,
    time::Duration,
};

use super::time::{TimeSource, VirtualTime};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

impl EventId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Identifies the tunnel a timer event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TunnelId(pub u64);

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tunnel#{}", self.0)
    }
}

/// A scheduled timer expiry.
#[derive(Debug, Clone)]
pub struct Event {
    /// When this event should be processed (virtual nanos)
    pub timestamp: u64,
    /// Unique identifier for ordering ties
    pub id: EventId,
    /// Tunnel whose timer expires
    pub tunnel: TunnelId,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: reverse ordering so smallest timestamp comes first
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| other.tunnel.cmp(&self.tunnel))
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Deterministic event scheduler driving tunnel timers.
///
/// Stands in for the global simulation clock: timers register expiries here
/// and a driver pops them in order, advancing [`VirtualTime`] as it goes.
pub struct Scheduler {
    time: VirtualTime,
    heap: BinaryHeap<Event>,
    /// Ids scheduled and neither delivered nor cancelled.
    live: HashSet<EventId>,
    next_event_id: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            time: VirtualTime::new(),
            heap: BinaryHeap::new(),
            live: HashSet::new(),
            next_event_id: 0,
        }
    }

    /// Returns a reference to the virtual time.
    pub fn time(&self) -> &VirtualTime {
        &self.time
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn now(&self) -> u64 {
        self.time.now_nanos()
    }

    /// Returns the number of expiries still due.
    pub fn pending_count(&self) -> usize {
        self.live.len()
    }

    pub fn is_pending(&self, id: EventId) -> bool {
        self.live.contains(&id)
    }

    /// Schedules an event at the given absolute timestamp.
    pub fn schedule_at(&mut self, timestamp: u64, tunnel: TunnelId) -> EventId {
        let id = EventId(self.next_event_id);
        self.next_event_id += 1;
        self.heap.push(Event {
            timestamp,
            id,
            tunnel,
        });
        self.live.insert(id);
        id
    }

    /// Schedules an event after the given delay from now.
    pub fn schedule_after(&mut self, delay: Duration, tunnel: TunnelId) -> EventId {
        let timestamp = self.now().saturating_add(delay.as_nanos() as u64);
        self.schedule_at(timestamp, tunnel)
    }

    /// Cancels a pending event by ID.
    ///
    /// Returns false if the event was already delivered or cancelled.
    pub fn cancel(&mut self, id: EventId) -> bool {
        if !self.live.remove(&id) {
            return false;
        }
        self.discard_cancelled();
        true
    }

    /// Returns the timestamp of the next pending event, if any.
    pub fn next_event_time(&self) -> Option<u64> {
        self.heap.peek().map(|e| e.timestamp)
    }

    /// Pops the next pending event, advancing time to its timestamp.
    pub fn step(&mut self) -> Option<Event> {
        let event = self.heap.pop()?;
        self.live.remove(&event.id);
        self.discard_cancelled();
        self.time.advance_to(event.timestamp);
        tracing::trace!(
            timestamp = event.timestamp,
            id = event.id.0,
            tunnel = %event.tunnel,
            "Processing timer event"
        );
        Some(event)
    }

    /// Pops the next event only if it is due at or before `target_time`.
    pub fn step_until(&mut self, target_time: u64) -> Option<Event> {
        match self.next_event_time() {
            Some(next) if next <= target_time => self.step(),
            _ => None,
        }
    }

    /// Advances time to `target_time` without processing anything.
    pub fn advance_to(&mut self, target_time: u64) {
        self.time.advance_to(target_time);
    }

    /// Keeps the heap top live, so `peek` always sees a deliverable event.
    fn discard_cancelled(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.live.contains(&top.id) {
                break;
            }
            self.heap.pop();
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("now", &self.now())
            .field("pending_count", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_basic() {
        let mut scheduler = Scheduler::new();

        scheduler.schedule_at(100, TunnelId(1));
        scheduler.schedule_at(50, TunnelId(1));
        scheduler.schedule_at(200, TunnelId(1));

        // Should process in timestamp order
        assert_eq!(scheduler.step().unwrap().timestamp, 50);
        assert_eq!(scheduler.step().unwrap().timestamp, 100);
        assert_eq!(scheduler.step().unwrap().timestamp, 200);
        assert!(scheduler.step().is_none());
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn test_scheduler_time_advancement() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_after(Duration::from_micros(1), TunnelId(7));

        assert_eq!(scheduler.now(), 0);
        scheduler.step();
        assert_eq!(scheduler.now(), 1_000);
    }

    #[test]
    fn test_scheduler_same_time_ordering() {
        let mut scheduler = Scheduler::new();

        scheduler.schedule_at(100, TunnelId(3));
        scheduler.schedule_at(100, TunnelId(1));
        scheduler.schedule_at(100, TunnelId(2));
        scheduler.schedule_at(100, TunnelId(1));

        let order: Vec<_> = std::iter::from_fn(|| scheduler.step())
            .map(|e| (e.tunnel.0, e.id.as_u64()))
            .collect();
        // Tunnel id first, then registration order
        assert_eq!(order, vec![(1, 1), (1, 3), (2, 2), (3, 0)]);
    }

    #[test]
    fn test_scheduler_cancel() {
        let mut scheduler = Scheduler::new();

        let id1 = scheduler.schedule_at(100, TunnelId(1));
        scheduler.schedule_at(200, TunnelId(1));

        assert!(scheduler.is_pending(id1));
        assert!(scheduler.cancel(id1));
        assert!(!scheduler.cancel(id1)); // Already cancelled
        assert!(!scheduler.is_pending(id1));
        assert_eq!(scheduler.next_event_time(), Some(200));

        let e = scheduler.step().unwrap();
        assert_eq!(e.timestamp, 200); // Should skip to second event
    }

    #[test]
    fn test_cancel_after_delivery_is_a_noop() {
        let mut scheduler = Scheduler::new();
        let fired = scheduler.schedule_at(100, TunnelId(1));
        scheduler.schedule_at(300, TunnelId(2));

        assert_eq!(scheduler.step().unwrap().id, fired);
        assert!(!scheduler.is_pending(fired));
        assert!(!scheduler.cancel(fired));
        assert_eq!(scheduler.pending_count(), 1);
        assert_eq!(scheduler.step().unwrap().timestamp, 300);
    }

    #[test]
    fn test_cancelled_events_buried_in_heap_are_skipped() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_at(100, TunnelId(1));
        let buried = scheduler.schedule_at(200, TunnelId(1));
        scheduler.schedule_at(300, TunnelId(1));

        assert!(scheduler.cancel(buried));
        assert_eq!(scheduler.pending_count(), 2);

        let order: Vec<_> = std::iter::from_fn(|| scheduler.step())
            .map(|e| e.timestamp)
            .collect();
        assert_eq!(order, vec![100, 300]);
        assert_eq!(scheduler.next_event_time(), None);
    }

    #[test]
    fn test_scheduler_step_until() {
        let mut scheduler = Scheduler::new();
        for i in 1..=5 {
            scheduler.schedule_at(i * 100, TunnelId(1));
        }

        let mut processed = 0;
        while scheduler.step_until(250).is_some() {
            processed += 1;
        }
        scheduler.advance_to(250);
        assert_eq!(processed, 2); // Events at 100 and 200
        assert_eq!(scheduler.now(), 250);
        assert_eq!(scheduler.pending_count(), 3); // Events at 300, 400, 500
    }
}
