//! Observable tunnel values.
//!
//! Each traced value sits behind a [`tokio::sync::watch`] channel. Monitors
//! subscribe and see a change notification only when a write actually moved
//! the value; writing the same value again is silent.

use std::fmt;

use tokio::sync::watch;

/// The tunnel values that can be observed from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Marked-fraction estimate.
    Alpha,
    /// Share assigned by the outer scheduler.
    Weight,
    /// Aggregated demand of the tunnel's flows.
    WeightRequest,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Alpha => write!(f, "alpha"),
            Signal::Weight => write!(f, "weight"),
            Signal::WeightRequest => write!(f, "weight-request"),
        }
    }
}

/// A value that notifies subscribers whenever it changes.
pub struct Traced<T> {
    tx: watch::Sender<T>,
}

impl<T: Copy + PartialEq> Traced<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn get(&self) -> T {
        *self.tx.borrow()
    }

    /// Stores `value`; returns whether it differed from the previous one.
    pub fn set(&self, value: T) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T: Copy + PartialEq + fmt::Debug> fmt::Debug for Traced<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Traced").field(&self.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_notifies_only_on_change() {
        let traced = Traced::new(1.0);
        let mut rx = traced.subscribe();
        assert!(!rx.has_changed().unwrap());

        assert!(!traced.set(1.0));
        assert!(!rx.has_changed().unwrap());

        assert!(traced.set(0.5));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 0.5);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_set_without_subscribers_still_stores() {
        let traced = Traced::new(0.0);
        assert!(traced.set(3.0));
        assert_eq!(traced.get(), 3.0);
    }

    #[test]
    fn test_dropping_traced_closes_receivers() {
        let traced = Traced::new(0.0);
        let rx = traced.subscribe();
        drop(traced);
        assert!(rx.has_changed().is_err());
    }
}
