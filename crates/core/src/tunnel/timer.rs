use std::time::Duration;

/// One-shot, resettable, cancellable timer driving a tunnel's control loop.
///
/// The tunnel never reads a clock itself: it asks its timer to fire once
/// after a delay, and whoever owns the clock calls [`Tunnel::on_timer`] when
/// that happens.
///
/// [`Tunnel::on_timer`]: super::Tunnel::on_timer
pub trait TickTimer: Send {
    /// Arms the timer to fire once after `delay`, replacing any pending expiry.
    fn schedule(&mut self, delay: Duration);

    /// Disarms the timer. Cancelling an idle timer is a no-op.
    fn cancel(&mut self);

    /// Whether an expiry is currently armed.
    fn is_pending(&self) -> bool;
}
