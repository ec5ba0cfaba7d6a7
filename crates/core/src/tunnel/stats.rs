//! Tunnel statistics and telemetry.

use super::{DataRate, TunnelState};

/// Snapshot of a tunnel's control state for monitoring and debugging.
#[derive(Debug, Clone, PartialEq)]
pub struct TunnelStats {
    /// Current marked-fraction estimate.
    pub alpha: f64,
    /// Rate budget for the current interval.
    pub rate: DataRate,
    /// Current slow-start threshold. May lie outside the rate bounds after a
    /// congestion event.
    pub rate_thresh: DataRate,
    /// Share assigned by the outer scheduler.
    pub weight: f64,
    /// Aggregated demand of the unfinished flows at the last tick.
    pub weight_request: f64,
    /// Bytes forwarded so far in the current interval.
    pub interval_bytes: u64,
    /// Bytes forwarded over the tunnel's lifetime.
    pub total_bytes: u64,
    /// Completed control ticks.
    pub ticks: u64,
    /// Ticks that took the multiplicative-decrease branch.
    pub congestion_events: u64,
    pub slow_start_ticks: u64,
    pub avoidance_ticks: u64,
    /// Flows in the table, finished or not.
    pub flows: usize,
    pub active_flows: usize,
    pub state: TunnelState,
}
