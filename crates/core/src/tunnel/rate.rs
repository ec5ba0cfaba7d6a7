//! AIMD rate adaptation with a retreating slow-start threshold.
//!
//! Every interval the realised throughput of the interval that just ended is
//! turned into the next rate budget:
//!
//! | Condition                          | Candidate rate                      |
//! |------------------------------------|-------------------------------------|
//! | marked bytes seen                  | `(1 - alpha / 2) * throughput`      |
//! | no marks, `rate < rate_thresh`     | `(1 + weight) * throughput`         |
//! | no marks, `rate >= rate_thresh`    | `throughput + weight * increment`   |
//!
//! The candidate is then bounded to `[rate_min, rate_max]`. On a congestion
//! interval the threshold retreats to the candidate *before* the bound is
//! applied, so the threshold may end up outside `[rate_min, rate_max]`.

use std::fmt;
use std::time::Duration;

use super::DataRate;
use crate::config::TunnelConfig;

/// Which branch of the controller produced a rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrowthPhase {
    /// Marked bytes were seen: multiplicative decrease.
    Congestion,
    /// Below the threshold: multiplicative, weight-scaled growth.
    SlowStart,
    /// At or above the threshold: additive, weight-scaled growth.
    CongestionAvoidance,
}

impl fmt::Display for GrowthPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrowthPhase::Congestion => write!(f, "congestion"),
            GrowthPhase::SlowStart => write!(f, "slow-start"),
            GrowthPhase::CongestionAvoidance => write!(f, "congestion-avoidance"),
        }
    }
}

/// Everything observed during one interval that the controller needs.
#[derive(Debug, Clone, Copy)]
pub struct RateInputs {
    /// Current marked-fraction estimate, already refreshed for this interval.
    pub alpha: f64,
    /// Share of link capacity assigned to the tunnel.
    pub weight: f64,
    /// Bytes forwarded during the interval.
    pub sent_bytes: u64,
    /// Bytes that came back ECN-marked during the interval.
    pub marked_bytes: u64,
    /// Rate budget in force during the interval.
    pub rate: DataRate,
    /// Threshold in force during the interval.
    pub rate_thresh: DataRate,
}

/// Output of one controller step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateDecision {
    /// Next rate budget, within `[rate_min, rate_max]`.
    pub rate: DataRate,
    /// Next threshold; only differs from the input on congestion.
    pub rate_thresh: DataRate,
    /// Realised throughput of the interval, bits per second.
    pub throughput_bps: f64,
    /// Unbounded candidate rate.
    pub candidate: DataRate,
    pub phase: GrowthPhase,
}

/// Stateless rate controller; the tunnel owns the rate and threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateController {
    interval: Duration,
    rate_min: DataRate,
    rate_max: DataRate,
    avoidance_increment: DataRate,
}

impl RateController {
    /// `interval` must be non-zero; [`TunnelConfig::validate`] guarantees it.
    pub fn new(
        interval: Duration,
        rate_min: DataRate,
        rate_max: DataRate,
        avoidance_increment: DataRate,
    ) -> Self {
        Self {
            interval,
            rate_min,
            rate_max,
            avoidance_increment,
        }
    }

    pub fn from_config(config: &TunnelConfig) -> Self {
        Self::new(
            config.interval,
            config.rate_min,
            config.rate_max,
            config.avoidance_increment,
        )
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn rate_min(&self) -> DataRate {
        self.rate_min
    }

    pub fn rate_max(&self) -> DataRate {
        self.rate_max
    }

    /// Realised throughput in bits per second for `sent_bytes` over one interval.
    pub fn throughput_bps(&self, sent_bytes: u64) -> f64 {
        sent_bytes as f64 * 8.0 / self.interval.as_secs_f64()
    }

    pub fn compute(&self, inputs: RateInputs) -> RateDecision {
        let throughput_bps = self.throughput_bps(inputs.sent_bytes);
        let mut rate_thresh = inputs.rate_thresh;

        let (phase, candidate) = if inputs.marked_bytes > 0 {
            let candidate = DataRate::from_bps_f64((1.0 - inputs.alpha / 2.0) * throughput_bps);
            rate_thresh = candidate;
            (GrowthPhase::Congestion, candidate)
        } else if inputs.rate < inputs.rate_thresh {
            let candidate = DataRate::from_bps_f64((1.0 + inputs.weight) * throughput_bps);
            (GrowthPhase::SlowStart, candidate)
        } else {
            let candidate = DataRate::from_bps_f64(
                throughput_bps + inputs.weight * self.avoidance_increment.bps_f64(),
            );
            (GrowthPhase::CongestionAvoidance, candidate)
        };

        RateDecision {
            rate: candidate.bounded(self.rate_min, self.rate_max),
            rate_thresh,
            throughput_bps,
            candidate,
            phase,
        }
    }
}
