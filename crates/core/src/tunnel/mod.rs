//! C3 congestion-controlled tunnel.
//!
//! A tunnel aggregates all flows of one tenant between one source and one
//! destination behind a single rate budget. Once per interval it:
//!
//! 1. folds the interval's ECN marked ratio into `alpha`, an EWMA of the
//!    fraction of marked bytes (DCTCP style),
//! 2. asks every unfinished flow to refresh and sums their weights into the
//!    tunnel's weight request,
//! 3. turns the interval's realised throughput into the next rate:
//!    multiplicative decrease by `alpha / 2` when anything was marked,
//!    otherwise weight-scaled growth that is multiplicative below the
//!    slow-start threshold and additive above it.
//!
//! The threshold retreats to the decreased rate on every congestion event, so
//! the switch point between the two growth modes follows the last observed
//! congestion rather than a fixed window.
//!
//! ## Collaborators
//!
//! | Concern             | Seam                                   |
//! |---------------------|----------------------------------------|
//! | clock               | [`TickTimer`]                          |
//! | ECN tally           | [`EcnRecorder`] / [`EcnCounter`]       |
//! | flows               | [`Flow`] behind a shared [`FlowHandle`] |
//! | per-flow pacing     | [`FlowScheduler`] / [`WeightedShare`]  |
//! | packet transmission | [`ForwardTarget`]                      |
//!
//! The tunnel is single-threaded: ticks, forwarding and setters are all
//! invoked sequentially by whoever owns the clock.

mod aggregate;
mod controller;
mod ecn;
mod errors;
mod estimator;
mod flow;
mod rate;
mod schedule;
mod signal;
mod state;
mod stats;
mod timer;
mod types;


pub use aggregate::FlowAggregate;
pub use controller::{ForwardTarget, Tunnel};
pub use ecn::{EcnCounter, EcnFeedback, EcnRecorder};
pub use errors::TunnelError;
pub use estimator::CongestionEstimator;
pub use flow::{flow_handle, Flow, FlowHandle};
pub use rate::{GrowthPhase, RateController, RateDecision, RateInputs};
pub use schedule::{FlowScheduler, WeightedShare};
pub use signal::{Signal, Traced};
pub use state::TunnelState;
pub use stats::TunnelStats;
pub use timer::TickTimer;
pub use types::{DataRate, FlowId, Route, TenantId, TunnelIdentity, TunnelType};
