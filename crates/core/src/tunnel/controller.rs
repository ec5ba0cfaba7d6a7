//! The tunnel control loop.
//!
//! Each tick, strictly in this order: refresh the congestion estimate from the
//! ECN tally, refresh the flow aggregate, compute the next rate, run the flow
//! scheduler, reset the ECN tally, zero the interval byte counter and re-arm
//! the timer. The rate computation must see the pre-reset byte counter and
//! ECN state.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;

use super::aggregate::FlowAggregate;
use super::ecn::EcnRecorder;
use super::errors::TunnelError;
use super::estimator::CongestionEstimator;
use super::flow::FlowHandle;
use super::rate::{GrowthPhase, RateController, RateInputs};
use super::schedule::FlowScheduler;
use super::signal::{Signal, Traced};
use super::stats::TunnelStats;
use super::timer::TickTimer;
use super::types::{DataRate, FlowId, Route, TunnelIdentity};
use super::TunnelState;
use crate::config::TunnelConfig;

/// Receives every forwarded packet: `(packet, src, dst, protocol, route)`.
pub type ForwardTarget =
    Arc<dyn Fn(Bytes, Ipv4Addr, Ipv4Addr, u8, Option<&Route>) + Send + Sync>;

#[derive(Debug, Default, Clone, Copy)]
struct TickCounters {
    ticks: u64,
    congestion_events: u64,
    slow_start_ticks: u64,
    avoidance_ticks: u64,
}

/// A congestion-controlled tunnel aggregating the flows of one tenant between
/// one source and one destination.
///
/// ## Type Parameter
///
/// `T` is the timer driving the control loop. The tunnel asks it to fire and
/// expects its owner to call [`Tunnel::on_timer`] on expiry. In simulations
/// this is [`SimTimer`](crate::simulation::SimTimer); tests can use any
/// [`TickTimer`] that records what it was asked to do.
pub struct Tunnel<T: TickTimer> {
    identity: TunnelIdentity,
    config: TunnelConfig,
    state: TunnelState,
    timer: T,

    ecn: Option<Box<dyn EcnRecorder>>,
    estimator: CongestionEstimator,
    controller: RateController,
    flows: FlowAggregate,
    flow_scheduler: Option<Box<dyn FlowScheduler>>,

    forward_target: Option<ForwardTarget>,
    route: Option<Arc<Route>>,

    alpha: Traced<f64>,
    weight: Traced<f64>,
    weight_request: Traced<f64>,
    rate: DataRate,
    rate_thresh: DataRate,

    /// Bytes forwarded in the current interval.
    sent_bytes: u64,
    total_bytes: u64,
    counters: TickCounters,
}

impl<T: TickTimer> Tunnel<T> {
    /// Creates a tunnel and schedules its initialisation for "now".
    ///
    /// Fails if `config` does not validate.
    pub fn new(
        identity: TunnelIdentity,
        config: TunnelConfig,
        ecn: Box<dyn EcnRecorder>,
        mut timer: T,
    ) -> Result<Self, TunnelError> {
        config.validate()?;

        let estimator = CongestionEstimator::new(config.gamma);
        timer.schedule(Duration::ZERO);

        tracing::debug!(
            tunnel = %identity,
            gamma = config.gamma,
            interval_us = config.interval.as_micros() as u64,
            rate_min = %config.rate_min,
            rate_max = %config.rate_max,
            rate_thresh = %config.rate_thresh,
            "Tunnel created"
        );

        Ok(Self {
            identity,
            state: TunnelState::Constructed,
            timer,
            ecn: Some(ecn),
            alpha: Traced::new(estimator.get()),
            estimator,
            controller: RateController::from_config(&config),
            flows: FlowAggregate::new(),
            flow_scheduler: None,
            forward_target: None,
            route: None,
            weight: Traced::new(0.0),
            weight_request: Traced::new(0.0),
            rate: config.rate_min,
            rate_thresh: config.rate_thresh,
            sent_bytes: 0,
            total_bytes: 0,
            counters: TickCounters::default(),
            config,
        })
    }

    /// Entry point for timer expiries; dispatches on the lifecycle state.
    pub fn on_timer(&mut self) -> Result<(), TunnelError> {
        if self.state.runs_ticks() {
            return self.update();
        }
        match self.state {
            TunnelState::Constructed => self.initialize(),
            _ => {
                tracing::trace!(tunnel = %self.identity, state = %self.state, "Timer fired on idle tunnel, ignoring");
            }
        }
        Ok(())
    }

    /// Arms the timer with the configured interval. Only acts once.
    pub fn initialize(&mut self) {
        if self.state != TunnelState::Constructed {
            tracing::debug!(tunnel = %self.identity, state = %self.state, "Tunnel already initialized");
            return;
        }
        self.state = TunnelState::Initialized;
        self.timer.schedule(self.config.interval);
        tracing::debug!(tunnel = %self.identity, "Tunnel initialized");
    }

    /// Runs one control tick.
    ///
    /// A flow that fails to refresh aborts the tick: nothing is committed, the
    /// ECN tally and byte counter keep their values and the timer is not
    /// re-armed. The caller decides whether to retry, skip or stop.
    ///
    /// Before initialisation this is a no-op and the pending initialisation
    /// expiry stays armed.
    pub fn update(&mut self) -> Result<(), TunnelError> {
        if self.state == TunnelState::Constructed {
            tracing::warn!(tunnel = %self.identity, "Update before initialization ignored");
            return Ok(());
        }
        let Some(ecn) = self.ecn.as_ref() else {
            tracing::warn!(tunnel = %self.identity, "Update on disposed tunnel ignored");
            return Ok(());
        };
        let marked_ratio = ecn.marked_ratio();
        let marked_bytes = ecn.marked_bytes();

        tracing::trace!(
            tunnel = %self.identity,
            sent_bytes = self.sent_bytes,
            marked_bytes,
            marked_ratio,
            "Tunnel tick"
        );

        let alpha = self.estimator.next(marked_ratio);
        let weight_request = self.flows.refresh()?;
        let decision = self.controller.compute(RateInputs {
            alpha,
            weight: self.weight.get(),
            sent_bytes: self.sent_bytes,
            marked_bytes,
            rate: self.rate,
            rate_thresh: self.rate_thresh,
        });

        self.estimator.refresh(marked_ratio);
        self.alpha.set(alpha);
        self.weight_request.set(weight_request);

        match decision.phase {
            GrowthPhase::Congestion => {
                self.counters.congestion_events += 1;
                tracing::debug!(
                    tunnel = %self.identity,
                    alpha,
                    throughput_bps = decision.throughput_bps,
                    old_rate = %self.rate,
                    new_rate = %decision.rate,
                    new_thresh = %decision.rate_thresh,
                    "Congestion marked, decreasing rate"
                );
            }
            GrowthPhase::SlowStart => {
                self.counters.slow_start_ticks += 1;
                tracing::trace!(
                    tunnel = %self.identity,
                    throughput_bps = decision.throughput_bps,
                    new_rate = %decision.rate,
                    "Slow start growth"
                );
            }
            GrowthPhase::CongestionAvoidance => {
                self.counters.avoidance_ticks += 1;
                tracing::trace!(
                    tunnel = %self.identity,
                    throughput_bps = decision.throughput_bps,
                    new_rate = %decision.rate,
                    "Congestion avoidance growth"
                );
            }
        }
        self.rate = decision.rate;
        self.rate_thresh = decision.rate_thresh;

        if let Some(scheduler) = self.flow_scheduler.as_mut() {
            scheduler.schedule(self.rate, self.config.interval, &self.flows);
        }
        if let Some(ecn) = self.ecn.as_mut() {
            ecn.reset();
        }
        self.sent_bytes = 0;
        self.counters.ticks += 1;
        self.state = TunnelState::Active;
        self.timer.schedule(self.config.interval);
        Ok(())
    }

    /// Counts `packet` against the current interval and hands it to the
    /// forward target.
    ///
    /// The rate budget is not enforced here; pacing belongs to the flow
    /// scheduler. Without a forward target the packet is dropped uncounted.
    pub fn forward(&mut self, packet: Bytes, protocol: u8) -> Result<(), TunnelError> {
        let Some(target) = self.forward_target.as_ref() else {
            tracing::warn!(
                tunnel = %self.identity,
                bytes = packet.len(),
                "No forward target, dropping packet"
            );
            return Err(TunnelError::MissingForwardTarget);
        };
        let size = packet.len() as u64;
        self.sent_bytes = self.sent_bytes.saturating_add(size);
        self.total_bytes = self.total_bytes.saturating_add(size);
        target(
            packet,
            self.identity.src,
            self.identity.dst,
            protocol,
            self.route.as_deref(),
        );
        Ok(())
    }

    /// Cancels the pending tick, then releases every collaborator.
    ///
    /// Idempotent. A disposed tunnel never ticks again.
    pub fn dispose(&mut self) {
        if self.state.is_disposed() {
            return;
        }
        self.timer.cancel();
        self.ecn = None;
        self.forward_target = None;
        self.route = None;
        self.flow_scheduler = None;
        self.flows.clear();
        self.state = TunnelState::Disposed;
        tracing::debug!(
            tunnel = %self.identity,
            ticks = self.counters.ticks,
            total_bytes = self.total_bytes,
            "Tunnel disposed"
        );
    }

    pub fn weight_request(&self) -> f64 {
        self.weight_request.get()
    }

    pub fn rate(&self) -> DataRate {
        self.rate
    }

    pub fn rate_thresh(&self) -> DataRate {
        self.rate_thresh
    }

    pub fn alpha(&self) -> f64 {
        self.alpha.get()
    }

    pub fn weight(&self) -> f64 {
        self.weight.get()
    }

    /// Bytes forwarded since the last tick.
    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes
    }

    pub fn set_weight(&mut self, weight: f64) {
        if self.state.is_disposed() {
            tracing::warn!(tunnel = %self.identity, "Weight set on disposed tunnel ignored");
            return;
        }
        self.weight.set(weight);
    }

    pub fn set_rate_thresh(&mut self, rate_thresh: DataRate) {
        if self.state.is_disposed() {
            tracing::warn!(tunnel = %self.identity, "Threshold set on disposed tunnel ignored");
            return;
        }
        self.rate_thresh = rate_thresh;
    }

    pub fn set_route(&mut self, route: Arc<Route>) {
        if self.state.is_disposed() {
            tracing::warn!(tunnel = %self.identity, "Route set on disposed tunnel ignored");
            return;
        }
        self.route = Some(route);
    }

    pub fn set_forward_target(&mut self, target: ForwardTarget) {
        if self.state.is_disposed() {
            tracing::warn!(tunnel = %self.identity, "Forward target set on disposed tunnel ignored");
            return;
        }
        self.forward_target = Some(target);
    }

    pub fn set_flow_scheduler(&mut self, scheduler: Box<dyn FlowScheduler>) {
        if self.state.is_disposed() {
            return;
        }
        self.flow_scheduler = Some(scheduler);
    }

    /// Adds a flow, returning the handle it replaced.
    pub fn add_flow(&mut self, id: FlowId, flow: FlowHandle) -> Option<FlowHandle> {
        if self.state.is_disposed() {
            tracing::warn!(tunnel = %self.identity, flow = %id, "Flow added to disposed tunnel ignored");
            return None;
        }
        self.flows.insert(id, flow)
    }

    /// Evicts a flow. The tunnel never does this on its own, even for
    /// finished flows.
    pub fn remove_flow(&mut self, id: FlowId) -> Option<FlowHandle> {
        self.flows.remove(id)
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    pub fn active_flow_count(&self) -> usize {
        self.flows.active_len()
    }

    pub fn flows(&self) -> &FlowAggregate {
        &self.flows
    }

    /// Value-change stream for one of the observable signals.
    pub fn subscribe(&self, signal: Signal) -> watch::Receiver<f64> {
        match signal {
            Signal::Alpha => self.alpha.subscribe(),
            Signal::Weight => self.weight.subscribe(),
            Signal::WeightRequest => self.weight_request.subscribe(),
        }
    }

    pub fn stats(&self) -> TunnelStats {
        TunnelStats {
            alpha: self.alpha(),
            rate: self.rate,
            rate_thresh: self.rate_thresh,
            weight: self.weight(),
            weight_request: self.weight_request(),
            interval_bytes: self.sent_bytes,
            total_bytes: self.total_bytes,
            ticks: self.counters.ticks,
            congestion_events: self.counters.congestion_events,
            slow_start_ticks: self.counters.slow_start_ticks,
            avoidance_ticks: self.counters.avoidance_ticks,
            flows: self.flows.len(),
            active_flows: self.flows.active_len(),
            state: self.state,
        }
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    pub fn identity(&self) -> &TunnelIdentity {
        &self.identity
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn has_forward_target(&self) -> bool {
        self.forward_target.is_some()
    }

    pub fn route(&self) -> Option<&Route> {
        self.route.as_deref()
    }
}

impl<T: TickTimer> std::fmt::Debug for Tunnel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("identity", &self.identity)
            .field("state", &self.state)
            .field("alpha", &self.alpha())
            .field("rate", &self.rate)
            .field("rate_thresh", &self.rate_thresh)
            .field("weight", &self.weight())
            .field("weight_request", &self.weight_request())
            .field("sent_bytes", &self.sent_bytes)
            .field("flows", &self.flows)
            .finish()
    }
}
