//! Per-flow scheduling within the tunnel's rate budget.
//!
//! The tunnel decides *how much* it may send per interval; a [`FlowScheduler`]
//! decides *which flow* gets to use it. The scheduler runs once per tick,
//! right after the new rate is computed and before the interval counters are
//! reset.

use std::collections::BTreeMap;
use std::time::Duration;

use super::aggregate::FlowAggregate;
use super::{DataRate, FlowId};

/// Hook invoked by the tunnel with the freshly computed rate.
pub trait FlowScheduler: Send {
    fn schedule(&mut self, rate: DataRate, interval: Duration, flows: &FlowAggregate);
}

/// Splits the per-interval byte budget across unfinished flows in proportion
/// to their weights.
///
/// `budget = rate * interval / 8`, shared as `budget * w_i / sum(w)`. When
/// every active flow reports a zero weight the budget is split evenly, so a
/// tunnel whose flows have not expressed demand yet still makes progress.
#[derive(Debug, Default, Clone)]
pub struct WeightedShare {
    budgets: BTreeMap<FlowId, u64>,
    interval_budget: u64,
}

impl WeightedShare {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes `id` may send in the current interval; zero for unknown or
    /// finished flows.
    pub fn budget(&self, id: FlowId) -> u64 {
        self.budgets.get(&id).copied().unwrap_or(0)
    }

    /// Bytes the whole tunnel may send in the current interval.
    pub fn interval_budget(&self) -> u64 {
        self.interval_budget
    }

    pub fn budgets(&self) -> impl Iterator<Item = (FlowId, u64)> + '_ {
        self.budgets.iter().map(|(id, bytes)| (*id, *bytes))
    }
}

impl FlowScheduler for WeightedShare {
    fn schedule(&mut self, rate: DataRate, interval: Duration, flows: &FlowAggregate) {
        self.budgets.clear();
        self.interval_budget = rate.bytes_per(interval);

        let active: Vec<(FlowId, f64)> = flows
            .iter()
            .filter_map(|(id, handle)| {
                let flow = handle.lock();
                (!flow.is_finished()).then(|| (id, flow.weight().max(0.0)))
            })
            .collect();
        if active.is_empty() {
            return;
        }

        let total_weight: f64 = active.iter().map(|(_, weight)| weight).sum();
        let budget = self.interval_budget as f64;
        for (id, weight) in active.iter().copied() {
            let share = if total_weight > 0.0 {
                budget * weight / total_weight
            } else {
                budget / active.len() as f64
            };
            self.budgets.insert(id, share as u64);
        }

        tracing::trace!(
            %rate,
            interval_budget = self.interval_budget,
            flows = active.len(),
            "Flow budgets scheduled"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::super::flow::{flow_handle, Flow};
    use super::*;

    struct FixedFlow {
        weight: f64,
        finished: bool,
    }

    impl Flow for FixedFlow {
        fn is_finished(&self) -> bool {
            self.finished
        }

        fn update_info(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn weight(&self) -> f64 {
            self.weight
        }
    }

    fn aggregate(flows: &[(u64, f64, bool)]) -> FlowAggregate {
        let mut aggregate = FlowAggregate::new();
        for (id, weight, finished) in flows.iter().copied() {
            aggregate.insert(FlowId(id), flow_handle(FixedFlow { weight, finished }));
        }
        aggregate
    }

    #[test]
    fn test_split_proportional_to_weight() {
        let flows = aggregate(&[(1, 1.0, false), (2, 3.0, false)]);
        let mut share = WeightedShare::new();
        // 80 Mbps over 100us = 1000 bytes
        share.schedule(DataRate::from_mbps(80), Duration::from_micros(100), &flows);

        assert_eq!(share.interval_budget(), 1_000);
        assert_eq!(share.budget(FlowId(1)), 250);
        assert_eq!(share.budget(FlowId(2)), 750);
    }

    #[test]
    fn test_finished_flows_get_nothing() {
        let flows = aggregate(&[(1, 1.0, false), (2, 5.0, true)]);
        let mut share = WeightedShare::new();
        share.schedule(DataRate::from_mbps(80), Duration::from_micros(100), &flows);

        assert_eq!(share.budget(FlowId(1)), 1_000);
        assert_eq!(share.budget(FlowId(2)), 0);
        assert_eq!(share.budgets().count(), 1);
    }

    #[test]
    fn test_zero_weights_split_evenly() {
        let flows = aggregate(&[(1, 0.0, false), (2, 0.0, false)]);
        let mut share = WeightedShare::new();
        share.schedule(DataRate::from_mbps(80), Duration::from_micros(100), &flows);

        assert_eq!(share.budget(FlowId(1)), 500);
        assert_eq!(share.budget(FlowId(2)), 500);
    }

    #[test]
    fn test_reschedule_replaces_previous_budgets() {
        let mut share = WeightedShare::new();
        share.schedule(
            DataRate::from_mbps(80),
            Duration::from_micros(100),
            &aggregate(&[(1, 1.0, false)]),
        );
        share.schedule(
            DataRate::from_mbps(80),
            Duration::from_micros(100),
            &aggregate(&[(2, 1.0, false)]),
        );

        assert_eq!(share.budget(FlowId(1)), 0);
        assert_eq!(share.budget(FlowId(2)), 1_000);
    }
}
