//! Flow table and weight-request aggregation.

use std::collections::BTreeMap;

use super::errors::TunnelError;
use super::flow::FlowHandle;
use super::FlowId;

/// The set of flows carried by one tunnel.
///
/// Uses BTreeMap so that flows are refreshed in a stable order from run to
/// run; the aggregated sum itself does not depend on the order.
#[derive(Default)]
pub struct FlowAggregate {
    flows: BTreeMap<FlowId, FlowHandle>,
}

impl FlowAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a flow, returning the handle previously stored under `id`.
    pub fn insert(&mut self, id: FlowId, flow: FlowHandle) -> Option<FlowHandle> {
        self.flows.insert(id, flow)
    }

    pub fn remove(&mut self, id: FlowId) -> Option<FlowHandle> {
        self.flows.remove(&id)
    }

    pub fn get(&self, id: FlowId) -> Option<&FlowHandle> {
        self.flows.get(&id)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Number of flows that have not finished.
    pub fn active_len(&self) -> usize {
        self.flows
            .values()
            .filter(|flow| !flow.lock().is_finished())
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FlowId, &FlowHandle)> {
        self.flows.iter().map(|(id, flow)| (*id, flow))
    }

    pub fn clear(&mut self) {
        self.flows.clear();
    }

    /// Refreshes every unfinished flow and returns the sum of their weights.
    ///
    /// Finished flows contribute nothing and are left in the table. The first
    /// flow whose refresh fails aborts the pass and its error is returned.
    pub fn refresh(&mut self) -> Result<f64, TunnelError> {
        let mut weight_request = 0.0;
        for (id, handle) in &self.flows {
            let mut flow = handle.lock();
            if flow.is_finished() {
                continue;
            }
            flow.update_info()
                .map_err(|source| TunnelError::Flow { id: *id, source })?;
            weight_request += flow.weight();
        }
        Ok(weight_request)
    }
}

impl std::fmt::Debug for FlowAggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowAggregate")
            .field("flows", &self.flows.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::super::flow::{flow_handle, Flow};
    use super::*;

    struct TestFlow {
        weight: f64,
        finished: bool,
        updates: usize,
        fail: bool,
    }

    impl TestFlow {
        fn new(weight: f64) -> Self {
            Self {
                weight,
                finished: false,
                updates: 0,
                fail: false,
            }
        }
    }

    impl Flow for TestFlow {
        fn is_finished(&self) -> bool {
            self.finished
        }

        fn update_info(&mut self) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("demand estimator unavailable");
            }
            self.updates += 1;
            Ok(())
        }

        fn weight(&self) -> f64 {
            self.weight
        }
    }

    #[test]
    fn test_empty_table_requests_nothing() {
        let mut aggregate = FlowAggregate::new();
        assert_eq!(aggregate.refresh().unwrap(), 0.0);
        assert!(aggregate.is_empty());
    }

    #[test]
    fn test_sums_only_unfinished_flows() {
        let mut aggregate = FlowAggregate::new();
        let finished = std::sync::Arc::new(parking_lot::Mutex::new(TestFlow {
            finished: true,
            ..TestFlow::new(100.0)
        }));
        aggregate.insert(FlowId(1), flow_handle(TestFlow::new(0.25)));
        aggregate.insert(FlowId(2), finished.clone());
        aggregate.insert(FlowId(3), flow_handle(TestFlow::new(0.5)));

        assert_eq!(aggregate.refresh().unwrap(), 0.75);
        // Finished flow was neither refreshed nor evicted
        assert_eq!(finished.lock().updates, 0);
        assert_eq!(aggregate.len(), 3);
        assert_eq!(aggregate.active_len(), 2);
    }

    #[test]
    fn test_refresh_updates_each_active_flow_once() {
        let mut aggregate = FlowAggregate::new();
        let flow = std::sync::Arc::new(parking_lot::Mutex::new(TestFlow::new(1.0)));
        aggregate.insert(FlowId(9), flow.clone());

        aggregate.refresh().unwrap();
        aggregate.refresh().unwrap();
        assert_eq!(flow.lock().updates, 2);
    }

    #[test]
    fn test_flow_fault_propagates() {
        let mut aggregate = FlowAggregate::new();
        aggregate.insert(FlowId(1), flow_handle(TestFlow::new(1.0)));
        aggregate.insert(
            FlowId(2),
            flow_handle(TestFlow {
                fail: true,
                ..TestFlow::new(1.0)
            }),
        );

        let err = aggregate.refresh().unwrap_err();
        assert!(matches!(err, TunnelError::Flow { id: FlowId(2), .. }));
        assert!(err.to_string().contains("flow-2"));
    }

    #[test]
    fn test_insert_replaces_and_remove_evicts() {
        let mut aggregate = FlowAggregate::new();
        assert!(aggregate
            .insert(FlowId(1), flow_handle(TestFlow::new(1.0)))
            .is_none());
        assert!(aggregate
            .insert(FlowId(1), flow_handle(TestFlow::new(2.0)))
            .is_some());
        assert_eq!(aggregate.refresh().unwrap(), 2.0);

        assert!(aggregate.remove(FlowId(1)).is_some());
        assert!(aggregate.remove(FlowId(1)).is_none());
        assert!(aggregate.get(FlowId(1)).is_none());
    }
}
