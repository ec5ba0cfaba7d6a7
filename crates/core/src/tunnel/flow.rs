use std::sync::Arc;

use parking_lot::Mutex;

/// A traffic stream carried by a tunnel.
///
/// The tunnel only triggers and reads a flow's demand; how a flow computes
/// its weight is its own business.
pub trait Flow: Send {
    /// Finished flows are skipped by the aggregate but stay in the table.
    fn is_finished(&self) -> bool;

    /// Refreshes the flow's internal demand for the interval that just ended.
    fn update_info(&mut self) -> anyhow::Result<()>;

    /// Relative bandwidth demand, `>= 0`.
    fn weight(&self) -> f64;
}

/// Flow handle shared between the tunnel and whoever created the flow.
pub type FlowHandle = Arc<Mutex<dyn Flow>>;

/// Wraps a flow into a shareable [`FlowHandle`].
pub fn flow_handle<F: Flow + 'static>(flow: F) -> FlowHandle {
    Arc::new(Mutex::new(flow))
}
