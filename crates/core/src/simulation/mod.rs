//! Deterministic simulation of tunnels driven by a virtual clock.
//!
//! # Architecture
//!
//! - **TimeSource**: abstraction over time (real vs virtual)
//! - **VirtualTime**: deterministic time that only advances when stepped
//! - **Scheduler**: min-heap of timer expiries, popped in a total order
//! - **SimTimer**: a tunnel's [`TickTimer`](crate::tunnel::TickTimer) backed by
//!   the scheduler
//! - **BottleneckLink**: capacity model that ECN-marks traffic beyond capacity
//! - **TunnelSim**: owns the tunnels and delivers each expiry to its tunnel
//!
//! Ordering is fully determined by `(timestamp, tunnel, event id)`, so two runs
//! with the same inputs produce identical tunnel states.
//!
//! ```ignore
//! let mut sim = TunnelSim::new();
//! let ecn = EcnCounter::new();
//! let id = sim.add_tunnel(identity, TunnelConfig::default(), Box::new(ecn))?;
//! sim.run_for(Duration::from_millis(1))?;
//! assert_eq!(sim.tunnel(id).unwrap().stats().ticks, 10);
//! ```

mod link;
mod scheduler;
mod time;
mod timer;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

pub use link::{BottleneckLink, LinkStats};
pub use scheduler::{Event, EventId, Scheduler, TunnelId};
pub use time::{RealTime, TimeSource, VirtualTime};
pub use timer::SimTimer;

use crate::config::TunnelConfig;
use crate::tunnel::{EcnRecorder, Tunnel, TunnelError, TunnelIdentity};

/// A tick failed; the tunnel is left unscheduled.
#[derive(Debug, thiserror::Error)]
#[error("{tunnel} tick failed at {at_nanos}ns: {source}")]
pub struct SimulationError {
    pub tunnel: TunnelId,
    pub at_nanos: u64,
    #[source]
    pub source: TunnelError,
}

/// Tunnels sharing one deterministic scheduler.
pub struct TunnelSim {
    scheduler: Arc<Mutex<Scheduler>>,
    tunnels: BTreeMap<TunnelId, Tunnel<SimTimer>>,
    next_id: u64,
}

impl Default for TunnelSim {
    fn default() -> Self {
        Self::new()
    }
}

impl TunnelSim {
    pub fn new() -> Self {
        Self {
            scheduler: Arc::new(Mutex::new(Scheduler::new())),
            tunnels: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// The simulation clock; clones observe the same instant.
    pub fn time(&self) -> VirtualTime {
        self.scheduler.lock().time().clone()
    }

    pub fn now(&self) -> u64 {
        self.scheduler.lock().now()
    }

    /// Builds a tunnel on this simulation's clock. Its initialisation is due
    /// at the current instant.
    pub fn add_tunnel(
        &mut self,
        identity: TunnelIdentity,
        config: TunnelConfig,
        ecn: Box<dyn EcnRecorder>,
    ) -> Result<TunnelId, TunnelError> {
        let id = TunnelId(self.next_id);
        let timer = SimTimer::new(Arc::clone(&self.scheduler), id);
        let tunnel = Tunnel::new(identity, config, ecn, timer)?;
        self.next_id += 1;
        self.tunnels.insert(id, tunnel);
        tracing::debug!(%id, tunnel = %identity, "Tunnel added to simulation");
        Ok(id)
    }

    pub fn tunnel(&self, id: TunnelId) -> Option<&Tunnel<SimTimer>> {
        self.tunnels.get(&id)
    }

    pub fn tunnel_mut(&mut self, id: TunnelId) -> Option<&mut Tunnel<SimTimer>> {
        self.tunnels.get_mut(&id)
    }

    pub fn tunnels(&self) -> impl Iterator<Item = (TunnelId, &Tunnel<SimTimer>)> {
        self.tunnels.iter().map(|(id, tunnel)| (*id, tunnel))
    }

    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }

    /// Disposes a tunnel and hands it back.
    pub fn remove(&mut self, id: TunnelId) -> Option<Tunnel<SimTimer>> {
        let mut tunnel = self.tunnels.remove(&id)?;
        tunnel.dispose();
        Some(tunnel)
    }

    pub fn next_event_time(&self) -> Option<u64> {
        self.scheduler.lock().next_event_time()
    }

    /// Delivers the next timer expiry, advancing the clock to it.
    pub fn step(&mut self) -> Result<Option<Event>, SimulationError> {
        let event = self.scheduler.lock().step();
        if let Some(event) = &event {
            self.dispatch(event)?;
        }
        Ok(event)
    }

    /// Delivers every expiry due at or before `target_nanos`, then moves the
    /// clock to `target_nanos`. Returns the number of expiries delivered.
    pub fn run_until_time(&mut self, target_nanos: u64) -> Result<usize, SimulationError> {
        let mut delivered = 0;
        loop {
            let event = self.scheduler.lock().step_until(target_nanos);
            let Some(event) = event else {
                break;
            };
            self.dispatch(&event)?;
            delivered += 1;
        }
        self.scheduler.lock().advance_to(target_nanos);
        Ok(delivered)
    }

    pub fn run_for(&mut self, duration: Duration) -> Result<usize, SimulationError> {
        let target = self.now().saturating_add(duration.as_nanos() as u64);
        self.run_until_time(target)
    }

    fn dispatch(&mut self, event: &Event) -> Result<(), SimulationError> {
        let Some(tunnel) = self.tunnels.get_mut(&event.tunnel) else {
            tracing::trace!(tunnel = %event.tunnel, "Expiry for removed tunnel dropped");
            return Ok(());
        };
        tunnel.on_timer().map_err(|source| SimulationError {
            tunnel: event.tunnel,
            at_nanos: event.timestamp,
            source,
        })
    }
}

impl Drop for TunnelSim {
    fn drop(&mut self) {
        for tunnel in self.tunnels.values_mut() {
            tunnel.dispose();
        }
    }
}

impl std::fmt::Debug for TunnelSim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelSim")
            .field("scheduler", &self.scheduler)
            .field("tunnels", &self.tunnels.keys().collect::<Vec<_>>())
            .finish()
    }
}
