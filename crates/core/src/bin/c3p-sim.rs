//! Runs tunnels of bulk flows over a shared ECN-marking bottleneck.
//!
//! Every tunnel carries a set of bulk flows, paces them with a weighted byte
//! budget derived from its current rate and forwards their packets onto a
//! single bottleneck link. Bytes beyond the link's capacity come back marked
//! and drive each tunnel's rate down.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use parking_lot::Mutex;
use tracing::level_filters::LevelFilter;

use c3p::config::{set_logger, TunnelConfig};
use c3p::simulation::{BottleneckLink, RealTime, TimeSource, TunnelId, TunnelSim, VirtualTime};
use c3p::tunnel::{
    DataRate, EcnCounter, Flow, FlowAggregate, FlowId, FlowScheduler, ForwardTarget, Route,
    TenantId, TunnelIdentity, TunnelType, WeightedShare,
};

#[derive(Parser, Debug)]
#[command(name = "c3p-sim")]
#[command(about = "Simulate congestion-controlled tunnels sharing a bottleneck link")]
struct Args {
    /// Tunnel configuration file (TOML). Defaults apply when omitted.
    #[arg(long, env = "C3P_CONFIG")]
    config: Option<PathBuf>,

    /// Number of tunnels sharing the link
    #[arg(long, env = "C3P_TUNNELS", default_value_t = 2)]
    tunnels: u32,

    /// Bulk flows per tunnel
    #[arg(long, env = "C3P_FLOWS", default_value_t = 4)]
    flows: u64,

    /// Weight reported by every flow
    #[arg(long, env = "C3P_FLOW_WEIGHT", default_value_t = 1.0)]
    flow_weight: f64,

    /// Bytes each flow transfers before finishing
    #[arg(long, env = "C3P_FLOW_SIZE", default_value_t = 10_000_000)]
    flow_size: u64,

    /// Capacity of the shared bottleneck, e.g. "1Gbps" or "400Mbps"
    #[arg(long, env = "C3P_LINK_CAPACITY", default_value = "1Gbps")]
    link_capacity: DataRate,

    /// Maximum payload per forwarded packet, in bytes
    #[arg(long, default_value_t = 1500)]
    packet_size: usize,

    /// Simulated time to run, in milliseconds
    #[arg(long, env = "C3P_DURATION_MS", default_value_t = 50)]
    duration_ms: u64,

    /// Log level (error, warn, info, debug, trace); RUST_LOG overrides
    #[arg(long, env = "C3P_LOG_LEVEL")]
    log_level: Option<LevelFilter>,
}

/// Flow that transfers a fixed amount of bytes as fast as its budget allows.
struct BulkFlow {
    weight: f64,
    size: u64,
    sent: u64,
    demand: u64,
}

impl BulkFlow {
    fn new(weight: f64, size: u64) -> Self {
        Self {
            weight,
            size,
            sent: 0,
            demand: size,
        }
    }
}

impl Flow for BulkFlow {
    fn is_finished(&self) -> bool {
        self.sent >= self.size
    }

    fn update_info(&mut self) -> anyhow::Result<()> {
        self.demand = self.size.saturating_sub(self.sent);
        Ok(())
    }

    fn weight(&self) -> f64 {
        if self.demand == 0 {
            0.0
        } else {
            self.weight
        }
    }
}

/// Lets the simulation read budgets computed inside the tunnel's tick.
#[derive(Clone, Default)]
struct SharedShare(Arc<Mutex<WeightedShare>>);

impl FlowScheduler for SharedShare {
    fn schedule(&mut self, rate: DataRate, interval: Duration, flows: &FlowAggregate) {
        self.0.lock().schedule(rate, interval, flows);
    }
}

struct TunnelHarness {
    id: TunnelId,
    share: SharedShare,
    flows: Vec<(FlowId, Arc<Mutex<BulkFlow>>)>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    set_logger(args.log_level);

    let config = match &args.config {
        Some(path) => TunnelConfig::load(path)
            .with_context(|| format!("loading tunnel configuration from {}", path.display()))?,
        None => TunnelConfig::default(),
    };
    config.validate()?;
    anyhow::ensure!(args.packet_size > 0, "--packet-size must be positive");
    anyhow::ensure!(args.tunnels > 0, "--tunnels must be positive");

    let wall_clock = RealTime::new();
    let mut sim = TunnelSim::new();
    let time: VirtualTime = sim.time();
    let link = Arc::new(Mutex::new(BottleneckLink::new(
        args.link_capacity,
        config.interval,
        time.clone(),
    )));

    let mut harnesses = Vec::with_capacity(args.tunnels as usize);
    for tenant in 0..args.tunnels {
        harnesses.push(build_tunnel(&mut sim, &link, &config, &args, tenant)?);
    }

    tracing::info!(
        tunnels = args.tunnels,
        flows = args.flows,
        capacity = %args.link_capacity,
        duration_ms = args.duration_ms,
        "Starting simulation"
    );

    let end = Duration::from_millis(args.duration_ms).as_nanos() as u64;
    let step = config.interval.as_nanos() as u64;
    let mut now = 0;
    while now <= end {
        sim.run_until_time(now)?;
        for harness in &harnesses {
            pump(&mut sim, harness, args.packet_size)?;
        }
        now = now.saturating_add(step);
    }

    report(&sim, &harnesses, &link.lock().stats(), &time);
    tracing::info!(
        wall_ms = wall_clock.now().as_millis() as u64,
        "Simulation finished"
    );
    Ok(())
}

fn build_tunnel(
    sim: &mut TunnelSim,
    link: &Arc<Mutex<BottleneckLink<VirtualTime>>>,
    config: &TunnelConfig,
    args: &Args,
    tenant: u32,
) -> anyhow::Result<TunnelHarness> {
    let src = Ipv4Addr::new(10, 0, (tenant / 256) as u8, (tenant % 256) as u8);
    let dst = Ipv4Addr::new(10, 1, 0, 1);
    let identity = TunnelIdentity::new(TenantId(tenant), TunnelType::BestEffort, src, dst);

    let ecn = EcnCounter::new();
    link.lock().attach(ecn.feedback());
    let id = sim.add_tunnel(identity, config.clone(), Box::new(ecn))?;

    let wire = Arc::clone(link);
    let target: ForwardTarget = Arc::new(
        move |packet: Bytes, _src: Ipv4Addr, _dst: Ipv4Addr, _protocol: u8, _route: Option<&Route>| {
            wire.lock().transmit(packet.len());
        },
    );
    let share = SharedShare::default();
    let mut flows = Vec::with_capacity(args.flows as usize);

    let tunnel = sim
        .tunnel_mut(id)
        .context("tunnel vanished right after creation")?;
    tunnel.set_forward_target(target);
    tunnel.set_route(Arc::new(Route {
        destination: dst,
        source: src,
        gateway: Ipv4Addr::new(10, 0, 255, 254),
        interface: 0,
    }));
    tunnel.set_flow_scheduler(Box::new(share.clone()));
    tunnel.set_weight(1.0 / f64::from(args.tunnels));
    for n in 0..args.flows {
        let flow_id = FlowId(n);
        let flow = Arc::new(Mutex::new(BulkFlow::new(args.flow_weight, args.flow_size)));
        tunnel.add_flow(flow_id, flow.clone());
        flows.push((flow_id, flow));
    }

    Ok(TunnelHarness { id, share, flows })
}

/// Sends each flow's budget for the current interval through its tunnel.
fn pump(sim: &mut TunnelSim, harness: &TunnelHarness, packet_size: usize) -> anyhow::Result<()> {
    let Some(tunnel) = sim.tunnel_mut(harness.id) else {
        return Ok(());
    };
    let share = harness.share.0.lock().clone();
    for (flow_id, flow) in &harness.flows {
        let mut flow = flow.lock();
        let mut budget = share.budget(*flow_id).min(flow.size.saturating_sub(flow.sent));
        while budget > 0 {
            let size = budget.min(packet_size as u64);
            tunnel.forward(Bytes::from(vec![0u8; size as usize]), 17)?;
            flow.sent += size;
            budget -= size;
        }
    }
    Ok(())
}

fn report(
    sim: &TunnelSim,
    harnesses: &[TunnelHarness],
    link: &c3p::simulation::LinkStats,
    time: &VirtualTime,
) {
    let elapsed = time.now().as_secs_f64();
    println!(
        "{:<8} {:>14} {:>14} {:>8} {:>8} {:>12} {:>10}",
        "tunnel", "rate", "thresh", "alpha", "ticks", "congestion", "goodput"
    );
    for harness in harnesses {
        let Some(tunnel) = sim.tunnel(harness.id) else {
            continue;
        };
        let stats = tunnel.stats();
        let goodput = if elapsed > 0.0 {
            DataRate::from_bps_f64(stats.total_bytes as f64 * 8.0 / elapsed)
        } else {
            DataRate::ZERO
        };
        println!(
            "{:<8} {:>14} {:>14} {:>8.4} {:>8} {:>12} {:>10.1}M",
            harness.id.to_string(),
            stats.rate.to_string(),
            stats.rate_thresh.to_string(),
            stats.alpha,
            stats.ticks,
            stats.congestion_events,
            goodput.bps_f64() / 1e6,
        );
    }
    println!(
        "link: {} bytes, {:.2}% marked, {} congested windows",
        link.bytes,
        link.marked_fraction() * 100.0,
        link.congested_windows
    );
}
