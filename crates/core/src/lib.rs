/// Tunnel configuration and logger setup.
pub mod config;

/// Deterministic clock, scheduler and link model for driving tunnels.
pub mod simulation;

/// Tracing subscriber initialisation.
#[cfg_attr(test, allow(dead_code))]
pub mod tracing;

/// The congestion-controlled tunnel and its collaborators.
pub mod tunnel;

pub use config::{ConfigError, TunnelConfig};
pub use tunnel::{DataRate, Tunnel, TunnelError};
