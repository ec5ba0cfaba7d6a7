use thiserror::Error;

use super::FlowId;
use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("invalid tunnel configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("{id} failed to refresh its demand: {source}")]
    Flow {
        id: FlowId,
        #[source]
        source: anyhow::Error,
    },

    #[error("no forward target installed")]
    MissingForwardTarget,
}
