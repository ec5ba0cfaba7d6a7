use std::{
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, DurationMicroSeconds};

use crate::tunnel::DataRate;

/// Default weight given to a new ECN sample when updating alpha.
pub const DEFAULT_GAMMA: f64 = 1.0 / 16.0;

/// Default period of the tunnel control loop.
pub const DEFAULT_INTERVAL: Duration = Duration::from_micros(100);

pub const DEFAULT_RATE_MAX: DataRate = DataRate::from_mbps(1000);
pub const DEFAULT_RATE_MIN: DataRate = DataRate::from_mbps(1);
pub const DEFAULT_RATE_THRESH: DataRate = DataRate::from_mbps(500);

/// Rate quantum added per unit of weight during congestion avoidance.
pub const DEFAULT_AVOIDANCE_INCREMENT: DataRate = DataRate::from_mbps(10);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("gamma must lie strictly between 0 and 1, got {0}")]
    GammaOutOfRange(f64),

    #[error("tunnel update interval must be greater than zero")]
    ZeroInterval,

    #[error("rate bounds must satisfy min <= thresh <= max (min: {min}, thresh: {thresh}, max: {max})")]
    InvertedRateBounds {
        min: DataRate,
        thresh: DataRate,
        max: DataRate,
    },

    #[error("invalid data rate: {0:?}")]
    InvalidDataRate(String),

    #[error("failed reading configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed parsing configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed serializing configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Parameters of a single tunnel's control loop.
///
/// Fixed for the lifetime of a tunnel; validated once when the tunnel is built.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TunnelConfig {
    /// Weight given to new samples against the past in the estimation of
    /// alpha. Must satisfy `0 < gamma < 1`.
    pub gamma: f64,

    /// Period of the tunnel update, in microseconds when serialized.
    #[serde_as(as = "DurationMicroSeconds<u64>")]
    pub interval: Duration,

    /// Max data rate of the tunnel.
    #[serde_as(as = "DisplayFromStr")]
    pub rate_max: DataRate,

    /// Min data rate of the tunnel.
    #[serde_as(as = "DisplayFromStr")]
    pub rate_min: DataRate,

    /// Initial rate threshold between slow-start-like growth and congestion
    /// avoidance.
    #[serde_as(as = "DisplayFromStr")]
    pub rate_thresh: DataRate,

    /// Rate added per unit of weight on every congestion-avoidance tick.
    #[serde_as(as = "DisplayFromStr")]
    pub avoidance_increment: DataRate,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            gamma: DEFAULT_GAMMA,
            interval: DEFAULT_INTERVAL,
            rate_max: DEFAULT_RATE_MAX,
            rate_min: DEFAULT_RATE_MIN,
            rate_thresh: DEFAULT_RATE_THRESH,
            avoidance_increment: DEFAULT_AVOIDANCE_INCREMENT,
        }
    }
}

impl TunnelConfig {
    /// Checks every range constraint; the first violation found is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // NaN fails both comparisons
        if !(self.gamma > 0.0 && self.gamma < 1.0) {
            return Err(ConfigError::GammaOutOfRange(self.gamma));
        }
        if self.interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if !(self.rate_min <= self.rate_thresh && self.rate_thresh <= self.rate_max) {
            return Err(ConfigError::InvertedRateBounds {
                min: self.rate_min,
                thresh: self.rate_thresh,
                max: self.rate_max,
            });
        }
        Ok(())
    }

    /// Reads a TOML file; keys that are absent take their default value.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(path = %path.as_ref().display(), ?config, "Loaded tunnel configuration");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: TunnelConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }
}

pub fn set_logger(level: Option<tracing::level_filters::LevelFilter>) {
    #[cfg(feature = "trace")]
    {
        static LOGGER_SET: AtomicBool = AtomicBool::new(false);
        if LOGGER_SET
            .compare_exchange(false, true, Ordering::Release, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        if let Err(err) = crate::tracing::tracer::init_tracer(level) {
            eprintln!("failed tracing initialization: {err}");
        }
    }
    #[cfg(not(feature = "trace"))]
    {
        let _ = level;
    }
}
