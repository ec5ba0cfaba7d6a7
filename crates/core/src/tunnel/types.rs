//! Small value types shared by the tunnel control loop.
//!
//! Rates are whole bits per second. Converting a floating point candidate into
//! a [`DataRate`] truncates toward zero and saturates, so pathological results
//! of the rate formulas (negative, NaN, overflowing) still map onto a valid
//! rate that the final clamp can bound.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// A data rate in bits per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DataRate(u64);

impl DataRate {
    pub const ZERO: DataRate = DataRate(0);
    pub const MAX: DataRate = DataRate(u64::MAX);

    pub const fn from_bps(bps: u64) -> Self {
        Self(bps)
    }

    pub const fn from_kbps(kbps: u64) -> Self {
        Self(kbps.saturating_mul(1_000))
    }

    pub const fn from_mbps(mbps: u64) -> Self {
        Self(mbps.saturating_mul(1_000_000))
    }

    pub const fn from_gbps(gbps: u64) -> Self {
        Self(gbps.saturating_mul(1_000_000_000))
    }

    /// Converts a floating point bit rate, truncating toward zero.
    ///
    /// Negative and NaN inputs become zero, values beyond `u64::MAX` saturate.
    pub fn from_bps_f64(bps: f64) -> Self {
        // `as` casts from float to int saturate and map NaN to 0
        Self(bps as u64)
    }

    pub const fn bps(&self) -> u64 {
        self.0
    }

    pub fn bps_f64(&self) -> f64 {
        self.0 as f64
    }

    /// Number of whole bytes this rate transmits during `interval`.
    pub fn bytes_per(&self, interval: Duration) -> u64 {
        let bits = (self.0 as u128).saturating_mul(interval.as_nanos()) / 1_000_000_000;
        u64::try_from(bits / 8).unwrap_or(u64::MAX)
    }

    /// Bounds the rate to `[min, max]`, applying `max` first.
    ///
    /// Unlike [`Ord::clamp`] this never panics when `min > max`; the lower
    /// bound wins in that case.
    pub fn bounded(self, min: DataRate, max: DataRate) -> DataRate {
        self.min(max).max(min)
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bps", self.0)
    }
}

/// Unit suffixes accepted when parsing, with their multiplier in bits.
const UNITS: &[(&str, f64)] = &[
    ("bps", 1.0),
    ("b/s", 1.0),
    ("Bps", 8.0),
    ("B/s", 8.0),
    ("kbps", 1e3),
    ("Kbps", 1e3),
    ("kb/s", 1e3),
    ("Kb/s", 1e3),
    ("kBps", 8e3),
    ("KBps", 8e3),
    ("kB/s", 8e3),
    ("KB/s", 8e3),
    ("Kib/s", 1024.0),
    ("Kibps", 1024.0),
    ("KiB/s", 8.0 * 1024.0),
    ("KiBps", 8.0 * 1024.0),
    ("Mbps", 1e6),
    ("Mb/s", 1e6),
    ("MBps", 8e6),
    ("MB/s", 8e6),
    ("Mib/s", 1_048_576.0),
    ("Mibps", 1_048_576.0),
    ("MiB/s", 8.0 * 1_048_576.0),
    ("MiBps", 8.0 * 1_048_576.0),
    ("Gbps", 1e9),
    ("Gb/s", 1e9),
    ("GBps", 8e9),
    ("GB/s", 8e9),
    ("Gib/s", 1_073_741_824.0),
    ("Gibps", 1_073_741_824.0),
    ("GiB/s", 8.0 * 1_073_741_824.0),
    ("GiBps", 8.0 * 1_073_741_824.0),
];

impl FromStr for DataRate {
    type Err = ConfigError;

    /// Parses strings such as `"1000Mbps"`, `"2.5 Gb/s"` or `"1500000"`.
    ///
    /// A bare number is taken as bits per second.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidDataRate(s.to_string());
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E'))
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);
        let value: f64 = number.parse().map_err(|_| invalid())?;
        if !value.is_finite() || value < 0.0 {
            return Err(invalid());
        }
        let unit = unit.trim();
        let multiplier = if unit.is_empty() {
            1.0
        } else {
            UNITS
                .iter()
                .find(|(suffix, _)| *suffix == unit)
                .map(|(_, m)| *m)
                .ok_or_else(invalid)?
        };
        Ok(DataRate::from_bps_f64(value * multiplier))
    }
}

/// Tenant owning a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TenantId(pub u32);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tenant-{}", self.0)
    }
}

/// Traffic class carried by a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TunnelType {
    /// Flows whose completion time matters most (small, interactive).
    LatencySensitive,
    /// Flows that must complete before a deadline.
    DeadlineSensitive,
    /// Everything else.
    BestEffort,
}

impl fmt::Display for TunnelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelType::LatencySensitive => write!(f, "LS"),
            TunnelType::DeadlineSensitive => write!(f, "DS"),
            TunnelType::BestEffort => write!(f, "BE"),
        }
    }
}

/// Identifier of a flow inside a tunnel's flow table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowId(pub u64);

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flow-{}", self.0)
    }
}

/// Immutable identity of a tunnel: one tenant, one class, one address pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunnelIdentity {
    pub tenant: TenantId,
    pub kind: TunnelType,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl TunnelIdentity {
    pub fn new(tenant: TenantId, kind: TunnelType, src: Ipv4Addr, dst: Ipv4Addr) -> Self {
        Self {
            tenant,
            kind,
            src,
            dst,
        }
    }
}

impl fmt::Display for TunnelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {} -> {}", self.tenant, self.kind, self.src, self.dst)
    }
}

/// Routing decision handed to the forwarding target along with each packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub destination: Ipv4Addr,
    pub source: Ipv4Addr,
    pub gateway: Ipv4Addr,
    /// Output interface index.
    pub interface: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decimal_units() {
        assert_eq!("1000Mbps".parse::<DataRate>().unwrap(), DataRate::from_mbps(1000));
        assert_eq!("1Mbps".parse::<DataRate>().unwrap(), DataRate::from_bps(1_000_000));
        assert_eq!("10 kbps".parse::<DataRate>().unwrap(), DataRate::from_kbps(10));
        assert_eq!("2.5Gb/s".parse::<DataRate>().unwrap(), DataRate::from_bps(2_500_000_000));
        assert_eq!("1500".parse::<DataRate>().unwrap(), DataRate::from_bps(1500));
    }

    #[test]
    fn test_parse_byte_and_binary_units() {
        assert_eq!("1KBps".parse::<DataRate>().unwrap(), DataRate::from_bps(8_000));
        assert_eq!("1Kibps".parse::<DataRate>().unwrap(), DataRate::from_bps(1024));
        assert_eq!("1MiBps".parse::<DataRate>().unwrap(), DataRate::from_bps(8 * 1_048_576));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<DataRate>().is_err());
        assert!("fast".parse::<DataRate>().is_err());
        assert!("10Tbps".parse::<DataRate>().is_err());
        assert!("1.2.3Mbps".parse::<DataRate>().is_err());
    }

    #[test]
    fn test_display_round_trips() {
        let rate = DataRate::from_mbps(500);
        assert_eq!(rate.to_string(), "500000000bps");
        assert_eq!(rate.to_string().parse::<DataRate>().unwrap(), rate);
    }

    #[test]
    fn test_from_f64_truncates_and_saturates() {
        assert_eq!(DataRate::from_bps_f64(7.9), DataRate::from_bps(7));
        assert_eq!(DataRate::from_bps_f64(-3.0), DataRate::ZERO);
        assert_eq!(DataRate::from_bps_f64(f64::NAN), DataRate::ZERO);
        assert_eq!(DataRate::from_bps_f64(f64::INFINITY), DataRate::MAX);
    }

    #[test]
    fn test_bytes_per_interval() {
        let rate = DataRate::from_mbps(1000);
        assert_eq!(rate.bytes_per(Duration::from_micros(100)), 12_500);
        assert_eq!(DataRate::ZERO.bytes_per(Duration::from_secs(1)), 0);
    }

    #[test]
    fn test_bounded_prefers_lower_bound_when_inverted() {
        let rate = DataRate::from_mbps(5);
        assert_eq!(
            rate.bounded(DataRate::from_mbps(1), DataRate::from_mbps(3)),
            DataRate::from_mbps(3)
        );
        assert_eq!(
            rate.bounded(DataRate::from_mbps(10), DataRate::from_mbps(3)),
            DataRate::from_mbps(10)
        );
    }
}
