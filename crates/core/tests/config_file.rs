use std::io::Write;
use std::net::Ipv4Addr;
use std::time::Duration;

use testresult::TestResult;

use c3p::config::{ConfigError, TunnelConfig};
use c3p::simulation::TunnelSim;
use c3p::tunnel::{DataRate, EcnCounter, TenantId, TunnelError, TunnelIdentity, TunnelType};

fn identity() -> TunnelIdentity {
    TunnelIdentity::new(
        TenantId(3),
        TunnelType::LatencySensitive,
        Ipv4Addr::LOCALHOST,
        Ipv4Addr::new(127, 0, 0, 2),
    )
}

#[test]
fn file_config_drives_tick_interval() -> TestResult {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(
        file,
        r#"
gamma = 0.125
interval = 1000
rate-min = "10Mbps"
rate-thresh = "100Mbps"
rate-max = "1Gbps"
avoidance-increment = "1Mbps"
"#
    )?;

    let config = TunnelConfig::load(file.path())?;
    assert_eq!(config.interval, Duration::from_millis(1));
    assert_eq!(config.rate_thresh, DataRate::from_mbps(100));

    let mut sim = TunnelSim::new();
    let id = sim.add_tunnel(identity(), config, Box::new(EcnCounter::new()))?;
    sim.run_for(Duration::from_millis(10))?;

    let tunnel = sim.tunnel(id).expect("tunnel present");
    assert_eq!(tunnel.stats().ticks, 10);
    assert_eq!(tunnel.rate(), DataRate::from_mbps(10));
    // (7/8)^10, no marks ever reported
    assert!((tunnel.alpha() - 0.875f64.powi(10)).abs() < 1e-12);
    Ok(())
}

#[test]
fn saved_config_reloads_identically() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tunnel.toml");
    let config = TunnelConfig {
        gamma: 0.25,
        interval: Duration::from_micros(500),
        rate_max: DataRate::from_gbps(40),
        ..TunnelConfig::default()
    };
    std::fs::write(&path, config.to_toml()?)?;

    assert_eq!(TunnelConfig::load(&path)?, config);
    Ok(())
}

#[test]
fn invalid_file_is_rejected_before_any_tunnel_exists() -> TestResult {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, r#"rate-min = "2Gbps""#)?;

    let err = TunnelConfig::load(file.path()).expect_err("min above max");
    assert!(matches!(err, ConfigError::InvertedRateBounds { .. }));

    let mut sim = TunnelSim::new();
    let bad = TunnelConfig {
        rate_min: DataRate::from_gbps(2),
        ..TunnelConfig::default()
    };
    let err = sim
        .add_tunnel(identity(), bad, Box::new(EcnCounter::new()))
        .expect_err("config validated on construction");
    assert!(matches!(err, TunnelError::Config(_)));
    assert!(sim.is_empty());
    Ok(())
}

#[test]
fn missing_file_reports_io_error() {
    let err = TunnelConfig::load("/nonexistent/c3p/tunnel.toml").unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}
