//! Relay configuration
//!
//! Policies default to the values the web client expects; every one of them
//! can be overridden through the environment (a `.env` file is honoured).

use crate::protocol::MAX_ENVELOPE_SIZE;
use anyhow::{Context, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default relay port
pub const DEFAULT_PORT: u16 = 3000;

/// Liveness probe interval (30 seconds)
pub const PING_INTERVAL_SECS: u64 = 30;

/// Rooms older than this are removed regardless of activity (1 hour)
pub const ROOM_MAX_AGE_SECS: u64 = 60 * 60;

/// How often expired rooms are collected (10 minutes)
pub const ROOM_SWEEP_INTERVAL_SECS: u64 = 10 * 60;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: SocketAddr,
    /// Directory with the web client, served as a fallback route
    pub static_dir: Option<PathBuf>,
    pub ping_interval: Duration,
    pub room_max_age: Duration,
    pub room_sweep_interval: Duration,
    pub max_envelope_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            static_dir: None,
            ping_interval: Duration::from_secs(PING_INTERVAL_SECS),
            room_max_age: Duration::from_secs(ROOM_MAX_AGE_SECS),
            room_sweep_interval: Duration::from_secs(ROOM_SWEEP_INTERVAL_SECS),
            max_envelope_size: MAX_ENVELOPE_SIZE,
        }
    }
}

impl RelayConfig {
    /// Load from `.env` and the process environment
    pub fn from_env() -> Result<Self> {
        // Missing .env is fine
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup
    ///
    /// Recognised keys: `DELA_HOST`, `PORT` / `DELA_PORT`, `DELA_STATIC_DIR`,
    /// `DELA_PING_INTERVAL_SECS`, `DELA_ROOM_MAX_AGE_SECS`,
    /// `DELA_ROOM_SWEEP_INTERVAL_SECS`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let host = match lookup("DELA_HOST") {
            Some(host) => parse_value::<IpAddr>("DELA_HOST", &host)?,
            None => config.bind_addr.ip(),
        };
        let port = match lookup("DELA_PORT").or_else(|| lookup("PORT")) {
            Some(port) => parse_value::<u16>("DELA_PORT", &port)?,
            None => config.bind_addr.port(),
        };
        config.bind_addr = SocketAddr::new(host, port);

        if let Some(dir) = lookup("DELA_STATIC_DIR").filter(|d| !d.trim().is_empty()) {
            config.static_dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) = lookup("DELA_PING_INTERVAL_SECS") {
            config.ping_interval = parse_secs("DELA_PING_INTERVAL_SECS", &secs)?;
        }
        if let Some(secs) = lookup("DELA_ROOM_MAX_AGE_SECS") {
            config.room_max_age = parse_secs("DELA_ROOM_MAX_AGE_SECS", &secs)?;
        }
        if let Some(secs) = lookup("DELA_ROOM_SWEEP_INTERVAL_SECS") {
            config.room_sweep_interval = parse_secs("DELA_ROOM_SWEEP_INTERVAL_SECS", &secs)?;
        }

        Ok(config)
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("Invalid value for {}: {:?}", key, raw))
}

// Intervals of zero would make tokio::time::interval panic
fn parse_secs(key: &str, raw: &str) -> Result<Duration> {
    let secs = parse_value::<u64>(key, raw)?;
    anyhow::ensure!(secs > 0, "{} must be greater than zero", key);
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.room_max_age, Duration::from_secs(3600));
        assert_eq!(config.room_sweep_interval, Duration::from_secs(600));
        assert_eq!(config.max_envelope_size, 100 * 1024 * 1024);
        assert!(config.static_dir.is_none());
    }

    #[test]
    fn test_port_from_platform_variable() {
        let config = RelayConfig::from_lookup(lookup_from(&[("PORT", "8081")])).unwrap();
        assert_eq!(config.bind_addr.port(), 8081);

        // DELA_PORT wins over PORT
        let config =
            RelayConfig::from_lookup(lookup_from(&[("PORT", "8081"), ("DELA_PORT", "9090")]))
                .unwrap();
        assert_eq!(config.bind_addr.port(), 9090);
    }

    #[test]
    fn test_overrides() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("DELA_HOST", "127.0.0.1"),
            ("DELA_STATIC_DIR", "client"),
            ("DELA_PING_INTERVAL_SECS", "5"),
            ("DELA_ROOM_MAX_AGE_SECS", "120"),
            ("DELA_ROOM_SWEEP_INTERVAL_SECS", "60"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:3000");
        assert_eq!(config.static_dir, Some(PathBuf::from("client")));
        assert_eq!(config.ping_interval, Duration::from_secs(5));
        assert_eq!(config.room_max_age, Duration::from_secs(120));
        assert_eq!(config.room_sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(RelayConfig::from_lookup(lookup_from(&[("PORT", "http")])).is_err());
        assert!(RelayConfig::from_lookup(lookup_from(&[("DELA_HOST", "nowhere")])).is_err());
        let err = RelayConfig::from_lookup(lookup_from(&[("DELA_PING_INTERVAL_SECS", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
    }
}
