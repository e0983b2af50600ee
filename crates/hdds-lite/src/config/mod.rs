// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant configuration.
//!
//! # Port layout
//!
//! Ports follow the RTPS-style mapping so several participants can share a
//! host and a domain:
//!
//! | Port | Formula | Domain 0, index 0 |
//! |------|---------|-------------------|
//! | Discovery multicast | `PORT_BASE + 250*d` | 7400 |
//! | Discovery unicast | `PORT_BASE + 10 + 250*d + 2*i` | 7410 |
//! | Reliable listener | `PORT_BASE + 11 + 250*d + 2*i` | 7411 |
//!
//! # Sources
//!
//! Defaults, then (optionally) a YAML file, then `HDDS_LITE_*` environment
//! overrides, then builder calls in code.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

#[cfg(feature = "config-loaders")]
pub mod yaml;

// =======================================================================
// Port mapping constants
// =======================================================================

/// Base port, every other port derives from it.
pub const PORT_BASE: u16 = 7400;

/// Highest valid domain id.
pub const MAX_DOMAIN_ID: u32 = 232;

/// Port distance between consecutive domains.
pub const DOMAIN_ID_GAIN: u16 = 250;

/// Port distance between consecutive participants of a domain.
pub const PARTICIPANT_ID_GAIN: u16 = 2;

/// Offset of the discovery unicast port.
pub const DISCOVERY_UNICAST_OFFSET: u16 = 10;

/// Offset of the reliable (data) listener port.
pub const DATA_UNICAST_OFFSET: u16 = 11;

/// Participant indices per domain (0..120).
pub const MAX_PARTICIPANT_INDEX: u8 = 120;

// =======================================================================
// Defaults
// =======================================================================

pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1);

/// Three announce intervals.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(3);

/// Group used when multicast is enabled without an explicit address.
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 0, 1);

/// How many participant indices a `DiscoveryPeer::Host` entry probes.
pub const DEFAULT_HOST_PROBE_SLOTS: u8 = 4;

/// Reliable frame limit (anti-OOM).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// =======================================================================
// Env variable names
// =======================================================================

pub const ENV_PEERS: &str = "HDDS_LITE_PEERS";
pub const ENV_MULTICAST: &str = "HDDS_LITE_MULTICAST";
pub const ENV_ANNOUNCE_MS: &str = "HDDS_LITE_ANNOUNCE_MS";
pub const ENV_LEASE_MS: &str = "HDDS_LITE_LEASE_MS";
pub const ENV_PARTICIPANT_INDEX: &str = "HDDS_LITE_PARTICIPANT_INDEX";
pub const ENV_ADVERTISED_ADDRESS: &str = "HDDS_LITE_ADVERTISED_ADDRESS";

// =======================================================================
// Errors
// =======================================================================

/// Configuration error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(msg) => write!(f, "I/O error: {}", msg),
            ConfigError::ParseError(msg) => write!(f, "parse error: {}", msg),
            ConfigError::InvalidValue(msg) => write!(f, "invalid value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

// =======================================================================
// Discovery peers
// =======================================================================

/// A static discovery destination.
///
/// Used instead of (or alongside) multicast when the deployment cannot
/// rely on multicast routing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscoveryPeer {
    /// Exact discovery socket of one remote participant.
    Addr(SocketAddr),
    /// A host whose participants use the standard port layout; expands to
    /// the discovery unicast ports of the first `host_probe_slots` indices.
    Host(IpAddr),
}

impl FromStr for DiscoveryPeer {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(DiscoveryPeer::Addr(addr));
        }
        s.parse::<IpAddr>()
            .map(DiscoveryPeer::Host)
            .map_err(|_| ConfigError::ParseError(format!("invalid discovery peer '{}'", s)))
    }
}

impl fmt::Display for DiscoveryPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryPeer::Addr(addr) => write!(f, "{}", addr),
            DiscoveryPeer::Host(ip) => write!(f, "{}", ip),
        }
    }
}

// =======================================================================
// DiscoveryConfig
// =======================================================================

/// Discovery engine settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Period between self announcements.
    pub announce_interval: Duration,
    /// A remote participant not heard from for this long is evicted.
    pub lease_duration: Duration,
    /// Multicast group to announce to and listen on (`None` = disabled).
    pub multicast_group: Option<Ipv4Addr>,
    /// Static unicast destinations.
    pub peers: Vec<DiscoveryPeer>,
    /// Fixed participant index (`None` = first free index).
    pub participant_index: Option<u8>,
    /// Indices probed per `DiscoveryPeer::Host`.
    pub host_probe_slots: u8,
    /// Address advertised in announcements (`None` = receivers use the
    /// datagram source address).
    pub advertised_address: Option<IpAddr>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            announce_interval: DEFAULT_ANNOUNCE_INTERVAL,
            lease_duration: DEFAULT_LEASE_DURATION,
            multicast_group: None,
            peers: vec![DiscoveryPeer::Host(IpAddr::V4(Ipv4Addr::LOCALHOST))],
            participant_index: None,
            host_probe_slots: DEFAULT_HOST_PROBE_SLOTS,
            advertised_address: None,
        }
    }
}

impl DiscoveryConfig {
    pub fn with_announce_interval(mut self, interval: Duration) -> Self {
        self.announce_interval = interval;
        self
    }

    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    /// Enable multicast discovery on `group`.
    pub fn with_multicast(mut self, group: Ipv4Addr) -> Self {
        self.multicast_group = Some(group);
        self
    }

    /// Replace the static peer list.
    pub fn with_peers(mut self, peers: impl IntoIterator<Item = DiscoveryPeer>) -> Self {
        self.peers = peers.into_iter().collect();
        self
    }

    pub fn add_peer(mut self, peer: DiscoveryPeer) -> Self {
        self.peers.push(peer);
        self
    }

    pub fn with_participant_index(mut self, index: u8) -> Self {
        self.participant_index = Some(index);
        self
    }

    pub fn with_host_probe_slots(mut self, slots: u8) -> Self {
        self.host_probe_slots = slots;
        self
    }

    pub fn with_advertised_address(mut self, address: IpAddr) -> Self {
        self.advertised_address = Some(address);
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.announce_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "announce_interval cannot be 0".into(),
            ));
        }
        if self.lease_duration <= self.announce_interval {
            return Err(ConfigError::InvalidValue(
                "lease_duration must exceed announce_interval".into(),
            ));
        }
        if self.multicast_group.is_none() && self.peers.is_empty() {
            return Err(ConfigError::InvalidValue(
                "no discovery destination: enable multicast or configure peers".into(),
            ));
        }
        if let Some(group) = self.multicast_group {
            if !group.is_multicast() {
                return Err(ConfigError::InvalidValue(format!(
                    "{} is not a multicast address",
                    group
                )));
            }
        }
        if let Some(index) = self.participant_index {
            if index >= MAX_PARTICIPANT_INDEX {
                return Err(ConfigError::InvalidValue(format!(
                    "participant_index {} out of range (0-{})",
                    index,
                    MAX_PARTICIPANT_INDEX - 1
                )));
            }
        }
        if self.host_probe_slots == 0 || self.host_probe_slots > MAX_PARTICIPANT_INDEX {
            return Err(ConfigError::InvalidValue(format!(
                "host_probe_slots must be 1-{}",
                MAX_PARTICIPANT_INDEX
            )));
        }
        Ok(())
    }
}

// =======================================================================
// ReliableConfig
// =======================================================================

/// Reliable (TCP) channel settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReliableConfig {
    /// Listener bind address.
    pub listen_address: IpAddr,
    /// Maximum frame size accepted or sent.
    pub max_message_size: usize,
    /// Disable Nagle's algorithm.
    pub nodelay: bool,
    /// A connect still pending after this long fails as unreachable.
    pub connect_timeout: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            listen_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            nodelay: true,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ReliableConfig {
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_size == 0 || self.max_message_size > u32::MAX as usize {
            return Err(ConfigError::InvalidValue(
                "max_message_size must be 1..=u32::MAX".into(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "connect_timeout cannot be 0".into(),
            ));
        }
        Ok(())
    }
}

// =======================================================================
// ParticipantConfig
// =======================================================================

/// Complete participant configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParticipantConfig {
    pub discovery: DiscoveryConfig,
    pub reliable: ReliableConfig,
}

impl ParticipantConfig {
    /// Defaults with `HDDS_LITE_*` environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Apply `HDDS_LITE_*` environment overrides on top of `self`.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (same keys as the env).
    pub fn with_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(peers) = lookup(ENV_PEERS) {
            self.discovery.peers = parse_peer_list(&peers)?;
        }
        if let Some(value) = lookup(ENV_MULTICAST) {
            let value = value.trim();
            self.discovery.multicast_group = match value {
                "" | "off" | "0" | "false" => None,
                "on" | "1" | "true" => Some(DEFAULT_MULTICAST_GROUP),
                group => Some(group.parse().map_err(|_| {
                    ConfigError::ParseError(format!("{}: invalid group '{}'", ENV_MULTICAST, group))
                })?),
            };
        }
        if let Some(ms) = lookup(ENV_ANNOUNCE_MS) {
            self.discovery.announce_interval =
                Duration::from_millis(parse_number(ENV_ANNOUNCE_MS, &ms)?);
        }
        if let Some(ms) = lookup(ENV_LEASE_MS) {
            self.discovery.lease_duration = Duration::from_millis(parse_number(ENV_LEASE_MS, &ms)?);
        }
        if let Some(index) = lookup(ENV_PARTICIPANT_INDEX) {
            self.discovery.participant_index = Some(parse_number(ENV_PARTICIPANT_INDEX, &index)?);
        }
        if let Some(address) = lookup(ENV_ADVERTISED_ADDRESS) {
            let address = address.trim().parse().map_err(|_| {
                ConfigError::ParseError(format!(
                    "{}: invalid address '{}'",
                    ENV_ADVERTISED_ADDRESS,
                    address.trim()
                ))
            })?;
            self.discovery.advertised_address = Some(address);
        }
        Ok(self)
    }

    pub fn with_discovery(mut self, discovery: DiscoveryConfig) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_reliable(mut self, reliable: ReliableConfig) -> Self {
        self.reliable = reliable;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.discovery.validate()?;
        self.reliable.validate()
    }
}

/// Parse a comma-separated peer list (`"10.0.0.2, 10.0.0.3:7412"`).
pub fn parse_peer_list(list: &str) -> Result<Vec<DiscoveryPeer>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(DiscoveryPeer::from_str)
        .collect()
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::ParseError(format!("{}: invalid number '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ParticipantConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.discovery.announce_interval, Duration::from_secs(1));
        assert_eq!(config.discovery.lease_duration, Duration::from_secs(3));
        assert!(config.discovery.multicast_group.is_none());
        assert_eq!(
            config.discovery.peers,
            vec![DiscoveryPeer::Host(IpAddr::V4(Ipv4Addr::LOCALHOST))]
        );
    }

    #[test]
    fn test_peer_parsing() {
        assert_eq!(
            "10.0.0.5".parse::<DiscoveryPeer>().unwrap(),
            DiscoveryPeer::Host("10.0.0.5".parse().unwrap())
        );
        assert_eq!(
            "10.0.0.5:7412".parse::<DiscoveryPeer>().unwrap(),
            DiscoveryPeer::Addr("10.0.0.5:7412".parse().unwrap())
        );
        assert!("not-an-ip".parse::<DiscoveryPeer>().is_err());
        assert_eq!(parse_peer_list(" 10.0.0.1 , ,10.0.0.2:1 ").unwrap().len(), 2);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero = DiscoveryConfig::default().with_announce_interval(Duration::ZERO);
        assert!(zero.validate().is_err());

        let short_lease = DiscoveryConfig::default().with_lease_duration(Duration::from_millis(500));
        assert!(short_lease.validate().is_err());

        let nowhere = DiscoveryConfig::default().with_peers(Vec::new());
        assert!(nowhere.validate().is_err());

        let unicast_group = DiscoveryConfig::default().with_multicast(Ipv4Addr::new(10, 0, 0, 1));
        assert!(unicast_group.validate().is_err());

        let index = DiscoveryConfig::default().with_participant_index(120);
        assert!(index.validate().is_err());

        let frame = ReliableConfig::default().with_max_message_size(0);
        assert!(frame.validate().is_err());
    }

    #[test]
    fn test_multicast_only_is_valid() {
        let config = DiscoveryConfig::default()
            .with_peers(Vec::new())
            .with_multicast(DEFAULT_MULTICAST_GROUP);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = ParticipantConfig::default()
            .with_overrides_from(lookup(&[
                (ENV_PEERS, "192.168.1.2,192.168.1.3:7412"),
                (ENV_MULTICAST, "on"),
                (ENV_ANNOUNCE_MS, "250"),
                (ENV_LEASE_MS, "750"),
                (ENV_PARTICIPANT_INDEX, "3"),
                (ENV_ADVERTISED_ADDRESS, "192.168.1.1"),
            ]))
            .unwrap();

        assert_eq!(config.discovery.peers.len(), 2);
        assert_eq!(
            config.discovery.multicast_group,
            Some(DEFAULT_MULTICAST_GROUP)
        );
        assert_eq!(
            config.discovery.announce_interval,
            Duration::from_millis(250)
        );
        assert_eq!(config.discovery.lease_duration, Duration::from_millis(750));
        assert_eq!(config.discovery.participant_index, Some(3));
        assert_eq!(
            config.discovery.advertised_address,
            Some("192.168.1.1".parse().unwrap())
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_reject_garbage() {
        let err = ParticipantConfig::default()
            .with_overrides_from(lookup(&[(ENV_ANNOUNCE_MS, "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));

        let off = ParticipantConfig::default()
            .with_overrides_from(lookup(&[(ENV_MULTICAST, "off")]))
            .unwrap();
        assert!(off.discovery.multicast_group.is_none());
    }
}
