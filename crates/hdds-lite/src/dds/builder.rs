// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant builder.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use super::participant::Participant;
use crate::config::{ConfigError, DiscoveryPeer, ParticipantConfig, ReliableConfig};
use crate::error::{InitError, Result};

/// Builder for configuring and creating a started [`Participant`].
///
/// ```rust,no_run
/// use hdds_lite::Participant;
/// use std::time::Duration;
///
/// let participant = Participant::builder("node_sub")
///     .domain_id(3)
///     .announce_interval(Duration::from_millis(200))
///     .lease_duration(Duration::from_millis(600))
///     .add_static_peer("192.168.1.20")
///     .build()
///     .expect("participant");
/// ```
#[derive(Debug, Clone)]
pub struct ParticipantBuilder {
    name: String,
    domain_id: u32,
    config: ParticipantConfig,
    env_overrides: bool,
    peer_error: Option<ConfigError>,
}

impl ParticipantBuilder {
    pub(super) fn new(name: &str) -> Self {
        ParticipantBuilder {
            name: name.to_string(),
            domain_id: 0,
            config: ParticipantConfig::default(),
            env_overrides: false,
            peer_error: None,
        }
    }

    pub fn domain_id(mut self, domain_id: u32) -> Self {
        self.domain_id = domain_id;
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ParticipantConfig) -> Self {
        self.config = config;
        self
    }

    /// Apply `HDDS_LITE_*` environment overrides at build time.
    pub fn with_env_overrides(mut self) -> Self {
        self.env_overrides = true;
        self
    }

    /// Fixed participant index instead of the first free one.
    pub fn participant_index(mut self, index: u8) -> Self {
        self.config.discovery.participant_index = Some(index);
        self
    }

    pub fn announce_interval(mut self, interval: Duration) -> Self {
        self.config.discovery.announce_interval = interval;
        self
    }

    pub fn lease_duration(mut self, lease: Duration) -> Self {
        self.config.discovery.lease_duration = lease;
        self
    }

    /// Enable multicast discovery on the default group (239.255.0.1).
    pub fn with_multicast(mut self) -> Self {
        self.config.discovery.multicast_group = Some(crate::config::DEFAULT_MULTICAST_GROUP);
        self
    }

    /// Add a discovery peer, `"ip"` or `"ip:port"`.
    ///
    /// A malformed address makes [`build`](Self::build) fail.
    pub fn add_static_peer(mut self, peer: &str) -> Self {
        match peer.parse::<DiscoveryPeer>() {
            Ok(peer) => {
                if !self.config.discovery.peers.contains(&peer) {
                    self.config.discovery.peers.push(peer);
                }
            }
            Err(e) => self.peer_error = Some(e),
        }
        self
    }

    /// Discover only through the configured multicast group and peers added
    /// afterwards (drops the default localhost peer).
    pub fn without_default_peers(mut self) -> Self {
        let localhost = DiscoveryPeer::Host(IpAddr::V4(Ipv4Addr::LOCALHOST));
        self.config.discovery.peers.retain(|p| *p != localhost);
        self
    }

    pub fn advertised_address(mut self, address: IpAddr) -> Self {
        self.config.discovery.advertised_address = Some(address);
        self
    }

    pub fn reliable(mut self, reliable: ReliableConfig) -> Self {
        self.config.reliable = reliable;
        self
    }

    /// Create and start the participant.
    pub fn build(self) -> Result<Participant> {
        if let Some(e) = self.peer_error {
            return Err(InitError::InvalidConfig(e).into());
        }
        let config = if self.env_overrides {
            self.config
                .with_env_overrides()
                .map_err(InitError::InvalidConfig)?
        } else {
            self.config
        };
        let participant = Participant::new(&self.name, self.domain_id, config)?;
        participant.start()?;
        Ok(participant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_builder_collects_settings() {
        let builder = Participant::builder("b")
            .domain_id(4)
            .participant_index(2)
            .announce_interval(Duration::from_millis(100))
            .add_static_peer("10.0.0.2")
            .add_static_peer("10.0.0.2")
            .add_static_peer("10.0.0.3:7412");
        assert_eq!(builder.domain_id, 4);
        assert_eq!(builder.config.discovery.participant_index, Some(2));
        assert_eq!(builder.config.discovery.peers.len(), 3);

        let builder = builder.without_default_peers();
        assert_eq!(builder.config.discovery.peers.len(), 2);
    }

    #[test]
    fn test_bad_peer_fails_build() {
        let result = Participant::builder("b")
            .domain_id(170)
            .add_static_peer("not an address")
            .build();
        assert!(matches!(
            result,
            Err(Error::Init(InitError::InvalidConfig(_)))
        ));
    }

    #[test]
    fn test_build_starts_participant() {
        let participant = Participant::builder("built")
            .domain_id(171)
            .announce_interval(Duration::from_millis(100))
            .build()
            .unwrap();
        assert!(participant.is_active());
        assert_eq!(participant.domain_id(), 171);
        assert_eq!(participant.participant_index(), Some(0));
    }
}
