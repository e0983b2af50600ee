// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! YAML participant configuration loader.
//!
//! Every key is optional; missing keys keep their defaults.
//!
//! ```yaml
//! discovery:
//!   announce_interval_ms: 500
//!   lease_duration_ms: 1500
//!   multicast_group: 239.255.0.1
//!   peers: ["10.0.0.5", "10.0.0.6:7412"]
//!   participant_index: 2
//!   host_probe_slots: 8
//!   advertised_address: 10.0.0.4
//! reliable:
//!   listen_address: 0.0.0.0
//!   max_message_size: 1048576
//!   nodelay: true
//!   connect_timeout_ms: 2000
//! ```

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::{ConfigError, DiscoveryPeer, ParticipantConfig};

/// Root YAML document structure.
#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct YamlParticipantDocument {
    pub discovery: YamlDiscovery,
    pub reliable: YamlReliable,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct YamlDiscovery {
    pub announce_interval_ms: Option<u64>,
    pub lease_duration_ms: Option<u64>,
    pub multicast_group: Option<String>,
    pub peers: Option<Vec<String>>,
    pub participant_index: Option<u8>,
    pub host_probe_slots: Option<u8>,
    pub advertised_address: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct YamlReliable {
    pub listen_address: Option<String>,
    pub max_message_size: Option<usize>,
    pub nodelay: Option<bool>,
    pub connect_timeout_ms: Option<u64>,
}

impl ParticipantConfig {
    /// Load a configuration file. The result is validated.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&content)
    }

    /// Parse YAML content. The result is validated.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let doc: YamlParticipantDocument = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::ParseError(format!("failed to parse YAML: {}", e)))?;
        let config = doc.into_config()?;
        config.validate()?;
        Ok(config)
    }
}

impl YamlParticipantDocument {
    /// Overlay the document on the defaults.
    pub fn into_config(self) -> Result<ParticipantConfig, ConfigError> {
        let mut config = ParticipantConfig::default();
        let d = self.discovery;
        let discovery = &mut config.discovery;

        if let Some(ms) = d.announce_interval_ms {
            discovery.announce_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = d.lease_duration_ms {
            discovery.lease_duration = Duration::from_millis(ms);
        }
        if let Some(group) = d.multicast_group {
            discovery.multicast_group = Some(parse_field("multicast_group", &group)?);
        }
        if let Some(peers) = d.peers {
            discovery.peers = peers
                .iter()
                .map(|p| DiscoveryPeer::from_str(p))
                .collect::<Result<_, _>>()?;
        }
        if let Some(index) = d.participant_index {
            discovery.participant_index = Some(index);
        }
        if let Some(slots) = d.host_probe_slots {
            discovery.host_probe_slots = slots;
        }
        if let Some(address) = d.advertised_address {
            discovery.advertised_address = Some(parse_field("advertised_address", &address)?);
        }

        let r = self.reliable;
        let reliable = &mut config.reliable;
        if let Some(address) = r.listen_address {
            reliable.listen_address = parse_field("listen_address", &address)?;
        }
        if let Some(size) = r.max_message_size {
            reliable.max_message_size = size;
        }
        if let Some(nodelay) = r.nodelay {
            reliable.nodelay = nodelay;
        }
        if let Some(ms) = r.connect_timeout_ms {
            reliable.connect_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }
}

fn parse_field<T: FromStr>(field: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::ParseError(format!("{}: invalid value '{}'", field, value)))
}
