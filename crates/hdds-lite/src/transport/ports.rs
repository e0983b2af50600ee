// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Port mapping.
//!
//! RTPS-style allocation: the domain selects a 250-port block, the
//! participant index selects a pair of unicast ports inside it.

use std::convert::TryFrom;
use std::net::{IpAddr, SocketAddr};

use crate::config::{
    DATA_UNICAST_OFFSET, DISCOVERY_UNICAST_OFFSET, DOMAIN_ID_GAIN, MAX_DOMAIN_ID,
    MAX_PARTICIPANT_INDEX, PARTICIPANT_ID_GAIN, PORT_BASE,
};
use crate::error::DiscoveryError;

/// Ports for one participant in a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    /// Shared multicast discovery port.
    pub discovery_multicast: u16,
    /// Per-participant discovery unicast port.
    pub discovery_unicast: u16,
    /// Preferred reliable listener port.
    pub data_unicast: u16,
}

impl PortMapping {
    /// Calculate ports from domain_id + participant index.
    pub fn calculate(domain_id: u32, participant_index: u8) -> Result<Self, DiscoveryError> {
        if domain_id > MAX_DOMAIN_ID {
            return Err(DiscoveryError::InvalidDomainId(domain_id));
        }
        if participant_index >= MAX_PARTICIPANT_INDEX {
            return Err(DiscoveryError::InvalidParticipantIndex(participant_index));
        }

        let multicast_base =
            u32::from(PORT_BASE) + u32::from(DOMAIN_ID_GAIN) * domain_id;
        let participant_offset =
            u32::from(PARTICIPANT_ID_GAIN) * u32::from(participant_index);
        let port = |offset: u32| u16::try_from(multicast_base + offset);

        // Upper domains leave room for fewer participants below 65535.
        match (
            port(0),
            port(u32::from(DISCOVERY_UNICAST_OFFSET) + participant_offset),
            port(u32::from(DATA_UNICAST_OFFSET) + participant_offset),
        ) {
            (Ok(discovery_multicast), Ok(discovery_unicast), Ok(data_unicast)) => Ok(PortMapping {
                discovery_multicast,
                discovery_unicast,
                data_unicast,
            }),
            _ => Err(DiscoveryError::InvalidParticipantIndex(participant_index)),
        }
    }

    /// Discovery unicast sockets of the first `slots` participants on `host`.
    pub fn host_discovery_addrs(
        host: IpAddr,
        domain_id: u32,
        slots: u8,
    ) -> Result<Vec<SocketAddr>, DiscoveryError> {
        Self::calculate(domain_id, 0)?;
        Ok((0..slots.min(MAX_PARTICIPANT_INDEX))
            .map_while(|index| Self::calculate(domain_id, index).ok())
            .map(|mapping| SocketAddr::new(host, mapping.discovery_unicast))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_calculation_domain_0() {
        let p0 = PortMapping::calculate(0, 0).expect("domain 0, index 0");
        assert_eq!(p0.discovery_multicast, 7400);
        assert_eq!(p0.discovery_unicast, 7410);
        assert_eq!(p0.data_unicast, 7411);

        let p1 = PortMapping::calculate(0, 1).expect("domain 0, index 1");
        assert_eq!(p1.discovery_multicast, 7400);
        assert_eq!(p1.discovery_unicast, 7412);
        assert_eq!(p1.data_unicast, 7413);
    }

    #[test]
    fn test_port_calculation_domain_1() {
        let p0 = PortMapping::calculate(1, 0).expect("domain 1, index 0");
        assert_eq!(p0.discovery_multicast, 7650);
        assert_eq!(p0.discovery_unicast, 7660);
        assert_eq!(p0.data_unicast, 7661);
    }

    #[test]
    fn test_highest_domain_limits_index() {
        let p = PortMapping::calculate(MAX_DOMAIN_ID, 0).expect("domain 232, index 0");
        assert_eq!(p.discovery_multicast, 65400);
        assert_eq!(p.data_unicast, 65411);

        assert!(PortMapping::calculate(MAX_DOMAIN_ID, 62).is_ok());
        assert!(matches!(
            PortMapping::calculate(MAX_DOMAIN_ID, 63),
            Err(DiscoveryError::InvalidParticipantIndex(63))
        ));
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            PortMapping::calculate(233, 0),
            Err(DiscoveryError::InvalidDomainId(233))
        ));
        assert!(matches!(
            PortMapping::calculate(0, 120),
            Err(DiscoveryError::InvalidParticipantIndex(120))
        ));
    }

    #[test]
    fn test_host_discovery_addrs() {
        let host: IpAddr = "10.1.2.3".parse().unwrap();
        let addrs = PortMapping::host_discovery_addrs(host, 2, 3).unwrap();
        let ports: Vec<u16> = addrs.iter().map(|a| a.port()).collect();
        assert_eq!(ports, vec![7910, 7912, 7914]);
        assert!(addrs.iter().all(|a| a.ip() == host));
    }
}
