// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery wire messages.
//!
//! Four message kinds share the discovery channel, told apart by the
//! `kind` byte of the common header:
//!
//! ```text
//! +--------+---------+------+----------+
//! | "HLDS" | ver u8  | kind | rsvd u16 |   8-byte header
//! +--------+---------+------+----------+
//! | body (little-endian, kind specific) |
//! +-------------------------------------+
//! ```
//!
//! | kind | message              | body                                                   |
//! |------|----------------------|--------------------------------------------------------|
//! | 0x01 | PARTICIPANT_ANNOUNCE | id[16], domain u32, name str16, address str16          |
//! | 0x02 | ENDPOINT_ANNOUNCE    | id[16], endpoint u32, role u8, port u16, topic, type   |
//! | 0x03 | ENDPOINT_WITHDRAW    | id[16], endpoint u32                                   |
//! | 0x04 | PARTICIPANT_LEAVE    | id[16]                                                 |

use std::net::{IpAddr, Ipv4Addr};

use crate::error::DecodeError;
use crate::types::{EndpointId, EndpointRole, ParticipantId, TopicKey};
use crate::wire::{WireReader, WireWriter};

/// Discovery datagram magic.
pub const DISCOVERY_MAGIC: [u8; 4] = *b"HLDS";

/// Discovery protocol version.
pub const DISCOVERY_VERSION: u8 = 1;

/// Common header size.
pub const DISCOVERY_HEADER_SIZE: usize = 8;

// --- Message kind constants ---

pub const KIND_PARTICIPANT_ANNOUNCE: u8 = 0x01;
pub const KIND_ENDPOINT_ANNOUNCE: u8 = 0x02;
pub const KIND_ENDPOINT_WITHDRAW: u8 = 0x03;
pub const KIND_PARTICIPANT_LEAVE: u8 = 0x04;

/// Address carried when receivers should use the datagram source instead.
pub const UNSPECIFIED_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// One decoded discovery datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryMessage {
    ParticipantAnnounce {
        participant_id: ParticipantId,
        domain_id: u32,
        name: String,
        /// `0.0.0.0` = use the datagram source address.
        address: IpAddr,
    },
    EndpointAnnounce {
        participant_id: ParticipantId,
        endpoint_id: EndpointId,
        role: EndpointRole,
        reliable_port: u16,
        key: TopicKey,
    },
    EndpointWithdraw {
        participant_id: ParticipantId,
        endpoint_id: EndpointId,
    },
    ParticipantLeave {
        participant_id: ParticipantId,
    },
}

impl DiscoveryMessage {
    pub fn participant_id(&self) -> ParticipantId {
        match self {
            DiscoveryMessage::ParticipantAnnounce { participant_id, .. }
            | DiscoveryMessage::EndpointAnnounce { participant_id, .. }
            | DiscoveryMessage::EndpointWithdraw { participant_id, .. }
            | DiscoveryMessage::ParticipantLeave { participant_id } => *participant_id,
        }
    }

    pub fn kind(&self) -> u8 {
        match self {
            DiscoveryMessage::ParticipantAnnounce { .. } => KIND_PARTICIPANT_ANNOUNCE,
            DiscoveryMessage::EndpointAnnounce { .. } => KIND_ENDPOINT_ANNOUNCE,
            DiscoveryMessage::EndpointWithdraw { .. } => KIND_ENDPOINT_WITHDRAW,
            DiscoveryMessage::ParticipantLeave { .. } => KIND_PARTICIPANT_LEAVE,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(64);
        w.put_raw(&DISCOVERY_MAGIC);
        w.put_u8(DISCOVERY_VERSION);
        w.put_u8(self.kind());
        w.put_u16(0);
        w.put_raw(&self.participant_id().to_bytes());

        match self {
            DiscoveryMessage::ParticipantAnnounce {
                domain_id,
                name,
                address,
                ..
            } => {
                w.put_u32(*domain_id);
                w.put_str16(name);
                w.put_str16(&address.to_string());
            }
            DiscoveryMessage::EndpointAnnounce {
                endpoint_id,
                role,
                reliable_port,
                key,
                ..
            } => {
                w.put_u32(endpoint_id.0);
                w.put_u8(role.to_wire());
                w.put_u16(*reliable_port);
                w.put_str16(key.topic_name());
                w.put_str16(key.type_name());
            }
            DiscoveryMessage::EndpointWithdraw { endpoint_id, .. } => {
                w.put_u32(endpoint_id.0);
            }
            DiscoveryMessage::ParticipantLeave { .. } => {}
        }
        w.finish()
    }

    /// Decode one datagram. Never reads past `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = WireReader::new(bytes);
        if r.array::<4>()? != DISCOVERY_MAGIC {
            return Err(DecodeError::Malformed("bad discovery magic"));
        }
        if r.u8()? != DISCOVERY_VERSION {
            return Err(DecodeError::Malformed("unsupported discovery version"));
        }
        let kind = r.u8()?;
        let _reserved = r.u16()?;
        let participant_id = ParticipantId::from_bytes(r.array::<{ ParticipantId::SIZE }>()?);

        let message = match kind {
            KIND_PARTICIPANT_ANNOUNCE => {
                let domain_id = r.u32()?;
                let name = r.str16()?;
                let address = r
                    .str16()?
                    .parse::<IpAddr>()
                    .map_err(|_| DecodeError::Malformed("bad participant address"))?;
                DiscoveryMessage::ParticipantAnnounce {
                    participant_id,
                    domain_id,
                    name,
                    address,
                }
            }
            KIND_ENDPOINT_ANNOUNCE => {
                let endpoint_id = EndpointId(r.u32()?);
                let role = EndpointRole::from_wire(r.u8()?)
                    .ok_or(DecodeError::Malformed("unknown endpoint role"))?;
                let reliable_port = r.u16()?;
                let topic_name = r.str16()?;
                let type_name = r.str16()?;
                let key = TopicKey::new(topic_name, type_name);
                if key.validate().is_err() {
                    return Err(DecodeError::Malformed("empty topic or type name"));
                }
                DiscoveryMessage::EndpointAnnounce {
                    participant_id,
                    endpoint_id,
                    role,
                    reliable_port,
                    key,
                }
            }
            KIND_ENDPOINT_WITHDRAW => DiscoveryMessage::EndpointWithdraw {
                participant_id,
                endpoint_id: EndpointId(r.u32()?),
            },
            KIND_PARTICIPANT_LEAVE => DiscoveryMessage::ParticipantLeave { participant_id },
            _ => return Err(DecodeError::Malformed("unknown discovery message kind")),
        };

        r.finish()?;
        Ok(message)
    }
}
