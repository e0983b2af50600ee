// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Identity and addressing value types shared by every layer.
//!
//! - [`ParticipantId`]: 128-bit participant identity (4 x 32-bit words)
//! - [`Endpoint`]: network address + port, used as the connection-pool key
//! - [`TopicKey`]: `(topic_name, type_name)` matching key
//! - [`EndpointId`] / [`EndpointRole`]: local publisher/subscriber identity

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

// ============================================================================
// ParticipantId
// ============================================================================

/// Fixed salt words occupying the first three words of every participant id.
const PARTICIPANT_ID_SALT: [u32; 3] = [0x0101_0101, 0x0202_0202, 0x0303_0303];

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Opaque 128-bit participant identifier.
///
/// Derived deterministically from the participant name: three fixed salt
/// words followed by the FNV-1a hash of the name. Two processes that pick
/// the same name collide; names must be unique within a domain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantId([u32; 4]);

impl ParticipantId {
    /// Wire size in bytes.
    pub const SIZE: usize = 16;

    /// Derive the id for a participant name.
    pub fn from_name(name: &str) -> Self {
        let [a, b, c] = PARTICIPANT_ID_SALT;
        Self([a, b, c, fnv1a32(name.as_bytes())])
    }

    /// Build an id from raw words.
    pub const fn from_words(words: [u32; 4]) -> Self {
        Self(words)
    }

    /// Raw words.
    pub const fn words(&self) -> [u32; 4] {
        self.0
    }

    /// Little-endian wire representation (word by word).
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        for (chunk, word) in out.chunks_exact_mut(4).zip(self.0.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Inverse of [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        let mut words = [0u32; 4];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self(words)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08X}-{:08X}-{:08X}-{:08X}",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

impl fmt::Debug for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParticipantId({})", self)
    }
}

fn fnv1a32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
        (hash ^ u32::from(b)).wrapping_mul(FNV_PRIME)
    })
}

// ============================================================================
// Endpoint
// ============================================================================

/// A network address + port pair.
///
/// Value type: equality, ordering and hashing follow the fields, and the
/// `Display` form is the usual `address:port` string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint(SocketAddr);

impl Endpoint {
    /// Create an endpoint from an address and a port.
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self(SocketAddr::new(address, port))
    }

    /// Loopback IPv4 endpoint, mostly useful in tests.
    pub fn localhost(port: u16) -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    pub fn address(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.0
    }
}

impl FromStr for Endpoint {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddr>().map(Self)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint({})", self.0)
    }
}

// ============================================================================
// TopicKey
// ============================================================================

/// Maximum length in bytes of a topic or type name (u16 length prefix).
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

/// Matching key: two endpoints match iff their keys are equal.
///
/// Comparison is exact and case-sensitive; there is no wildcarding.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicKey {
    topic_name: String,
    type_name: String,
}

impl TopicKey {
    /// Create a key without validation. See [`validate`](Self::validate).
    pub fn new(topic_name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            topic_name: topic_name.into(),
            type_name: type_name.into(),
        }
    }

    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Check that both names are non-empty and fit the wire length prefix.
    pub fn validate(&self) -> Result<(), String> {
        for (what, name) in [("topic", &self.topic_name), ("type", &self.type_name)] {
            if name.is_empty() {
                return Err(format!("{} name must not be empty", what));
            }
            if name.len() > MAX_NAME_LEN {
                return Err(format!(
                    "{} name is {} bytes (max {})",
                    what,
                    name.len(),
                    MAX_NAME_LEN
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.topic_name, self.type_name)
    }
}

// ============================================================================
// Local endpoint identity
// ============================================================================

/// Identifier of a publisher or subscriber, unique within its participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub u32);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which side of a topic an endpoint sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EndpointRole {
    Publisher,
    Subscriber,
}

impl EndpointRole {
    /// Wire tag.
    pub fn to_wire(self) -> u8 {
        match self {
            EndpointRole::Publisher => 1,
            EndpointRole::Subscriber => 2,
        }
    }

    pub fn from_wire(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(EndpointRole::Publisher),
            2 => Some(EndpointRole::Subscriber),
            _ => None,
        }
    }

    /// The role a remote endpoint must have to match this one.
    pub fn counterpart(self) -> Self {
        match self {
            EndpointRole::Publisher => EndpointRole::Subscriber,
            EndpointRole::Subscriber => EndpointRole::Publisher,
        }
    }
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointRole::Publisher => write!(f, "publisher"),
            EndpointRole::Subscriber => write!(f, "subscriber"),
        }
    }
}
