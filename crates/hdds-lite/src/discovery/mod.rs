// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant and endpoint discovery.
//!
//! - [`protocol`]: the four discovery datagram kinds
//! - [`engine`]: peer table, leases and periodic announcements

pub mod engine;
pub mod protocol;

use std::net::IpAddr;

use crate::types::ParticipantId;

pub use engine::{
    DiscoveryEngine, DiscoveryEvent, DiscoveryRecord, DiscoveryState, DiscoveryStats,
    LocalEndpoint, RemoteEndpoint,
};
pub use protocol::DiscoveryMessage;

/// Maps a remote participant to the IP its reliable listener is reached at.
pub trait AddressResolver {
    fn resolve(&self, participant_id: &ParticipantId) -> Option<IpAddr>;
}
