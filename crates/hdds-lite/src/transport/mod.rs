// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport layer.
//!
//! Two channel kinds, both non-blocking:
//!
//! - [`DiscoveryChannel`] (UDP): best-effort datagrams for discovery
//! - [`ReliableChannel`] (TCP): ordered frames between matched endpoints,
//!   pooled per remote endpoint by [`ChannelPool`]

pub mod ports;
pub mod tcp;
pub mod udp;

pub use ports::PortMapping;
pub use tcp::{ChannelPool, ChannelState, ReliableChannel};
pub use udp::{DiscoveryChannel, DiscoveryChannelStats, MAX_DATAGRAM_SIZE};
