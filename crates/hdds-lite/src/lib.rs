// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # HDDS Lite - brokerless publish/subscribe
//!
//! Participants discover each other over UDP, advertise the topics they
//! publish and subscribe to, and exchange samples over pooled TCP channels
//! between matched endpoints. No broker, no background threads.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hdds_lite::{Participant, Result};
//! use std::time::Duration;
//!
//! fn main() -> Result<()> {
//!     let participant = Participant::init("node_sub", 0)?;
//!     let subscriber = participant.create_subscriber("sensor/temp", "String")?;
//!     subscriber.set_handler(|payload: &[u8]| {
//!         println!("temp = {}", String::from_utf8_lossy(payload));
//!     })?;
//!
//!     loop {
//!         participant.spin_once()?;
//!         std::thread::sleep(Duration::from_millis(50));
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +----------------------------------------------------------+
//! |  Participant -> Publisher / Subscriber (MessageHandler)  |
//! +----------------------------------------------------------+
//! |  EndpointRegistry (exact topic+type matching)            |
//! +----------------------------------------------------------+
//! |  DiscoveryEngine (announce, lease, endpoint adverts)     |
//! +----------------------------------------------------------+
//! |  DiscoveryChannel (UDP)  |  ChannelPool / ReliableChannel|
//! |                          |  (TCP, length-prefix frames)  |
//! +----------------------------------------------------------+
//! |  Wire codec: discovery datagrams, envelopes              |
//! +----------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`dds`] - participant, publisher, subscriber (start here)
//! - [`discovery`] - discovery messages and engine
//! - [`registry`] - local endpoints and matches
//! - [`transport`] - UDP discovery channel, TCP reliable channels
//! - [`wire`] - envelope codec
//! - [`config`] - configuration, env overrides, YAML loader

/// Configuration (ports, discovery, reliable channels, env/YAML loaders).
pub mod config;
/// Participant, Publisher, Subscriber.
pub mod dds;
/// Discovery wire messages and engine.
pub mod discovery;
/// Error types.
pub mod error;
/// Local endpoints and their remote matches.
pub mod registry;
/// UDP discovery channel and TCP reliable channels.
pub mod transport;
/// Identifiers and value types.
pub mod types;
/// Envelope codec.
pub mod wire;

pub use config::{DiscoveryConfig, DiscoveryPeer, ParticipantConfig, ReliableConfig};
pub use dds::{
    MessageHandler, Participant, ParticipantBuilder, ParticipantState, ParticipantStats,
    Publisher, Subscriber,
};
pub use discovery::{DiscoveryRecord, DiscoveryStats};
pub use error::{
    DecodeError, DiscoveryError, EnvelopeError, Error, InitError, Result, StateError,
    TransportError,
};
pub use types::{Endpoint, EndpointId, EndpointRole, ParticipantId, TopicKey};
pub use wire::Envelope;
