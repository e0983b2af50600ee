// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy.
//!
//! Each layer reports through its own narrow error type; the facade returns
//! the umbrella [`Error`], which wraps them via `From`.
//!
//! | Type | Raised by | Recoverable |
//! |------|-----------|-------------|
//! | [`InitError`] | `Participant::init` / `start` | no (participant unusable) |
//! | [`StateError`] | facade calls on a non-active participant | caller misuse |
//! | [`DecodeError`] | wire decoding | always, input dropped |
//! | [`TransportError`] | channels | discovery: absorbed; reliable: returned |
//! | [`DiscoveryError`] | discovery engine | dropped and counted |

use std::fmt;
use std::io;

use crate::config::ConfigError;
use crate::types::{Endpoint, ParticipantId};

/// Result alias for facade operations.
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// InitError
// ============================================================================

/// Participant startup failures.
#[derive(Debug)]
pub enum InitError {
    /// The discovery channel (or the reliable listener) could not be opened.
    NetworkUnavailable(io::Error),
    /// The requested discovery port is already bound.
    PortInUse(u16),
    /// Domain id out of range (0-232).
    InvalidDomainId(u32),
    /// Configuration rejected by validation.
    InvalidConfig(ConfigError),
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::NetworkUnavailable(e) => write!(f, "network unavailable: {}", e),
            InitError::PortInUse(port) => write!(f, "port {} already in use", port),
            InitError::InvalidDomainId(id) => {
                write!(f, "invalid domain_id: {} (must be 0-232)", id)
            }
            InitError::InvalidConfig(e) => write!(f, "invalid configuration: {}", e),
        }
    }
}

impl std::error::Error for InitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InitError::NetworkUnavailable(e) => Some(e),
            InitError::InvalidConfig(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DiscoveryError> for InitError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::PortInUse(port) => InitError::PortInUse(port),
            DiscoveryError::NetworkUnavailable(e) => InitError::NetworkUnavailable(e),
            DiscoveryError::InvalidDomainId(id) => InitError::InvalidDomainId(id),
            DiscoveryError::InvalidParticipantIndex(i) => InitError::InvalidConfig(
                ConfigError::InvalidValue(format!("participant_index {} out of range", i)),
            ),
            other => InitError::NetworkUnavailable(io::Error::other(other.to_string())),
        }
    }
}

// ============================================================================
// StateError
// ============================================================================

/// Operation attempted on a participant that is not active.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateError {
    /// `start()` has not been called (or failed).
    NotInitialized,
    /// The participant was shut down.
    Closed,
    /// `spin_once()` called from inside a message handler.
    Busy,
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::NotInitialized => write!(f, "participant not initialized"),
            StateError::Closed => write!(f, "participant closed"),
            StateError::Busy => write!(f, "participant is already spinning"),
        }
    }
}

impl std::error::Error for StateError {}

// ============================================================================
// DecodeError
// ============================================================================

/// Wire decoding failure. Never fatal: the offending input is dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes present than the declared lengths require.
    Truncated { needed: usize, available: usize },
    /// Structural markers are inconsistent (magic, version, tag, UTF-8, trailing bytes).
    Malformed(&'static str),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated { needed, available } => write!(
                f,
                "truncated input: need {} bytes, have {}",
                needed, available
            ),
            DecodeError::Malformed(reason) => write!(f, "malformed input: {}", reason),
        }
    }
}

impl std::error::Error for DecodeError {}

// ============================================================================
// EnvelopeError
// ============================================================================

/// Envelope field too long for its length prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnvelopeError {
    NameTooLong { len: usize, max: usize },
    PayloadTooLarge { len: usize, max: usize },
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeError::NameTooLong { len, max } => {
                write!(f, "name of {} bytes exceeds {}", len, max)
            }
            EnvelopeError::PayloadTooLarge { len, max } => {
                write!(f, "payload of {} bytes exceeds {}", len, max)
            }
        }
    }
}

impl std::error::Error for EnvelopeError {}

// ============================================================================
// TransportError
// ============================================================================

/// Channel-level failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    /// Destination unreachable or not listening.
    Unreachable {
        endpoint: Endpoint,
        kind: io::ErrorKind,
    },
    /// An established reliable connection was lost; the channel is closed.
    ConnectionLost(Endpoint),
    /// Frame exceeds the configured maximum message size.
    FrameTooLarge { size: usize, max: usize },
    /// The channel was closed locally.
    Closed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Unreachable { endpoint, kind } => {
                write!(f, "{} unreachable ({:?})", endpoint, kind)
            }
            TransportError::ConnectionLost(endpoint) => {
                write!(f, "connection to {} lost", endpoint)
            }
            TransportError::FrameTooLarge { size, max } => {
                write!(f, "frame too large: {} bytes (max {})", size, max)
            }
            TransportError::Closed => write!(f, "channel closed"),
        }
    }
}

impl std::error::Error for TransportError {}

// ============================================================================
// DiscoveryError
// ============================================================================

/// Discovery failures.
///
/// Only the startup variants reach callers; the others classify dropped
/// inbound announcements for the diagnostic counters.
#[derive(Debug)]
pub enum DiscoveryError {
    /// Discovery port already bound.
    PortInUse(u16),
    /// Discovery socket could not be created.
    NetworkUnavailable(io::Error),
    /// Domain id out of range.
    InvalidDomainId(u32),
    /// Participant index out of range.
    InvalidParticipantIndex(u8),
    /// Announcement failed to decode.
    Malformed(DecodeError),
    /// Announcement for another domain.
    ForeignDomain(u32),
    /// Known participant id announced from a different address.
    Duplicate(ParticipantId),
    /// Endpoint traffic from a participant that never announced itself.
    UnknownParticipant(ParticipantId),
    /// Engine is not running.
    NotRunning,
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryError::PortInUse(port) => write!(f, "discovery port {} in use", port),
            DiscoveryError::NetworkUnavailable(e) => write!(f, "discovery unavailable: {}", e),
            DiscoveryError::InvalidDomainId(id) => write!(f, "invalid domain_id: {}", id),
            DiscoveryError::InvalidParticipantIndex(i) => {
                write!(f, "invalid participant index: {} (must be 0-119)", i)
            }
            DiscoveryError::Malformed(e) => write!(f, "malformed announcement: {}", e),
            DiscoveryError::ForeignDomain(id) => write!(f, "announcement for domain {}", id),
            DiscoveryError::Duplicate(id) => {
                write!(f, "participant {} announced from a second address", id)
            }
            DiscoveryError::UnknownParticipant(id) => {
                write!(f, "endpoint message from unknown participant {}", id)
            }
            DiscoveryError::NotRunning => write!(f, "discovery not running"),
        }
    }
}

impl std::error::Error for DiscoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiscoveryError::NetworkUnavailable(e) => Some(e),
            DiscoveryError::Malformed(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DecodeError> for DiscoveryError {
    fn from(err: DecodeError) -> Self {
        DiscoveryError::Malformed(err)
    }
}

// ============================================================================
// Umbrella error
// ============================================================================

/// Errors returned by the participant facade.
#[derive(Debug)]
pub enum Error {
    Init(InitError),
    State(StateError),
    Decode(DecodeError),
    Transport(TransportError),
    Discovery(DiscoveryError),
    Config(ConfigError),

    /// Topic or type name rejected.
    InvalidTopic(String),
    /// Encoded envelope would exceed the reliable channel's frame limit.
    PayloadTooLarge { size: usize, max: usize },
    /// The publisher has issued `u32::MAX` sequence numbers.
    SequenceExhausted,
    /// Reliable sends failed for some matched subscribers.
    ///
    /// `delivered` counts the endpoints that accepted the envelope.
    Publish {
        delivered: usize,
        failures: Vec<(Endpoint, TransportError)>,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Init(e) => write!(f, "init error: {}", e),
            Error::State(e) => write!(f, "state error: {}", e),
            Error::Decode(e) => write!(f, "decode error: {}", e),
            Error::Transport(e) => write!(f, "transport error: {}", e),
            Error::Discovery(e) => write!(f, "discovery error: {}", e),
            Error::Config(e) => write!(f, "config error: {}", e),
            Error::InvalidTopic(msg) => write!(f, "invalid topic: {}", msg),
            Error::PayloadTooLarge { size, max } => {
                write!(f, "payload too large: {} bytes encoded (max {})", size, max)
            }
            Error::SequenceExhausted => write!(f, "publisher sequence numbers exhausted"),
            Error::Publish {
                delivered,
                failures,
            } => {
                write!(
                    f,
                    "publish delivered to {} endpoint(s), failed for {}",
                    delivered,
                    failures.len()
                )?;
                for (endpoint, err) in failures {
                    write!(f, "; {}: {}", endpoint, err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Init(e) => Some(e),
            Error::State(e) => Some(e),
            Error::Decode(e) => Some(e),
            Error::Transport(e) => Some(e),
            Error::Discovery(e) => Some(e),
            Error::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<InitError> for Error {
    fn from(err: InitError) -> Self {
        Error::Init(err)
    }
}

impl From<EnvelopeError> for Error {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::NameTooLong { .. } => Error::InvalidTopic(err.to_string()),
            EnvelopeError::PayloadTooLarge { len, max } => {
                Error::PayloadTooLarge { size: len, max }
            }
        }
    }
}

impl From<StateError> for Error {
    fn from(err: StateError) -> Self {
        Error::State(err)
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        Error::Decode(err)
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::Transport(err)
    }
}

impl From<DiscoveryError> for Error {
    fn from(err: DiscoveryError) -> Self {
        Error::Discovery(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_error_maps_to_init_error() {
        let init: InitError = DiscoveryError::PortInUse(7410).into();
        assert!(matches!(init, InitError::PortInUse(7410)));

        let init: InitError =
            DiscoveryError::NetworkUnavailable(io::Error::from(io::ErrorKind::PermissionDenied))
                .into();
        assert!(matches!(init, InitError::NetworkUnavailable(_)));
    }

    #[test]
    fn test_envelope_error_maps_to_facade_error() {
        let err = Error::from(EnvelopeError::NameTooLong { len: 70_000, max: 65_535 });
        assert!(matches!(err, Error::InvalidTopic(ref msg) if msg.contains("70000")));

        let err = Error::from(EnvelopeError::PayloadTooLarge { len: 9, max: 8 });
        assert!(matches!(err, Error::PayloadTooLarge { size: 9, max: 8 }));
    }

    #[test]
    fn test_publish_error_lists_failures() {
        let err = Error::Publish {
            delivered: 1,
            failures: vec![(
                Endpoint::localhost(7411),
                TransportError::ConnectionLost(Endpoint::localhost(7411)),
            )],
        };
        let text = err.to_string();
        assert!(text.contains("delivered to 1"));
        assert!(text.contains("127.0.0.1:7411"));
    }

    #[test]
    fn test_error_source_chain() {
        let err = Error::from(StateError::Closed);
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.to_string(), "state error: participant closed");
    }
}
