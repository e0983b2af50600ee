// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Envelope wire format (one per reliable-channel frame).
//!
//! ```text
//! +--------+-----+-------+------+---------+----------------+
//! | "HLEN" | ver | flags | rsvd | seq u32 | timestamp u64  |   20-byte header
//! +--------+-----+-------+------+---------+----------------+
//! | topic: u16 len + UTF-8 | type: u16 len + UTF-8         |
//! +------------------------+-------------------------------+
//! | payload: u32 len + bytes                               |
//! +--------------------------------------------------------+
//! ```
//!
//! All integers little-endian.

use std::time::{SystemTime, UNIX_EPOCH};

use super::buf::{WireReader, WireWriter};
use crate::error::{DecodeError, EnvelopeError};
use crate::types::{TopicKey, MAX_NAME_LEN};

/// Envelope magic.
pub const ENVELOPE_MAGIC: [u8; 4] = *b"HLEN";

/// Envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// Fixed header size: magic + version + flags + reserved + seq + timestamp.
pub const ENVELOPE_HEADER_SIZE: usize = 4 + 1 + 1 + 2 + 4 + 8;

/// Largest payload the u32 length prefix can describe.
pub const MAX_PAYLOAD_LEN: usize = u32::MAX as usize;

/// One published sample in transit.
///
/// Immutable once constructed. Lengths are validated by [`Envelope::new`],
/// so every value of this type encodes without loss.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    topic_name: String,
    type_name: String,
    payload: Vec<u8>,
    sequence_number: u32,
    timestamp_millis: u64,
}

impl Envelope {
    /// Build an envelope, rejecting names or payloads too long for the format.
    pub fn new(
        topic_name: impl Into<String>,
        type_name: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        sequence_number: u32,
        timestamp_millis: u64,
    ) -> Result<Self, EnvelopeError> {
        let topic_name = topic_name.into();
        let type_name = type_name.into();
        let payload = payload.into();
        let longest = topic_name.len().max(type_name.len());
        if longest > MAX_NAME_LEN {
            return Err(EnvelopeError::NameTooLong {
                len: longest,
                max: MAX_NAME_LEN,
            });
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(EnvelopeError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        Ok(Self {
            topic_name,
            type_name,
            payload,
            sequence_number,
            timestamp_millis,
        })
    }

    /// Build an envelope for `key` stamped with the current wall-clock time.
    pub fn for_topic(
        key: &TopicKey,
        payload: &[u8],
        sequence_number: u32,
    ) -> Result<Self, EnvelopeError> {
        Self::new(
            key.topic_name(),
            key.type_name(),
            payload,
            sequence_number,
            now_millis(),
        )
    }

    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    pub fn timestamp_millis(&self) -> u64 {
        self.timestamp_millis
    }

    /// True when this envelope belongs to `key` (exact match).
    pub fn matches(&self, key: &TopicKey) -> bool {
        self.topic_name == key.topic_name() && self.type_name == key.type_name()
    }

    pub fn topic_key(&self) -> TopicKey {
        TopicKey::new(self.topic_name.clone(), self.type_name.clone())
    }
}

/// Encoded size of an envelope with the given field lengths.
pub fn encoded_len(topic_len: usize, type_len: usize, payload_len: usize) -> usize {
    ENVELOPE_HEADER_SIZE + 2 + topic_len + 2 + type_len + 4 + payload_len
}

/// Serialize an envelope.
pub fn encode(envelope: &Envelope) -> Vec<u8> {
    let mut w = WireWriter::with_capacity(encoded_len(
        envelope.topic_name.len(),
        envelope.type_name.len(),
        envelope.payload.len(),
    ));
    w.put_raw(&ENVELOPE_MAGIC);
    w.put_u8(ENVELOPE_VERSION);
    w.put_u8(0); // flags
    w.put_u16(0); // reserved
    w.put_u32(envelope.sequence_number);
    w.put_u64(envelope.timestamp_millis);
    w.put_str16(&envelope.topic_name);
    w.put_str16(&envelope.type_name);
    w.put_bytes32(&envelope.payload);
    w.finish()
}

/// Deserialize an envelope. Total: either a complete envelope or an error.
pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    let mut r = WireReader::new(bytes);
    if r.array::<4>()? != ENVELOPE_MAGIC {
        return Err(DecodeError::Malformed("bad envelope magic"));
    }
    if r.u8()? != ENVELOPE_VERSION {
        return Err(DecodeError::Malformed("unsupported envelope version"));
    }
    let _flags = r.u8()?;
    let _reserved = r.u16()?;
    let sequence_number = r.u32()?;
    let timestamp_millis = r.u64()?;
    let topic_name = r.str16()?;
    let type_name = r.str16()?;
    let payload = r.bytes32()?.to_vec();
    r.finish()?;

    Ok(Envelope {
        topic_name,
        type_name,
        payload,
        sequence_number,
        timestamp_millis,
    })
}

/// Milliseconds since the Unix epoch (0 if the clock is before the epoch).
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(payload: &[u8]) -> Envelope {
        Envelope::new("sensor/temp", "String", payload, 42, 1_700_000_000_123).unwrap()
    }

    #[test]
    fn test_roundtrip_text() {
        let env = sample(b"23.5");
        assert_eq!(decode(&encode(&env)).unwrap(), env);
    }

    #[test]
    fn test_roundtrip_hostile_payloads() {
        let payloads: [&[u8]; 6] = [
            b"",
            b"\0\0\0",
            b"{\"data\":\"x\"}",
            b"line1\nline2\r\n",
            b"\\\"escaped\\\"",
            &[0xFF, 0x00, 0x7F, 0x80, b'"', b'\n'],
        ];
        for payload in payloads {
            let env = sample(payload);
            assert_eq!(decode(&encode(&env)).unwrap(), env, "payload {:?}", payload);
        }
    }

    #[test]
    fn test_roundtrip_unicode_names() {
        let env = Envelope::new("capteur/température", "std_msgs::msg::String", b"x".to_vec(), 1, 0)
            .unwrap();
        assert_eq!(decode(&encode(&env)).unwrap(), env);
    }

    #[test]
    fn test_roundtrip_random_binary() {
        let mut rng = fastrand::Rng::with_seed(0x5EED);
        for _ in 0..64 {
            let len = rng.usize(0..2048);
            let payload: Vec<u8> = (0..len).map(|_| rng.u8(..)).collect();
            let env = Envelope::new("t", "T", payload, rng.u32(..), rng.u64(..)).unwrap();
            assert_eq!(decode(&encode(&env)).unwrap(), env);
        }
    }

    #[test]
    fn test_encoded_len_matches() {
        let env = sample(b"abc");
        assert_eq!(encode(&env).len(), encoded_len(11, 6, 3));
    }

    #[test]
    fn test_declared_payload_exceeds_buffer() {
        let mut bytes = encode(&sample(b"hello"));
        bytes.truncate(bytes.len() - 2);
        let total = bytes.len();

        match decode(&bytes) {
            Err(DecodeError::Truncated { needed, available }) => {
                assert_eq!(available, total);
                assert_eq!(needed, total + 2);
            }
            other => panic!("expected Truncated, got {:?}", other),
        }
    }

    #[test]
    fn test_every_prefix_is_truncated() {
        let bytes = encode(&sample(b"payload"));
        for cut in 0..bytes.len() {
            assert!(
                matches!(decode(&bytes[..cut]), Err(DecodeError::Truncated { .. })),
                "prefix of {} bytes",
                cut
            );
        }
    }

    #[test]
    fn test_oversized_length_prefix_is_truncated() {
        let mut bytes = encode(&sample(b""));
        let len_at = bytes.len() - 4;
        bytes[len_at..].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(decode(&bytes), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn test_bad_magic_and_version() {
        let mut bytes = encode(&sample(b"x"));
        bytes[0] = b'X';
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::Malformed("bad envelope magic"))
        );

        let mut bytes = encode(&sample(b"x"));
        bytes[4] = 99;
        assert!(matches!(decode(&bytes), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_trailing_garbage_is_malformed() {
        let mut bytes = encode(&sample(b"x"));
        bytes.push(0);
        assert!(matches!(decode(&bytes), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_random_garbage_never_panics() {
        let mut rng = fastrand::Rng::with_seed(7);
        for _ in 0..256 {
            let len = rng.usize(0..64);
            let bytes: Vec<u8> = (0..len).map(|_| rng.u8(..)).collect();
            let _ = decode(&bytes);
        }
    }

    #[test]
    fn test_matches_is_exact() {
        let env = sample(b"x");
        assert!(env.matches(&TopicKey::new("sensor/temp", "String")));
        assert!(!env.matches(&TopicKey::new("sensor/temp", "Int32")));
        assert_eq!(env.topic_key(), TopicKey::new("sensor/temp", "String"));
    }

    #[test]
    fn test_name_length_rejected() {
        let long = "n".repeat(MAX_NAME_LEN + 1);
        assert_eq!(
            Envelope::new(long, "T", Vec::new(), 1, 0),
            Err(EnvelopeError::NameTooLong {
                len: MAX_NAME_LEN + 1,
                max: MAX_NAME_LEN,
            })
        );
    }
}
