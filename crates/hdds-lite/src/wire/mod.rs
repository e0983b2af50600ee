// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire codec.
//!
//! [`Envelope`] is the unit exchanged between matched publishers and
//! subscribers. Every variable-length field carries an explicit length
//! prefix, so payloads may hold arbitrary bytes.

pub mod buf;
pub mod envelope;

pub use buf::{WireReader, WireWriter};
pub use envelope::{
    decode, encode, encoded_len, now_millis, Envelope, ENVELOPE_HEADER_SIZE, ENVELOPE_MAGIC,
    ENVELOPE_VERSION,
};
