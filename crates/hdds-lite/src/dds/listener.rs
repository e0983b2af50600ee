// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscriber callbacks.

use crate::wire::Envelope;

/// Receives the samples delivered to one subscriber.
///
/// Implemented for every `FnMut(&[u8])`, so a closure is enough for the
/// common case:
///
/// ```
/// use hdds_lite::MessageHandler;
///
/// let mut seen = Vec::new();
/// let mut handler = |payload: &[u8]| seen.push(payload.to_vec());
/// handler.on_message(b"23.5");
/// assert_eq!(seen, vec![b"23.5".to_vec()]);
/// ```
///
/// Handlers run inside `Participant::spin_once()`. A handler may call back
/// into its participant (publish, replace its own handler); the borrow on
/// participant state is released for the duration of the call. Spinning
/// from a handler is refused with `StateError::Busy`.
pub trait MessageHandler {
    fn on_message(&mut self, payload: &[u8]);

    /// Full sample, including sequence number and timestamp.
    fn on_envelope(&mut self, envelope: &Envelope) {
        self.on_message(envelope.payload());
    }
}

impl<F> MessageHandler for F
where
    F: FnMut(&[u8]),
{
    fn on_message(&mut self, payload: &[u8]) {
        self(payload)
    }
}
