// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publisher handle.

use std::cell::Cell;
use std::fmt;

use super::participant::Participant;
use crate::error::Result;
use crate::types::{Endpoint, EndpointId, TopicKey};

/// Emits samples on one topic key.
///
/// Borrows its [`Participant`]; dropping the handle unregisters the
/// endpoint and withdraws it from remote participants.
pub struct Publisher<'p> {
    participant: &'p Participant,
    id: EndpointId,
    key: TopicKey,
    last_sequence: Cell<u32>,
}

impl<'p> Publisher<'p> {
    pub(crate) fn new(participant: &'p Participant, id: EndpointId, key: TopicKey) -> Self {
        Self {
            participant,
            id,
            key,
            last_sequence: Cell::new(0),
        }
    }

    /// Send `payload` to every matched subscriber.
    ///
    /// Returns how many subscriber endpoints accepted the sample; 0 is not an
    /// error. Every call that gets past the size check consumes a sequence
    /// number, even with no subscriber or on a partial failure.
    ///
    /// # Errors
    ///
    /// - `StateError` when the participant is not active
    /// - `PayloadTooLarge` when the encoded envelope exceeds the frame limit
    /// - `Publish { delivered, failures }` when some endpoints failed; their
    ///   channels are dropped and re-dialed on the next publish
    pub fn publish(&self, payload: &[u8]) -> Result<usize> {
        let result = self.participant.publish(self.id, payload);
        if let Some(Some(sequence)) = self
            .participant
            .with_registry(|r| r.publisher(self.id).map(|p| p.sequence_number()))
        {
            self.last_sequence.set(sequence);
        }
        result
    }

    /// Last sequence number used (0 before the first publish).
    pub fn sequence_number(&self) -> u32 {
        self.last_sequence.get()
    }

    /// Subscriber endpoints currently matched.
    pub fn matched_subscribers(&self) -> Vec<Endpoint> {
        self.participant
            .with_registry(|r| {
                r.publisher(self.id)
                    .map(|p| p.matched_subscribers().iter().copied().collect())
            })
            .flatten()
            .unwrap_or_default()
    }

    pub fn topic_key(&self) -> &TopicKey {
        &self.key
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn participant(&self) -> &'p Participant {
        self.participant
    }
}

impl fmt::Debug for Publisher<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("sequence_number", &self.last_sequence.get())
            .finish()
    }
}

impl Drop for Publisher<'_> {
    fn drop(&mut self) {
        self.participant.unregister(self.id);
    }
}
