// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscriber handle.

use std::fmt;

use super::listener::MessageHandler;
use super::participant::Participant;
use crate::error::Result;
use crate::types::{Endpoint, EndpointId, TopicKey};

/// Receives samples on one topic key.
///
/// Samples are delivered to the installed [`MessageHandler`] from inside
/// [`Participant::spin_once`]. Only envelopes whose topic and type equal the
/// subscriber's key exactly are delivered. Without a handler, samples are
/// counted and discarded.
pub struct Subscriber<'p> {
    participant: &'p Participant,
    id: EndpointId,
    key: TopicKey,
}

impl<'p> Subscriber<'p> {
    pub(crate) fn new(participant: &'p Participant, id: EndpointId, key: TopicKey) -> Self {
        Self {
            participant,
            id,
            key,
        }
    }

    /// Install or replace the handler. Takes effect for the next sample,
    /// including when called from inside the current handler.
    pub fn set_handler(&self, handler: impl MessageHandler + 'static) -> Result<()> {
        self.participant.set_handler(self.id, Box::new(handler))
    }

    /// Stop delivering samples to any handler.
    pub fn clear_handler(&self) -> Result<()> {
        self.participant.clear_handler(self.id)
    }

    /// Publisher endpoints currently matched.
    pub fn matched_publishers(&self) -> Vec<Endpoint> {
        self.participant
            .with_registry(|r| {
                r.subscriber(self.id)
                    .map(|s| s.matched_publishers().iter().copied().collect())
            })
            .flatten()
            .unwrap_or_default()
    }

    /// Samples received for this subscriber, delivered or not.
    pub fn messages_received(&self) -> u64 {
        self.participant
            .with_registry(|r| r.subscriber(self.id).map(|s| s.received()))
            .flatten()
            .unwrap_or(0)
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

impl fmt::Debug for Subscriber<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish()
    }
}

impl Drop for Subscriber<'_> {
    fn drop(&mut self) {
        self.participant.unregister(self.id);
    }
}
