// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint registry: local publishers/subscribers and their matches.
//!
//! Matching is exact on [`TopicKey`] (topic name and type name, both
//! case-sensitive). A local publisher matches every remote subscriber with
//! the same key and vice versa; the matched [`Endpoint`] is the remote
//! participant's resolved address plus the reliable port it advertised.
//!
//! The registry performs no I/O. It is updated from discovery events and
//! recomputed by the participant during `spin_once()`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::dds::listener::MessageHandler;
use crate::discovery::{AddressResolver, DiscoveryEvent, LocalEndpoint, RemoteEndpoint};
use crate::error::Error;
use crate::types::{Endpoint, EndpointId, EndpointRole, ParticipantId, TopicKey};

// ============================================================================
// Local endpoints
// ============================================================================

#[derive(Debug)]
pub struct LocalPublisher {
    key: TopicKey,
    /// Last sequence number handed out (0 = none yet).
    sequence_number: u32,
    matched_subscribers: BTreeSet<Endpoint>,
    published: u64,
}

impl LocalPublisher {
    pub fn key(&self) -> &TopicKey {
        &self.key
    }

    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    pub fn matched_subscribers(&self) -> &BTreeSet<Endpoint> {
        &self.matched_subscribers
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    /// Reserve the next sequence number. Numbers start at 1 and are never
    /// reused, matched subscribers or not.
    pub fn next_sequence(&mut self) -> Result<u32, Error> {
        let next = self
            .sequence_number
            .checked_add(1)
            .ok_or(Error::SequenceExhausted)?;
        self.sequence_number = next;
        self.published += 1;
        Ok(next)
    }
}

pub struct LocalSubscriber {
    key: TopicKey,
    matched_publishers: BTreeSet<Endpoint>,
    handler: Option<Box<dyn MessageHandler>>,
    /// Bumped on every handler replacement, so a handler taken out for a
    /// callback is not restored over a newer one.
    handler_generation: u64,
    received: u64,
}

impl LocalSubscriber {
    pub fn key(&self) -> &TopicKey {
        &self.key
    }

    pub fn matched_publishers(&self) -> &BTreeSet<Endpoint> {
        &self.matched_publishers
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    pub fn received(&self) -> u64 {
        self.received
    }
}

impl fmt::Debug for LocalSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSubscriber")
            .field("key", &self.key)
            .field("matched_publishers", &self.matched_publishers)
            .field("has_handler", &self.handler.is_some())
            .field("received", &self.received)
            .finish()
    }
}

/// Handler on loan for one callback.
pub struct LoanedHandler {
    handler: Box<dyn MessageHandler>,
    generation: u64,
}

impl LoanedHandler {
    pub fn handler(&mut self) -> &mut dyn MessageHandler {
        self.handler.as_mut()
    }
}

/// Publisher-side endpoints gained or dropped by a recompute.
///
/// Only endpoints that no local publisher referenced before (`added`) or
/// that no local publisher references any more (`removed`) are listed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchDelta {
    pub added: Vec<Endpoint>,
    pub removed: Vec<Endpoint>,
}

impl MatchDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug)]
pub struct EndpointRegistry {
    next_endpoint_id: u32,
    publishers: BTreeMap<EndpointId, LocalPublisher>,
    subscribers: BTreeMap<EndpointId, LocalSubscriber>,
    remotes: BTreeMap<(ParticipantId, EndpointId), RemoteEndpoint>,
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self {
            next_endpoint_id: 1,
            publishers: BTreeMap::new(),
            subscribers: BTreeMap::new(),
            remotes: BTreeMap::new(),
        }
    }

    fn allocate_id(&mut self) -> EndpointId {
        let id = EndpointId(self.next_endpoint_id);
        self.next_endpoint_id = self.next_endpoint_id.wrapping_add(1).max(1);
        id
    }

    /// Several publishers may share a key; each gets its own id.
    pub fn register_publisher(&mut self, key: TopicKey) -> EndpointId {
        let id = self.allocate_id();
        log::debug!("[registry] publisher {} registered on {}", id, key);
        self.publishers.insert(
            id,
            LocalPublisher {
                key,
                sequence_number: 0,
                matched_subscribers: BTreeSet::new(),
                published: 0,
            },
        );
        id
    }

    pub fn register_subscriber(
        &mut self,
        key: TopicKey,
        handler: Option<Box<dyn MessageHandler>>,
    ) -> EndpointId {
        let id = self.allocate_id();
        log::debug!("[registry] subscriber {} registered on {}", id, key);
        self.subscribers.insert(
            id,
            LocalSubscriber {
                key,
                matched_publishers: BTreeSet::new(),
                handler,
                handler_generation: 0,
                received: 0,
            },
        );
        id
    }

    /// Remove a local endpoint and its matches. Unknown ids are a no-op.
    pub fn unregister(&mut self, id: EndpointId) -> Option<EndpointRole> {
        if let Some(publisher) = self.publishers.remove(&id) {
            log::debug!("[registry] publisher {} on {} removed", id, publisher.key);
            Some(EndpointRole::Publisher)
        } else if let Some(subscriber) = self.subscribers.remove(&id) {
            log::debug!("[registry] subscriber {} on {} removed", id, subscriber.key);
            Some(EndpointRole::Subscriber)
        } else {
            None
        }
    }

    pub fn publisher(&self, id: EndpointId) -> Option<&LocalPublisher> {
        self.publishers.get(&id)
    }

    pub fn publisher_mut(&mut self, id: EndpointId) -> Option<&mut LocalPublisher> {
        self.publishers.get_mut(&id)
    }

    pub fn subscriber(&self, id: EndpointId) -> Option<&LocalSubscriber> {
        self.subscribers.get(&id)
    }

    pub fn publisher_count(&self) -> usize {
        self.publishers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Everything to advertise in ENDPOINT_ANNOUNCE.
    pub fn local_endpoints(&self) -> Vec<LocalEndpoint> {
        let publishers = self.publishers.iter().map(|(id, p)| LocalEndpoint {
            endpoint_id: *id,
            key: p.key.clone(),
            role: EndpointRole::Publisher,
        });
        let subscribers = self.subscribers.iter().map(|(id, s)| LocalEndpoint {
            endpoint_id: *id,
            key: s.key.clone(),
            role: EndpointRole::Subscriber,
        });
        publishers.chain(subscribers).collect()
    }

    /// Local subscribers whose key equals `key` exactly.
    pub fn subscribers_for(&self, key: &TopicKey) -> Vec<EndpointId> {
        self.subscribers
            .iter()
            .filter(|(_, s)| &s.key == key)
            .map(|(id, _)| *id)
            .collect()
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    /// Install (or replace) a subscriber's handler.
    pub fn set_handler(&mut self, id: EndpointId, handler: Box<dyn MessageHandler>) -> bool {
        match self.subscribers.get_mut(&id) {
            Some(subscriber) => {
                subscriber.handler = Some(handler);
                subscriber.handler_generation += 1;
                true
            }
            None => false,
        }
    }

    /// Drop a subscriber's handler; later samples are counted, not delivered.
    pub fn clear_handler(&mut self, id: EndpointId) -> bool {
        match self.subscribers.get_mut(&id) {
            Some(subscriber) => {
                subscriber.handler = None;
                subscriber.handler_generation += 1;
                true
            }
            None => false,
        }
    }

    /// Take a subscriber's handler out for one callback and count the sample.
    ///
    /// Counts even when no handler is installed.
    pub fn loan_handler(&mut self, id: EndpointId) -> Option<LoanedHandler> {
        let subscriber = self.subscribers.get_mut(&id)?;
        subscriber.received += 1;
        let handler = subscriber.handler.take()?;
        Some(LoanedHandler {
            handler,
            generation: subscriber.handler_generation,
        })
    }

    /// Put a loaned handler back unless the subscriber is gone or its
    /// handler was replaced or cleared during the callback.
    pub fn restore_handler(&mut self, id: EndpointId, loan: LoanedHandler) {
        if let Some(subscriber) = self.subscribers.get_mut(&id) {
            if subscriber.handler.is_none() && subscriber.handler_generation == loan.generation {
                subscriber.handler = Some(loan.handler);
            }
        }
    }

    // ========================================================================
    // Remote endpoints
    // ========================================================================

    /// Record a remote endpoint. Returns whether anything changed.
    pub fn apply_remote(&mut self, remote: RemoteEndpoint) -> bool {
        let key = (remote.participant_id, remote.endpoint_id);
        match self.remotes.get(&key) {
            Some(existing) if *existing == remote => false,
            _ => {
                log::debug!(
                    "[registry] remote {} {} of {} on {} port {}",
                    remote.role,
                    remote.endpoint_id,
                    remote.participant_id,
                    remote.key,
                    remote.reliable_port
                );
                self.remotes.insert(key, remote);
                true
            }
        }
    }

    pub fn remove_remote(&mut self, participant_id: ParticipantId, endpoint_id: EndpointId) -> bool {
        self.remotes.remove(&(participant_id, endpoint_id)).is_some()
    }

    /// Drop every endpoint of a departed participant.
    pub fn remove_participant(&mut self, participant_id: ParticipantId) -> bool {
        let before = self.remotes.len();
        self.remotes.retain(|(owner, _), _| *owner != participant_id);
        before != self.remotes.len()
    }

    /// Apply one discovery event. Returns whether matches may have changed.
    pub fn apply_event(&mut self, event: &DiscoveryEvent) -> bool {
        match event {
            // Endpoints announced before their participant become resolvable.
            DiscoveryEvent::ParticipantDiscovered(_) => true,
            DiscoveryEvent::ParticipantLost(id) => self.remove_participant(*id),
            DiscoveryEvent::EndpointAnnounced(remote) => self.apply_remote(remote.clone()),
            DiscoveryEvent::EndpointWithdrawn {
                participant_id,
                endpoint_id,
            } => self.remove_remote(*participant_id, *endpoint_id),
        }
    }

    pub fn remote_endpoints(&self) -> impl Iterator<Item = &RemoteEndpoint> {
        self.remotes.values()
    }

    // ========================================================================
    // Matching
    // ========================================================================

    /// Recompute every local match set against the remote view.
    ///
    /// Remote endpoints whose participant cannot be resolved yet are
    /// skipped until a later recompute.
    pub fn recompute_matches(&mut self, resolver: &dyn AddressResolver) -> MatchDelta {
        let before = self.referenced_subscriber_endpoints();

        for (id, publisher) in self.publishers.iter_mut() {
            let matched = matching(&self.remotes, resolver, &publisher.key, EndpointRole::Subscriber);
            if matched != publisher.matched_subscribers {
                log::debug!(
                    "[registry] publisher {} on {} matched {} subscriber(s)",
                    id,
                    publisher.key,
                    matched.len()
                );
                publisher.matched_subscribers = matched;
            }
        }
        for (id, subscriber) in self.subscribers.iter_mut() {
            let matched = matching(&self.remotes, resolver, &subscriber.key, EndpointRole::Publisher);
            if matched != subscriber.matched_publishers {
                log::debug!(
                    "[registry] subscriber {} on {} matched {} publisher(s)",
                    id,
                    subscriber.key,
                    matched.len()
                );
                subscriber.matched_publishers = matched;
            }
        }

        let after = self.referenced_subscriber_endpoints();
        MatchDelta {
            added: after.difference(&before).copied().collect(),
            removed: before.difference(&after).copied().collect(),
        }
    }

    /// Union of every local publisher's matched subscriber endpoints.
    pub fn referenced_subscriber_endpoints(&self) -> BTreeSet<Endpoint> {
        self.publishers
            .values()
            .flat_map(|p| p.matched_subscribers.iter().copied())
            .collect()
    }

    /// Drop all local endpoints and remote knowledge.
    pub fn clear(&mut self) {
        self.publishers.clear();
        self.subscribers.clear();
        self.remotes.clear();
    }
}

fn matching(
    remotes: &BTreeMap<(ParticipantId, EndpointId), RemoteEndpoint>,
    resolver: &dyn AddressResolver,
    key: &TopicKey,
    role: EndpointRole,
) -> BTreeSet<Endpoint> {
    remotes
        .values()
        .filter(|remote| remote.role == role && &remote.key == key)
        .filter_map(|remote| {
            resolver
                .resolve(&remote.participant_id)
                .map(|address| Endpoint::new(address, remote.reliable_port))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr};
    use std::rc::Rc;

    #[derive(Default)]
    struct StaticResolver(HashMap<ParticipantId, IpAddr>);

    impl StaticResolver {
        fn with(mut self, id: ParticipantId, last_octet: u8) -> Self {
            self.0
                .insert(id, IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)));
            self
        }
    }

    impl AddressResolver for StaticResolver {
        fn resolve(&self, participant_id: &ParticipantId) -> Option<IpAddr> {
            self.0.get(participant_id).copied()
        }
    }

    fn temp() -> TopicKey {
        TopicKey::new("sensor/temp", "String")
    }

    fn remote(owner: &str, id: u32, key: TopicKey, role: EndpointRole, port: u16) -> RemoteEndpoint {
        RemoteEndpoint {
            participant_id: ParticipantId::from_name(owner),
            endpoint_id: EndpointId(id),
            key,
            role,
            reliable_port: port,
        }
    }

    fn ep(last_octet: u8, port: u16) -> Endpoint {
        Endpoint::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)), port)
    }

    #[test]
    fn test_exact_key_matching() {
        let mut registry = EndpointRegistry::new();
        let publisher = registry.register_publisher(temp());
        let resolver = StaticResolver::default()
            .with(ParticipantId::from_name("b"), 2)
            .with(ParticipantId::from_name("c"), 3);

        registry.apply_remote(remote("b", 1, temp(), EndpointRole::Subscriber, 7000));
        // Same topic, different type.
        registry.apply_remote(remote(
            "c",
            1,
            TopicKey::new("sensor/temp", "Int32"),
            EndpointRole::Subscriber,
            7001,
        ));
        // Same key, wrong role.
        registry.apply_remote(remote("c", 2, temp(), EndpointRole::Publisher, 7001));
        // Case differs.
        registry.apply_remote(remote(
            "c",
            3,
            TopicKey::new("Sensor/Temp", "String"),
            EndpointRole::Subscriber,
            7001,
        ));

        let delta = registry.recompute_matches(&resolver);
        assert_eq!(delta.added, vec![ep(2, 7000)]);
        assert!(delta.removed.is_empty());
        let matched: Vec<Endpoint> = registry
            .publisher(publisher)
            .unwrap()
            .matched_subscribers()
            .iter()
            .copied()
            .collect();
        assert_eq!(matched, vec![ep(2, 7000)]);
    }

    #[test]
    fn test_subscriber_matches_remote_publishers() {
        let mut registry = EndpointRegistry::new();
        let subscriber = registry.register_subscriber(temp(), None);
        let resolver = StaticResolver::default().with(ParticipantId::from_name("b"), 2);
        registry.apply_remote(remote("b", 4, temp(), EndpointRole::Publisher, 7100));

        // Subscriber matches do not touch the publisher-side delta.
        assert!(registry.recompute_matches(&resolver).is_empty());
        assert!(registry
            .subscriber(subscriber)
            .unwrap()
            .matched_publishers()
            .contains(&ep(2, 7100)));
    }

    #[test]
    fn test_unresolved_participant_is_skipped() {
        let mut registry = EndpointRegistry::new();
        let publisher = registry.register_publisher(temp());
        registry.apply_remote(remote("late", 1, temp(), EndpointRole::Subscriber, 7200));

        assert!(registry.recompute_matches(&StaticResolver::default()).is_empty());
        assert!(registry
            .publisher(publisher)
            .unwrap()
            .matched_subscribers()
            .is_empty());

        let resolver = StaticResolver::default().with(ParticipantId::from_name("late"), 9);
        assert_eq!(registry.recompute_matches(&resolver).added, vec![ep(9, 7200)]);
    }

    #[test]
    fn test_participant_loss_unmatches() {
        let mut registry = EndpointRegistry::new();
        let publisher = registry.register_publisher(temp());
        let subscriber = registry.register_subscriber(temp(), None);
        let b = ParticipantId::from_name("b");
        let resolver = StaticResolver::default().with(b, 2);
        registry.apply_remote(remote("b", 1, temp(), EndpointRole::Subscriber, 7000));
        registry.apply_remote(remote("b", 2, temp(), EndpointRole::Publisher, 7000));
        registry.recompute_matches(&resolver);

        assert!(registry.apply_event(&DiscoveryEvent::ParticipantLost(b)));
        let delta = registry.recompute_matches(&resolver);
        assert_eq!(delta.removed, vec![ep(2, 7000)]);
        assert!(registry
            .publisher(publisher)
            .unwrap()
            .matched_subscribers()
            .is_empty());
        assert!(registry
            .subscriber(subscriber)
            .unwrap()
            .matched_publishers()
            .is_empty());
        assert_eq!(registry.remote_endpoints().count(), 0);
    }

    #[test]
    fn test_shared_endpoint_removed_only_when_unreferenced() {
        let mut registry = EndpointRegistry::new();
        registry.register_publisher(temp());
        registry.register_publisher(TopicKey::new("sensor/humidity", "Float"));
        let resolver = StaticResolver::default().with(ParticipantId::from_name("b"), 2);
        registry.apply_remote(remote("b", 1, temp(), EndpointRole::Subscriber, 7000));
        registry.apply_remote(remote(
            "b",
            2,
            TopicKey::new("sensor/humidity", "Float"),
            EndpointRole::Subscriber,
            7000,
        ));
        assert_eq!(registry.recompute_matches(&resolver).added, vec![ep(2, 7000)]);

        let withdrawn = DiscoveryEvent::EndpointWithdrawn {
            participant_id: ParticipantId::from_name("b"),
            endpoint_id: EndpointId(1),
        };
        assert!(registry.apply_event(&withdrawn));
        // The humidity publisher still uses the channel.
        assert!(registry.recompute_matches(&resolver).is_empty());
    }

    #[test]
    fn test_repeated_announce_is_not_a_change() {
        let mut registry = EndpointRegistry::new();
        let r = remote("b", 1, temp(), EndpointRole::Subscriber, 7000);
        assert!(registry.apply_remote(r.clone()));
        assert!(!registry.apply_remote(r.clone()));
        let moved = RemoteEndpoint {
            reliable_port: 7002,
            ..r
        };
        assert!(registry.apply_remote(moved));
    }

    #[test]
    fn test_sequence_numbers() {
        let mut registry = EndpointRegistry::new();
        let id = registry.register_publisher(temp());
        let publisher = registry.publisher_mut(id).unwrap();
        assert_eq!(publisher.next_sequence().unwrap(), 1);
        assert_eq!(publisher.next_sequence().unwrap(), 2);
        assert_eq!(publisher.sequence_number(), 2);

        publisher.sequence_number = u32::MAX;
        assert!(matches!(
            publisher.next_sequence(),
            Err(Error::SequenceExhausted)
        ));
        assert_eq!(publisher.sequence_number(), u32::MAX);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let mut registry = EndpointRegistry::new();
        let publisher = registry.register_publisher(temp());
        let subscriber = registry.register_subscriber(temp(), None);
        assert_ne!(publisher, subscriber);

        assert_eq!(registry.unregister(publisher), Some(EndpointRole::Publisher));
        assert_eq!(registry.unregister(publisher), None);
        assert_eq!(registry.unregister(subscriber), Some(EndpointRole::Subscriber));
        assert!(registry.local_endpoints().is_empty());
    }

    #[test]
    fn test_subscribers_for_key() {
        let mut registry = EndpointRegistry::new();
        let a = registry.register_subscriber(temp(), None);
        let b = registry.register_subscriber(temp(), None);
        registry.register_subscriber(TopicKey::new("sensor/temp", "Int32"), None);
        assert_eq!(registry.subscribers_for(&temp()), vec![a, b]);
    }

    #[test]
    fn test_handler_loan_and_replacement() {
        let mut registry = EndpointRegistry::new();
        let got: Rc<RefCell<Vec<Vec<u8>>>> = Rc::default();
        let sink = Rc::clone(&got);
        let id = registry.register_subscriber(
            temp(),
            Some(Box::new(move |p: &[u8]| sink.borrow_mut().push(p.to_vec()))),
        );

        let mut loan = registry.loan_handler(id).unwrap();
        assert!(!registry.subscriber(id).unwrap().has_handler());
        loan.handler().on_message(b"first");
        registry.restore_handler(id, loan);
        assert!(registry.subscriber(id).unwrap().has_handler());

        // Replaced while on loan: the old handler is discarded.
        let loan = registry.loan_handler(id).unwrap();
        registry.set_handler(id, Box::new(|_: &[u8]| {}));
        registry.restore_handler(id, loan);
        let mut loan = registry.loan_handler(id).unwrap();
        loan.handler().on_message(b"second");
        registry.restore_handler(id, loan);

        assert_eq!(*got.borrow(), vec![b"first".to_vec()]);
        assert_eq!(registry.subscriber(id).unwrap().received(), 3);

        registry.clear_handler(id);
        assert!(registry.loan_handler(id).is_none());
        assert_eq!(registry.subscriber(id).unwrap().received(), 4);
    }

    #[test]
    fn test_lost_withdraw_unmatches_after_lease() {
        use crate::config::DiscoveryConfig;
        use crate::discovery::protocol::{DiscoveryMessage, UNSPECIFIED_ADDRESS};
        use crate::discovery::DiscoveryEngine;
        use std::time::{Duration, Instant};

        let mut engine = DiscoveryEngine::new(
            ParticipantId::from_name("local"),
            "local",
            DiscoveryConfig::default(),
        );
        engine.start(152).expect("start discovery");
        let mut registry = EndpointRegistry::new();
        let publisher = registry.register_publisher(temp());

        let peer = ParticipantId::from_name("restarted");
        let from = Endpoint::localhost(50_010);
        let announce = DiscoveryMessage::ParticipantAnnounce {
            participant_id: peer,
            domain_id: 152,
            name: "restarted".into(),
            address: UNSPECIFIED_ADDRESS,
        }
        .encode();
        let subscriber = DiscoveryMessage::EndpointAnnounce {
            participant_id: peer,
            endpoint_id: EndpointId(1),
            role: EndpointRole::Subscriber,
            reliable_port: 40_100,
            key: temp(),
        }
        .encode();

        let t0 = Instant::now();
        for datagram in [&announce, &subscriber] {
            if let Some(event) = engine.on_announcement_received_at(datagram, &from, t0) {
                registry.apply_event(&event);
            }
        }
        registry.recompute_matches(&engine);
        let matched =
            |r: &EndpointRegistry| r.publisher(publisher).unwrap().matched_subscribers().len();
        assert_eq!(matched(&registry), 1);

        // The withdraw never arrives; the peer keeps announcing itself only.
        for second in 1..=10 {
            let now = t0 + Duration::from_secs(second);
            engine.on_announcement_received_at(&announce, &from, now);
            for event in engine.tick_at(now, &[], 0) {
                registry.apply_event(&event);
            }
            registry.recompute_matches(&engine);
        }

        assert_eq!(matched(&registry), 0);
        assert_eq!(registry.remote_endpoints().count(), 0);
        assert_eq!(engine.known_participants().len(), 1);
    }
}
