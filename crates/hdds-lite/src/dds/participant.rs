// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Participant
//!
//! The [`Participant`] is the entry point: it joins a domain, runs
//! discovery, owns the endpoint registry and the reliable channel pool, and
//! creates [`Publisher`]s and [`Subscriber`]s.
//!
//! ## Example
//!
//! ```rust,no_run
//! use hdds_lite::{Participant, Result};
//!
//! fn main() -> Result<()> {
//!     let participant = Participant::init("node_pub", 0)?;
//!     let publisher = participant.create_publisher("sensor/temp", "String")?;
//!
//!     loop {
//!         participant.spin_once()?;
//!         publisher.publish(b"23.5")?;
//!         std::thread::sleep(std::time::Duration::from_millis(100));
//!     }
//! }
//! ```
//!
//! ## Driving
//!
//! Nothing runs in the background. [`Participant::spin_once`] performs one
//! round of discovery (receive, expire, announce), match recomputation,
//! channel I/O and handler dispatch; the application calls it from its own
//! loop.
//!
//! ## Lifecycle
//!
//! ```text
//! new() --> Uninitialized --start()--> Active --shutdown()/drop--> Closed
//! ```
//!
//! Shutdown stops accepting calls, closes every reliable channel, then
//! sends PARTICIPANT_LEAVE and closes the discovery channel.

use std::cell::{Cell, RefCell};
use std::fmt;

use super::builder::ParticipantBuilder;
use super::listener::MessageHandler;
use super::publisher::Publisher;
use super::subscriber::Subscriber;
use crate::config::{ParticipantConfig, MAX_DOMAIN_ID};
use crate::discovery::{DiscoveryEngine, DiscoveryRecord, DiscoveryStats};
use crate::error::{Error, InitError, Result, StateError};
use crate::registry::EndpointRegistry;
use crate::transport::tcp::{ChannelInfo, ChannelPool, InboundFrame, PoolEvent};
use crate::types::{Endpoint, EndpointId, ParticipantId, TopicKey};
use crate::wire::{self, Envelope};

/// Participant lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParticipantState {
    Uninitialized,
    Active,
    Closed,
}

impl fmt::Display for ParticipantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParticipantState::Uninitialized => "uninitialized",
            ParticipantState::Active => "active",
            ParticipantState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Data-path counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParticipantStats {
    /// `publish()` calls that produced an envelope.
    pub envelopes_published: u64,
    /// Envelope copies accepted by a reliable channel.
    pub envelopes_sent: u64,
    pub send_failures: u64,
    /// Frames received on reliable channels.
    pub envelopes_received: u64,
    /// Handler invocations.
    pub envelopes_delivered: u64,
    pub decode_errors: u64,
    /// Envelopes with no local subscriber for their key.
    pub unmatched_dropped: u64,
    pub connections_lost: u64,
}

struct Inner {
    config: ParticipantConfig,
    discovery: DiscoveryEngine,
    registry: EndpointRegistry,
    pool: Option<ChannelPool>,
    stats: ParticipantStats,
}

impl Inner {
    /// Recompute matches, pre-connect to new subscriber endpoints and drop
    /// channels nobody publishes to any more.
    fn refresh_matches(&mut self) {
        let delta = self.registry.recompute_matches(&self.discovery);
        let Some(pool) = self.pool.as_mut() else {
            return;
        };
        for endpoint in &delta.added {
            if let Err(e) = pool.connect(endpoint) {
                log::debug!("[participant] pre-connect to {} failed: {}", endpoint, e);
            }
        }
        for endpoint in &delta.removed {
            pool.disconnect(endpoint);
        }
    }
}

/// Domain participant.
///
/// Single-threaded: all methods take `&self` and the participant is not
/// `Sync`. Publishers and subscribers borrow it and must be dropped first.
pub struct Participant {
    id: ParticipantId,
    name: String,
    domain_id: u32,
    state: Cell<ParticipantState>,
    /// Set while handlers run; blocks nested spins.
    dispatching: Cell<bool>,
    inner: RefCell<Inner>,
}

impl Participant {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Create an uninitialized participant. No socket is opened until
    /// [`start`](Self::start).
    pub fn new(name: &str, domain_id: u32, config: ParticipantConfig) -> Result<Self> {
        if domain_id > MAX_DOMAIN_ID {
            return Err(InitError::InvalidDomainId(domain_id).into());
        }
        config.validate().map_err(InitError::InvalidConfig)?;

        let id = ParticipantId::from_name(name);
        let discovery = DiscoveryEngine::new(id, name, config.discovery.clone());
        Ok(Self {
            id,
            name: name.to_string(),
            domain_id,
            state: Cell::new(ParticipantState::Uninitialized),
            dispatching: Cell::new(false),
            inner: RefCell::new(Inner {
                config,
                discovery,
                registry: EndpointRegistry::new(),
                pool: None,
                stats: ParticipantStats::default(),
            }),
        })
    }

    /// Create and start a participant with default settings plus
    /// `HDDS_LITE_*` environment overrides.
    ///
    /// # Errors
    ///
    /// - `InitError::InvalidConfig` for a bad override
    /// - `InitError::PortInUse` / `NetworkUnavailable` when discovery
    ///   cannot open its socket
    pub fn init(name: &str, domain_id: u32) -> Result<Self> {
        let config = ParticipantConfig::from_env().map_err(InitError::InvalidConfig)?;
        let participant = Self::new(name, domain_id, config)?;
        participant.start()?;
        Ok(participant)
    }

    pub fn builder(name: &str) -> ParticipantBuilder {
        ParticipantBuilder::new(name)
    }

    /// Start discovery and the reliable listener.
    pub fn start(&self) -> Result<()> {
        match self.state.get() {
            ParticipantState::Active => return Ok(()),
            ParticipantState::Closed => return Err(StateError::Closed.into()),
            ParticipantState::Uninitialized => {}
        }

        let mut inner = self.inner.borrow_mut();
        inner
            .discovery
            .start(self.domain_id)
            .map_err(InitError::from)?;

        let preferred = inner.discovery.ports().map_or(0, |ports| ports.data_unicast);
        let pool = match ChannelPool::bind_preferred(preferred, inner.config.reliable.clone()) {
            Ok(pool) => pool,
            Err(e) => {
                inner.discovery.stop();
                return Err(InitError::NetworkUnavailable(e).into());
            }
        };

        log::info!(
            "[participant] {} '{}' active domain={} index={:?} reliable_port={}",
            self.id,
            self.name,
            self.domain_id,
            inner.discovery.participant_index(),
            pool.local_port()
        );
        inner.pool = Some(pool);
        inner.discovery.request_announce();
        self.state.set(ParticipantState::Active);
        Ok(())
    }

    // ========================================================================
    // Endpoints
    // ========================================================================

    pub fn create_publisher(&self, topic_name: &str, type_name: &str) -> Result<Publisher<'_>> {
        self.ensure_active()?;
        let key = TopicKey::new(topic_name, type_name);
        key.validate().map_err(Error::InvalidTopic)?;

        let mut inner = self.inner.borrow_mut();
        let id = inner.registry.register_publisher(key.clone());
        inner.discovery.request_announce();
        inner.refresh_matches();
        Ok(Publisher::new(self, id, key))
    }

    /// Subscriber without a handler; install one with
    /// [`Subscriber::set_handler`].
    pub fn create_subscriber(&self, topic_name: &str, type_name: &str) -> Result<Subscriber<'_>> {
        self.create_subscriber_inner(topic_name, type_name, None)
    }

    pub fn create_subscriber_with_handler(
        &self,
        topic_name: &str,
        type_name: &str,
        handler: impl MessageHandler + 'static,
    ) -> Result<Subscriber<'_>> {
        self.create_subscriber_inner(topic_name, type_name, Some(Box::new(handler)))
    }

    fn create_subscriber_inner(
        &self,
        topic_name: &str,
        type_name: &str,
        handler: Option<Box<dyn MessageHandler>>,
    ) -> Result<Subscriber<'_>> {
        self.ensure_active()?;
        let key = TopicKey::new(topic_name, type_name);
        key.validate().map_err(Error::InvalidTopic)?;

        let mut inner = self.inner.borrow_mut();
        let id = inner.registry.register_subscriber(key.clone(), handler);
        inner.discovery.request_announce();
        inner.refresh_matches();
        Ok(Subscriber::new(self, id, key))
    }

    // ========================================================================
    // Spin
    // ========================================================================

    /// One cooperative step. Returns the number of handler invocations.
    ///
    /// # Errors
    ///
    /// `StateError` when the participant is not active, and
    /// `StateError::Busy` when called from inside a message handler. Network
    /// and decode failures are absorbed and counted.
    pub fn spin_once(&self) -> Result<usize> {
        self.ensure_active()?;
        if self.dispatching.get() {
            return Err(StateError::Busy.into());
        }
        let frames = self.drive_io();

        self.dispatching.set(true);
        let mut delivered = 0;
        for frame in frames {
            delivered += self.dispatch(frame);
        }
        self.dispatching.set(false);
        Ok(delivered)
    }

    fn drive_io(&self) -> Vec<InboundFrame> {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;

        let locals = inner.registry.local_endpoints();
        let reliable_port = inner.pool.as_ref().map_or(0, ChannelPool::local_port);
        for event in inner.discovery.tick(&locals, reliable_port) {
            inner.registry.apply_event(&event);
        }
        inner.refresh_matches();

        let Some(pool) = inner.pool.as_mut() else {
            return Vec::new();
        };
        for event in pool.poll() {
            match event {
                PoolEvent::Accepted(remote) => {
                    log::debug!("[participant] inbound channel from {}", remote);
                }
                PoolEvent::Lost {
                    endpoint,
                    direction,
                    error,
                } => {
                    inner.stats.connections_lost += 1;
                    log::warn!(
                        "[participant] {:?} channel {} lost: {}",
                        direction,
                        endpoint,
                        error
                    );
                }
            }
        }
        let frames = pool.take_inbound();
        inner.stats.envelopes_received += frames.len() as u64;
        frames
    }

    fn dispatch(&self, frame: InboundFrame) -> usize {
        let envelope = match wire::decode(&frame.bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.inner.borrow_mut().stats.decode_errors += 1;
                log::debug!("[participant] dropped frame from {}: {}", frame.from, e);
                return 0;
            }
        };

        let subscribers = self
            .inner
            .borrow()
            .registry
            .subscribers_for(&envelope.topic_key());
        if subscribers.is_empty() {
            self.inner.borrow_mut().stats.unmatched_dropped += 1;
            log::debug!(
                "[participant] no subscriber for {} [{}] (seq {} from {})",
                envelope.topic_name(),
                envelope.type_name(),
                envelope.sequence_number(),
                frame.from
            );
            return 0;
        }

        let mut delivered = 0;
        for id in subscribers {
            let loan = self.inner.borrow_mut().registry.loan_handler(id);
            let Some(mut loan) = loan else {
                continue;
            };
            // No borrow held: the handler may call back into the participant.
            loan.handler().on_envelope(&envelope);
            let mut inner = self.inner.borrow_mut();
            inner.registry.restore_handler(id, loan);
            inner.stats.envelopes_delivered += 1;
            delivered += 1;
        }
        delivered
    }

    // ========================================================================
    // Publisher / subscriber plumbing
    // ========================================================================

    /// Encode and send one sample to every matched subscriber endpoint.
    pub(crate) fn publish(&self, publisher: EndpointId, payload: &[u8]) -> Result<usize> {
        self.ensure_active()?;
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;

        let Some(local) = inner.registry.publisher_mut(publisher) else {
            return Ok(0);
        };
        let key = local.key().clone();
        let size = wire::encoded_len(key.topic_name().len(), key.type_name().len(), payload.len());
        let max = inner.config.reliable.max_message_size;
        if size > max {
            return Err(Error::PayloadTooLarge { size, max });
        }

        let sequence_number = local.next_sequence()?;
        let targets: Vec<Endpoint> = local.matched_subscribers().iter().copied().collect();
        let envelope = Envelope::for_topic(&key, payload, sequence_number)?;
        let bytes = wire::encode(&envelope);
        inner.stats.envelopes_published += 1;

        if targets.is_empty() {
            log::debug!("[participant] {} seq {} has no subscribers", key, sequence_number);
            return Ok(0);
        }
        let pool = inner.pool.as_mut().ok_or(StateError::Closed)?;

        let mut delivered = 0;
        let mut failures = Vec::new();
        for endpoint in targets {
            match pool.send_to(&endpoint, &bytes) {
                Ok(()) => delivered += 1,
                Err(e) => failures.push((endpoint, e)),
            }
        }
        inner.stats.envelopes_sent += delivered as u64;
        inner.stats.send_failures += failures.len() as u64;

        if failures.is_empty() {
            Ok(delivered)
        } else {
            log::warn!(
                "[participant] {} seq {} reached {} of {} subscriber(s)",
                key,
                sequence_number,
                delivered,
                delivered + failures.len()
            );
            Err(Error::Publish {
                delivered,
                failures,
            })
        }
    }

    /// Remove a local endpoint and withdraw it from peers.
    pub(crate) fn unregister(&self, id: EndpointId) {
        let Ok(mut inner) = self.inner.try_borrow_mut() else {
            log::warn!("[participant] endpoint {} dropped while participant busy", id);
            return;
        };
        if inner.registry.unregister(id).is_none() {
            return;
        }
        if self.state.get() == ParticipantState::Active {
            if let Err(e) = inner.discovery.withdraw_endpoint(id) {
                log::debug!("[participant] withdraw of {} skipped: {}", id, e);
            }
            inner.refresh_matches();
        }
    }

    pub(crate) fn set_handler(&self, id: EndpointId, handler: Box<dyn MessageHandler>) -> Result<()> {
        self.ensure_usable()?;
        self.inner.borrow_mut().registry.set_handler(id, handler);
        Ok(())
    }

    pub(crate) fn clear_handler(&self, id: EndpointId) -> Result<()> {
        self.ensure_usable()?;
        self.inner.borrow_mut().registry.clear_handler(id);
        Ok(())
    }

    /// Run `f` on the registry; `None` while the participant is mid-call.
    pub(crate) fn with_registry<R>(&self, f: impl FnOnce(&EndpointRegistry) -> R) -> Option<R> {
        self.inner.try_borrow().ok().map(|inner| f(&inner.registry))
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Ordered teardown. Idempotent; also run on drop.
    pub fn shutdown(&self) {
        if self.state.get() == ParticipantState::Closed {
            return;
        }
        self.state.set(ParticipantState::Closed);

        let Ok(mut inner) = self.inner.try_borrow_mut() else {
            log::warn!("[participant] {} shutdown while busy, deferring to drop", self.id);
            return;
        };
        if let Some(mut pool) = inner.pool.take() {
            pool.close_all();
        }
        inner.discovery.stop();
        inner.registry.clear();
        log::info!("[participant] {} '{}' closed", self.id, self.name);
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> ParticipantId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain_id(&self) -> u32 {
        self.domain_id
    }

    pub fn state(&self) -> ParticipantState {
        self.state.get()
    }

    pub fn is_active(&self) -> bool {
        self.state.get() == ParticipantState::Active
    }

    /// Port of the reliable listener, advertised in ENDPOINT_ANNOUNCE.
    pub fn reliable_port(&self) -> Option<u16> {
        self.inner.borrow().pool.as_ref().map(ChannelPool::local_port)
    }

    pub fn participant_index(&self) -> Option<u8> {
        self.inner.borrow().discovery.participant_index()
    }

    /// Snapshot of the remote participants discovery currently knows.
    pub fn known_participants(&self) -> Vec<DiscoveryRecord> {
        self.inner.borrow().discovery.known_participants()
    }

    pub fn stats(&self) -> ParticipantStats {
        self.inner.borrow().stats.clone()
    }

    pub fn discovery_stats(&self) -> DiscoveryStats {
        self.inner.borrow().discovery.stats().clone()
    }

    /// Pooled reliable channels, outbound and inbound.
    pub fn channels(&self) -> Vec<ChannelInfo> {
        self.inner
            .borrow()
            .pool
            .as_ref()
            .map(ChannelPool::channel_info)
            .unwrap_or_default()
    }

    pub fn config(&self) -> ParticipantConfig {
        self.inner.borrow().config.clone()
    }

    fn ensure_active(&self) -> std::result::Result<(), StateError> {
        match self.state.get() {
            ParticipantState::Active => Ok(()),
            ParticipantState::Uninitialized => Err(StateError::NotInitialized),
            ParticipantState::Closed => Err(StateError::Closed),
        }
    }

    /// Handlers may be installed before start, not after close.
    fn ensure_usable(&self) -> std::result::Result<(), StateError> {
        match self.state.get() {
            ParticipantState::Closed => Err(StateError::Closed),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Participant")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("domain_id", &self.domain_id)
            .field("state", &self.state.get())
            .finish()
    }
}

impl Drop for Participant {
    fn drop(&mut self) {
        self.shutdown();
        // A shutdown deferred by a busy borrow completes here.
        let inner = self.inner.get_mut();
        if let Some(mut pool) = inner.pool.take() {
            pool.close_all();
        }
        inner.discovery.stop();
    }
}
