// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery engine: participant table, lease tracking and announcements.
//!
//! The engine owns no timer. The participant drives it through
//! [`DiscoveryEngine::tick`], which in one pass:
//!
//! 1. drains the discovery channel and applies every announcement,
//! 2. evicts participants whose lease ran out, and remote endpoints that
//!    were not re-announced within the lease,
//! 3. re-announces the local participant and its endpoints when the
//!    announce interval elapsed (or immediately after a new peer showed up).
//!
//! Malformed, foreign-domain and duplicate traffic is dropped and counted
//! in [`DiscoveryStats`]; it never surfaces as an error.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io;
use std::net::IpAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use super::protocol::{DiscoveryMessage, UNSPECIFIED_ADDRESS};
use super::AddressResolver;
use crate::config::{DiscoveryConfig, DiscoveryPeer, MAX_PARTICIPANT_INDEX};
use crate::error::DiscoveryError;
use crate::transport::ports::PortMapping;
use crate::transport::udp::DiscoveryChannel;
use crate::types::{Endpoint, EndpointId, EndpointRole, ParticipantId, TopicKey};

type Inbox = Rc<RefCell<VecDeque<(Vec<u8>, Endpoint)>>>;

/// Engine lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscoveryState {
    Stopped,
    /// Claiming a participant index and opening sockets.
    Starting,
    Running,
}

/// One remote participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveryRecord {
    pub participant_id: ParticipantId,
    pub participant_name: String,
    /// Address used to reach the participant's reliable listener.
    pub address: IpAddr,
    /// Source of its discovery datagrams.
    pub discovery_endpoint: Endpoint,
    /// Last time anything was heard from it.
    pub announced_at: Instant,
}

impl DiscoveryRecord {
    pub fn is_expired(&self, now: Instant, lease: Duration) -> bool {
        now.saturating_duration_since(self.announced_at) > lease
    }
}

/// Local publisher or subscriber, as advertised in ENDPOINT_ANNOUNCE.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalEndpoint {
    pub endpoint_id: EndpointId,
    pub key: TopicKey,
    pub role: EndpointRole,
}

/// Endpoint advertised by a remote participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub participant_id: ParticipantId,
    pub endpoint_id: EndpointId,
    pub key: TopicKey,
    pub role: EndpointRole,
    pub reliable_port: u16,
}

/// Changes to the remote view, consumed by the endpoint registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiscoveryEvent {
    ParticipantDiscovered(ParticipantId),
    /// Lease expired or PARTICIPANT_LEAVE received.
    ParticipantLost(ParticipantId),
    EndpointAnnounced(RemoteEndpoint),
    EndpointWithdrawn {
        participant_id: ParticipantId,
        endpoint_id: EndpointId,
    },
}

/// Diagnostic counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiscoveryStats {
    pub announcements_sent: u64,
    pub announcements_received: u64,
    pub send_failures: u64,
    pub malformed_dropped: u64,
    pub duplicates_dropped: u64,
    pub foreign_domain_dropped: u64,
    pub unknown_participant_dropped: u64,
    pub participants_expired: u64,
    pub participants_left: u64,
    pub endpoints_expired: u64,
}

pub struct DiscoveryEngine {
    participant_id: ParticipantId,
    participant_name: String,
    config: DiscoveryConfig,
    state: DiscoveryState,
    domain_id: u32,
    participant_index: Option<u8>,
    ports: Option<PortMapping>,
    channel: Option<DiscoveryChannel>,
    inbox: Inbox,
    /// Configured destinations, resolved at start.
    destinations: Vec<Endpoint>,
    peers: BTreeMap<ParticipantId, DiscoveryRecord>,
    /// Last ENDPOINT_ANNOUNCE seen per remote endpoint.
    endpoint_seen: BTreeMap<(ParticipantId, EndpointId), Instant>,
    last_announce: Option<Instant>,
    announce_requested: bool,
    stats: DiscoveryStats,
}

impl DiscoveryEngine {
    pub fn new(
        participant_id: ParticipantId,
        participant_name: impl Into<String>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            participant_id,
            participant_name: participant_name.into(),
            config,
            state: DiscoveryState::Stopped,
            domain_id: 0,
            participant_index: None,
            ports: None,
            channel: None,
            inbox: Rc::default(),
            destinations: Vec::new(),
            peers: BTreeMap::new(),
            endpoint_seen: BTreeMap::new(),
            last_announce: None,
            announce_requested: false,
            stats: DiscoveryStats::default(),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Claim a participant index in `domain_id` and open the discovery
    /// channel. No-op when already running.
    ///
    /// # Errors
    ///
    /// - `InvalidDomainId` / `InvalidParticipantIndex` for out-of-range input
    /// - `PortInUse` when the requested index (or every index) is taken
    /// - `NetworkUnavailable` when sockets cannot be created
    pub fn start(&mut self, domain_id: u32) -> Result<(), DiscoveryError> {
        if self.state != DiscoveryState::Stopped {
            return Ok(());
        }
        PortMapping::calculate(domain_id, 0)?;

        self.state = DiscoveryState::Starting;
        match self.open_channel(domain_id) {
            Ok(()) => {
                self.state = DiscoveryState::Running;
                self.domain_id = domain_id;
                self.last_announce = None;
                log::info!(
                    "[discovery] {} '{}' running domain={} index={:?} port={:?} destinations={}",
                    self.participant_id,
                    self.participant_name,
                    domain_id,
                    self.participant_index,
                    self.local_port(),
                    self.destinations.len()
                );
                Ok(())
            }
            Err(e) => {
                self.state = DiscoveryState::Stopped;
                Err(e)
            }
        }
    }

    fn open_channel(&mut self, domain_id: u32) -> Result<(), DiscoveryError> {
        let (mut channel, index, ports) = self.claim_index(domain_id)?;

        if let Some(group) = self.config.multicast_group {
            if let Err(e) = channel.join_multicast(group, ports.discovery_multicast) {
                if self.config.peers.is_empty() {
                    return Err(DiscoveryError::NetworkUnavailable(e));
                }
                log::warn!(
                    "[discovery] multicast {} unavailable ({}), static peers only",
                    group,
                    e
                );
            }
        }

        let inbox = Rc::clone(&self.inbox);
        channel.set_receive_handler(move |bytes, from| {
            inbox.borrow_mut().push_back((bytes.to_vec(), *from));
        });

        self.destinations = self.resolve_destinations(
            domain_id,
            channel.local_port(),
            channel.multicast_group().map(|g| (IpAddr::V4(g), ports.discovery_multicast)),
        )?;
        self.channel = Some(channel);
        self.participant_index = Some(index);
        self.ports = Some(ports);
        Ok(())
    }

    /// Bind the discovery unicast port of the first free index (or of the
    /// configured one). The bind is exclusive, so AddrInUse means the index
    /// belongs to another participant on this host.
    fn claim_index(
        &self,
        domain_id: u32,
    ) -> Result<(DiscoveryChannel, u8, PortMapping), DiscoveryError> {
        let fixed = self.config.participant_index;
        let candidates = match fixed {
            Some(index) => index..index.saturating_add(1),
            None => 0..MAX_PARTICIPANT_INDEX,
        };

        let mut last_taken = 0;
        for index in candidates {
            let ports = match PortMapping::calculate(domain_id, index) {
                Ok(ports) => ports,
                Err(e) if fixed.is_some() => return Err(e),
                Err(_) => break,
            };
            match DiscoveryChannel::open(ports.discovery_unicast) {
                Ok(channel) => return Ok((channel, index, ports)),
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    log::debug!(
                        "[discovery] index {} taken (port {})",
                        index,
                        ports.discovery_unicast
                    );
                    last_taken = ports.discovery_unicast;
                }
                Err(e) => return Err(DiscoveryError::NetworkUnavailable(e)),
            }
        }
        Err(DiscoveryError::PortInUse(last_taken))
    }

    fn resolve_destinations(
        &self,
        domain_id: u32,
        local_port: u16,
        multicast: Option<(IpAddr, u16)>,
    ) -> Result<Vec<Endpoint>, DiscoveryError> {
        let mut destinations = BTreeSet::new();
        if let Some((group, port)) = multicast {
            destinations.insert(Endpoint::new(group, port));
        }
        for peer in &self.config.peers {
            match peer {
                DiscoveryPeer::Addr(addr) => {
                    destinations.insert(Endpoint::from(*addr));
                }
                DiscoveryPeer::Host(host) => {
                    for addr in PortMapping::host_discovery_addrs(
                        *host,
                        domain_id,
                        self.config.host_probe_slots,
                    )? {
                        destinations.insert(Endpoint::from(addr));
                    }
                }
            }
        }
        // Our own socket would only echo back to us.
        destinations.retain(|e| !(e.port() == local_port && e.address().is_loopback()));
        Ok(destinations.into_iter().collect())
    }

    /// Send PARTICIPANT_LEAVE, close the channel and forget every peer.
    pub fn stop(&mut self) {
        if self.state == DiscoveryState::Stopped {
            return;
        }
        let leave = DiscoveryMessage::ParticipantLeave {
            participant_id: self.participant_id,
        };
        self.broadcast(&leave.encode());

        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.peers.clear();
        self.endpoint_seen.clear();
        self.destinations.clear();
        self.inbox.borrow_mut().clear();
        self.participant_index = None;
        self.ports = None;
        self.last_announce = None;
        self.announce_requested = false;
        self.state = DiscoveryState::Stopped;
        log::info!("[discovery] {} stopped", self.participant_id);
    }

    // ========================================================================
    // Announcements
    // ========================================================================

    /// Send PARTICIPANT_ANNOUNCE to every destination and known peer.
    ///
    /// Returns how many datagrams were handed to the OS. Send failures are
    /// counted and logged, never returned.
    pub fn announce_self(&mut self) -> Result<usize, DiscoveryError> {
        self.ensure_running()?;
        let message = DiscoveryMessage::ParticipantAnnounce {
            participant_id: self.participant_id,
            domain_id: self.domain_id,
            name: self.participant_name.clone(),
            address: self.config.advertised_address.unwrap_or(UNSPECIFIED_ADDRESS),
        };
        Ok(self.broadcast(&message.encode()))
    }

    /// Send one ENDPOINT_ANNOUNCE per local endpoint.
    pub fn announce_endpoints(
        &mut self,
        endpoints: &[LocalEndpoint],
        reliable_port: u16,
    ) -> Result<usize, DiscoveryError> {
        self.ensure_running()?;
        let mut sent = 0;
        for endpoint in endpoints {
            let message = DiscoveryMessage::EndpointAnnounce {
                participant_id: self.participant_id,
                endpoint_id: endpoint.endpoint_id,
                role: endpoint.role,
                reliable_port,
                key: endpoint.key.clone(),
            };
            sent += self.broadcast(&message.encode());
        }
        Ok(sent)
    }

    /// Tell peers a local endpoint is gone.
    pub fn withdraw_endpoint(&mut self, endpoint_id: EndpointId) -> Result<usize, DiscoveryError> {
        self.ensure_running()?;
        let message = DiscoveryMessage::EndpointWithdraw {
            participant_id: self.participant_id,
            endpoint_id,
        };
        Ok(self.broadcast(&message.encode()))
    }

    /// Announce on the next tick instead of waiting for the interval.
    pub fn request_announce(&mut self) {
        self.announce_requested = true;
    }

    fn broadcast(&mut self, datagram: &[u8]) -> usize {
        let targets = self.targets();
        let Some(channel) = self.channel.as_mut() else {
            return 0;
        };
        let mut sent = 0;
        for target in &targets {
            match channel.announce(datagram, target) {
                Ok(()) => sent += 1,
                Err(e) => {
                    self.stats.send_failures += 1;
                    log::debug!("[discovery] announce to {} dropped: {}", target, e);
                }
            }
        }
        self.stats.announcements_sent += sent as u64;
        sent
    }

    /// Configured destinations plus the discovery socket of every known peer.
    fn targets(&self) -> Vec<Endpoint> {
        let mut targets: BTreeSet<Endpoint> = self.destinations.iter().copied().collect();
        targets.extend(self.peers.values().map(|r| r.discovery_endpoint));
        targets.into_iter().collect()
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// One cooperative step; see the module docs.
    pub fn tick(&mut self, endpoints: &[LocalEndpoint], reliable_port: u16) -> Vec<DiscoveryEvent> {
        self.tick_at(Instant::now(), endpoints, reliable_port)
    }

    /// [`tick`](Self::tick) with an explicit clock.
    pub fn tick_at(
        &mut self,
        now: Instant,
        endpoints: &[LocalEndpoint],
        reliable_port: u16,
    ) -> Vec<DiscoveryEvent> {
        if self.state != DiscoveryState::Running {
            return Vec::new();
        }
        if let Some(channel) = self.channel.as_mut() {
            channel.poll();
        }

        let mut events = Vec::new();
        let pending: Vec<(Vec<u8>, Endpoint)> = self.inbox.borrow_mut().drain(..).collect();
        for (datagram, from) in pending {
            if let Some(event) = self.on_announcement_received_at(&datagram, &from, now) {
                // Let the newcomer learn about us without waiting a full interval.
                if matches!(event, DiscoveryEvent::ParticipantDiscovered(_)) {
                    self.announce_requested = true;
                }
                events.push(event);
            }
        }

        events.extend(self.evict_expired(now));
        events.extend(self.evict_stale_endpoints(now));

        let due = self.last_announce.map_or(true, |last| {
            now.saturating_duration_since(last) >= self.config.announce_interval
        });
        if due || self.announce_requested {
            self.announce_requested = false;
            self.last_announce = Some(now);
            self.announce_all(endpoints, reliable_port);
        }
        events
    }

    fn announce_all(&mut self, endpoints: &[LocalEndpoint], reliable_port: u16) {
        let announced = self
            .announce_self()
            .and_then(|_| self.announce_endpoints(endpoints, reliable_port));
        if let Err(e) = announced {
            log::debug!("[discovery] periodic announce skipped: {}", e);
        }
    }

    fn evict_expired(&mut self, now: Instant) -> Vec<DiscoveryEvent> {
        let lease = self.config.lease_duration;
        let expired: Vec<ParticipantId> = self
            .peers
            .values()
            .filter(|record| record.is_expired(now, lease))
            .map(|record| record.participant_id)
            .collect();

        for id in &expired {
            self.peers.remove(id);
            self.forget_endpoints_of(*id);
            self.stats.participants_expired += 1;
            log::info!("[discovery] participant {} lease expired", id);
        }
        expired
            .into_iter()
            .map(DiscoveryEvent::ParticipantLost)
            .collect()
    }

    /// Withdraw remote endpoints whose owner is alive but stopped
    /// announcing them (a lost ENDPOINT_WITHDRAW, or a restarted peer).
    fn evict_stale_endpoints(&mut self, now: Instant) -> Vec<DiscoveryEvent> {
        let lease = self.config.lease_duration;
        let stale: Vec<(ParticipantId, EndpointId)> = self
            .endpoint_seen
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) > lease)
            .map(|(key, _)| *key)
            .collect();

        stale
            .into_iter()
            .map(|(participant_id, endpoint_id)| {
                self.endpoint_seen.remove(&(participant_id, endpoint_id));
                self.stats.endpoints_expired += 1;
                log::info!(
                    "[discovery] endpoint {} of {} not re-announced, withdrawn",
                    endpoint_id,
                    participant_id
                );
                DiscoveryEvent::EndpointWithdrawn {
                    participant_id,
                    endpoint_id,
                }
            })
            .collect()
    }

    fn forget_endpoints_of(&mut self, participant_id: ParticipantId) {
        self.endpoint_seen.retain(|(owner, _), _| *owner != participant_id);
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Apply one inbound datagram. Rejected datagrams return `None` and are
    /// counted.
    pub fn on_announcement_received(
        &mut self,
        datagram: &[u8],
        from: &Endpoint,
    ) -> Option<DiscoveryEvent> {
        self.on_announcement_received_at(datagram, from, Instant::now())
    }

    pub fn on_announcement_received_at(
        &mut self,
        datagram: &[u8],
        from: &Endpoint,
        now: Instant,
    ) -> Option<DiscoveryEvent> {
        match self.process(datagram, from, now) {
            Ok(event) => event,
            Err(e) => {
                match e {
                    DiscoveryError::Malformed(_) => self.stats.malformed_dropped += 1,
                    DiscoveryError::ForeignDomain(_) => self.stats.foreign_domain_dropped += 1,
                    DiscoveryError::Duplicate(_) => self.stats.duplicates_dropped += 1,
                    DiscoveryError::UnknownParticipant(_) => {
                        self.stats.unknown_participant_dropped += 1
                    }
                    _ => {}
                }
                log::debug!("[discovery] dropped datagram from {}: {}", from, e);
                None
            }
        }
    }

    fn process(
        &mut self,
        datagram: &[u8],
        from: &Endpoint,
        now: Instant,
    ) -> Result<Option<DiscoveryEvent>, DiscoveryError> {
        self.ensure_running()?;
        self.stats.announcements_received += 1;

        let message = DiscoveryMessage::decode(datagram)?;
        let participant_id = message.participant_id();
        if participant_id == self.participant_id {
            return Ok(None);
        }

        match message {
            DiscoveryMessage::ParticipantAnnounce {
                domain_id,
                name,
                address,
                ..
            } => {
                if domain_id != self.domain_id {
                    return Err(DiscoveryError::ForeignDomain(domain_id));
                }
                let address = if address.is_unspecified() {
                    from.address()
                } else {
                    address
                };
                if let Some(record) = self.peers.get_mut(&participant_id) {
                    check_source(record, from)?;
                    record.announced_at = now;
                    record.participant_name = name;
                    record.address = address;
                    return Ok(None);
                }

                log::info!(
                    "[discovery] participant {} '{}' discovered at {}",
                    participant_id,
                    name,
                    from
                );
                self.peers.insert(
                    participant_id,
                    DiscoveryRecord {
                        participant_id,
                        participant_name: name,
                        address,
                        discovery_endpoint: *from,
                        announced_at: now,
                    },
                );
                Ok(Some(DiscoveryEvent::ParticipantDiscovered(participant_id)))
            }
            DiscoveryMessage::EndpointAnnounce {
                endpoint_id,
                role,
                reliable_port,
                key,
                ..
            } => {
                self.refresh(participant_id, from, now)?;
                self.endpoint_seen.insert((participant_id, endpoint_id), now);
                Ok(Some(DiscoveryEvent::EndpointAnnounced(RemoteEndpoint {
                    participant_id,
                    endpoint_id,
                    key,
                    role,
                    reliable_port,
                })))
            }
            DiscoveryMessage::EndpointWithdraw { endpoint_id, .. } => {
                self.refresh(participant_id, from, now)?;
                self.endpoint_seen.remove(&(participant_id, endpoint_id));
                Ok(Some(DiscoveryEvent::EndpointWithdrawn {
                    participant_id,
                    endpoint_id,
                }))
            }
            DiscoveryMessage::ParticipantLeave { .. } => {
                let Some(record) = self.peers.get(&participant_id) else {
                    return Ok(None);
                };
                check_source(record, from)?;
                self.peers.remove(&participant_id);
                self.forget_endpoints_of(participant_id);
                self.stats.participants_left += 1;
                log::info!("[discovery] participant {} left", participant_id);
                Ok(Some(DiscoveryEvent::ParticipantLost(participant_id)))
            }
        }
    }

    fn refresh(
        &mut self,
        participant_id: ParticipantId,
        from: &Endpoint,
        now: Instant,
    ) -> Result<(), DiscoveryError> {
        let record = self
            .peers
            .get_mut(&participant_id)
            .ok_or(DiscoveryError::UnknownParticipant(participant_id))?;
        check_source(record, from)?;
        record.announced_at = now;
        Ok(())
    }

    fn ensure_running(&self) -> Result<(), DiscoveryError> {
        if self.state == DiscoveryState::Running {
            Ok(())
        } else {
            Err(DiscoveryError::NotRunning)
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Snapshot of the peer table, ordered by participant id.
    pub fn known_participants(&self) -> Vec<DiscoveryRecord> {
        self.peers.values().cloned().collect()
    }

    pub fn record(&self, participant_id: &ParticipantId) -> Option<&DiscoveryRecord> {
        self.peers.get(participant_id)
    }

    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }

    pub fn domain_id(&self) -> u32 {
        self.domain_id
    }

    pub fn participant_index(&self) -> Option<u8> {
        self.participant_index
    }

    pub fn ports(&self) -> Option<PortMapping> {
        self.ports
    }

    pub fn local_port(&self) -> Option<u16> {
        self.channel.as_ref().map(DiscoveryChannel::local_port)
    }

    pub fn destinations(&self) -> &[Endpoint] {
        &self.destinations
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn stats(&self) -> &DiscoveryStats {
        &self.stats
    }
}

impl AddressResolver for DiscoveryEngine {
    fn resolve(&self, participant_id: &ParticipantId) -> Option<IpAddr> {
        self.peers.get(participant_id).map(|record| record.address)
    }
}

impl Drop for DiscoveryEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Same id from another socket: two live participants share a name.
fn check_source(record: &DiscoveryRecord, from: &Endpoint) -> Result<(), DiscoveryError> {
    if record.discovery_endpoint.port() == from.port() {
        Ok(())
    } else {
        Err(DiscoveryError::Duplicate(record.participant_id))
    }
}
