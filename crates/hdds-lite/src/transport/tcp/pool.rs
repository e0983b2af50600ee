// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable channel pool.
//!
//! ```text
//! +-------------------------------------------------------------+
//! |                        ChannelPool                           |
//! |  +-----------------+  +-----------------------------------+  |
//! |  |    Listener     |  |  Outbound channels                |  |
//! |  | (mio TcpListener)| |  BTreeMap<Endpoint, ReliableChannel> |
//! |  +-----------------+  +-----------------------------------+  |
//! |  +-------------------------------------------------------+  |
//! |  |  Inbound channels (accepted)   Vec<ReliableChannel>    |  |
//! |  +-------------------------------------------------------+  |
//! |  +-------------------------------------------------------+  |
//! |  |  Inbox: frames received on any channel, FIFO           |  |
//! |  +-------------------------------------------------------+  |
//! +-------------------------------------------------------------+
//! ```
//!
//! Outbound channels are keyed by the remote listener endpoint and reused
//! for every send to it. A channel that fails is removed; the next send to
//! that endpoint dials again.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use super::channel::{ChannelState, ChannelStats, Direction, ReliableChannel};
use crate::config::ReliableConfig;
use crate::error::TransportError;
use crate::types::Endpoint;

/// Upper bound on connections accepted per `poll()`.
const MAX_ACCEPTS_PER_POLL: usize = 64;

/// Frame received from a remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub from: Endpoint,
    pub bytes: Vec<u8>,
}

type Inbox = Rc<RefCell<VecDeque<InboundFrame>>>;

/// Connection events surfaced by [`ChannelPool::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    Accepted(Endpoint),
    Lost {
        endpoint: Endpoint,
        direction: Direction,
        error: TransportError,
    },
}

/// Pool-level counters.
#[derive(Clone, Debug, Default)]
pub struct PoolStats {
    pub connects_started: u64,
    pub accepted: u64,
    pub channels_lost: u64,
}

/// Snapshot of one pooled channel.
#[derive(Clone, Debug)]
pub struct ChannelInfo {
    pub remote: Endpoint,
    pub direction: Direction,
    pub state: ChannelState,
    pub stats: ChannelStats,
}

pub struct ChannelPool {
    config: ReliableConfig,
    listener: Option<mio::net::TcpListener>,
    local_port: u16,
    outbound: BTreeMap<Endpoint, ReliableChannel>,
    inbound: Vec<ReliableChannel>,
    inbox: Inbox,
    stats: PoolStats,
}

impl ChannelPool {
    /// Bind the listener on `config.listen_address:port`.
    ///
    /// `port` 0 asks the OS for an ephemeral port; see
    /// [`local_port`](Self::local_port).
    pub fn bind(port: u16, config: ReliableConfig) -> io::Result<Self> {
        let addr = SocketAddr::new(config.listen_address, port);
        let listener = mio::net::TcpListener::bind(addr)?;
        let local_port = listener.local_addr()?.port();
        log::debug!("[tcp] listening on {}:{}", config.listen_address, local_port);

        Ok(Self {
            config,
            listener: Some(listener),
            local_port,
            outbound: BTreeMap::new(),
            inbound: Vec::new(),
            inbox: Rc::default(),
            stats: PoolStats::default(),
        })
    }

    /// Bind on the preferred port, falling back to an ephemeral one.
    pub fn bind_preferred(port: u16, config: ReliableConfig) -> io::Result<Self> {
        match Self::bind(port, config.clone()) {
            Ok(pool) => Ok(pool),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                log::debug!("[tcp] port {} in use, using an ephemeral port", port);
                Self::bind(0, config)
            }
            Err(e) => Err(e),
        }
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn is_open(&self) -> bool {
        self.listener.is_some()
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Outbound + inbound channel count.
    pub fn connection_count(&self) -> usize {
        self.outbound.len() + self.inbound.len()
    }

    pub fn has_channel(&self, endpoint: &Endpoint) -> bool {
        self.outbound.contains_key(endpoint)
    }

    pub fn channel_info(&self) -> Vec<ChannelInfo> {
        self.outbound
            .values()
            .chain(self.inbound.iter())
            .map(|ch| ChannelInfo {
                remote: *ch.remote(),
                direction: ch.direction(),
                state: ch.state(),
                stats: ch.stats().clone(),
            })
            .collect()
    }

    fn attach(&self, channel: &mut ReliableChannel) {
        let inbox = Rc::clone(&self.inbox);
        let from = *channel.remote();
        channel.set_receive_handler(move |bytes| {
            inbox.borrow_mut().push_back(InboundFrame {
                from,
                bytes: bytes.to_vec(),
            });
        });
    }

    /// Ensure an outbound channel to `endpoint` exists (non-blocking).
    pub fn connect(&mut self, endpoint: &Endpoint) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        if self.outbound.contains_key(endpoint) {
            return Ok(());
        }
        let mut channel = ReliableChannel::connect(endpoint, &self.config)?;
        self.attach(&mut channel);
        self.stats.connects_started += 1;
        self.outbound.insert(*endpoint, channel);
        Ok(())
    }

    /// Send one message to `endpoint`, reusing (or opening) its channel.
    ///
    /// On failure the channel is dropped from the pool.
    pub fn send_to(&mut self, endpoint: &Endpoint, payload: &[u8]) -> Result<(), TransportError> {
        self.connect(endpoint)?;
        let result = match self.outbound.get_mut(endpoint) {
            Some(channel) => channel.send(payload),
            None => Err(TransportError::Closed),
        };
        if let Err(TransportError::Unreachable { .. } | TransportError::ConnectionLost(_)) = result
        {
            self.outbound.remove(endpoint);
            self.stats.channels_lost += 1;
        }
        result
    }

    /// Close and forget the outbound channel to `endpoint`.
    pub fn disconnect(&mut self, endpoint: &Endpoint) -> bool {
        match self.outbound.remove(endpoint) {
            Some(mut channel) => {
                channel.close();
                log::debug!("[tcp] disconnected from {}", endpoint);
                true
            }
            None => false,
        }
    }

    /// Accept, flush and receive on every channel.
    ///
    /// Received frames are queued; collect them with
    /// [`take_inbound`](Self::take_inbound).
    pub fn poll(&mut self) -> Vec<PoolEvent> {
        let mut events = Vec::new();
        self.accept_pending(&mut events);

        let mut lost = Vec::new();
        for (endpoint, channel) in self.outbound.iter_mut() {
            if let Err(error) = channel.poll() {
                lost.push((*endpoint, error));
            }
        }
        for (endpoint, error) in lost {
            self.outbound.remove(&endpoint);
            self.stats.channels_lost += 1;
            events.push(PoolEvent::Lost {
                endpoint,
                direction: Direction::Outbound,
                error,
            });
        }

        let stats = &mut self.stats;
        self.inbound.retain_mut(|channel| match channel.poll() {
            Ok(_) => true,
            Err(error) => {
                stats.channels_lost += 1;
                events.push(PoolEvent::Lost {
                    endpoint: *channel.remote(),
                    direction: Direction::Inbound,
                    error,
                });
                false
            }
        });

        events
    }

    fn accept_pending(&mut self, events: &mut Vec<PoolEvent>) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };
        let mut accepted = Vec::new();
        for _ in 0..MAX_ACCEPTS_PER_POLL {
            match listener.accept() {
                Ok((stream, peer)) => accepted.push((stream, peer)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::debug!("[tcp] accept failed: {}", e);
                    break;
                }
            }
        }
        for (stream, peer) in accepted {
            let remote = Endpoint::from(peer);
            let mut channel = ReliableChannel::from_stream(
                Box::new(stream),
                remote,
                Direction::Inbound,
                ChannelState::Connected,
                &self.config,
            );
            self.attach(&mut channel);
            log::debug!("[tcp] accepted connection from {}", remote);
            self.stats.accepted += 1;
            self.inbound.push(channel);
            events.push(PoolEvent::Accepted(remote));
        }
    }

    /// Take every frame received since the last call, in arrival order.
    pub fn take_inbound(&mut self) -> Vec<InboundFrame> {
        self.inbox.borrow_mut().drain(..).collect()
    }

    /// Close every channel and the listener. Idempotent.
    pub fn close_all(&mut self) {
        for channel in self.outbound.values_mut() {
            channel.close();
        }
        for channel in &mut self.inbound {
            channel.close();
        }
        self.outbound.clear();
        self.inbound.clear();
        if self.listener.take().is_some() {
            log::debug!("[tcp] listener on port {} closed", self.local_port);
        }
        self.inbox.borrow_mut().clear();
    }
}

impl Drop for ChannelPool {
    fn drop(&mut self) {
        self.close_all();
    }
}
