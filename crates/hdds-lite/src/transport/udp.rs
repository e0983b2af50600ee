// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP discovery channel.
//!
//! Connectionless, at-most-once, unordered. Owns up to two non-blocking
//! sockets:
//!
//! - a unicast socket bound to the participant's discovery port, used for
//!   every send and for unicast receive;
//! - an optional multicast socket bound (SO_REUSEADDR) to the domain's
//!   shared multicast port and joined to the group.
//!
//! Nothing here blocks: [`DiscoveryChannel::poll`] drains whatever is
//! queued and returns.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use crate::error::TransportError;
use crate::types::Endpoint;

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Upper bound on datagrams handled per socket per `poll()`.
const MAX_DATAGRAMS_PER_POLL: usize = 256;

/// Receive callback: `(datagram, source)`.
pub type DatagramHandler = Box<dyn FnMut(&[u8], &Endpoint)>;

/// Counters for one discovery channel.
#[derive(Clone, Debug, Default)]
pub struct DiscoveryChannelStats {
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub send_failures: u64,
    /// ICMP port-unreachable reports surfaced by the OS on receive.
    pub icmp_errors: u64,
}

/// Best-effort datagram channel used by discovery.
pub struct DiscoveryChannel {
    unicast: Option<UdpSocket>,
    multicast: Option<UdpSocket>,
    multicast_group: Option<Ipv4Addr>,
    local_port: u16,
    handler: Option<DatagramHandler>,
    recv_buf: Vec<u8>,
    stats: DiscoveryChannelStats,
}

impl DiscoveryChannel {
    /// Open the unicast socket on `local_port` (0 = ephemeral).
    ///
    /// No SO_REUSEADDR: a second participant asking for the same port gets
    /// `AddrInUse`, which is how participant indices are claimed.
    pub fn open(local_port: u16) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), local_port);
        socket.bind(&bind_addr.into())?;
        socket.set_nonblocking(true)?;
        socket.set_multicast_loop_v4(true)?;

        let unicast: UdpSocket = socket.into();
        let local_port = unicast.local_addr()?.port();
        log::debug!("[udp] discovery channel bound port={}", local_port);

        Ok(Self {
            unicast: Some(unicast),
            multicast: None,
            multicast_group: None,
            local_port,
            handler: None,
            recv_buf: vec![0u8; MAX_DATAGRAM_SIZE],
            stats: DiscoveryChannelStats::default(),
        })
    }

    /// Additionally listen on `group:port`.
    ///
    /// The port is shared by every participant of the domain on this host,
    /// hence SO_REUSEADDR.
    pub fn join_multicast(&mut self, group: Ipv4Addr, port: u16) -> io::Result<()> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        socket.bind(&bind_addr.into())?;
        socket.set_nonblocking(true)?;
        socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_loop_v4(true)?;

        log::debug!("[udp] joined multicast group={} port={}", group, port);
        self.multicast = Some(socket.into());
        self.multicast_group = Some(group);
        Ok(())
    }

    /// Send one datagram. Failures are reported, never fatal.
    pub fn announce(&mut self, message: &[u8], destination: &Endpoint) -> Result<(), TransportError> {
        let socket = self.unicast.as_ref().ok_or(TransportError::Closed)?;
        match socket.send_to(message, destination.socket_addr()) {
            Ok(_) => {
                self.stats.datagrams_sent += 1;
                Ok(())
            }
            Err(e) => {
                self.stats.send_failures += 1;
                log::debug!("[udp] send to {} failed: {}", destination, e);
                Err(TransportError::Unreachable {
                    endpoint: *destination,
                    kind: e.kind(),
                })
            }
        }
    }

    /// Install the receive callback used by [`poll`](Self::poll).
    pub fn set_receive_handler(&mut self, handler: impl FnMut(&[u8], &Endpoint) + 'static) {
        self.handler = Some(Box::new(handler));
    }

    /// Drain queued datagrams into the receive handler.
    ///
    /// Returns the number of datagrams handed to the handler. Datagrams
    /// received while no handler is installed are discarded.
    pub fn poll(&mut self) -> usize {
        let mut received = 0;
        for socket in [self.unicast.as_ref(), self.multicast.as_ref()]
            .into_iter()
            .flatten()
        {
            received += drain_socket(
                socket,
                &mut self.recv_buf,
                &mut self.handler,
                &mut self.stats,
            );
        }
        received
    }

    /// Close both sockets. Idempotent.
    pub fn close(&mut self) {
        if let (Some(socket), Some(group)) = (self.multicast.as_ref(), self.multicast_group) {
            let _ = socket.leave_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED);
        }
        if self.unicast.take().is_some() {
            log::debug!("[udp] discovery channel closed port={}", self.local_port);
        }
        self.multicast = None;
        self.multicast_group = None;
    }

    pub fn is_open(&self) -> bool {
        self.unicast.is_some()
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn multicast_group(&self) -> Option<Ipv4Addr> {
        self.multicast_group
    }

    pub fn stats(&self) -> &DiscoveryChannelStats {
        &self.stats
    }
}

impl Drop for DiscoveryChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn drain_socket(
    socket: &UdpSocket,
    buf: &mut [u8],
    handler: &mut Option<DatagramHandler>,
    stats: &mut DiscoveryChannelStats,
) -> usize {
    let mut received = 0;
    for _ in 0..MAX_DATAGRAMS_PER_POLL {
        match socket.recv_from(buf) {
            Ok((len, from)) => {
                stats.datagrams_received += 1;
                if let Some(handler) = handler.as_mut() {
                    handler(&buf[..len], &Endpoint::from(from));
                    received += 1;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // Linux reports an earlier send to a closed port on the next
            // receive; Windows does the same with WSAECONNRESET.
            Err(e)
                if e.kind() == io::ErrorKind::ConnectionRefused
                    || e.kind() == io::ErrorKind::ConnectionReset =>
            {
                stats.icmp_errors += 1;
                continue;
            }
            Err(e) => {
                log::debug!("[udp] recv failed: {}", e);
                break;
            }
        }
    }
    received
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::{Duration, Instant};

    fn poll_until(channel: &mut DiscoveryChannel, want: usize) -> usize {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut total = 0;
        while total < want && Instant::now() < deadline {
            total += channel.poll();
            std::thread::sleep(Duration::from_millis(5));
        }
        total
    }

    #[test]
    fn test_unicast_roundtrip() {
        let mut a = DiscoveryChannel::open(0).expect("open a");
        let mut b = DiscoveryChannel::open(0).expect("open b");

        let inbox: Rc<RefCell<Vec<(Vec<u8>, Endpoint)>>> = Rc::default();
        let sink = Rc::clone(&inbox);
        b.set_receive_handler(move |bytes, from| sink.borrow_mut().push((bytes.to_vec(), *from)));

        a.announce(b"hello", &Endpoint::localhost(b.local_port()))
            .expect("send");

        assert_eq!(poll_until(&mut b, 1), 1);
        let inbox = inbox.borrow();
        assert_eq!(inbox[0].0, b"hello");
        assert_eq!(inbox[0].1.port(), a.local_port());
        assert_eq!(a.stats().datagrams_sent, 1);
    }

    #[test]
    fn test_port_in_use() {
        let a = DiscoveryChannel::open(0).expect("open");
        let err = DiscoveryChannel::open(a.local_port()).err().expect("second bind fails");
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
    }

    #[test]
    fn test_send_to_closed_port_is_not_fatal() {
        let mut a = DiscoveryChannel::open(0).expect("open");
        let dead = DiscoveryChannel::open(0).expect("open");
        let dead_port = dead.local_port();
        drop(dead);

        // Either the send itself succeeds (UDP) or reports Unreachable.
        let _ = a.announce(b"ping", &Endpoint::localhost(dead_port));
        let _ = a.announce(b"ping", &Endpoint::localhost(dead_port));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(a.poll(), 0);
        assert!(a.is_open());
    }

    #[test]
    fn test_closed_channel_rejects_send() {
        let mut a = DiscoveryChannel::open(0).expect("open");
        a.close();
        assert!(!a.is_open());
        assert_eq!(
            a.announce(b"x", &Endpoint::localhost(9)),
            Err(TransportError::Closed)
        );
        assert_eq!(a.poll(), 0);
    }
}
