// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable point-to-point channel.
//!
//! Wraps a [`ByteStream`] with a frame codec, an ordered send queue and a
//! small state machine:
//!
//! ```text
//!      +----------+  connect() (non-blocking)
//!      |Connecting|--(refused / timeout)--> Closed
//!      +----+-----+
//!           | peer_addr() succeeds
//!           v
//!      +----------+
//!      |Connected |--(error / EOF / close())--> Closed
//!      +----------+
//! ```
//!
//! `send()` frames the payload, appends it to the queue and writes as much
//! as the socket accepts. A partial write keeps `(frame, offset)` aside;
//! the remainder goes out on later `send()`/`poll()` calls before any newer
//! frame, so per-connection order is preserved.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::net::Shutdown;
use std::time::{Duration, Instant};

use super::byte_stream::ByteStream;
use super::frame_codec::{FrameCodec, FRAME_HEADER_SIZE};
use crate::config::ReliableConfig;
use crate::error::TransportError;
use crate::types::Endpoint;

// ============================================================================
// Channel State
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Non-blocking connect in progress; sends are queued.
    Connecting,
    Connected,
    /// Terminal.
    Closed,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChannelState::Connecting => "Connecting",
            ChannelState::Connected => "Connected",
            ChannelState::Closed => "Closed",
        };
        write!(f, "{}", s)
    }
}

/// Who opened the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Result of a flush operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushResult {
    /// All queued data was sent.
    Complete,
    /// Socket buffer full; the rest stays queued.
    WouldBlock,
    /// Nothing to send (or not connected yet).
    Empty,
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct ChannelStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    /// Including framing.
    pub bytes_sent: u64,
    /// Including framing.
    pub bytes_received: u64,
    pub send_queue_depth: usize,
    pub send_queue_bytes: usize,
    /// Backpressure events.
    pub partial_sends: u64,
    pub last_send_time: Option<Instant>,
    pub last_recv_time: Option<Instant>,
}

/// Receive callback: one call per complete frame.
pub type FrameHandler = Box<dyn FnMut(&[u8])>;

// ============================================================================
// ReliableChannel
// ============================================================================

/// One connection to one remote endpoint.
pub struct ReliableChannel {
    stream: Box<dyn ByteStream>,
    codec: FrameCodec,
    remote: Endpoint,
    direction: Direction,
    state: ChannelState,
    /// Framed messages not yet handed to the socket.
    send_queue: VecDeque<Vec<u8>>,
    /// Partially written frame (buf, offset).
    pending_send: Option<(Vec<u8>, usize)>,
    handler: Option<FrameHandler>,
    stats: ChannelStats,
    state_changed_at: Instant,
    connect_timeout: Duration,
}

impl ReliableChannel {
    /// Start a non-blocking connect to `endpoint`.
    ///
    /// Returns immediately in `Connecting`; completion is detected by
    /// `send()`/`poll()`. An immediate refusal is reported as `Unreachable`.
    pub fn connect(endpoint: &Endpoint, config: &ReliableConfig) -> Result<Self, TransportError> {
        let stream = mio::net::TcpStream::connect(endpoint.socket_addr()).map_err(|e| {
            TransportError::Unreachable {
                endpoint: *endpoint,
                kind: e.kind(),
            }
        })?;
        log::debug!("[tcp] connecting to {}", endpoint);
        Ok(Self::from_stream(
            Box::new(stream),
            *endpoint,
            Direction::Outbound,
            ChannelState::Connecting,
            config,
        ))
    }

    /// Wrap an already connected stream (accepted or test).
    pub fn from_stream(
        stream: Box<dyn ByteStream>,
        remote: Endpoint,
        direction: Direction,
        state: ChannelState,
        config: &ReliableConfig,
    ) -> Self {
        if config.nodelay {
            // May fail while the connect is in flight; retried on connect.
            let _ = stream.set_nodelay(true);
        }
        Self {
            stream,
            codec: FrameCodec::new(config.max_message_size),
            remote,
            direction,
            state,
            send_queue: VecDeque::new(),
            pending_send: None,
            handler: None,
            stats: ChannelStats::default(),
            state_changed_at: Instant::now(),
            connect_timeout: config.connect_timeout,
        }
    }

    // ========================================================================
    // Getters
    // ========================================================================

    pub fn remote(&self) -> &Endpoint {
        &self.remote
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ChannelState::Connected
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    /// True when nothing is queued or half written.
    pub fn send_queue_is_empty(&self) -> bool {
        self.send_queue.is_empty() && self.pending_send.is_none()
    }

    pub fn set_receive_handler(&mut self, handler: impl FnMut(&[u8]) + 'static) {
        self.handler = Some(Box::new(handler));
    }

    // ========================================================================
    // State transitions
    // ========================================================================

    fn set_state(&mut self, new_state: ChannelState) {
        if self.state != new_state {
            log::debug!("[tcp] {} {} -> {}", self.remote, self.state, new_state);
            self.state = new_state;
            self.state_changed_at = Instant::now();
        }
    }

    /// Close the connection and drop anything still queued. Idempotent.
    pub fn close(&mut self) {
        if self.state != ChannelState::Closed {
            let _ = self.stream.shutdown(Shutdown::Both);
            self.send_queue.clear();
            self.pending_send = None;
            self.stats.send_queue_depth = 0;
            self.stats.send_queue_bytes = 0;
            self.set_state(ChannelState::Closed);
        }
    }

    /// Close and build the error for a lost connection.
    fn fail(&mut self, err: &io::Error) -> TransportError {
        let was_connecting = self.state == ChannelState::Connecting;
        self.close();
        if was_connecting {
            TransportError::Unreachable {
                endpoint: self.remote,
                kind: err.kind(),
            }
        } else {
            log::warn!("[tcp] connection to {} lost: {}", self.remote, err);
            TransportError::ConnectionLost(self.remote)
        }
    }

    fn closed_error(&self) -> TransportError {
        TransportError::ConnectionLost(self.remote)
    }

    /// Advance a pending connect. `Ok(true)` once connected.
    fn check_connected(&mut self) -> Result<bool, TransportError> {
        if self.state != ChannelState::Connecting {
            return Ok(self.state == ChannelState::Connected);
        }
        match self.stream.take_error() {
            Ok(Some(err)) | Err(err) => return Err(self.fail(&err)),
            Ok(None) => {}
        }
        match self.stream.peer_addr() {
            Ok(_) => {
                self.set_state(ChannelState::Connected);
                Ok(true)
            }
            Err(e)
                if e.kind() == io::ErrorKind::NotConnected
                    || e.kind() == io::ErrorKind::WouldBlock =>
            {
                if self.state_changed_at.elapsed() >= self.connect_timeout {
                    let timeout = io::Error::from(io::ErrorKind::TimedOut);
                    return Err(self.fail(&timeout));
                }
                Ok(false)
            }
            Err(e) => Err(self.fail(&e)),
        }
    }

    // ========================================================================
    // Send
    // ========================================================================

    /// Queue one message and write as much as the socket takes now.
    ///
    /// `Ok(())` means the frame is on the wire or queued behind earlier
    /// frames; it goes out on later calls. Errors close the channel.
    pub fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if self.state == ChannelState::Closed {
            return Err(self.closed_error());
        }
        if payload.len() > self.codec.max_size() {
            return Err(TransportError::FrameTooLarge {
                size: payload.len(),
                max: self.codec.max_size(),
            });
        }

        let frame = FrameCodec::encode(payload);
        self.stats.send_queue_bytes += frame.len();
        self.send_queue.push_back(frame);
        self.stats.send_queue_depth = self.send_queue.len();

        if self.check_connected()? {
            self.flush()?;
        }
        Ok(())
    }

    /// Write queued frames until done or the socket would block.
    pub fn flush(&mut self) -> Result<FlushResult, TransportError> {
        if self.state != ChannelState::Connected {
            return Ok(FlushResult::Empty);
        }
        if self.send_queue_is_empty() {
            return Ok(FlushResult::Empty);
        }

        loop {
            let (buf, offset) = match self.pending_send.take() {
                Some(pending) => pending,
                None => match self.send_queue.pop_front() {
                    Some(frame) => {
                        self.stats.send_queue_depth = self.send_queue.len();
                        self.stats.send_queue_bytes =
                            self.stats.send_queue_bytes.saturating_sub(frame.len());
                        (frame, 0)
                    }
                    None => break,
                },
            };

            match self.stream.write(&buf[offset..]) {
                Ok(0) => {
                    let err = io::Error::new(io::ErrorKind::WriteZero, "connection closed");
                    return Err(self.fail(&err));
                }
                Ok(n) if offset + n >= buf.len() => {
                    self.stats.bytes_sent += n as u64;
                    self.stats.messages_sent += 1;
                    self.stats.last_send_time = Some(Instant::now());
                }
                Ok(n) => {
                    self.stats.bytes_sent += n as u64;
                    self.stats.partial_sends += 1;
                    self.pending_send = Some((buf, offset + n));
                    return Ok(FlushResult::WouldBlock);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.pending_send = Some((buf, offset));
                    return Ok(FlushResult::WouldBlock);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    self.pending_send = Some((buf, offset));
                }
                Err(e) => return Err(self.fail(&e)),
            }
        }

        let _ = self.stream.flush();
        Ok(FlushResult::Complete)
    }

    // ========================================================================
    // Poll
    // ========================================================================

    /// Make progress: finish a pending connect, flush queued frames and
    /// hand every complete inbound frame to the receive handler.
    ///
    /// Returns the number of frames received. Connection loss (including
    /// an orderly close by the peer) closes the channel and is returned as
    /// an error.
    pub fn poll(&mut self) -> Result<usize, TransportError> {
        if self.state == ChannelState::Closed {
            return Err(self.closed_error());
        }
        if !self.check_connected()? {
            return Ok(0);
        }
        self.flush()?;

        let mut received = 0;
        loop {
            match self.codec.decode(&mut *self.stream) {
                Ok(Some(frame)) => {
                    received += 1;
                    self.stats.messages_received += 1;
                    self.stats.bytes_received += (FRAME_HEADER_SIZE + frame.len()) as u64;
                    self.stats.last_recv_time = Some(Instant::now());
                    match self.handler.as_mut() {
                        Some(handler) => handler(&frame),
                        None => log::debug!(
                            "[tcp] {} dropping frame ({} bytes): no handler",
                            self.remote,
                            frame.len()
                        ),
                    }
                }
                Ok(None) => break,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    log::debug!("[tcp] {} closed by peer", self.remote);
                    self.close();
                    return Err(TransportError::ConnectionLost(self.remote));
                }
                Err(e) => return Err(self.fail(&e)),
            }
        }
        Ok(received)
    }
}

impl Drop for ReliableChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ReliableChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliableChannel")
            .field("remote", &self.remote)
            .field("direction", &self.direction)
            .field("state", &self.state)
            .field("send_queue_len", &self.send_queue.len())
            .field("messages_sent", &self.stats.messages_sent)
            .field("messages_received", &self.stats.messages_received)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tcp::byte_stream::mock::MockStream;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn make_config() -> ReliableConfig {
        ReliableConfig {
            max_message_size: 1024,
            ..ReliableConfig::default()
        }
    }

    fn channel(stream: &MockStream, state: ChannelState) -> ReliableChannel {
        ReliableChannel::from_stream(
            Box::new(stream.clone()),
            Endpoint::localhost(7411),
            Direction::Outbound,
            state,
            &make_config(),
        )
    }

    fn frames(mut bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut codec = FrameCodec::new(1 << 20);
        while let Ok(Some(frame)) = codec.decode(&mut bytes) {
            out.push(frame);
        }
        out
    }

    #[test]
    fn test_send_writes_immediately() {
        let stream = MockStream::new();
        let mut ch = channel(&stream, ChannelState::Connected);

        ch.send(b"test message").unwrap();

        assert!(ch.send_queue_is_empty());
        assert_eq!(frames(&stream.written()), vec![b"test message".to_vec()]);
        assert_eq!(ch.stats().messages_sent, 1);
    }

    #[test]
    fn test_partial_write_keeps_order() {
        let stream = MockStream::new();
        let mut ch = channel(&stream, ChannelState::Connected);
        stream.set_write_limit(Some(3));

        ch.send(b"first").unwrap();
        ch.send(b"second").unwrap();
        assert!(!ch.send_queue_is_empty());
        assert!(ch.stats().partial_sends >= 1);

        // Drain through poll with unlimited writes.
        stream.set_write_limit(None);
        ch.poll().unwrap();
        assert!(ch.send_queue_is_empty());
        assert_eq!(
            frames(&stream.written()),
            vec![b"first".to_vec(), b"second".to_vec()]
        );
        assert_eq!(ch.stats().messages_sent, 2);
    }

    #[test]
    fn test_would_block_queues_until_poll() {
        let stream = MockStream::new();
        let mut ch = channel(&stream, ChannelState::Connected);
        stream.block_writes(true);

        ch.send(b"a").unwrap();
        ch.send(b"b").unwrap();
        assert!(stream.written().is_empty());
        assert_eq!(ch.flush().unwrap(), FlushResult::WouldBlock);

        stream.block_writes(false);
        assert_eq!(ch.poll().unwrap(), 0);
        assert_eq!(frames(&stream.written()), vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_connecting_then_connected() {
        let stream = MockStream::connecting();
        let mut ch = channel(&stream, ChannelState::Connecting);

        ch.send(b"queued early").unwrap();
        assert_eq!(ch.state(), ChannelState::Connecting);
        assert!(stream.written().is_empty());

        stream.complete_connect();
        ch.poll().unwrap();
        assert_eq!(ch.state(), ChannelState::Connected);
        assert_eq!(frames(&stream.written()), vec![b"queued early".to_vec()]);
    }

    #[test]
    fn test_connect_refused_is_unreachable() {
        let stream = MockStream::connecting();
        let mut ch = channel(&stream, ChannelState::Connecting);
        stream.refuse_connect(io::ErrorKind::ConnectionRefused);

        let err = ch.poll().unwrap_err();
        assert_eq!(
            err,
            TransportError::Unreachable {
                endpoint: Endpoint::localhost(7411),
                kind: io::ErrorKind::ConnectionRefused,
            }
        );
        assert_eq!(ch.state(), ChannelState::Closed);
    }

    #[test]
    fn test_connect_timeout() {
        let stream = MockStream::connecting();
        let config = make_config().with_connect_timeout(Duration::from_millis(1));
        let mut ch = ReliableChannel::from_stream(
            Box::new(stream.clone()),
            Endpoint::localhost(7411),
            Direction::Outbound,
            ChannelState::Connecting,
            &config,
        );
        std::thread::sleep(Duration::from_millis(5));

        assert!(matches!(
            ch.poll(),
            Err(TransportError::Unreachable {
                kind: io::ErrorKind::TimedOut,
                ..
            })
        ));
    }

    #[test]
    fn test_receive_dispatches_frames() {
        let stream = MockStream::new();
        let mut ch = channel(&stream, ChannelState::Connected);
        let got: Rc<RefCell<Vec<Vec<u8>>>> = Rc::default();
        let sink = Rc::clone(&got);
        ch.set_receive_handler(move |frame| sink.borrow_mut().push(frame.to_vec()));

        let mut wire = FrameCodec::encode(b"one");
        wire.extend(FrameCodec::encode(b"two"));
        stream.feed_read_data(&wire[..5]);
        assert_eq!(ch.poll().unwrap(), 0);
        stream.feed_read_data(&wire[5..]);
        assert_eq!(ch.poll().unwrap(), 2);

        assert_eq!(*got.borrow(), vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(ch.stats().messages_received, 2);
    }

    #[test]
    fn test_peer_close_reports_connection_lost() {
        let stream = MockStream::new();
        let mut ch = channel(&stream, ChannelState::Connected);
        stream.close_remote();

        assert_eq!(
            ch.poll(),
            Err(TransportError::ConnectionLost(Endpoint::localhost(7411)))
        );
        assert_eq!(ch.state(), ChannelState::Closed);
        // Closed channels keep reporting the loss.
        assert!(ch.send(b"late").is_err());
    }

    #[test]
    fn test_write_error_closes_channel() {
        let stream = MockStream::new();
        let mut ch = channel(&stream, ChannelState::Connected);
        stream.inject_write_error(io::ErrorKind::BrokenPipe);

        assert_eq!(
            ch.send(b"x"),
            Err(TransportError::ConnectionLost(Endpoint::localhost(7411)))
        );
        assert_eq!(ch.state(), ChannelState::Closed);
        assert!(ch.send_queue_is_empty());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let stream = MockStream::new();
        let mut ch = channel(&stream, ChannelState::Connected);
        let big = vec![0u8; 2048];
        assert_eq!(
            ch.send(&big),
            Err(TransportError::FrameTooLarge {
                size: 2048,
                max: 1024
            })
        );
        assert!(ch.is_connected());
    }

    #[test]
    fn test_close_shuts_down_stream() {
        let stream = MockStream::new();
        let mut ch = channel(&stream, ChannelState::Connected);
        ch.close();
        ch.close();
        assert!(stream.is_shutdown());
        assert_eq!(ch.state().to_string(), "Closed");
    }
}
