// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Byte stream abstraction for reliable channels.
//!
//! The [`ByteStream`] trait is the seam between [`ReliableChannel`] and the
//! socket. Production code uses `mio::net::TcpStream` (always non-blocking);
//! tests use [`mock::MockStream`] to script partial writes, would-block,
//! deferred connects and peer resets.
//!
//! [`ReliableChannel`]: super::ReliableChannel

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};

/// Abstraction over a non-blocking byte-oriented stream.
pub trait ByteStream: Read + Write {
    /// Shutdown the stream.
    fn shutdown(&mut self, how: Shutdown) -> io::Result<()>;

    /// Peer address; fails with `NotConnected` while a connect is pending.
    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Set TCP_NODELAY (disable Nagle's algorithm).
    fn set_nodelay(&self, nodelay: bool) -> io::Result<()>;

    /// Take the pending socket error (e.g. the outcome of a failed connect).
    fn take_error(&self) -> io::Result<Option<io::Error>>;
}

// ============================================================================
// mio TcpStream implementation
// ============================================================================

impl ByteStream for mio::net::TcpStream {
    fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        mio::net::TcpStream::shutdown(self, how)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        mio::net::TcpStream::peer_addr(self)
    }

    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        mio::net::TcpStream::set_nodelay(self, nodelay)
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        mio::net::TcpStream::take_error(self)
    }
}

// ============================================================================
// Test mock stream
// ============================================================================

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Debug)]
    struct MockState {
        read_data: VecDeque<u8>,
        written: Vec<u8>,
        connected: bool,
        /// Peer closed: reads return 0 once `read_data` is drained.
        eof: bool,
        /// Max bytes accepted per write call.
        write_limit: Option<usize>,
        /// Writes return WouldBlock.
        write_blocked: bool,
        read_error: Option<io::ErrorKind>,
        write_error: Option<io::ErrorKind>,
        connect_error: Option<io::ErrorKind>,
        shutdown: bool,
        peer_addr: SocketAddr,
    }

    /// Scriptable in-memory stream.
    ///
    /// Clones share state, so a test keeps one clone as a handle while the
    /// channel owns the other.
    #[derive(Debug, Clone)]
    pub struct MockStream {
        state: Rc<RefCell<MockState>>,
    }

    impl MockStream {
        /// A connected stream.
        pub fn new() -> Self {
            Self {
                state: Rc::new(RefCell::new(MockState {
                    read_data: VecDeque::new(),
                    written: Vec::new(),
                    connected: true,
                    eof: false,
                    write_limit: None,
                    write_blocked: false,
                    read_error: None,
                    write_error: None,
                    connect_error: None,
                    shutdown: false,
                    peer_addr: "127.0.0.1:54321".parse().unwrap(),
                })),
            }
        }

        /// A stream whose connect has not completed yet.
        pub fn connecting() -> Self {
            let stream = Self::new();
            stream.state.borrow_mut().connected = false;
            stream
        }

        pub fn complete_connect(&self) {
            self.state.borrow_mut().connected = true;
        }

        /// Fail the pending connect with `kind`.
        pub fn refuse_connect(&self, kind: io::ErrorKind) {
            self.state.borrow_mut().connect_error = Some(kind);
        }

        pub fn feed_read_data(&self, data: &[u8]) {
            self.state.borrow_mut().read_data.extend(data);
        }

        pub fn written(&self) -> Vec<u8> {
            self.state.borrow().written.clone()
        }

        pub fn set_write_limit(&self, limit: Option<usize>) {
            self.state.borrow_mut().write_limit = limit;
        }

        pub fn block_writes(&self, blocked: bool) {
            self.state.borrow_mut().write_blocked = blocked;
        }

        pub fn inject_read_error(&self, kind: io::ErrorKind) {
            self.state.borrow_mut().read_error = Some(kind);
        }

        pub fn inject_write_error(&self, kind: io::ErrorKind) {
            self.state.borrow_mut().write_error = Some(kind);
        }

        /// Peer closed its side.
        pub fn close_remote(&self) {
            self.state.borrow_mut().eof = true;
        }

        pub fn is_shutdown(&self) -> bool {
            self.state.borrow().shutdown
        }
    }

    impl Default for MockStream {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut state = self.state.borrow_mut();
            if let Some(kind) = state.read_error.take() {
                return Err(io::Error::from(kind));
            }
            if !state.connected {
                return Err(io::Error::from(io::ErrorKind::NotConnected));
            }
            if state.read_data.is_empty() {
                return if state.eof {
                    Ok(0)
                } else {
                    Err(io::Error::from(io::ErrorKind::WouldBlock))
                };
            }
            let n = buf.len().min(state.read_data.len());
            for (slot, byte) in buf.iter_mut().zip(state.read_data.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut state = self.state.borrow_mut();
            if let Some(kind) = state.write_error.take() {
                return Err(io::Error::from(kind));
            }
            if !state.connected {
                return Err(io::Error::from(io::ErrorKind::NotConnected));
            }
            if state.write_blocked {
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            let n = state.write_limit.map_or(buf.len(), |l| l.min(buf.len()));
            state.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl ByteStream for MockStream {
        fn shutdown(&mut self, _how: Shutdown) -> io::Result<()> {
            let mut state = self.state.borrow_mut();
            state.shutdown = true;
            state.connected = false;
            Ok(())
        }

        fn peer_addr(&self) -> io::Result<SocketAddr> {
            let state = self.state.borrow();
            if state.connected {
                Ok(state.peer_addr)
            } else {
                Err(io::Error::from(io::ErrorKind::NotConnected))
            }
        }

        fn set_nodelay(&self, _nodelay: bool) -> io::Result<()> {
            Ok(())
        }

        fn take_error(&self) -> io::Result<Option<io::Error>> {
            Ok(self
                .state
                .borrow_mut()
                .connect_error
                .take()
                .map(io::Error::from))
        }
    }

    #[test]
    fn test_mock_partial_write() {
        let mut stream = MockStream::new();
        stream.set_write_limit(Some(3));
        assert_eq!(stream.write(b"hello").unwrap(), 3);
        assert_eq!(stream.written(), b"hel");
    }

    #[test]
    fn test_mock_read_would_block_then_eof() {
        let mut stream = MockStream::new();
        let mut buf = [0u8; 4];
        assert_eq!(
            stream.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
        stream.close_remote();
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }
}
