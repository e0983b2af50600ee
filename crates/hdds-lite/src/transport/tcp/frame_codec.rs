// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Length-prefix framing for reliable channels.
//!
//! TCP carries a byte stream; each encoded envelope travels as one frame:
//!
//! ```text
//! +----------------+-------------------+
//! | Length (4B BE) | Envelope bytes    |
//! +----------------+-------------------+
//! ```
//!
//! The decoder is incremental: it keeps partial header/body state across
//! `WouldBlock` so a frame split over many reads is reassembled in order.

use std::io::{self, Read};

/// Frame header size (4 bytes for length).
pub const FRAME_HEADER_SIZE: usize = 4;

/// Length-prefix frame codec.
#[derive(Debug)]
pub struct FrameCodec {
    state: ReadState,
    buffer: Vec<u8>,
    /// Anti-OOM limit on the declared length.
    max_size: usize,
    frames_decoded: u64,
    bytes_decoded: u64,
    frames_rejected: u64,
}

/// Internal state for incremental reading.
#[derive(Debug, Clone, Copy)]
enum ReadState {
    ReadingLength {
        bytes_read: usize,
    },
    ReadingBody {
        expected_len: usize,
        bytes_read: usize,
    },
}

impl Default for ReadState {
    fn default() -> Self {
        ReadState::ReadingLength { bytes_read: 0 }
    }
}

impl FrameCodec {
    pub fn new(max_size: usize) -> Self {
        Self {
            state: ReadState::default(),
            buffer: vec![0u8; FRAME_HEADER_SIZE],
            max_size,
            frames_decoded: 0,
            bytes_decoded: 0,
            frames_rejected: 0,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn bytes_decoded(&self) -> u64 {
        self.bytes_decoded
    }

    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected
    }

    /// Drop any partial frame.
    pub fn reset(&mut self) {
        self.state = ReadState::default();
        self.buffer.resize(FRAME_HEADER_SIZE, 0);
    }

    /// `[length: u32 BE][payload]`.
    ///
    /// Callers check `payload.len()` against the frame limit first.
    pub fn encode(payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    /// Try to decode one complete frame.
    ///
    /// - `Ok(Some(frame))`: a frame was decoded
    /// - `Ok(None)`: need more data (WouldBlock), partial state kept
    /// - `Err(UnexpectedEof)`: peer closed the stream
    /// - `Err(InvalidData)`: declared length exceeds the limit
    pub fn decode<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<Option<Vec<u8>>> {
        loop {
            match self.state {
                ReadState::ReadingLength { bytes_read } => {
                    match reader.read(&mut self.buffer[bytes_read..FRAME_HEADER_SIZE]) {
                        Ok(0) => {
                            let msg = if bytes_read == 0 {
                                "connection closed"
                            } else {
                                "incomplete frame header"
                            };
                            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, msg));
                        }
                        Ok(n) => {
                            let total = bytes_read + n;
                            if total < FRAME_HEADER_SIZE {
                                self.state = ReadState::ReadingLength { bytes_read: total };
                                continue;
                            }

                            let len = u32::from_be_bytes([
                                self.buffer[0],
                                self.buffer[1],
                                self.buffer[2],
                                self.buffer[3],
                            ]) as usize;

                            if len > self.max_size {
                                self.frames_rejected += 1;
                                self.state = ReadState::default();
                                return Err(io::Error::new(
                                    io::ErrorKind::InvalidData,
                                    format!("frame too large: {} bytes (max {})", len, self.max_size),
                                ));
                            }

                            if len == 0 {
                                self.frames_decoded += 1;
                                self.state = ReadState::default();
                                return Ok(Some(Vec::new()));
                            }

                            self.buffer.resize(len, 0);
                            self.state = ReadState::ReadingBody {
                                expected_len: len,
                                bytes_read: 0,
                            };
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    }
                }

                ReadState::ReadingBody {
                    expected_len,
                    bytes_read,
                } => match reader.read(&mut self.buffer[bytes_read..expected_len]) {
                    Ok(0) => {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "incomplete frame body",
                        ));
                    }
                    Ok(n) => {
                        let total = bytes_read + n;
                        if total < expected_len {
                            self.state = ReadState::ReadingBody {
                                expected_len,
                                bytes_read: total,
                            };
                            continue;
                        }

                        let frame = self.buffer[..expected_len].to_vec();
                        self.frames_decoded += 1;
                        self.bytes_decoded += expected_len as u64;
                        self.buffer.resize(FRAME_HEADER_SIZE, 0);
                        self.state = ReadState::default();
                        return Ok(Some(frame));
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                },
            }
        }
    }

    /// True while a frame is half read.
    pub fn is_partial(&self) -> bool {
        match self.state {
            ReadState::ReadingLength { bytes_read } => bytes_read > 0,
            ReadState::ReadingBody { .. } => true,
        }
    }
}
