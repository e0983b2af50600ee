// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable transport over TCP.
//!
//! ```text
//! +-------------------------------------------------------------+
//! |                        ChannelPool                           |
//! |  listener + BTreeMap<Endpoint, ReliableChannel> + inbox      |
//! |                              |                               |
//! |  +---------------------------v---------------------------+  |
//! |  |                    ReliableChannel                     |  |
//! |  |  +-------------+ +-------------+ +-----------------+  |  |
//! |  |  | ByteStream  | | FrameCodec  | |  ChannelState   |  |  |
//! |  |  +-------------+ +-------------+ +-----------------+  |  |
//! |  +-------------------------------------------------------+  |
//! +-------------------------------------------------------------+
//! ```
//!
//! There is no I/O thread: channels make progress only when polled.

pub mod byte_stream;
pub mod channel;
pub mod frame_codec;
pub mod pool;

pub use byte_stream::ByteStream;
pub use channel::{ChannelState, ChannelStats, Direction, FlushResult, ReliableChannel};
pub use frame_codec::{FrameCodec, FRAME_HEADER_SIZE};
pub use pool::{ChannelInfo, ChannelPool, InboundFrame, PoolEvent, PoolStats};
