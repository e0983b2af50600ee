// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Application-facing API: participant, publishers, subscribers.

mod builder;
pub mod listener;
mod participant;
mod publisher;
mod subscriber;

pub use builder::ParticipantBuilder;
pub use listener::MessageHandler;
pub use participant::{Participant, ParticipantState, ParticipantStats};
pub use publisher::Publisher;
pub use subscriber::Subscriber;
