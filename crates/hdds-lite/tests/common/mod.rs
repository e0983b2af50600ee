// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared helpers for the networked integration tests.
//!
//! Every test uses its own domain id so tests running in parallel never
//! see each other's announcements.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use hdds_lite::{DiscoveryConfig, Participant, ParticipantConfig};

pub const ANNOUNCE: Duration = Duration::from_millis(50);
pub const LEASE: Duration = Duration::from_millis(400);
pub const DEADLINE: Duration = Duration::from_secs(5);

pub fn config(lease: Duration) -> ParticipantConfig {
    ParticipantConfig::default().with_discovery(
        DiscoveryConfig::default()
            .with_announce_interval(ANNOUNCE)
            .with_lease_duration(lease),
    )
}

pub fn participant(name: &str, domain_id: u32) -> Participant {
    participant_with_lease(name, domain_id, LEASE)
}

pub fn participant_with_lease(name: &str, domain_id: u32, lease: Duration) -> Participant {
    let participant =
        Participant::new(name, domain_id, config(lease)).expect("valid participant config");
    participant.start().expect("participant start");
    participant
}

/// Spin every participant until `done` holds. Returns false on timeout.
pub fn spin_until(participants: &[&Participant], mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + DEADLINE;
    while Instant::now() < deadline {
        for p in participants {
            p.spin_once().expect("spin");
        }
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Spin for a fixed wall-clock duration.
pub fn spin_for(participants: &[&Participant], duration: Duration) {
    let end = Instant::now() + duration;
    while Instant::now() < end {
        for p in participants {
            p.spin_once().expect("spin");
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Handler that appends every payload, lossily decoded, to a shared list.
pub type Captured = Rc<RefCell<Vec<String>>>;

pub fn capture() -> (Captured, impl FnMut(&[u8]) + 'static) {
    let captured: Captured = Rc::default();
    let sink = Rc::clone(&captured);
    let handler = move |payload: &[u8]| {
        sink.borrow_mut()
            .push(String::from_utf8_lossy(payload).into_owned());
    };
    (captured, handler)
}
