// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! sensor_pubsub - temperature publisher / subscriber pair
//!
//! Run in two terminals:
//!
//! ```text
//! cargo run -p hdds-lite --example sensor_pubsub -- sub
//! cargo run -p hdds-lite --example sensor_pubsub -- pub --count 20
//! ```
//!
//! `RUST_LOG=debug` shows discovery and channel activity. Discovery settings
//! can be overridden with the `HDDS_LITE_*` environment variables.

use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use hdds_lite::{Error, Participant, Result};

const TOPIC: &str = "sensor/temp";
const TYPE_NAME: &str = "String";

#[derive(Parser, Debug)]
#[command(name = "sensor_pubsub")]
#[command(about = "Publish or print temperature samples")]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    /// Domain ID
    #[arg(short, long, default_value = "0", global = true)]
    domain: u32,

    /// Spin period in milliseconds
    #[arg(long, default_value = "50", global = true)]
    spin_ms: u64,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Publish one sample per second
    Pub {
        /// Samples to send before exiting (0 = forever)
        #[arg(short, long, default_value = "0")]
        count: u32,
    },
    /// Print received samples
    Sub,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let result = match args.mode {
        Mode::Pub { count } => run_publisher(args.domain, args.spin_ms, count),
        Mode::Sub => run_subscriber(args.domain, args.spin_ms),
    };
    if let Err(e) = result {
        eprintln!("sensor_pubsub: {}", e);
        std::process::exit(1);
    }
}

fn run_publisher(domain: u32, spin_ms: u64, count: u32) -> Result<()> {
    let participant = Participant::builder("node_pub")
        .domain_id(domain)
        .with_env_overrides()
        .build()?;
    let publisher = participant.create_publisher(TOPIC, TYPE_NAME)?;
    println!(
        "publishing {} [{}] on domain {} (reliable port {:?})",
        TOPIC,
        TYPE_NAME,
        domain,
        participant.reliable_port()
    );

    let mut sent = 0u32;
    let mut next = Instant::now();
    while count == 0 || sent < count {
        participant.spin_once()?;
        if Instant::now() >= next {
            next += Duration::from_secs(1);
            let reading = 20.0 + f64::from(sent % 50) / 10.0;
            let payload = format!("{:.1}", reading);
            match publisher.publish(payload.as_bytes()) {
                Ok(n) => println!(
                    "seq {} -> {} subscriber(s): {}",
                    publisher.sequence_number(),
                    n,
                    payload
                ),
                Err(Error::Publish {
                    delivered,
                    failures,
                }) => println!(
                    "seq {} partial: {} delivered, {} failed",
                    publisher.sequence_number(),
                    delivered,
                    failures.len()
                ),
                Err(e) => return Err(e),
            }
            sent += 1;
        }
        std::thread::sleep(Duration::from_millis(spin_ms));
    }

    participant.shutdown();
    Ok(())
}

fn run_subscriber(domain: u32, spin_ms: u64) -> Result<()> {
    let participant = Participant::builder("node_sub")
        .domain_id(domain)
        .with_env_overrides()
        .build()?;
    let _subscriber =
        participant.create_subscriber_with_handler(TOPIC, TYPE_NAME, |payload: &[u8]| {
            println!("temp = {}", String::from_utf8_lossy(payload));
        })?;
    println!("waiting for {} [{}] on domain {}", TOPIC, TYPE_NAME, domain);

    loop {
        participant.spin_once()?;
        std::thread::sleep(Duration::from_millis(spin_ms));
    }
}
