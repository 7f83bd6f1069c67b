//! Fault-injecting UDP relay for deterministic testing.
//!
//! Real networks drop and duplicate packets.  To exercise the reliability
//! mechanisms without depending on actual network conditions, a [`Relay`]
//! sits between a sender and a receiver: the sender is pointed at the relay's
//! address, and the relay forwards every datagram to the other side unless
//! its [`FaultPlan`] says otherwise.
//!
//! | Fault            | Description                                        |
//! |------------------|----------------------------------------------------|
//! | Targeted drop    | Drop the n-th datagram matching a [`DropRule`].    |
//! | Random loss      | Drop any datagram with probability `loss_rate`.    |
//! | Duplication      | Deliver a datagram twice with `duplicate_rate`.    |
//!
//! Random faults come from a seeded RNG so failures are reproducible.  Every
//! datagram the relay sees is recorded in a [`Trace`], dropped or not.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;

use crate::packet::{flags, Packet};
use crate::socket::{Socket, SocketError};

/// Which way a datagram travels through the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sender → receiver.
    Forward,
    /// Receiver → sender.
    Backward,
}

/// Which packets a [`DropRule`] counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matcher {
    /// Packets whose flags are exactly this value.
    Flags(u16),
    /// Packets that carry a payload.
    Data,
    /// Everything.
    Any,
}

impl Matcher {
    fn matches(&self, pkt: &Packet) -> bool {
        match *self {
            Matcher::Flags(f) => pkt.header.flags == f,
            Matcher::Data => !pkt.payload.is_empty(),
            Matcher::Any => true,
        }
    }
}

/// Drop the `nth` (1-based) packet travelling in `direction` that matches.
/// `nth == 0` drops every match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropRule {
    pub direction: Direction,
    pub matcher: Matcher,
    pub nth: usize,
}

impl DropRule {
    /// Drop the first ACK (without SYN/FIN) the receiver sends back.
    pub fn first_ack() -> Self {
        Self {
            direction: Direction::Backward,
            matcher: Matcher::Flags(flags::ACK),
            nth: 1,
        }
    }

    /// Drop every packet travelling in `direction` that matches.
    pub fn every(direction: Direction, matcher: Matcher) -> Self {
        Self {
            direction,
            matcher,
            nth: 0,
        }
    }
}

/// Configuration for the fault-injection model.
///
/// Probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct FaultPlan {
    pub rules: Vec<DropRule>,
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a forwarded datagram is delivered twice.
    pub duplicate_rate: f64,
    pub seed: u64,
}

impl Default for FaultPlan {
    fn default() -> Self {
        // No faults by default: the relay is a transparent pass-through.
        Self {
            rules: Vec::new(),
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            seed: 0,
        }
    }
}

impl FaultPlan {
    pub fn with_drop(mut self, rule: DropRule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// One datagram seen by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub direction: Direction,
    pub packet: Packet,
    pub dropped: bool,
}

/// Shared, append-only record of relay traffic.
#[derive(Debug, Clone, Default)]
pub struct Trace(Arc<Mutex<Vec<TraceEntry>>>);

impl Trace {
    fn push(&self, entry: TraceEntry) {
        lock(&self.0).push(entry);
    }

    /// Snapshot of everything recorded so far.
    pub fn entries(&self) -> Vec<TraceEntry> {
        lock(&self.0).clone()
    }

    /// Packets sent in `direction` (including dropped ones) matching `matcher`.
    pub fn count(&self, direction: Direction, matcher: Matcher) -> usize {
        lock(&self.0)
            .iter()
            .filter(|e| e.direction == direction && matcher.matches(&e.packet))
            .count()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking test thread must not hide the trace from the others.
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A running relay.  Dropping it stops forwarding.
pub struct Relay {
    /// Address the sender should connect to.
    pub local_addr: SocketAddr,
    trace: Trace,
    handle: JoinHandle<()>,
}

impl Relay {
    /// Bind on loopback and forward to `server`.
    pub async fn start(server: SocketAddr, plan: FaultPlan) -> Result<Self, SocketError> {
        let socket = Socket::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let local_addr = socket.local_addr;
        let trace = Trace::default();
        let handle = tokio::spawn(forward(socket, server, plan, trace.clone()));
        log::debug!("[relay] {local_addr} → {server}");
        Ok(Self {
            local_addr,
            trace,
            handle,
        })
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn forward(socket: Socket, server: SocketAddr, plan: FaultPlan, trace: Trace) {
    let mut rng = StdRng::seed_from_u64(plan.seed);
    let mut client: Option<SocketAddr> = None;
    let mut seen = vec![0usize; plan.rules.len()];

    loop {
        let (bytes, from) = match socket.recv_raw().await {
            Ok(v) => v,
            Err(e) => {
                log::warn!("[relay] stopping: {e}");
                return;
            }
        };

        let (direction, dest) = if from == server {
            match client {
                Some(c) => (Direction::Backward, c),
                None => continue,
            }
        } else {
            client = Some(from);
            (Direction::Forward, server)
        };

        // Undecodable datagrams pass through untouched and unrecorded.
        let Ok(packet) = Packet::decode(&bytes) else {
            let _ = socket.send_raw(&bytes, dest).await;
            continue;
        };

        let mut dropped = false;
        for (rule, count) in plan.rules.iter().zip(seen.iter_mut()) {
            if rule.direction == direction && rule.matcher.matches(&packet) {
                *count += 1;
                if rule.nth == 0 || *count == rule.nth {
                    dropped = true;
                }
            }
        }
        if !dropped && plan.loss_rate > 0.0 && rng.gen_bool(plan.loss_rate) {
            dropped = true;
        }

        log::debug!(
            "[relay] {direction:?} seq={} ack={} flags={:#x} len={}{}",
            packet.header.seq,
            packet.header.ack,
            packet.header.flags,
            packet.payload.len(),
            if dropped { " DROPPED" } else { "" }
        );
        trace.push(TraceEntry {
            direction,
            packet,
            dropped,
        });
        if dropped {
            continue;
        }

        let _ = socket.send_raw(&bytes, dest).await;
        if plan.duplicate_rate > 0.0 && rng.gen_bool(plan.duplicate_rate) {
            let _ = socket.send_raw(&bytes, dest).await;
        }
    }
}
