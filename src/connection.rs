//! Per-connection state shared by both roles.
//!
//! A [`Connection`] owns the UDP socket, the peer address, the running
//! sequence/acknowledgement numbers and the connection id.  The
//! [`crate::sender::Sender`] and [`crate::receiver::Receiver`] engines drive
//! it; it knows nothing about either state machine.
//!
//! Inbound filtering happens here so that the engines only ever see packets
//! that belong to their connection:
//! - datagrams shorter than a header are dropped,
//! - once the peer is known, datagrams from other addresses are dropped,
//! - once the connection id is known, packets bearing another id are dropped.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::ConfundoError;
use crate::packet::{flags, Header, Packet};
use crate::seq::SeqSpace;
use crate::socket::{Socket, SocketError};

pub struct Connection {
    socket: Socket,
    /// Remote endpoint; unknown on the receiver until the first SYN.
    pub peer: Option<SocketAddr>,
    /// Next sequence number this side will use.
    pub seq_num: u32,
    /// Next sequence number expected from the peer.
    pub ack_num: u32,
    /// Connection tag; unknown on the receiver until the first SYN.
    pub connection_id: Option<u16>,
    space: SeqSpace,
    last_heard: Instant,
    tag: &'static str,
}

impl Connection {
    /// Wrap a bound socket.  `tag` prefixes every log line (`"send"`, `"recv"`).
    pub fn new(socket: Socket, space: SeqSpace, initial_seq: u32, tag: &'static str) -> Self {
        Self {
            socket,
            peer: None,
            seq_num: space.normalize(initial_seq),
            ack_num: 0,
            connection_id: None,
            space,
            last_heard: Instant::now(),
            tag,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    pub fn space(&self) -> SeqSpace {
        self.space
    }

    /// When the peer was last heard from.
    pub fn last_heard(&self) -> Instant {
        self.last_heard
    }

    /// Restart the idle ceiling, e.g. when a new phase begins.
    pub fn reset_idle(&mut self) {
        self.last_heard = Instant::now();
    }

    /// Advance `seq_num` by `k` units (payload bytes, or 1 for SYN/FIN).
    pub fn advance_seq(&mut self, k: usize) {
        self.seq_num = self.space.advance(self.seq_num, k);
    }

    /// Build a packet stamped with the current `seq_num`, `ack_num` and id.
    pub fn packet(&self, flags: u16, payload: Vec<u8>) -> Packet {
        Packet {
            header: Header {
                seq: self.seq_num,
                ack: self.ack_num,
                connection_id: self.connection_id.unwrap_or(0),
                flags,
            },
            payload,
        }
    }

    /// Send `packet` to the peer.
    pub async fn send_packet(&self, packet: &Packet) -> Result<(), ConfundoError> {
        let peer = self.peer.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotConnected, "peer address not known yet")
        })?;
        self.socket.send_to(packet, peer).await?;
        log::debug!(
            "[{}] → {} seq={} ack={} len={}",
            self.tag,
            flag_names(packet.header.flags),
            packet.header.seq,
            packet.header.ack,
            packet.payload.len()
        );
        Ok(())
    }

    /// Send a payload-less packet carrying `flags`.
    pub async fn send_control(&self, flags: u16) -> Result<Packet, ConfundoError> {
        let pkt = self.packet(flags, Vec::new());
        self.send_packet(&pkt).await?;
        Ok(pkt)
    }

    /// Wait up to `wait` for the next packet that belongs to this connection.
    ///
    /// Returns `Ok(None)` when the wait elapses.  Filtered datagrams do not
    /// extend the wait.
    pub async fn recv(&mut self, wait: Duration) -> Result<Option<(Packet, SocketAddr)>, ConfundoError> {
        self.recv_until(Some(Instant::now() + wait)).await
    }

    /// Like [`recv`](Self::recv) but blocks indefinitely when `deadline` is `None`.
    pub async fn recv_until(
        &mut self,
        deadline: Option<Instant>,
    ) -> Result<Option<(Packet, SocketAddr)>, ConfundoError> {
        loop {
            let received = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    self.socket.recv_timeout(deadline - now).await
                }
                None => self.socket.recv_from().await.map(Some),
            };

            let (pkt, addr) = match received {
                Ok(Some(v)) => v,
                Ok(None) => return Ok(None),
                Err(SocketError::Packet { from, source }) => {
                    log::debug!("[{}] dropping datagram from {from}: {source}", self.tag);
                    continue;
                }
                Err(SocketError::Io(e)) => return Err(e.into()),
            };

            if self.peer.is_some_and(|peer| peer != addr) {
                log::debug!("[{}] ignoring datagram from stranger {addr}", self.tag);
                continue;
            }
            if self
                .connection_id
                .is_some_and(|id| id != pkt.header.connection_id)
            {
                log::debug!(
                    "[{}] ignoring packet for connection {} (ours is {:?})",
                    self.tag,
                    pkt.header.connection_id,
                    self.connection_id
                );
                continue;
            }

            self.last_heard = Instant::now();
            log::debug!(
                "[{}] ← {} seq={} ack={} len={}",
                self.tag,
                flag_names(pkt.header.flags),
                pkt.header.seq,
                pkt.header.ack,
                pkt.payload.len()
            );
            return Ok(Some((pkt, addr)));
        }
    }
}

/// Human-readable flag set for log lines, e.g. `SYN|ACK` or `DATA`.
pub fn flag_names(bits: u16) -> String {
    let names: Vec<&str> = [(flags::SYN, "SYN"), (flags::ACK, "ACK"), (flags::FIN, "FIN")]
        .into_iter()
        .filter(|(bit, _)| bits & bit != 0)
        .map(|(_, name)| name)
        .collect();
    if names.is_empty() {
        "DATA".to_string()
    } else {
        names.join("|")
    }
}
