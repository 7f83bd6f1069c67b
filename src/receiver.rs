//! Receiver engine (connection responder).
//!
//! [`Receiver`] answers the handshake, writes in-order payloads to a byte
//! sink and cumulatively acknowledges everything it sees, then performs the
//! responder's half of the teardown.
//!
//! - Only **in-order** packets are accepted (`seq == ack_num`).
//! - Out-of-order or duplicate packets are answered with the unchanged
//!   `ack_num` and nothing is written.
//! - A FIN ends the data phase; the receiver acknowledges it, sends its own
//!   FIN and lingers for `close_wait` so that a retransmitted FIN (its ACK was
//!   lost) can be answered again.
//!
//! The acceptance rule itself lives in [`InOrderCursor`], which has no I/O.

use std::net::SocketAddr;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use crate::config::Config;
use crate::connection::{flag_names, Connection};
use crate::error::{ConfundoError, Phase};
use crate::packet::flags;
use crate::seq::SeqSpace;
use crate::socket::Socket;
use crate::state::ReceiverState;

// ---------------------------------------------------------------------------
// InOrderCursor
// ---------------------------------------------------------------------------

/// Next-expected-sequence tracker (`RCV.NXT`).
#[derive(Debug, Clone)]
pub struct InOrderCursor {
    space: SeqSpace,
    rcv_nxt: u32,
}

impl InOrderCursor {
    /// `rcv_nxt` is the first sequence number expected from the peer; after
    /// a SYN this is `syn_seq + 1`.
    pub fn new(space: SeqSpace, rcv_nxt: u32) -> Self {
        Self {
            space,
            rcv_nxt: space.normalize(rcv_nxt),
        }
    }

    /// Returns `true` if a packet of `len` bytes at `seq` is the next one in
    /// order, in which case `rcv_nxt` advances past it.  Anything else leaves
    /// the cursor untouched.
    pub fn on_segment(&mut self, seq: u32, len: usize) -> bool {
        if seq == self.rcv_nxt {
            self.rcv_nxt = self.space.advance(self.rcv_nxt, len);
            true
        } else {
            false
        }
    }

    /// Account for a FIN, which consumes one sequence number.
    pub fn on_fin(&mut self, fin_seq: u32) {
        self.rcv_nxt = self.space.advance(fin_seq, 1);
    }

    /// Cumulative ACK number to place in the next outbound packet.
    pub fn ack_number(&self) -> u32 {
        self.rcv_nxt
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

pub struct Receiver {
    conn: Connection,
    config: Config,
    state: ReceiverState,
    cursor: InOrderCursor,
    /// Sequence number of our SYN|ACK, kept to answer a retransmitted SYN.
    syn_seq: u32,
    bytes_received: u64,
}

impl Receiver {
    /// Bind `local_addr` and start in [`ReceiverState::Listening`].
    pub async fn bind(local_addr: SocketAddr, config: Config) -> Result<Self, ConfundoError> {
        let socket = Socket::bind(local_addr).await?;
        Self::with_socket(socket, config)
    }

    /// Use an already bound socket.
    pub fn with_socket(socket: Socket, config: Config) -> Result<Self, ConfundoError> {
        config.validate()?;
        let space = config.seq_space();
        let conn = Connection::new(socket, space, config.initial_seq, "recv");
        Ok(Self {
            syn_seq: conn.seq_num,
            conn,
            config,
            state: ReceiverState::Listening,
            cursor: InOrderCursor::new(space, 0),
            bytes_received: 0,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.conn.local_addr()
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Next in-order sequence number expected from the peer.
    pub fn ack_num(&self) -> u32 {
        self.cursor.ack_number()
    }

    pub fn connection_id(&self) -> Option<u16> {
        self.conn.connection_id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.conn.peer
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Accept a connection, write everything it carries to `sink`, and close.
    /// Returns the number of bytes written.
    pub async fn transfer<W>(mut self, sink: &mut W) -> Result<u64, ConfundoError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.listen().await?;
        let n = self.receive_stream(sink).await?;
        self.close().await?;
        Ok(n)
    }

    /// Wait for a SYN and answer it: `LISTENING → ESTABLISHED`.
    ///
    /// The final handshake ACK is not awaited; the data phase tolerates it
    /// arriving late or not at all.
    pub async fn listen(&mut self) -> Result<(), ConfundoError> {
        self.state = ReceiverState::Listening;
        log::info!("[recv] listening on {}", self.conn.local_addr());
        let deadline = self.config.timers.listen_timeout.map(|t| Instant::now() + t);

        loop {
            let Some((pkt, addr)) = self.conn.recv_until(deadline).await? else {
                return Err(ConfundoError::ListenTimeout);
            };
            if !pkt.header.has(flags::SYN) {
                log::debug!("[recv] ignoring {} before any SYN", flag_names(pkt.header.flags));
                continue;
            }

            self.conn.peer = Some(addr);
            self.conn.connection_id = Some(pkt.header.connection_id);
            let space = self.conn.space();
            self.cursor = InOrderCursor::new(space, space.advance(pkt.header.seq, 1));
            self.conn.ack_num = self.cursor.ack_number();

            self.syn_seq = self.conn.seq_num;
            self.conn.send_control(flags::SYN | flags::ACK).await?;
            self.conn.advance_seq(1);
            self.state = ReceiverState::Established;
            log::info!(
                "[recv] accepted {addr} (connection {}), expecting seq {}",
                pkt.header.connection_id,
                self.cursor.ack_number()
            );
            return Ok(());
        }
    }

    /// Deliver in-order payloads to `sink` until the peer's FIN.
    ///
    /// The FIN is acknowledged before returning.  Returns the number of bytes
    /// written by this call.
    pub async fn receive_stream<W>(&mut self, sink: &mut W) -> Result<u64, ConfundoError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let idle = self.config.timers.idle_timeout;
        let mut written = 0u64;

        loop {
            let Some((pkt, _)) = self.conn.recv(idle).await? else {
                log::warn!("[recv] peer silent for {idle:?}");
                return Err(ConfundoError::ConnectionDead {
                    phase: Phase::Transfer,
                });
            };
            let h = pkt.header;

            if h.has(flags::FIN) {
                self.cursor.on_fin(h.seq);
                self.conn.ack_num = self.cursor.ack_number();
                self.conn.send_control(flags::ACK).await?;
                break;
            }
            if h.has(flags::SYN) {
                // Our SYN|ACK was lost; answer the retransmitted SYN again.
                self.resend_syn_ack().await?;
                continue;
            }
            if pkt.payload.is_empty() && h.has(flags::ACK) {
                // Third leg of the handshake.
                continue;
            }

            if self.cursor.on_segment(h.seq, pkt.payload.len()) {
                sink.write_all(&pkt.payload).await?;
                written += pkt.payload.len() as u64;
            } else {
                log::debug!(
                    "[recv] out-of-order seq={} (expected {}), re-acking",
                    h.seq,
                    self.cursor.ack_number()
                );
            }
            self.conn.ack_num = self.cursor.ack_number();
            self.conn.send_control(flags::ACK).await?;
        }

        sink.flush().await?;
        self.bytes_received += written;
        log::info!("[recv] peer finished after {written} bytes");
        Ok(written)
    }

    /// Responder teardown: send our own FIN, then linger for `close_wait`.
    ///
    /// Consumes the receiver; the socket is released on return.
    pub async fn close(mut self) -> Result<(), ConfundoError> {
        let fin = self.conn.packet(flags::FIN, Vec::new());
        self.conn.send_packet(&fin).await?;
        self.conn.advance_seq(1);
        self.state = ReceiverState::LastAck;

        let close_wait = self.config.timers.close_wait;
        while let Some((pkt, _)) = self.conn.recv(close_wait).await? {
            let h = pkt.header;
            if h.has(flags::FIN) {
                // The peer never saw our ACK of its FIN.
                self.conn.send_control(flags::ACK).await?;
                self.conn.send_packet(&fin).await?;
            } else if h.has(flags::ACK) && h.ack == self.conn.seq_num {
                log::debug!("[recv] our FIN was acknowledged");
                break;
            }
        }

        self.state = ReceiverState::Closed;
        log::info!("[recv] connection closed");
        Ok(())
    }

    async fn resend_syn_ack(&mut self) -> Result<(), ConfundoError> {
        let mut syn_ack = self.conn.packet(flags::SYN | flags::ACK, Vec::new());
        syn_ack.header.seq = self.syn_seq;
        self.conn.send_packet(&syn_ack).await
    }
}
