//! Sender engine (connection initiator).
//!
//! Drives the three-way handshake, streams a byte source to the peer one
//! congestion window at a time, and performs the initiator's half of the
//! teardown.
//!
//! # Adaptive stop-and-wait
//!
//! At most **one** data packet is unacknowledged at any moment.  Its payload
//! is up to `cwnd` bytes long and travels as a single datagram.  A packet is
//! acknowledged by an `ACK` whose ack number equals the sequence number that
//! follows it; anything else is stray and discarded.  When the RTO elapses the
//! identical packet is re-sent and the window collapses (see
//! [`crate::congestion`]).  The window only grows on ACKs for packets that
//! were sent exactly once.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::Config;
use crate::congestion::CongestionControl;
use crate::connection::Connection;
use crate::error::{ConfundoError, Phase};
use crate::packet::{flags, Packet};
use crate::socket::Socket;
use crate::state::SenderState;
use crate::timer::{RetransmitTimer, TimerAction};

/// Summary of one transfer, returned by [`Sender::close`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Payload bytes acknowledged by the peer.
    pub bytes_sent: u64,
    /// Distinct data packets (retransmissions not counted).
    pub data_packets: u64,
    /// Retransmissions of any kind (SYN, data, FIN).
    pub retransmissions: u64,
    pub final_cwnd: u32,
    pub final_ssthresh: u32,
}

/// What the retransmission loop is waiting for.
#[derive(Debug, Clone, Copy)]
enum Awaiting {
    /// A `SYN|ACK` acknowledging our SYN.
    SynAck(u32),
    /// An `ACK` carrying exactly this ack number.
    Ack(u32),
}

impl Awaiting {
    fn matches(&self, pkt: &Packet) -> bool {
        let h = &pkt.header;
        match *self {
            Awaiting::SynAck(ack) => h.has(flags::SYN | flags::ACK) && h.ack == ack,
            Awaiting::Ack(ack) => h.has(flags::ACK) && !h.has(flags::SYN) && h.ack == ack,
        }
    }
}

pub struct Sender {
    conn: Connection,
    config: Config,
    state: SenderState,
    cc: CongestionControl,
    stats: TransferStats,
}

impl Sender {
    /// Bind an ephemeral local socket of the peer's address family.
    pub async fn bind(peer: SocketAddr, config: Config) -> Result<Self, ConfundoError> {
        let local: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = Socket::bind(local).await?;
        Self::with_socket(socket, peer, config)
    }

    /// Use an already bound socket.
    pub fn with_socket(socket: Socket, peer: SocketAddr, config: Config) -> Result<Self, ConfundoError> {
        config.validate()?;
        let mut conn = Connection::new(socket, config.seq_space(), config.initial_seq, "send");
        conn.peer = Some(peer);
        Ok(Self {
            conn,
            cc: CongestionControl::new(&config),
            config,
            state: SenderState::Closed,
            stats: TransferStats::default(),
        })
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn cwnd(&self) -> u32 {
        self.cc.cwnd()
    }

    pub fn ssthresh(&self) -> u32 {
        self.cc.ssthresh()
    }

    /// Next sequence number this sender will use.
    pub fn seq_num(&self) -> u32 {
        self.conn.seq_num
    }

    pub fn connection_id(&self) -> Option<u16> {
        self.conn.connection_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.conn.local_addr()
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// Connect, stream all of `source`, and close.
    pub async fn transfer<R>(mut self, source: &mut R) -> Result<TransferStats, ConfundoError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.connect().await?;
        self.send_stream(source).await?;
        self.close().await
    }

    /// Three-way handshake as initiator: `CLOSED → SYN_SENT → ESTABLISHED`.
    pub async fn connect(&mut self) -> Result<(), ConfundoError> {
        let id = self
            .config
            .connection_id
            .unwrap_or_else(|| rand::random::<u16>().max(1));
        self.conn.connection_id = Some(id);
        self.conn.reset_idle();

        let syn = self.conn.packet(flags::SYN, Vec::new());
        self.conn.advance_seq(1);
        self.state = SenderState::SynSent;
        log::info!(
            "[send] connecting to {:?} (connection {id}, isn {})",
            self.conn.peer,
            syn.header.seq
        );

        let (syn_ack, _) = self
            .transmit_until_acked(&syn, Awaiting::SynAck(self.conn.seq_num), Phase::Handshake)
            .await?;

        // Acknowledge the responder's SYN; our own base is already `seq_num`.
        self.conn.ack_num = self.conn.space().advance(syn_ack.header.seq, 1);
        self.conn.send_control(flags::ACK).await?;
        self.state = SenderState::Established;
        log::info!("[send] established, data starts at seq {}", self.conn.seq_num);
        Ok(())
    }

    /// Stream `source` until it is exhausted.  Returns the number of bytes sent.
    pub async fn send_stream<R>(&mut self, source: &mut R) -> Result<u64, ConfundoError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut total = 0u64;
        loop {
            let chunk = read_chunk(source, self.cc.cwnd() as usize).await?;
            // Time spent blocked on the source is not peer silence.
            self.conn.reset_idle();
            if chunk.is_empty() {
                break;
            }
            let len = chunk.len();
            self.send_window(chunk).await?;
            total += len as u64;
        }
        log::info!(
            "[send] stream complete: {total} bytes in {} packets ({} retransmissions)",
            self.stats.data_packets,
            self.stats.retransmissions
        );
        Ok(total)
    }

    /// Send one data packet and wait until the peer acknowledges it.
    pub async fn send_window(&mut self, payload: Vec<u8>) -> Result<(), ConfundoError> {
        if self.state != SenderState::Established {
            return Err(not_established(self.state));
        }
        let len = payload.len();
        let pkt = self.conn.packet(0, payload);
        self.conn.advance_seq(len);

        let (_, tx_count) = self
            .transmit_until_acked(&pkt, Awaiting::Ack(self.conn.seq_num), Phase::Transfer)
            .await?;
        self.stats.data_packets += 1;
        self.stats.bytes_sent += len as u64;
        if tx_count == 1 {
            self.cc.on_ack();
            log::debug!(
                "[send] window grew: cwnd={} ssthresh={}",
                self.cc.cwnd(),
                self.cc.ssthresh()
            );
        }
        Ok(())
    }

    /// Initiator teardown: `ESTABLISHED → FIN_SENT → FIN_WAIT → CLOSED`.
    ///
    /// Consumes the sender; the socket is released on return.
    pub async fn close(mut self) -> Result<TransferStats, ConfundoError> {
        let fin = self.conn.packet(flags::FIN, Vec::new());
        self.conn.advance_seq(1);
        self.state = SenderState::FinSent;
        self.transmit_until_acked(&fin, Awaiting::Ack(self.conn.seq_num), Phase::Close)
            .await?;

        self.state = SenderState::FinWait;
        let close_wait = self.config.timers.close_wait;
        while let Some((pkt, _)) = self.conn.recv(close_wait).await? {
            if pkt.header.has(flags::FIN) {
                self.conn.ack_num = self.conn.space().advance(pkt.header.seq, 1);
                self.conn.send_control(flags::ACK).await?;
            }
        }

        self.state = SenderState::Closed;
        self.stats.final_cwnd = self.cc.cwnd();
        self.stats.final_ssthresh = self.cc.ssthresh();
        log::info!("[send] connection closed");
        Ok(self.stats)
    }

    /// Send `pkt` and retransmit it on every RTO until `awaiting` is satisfied.
    ///
    /// Returns the matching packet and how many times `pkt` went out.
    async fn transmit_until_acked(
        &mut self,
        pkt: &Packet,
        awaiting: Awaiting,
        phase: Phase,
    ) -> Result<(Packet, u32), ConfundoError> {
        self.conn.send_packet(pkt).await?;
        let mut timer = RetransmitTimer::start(&self.config.timers, self.conn.last_heard());

        loop {
            match timer.poll() {
                TimerAction::Dead => {
                    log::warn!("[send] peer silent for {:?} during {phase}", self.config.timers.idle_timeout);
                    return Err(ConfundoError::ConnectionDead { phase });
                }
                TimerAction::Retransmit => {
                    if phase == Phase::Transfer {
                        self.cc.on_timeout();
                    }
                    log::warn!(
                        "[send] timeout, retransmitting seq={} (cwnd={} ssthresh={})",
                        pkt.header.seq,
                        self.cc.cwnd(),
                        self.cc.ssthresh()
                    );
                    self.conn.send_packet(pkt).await?;
                    timer.on_transmit();
                    self.stats.retransmissions += 1;
                }
                TimerAction::Wait(wait) => {
                    let Some((reply, _)) = self.conn.recv(wait).await? else {
                        continue;
                    };
                    timer.on_heard();
                    if awaiting.matches(&reply) {
                        return Ok((reply, timer.tx_count()));
                    }
                    log::debug!(
                        "[send] discarding stray packet (ack={}, waiting for {awaiting:?})",
                        reply.header.ack
                    );
                }
            }
        }
    }
}

/// Pull up to `limit` bytes from `source`; fewer only at end of stream.
async fn read_chunk<R>(source: &mut R, limit: usize) -> Result<Vec<u8>, ConfundoError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = Vec::with_capacity(limit);
    source.take(limit as u64).read_to_end(&mut buf).await?;
    Ok(buf)
}

fn not_established(state: SenderState) -> ConfundoError {
    ConfundoError::Io(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        format!("cannot send data in state {state}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::timer::TimerConfig;

    fn fast_config() -> Config {
        Config {
            connection_id: Some(0x1234),
            timers: TimerConfig {
                rto: Duration::from_millis(200),
                idle_timeout: Duration::from_secs(3),
                close_wait: Duration::from_millis(200),
                listen_timeout: None,
            },
            ..Config::default()
        }
    }

    async fn sender_and_peer(config: Config) -> (Sender, Socket) {
        let peer = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let client = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let sender = Sender::with_socket(client, peer.local_addr, config).unwrap();
        (sender, peer)
    }

    /// Scripted responder: answers the SYN and swallows the third leg.
    async fn accept(peer: &Socket) -> (std::net::SocketAddr, u32, u16) {
        let (syn, from) = peer.recv_from().await.unwrap();
        assert!(syn.header.has(flags::SYN));
        let syn_ack = Packet::control(
            100,
            (syn.header.seq + 1) % 50_000,
            syn.header.connection_id,
            flags::SYN | flags::ACK,
        );
        peer.send_to(&syn_ack, from).await.unwrap();
        let (ack, _) = peer.recv_from().await.unwrap();
        assert_eq!(ack.header.flags, flags::ACK);
        assert_eq!(ack.header.ack, 101);
        (from, ack.header.seq, syn.header.connection_id)
    }

    #[test]
    fn awaiting_ack_ignores_wrong_numbers() {
        let want = Awaiting::Ack(10);
        assert!(want.matches(&Packet::control(0, 10, 1, flags::ACK)));
        assert!(!want.matches(&Packet::control(0, 9, 1, flags::ACK)));
        assert!(!want.matches(&Packet::control(0, 10, 1, 0)));
        assert!(!want.matches(&Packet::control(0, 10, 1, flags::SYN | flags::ACK)));
        assert!(Awaiting::SynAck(1).matches(&Packet::control(0, 1, 1, flags::SYN | flags::ACK)));
    }

    #[tokio::test]
    async fn read_chunk_fills_up_to_limit() {
        let data = vec![7u8; 1000];
        let mut src: &[u8] = &data;
        assert_eq!(read_chunk(&mut src, 412).await.unwrap().len(), 412);
        assert_eq!(read_chunk(&mut src, 412).await.unwrap().len(), 412);
        assert_eq!(read_chunk(&mut src, 412).await.unwrap().len(), 176);
        assert!(read_chunk(&mut src, 412).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn syn_is_retransmitted_until_answered() {
        let (mut sender, peer) = sender_and_peer(fast_config()).await;
        let client = tokio::spawn(async move {
            sender.connect().await.unwrap();
            sender
        });

        // Ignore the first SYN; the retransmission must be identical.
        let (first, _) = peer.recv_from().await.unwrap();
        let (second, from) = peer.recv_from().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.header.seq, 0);
        assert_eq!(first.header.connection_id, 0x1234);

        let syn_ack = Packet::control(100, 1, 0x1234, flags::SYN | flags::ACK);
        peer.send_to(&syn_ack, from).await.unwrap();

        let sender = client.await.unwrap();
        assert_eq!(sender.state(), SenderState::Established);
        assert_eq!(sender.seq_num(), 1);
        assert_eq!(sender.stats().retransmissions, 1);
    }

    #[tokio::test]
    async fn timeout_collapses_window_and_resends_identical_packet() {
        let (mut sender, peer) = sender_and_peer(fast_config()).await;
        let payload: Vec<u8> = (0..412u32).map(|i| i as u8).collect();
        let to_send = payload.clone();

        let client = tokio::spawn(async move {
            sender.connect().await.unwrap();
            // One clean round first so cwnd is above the floor.
            sender.send_window(vec![1u8; 412]).await.unwrap();
            assert_eq!(sender.cwnd(), 824);
            sender.send_window(to_send).await.unwrap();
            sender
        });

        let (from, data_seq, id) = accept(&peer).await;
        let (first, _) = peer.recv_from().await.unwrap();
        assert_eq!(first.header.seq, data_seq);
        let next = (data_seq + 412) % 50_000;
        peer.send_to(&Packet::control(101, next, id, flags::ACK), from).await.unwrap();

        // Drop the first copy of the second window, answer the retransmission.
        let (lost, _) = peer.recv_from().await.unwrap();
        let (again, _) = peer.recv_from().await.unwrap();
        assert_eq!(lost, again);
        assert_eq!(again.payload, payload);
        let after = (next + 412) % 50_000;
        peer.send_to(&Packet::control(101, after, id, flags::ACK), from).await.unwrap();

        let sender = client.await.unwrap();
        assert_eq!(sender.ssthresh(), 412, "ssthresh = max(824 / 2, 412)");
        assert_eq!(sender.cwnd(), 412, "no growth on a retransmitted ACK");
        assert_eq!(sender.seq_num(), after);
        assert_eq!(sender.stats().retransmissions, 1);
    }

    #[tokio::test]
    async fn stray_acks_do_not_complete_a_send() {
        let (mut sender, peer) = sender_and_peer(fast_config()).await;
        let client = tokio::spawn(async move {
            sender.connect().await.unwrap();
            sender.send_window(b"hello".to_vec()).await.unwrap();
            sender
        });

        let (from, data_seq, id) = accept(&peer).await;
        let (data, _) = peer.recv_from().await.unwrap();
        assert_eq!(data.payload, b"hello");
        // A duplicate ACK for the old position is discarded.
        peer.send_to(&Packet::control(101, data_seq, id, flags::ACK), from).await.unwrap();
        peer.send_to(&Packet::control(101, data_seq + 5, id, flags::ACK), from).await.unwrap();

        let sender = client.await.unwrap();
        assert_eq!(sender.stats().retransmissions, 0);
        assert_eq!(sender.cwnd(), 824);
    }

    #[tokio::test]
    async fn peer_fin_is_acknowledged_during_fin_wait() {
        let (mut sender, peer) = sender_and_peer(fast_config()).await;
        let client = tokio::spawn(async move {
            sender.connect().await.unwrap();
            sender.close().await.unwrap()
        });

        let (from, fin_seq, id) = accept(&peer).await;
        let (fin, _) = peer.recv_from().await.unwrap();
        assert_eq!(fin.header.flags, flags::FIN);
        assert_eq!(fin.header.seq, fin_seq);

        let after_fin = (fin_seq + 1) % 50_000;
        peer.send_to(&Packet::control(101, after_fin, id, flags::ACK), from)
            .await
            .unwrap();
        peer.send_to(&Packet::control(101, after_fin, id, flags::FIN), from)
            .await
            .unwrap();

        let (ack, _) = peer.recv_from().await.unwrap();
        assert_eq!(ack.header.flags, flags::ACK);
        assert_eq!(ack.header.ack, 102, "ack = peer FIN seq + 1");
        assert_eq!(ack.header.seq, after_fin);

        let stats = client.await.unwrap();
        assert_eq!(stats.retransmissions, 0);
    }

    #[tokio::test]
    async fn stalled_source_is_not_peer_silence() {
        let mut config = fast_config();
        config.timers.rto = Duration::from_millis(100);
        config.timers.idle_timeout = Duration::from_millis(400);
        let (mut sender, peer) = sender_and_peer(config).await;

        let (mut writer, mut reader) = tokio::io::duplex(64);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(800)).await;
            tokio::io::AsyncWriteExt::write_all(&mut writer, b"late")
                .await
                .unwrap();
        });
        let client = tokio::spawn(async move {
            sender.connect().await.unwrap();
            sender.send_stream(&mut reader).await
        });

        let (from, data_seq, id) = accept(&peer).await;
        let (data, _) = peer.recv_from().await.unwrap();
        assert_eq!(data.payload, b"late");
        let next = (data_seq + 4) % 50_000;
        peer.send_to(&Packet::control(101, next, id, flags::ACK), from)
            .await
            .unwrap();

        assert_eq!(client.await.unwrap().unwrap(), 4);
    }

    #[tokio::test]
    async fn silent_peer_is_fatal() {
        let mut config = fast_config();
        config.timers.idle_timeout = Duration::from_millis(350);
        let (mut sender, _peer) = sender_and_peer(config).await;

        let err = sender.connect().await.unwrap_err();
        assert!(matches!(
            err,
            ConfundoError::ConnectionDead {
                phase: Phase::Handshake
            }
        ));
        assert!(sender.stats().retransmissions >= 1);
    }
}
