//! Wire-format definitions for Confundo datagrams.
//!
//! Every datagram exchanged between peers is a [`Packet`]: a fixed 12-byte
//! header followed by raw payload bytes.  This module is responsible for:
//! - Defining the on-wire binary layout (header fields, flag bits).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`].
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Connection ID         |             Flags             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! There is no length field and no checksum: the payload length is the
//! datagram length minus [`HEADER_LEN`].

use thiserror::Error;

/// Bit-flag constants for the `flags` header field.
pub mod flags {
    /// Synchronise sequence numbers (handshake initiation).
    pub const SYN: u16 = 0b0000_0001;
    /// Acknowledgement field is valid.
    pub const ACK: u16 = 0b0000_0010;
    /// Finish — sender has no more data to send.
    pub const FIN: u16 = 0b0000_0100;
}

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 12;

const OFF_SEQ: usize = 0;
const OFF_ACK: usize = 4;
const OFF_CONN_ID: usize = 8;
const OFF_FLAGS: usize = 10;

/// Fixed-size protocol header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Sequence number of the first payload byte (or of the SYN/FIN).
    pub seq: u32,
    /// Acknowledgement number (next expected sequence number from the peer).
    pub ack: u32,
    /// Connection-scoping tag chosen by the initiator.
    pub connection_id: u16,
    /// Bitmask of [`flags`] constants.
    pub flags: u16,
}

impl Header {
    /// `true` when every bit of `flag` is set.
    pub fn has(&self, flag: u16) -> bool {
        self.flags & flag == flag
    }

    /// Serialise only the header (see [`Packet::encode`] for the full datagram).
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.ack.to_be_bytes());
        buf[OFF_CONN_ID..OFF_CONN_ID + 2].copy_from_slice(&self.connection_id.to_be_bytes());
        buf[OFF_FLAGS..OFF_FLAGS + 2].copy_from_slice(&self.flags.to_be_bytes());
        buf
    }

    /// Parse the header at the start of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort(buf.len()));
        }
        let word = |off: usize| u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
        let half = |off: usize| u16::from_be_bytes([buf[off], buf[off + 1]]);
        Ok(Self {
            seq: word(OFF_SEQ),
            ack: word(OFF_ACK),
            connection_id: half(OFF_CONN_ID),
            flags: half(OFF_FLAGS),
        })
    }
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// A packet with no payload (SYN, ACK, FIN and their combinations).
    pub fn control(seq: u32, ack: u32, connection_id: u16, flags: u16) -> Self {
        Self {
            header: Header {
                seq,
                ack,
                connection_id,
                flags,
            },
            payload: Vec::new(),
        }
    }

    /// Serialise this packet into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a [`Packet`] from a raw datagram.
    ///
    /// Everything after the header is payload.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        let header = Header::decode(buf)?;
        Ok(Packet {
            header,
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Datagram shorter than the fixed header.
    #[error("malformed packet: {0} bytes is shorter than the {HEADER_LEN}-byte header")]
    BufferTooShort(usize),
}
