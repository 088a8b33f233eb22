//! LSP messages and their binary encoding.
//!
//! A [`Message`] is what the engine reasons about; [`Message::encode`] and
//! [`Message::decode`] convert it to and from the bytes of one UDP datagram.
//! Anything that fails to decode is reported as a [`MessageError`] and the
//! receiver task drops it.
//!
//! # Wire format
//!
//! Integers are big-endian. Byte offsets:
//!
//! ```text
//! 0      1      2      3      4      5      6      7      8      9      10     11     12     13
//! +------+---------------------------+---------------------------+-------------+-------------+ - -
//! | kind |          conn_id          |            seq            | payload_len |   checksum  | payload ...
//! +------+---------------------------+---------------------------+-------------+-------------+ - -
//! ```
//!
//! `kind` is 0 for Connect, 1 for Data, 2 for Ack. Only Data may carry a
//! payload. `checksum` is the RFC 1071 sum of the whole datagram taken
//! with the checksum bytes set to zero.

use std::fmt;

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 13;

/// Largest UDP payload an IPv4 datagram can carry (65535 minus the IP and
/// UDP headers). IPv6 allows slightly more; the lower bound is used for both.
pub const MAX_DATAGRAM: usize = 65_507;

/// Largest payload a single Data message can carry.
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM - HEADER_LEN;

// Byte offsets of each field within the serialised header.
const OFF_KIND: usize = 0;
const OFF_CONN_ID: usize = 1;
const OFF_SEQ: usize = 5;
const OFF_PAYLOAD_LEN: usize = 9;
const OFF_CHECKSUM: usize = 11;

/// The three message types of the protocol.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgKind {
    /// Connection request; always carries conn id 0 and sequence number 0.
    Connect = 0,
    /// Application payload.
    Data = 1,
    /// Acknowledgement of a Connect (seq 0) or of a Data message.
    Ack = 2,
}

impl MsgKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MsgKind::Connect),
            1 => Some(MsgKind::Data),
            2 => Some(MsgKind::Ack),
            _ => None,
        }
    }
}

/// One protocol datagram.
///
/// Messages are immutable once built; the engine clones them into its
/// retransmission maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MsgKind,
    /// Server-assigned connection id; 0 until the handshake completes.
    pub conn_id: u32,
    /// Sequence number; 0 is reserved for the handshake and keep-alives.
    pub seq: u32,
    /// Application bytes, empty for everything except Data.
    pub payload: Vec<u8>,
}

impl Message {
    /// The connection request sent by a fresh client.
    pub fn connect() -> Self {
        Self {
            kind: MsgKind::Connect,
            conn_id: 0,
            seq: 0,
            payload: Vec::new(),
        }
    }

    pub fn data(conn_id: u32, seq: u32, payload: Vec<u8>) -> Self {
        Self {
            kind: MsgKind::Data,
            conn_id,
            seq,
            payload,
        }
    }

    pub fn ack(conn_id: u32, seq: u32) -> Self {
        Self {
            kind: MsgKind::Ack,
            conn_id,
            seq,
            payload: Vec::new(),
        }
    }

    /// Wire bytes of this message, ready for one `send`.
    ///
    /// Fails for payloads over [`MAX_PAYLOAD`] and for non-Data messages
    /// that carry a payload.
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        let payload_len = self.payload.len();
        if payload_len > MAX_PAYLOAD {
            return Err(MessageError::PayloadTooLarge(payload_len));
        }
        if self.kind != MsgKind::Data && payload_len != 0 {
            return Err(MessageError::UnexpectedPayload(self.kind));
        }

        let mut buf = vec![0u8; HEADER_LEN + payload_len];
        buf[OFF_KIND] = self.kind as u8;
        buf[OFF_CONN_ID..OFF_CONN_ID + 4].copy_from_slice(&self.conn_id.to_be_bytes());
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 2]
            .copy_from_slice(&(payload_len as u16).to_be_bytes());
        // Bytes 11..13 are still zero here.
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        let csum = internet_checksum(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());

        Ok(buf)
    }

    /// Rebuild the [`Message`] carried by one received datagram.
    pub fn decode(buf: &[u8]) -> Result<Self, MessageError> {
        if buf.len() < HEADER_LEN {
            return Err(MessageError::BufferTooShort(buf.len()));
        }

        let kind = MsgKind::from_u8(buf[OFF_KIND]).ok_or(MessageError::UnknownKind(buf[OFF_KIND]))?;
        let conn_id = u32::from_be_bytes(read_array(buf, OFF_CONN_ID));
        let seq = u32::from_be_bytes(read_array(buf, OFF_SEQ));
        let payload_len = u16::from_be_bytes(read_array(buf, OFF_PAYLOAD_LEN)) as usize;
        let checksum = u16::from_be_bytes(read_array(buf, OFF_CHECKSUM));

        if buf.len() != HEADER_LEN + payload_len {
            return Err(MessageError::LengthMismatch {
                declared: payload_len,
                actual: buf.len() - HEADER_LEN,
            });
        }

        let mut scratch = buf.to_vec();
        scratch[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&[0, 0]);
        if internet_checksum(&scratch) != checksum {
            return Err(MessageError::ChecksumFailed);
        }

        if kind != MsgKind::Data && payload_len != 0 {
            return Err(MessageError::UnexpectedPayload(kind));
        }

        Ok(Message {
            kind,
            conn_id,
            seq,
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MsgKind::Connect => write!(f, "[Connect {} {}]", self.conn_id, self.seq),
            MsgKind::Data => write!(
                f,
                "[Data {} {} len={}]",
                self.conn_id,
                self.seq,
                self.payload.len()
            ),
            MsgKind::Ack => write!(f, "[Ack {} {}]", self.conn_id, self.seq),
        }
    }
}

/// Why a datagram could not be built or understood.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("buffer of {0} bytes is too short to contain a header")]
    BufferTooShort(usize),
    #[error("unknown message kind {0}")]
    UnknownKind(u8),
    #[error("payload_len field says {declared} bytes but {actual} follow the header")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("checksum verification failed")]
    ChecksumFailed,
    #[error("{0:?} messages must not carry a payload")]
    UnexpectedPayload(MsgKind),
    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD}-byte maximum")]
    PayloadTooLarge(usize),
}

/// Copy `N` bytes at `offset`. Callers check the header length first.
fn read_array<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}

/// RFC 1071 checksum of `data`, whose checksum bytes must be zero.
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        sum += u32::from(u16::from_be_bytes([pair[0], pair[1]]));
    }
    // A lone last byte is the high half of its word.
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_roundtrip_keeps_every_field() {
        let msg = Message::data(7, 42, b"hello".to_vec());
        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn connect_is_all_zero_ids() {
        let bytes = Message::connect().encode().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(bytes[OFF_KIND], MsgKind::Connect as u8);
        assert_eq!(&bytes[OFF_CONN_ID..OFF_PAYLOAD_LEN], &[0u8; 8]);
    }

    #[test]
    fn ids_are_big_endian_on_wire() {
        let bytes = Message::ack(0x0102_0304, 0x0506_0708).encode().unwrap();
        assert_eq!(&bytes[OFF_CONN_ID..OFF_CONN_ID + 4], &[1, 2, 3, 4]);
        assert_eq!(&bytes[OFF_SEQ..OFF_SEQ + 4], &[5, 6, 7, 8]);
    }

    #[test]
    fn decode_short_header_returns_error() {
        assert_eq!(
            Message::decode(&[0u8; HEADER_LEN - 1]),
            Err(MessageError::BufferTooShort(HEADER_LEN - 1))
        );
    }

    #[test]
    fn decode_unknown_kind_returns_error() {
        let mut bytes = Message::ack(1, 1).encode().unwrap();
        bytes[OFF_KIND] = 9;
        assert_eq!(Message::decode(&bytes), Err(MessageError::UnknownKind(9)));
    }

    #[test]
    fn decode_truncated_payload_returns_error() {
        let mut bytes = Message::data(1, 1, b"data".to_vec()).encode().unwrap();
        bytes.pop();
        assert_eq!(
            Message::decode(&bytes),
            Err(MessageError::LengthMismatch {
                declared: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn decode_corrupt_byte_returns_checksum_error() {
        let mut bytes = Message::data(3, 9, b"test".to_vec()).encode().unwrap();
        bytes[HEADER_LEN] ^= 0xff;
        assert_eq!(Message::decode(&bytes), Err(MessageError::ChecksumFailed));
    }

    #[test]
    fn ack_with_payload_is_rejected_both_ways() {
        let bad = Message {
            kind: MsgKind::Ack,
            conn_id: 1,
            seq: 1,
            payload: vec![1],
        };
        assert_eq!(
            bad.encode(),
            Err(MessageError::UnexpectedPayload(MsgKind::Ack))
        );
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let msg = Message::data(1, 1, vec![0u8; MAX_PAYLOAD + 1]);
        assert_eq!(
            msg.encode(),
            Err(MessageError::PayloadTooLarge(MAX_PAYLOAD + 1))
        );
    }

    #[test]
    fn largest_payload_fills_one_datagram() {
        let msg = Message::data(1, 1, vec![0xab; MAX_PAYLOAD]);
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes.len(), MAX_DATAGRAM);
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn empty_data_payload_roundtrip() {
        let msg = Message::data(5, 1, Vec::new());
        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.kind, MsgKind::Data);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn display_is_compact() {
        assert_eq!(Message::ack(4, 2).to_string(), "[Ack 4 2]");
        assert_eq!(
            Message::data(4, 3, b"abc".to_vec()).to_string(),
            "[Data 4 3 len=3]"
        );
    }
}
