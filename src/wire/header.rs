//! Wire header (spec §6): a fixed 44-byte, network-byte-order preamble that
//! every message begins with, framed before anything else in the message is
//! trusted (spec §4.1).

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor};

use crate::error::{CoreError, ErrorKind};

pub const HEADER_SIZE: usize = 44;
pub const MAX_MESSAGE_SIZE: u32 = 1 << 20; // 1 MiB, per spec §4.1
pub const HEADER_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    DeviceRegister = 100,
    ConfigDelayModel = 101,
    ConfigLossModel = 102,
    TxRequest = 103,
    DeviceRemove = 104,
    PositionUpdate = 105,
    RxNotification = 200,
    TxStartNotify = 201,
    TxEndNotify = 202,
    ConfigAck = 203,
    ErrorNotify = 204,
    Heartbeat = 301,
}

impl MessageType {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            100 => MessageType::DeviceRegister,
            101 => MessageType::ConfigDelayModel,
            102 => MessageType::ConfigLossModel,
            103 => MessageType::TxRequest,
            104 => MessageType::DeviceRemove,
            105 => MessageType::PositionUpdate,
            200 => MessageType::RxNotification,
            201 => MessageType::TxStartNotify,
            202 => MessageType::TxEndNotify,
            203 => MessageType::ConfigAck,
            204 => MessageType::ErrorNotify,
            301 => MessageType::Heartbeat,
            _ => return None,
        })
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// The 44-byte header common to every wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub message_type: MessageType,
    pub total_length: u32,
    pub source_rank: u32,
    pub destination_rank: u32,
    pub timestamp_ns: u64,
    pub sequence_number: u32,
    pub device_id: u32,
    pub header_version: u32,
    pub body_checksum: u32,
}

impl Header {
    pub fn encode(&self, out: &mut Vec<u8>) -> io::Result<()> {
        out.write_u32::<BigEndian>(self.message_type.as_u32())?;
        out.write_u32::<BigEndian>(self.total_length)?;
        out.write_u32::<BigEndian>(self.source_rank)?;
        out.write_u32::<BigEndian>(self.destination_rank)?;
        out.write_u64::<BigEndian>(self.timestamp_ns)?;
        out.write_u32::<BigEndian>(self.sequence_number)?;
        out.write_u32::<BigEndian>(self.device_id)?;
        out.write_u32::<BigEndian>(0)?; // reserved, must be 0 on emit
        out.write_u32::<BigEndian>(self.header_version)?;
        out.write_u32::<BigEndian>(self.body_checksum)?;
        Ok(())
    }

    /// Parse and apply the purely structural validation rules of §4.1 that
    /// don't need fabric or registry context (message type, length bounds).
    /// Rank-matches-fabric and sequence-monotonicity checks happen one layer
    /// up, where that context is available.
    pub fn decode(bytes: &[u8]) -> crate::error::Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(CoreError::new_local(
                ErrorKind::ProtocolViolation,
                format!("header truncated: {} bytes, need {HEADER_SIZE}", bytes.len()),
            ));
        }
        let mut cur = Cursor::new(bytes);
        let message_type_raw = cur.read_u32::<BigEndian>().unwrap();
        let total_length = cur.read_u32::<BigEndian>().unwrap();
        let source_rank = cur.read_u32::<BigEndian>().unwrap();
        let destination_rank = cur.read_u32::<BigEndian>().unwrap();
        let timestamp_ns = cur.read_u64::<BigEndian>().unwrap();
        let sequence_number = cur.read_u32::<BigEndian>().unwrap();
        let device_id = cur.read_u32::<BigEndian>().unwrap();
        let _reserved = cur.read_u32::<BigEndian>().unwrap();
        let header_version = cur.read_u32::<BigEndian>().unwrap();
        let body_checksum = cur.read_u32::<BigEndian>().unwrap();

        let message_type = MessageType::from_u32(message_type_raw).ok_or_else(|| {
            CoreError::new_local(
                ErrorKind::ProtocolViolation,
                format!("unknown message_type {message_type_raw}"),
            )
        })?;

        if total_length < HEADER_SIZE as u32 || total_length > MAX_MESSAGE_SIZE {
            return Err(CoreError::new_local(
                ErrorKind::ProtocolViolation,
                format!("total_length {total_length} out of bounds"),
            ));
        }

        Ok(Header {
            message_type,
            total_length,
            source_rank,
            destination_rank,
            timestamp_ns,
            sequence_number,
            device_id,
            header_version,
            body_checksum,
        })
    }
}

/// xor-fold the body into a 32-bit checksum, one 32-bit word at a time,
/// zero-padding an incomplete trailing word. A checksum of `0` is treated by
/// convention as "off" and is never validated (spec §6).
pub fn xor_fold_checksum(body: &[u8]) -> u32 {
    let mut acc = 0u32;
    for chunk in body.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        acc ^= u32::from_be_bytes(word);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Header {
        Header {
            message_type: MessageType::TxRequest,
            total_length: HEADER_SIZE as u32 + 10,
            source_rank: 1,
            destination_rank: 0,
            timestamp_ns: 123_456_789,
            sequence_number: 7,
            device_id: 42,
            header_version: HEADER_VERSION,
            body_checksum: 0,
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let h = sample();
        let mut buf = Vec::new();
        h.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);
        let decoded = Header::decode(&buf).unwrap();
        assert_eq!(h, decoded);
    }

    #[test]
    fn rejects_unknown_message_type() {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[3] = 9; // message_type = 9, unknown
        buf[7] = HEADER_SIZE as u8; // total_length = 44
        assert!(Header::decode(&buf).is_err());
    }

    #[test]
    fn rejects_total_length_below_header_size() {
        let mut h = sample();
        h.total_length = 10;
        let mut buf = Vec::new();
        h.encode(&mut buf).unwrap();
        assert!(Header::decode(&buf).is_err());
    }

    #[test]
    fn rejects_total_length_above_max() {
        let mut h = sample();
        h.total_length = MAX_MESSAGE_SIZE + 1;
        let mut buf = Vec::new();
        h.encode(&mut buf).unwrap();
        assert!(Header::decode(&buf).is_err());
    }

    #[test]
    fn checksum_folds_words_with_xor() {
        let sum = xor_fold_checksum(&[0, 0, 0, 1, 0, 0, 0, 2]);
        assert_eq!(sum, 1 ^ 2);
    }

    #[test]
    fn checksum_zero_pads_incomplete_trailing_word() {
        let sum = xor_fold_checksum(&[0, 0, 0, 1, 0, 0]);
        assert_eq!(sum, 1 ^ 0);
    }
}
