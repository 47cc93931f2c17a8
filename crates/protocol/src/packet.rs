//! Takion transport packet framing (C6).
//!
//! Wire layout: `type_tag(1) | channel_id(1) | sequence(4, BE) | payload(N) | mac(4)`.
//! The MAC covers `type_tag || channel_id || sequence || payload`; verification
//! happens one layer up (crypto primitives own the key, this module only knows
//! the byte layout).

use thiserror::Error;

pub const TAKION_HEADER_LEN: usize = 1 + 1 + 4;
pub const TAKION_MAC_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TakionPacketType {
    Control = 0,
    FeedbackState = 1,
    FeedbackHistory = 2,
    Video = 3,
    Audio = 4,
    Handshake = 5,
    Congestion = 6,
    ClientInfo = 7,
    PadInfoEvent = 8,
}

impl TakionPacketType {
    pub fn from_tag(tag: u8) -> Result<Self, PacketError> {
        Ok(match tag {
            0 => Self::Control,
            1 => Self::FeedbackState,
            2 => Self::FeedbackHistory,
            3 => Self::Video,
            4 => Self::Audio,
            5 => Self::Handshake,
            6 => Self::Congestion,
            7 => Self::ClientInfo,
            8 => Self::PadInfoEvent,
            other => return Err(PacketError::UnknownType(other)),
        })
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("takion packet too short: {0} bytes, need at least {TAKION_HEADER_LEN} + {TAKION_MAC_LEN}")]
    TooShort(usize),
    #[error("unknown takion packet type tag: {0}")]
    UnknownType(u8),
}

/// A parsed takion packet with its MAC still attached (unverified).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TakionPacket {
    pub packet_type: TakionPacketType,
    pub channel_id: u8,
    pub sequence: u32,
    pub payload: Vec<u8>,
    pub mac: [u8; TAKION_MAC_LEN],
}

impl TakionPacket {
    pub fn new(
        packet_type: TakionPacketType,
        channel_id: u8,
        sequence: u32,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            packet_type,
            channel_id,
            sequence,
            payload,
            mac: [0; TAKION_MAC_LEN],
        }
    }

    /// Bytes covered by the MAC: header fields plus payload, MAC excluded.
    pub fn mac_input(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(TAKION_HEADER_LEN + self.payload.len());
        buf.push(self.packet_type.tag());
        buf.push(self.channel_id);
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Serialize header + payload + the given MAC value.
    pub fn serialize_with_mac(&self, mac: [u8; TAKION_MAC_LEN]) -> Vec<u8> {
        let mut buf = self.mac_input();
        buf.extend_from_slice(&mac);
        buf
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < TAKION_HEADER_LEN + TAKION_MAC_LEN {
            return Err(PacketError::TooShort(bytes.len()));
        }
        let packet_type = TakionPacketType::from_tag(bytes[0])?;
        let channel_id = bytes[1];
        let sequence = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        let payload_end = bytes.len() - TAKION_MAC_LEN;
        let payload = bytes[TAKION_HEADER_LEN..payload_end].to_vec();
        let mut mac = [0u8; TAKION_MAC_LEN];
        mac.copy_from_slice(&bytes[payload_end..]);
        Ok(Self {
            packet_type,
            channel_id,
            sequence,
            payload,
            mac,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_control_packet() {
        let pkt = TakionPacket::new(TakionPacketType::Control, 0, 42, vec![1, 2, 3]);
        let bytes = pkt.serialize_with_mac([0xAA, 0xBB, 0xCC, 0xDD]);
        let parsed = TakionPacket::deserialize(&bytes).unwrap();
        assert_eq!(parsed.packet_type, TakionPacketType::Control);
        assert_eq!(parsed.sequence, 42);
        assert_eq!(parsed.payload, vec![1, 2, 3]);
        assert_eq!(parsed.mac, [0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn empty_payload_roundtrips() {
        let pkt = TakionPacket::new(TakionPacketType::Handshake, 1, 0, vec![]);
        let bytes = pkt.serialize_with_mac([0; 4]);
        let parsed = TakionPacket::deserialize(&bytes).unwrap();
        assert!(parsed.payload.is_empty());
    }

    #[test]
    fn too_short_is_rejected() {
        let bytes = [0u8; TAKION_HEADER_LEN + TAKION_MAC_LEN - 1];
        assert_eq!(
            TakionPacket::deserialize(&bytes),
            Err(PacketError::TooShort(bytes.len()))
        );
    }

    #[test]
    fn unknown_type_tag_is_rejected() {
        let mut bytes = vec![0xFFu8, 0, 0, 0, 0, 0];
        bytes.extend_from_slice(&[0; TAKION_MAC_LEN]);
        assert_eq!(
            TakionPacket::deserialize(&bytes),
            Err(PacketError::UnknownType(0xFF))
        );
    }

    #[test]
    fn sequence_roundtrips_across_full_u32_range() {
        for seq in [0u32, 1, u32::MAX / 2, u32::MAX] {
            let pkt = TakionPacket::new(TakionPacketType::Video, 3, seq, vec![9]);
            let bytes = pkt.serialize_with_mac([1, 2, 3, 4]);
            let parsed = TakionPacket::deserialize(&bytes).unwrap();
            assert_eq!(parsed.sequence, seq);
        }
    }

    #[test]
    fn mac_input_excludes_mac_bytes() {
        let pkt = TakionPacket::new(TakionPacketType::Audio, 2, 7, vec![5, 6]);
        let input = pkt.mac_input();
        assert_eq!(input.len(), TAKION_HEADER_LEN + 2);
        assert_eq!(&input[TAKION_HEADER_LEN..], &[5, 6]);
    }
}
