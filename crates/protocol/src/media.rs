//! Media datagram headers (C7): the 16-byte video unit header and the Opus
//! audio unit header. Both are pure byte-layout types; encryption and FEC
//! live in `remoteplay-core`, this module only knows the wire shape.

use thiserror::Error;

pub const VIDEO_HEADER_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MediaHeaderError {
    #[error("video header too short: {0} bytes, need {VIDEO_HEADER_LEN}")]
    VideoTooShort(usize),
    #[error("audio header too short: {0} bytes, need {AUDIO_HEADER_LEN}")]
    AudioTooShort(usize),
}

bitflags::bitflags! {
    /// `codec_flags` byte: key/ref/HDR bits (§4.7).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CodecFlags: u8 {
        const KEY_FRAME = 0b0000_0001;
        const REFERENCE = 0b0000_0010;
        const HDR        = 0b0000_0100;
    }
}

/// The 16-byte header carried by every video datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoUnitHeader {
    pub frame_index: u16,
    pub packet_index: u16,
    pub unit_count_total: u8,
    pub unit_count_fec: u8,
    pub codec_flags: CodecFlags,
    pub fec_index: u8,
    pub frame_size: u32,
    /// Reserved/padding to round the header out to 16 bytes; carried
    /// through so re-serialization is byte-exact.
    pub reserved: [u8; 6],
}

impl VideoUnitHeader {
    /// Number of data (non-parity) units for this frame: `k` in §4.7.
    pub fn data_unit_count(&self) -> u8 {
        self.unit_count_total - self.unit_count_fec
    }

    pub fn is_key_frame(&self) -> bool {
        self.codec_flags.contains(CodecFlags::KEY_FRAME)
    }

    pub fn encode(&self) -> [u8; VIDEO_HEADER_LEN] {
        let mut buf = [0u8; VIDEO_HEADER_LEN];
        buf[0..2].copy_from_slice(&self.frame_index.to_be_bytes());
        buf[2..4].copy_from_slice(&self.packet_index.to_be_bytes());
        buf[4] = self.unit_count_total;
        buf[5] = self.unit_count_fec;
        buf[6] = self.codec_flags.bits();
        buf[7] = self.fec_index;
        buf[8..12].copy_from_slice(&self.frame_size.to_be_bytes());
        buf[12..16].copy_from_slice(&self.reserved[0..4]);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MediaHeaderError> {
        if bytes.len() < VIDEO_HEADER_LEN {
            return Err(MediaHeaderError::VideoTooShort(bytes.len()));
        }
        let frame_index = u16::from_be_bytes([bytes[0], bytes[1]]);
        let packet_index = u16::from_be_bytes([bytes[2], bytes[3]]);
        let unit_count_total = bytes[4];
        let unit_count_fec = bytes[5];
        let codec_flags = CodecFlags::from_bits_truncate(bytes[6]);
        let fec_index = bytes[7];
        let frame_size = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let mut reserved = [0u8; 6];
        reserved[0..4].copy_from_slice(&bytes[12..16]);
        Ok(Self {
            frame_index,
            packet_index,
            unit_count_total,
            unit_count_fec,
            codec_flags,
            fec_index,
            frame_size,
            reserved,
        })
    }
}

pub const AUDIO_HEADER_LEN: usize = 8;

/// Header carried by every Opus audio datagram: `(frame_index,
/// sample_position)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioUnitHeader {
    pub frame_index: u16,
    pub sample_position: u32,
    pub reserved: u16,
}

impl AudioUnitHeader {
    pub fn encode(&self) -> [u8; AUDIO_HEADER_LEN] {
        let mut buf = [0u8; AUDIO_HEADER_LEN];
        buf[0..2].copy_from_slice(&self.frame_index.to_be_bytes());
        buf[2..6].copy_from_slice(&self.sample_position.to_be_bytes());
        buf[6..8].copy_from_slice(&self.reserved.to_be_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MediaHeaderError> {
        if bytes.len() < AUDIO_HEADER_LEN {
            return Err(MediaHeaderError::AudioTooShort(bytes.len()));
        }
        Ok(Self {
            frame_index: u16::from_be_bytes([bytes[0], bytes[1]]),
            sample_position: u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
            reserved: u16::from_be_bytes([bytes[6], bytes[7]]),
        })
    }
}

/// Codec carried by an emitted video frame (AV sink interface, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    Hevc,
    HevcHdr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_header_roundtrips() {
        let header = VideoUnitHeader {
            frame_index: 1234,
            packet_index: 7,
            unit_count_total: 10,
            unit_count_fec: 2,
            codec_flags: CodecFlags::KEY_FRAME | CodecFlags::REFERENCE,
            fec_index: 1,
            frame_size: 98765,
            reserved: [0; 6],
        };
        let bytes = header.encode();
        assert_eq!(bytes.len(), VIDEO_HEADER_LEN);
        let parsed = VideoUnitHeader::decode(&bytes).unwrap();
        assert_eq!(parsed.frame_index, 1234);
        assert_eq!(parsed.packet_index, 7);
        assert_eq!(parsed.data_unit_count(), 8);
        assert!(parsed.is_key_frame());
        assert_eq!(parsed.frame_size, 98765);
    }

    #[test]
    fn video_header_wraps_frame_index_at_u16_max() {
        let header = VideoUnitHeader {
            frame_index: 65535,
            packet_index: 0,
            unit_count_total: 1,
            unit_count_fec: 0,
            codec_flags: CodecFlags::empty(),
            fec_index: 0,
            frame_size: 10,
            reserved: [0; 6],
        };
        let bytes = header.encode();
        let parsed = VideoUnitHeader::decode(&bytes).unwrap();
        assert_eq!(parsed.frame_index, 65535);
        assert_eq!(parsed.frame_index.wrapping_add(1), 0);
    }

    #[test]
    fn video_header_too_short_is_rejected() {
        let bytes = [0u8; VIDEO_HEADER_LEN - 1];
        assert_eq!(
            VideoUnitHeader::decode(&bytes),
            Err(MediaHeaderError::VideoTooShort(bytes.len()))
        );
    }

    #[test]
    fn audio_header_roundtrips() {
        let header = AudioUnitHeader {
            frame_index: 42,
            sample_position: 480_000,
            reserved: 0,
        };
        let bytes = header.encode();
        let parsed = AudioUnitHeader::decode(&bytes).unwrap();
        assert_eq!(parsed.frame_index, 42);
        assert_eq!(parsed.sample_position, 480_000);
    }

    #[test]
    fn non_key_frame_reports_false() {
        let header = VideoUnitHeader {
            frame_index: 0,
            packet_index: 0,
            unit_count_total: 5,
            unit_count_fec: 1,
            codec_flags: CodecFlags::REFERENCE,
            fec_index: 0,
            frame_size: 0,
            reserved: [0; 6],
        };
        assert!(!header.is_key_frame());
        assert_eq!(header.data_unit_count(), 4);
    }
}
