#![allow(clippy::unusual_byte_groupings)]

use super::{PacketError, PacketView};

/// Size of the RTP header without CSRCs or extensions.
pub const FIXED_HEADER_SIZE: usize = 12;

/// RTP and RTCP are both version 2.
pub const RTP_VERSION: u8 = 2;

/// The CSRC count is a 4 bit field.
pub const MAX_CSRC_COUNT: usize = 15;

const PADDING_BIT: u8 = 0b00_1_0_0000;
const EXTENSION_BIT: u8 = 0b00_0_1_0000;
const CSRC_COUNT_MASK: u8 = 0b00_0_0_1111;
const MARKER_BIT: u8 = 0b1000_0000;
const PT_MASK: u8 = 0b0111_1111;

const SEQUENCE_OFFSET: usize = 2;
const TIMESTAMP_OFFSET: usize = 4;
const SSRC_OFFSET: usize = 8;

impl PacketView {
    /// The version field, top 2 bits of the first byte.
    pub fn version(&self) -> u8 {
        self.read_u8(0).unwrap_or(0) >> 6
    }

    /// Whether the packet is a structurally valid RTP (not RTCP) packet.
    pub fn is_rtp(&self) -> bool {
        !self.is_invalid() && self.version() == RTP_VERSION && !self.looks_like_rtcp()
    }

    /// Padding bit.
    pub fn has_padding(&self) -> bool {
        self.read_u8(0).unwrap_or(0) & PADDING_BIT > 0
    }

    /// Number of padding bytes at the end of the packet, as given by the last byte.
    ///
    /// 0 if the padding bit is not set.
    pub fn padding_size(&self) -> usize {
        if !self.has_padding() || self.is_empty() {
            return 0;
        }
        self.read_u8(self.len() - 1).unwrap_or(0) as usize
    }

    /// Extension bit.
    pub fn has_extension(&self) -> bool {
        self.read_u8(0).unwrap_or(0) & EXTENSION_BIT > 0
    }

    pub(crate) fn set_extension_bit(&mut self, on: bool) {
        let Some(b) = self.read_u8(0) else {
            return;
        };
        let b = if on {
            b | EXTENSION_BIT
        } else {
            b & !EXTENSION_BIT
        };
        let _ = self.write_u8(0, b);
    }

    /// Number of CSRC entries, low 4 bits of the first byte.
    pub fn csrc_count(&self) -> usize {
        (self.read_u8(0).unwrap_or(0) & CSRC_COUNT_MASK) as usize
    }

    /// Marker bit.
    pub fn marker(&self) -> bool {
        self.read_u8(1).unwrap_or(0) & MARKER_BIT > 0
    }

    /// Set or clear the marker bit.
    pub fn set_marker(&mut self, marker: bool) -> Result<(), PacketError> {
        let b = self.read_u8(1).ok_or(PacketError::Invalid)?;
        let b = if marker {
            b | MARKER_BIT
        } else {
            b & !MARKER_BIT
        };
        self.write_u8(1, b)
    }

    /// Payload type, 7 bits.
    pub fn payload_type(&self) -> u8 {
        self.read_u8(1).unwrap_or(0) & PT_MASK
    }

    /// Set the payload type, keeping the marker bit.
    pub fn set_payload_type(&mut self, pt: u8) -> Result<(), PacketError> {
        let b = self.read_u8(1).ok_or(PacketError::Invalid)?;
        self.write_u8(1, (b & MARKER_BIT) | (pt & PT_MASK))
    }

    /// Sequence number.
    pub fn sequence_number(&self) -> u16 {
        self.read_u16(SEQUENCE_OFFSET).unwrap_or(0)
    }

    /// Set the sequence number.
    pub fn set_sequence_number(&mut self, seq: u16) -> Result<(), PacketError> {
        self.write_u16(SEQUENCE_OFFSET, seq)
    }

    /// RTP timestamp.
    pub fn timestamp(&self) -> u32 {
        self.read_u32(TIMESTAMP_OFFSET).unwrap_or(0)
    }

    /// Set the RTP timestamp.
    pub fn set_timestamp(&mut self, ts: u32) -> Result<(), PacketError> {
        self.write_u32(TIMESTAMP_OFFSET, ts)
    }

    /// Sender source identifier.
    pub fn ssrc(&self) -> u32 {
        self.read_u32(SSRC_OFFSET).unwrap_or(0)
    }

    /// Set the SSRC.
    pub fn set_ssrc(&mut self, ssrc: u32) -> Result<(), PacketError> {
        self.write_u32(SSRC_OFFSET, ssrc)
    }

    /// The CSRC entries.
    ///
    /// Entries the packet is too short to hold are left out.
    pub fn csrc_list(&self) -> Vec<u32> {
        (0..self.csrc_count())
            .map_while(|i| self.read_u32(FIXED_HEADER_SIZE + i * 4))
            .collect()
    }

    /// Replace the CSRC list, moving the extension and payload as needed.
    pub fn set_csrc_list(&mut self, csrcs: &[u32]) -> Result<(), PacketError> {
        if csrcs.len() > MAX_CSRC_COUNT {
            return Err(PacketError::TooManyCsrcs(csrcs.len()));
        }
        if self.is_invalid() {
            return Err(PacketError::Invalid);
        }

        let old_len = self.csrc_count() * 4;
        if FIXED_HEADER_SIZE + old_len > self.len() {
            return Err(PacketError::Invalid);
        }

        let bytes: Vec<u8> = csrcs.iter().flat_map(|c| c.to_be_bytes()).collect();
        self.splice(FIXED_HEADER_SIZE, old_len, &bytes);

        let b = self.read_u8(0).ok_or(PacketError::Invalid)?;
        self.write_u8(0, (b & !CSRC_COUNT_MASK) | csrcs.len() as u8)
    }

    /// Total header size: fixed part, CSRCs and extension block.
    pub fn header_length(&self) -> usize {
        let mut len = FIXED_HEADER_SIZE + self.csrc_count() * 4;
        if self.has_extension() {
            len += super::EXTENSION_HEADER_SIZE + self.extension_length();
        }
        len
    }

    /// Offset of the payload relative to the packet start.
    pub fn payload_offset(&self) -> usize {
        self.header_length()
    }

    /// Payload size, excluding header and padding.
    pub fn payload_length(&self) -> usize {
        self.len()
            .saturating_sub(self.header_length())
            .saturating_sub(self.padding_size())
    }

    /// The payload bytes, excluding padding.
    ///
    /// Empty for packets whose header claims more than the packet holds.
    pub fn payload(&self) -> &[u8] {
        let start = self.payload_offset();
        let len = self.payload_length();
        if start + len > self.len() {
            return &[];
        }
        &self.as_slice()[start..start + len]
    }

    /// The payload bytes, mutably.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let start = self.payload_offset();
        let len = self.payload_length();
        if start + len > self.len() {
            return &mut [];
        }
        &mut self.as_mut_slice()[start..start + len]
    }
}
