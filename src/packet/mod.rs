//! Wire-format RTP/RTCP packets over an owned byte buffer.
//!
//! A [`PacketView`] is a window `[offset, offset + length)` into a backing
//! buffer that may be larger than the packet itself. Header fields are read
//! and written in place; operations that move the payload (header extension
//! and CSRC edits) use spare room in the buffer when there is some, and
//! otherwise copy the valid region into a new, larger buffer.

use std::fmt;

use thiserror::Error;

mod header;
pub use header::{FIXED_HEADER_SIZE, MAX_CSRC_COUNT, RTP_VERSION};

mod ext;
pub use ext::{AudioLevel, ExtensionElements, ExtensionsForm};
pub use ext::{AUDIO_LEVEL_SILENT, EXTENSION_HEADER_SIZE};

mod rtcp;
pub use rtcp::{RtcpHeaderView, RtcpPackets, RtcpType};

/// Errors from manipulating a [`PacketView`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// A field access falls outside the valid packet region.
    #[error("Field at {offset} of size {size} is outside packet of length {len}")]
    OutOfBounds {
        /// Field offset relative to the packet start.
        offset: usize,
        /// Size of the field in bytes.
        size: usize,
        /// Length of the packet.
        len: usize,
    },

    /// The requested `(offset, length)` does not fit the buffer.
    #[error("Range {offset}+{length} exceeds buffer of {capacity} bytes")]
    BadRange {
        /// Requested offset.
        offset: usize,
        /// Requested length.
        length: usize,
        /// Size of the backing buffer.
        capacity: usize,
    },

    /// Operation requires a structurally valid packet.
    #[error("Packet is invalid")]
    Invalid,

    /// Header extension id 0 is reserved for padding.
    #[error("Invalid header extension id: {0}")]
    ExtensionId(u8),

    /// Header extension element data too large for any form.
    #[error("Header extension element too large: {0} bytes")]
    ExtensionTooLarge(usize),

    /// The packet carries an extension block with a profile we don't know.
    #[error("Unknown header extension profile: {0:#06x}")]
    UnknownExtensionProfile(u16),

    /// More than 15 CSRC entries.
    #[error("Too many CSRC entries: {0}")]
    TooManyCsrcs(usize),
}

/// A single packet view over a backing buffer.
///
/// The view owns its buffer. Handing a packet to another component moves it,
/// so two threads can never mutate the same packet.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PacketView {
    buffer: Vec<u8>,
    offset: usize,
    length: usize,
    flags: u32,
}

impl PacketView {
    /// Flag marking a packet that should not be forwarded.
    pub const FLAG_DISCARD: u32 = 0x1;

    /// An empty view without a backing buffer.
    ///
    /// Such a packet is always [invalid](Self::is_invalid).
    pub fn new() -> Self {
        PacketView::default()
    }

    /// View covering the entire vector.
    pub fn from_vec(buffer: Vec<u8>) -> Self {
        let length = buffer.len();
        PacketView {
            buffer,
            offset: 0,
            length,
            flags: 0,
        }
    }

    /// View over `length` bytes of `buffer` starting at `offset`.
    pub fn with_range(buffer: Vec<u8>, offset: usize, length: usize) -> Result<Self, PacketError> {
        let fits = offset
            .checked_add(length)
            .map(|end| end <= buffer.len())
            .unwrap_or(false);

        if !fits {
            return Err(PacketError::BadRange {
                offset,
                length,
                capacity: buffer.len(),
            });
        }

        Ok(PacketView {
            buffer,
            offset,
            length,
            flags: 0,
        })
    }

    /// Copy `data` into a new, exactly sized buffer.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        PacketView::from_vec(data.to_vec())
    }

    /// Offset of the packet start in the backing buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length of the packet.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Whether the packet has zero length.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Size of the backing buffer.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bit attributes of the packet.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Replace all bit attributes.
    pub fn set_flags(&mut self, flags: u32) {
        self.flags = flags;
    }

    /// Whether every bit in `flag` is set.
    pub fn is_flag_set(&self, flag: u32) -> bool {
        self.flags & flag == flag
    }

    /// The whole backing buffer, including bytes outside the packet.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// The packet bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[self.offset..self.offset + self.length]
    }

    /// The packet bytes, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buffer[self.offset..self.offset + self.length]
    }

    /// Whether the view can't be treated as a packet at all.
    ///
    /// True when there is no backing buffer, the buffer is shorter than the
    /// view claims, or the view is shorter than a fixed RTP header.
    pub fn is_invalid(&self) -> bool {
        self.buffer.is_empty()
            || self.buffer.len() < self.offset + self.length
            || self.length < FIXED_HEADER_SIZE
    }

    /// Read the byte at `field` relative to the packet start.
    pub fn read_u8(&self, field: usize) -> Option<u8> {
        self.field(field, 1).map(|b| b[0])
    }

    /// Read a big-endian u16 at `field`.
    pub fn read_u16(&self, field: usize) -> Option<u16> {
        self.field(field, 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    /// Read a big-endian u32 at `field`.
    pub fn read_u32(&self, field: usize) -> Option<u32> {
        self.field(field, 4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Write the byte at `field`.
    pub fn write_u8(&mut self, field: usize, v: u8) -> Result<(), PacketError> {
        self.field_mut(field, 1)?[0] = v;
        Ok(())
    }

    /// Write a big-endian u16 at `field`.
    pub fn write_u16(&mut self, field: usize, v: u16) -> Result<(), PacketError> {
        self.field_mut(field, 2)?.copy_from_slice(&v.to_be_bytes());
        Ok(())
    }

    /// Write a big-endian u32 at `field`.
    pub fn write_u32(&mut self, field: usize, v: u32) -> Result<(), PacketError> {
        self.field_mut(field, 4)?.copy_from_slice(&v.to_be_bytes());
        Ok(())
    }

    fn in_bounds(&self, field: usize, size: usize) -> bool {
        let fits = field
            .checked_add(size)
            .map(|end| end <= self.length)
            .unwrap_or(false);

        fits && self.offset + self.length <= self.buffer.len()
    }

    fn field(&self, field: usize, size: usize) -> Option<&[u8]> {
        if !self.in_bounds(field, size) {
            return None;
        }
        let start = self.offset + field;
        Some(&self.buffer[start..start + size])
    }

    fn field_mut(&mut self, field: usize, size: usize) -> Result<&mut [u8], PacketError> {
        if !self.in_bounds(field, size) {
            return Err(PacketError::OutOfBounds {
                offset: field,
                size,
                len: self.length,
            });
        }
        let start = self.offset + field;
        Ok(&mut self.buffer[start..start + size])
    }

    /// Append bytes to the end of the packet.
    pub fn append(&mut self, data: &[u8]) {
        self.grow(data.len());
        let end = self.offset + self.length;
        self.buffer[end..end + data.len()].copy_from_slice(data);
        self.length += data.len();
    }

    /// Make room for at least `n` more bytes after the packet.
    ///
    /// The length is unchanged. If the buffer is too small, the packet is
    /// copied to the start of a new buffer.
    pub fn grow(&mut self, n: usize) {
        let needed = self.offset + self.length + n;
        if needed <= self.buffer.len() {
            return;
        }

        let mut buffer = vec![0; self.length + n];
        buffer[..self.length].copy_from_slice(self.valid_region());
        self.buffer = buffer;
        self.offset = 0;
    }

    /// Reduce the length by `n`, clamping at zero.
    pub fn shrink(&mut self, n: usize) {
        self.length = self.length.saturating_sub(n);
    }

    /// Replace the packet contents with `data`.
    ///
    /// Reuses the backing buffer when it is large enough.
    pub fn set_data(&mut self, data: &[u8]) {
        if self.buffer.len() < data.len() {
            self.buffer = vec![0; data.len()];
        }
        self.buffer[..data.len()].copy_from_slice(data);
        self.offset = 0;
        self.length = data.len();
    }

    /// Clear offset, length and flags, keeping the backing buffer.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.length = 0;
        self.flags = 0;
    }

    /// Give up the backing buffer.
    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }

    /// Valid bytes, tolerating a view that overruns its buffer.
    fn valid_region(&self) -> &[u8] {
        let start = self.offset.min(self.buffer.len());
        let end = (self.offset + self.length).min(self.buffer.len());
        &self.buffer[start..end]
    }

    /// Replace `remove` bytes at `at` (relative to the packet start) with `insert`.
    ///
    /// Bytes after the replaced range keep their order. Uses spare room in
    /// the buffer if there is any, otherwise reallocates.
    pub(crate) fn splice(&mut self, at: usize, remove: usize, insert: &[u8]) {
        debug_assert!(at + remove <= self.length);

        let abs = self.offset + at;
        let tail_start = abs + remove;
        let tail_end = self.offset + self.length;

        if insert.len() <= remove {
            let shrink_by = remove - insert.len();
            self.buffer[abs..abs + insert.len()].copy_from_slice(insert);
            self.buffer
                .copy_within(tail_start..tail_end, abs + insert.len());
            self.length -= shrink_by;
            return;
        }

        let grow_by = insert.len() - remove;

        if tail_end + grow_by <= self.buffer.len() {
            self.buffer
                .copy_within(tail_start..tail_end, tail_start + grow_by);
            self.buffer[abs..abs + insert.len()].copy_from_slice(insert);
        } else {
            let mut buffer = Vec::with_capacity(self.length + grow_by);
            buffer.extend_from_slice(&self.buffer[self.offset..abs]);
            buffer.extend_from_slice(insert);
            buffer.extend_from_slice(&self.buffer[tail_start..tail_end]);
            self.buffer = buffer;
            self.offset = 0;
        }

        self.length += grow_by;
    }
}

impl From<Vec<u8>> for PacketView {
    fn from(value: Vec<u8>) -> Self {
        PacketView::from_vec(value)
    }
}

impl AsRef<[u8]> for PacketView {
    fn as_ref(&self) -> &[u8] {
        self.valid_region()
    }
}

impl fmt::Debug for PacketView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            return f
                .debug_struct("PacketView")
                .field("offset", &self.offset)
                .field("len", &self.length)
                .field("capacity", &self.buffer.len())
                .field("invalid", &true)
                .finish();
        }

        f.debug_struct("PacketView")
            .field("offset", &self.offset)
            .field("len", &self.length)
            .field("flags", &self.flags)
            .field("pt", &self.payload_type())
            .field("seq", &self.sequence_number())
            .field("ts", &self.timestamp())
            .field("ssrc", &self.ssrc())
            .finish()
    }
}
