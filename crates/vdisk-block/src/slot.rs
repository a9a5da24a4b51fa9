//! Object slot mapping
//!
//! Maps logical VDI byte ranges to the fixed-size object slots that back
//! them.

use vdisk_common::{DEFAULT_OBJECT_SIZE, MAX_DATA_OBJS};

/// A range of bytes within one object slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRange {
    /// Slot index within the VDI
    pub idx: u64,
    /// Byte offset within the object
    pub offset: u64,
    /// Number of bytes in this range
    pub length: u64,
    /// Byte offset of this range within the caller's buffer
    pub buf_offset: u64,
}

/// Maps byte ranges to object slots
///
/// ```text
/// VDI
/// ├── slot 0:  bytes 0 - 4MB       → data object (vid, 0)
/// ├── slot 1:  bytes 4MB - 8MB     → data object (vid, 1)
/// │   ...
/// └── slot N:  ...                 → data object (vid, N)
/// ```
#[derive(Debug, Clone, Copy)]
pub struct SlotMapper {
    object_size: u64,
}

impl Default for SlotMapper {
    fn default() -> Self {
        Self::new(DEFAULT_OBJECT_SIZE)
    }
}

impl SlotMapper {
    /// Create a mapper for objects of `object_size` bytes
    pub fn new(object_size: u64) -> Self {
        assert!(
            object_size.is_power_of_two(),
            "object size must be a power of two"
        );
        Self { object_size }
    }

    /// Object size in bytes
    #[must_use]
    pub const fn object_size(&self) -> u64 {
        self.object_size
    }

    /// Slot index holding `offset`
    #[must_use]
    pub const fn slot_of(&self, offset: u64) -> u64 {
        offset / self.object_size
    }

    /// Iterate over the slot ranges covering `[offset, offset + length)`
    ///
    /// Ranges come out in increasing slot order, are contiguous, and their
    /// lengths add up to `length`.
    #[must_use]
    pub const fn ranges(&self, offset: u64, length: u64) -> SlotRanges {
        SlotRanges {
            object_size: self.object_size,
            pos: offset,
            remaining: length,
            buf_offset: 0,
        }
    }

    /// Number of slots needed for a VDI of `size` bytes
    #[must_use]
    pub const fn slots_for_size(&self, size: u64) -> u64 {
        size.div_ceil(self.object_size)
    }

    /// Largest VDI size this mapper can address
    #[must_use]
    pub const fn max_vdi_size(&self) -> u64 {
        MAX_DATA_OBJS * self.object_size
    }
}

/// Iterator returned by [`SlotMapper::ranges`]
#[derive(Debug, Clone)]
pub struct SlotRanges {
    object_size: u64,
    pos: u64,
    remaining: u64,
    buf_offset: u64,
}

impl Iterator for SlotRanges {
    type Item = SlotRange;

    fn next(&mut self) -> Option<SlotRange> {
        if self.remaining == 0 {
            return None;
        }

        let idx = self.pos / self.object_size;
        let offset = self.pos % self.object_size;
        let length = (self.object_size - offset).min(self.remaining);

        let range = SlotRange {
            idx,
            offset,
            length,
            buf_offset: self.buf_offset,
        };

        self.pos += length;
        self.remaining -= length;
        self.buf_offset += length;
        Some(range)
    }
}
