//! Splitting of a write into page sized program operations.

use crate::geometry::ChipGeometry;

/// One page program
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WriteSegment {
    /// Read-modify-write of `len` bytes at `offset` in the first page. Also covers a write
    /// that starts and ends in the same page.
    PartialFirst { page: u32, offset: u32, len: u32 },
    /// Whole page programmed directly through the buffer
    FullPage { page: u32 },
    /// Read-modify-write of the first `len` bytes of the last page
    PartialLast { page: u32, len: u32 },
}

impl WriteSegment {
    pub fn page(&self) -> u32 {
        match *self {
            WriteSegment::PartialFirst { page, .. }
            | WriteSegment::FullPage { page }
            | WriteSegment::PartialLast { page, .. } => page,
        }
    }

    /// Offset of the first byte in the page
    pub fn offset(&self) -> u32 {
        match *self {
            WriteSegment::PartialFirst { offset, .. } => offset,
            _ => 0,
        }
    }

    pub fn len(&self, geometry: &ChipGeometry) -> u32 {
        match *self {
            WriteSegment::PartialFirst { len, .. } | WriteSegment::PartialLast { len, .. } => len,
            WriteSegment::FullPage { .. } => geometry.page_size(),
        }
    }

    pub fn is_read_modify_write(&self) -> bool {
        !matches!(self, WriteSegment::FullPage { .. })
    }
}

/// Segments covering `[address, address + len)` in increasing address order.
#[derive(Debug, Clone)]
pub struct WritePlan {
    page_size: u32,
    cursor: u32,
    end: u32,
    first: bool,
}

impl WritePlan {
    /// Plan a write of `len` bytes at `address`. A range reaching past `u32::MAX` is cut there.
    pub fn new(geometry: &ChipGeometry, address: u32, len: u32) -> Self {
        Self {
            page_size: geometry.page_size(),
            cursor: address,
            end: address.saturating_add(len),
            first: true,
        }
    }
}

impl Iterator for WritePlan {
    type Item = WriteSegment;

    fn next(&mut self) -> Option<WriteSegment> {
        if self.cursor >= self.end {
            return None;
        }
        let page = self.cursor / self.page_size;
        let offset = self.cursor % self.page_size;
        let remaining = self.end - self.cursor;

        if core::mem::take(&mut self.first) && (offset != 0 || remaining < self.page_size) {
            let len = remaining.min(self.page_size - offset);
            self.cursor += len;
            return Some(WriteSegment::PartialFirst { page, offset, len });
        }

        if remaining >= self.page_size {
            self.cursor += self.page_size;
            Some(WriteSegment::FullPage { page })
        } else {
            self.cursor = self.end;
            Some(WriteSegment::PartialLast {
                page,
                len: remaining,
            })
        }
    }
}
