#![cfg_attr(not(test), no_std)]
//! This is a platform agnostic library for the Adesto AT45DB DataFlash NOR flash series using [embedded-hal](https://github.com/rust-embedded/embedded-hal).
//!
//! Supported chips:
//! * [AT45DB081E](https://www.dialog-semiconductor.com/sites/default/files/ds-at45db081e-027.pdf)
//! * [AT45DB041E](https://www.dialog-semiconductor.com/sites/default/files/ds-at45db041e-028.pdf)
//!
//! Other members of the family can be described with a custom [`geometry::ChipGeometry`].
//!
//! Both page size conventions of the chip are handled: "binary" 256 byte pages and the
//! standard 264 byte pages, see [`geometry::PageSizeMode`]. Erases are split into the largest
//! sector/block/page erases that tile the range and writes are split in page sized programs,
//! using the on chip read-modify-write for partial pages.

pub mod address;
pub mod asynchronous;
pub mod blocking;
mod command;
pub mod erase;
pub mod error;
pub mod geometry;
pub mod register;
pub mod write;

use crate::{
    error::Error,
    geometry::{ChipGeometry, OperationKind},
    register::{ReadMode, SramBuffer},
};

/// Longest time, in milliseconds, each operation may keep the device busy before giving up.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Timeouts {
    pub page_erase_program: u32,
    pub page_program: u32,
    pub page_erase: u32,
    pub block_erase: u32,
    pub sector_erase: u32,
    pub chip_erase: u32,
    pub configure: u32,
}

impl Timeouts {
    pub fn of(&self, operation: OperationKind) -> u32 {
        match operation {
            OperationKind::PageEraseProgram => self.page_erase_program,
            OperationKind::PageProgram => self.page_program,
            OperationKind::PageErase => self.page_erase,
            OperationKind::BlockErase => self.block_erase,
            OperationKind::SectorErase => self.sector_erase,
            OperationKind::ChipErase => self.chip_erase,
            OperationKind::Configure => self.configure,
        }
    }
}

impl Default for Timeouts {
    /// Datasheet maximums with some margin
    fn default() -> Self {
        Self {
            page_erase_program: 50,
            page_program: 10,
            page_erase: 50,
            block_erase: 150,
            sector_erase: 3_000,
            chip_erase: 40_000,
            configure: 50,
        }
    }
}

/// Driver settings that do not depend on the chip
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Config {
    /// Opcode used by `read`
    pub read_mode: ReadMode,
    /// SRAM buffer `write` goes through
    pub write_buffer: SramBuffer,
    pub timeouts: Timeouts,
}

pub(crate) fn check_read<E>(
    geometry: &ChipGeometry,
    address: u32,
    length: usize,
) -> Result<u32, Error<E>> {
    if length == 0 {
        return Err(Error::InvalidArgument);
    }
    let length = u32::try_from(length).map_err(|_| Error::Overrun)?;
    match address.checked_add(length) {
        Some(end) if end <= geometry.capacity() => Ok(length),
        _ => Err(Error::Overrun),
    }
}

pub(crate) fn check_write<E>(
    geometry: &ChipGeometry,
    address: u32,
    length: usize,
) -> Result<u32, Error<E>> {
    check_read(geometry, address, length)
}

/// `length` bytes at `offset` inside a single page or SRAM buffer
pub(crate) fn check_page_span<E>(
    geometry: &ChipGeometry,
    offset: u32,
    length: usize,
) -> Result<u32, Error<E>> {
    let length = u32::try_from(length).map_err(|_| Error::InvalidArgument)?;
    match offset.checked_add(length) {
        Some(end) if length > 0 && end <= geometry.page_size() => Ok(length),
        _ => Err(Error::InvalidArgument),
    }
}

/// Erases work on whole pages, both ends of the range must sit on a page boundary
pub(crate) fn check_erase<E>(
    geometry: &ChipGeometry,
    address: u32,
    length: u32,
) -> Result<(), Error<E>> {
    let page_size = geometry.page_size();
    if length == 0 || address % page_size != 0 || length % page_size != 0 {
        return Err(Error::InvalidArgument);
    }
    check_read(geometry, address, length as usize).map(|_| ())
}
