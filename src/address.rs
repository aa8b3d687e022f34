//! Conversion between linear byte addresses, page/block/sector indices and the bit packed
//! address words clocked after each opcode.

use bit::BitIndex;

use crate::{
    error::Error,
    geometry::{AddressLayout, ChipGeometry, Section},
};

/// Address word as sent on the wire, most significant byte first
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PackedAddress {
    bytes: [u8; 4],
    len: usize,
}

impl PackedAddress {
    /// Split `word` into `address_bytes` bytes, MSB first.
    ///
    /// The bytes are extracted one by one: copying the `u32` from memory would put them in
    /// the little endian order of the host, which the chip reads as a different address.
    pub fn from_word(word: u32, address_bytes: u8) -> Self {
        let len = (address_bytes as usize).min(4);
        let mut bytes = [0; 4];
        for (i, byte) in bytes[..len].iter_mut().enumerate() {
            let shift = 8 * (len - 1 - i);
            *byte = (word >> shift) as u8;
        }
        Self { bytes, len }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// The address word back as an integer
    pub fn word(&self) -> u32 {
        self.as_bytes()
            .iter()
            .fold(0, |word, byte| (word << 8) | *byte as u32)
    }
}

/// Address words of a sector erase. Sector 0 is two hardware regions, 0a and 0b, each
/// erased by its own command.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SectorAddress {
    Single(PackedAddress),
    Split { a: PackedAddress, b: PackedAddress },
}

impl SectorAddress {
    pub fn iter(&self) -> impl Iterator<Item = PackedAddress> {
        let (first, second) = match *self {
            SectorAddress::Single(address) => (address, None),
            SectorAddress::Split { a, b } => (a, Some(b)),
        };
        core::iter::once(first).chain(second)
    }
}

fn check_unit<E>(geometry: &ChipGeometry, section: Section, unit: u32) -> Result<(), Error<E>> {
    if unit >= geometry.count_of(section) {
        return Err(Error::InvalidSection);
    }
    Ok(())
}

/// Low `bits` bits set, all of them from 32 on
fn mask(bits: u32) -> u32 {
    u32::MAX.checked_shr(32 - bits.min(32)).unwrap_or(0)
}

/// Fields that do not fit in 32 bits are cut at the top of the word.
fn pack_word(layout: AddressLayout, unit: u32, offset: u32) -> u32 {
    let start = (layout.offset_bits as u32).min(32);
    let width = (layout.address_bits as u32).min(32 - start);

    let mut word = offset & mask(start);
    match width {
        0 => {}
        32 => word = unit,
        _ => {
            let start = start as usize;
            word.set_bit_range(start..start + width as usize, unit & mask(width));
        }
    }
    word
}

/// Index of the `section` unit holding `address`.
pub fn unit_from_address<E>(
    geometry: &ChipGeometry,
    section: Section,
    address: u32,
) -> Result<u32, Error<E>> {
    let unit = address / geometry.size_of(section);
    check_unit(geometry, section, unit)?;
    Ok(unit)
}

/// First byte address of a `section` unit
pub fn unit_start_address(geometry: &ChipGeometry, section: Section, unit: u32) -> u32 {
    unit * geometry.size_of(section)
}

/// Build the address word of `unit` with a byte `offset`, using the layout of `section` in
/// the active mode. The offset only has meaning for pages and buffers.
pub fn pack_address<E>(
    geometry: &ChipGeometry,
    section: Section,
    unit: u32,
    offset: u32,
) -> Result<PackedAddress, Error<E>> {
    check_unit(geometry, section, unit)?;
    if offset >= geometry.size_of(section) {
        return Err(Error::InvalidArgument);
    }
    let word = pack_word(geometry.address_layout(section), unit, offset);
    Ok(PackedAddress::from_word(word, geometry.address_bytes))
}

/// Address of an SRAM buffer byte, the page bits are don't care
pub fn pack_buffer_offset<E>(geometry: &ChipGeometry, offset: u32) -> Result<PackedAddress, Error<E>> {
    pack_address(geometry, Section::Page, 0, offset)
}

/// Address word(s) of a sector erase.
pub fn sector_erase_address<E>(
    geometry: &ChipGeometry,
    sector: u32,
) -> Result<SectorAddress, Error<E>> {
    check_unit(geometry, Section::Sector, sector)?;
    let bytes = geometry.address_bytes;

    if sector == 0 {
        // 0a is the first block, 0b starts at block 1
        let layout = geometry.layout().sector0;
        return Ok(SectorAddress::Split {
            a: PackedAddress::from_word(0, bytes),
            b: PackedAddress::from_word(
                1u32.checked_shl(layout.offset_bits as u32).unwrap_or(0),
                bytes,
            ),
        });
    }

    let word = pack_word(geometry.layout().sector, sector, 0);
    Ok(SectorAddress::Single(PackedAddress::from_word(word, bytes)))
}
