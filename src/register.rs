use bit::BitIndex;

use crate::geometry::PageSizeMode;

/// JEDEC manufacturer code of Adesto
pub const JEDEC_ADESTO: u8 = 0x1F;

/// How the 16 bit status register is clocked out
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StatusReadout {
    /// One opcode followed by both bytes, high byte first (AT45)
    Combined(u8),
    /// Two 8 bit reads with distinct opcodes
    Split { high: u8, low: u8 },
}

/// Decoded status register. Read fresh on every poll.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRegister {
    pub ready: bool,
    pub compare_mismatch: bool,
    pub sector_protection: bool,
    pub binary_page_size: bool,
    pub erase_program_error: bool,
    pub sector_lockdown_enabled: bool,
    pub buffer2_program_suspended: bool,
    pub buffer1_program_suspended: bool,
    pub erase_suspended: bool,
    /// Raw register value, for diagnostics
    pub raw: u16,
}

impl StatusRegister {
    /// Active page size configuration
    pub fn page_size_mode(&self) -> PageSizeMode {
        if self.binary_page_size {
            PageSizeMode::Binary
        } else {
            PageSizeMode::Extended
        }
    }
}

impl From<u16> for StatusRegister {
    fn from(val: u16) -> StatusRegister {
        StatusRegister {
            ready: val.bit(15),
            compare_mismatch: val.bit(14),
            sector_protection: val.bit(9),
            binary_page_size: val.bit(8),
            erase_program_error: val.bit(5),
            sector_lockdown_enabled: val.bit(3),
            buffer2_program_suspended: val.bit(2),
            buffer1_program_suspended: val.bit(1),
            erase_suspended: val.bit(0),
            raw: val,
        }
    }
}

impl From<[u8; 2]> for StatusRegister {
    fn from(bytes: [u8; 2]) -> StatusRegister {
        u16::from_be_bytes(bytes).into()
    }
}

/// One of the two SRAM page buffers
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SramBuffer {
    #[default]
    Buffer1,
    Buffer2,
}

/// Continuous array read opcode, each higher clock rate needs more dummy bytes
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// `0x03`, no dummy byte
    #[default]
    LowFrequency,
    /// `0x0B`, one dummy byte
    HighFrequency,
    /// `0x1B`, two dummy bytes
    HighFrequencyMax,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub manufacturer_id: u8,
    /// Upper 3 bits of device id byte 1
    pub family_code: u8,
    /// Lower 5 bits of device id byte 1
    pub density_code: u8,
    /// Upper 3 bits of device id byte 2
    pub sub_code: u8,
    /// Lower 5 bits of device id byte 2
    pub product_variant: u8,
}

impl DeviceInfo {
    pub fn is_adesto(&self) -> bool {
        self.manufacturer_id == JEDEC_ADESTO
    }
}

impl From<[u8; 3]> for DeviceInfo {
    fn from(id: [u8; 3]) -> DeviceInfo {
        DeviceInfo {
            manufacturer_id: id[0],
            family_code: id[1].bit_range(5..8),
            density_code: id[1].bit_range(0..5),
            sub_code: id[2].bit_range(5..8),
            product_variant: id[2].bit_range(0..5),
        }
    }
}
