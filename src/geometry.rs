//! Static description of a DataFlash device: sizes, counts and the address bit layout of
//! each page size mode.

use crate::register::StatusReadout;

/// Value of every byte of an erased page
pub const ERASED_BYTE: u8 = 0xFF;

pub const PAGE_SIZE_BINARY: u32 = 256;
pub const BLOCK_SIZE_BINARY: u32 = 2048;
pub const SECTOR_SIZE_BINARY: u32 = 65536;

pub const PAGE_SIZE_EXTENDED: u32 = 264;
pub const BLOCK_SIZE_EXTENDED: u32 = 2112;
pub const SECTOR_SIZE_EXTENDED: u32 = 67584;

/// Least common multiple of both page sizes, 33 binary or 32 standard pages
pub const PAGE_SIZE_COMMON_MULTIPLE: u32 = 8448;

/// The two page sizing conventions of the chip, switchable by command.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PageSizeMode {
    /// "Power of 2" sizing, 256 bytes per page
    Binary,
    /// Standard DataFlash sizing, 264 bytes per page
    Extended,
}

/// Granularity of the memory array
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Section {
    Page,
    Block,
    Sector,
}

/// Bit layout of an address word: `address_bits` of unit index sitting right above
/// `offset_bits` of byte offset (or don't care bits).
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AddressLayout {
    pub address_bits: u8,
    pub offset_bits: u8,
}

impl AddressLayout {
    pub const fn new(address_bits: u8, offset_bits: u8) -> Self {
        Self {
            address_bits,
            offset_bits,
        }
    }
}

/// Address layouts of one page size mode
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ModeLayout {
    pub page_size: u32,
    pub block_size: u32,
    pub sector_size: u32,
    pub page: AddressLayout,
    pub block: AddressLayout,
    pub sector: AddressLayout,
    /// Sector 0 is split in 0a/0b and is addressed with the block layout
    pub sector0: AddressLayout,
}

/// Typical busy time of each operation in milliseconds, used as the polling interval.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OperationDelays {
    pub page_erase_program: u32,
    pub page_program: u32,
    pub page_erase: u32,
    pub block_erase: u32,
    pub sector_erase: u32,
    pub chip_erase: u32,
}

/// Operations that leave the device busy
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OperationKind {
    PageEraseProgram,
    PageProgram,
    PageErase,
    BlockErase,
    SectorErase,
    ChipErase,
    /// Page size reconfiguration
    Configure,
}

impl OperationDelays {
    pub fn of(&self, operation: OperationKind) -> u32 {
        match operation {
            OperationKind::PageEraseProgram => self.page_erase_program,
            OperationKind::PageProgram => self.page_program,
            OperationKind::PageErase => self.page_erase,
            OperationKind::BlockErase => self.block_erase,
            OperationKind::SectorErase => self.sector_erase,
            OperationKind::ChipErase => self.chip_erase,
            OperationKind::Configure => self.page_erase,
        }
    }
}

/// Geometry of a device, immutable apart from the active page size mode.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChipGeometry {
    pub num_pages: u32,
    pub num_blocks: u32,
    pub num_sectors: u32,
    /// Number of address bytes clocked after each opcode, 3 or 4
    pub address_bytes: u8,
    pub binary: ModeLayout,
    pub extended: ModeLayout,
    pub delays: OperationDelays,
    pub status: StatusReadout,
    mode: PageSizeMode,
}

const AT45_DELAYS: OperationDelays = OperationDelays {
    page_erase_program: 15,
    page_program: 2,
    page_erase: 12,
    block_erase: 30,
    sector_erase: 700,
    chip_erase: 10_000,
};

impl ChipGeometry {
    /// 8Mbit AT45DB081E, see datasheet pages 13-14 for the address layouts.
    pub const AT45DB081E: ChipGeometry = ChipGeometry {
        num_pages: 4096,
        num_blocks: 512,
        num_sectors: 16,
        address_bytes: 3,
        binary: ModeLayout {
            page_size: PAGE_SIZE_BINARY,
            block_size: BLOCK_SIZE_BINARY,
            sector_size: SECTOR_SIZE_BINARY,
            page: AddressLayout::new(12, 8),
            block: AddressLayout::new(9, 11),
            sector: AddressLayout::new(4, 16),
            sector0: AddressLayout::new(9, 11),
        },
        extended: ModeLayout {
            page_size: PAGE_SIZE_EXTENDED,
            block_size: BLOCK_SIZE_EXTENDED,
            sector_size: SECTOR_SIZE_EXTENDED,
            page: AddressLayout::new(12, 9),
            block: AddressLayout::new(9, 12),
            sector: AddressLayout::new(4, 17),
            sector0: AddressLayout::new(9, 12),
        },
        delays: AT45_DELAYS,
        status: StatusReadout::Combined(crate::command::Command::StatusRead as u8),
        mode: PageSizeMode::Extended,
    };

    /// 4Mbit AT45DB041E
    pub const AT45DB041E: ChipGeometry = ChipGeometry {
        num_pages: 2048,
        num_blocks: 256,
        num_sectors: 8,
        address_bytes: 3,
        binary: ModeLayout {
            page_size: PAGE_SIZE_BINARY,
            block_size: BLOCK_SIZE_BINARY,
            sector_size: SECTOR_SIZE_BINARY,
            page: AddressLayout::new(11, 8),
            block: AddressLayout::new(8, 11),
            sector: AddressLayout::new(3, 16),
            sector0: AddressLayout::new(8, 11),
        },
        extended: ModeLayout {
            page_size: PAGE_SIZE_EXTENDED,
            block_size: BLOCK_SIZE_EXTENDED,
            sector_size: SECTOR_SIZE_EXTENDED,
            page: AddressLayout::new(11, 9),
            block: AddressLayout::new(8, 12),
            sector: AddressLayout::new(3, 17),
            sector0: AddressLayout::new(8, 12),
        },
        delays: AT45_DELAYS,
        status: StatusReadout::Combined(crate::command::Command::StatusRead as u8),
        mode: PageSizeMode::Extended,
    };

    /// Same geometry, with the given mode active
    pub const fn with_mode(mut self, mode: PageSizeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn set_mode(&mut self, mode: PageSizeMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> PageSizeMode {
        self.mode
    }

    /// Layout of the active mode
    pub fn layout(&self) -> &ModeLayout {
        match self.mode {
            PageSizeMode::Binary => &self.binary,
            PageSizeMode::Extended => &self.extended,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.layout().page_size
    }

    pub fn block_size(&self) -> u32 {
        self.layout().block_size
    }

    pub fn sector_size(&self) -> u32 {
        self.layout().sector_size
    }

    /// Size in bytes of one unit of `section`
    pub fn size_of(&self, section: Section) -> u32 {
        match section {
            Section::Page => self.page_size(),
            Section::Block => self.block_size(),
            Section::Sector => self.sector_size(),
        }
    }

    /// Number of units of `section` on the device
    pub fn count_of(&self, section: Section) -> u32 {
        match section {
            Section::Page => self.num_pages,
            Section::Block => self.num_blocks,
            Section::Sector => self.num_sectors,
        }
    }

    /// Address layout of `section` in the active mode
    pub fn address_layout(&self, section: Section) -> AddressLayout {
        let layout = self.layout();
        match section {
            Section::Page => layout.page,
            Section::Block => layout.block,
            Section::Sector => layout.sector,
        }
    }

    /// Addressable bytes in the active mode
    pub fn capacity(&self) -> u32 {
        self.num_pages * self.page_size()
    }
}
