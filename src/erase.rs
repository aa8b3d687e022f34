//! Decomposition of an erase request into sector, block and page erases.

use crate::geometry::{ChipGeometry, OperationKind, Section};

/// One hardware erase
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EraseUnit {
    Sector(u32),
    Block(u32),
    Page(u32),
}

impl EraseUnit {
    fn new(section: Section, index: u32) -> Self {
        match section {
            Section::Sector => EraseUnit::Sector(index),
            Section::Block => EraseUnit::Block(index),
            Section::Page => EraseUnit::Page(index),
        }
    }

    pub fn section(&self) -> Section {
        match self {
            EraseUnit::Sector(_) => Section::Sector,
            EraseUnit::Block(_) => Section::Block,
            EraseUnit::Page(_) => Section::Page,
        }
    }

    pub fn index(&self) -> u32 {
        match *self {
            EraseUnit::Sector(index) | EraseUnit::Block(index) | EraseUnit::Page(index) => index,
        }
    }

    /// First byte erased by this unit
    pub fn start(&self, geometry: &ChipGeometry) -> u32 {
        self.index() * geometry.size_of(self.section())
    }

    /// Bytes erased by this unit
    pub fn len(&self, geometry: &ChipGeometry) -> u32 {
        geometry.size_of(self.section())
    }

    pub fn operation(&self) -> OperationKind {
        match self {
            EraseUnit::Sector(_) => OperationKind::SectorErase,
            EraseUnit::Block(_) => OperationKind::BlockErase,
            EraseUnit::Page(_) => OperationKind::PageErase,
        }
    }
}

const PASSES: [Section; 3] = [Section::Sector, Section::Block, Section::Page];

/// Erase units covering `[address, address + len)` exactly.
///
/// Each unit is the largest one aligned on its own size that still fits the remaining range.
/// All sectors are yielded first, then all blocks, then all pages, each group in increasing
/// address order. The range must be page aligned and inside the device.
#[derive(Debug, Clone)]
pub struct ErasePlan {
    page_size: u32,
    block_size: u32,
    sector_size: u32,
    start: u32,
    end: u32,
    pass: usize,
    cursor: u32,
}

impl ErasePlan {
    /// Plan the erase of `len` bytes from `address`, both page aligned. A range reaching past
    /// `u32::MAX` is cut there.
    pub fn new(geometry: &ChipGeometry, address: u32, len: u32) -> Self {
        Self {
            page_size: geometry.page_size(),
            block_size: geometry.block_size(),
            sector_size: geometry.sector_size(),
            start: address,
            end: address.saturating_add(len),
            pass: 0,
            cursor: address,
        }
    }

    fn size_of(&self, section: Section) -> u32 {
        match section {
            Section::Sector => self.sector_size,
            Section::Block => self.block_size,
            Section::Page => self.page_size,
        }
    }

    /// Largest unit starting at `cursor`
    fn unit_at(&self, cursor: u32) -> Section {
        let remaining = self.end - cursor;
        PASSES
            .into_iter()
            .find(|section| {
                let size = self.size_of(*section);
                cursor % size == 0 && remaining >= size
            })
            .unwrap_or(Section::Page)
    }
}

impl Iterator for ErasePlan {
    type Item = EraseUnit;

    fn next(&mut self) -> Option<EraseUnit> {
        while let Some(&pass) = PASSES.get(self.pass) {
            if self.cursor >= self.end {
                self.pass += 1;
                self.cursor = self.start;
                continue;
            }

            let section = self.unit_at(self.cursor);
            let size = self.size_of(section);
            let unit_start = self.cursor;
            self.cursor = self.cursor.saturating_add(size);

            if section == pass {
                return Some(EraseUnit::new(section, unit_start / size));
            }
        }
        None
    }
}
