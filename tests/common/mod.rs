//! Simulated AT45DB081E behind a mock SPI bus and chip select.
//!
//! The bus only records bytes; the command is decoded when the chip select goes high, or
//! when the host starts clocking data out.

#![allow(dead_code)]

use std::{cell::RefCell, convert::Infallible, rc::Rc};

use at45db::geometry::{ChipGeometry, PageSizeMode};
use embedded_hal::{delay::DelayNs, digital, spi};
use embedded_hal_bus::spi::{ExclusiveDevice, NoDelay};

pub const PAGES: usize = 4096;
const PHYSICAL_PAGE: usize = 264;
const PAGES_PER_BLOCK: usize = 8;
const PAGES_PER_SECTOR: usize = 256;

/// Busy times in ms, the typical values of the datasheet
const PAGE_ERASE_PROGRAM_MS: u64 = 15;
const PAGE_PROGRAM_MS: u64 = 2;
const PAGE_ERASE_MS: u64 = 12;
const BLOCK_ERASE_MS: u64 = 30;
const SECTOR_ERASE_MS: u64 = 700;
const CHIP_ERASE_MS: u64 = 10_000;
const CONFIGURE_MS: u64 = 12;

const NS_PER_MS: u64 = 1_000_000;

pub struct Sim {
    memory: Vec<u8>,
    buffers: [Vec<u8>; 2],
    binary: bool,
    now_ns: u64,
    busy_until_ns: u64,
    error: bool,
    selected: bool,
    frame: Vec<u8>,
    clocked_out: usize,

    /// Every frame sent, opcode first
    pub frames: Vec<Vec<u8>>,
    /// Erase and program commands that hit one of these pages fail
    pub failing_pages: Vec<usize>,
    /// Never report ready
    pub stuck_busy: bool,
    /// Commands other than a status read received while busy
    pub busy_violations: usize,
    /// Milliseconds asked from the delay
    pub waited_ms: u64,
}

impl Sim {
    pub fn new(mode: PageSizeMode) -> Rc<RefCell<Sim>> {
        Rc::new(RefCell::new(Sim {
            memory: vec![0xFF; PAGES * PHYSICAL_PAGE],
            buffers: [vec![0xFF; PHYSICAL_PAGE], vec![0xFF; PHYSICAL_PAGE]],
            binary: mode == PageSizeMode::Binary,
            now_ns: 0,
            busy_until_ns: 0,
            error: false,
            selected: false,
            frame: Vec::new(),
            clocked_out: 0,
            frames: Vec::new(),
            failing_pages: Vec::new(),
            stuck_busy: false,
            busy_violations: 0,
            waited_ms: 0,
        }))
    }

    pub fn page_size(&self) -> usize {
        if self.binary {
            256
        } else {
            PHYSICAL_PAGE
        }
    }

    pub fn mode(&self) -> PageSizeMode {
        if self.binary {
            PageSizeMode::Binary
        } else {
            PageSizeMode::Extended
        }
    }

    fn page_bits(&self) -> u32 {
        if self.binary {
            8
        } else {
            9
        }
    }

    /// Byte at a linear address of the active mode
    pub fn byte(&self, address: usize) -> u8 {
        let page = address / self.page_size();
        let offset = address % self.page_size();
        self.memory[page * PHYSICAL_PAGE + offset]
    }

    pub fn fill(&mut self, address: usize, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            let address = address + i;
            let page = address / self.page_size();
            let offset = address % self.page_size();
            self.memory[page * PHYSICAL_PAGE + offset] = *byte;
        }
    }

    pub fn opcodes(&self) -> Vec<u8> {
        self.frames.iter().map(|frame| frame[0]).collect()
    }

    /// Frames other than status reads
    pub fn commands(&self) -> Vec<&Vec<u8>> {
        self.frames.iter().filter(|frame| frame[0] != 0xD7).collect()
    }

    fn busy(&self) -> bool {
        self.stuck_busy || self.now_ns < self.busy_until_ns
    }

    fn start(&mut self, busy_ms: u64) {
        self.busy_until_ns = self.now_ns + busy_ms * NS_PER_MS;
    }

    fn status(&self) -> [u8; 2] {
        let ready = !self.busy();
        // density code 1001 of the 8Mbit part in bits 13..10
        let high = (ready as u8) << 7 | 0b1001 << 2 | self.binary as u8;
        let low = (self.error as u8) << 5;
        [high, low]
    }

    fn address_word(&self) -> usize {
        let byte = |i: usize| *self.frame.get(i).unwrap_or(&0) as usize;
        byte(1) << 16 | byte(2) << 8 | byte(3)
    }

    fn page_and_offset(&self) -> (usize, usize) {
        let word = self.address_word();
        let page = (word >> self.page_bits()) % PAGES;
        let offset = word & ((1 << self.page_bits()) - 1);
        (page, offset % self.page_size())
    }

    fn payload(&self) -> &[u8] {
        self.frame.get(4..).unwrap_or(&[])
    }

    fn select(&mut self) {
        self.selected = true;
        self.frame.clear();
        self.clocked_out = 0;
    }

    fn write(&mut self, bytes: &[u8]) {
        assert!(self.selected, "bytes clocked without chip select");
        self.frame.extend_from_slice(bytes);
    }

    fn read(&mut self, buff: &mut [u8]) {
        assert!(self.selected, "bytes clocked without chip select");
        for byte in buff.iter_mut() {
            *byte = self.output(self.clocked_out);
            self.clocked_out += 1;
        }
    }

    fn output(&self, i: usize) -> u8 {
        let page_size = self.page_size();
        match self.frame[0] {
            0xD7 => self.status()[i % 2],
            0x9F => [0x1F, 0x25, 0x00, 0x01, 0x00].get(i).copied().unwrap_or(0),
            0x03 | 0x0B | 0x1B => {
                let (page, offset) = self.page_and_offset();
                let position = offset + i;
                let page = (page + position / page_size) % PAGES;
                self.memory[page * PHYSICAL_PAGE + position % page_size]
            }
            0xD2 => {
                let (page, offset) = self.page_and_offset();
                self.memory[page * PHYSICAL_PAGE + (offset + i) % page_size]
            }
            0xD1 | 0xD3 => {
                let buffer = &self.buffers[(self.frame[0] == 0xD3) as usize];
                buffer[(self.address_word() + i) % page_size]
            }
            _ => 0xFF,
        }
    }

    fn deselect(&mut self) {
        self.selected = false;
        if self.frame.is_empty() {
            return;
        }
        self.frames.push(self.frame.clone());

        let opcode = self.frame[0];
        if opcode != 0xD7 && self.busy() {
            self.busy_violations += 1;
            return;
        }
        self.execute(opcode);
    }

    fn page_fails(&mut self, pages: core::ops::Range<usize>) -> bool {
        self.error = self.failing_pages.iter().any(|page| pages.contains(page));
        self.error
    }

    fn erase_pages(&mut self, pages: core::ops::Range<usize>, busy_ms: u64) {
        self.start(busy_ms);
        if !self.page_fails(pages.clone()) {
            self.memory[pages.start * PHYSICAL_PAGE..pages.end * PHYSICAL_PAGE].fill(0xFF);
        }
    }

    fn program_page(&mut self, page: usize, buffer: usize, erase: bool, busy_ms: u64) {
        self.start(busy_ms);
        if self.page_fails(page..page + 1) {
            return;
        }
        let target = &mut self.memory[page * PHYSICAL_PAGE..(page + 1) * PHYSICAL_PAGE];
        for (byte, new) in target.iter_mut().zip(self.buffers[buffer].iter()) {
            *byte = if erase { *new } else { *byte & *new };
        }
    }

    fn load_buffer(&mut self, buffer: usize, offset: usize) {
        let page_size = self.page_size();
        let payload = self.payload().to_vec();
        for (i, byte) in payload.iter().enumerate() {
            self.buffers[buffer][(offset + i) % page_size] = *byte;
        }
    }

    fn execute(&mut self, opcode: u8) {
        let page_size = self.page_size();
        match opcode {
            0x84 | 0x87 => {
                let offset = self.address_word() % page_size;
                self.load_buffer((opcode == 0x87) as usize, offset);
            }
            0x83 | 0x86 | 0x88 | 0x89 => {
                let (page, _) = self.page_and_offset();
                let buffer = matches!(opcode, 0x86 | 0x89) as usize;
                let (erase, busy) = match opcode {
                    0x83 | 0x86 => (true, PAGE_ERASE_PROGRAM_MS),
                    _ => (false, PAGE_PROGRAM_MS),
                };
                self.program_page(page, buffer, erase, busy);
            }
            0x82 | 0x85 => {
                let (page, offset) = self.page_and_offset();
                let buffer = (opcode == 0x85) as usize;
                self.load_buffer(buffer, offset);
                self.program_page(page, buffer, true, PAGE_ERASE_PROGRAM_MS);
            }
            0x58 | 0x59 => {
                let (page, offset) = self.page_and_offset();
                let buffer = (opcode == 0x59) as usize;
                let start = page * PHYSICAL_PAGE;
                self.buffers[buffer] = self.memory[start..start + PHYSICAL_PAGE].to_vec();
                self.load_buffer(buffer, offset);
                self.program_page(page, buffer, true, PAGE_ERASE_PROGRAM_MS);
            }
            0x02 => {
                // only the clocked in bytes are programmed
                let (page, offset) = self.page_and_offset();
                self.load_buffer(0, offset);
                self.start(PAGE_PROGRAM_MS);
                if self.page_fails(page..page + 1) {
                    return;
                }
                let payload = self.payload().to_vec();
                for (i, byte) in payload.iter().enumerate() {
                    let at = page * PHYSICAL_PAGE + (offset + i) % page_size;
                    self.memory[at] &= *byte;
                }
            }
            0x81 => {
                let (page, _) = self.page_and_offset();
                self.erase_pages(page..page + 1, PAGE_ERASE_MS);
            }
            0x50 => {
                let blocks = PAGES / PAGES_PER_BLOCK;
                let block = (self.address_word() >> (self.page_bits() + 3)) % blocks;
                let first = block * PAGES_PER_BLOCK;
                self.erase_pages(first..first + PAGES_PER_BLOCK, BLOCK_ERASE_MS);
            }
            0x7C => {
                let word = self.address_word();
                let sector = (word >> (self.page_bits() + 8)) % (PAGES / PAGES_PER_SECTOR);
                let pages = if sector != 0 {
                    let first = sector * PAGES_PER_SECTOR;
                    first..first + PAGES_PER_SECTOR
                } else if word >> (self.page_bits() + 3) == 0 {
                    // 0a
                    0..PAGES_PER_BLOCK
                } else {
                    // 0b
                    PAGES_PER_BLOCK..PAGES_PER_SECTOR
                };
                self.erase_pages(pages, SECTOR_ERASE_MS);
            }
            0xC7 if self.frame == [0xC7, 0x94, 0x80, 0x9A] => {
                self.erase_pages(0..PAGES, CHIP_ERASE_MS)
            }
            0x3D if self.frame.len() == 4 && self.frame[..3] == [0x3D, 0x2A, 0x80] => {
                match self.frame[3] {
                    0xA6 => self.binary = true,
                    0xA7 => self.binary = false,
                    _ => return,
                }
                self.error = false;
                self.start(CONFIGURE_MS);
            }
            _ => {}
        }
    }

    fn advance(&mut self, ns: u64) {
        self.now_ns += ns;
    }
}

pub struct SimBus(Rc<RefCell<Sim>>);

impl spi::ErrorType for SimBus {
    type Error = Infallible;
}

impl spi::SpiBus for SimBus {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
        self.0.borrow_mut().read(words);
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Infallible> {
        self.0.borrow_mut().write(words);
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Infallible> {
        self.0.borrow_mut().write(write);
        self.0.borrow_mut().read(read);
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
        self.0.borrow_mut().write(words);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

impl embedded_hal_async::spi::SpiBus for SimBus {
    async fn read(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
        spi::SpiBus::read(self, words)
    }

    async fn write(&mut self, words: &[u8]) -> Result<(), Infallible> {
        spi::SpiBus::write(self, words)
    }

    async fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Infallible> {
        spi::SpiBus::transfer(self, read, write)
    }

    async fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
        spi::SpiBus::transfer_in_place(self, words)
    }

    async fn flush(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

pub struct SimCs(Rc<RefCell<Sim>>);

impl digital::ErrorType for SimCs {
    type Error = Infallible;
}

impl digital::OutputPin for SimCs {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().select();
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        // ExclusiveDevice drives the pin high once on creation
        let mut sim = self.0.borrow_mut();
        if sim.selected {
            sim.deselect();
        }
        Ok(())
    }
}

/// Delay that moves the simulated clock instead of sleeping
pub struct SimDelay(Rc<RefCell<Sim>>);

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.0.borrow_mut().advance(ns as u64);
    }

    fn delay_ms(&mut self, ms: u32) {
        let mut sim = self.0.borrow_mut();
        sim.waited_ms += ms as u64;
        sim.advance(ms as u64 * NS_PER_MS);
    }
}

impl embedded_hal_async::delay::DelayNs for SimDelay {
    async fn delay_ns(&mut self, ns: u32) {
        DelayNs::delay_ns(self, ns)
    }

    async fn delay_ms(&mut self, ms: u32) {
        DelayNs::delay_ms(self, ms)
    }
}

pub type SimDevice = ExclusiveDevice<SimBus, SimCs, NoDelay>;

pub fn device(sim: &Rc<RefCell<Sim>>) -> SimDevice {
    ExclusiveDevice::new_no_delay(SimBus(sim.clone()), SimCs(sim.clone())).unwrap()
}

pub fn delay(sim: &Rc<RefCell<Sim>>) -> SimDelay {
    SimDelay(sim.clone())
}

/// Geometry matching the simulated chip
pub fn geometry(mode: PageSizeMode) -> ChipGeometry {
    ChipGeometry::AT45DB081E.with_mode(mode)
}

pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
