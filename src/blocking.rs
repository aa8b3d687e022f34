use crate::{
    address::{pack_address, pack_buffer_offset, sector_erase_address},
    check_erase, check_page_span, check_read, check_write,
    command::{
        Command, CommandFrame, CHIP_ERASE, CONFIGURE_BINARY_PAGE_SIZE,
        CONFIGURE_EXTENDED_PAGE_SIZE,
    },
    erase::{EraseUnit, ErasePlan},
    error::{Error, Interrupted},
    geometry::{ChipGeometry, OperationKind, PageSizeMode, Section, PAGE_SIZE_COMMON_MULTIPLE},
    register::{DeviceInfo, ReadMode, SramBuffer, StatusReadout, StatusRegister},
    write::{WritePlan, WriteSegment},
    Config,
};
use embedded_hal::{
    delay::DelayNs,
    spi::{Operation, SpiDevice},
};
use embedded_storage::nor_flash::{ErrorType, MultiwriteNorFlash, NorFlash, ReadNorFlash};

/// Blocking AT45DB driver.
///
/// Every erase and program waits for the device to be ready again and checks the error bit
/// before returning, so the chip is idle between calls.
pub struct At45<SPI, D> {
    spi: SPI,
    delay: D,
    geometry: Option<ChipGeometry>,
    config: Config,
}

impl<SPI, D, E> At45<SPI, D>
where
    SPI: SpiDevice<Error = E>,
    D: DelayNs,
{
    /// Create a driver without geometry. Only [`Self::read_device_info`] works until
    /// [`Self::configure`] is called.
    pub fn new(spi: SPI, delay: D) -> Self {
        Self {
            spi,
            delay,
            geometry: None,
            config: Config::default(),
        }
    }

    pub fn with_geometry(spi: SPI, delay: D, geometry: ChipGeometry) -> Self {
        let mut at45 = Self::new(spi, delay);
        at45.configure(geometry);
        at45
    }

    /// Set the geometry of the attached chip. Its mode must match the page size the chip is
    /// configured for, see [`Self::page_size_config`].
    pub fn configure(&mut self, geometry: ChipGeometry) {
        #[cfg(feature = "defmt")]
        defmt::debug!("Configured {:?}", geometry);
        self.geometry = Some(geometry);
    }

    pub fn set_config(&mut self, config: Config) {
        self.config = config;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn geometry(&self) -> Result<&ChipGeometry, Error<E>> {
        self.geometry.as_ref().ok_or(Error::NotInitialized)
    }

    /// Give back the bus and the delay
    pub fn release(self) -> (SPI, D) {
        (self.spi, self.delay)
    }

    fn active_geometry(&self) -> Result<ChipGeometry, Error<E>> {
        self.geometry.ok_or(Error::NotInitialized)
    }

    fn command_write(&mut self, bytes: &[u8]) -> Result<(), Error<E>> {
        self.spi.write(bytes).map_err(Error::Spi)
    }

    fn write_read_base(&mut self, write: &[u8], read: &mut [u8]) -> Result<(), Error<E>> {
        self.spi
            .transaction(&mut [Operation::Write(write), Operation::Read(read)])
            .map_err(Error::Spi)
    }

    fn write_base(&mut self, write: &[u8], buff: &[u8]) -> Result<(), Error<E>> {
        self.spi
            .transaction(&mut [Operation::Write(write), Operation::Write(buff)])
            .map_err(Error::Spi)
    }

    /// Read the 16 bit status register
    pub fn read_status(&mut self) -> Result<StatusRegister, Error<E>> {
        let geometry = self.active_geometry()?;
        let mut status = [0; 2];
        match geometry.status {
            StatusReadout::Combined(opcode) => {
                self.write_read_base(&[opcode], &mut status)?;
            }
            StatusReadout::Split { high, low } => {
                let (msb, lsb) = status.split_at_mut(1);
                self.write_read_base(&[high], msb)?;
                self.write_read_base(&[low], lsb)?;
            }
        }
        Ok(status.into())
    }

    /// Poll the status register until the device is ready.
    ///
    /// The register is read right away, then every typical delay of `operation`. Gives up
    /// with [`Error::DeviceNotReady`] once `timeout_ms` milliseconds have been waited.
    pub fn wait_ready(
        &mut self,
        operation: OperationKind,
        timeout_ms: u32,
    ) -> Result<StatusRegister, Error<E>> {
        let interval = self.active_geometry()?.delays.of(operation).max(1);
        let mut waited: u32 = 0;
        loop {
            let status = self.read_status()?;
            if status.ready {
                return Ok(status);
            }
            if waited >= timeout_ms {
                #[cfg(feature = "defmt")]
                defmt::warn!("Still busy after {=u32} ms: {:?}", waited, status);
                return Err(Error::DeviceNotReady);
            }
            let wait = interval.min(timeout_ms - waited);
            self.delay.delay_ms(wait);
            waited = waited.saturating_add(wait);
        }
    }

    /// Wait for `operation` with its configured timeout and check the error bit
    fn finish(&mut self, operation: OperationKind) -> Result<StatusRegister, Error<E>> {
        let status = self.wait_ready(operation, self.config.timeouts.of(operation))?;
        if status.erase_program_error {
            #[cfg(feature = "defmt")]
            defmt::warn!("{:?} failed, status {=u16:#x}", operation, status.raw);
            return Err(Error::ProgramEraseError);
        }
        Ok(status)
    }

    /// Continuous read starting at a linear address, using the configured [`ReadMode`]
    pub fn read(&mut self, address: u32, buff: &mut [u8]) -> Result<(), Error<E>> {
        let geometry = self.active_geometry()?;
        check_read(&geometry, address, buff.len())?;

        let page = address / geometry.page_size();
        let offset = address % geometry.page_size();
        let packed = pack_address(&geometry, Section::Page, page, offset)?;
        let command = match self.config.read_mode {
            ReadMode::LowFrequency => Command::ContinuousArrayReadLf,
            ReadMode::HighFrequency => Command::ContinuousArrayReadHf1,
            ReadMode::HighFrequencyMax => Command::ContinuousArrayReadHf2,
        };

        let res = self.write_read_base(CommandFrame::new(command, packed).as_bytes(), buff);
        #[cfg(feature = "defmt")]
        if res.is_ok() {
            defmt::trace!("Read from {=u32}, {=usize}: {:?}", address, buff.len(), buff);
        } else {
            defmt::error!("Read from {=u32} failed", address);
        }
        res
    }

    /// Read bytes of a single page, without going through the SRAM buffers
    pub fn read_page(&mut self, page: u32, offset: u32, buff: &mut [u8]) -> Result<(), Error<E>> {
        let geometry = self.active_geometry()?;
        let packed = pack_address(&geometry, Section::Page, page, offset)?;
        check_page_span(&geometry, offset, buff.len())?;
        let frame = CommandFrame::new(Command::MainMemoryPageRead, packed);
        self.write_read_base(frame.as_bytes(), buff)
    }

    pub fn erase_page(&mut self, page: u32) -> Result<(), Error<E>> {
        let geometry = self.active_geometry()?;
        let packed = pack_address(&geometry, Section::Page, page, 0)?;
        self.command_write(CommandFrame::new(Command::PageErase, packed).as_bytes())?;
        self.finish(OperationKind::PageErase).map(|_| ())
    }

    pub fn erase_block(&mut self, block: u32) -> Result<(), Error<E>> {
        let geometry = self.active_geometry()?;
        let packed = pack_address(&geometry, Section::Block, block, 0)?;
        self.command_write(CommandFrame::new(Command::BlockErase, packed).as_bytes())?;
        self.finish(OperationKind::BlockErase).map(|_| ())
    }

    /// Erase a sector. Sector 0 takes two commands, one for 0a and one for 0b.
    pub fn erase_sector(&mut self, sector: u32) -> Result<(), Error<E>> {
        let geometry = self.active_geometry()?;
        for packed in sector_erase_address(&geometry, sector)?.iter() {
            self.command_write(CommandFrame::new(Command::SectorErase, packed).as_bytes())?;
            self.finish(OperationKind::SectorErase)?;
        }
        Ok(())
    }

    /// Erase the whole chip
    pub fn erase_chip(&mut self) -> Result<(), Error<E>> {
        self.active_geometry()?;
        #[cfg(feature = "defmt")]
        defmt::warn!("Erase chip");
        self.command_write(&CHIP_ERASE)?;
        self.finish(OperationKind::ChipErase).map(|_| ())
    }

    fn erase_unit(&mut self, unit: EraseUnit) -> Result<(), Error<E>> {
        match unit {
            EraseUnit::Sector(sector) => self.erase_sector(sector),
            EraseUnit::Block(block) => self.erase_block(block),
            EraseUnit::Page(page) => self.erase_page(page),
        }
    }

    /// Erase `length` bytes from `address`, both page aligned, with the fewest erase commands.
    pub fn erase(&mut self, address: u32, length: u32) -> Result<(), Interrupted<E>> {
        let geometry = self.active_geometry()?;
        check_erase(&geometry, address, length)?;

        let mut completed = 0;
        for unit in ErasePlan::new(&geometry, address, length) {
            #[cfg(feature = "defmt")]
            defmt::debug!("Erase {:?}", unit);
            self.erase_unit(unit)
                .map_err(|error| Interrupted { completed, error })?;
            completed += unit.len(&geometry);
        }
        Ok(())
    }

    fn write_segment(
        &mut self,
        geometry: &ChipGeometry,
        segment: WriteSegment,
        data: &[u8],
    ) -> Result<(), Error<E>> {
        let command = match (self.config.write_buffer, segment.is_read_modify_write()) {
            (SramBuffer::Buffer1, true) => Command::ReadModifyWriteBuffer1,
            (SramBuffer::Buffer2, true) => Command::ReadModifyWriteBuffer2,
            (SramBuffer::Buffer1, false) => Command::PageProgramThroughBuffer1,
            (SramBuffer::Buffer2, false) => Command::PageProgramThroughBuffer2,
        };
        let packed = pack_address(geometry, Section::Page, segment.page(), segment.offset())?;
        self.write_base(CommandFrame::new(command, packed).as_bytes(), data)?;
        self.finish(OperationKind::PageEraseProgram).map(|_| ())
    }

    /// Write `data` at a linear address. Partial pages keep the bytes around the written
    /// range, nothing needs to be erased beforehand.
    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<(), Interrupted<E>> {
        let geometry = self.active_geometry()?;
        let length = check_write(&geometry, address, data.len())?;

        let mut completed = 0;
        let mut rest = data;
        for segment in WritePlan::new(&geometry, address, length) {
            let len = segment.len(&geometry);
            let Some((now, later)) = rest.split_at_checked(len as usize) else {
                return Err(Interrupted {
                    completed,
                    error: Error::InvalidArgument,
                });
            };
            #[cfg(feature = "defmt")]
            defmt::trace!("Write {:?}: {:?}", segment, now);
            self.write_segment(&geometry, segment, now)
                .map_err(|error| Interrupted { completed, error })?;
            completed += len;
            rest = later;
        }
        Ok(())
    }

    /// Program bytes of one page through buffer 1 without erasing it. Bits can only be
    /// cleared, the rest of the page is left as is.
    pub fn program_page(&mut self, page: u32, offset: u32, data: &[u8]) -> Result<(), Error<E>> {
        let geometry = self.active_geometry()?;
        let packed = pack_address(&geometry, Section::Page, page, offset)?;
        check_page_span(&geometry, offset, data.len())?;
        let frame = CommandFrame::new(Command::ProgramThroughBuffer1WithoutErase, packed);
        self.write_base(frame.as_bytes(), data)?;
        self.finish(OperationKind::PageProgram).map(|_| ())
    }

    /// Fill part of an SRAM buffer
    pub fn buffer_write(
        &mut self,
        buffer: SramBuffer,
        offset: u32,
        data: &[u8],
    ) -> Result<(), Error<E>> {
        let geometry = self.active_geometry()?;
        check_page_span(&geometry, offset, data.len())?;
        let command = match buffer {
            SramBuffer::Buffer1 => Command::Buffer1Write,
            SramBuffer::Buffer2 => Command::Buffer2Write,
        };
        let packed = pack_buffer_offset(&geometry, offset)?;
        self.write_base(CommandFrame::new(command, packed).as_bytes(), data)
    }

    pub fn buffer_read(
        &mut self,
        buffer: SramBuffer,
        offset: u32,
        buff: &mut [u8],
    ) -> Result<(), Error<E>> {
        let geometry = self.active_geometry()?;
        check_page_span(&geometry, offset, buff.len())?;
        let command = match buffer {
            SramBuffer::Buffer1 => Command::Buffer1ReadLf,
            SramBuffer::Buffer2 => Command::Buffer2ReadLf,
        };
        let packed = pack_buffer_offset(&geometry, offset)?;
        self.write_read_base(CommandFrame::new(command, packed).as_bytes(), buff)
    }

    /// Program a page with the content of an SRAM buffer, erasing it first when `erase` is set.
    pub fn buffer_commit(
        &mut self,
        buffer: SramBuffer,
        page: u32,
        erase: bool,
    ) -> Result<(), Error<E>> {
        let geometry = self.active_geometry()?;
        let packed = pack_address(&geometry, Section::Page, page, 0)?;
        let (command, operation) = match (buffer, erase) {
            (SramBuffer::Buffer1, true) => {
                (Command::Buffer1ToPageWithErase, OperationKind::PageEraseProgram)
            }
            (SramBuffer::Buffer2, true) => {
                (Command::Buffer2ToPageWithErase, OperationKind::PageEraseProgram)
            }
            (SramBuffer::Buffer1, false) => {
                (Command::Buffer1ToPageWithoutErase, OperationKind::PageProgram)
            }
            (SramBuffer::Buffer2, false) => {
                (Command::Buffer2ToPageWithoutErase, OperationKind::PageProgram)
            }
        };
        self.command_write(CommandFrame::new(command, packed).as_bytes())?;
        self.finish(operation).map(|_| ())
    }

    /// Switch the chip between binary and standard page sizes and follow in the geometry
    pub fn configure_page_size(&mut self, mode: PageSizeMode) -> Result<(), Error<E>> {
        self.active_geometry()?;
        let command = match mode {
            PageSizeMode::Binary => CONFIGURE_BINARY_PAGE_SIZE,
            PageSizeMode::Extended => CONFIGURE_EXTENDED_PAGE_SIZE,
        };
        self.command_write(&command)?;
        let status = self.finish(OperationKind::Configure)?;
        if status.page_size_mode() != mode {
            return Err(Error::ProgramEraseError);
        }
        if let Some(geometry) = self.geometry.as_mut() {
            geometry.set_mode(mode);
        }
        Ok(())
    }

    /// Page size the chip is currently configured for
    pub fn page_size_config(&mut self) -> Result<PageSizeMode, Error<E>> {
        Ok(self.read_status()?.page_size_mode())
    }

    /// Read the JEDEC manufacturer and device id. Works without geometry.
    pub fn read_device_info(&mut self) -> Result<DeviceInfo, Error<E>> {
        let mut id = [0; 3];
        self.write_read_base(&[Command::ReadDeviceInfo as u8], &mut id)?;
        Ok(id.into())
    }
}

impl<SPI, D> ErrorType for At45<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    type Error = Error<SPI::Error>;
}

impl<SPI, D> ReadNorFlash for At45<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        if bytes.is_empty() {
            return Ok(());
        }
        At45::read(self, offset, bytes)
    }

    fn capacity(&self) -> usize {
        self.geometry
            .map_or(0, |geometry| geometry.capacity() as usize)
    }
}

/// `ERASE_SIZE` is a whole number of pages in both page size modes. With binary pages the
/// last 1024 bytes of an AT45DB081E are outside of any erase unit and can only be erased
/// with [`At45::erase`].
impl<SPI, D> NorFlash for At45<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    const WRITE_SIZE: usize = 1;

    const ERASE_SIZE: usize = PAGE_SIZE_COMMON_MULTIPLE as usize;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if from > to
            || from % PAGE_SIZE_COMMON_MULTIPLE != 0
            || to % PAGE_SIZE_COMMON_MULTIPLE != 0
        {
            return Err(Error::InvalidArgument);
        }
        if from == to {
            return Ok(());
        }
        Ok(At45::erase(self, from, to - from)?)
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if bytes.is_empty() {
            return Ok(());
        }
        Ok(At45::write(self, offset, bytes)?)
    }
}

impl<SPI, D> MultiwriteNorFlash for At45<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
}
