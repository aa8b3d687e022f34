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
use embedded_hal::spi::Operation;
use embedded_hal_async::{delay::DelayNs, spi::SpiDevice};
use embedded_storage_async::nor_flash::{MultiwriteNorFlash, NorFlash, ReadNorFlash};

/// Async AT45DB driver, the busy polling sleeps on the async delay between status reads.
pub struct AsyncAt45<SPI, D> {
    spi: SPI,
    delay: D,
    geometry: Option<ChipGeometry>,
    config: Config,
}

impl<SPI, D, E> AsyncAt45<SPI, D>
where
    SPI: SpiDevice<Error = E>,
    D: DelayNs,
{
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

    pub fn release(self) -> (SPI, D) {
        (self.spi, self.delay)
    }

    fn active_geometry(&self) -> Result<ChipGeometry, Error<E>> {
        self.geometry.ok_or(Error::NotInitialized)
    }

    async fn command_write(&mut self, bytes: &[u8]) -> Result<(), Error<E>> {
        self.spi.write(bytes).await.map_err(Error::Spi)
    }

    async fn write_read_base(&mut self, write: &[u8], read: &mut [u8]) -> Result<(), Error<E>> {
        self.spi
            .transaction(&mut [Operation::Write(write), Operation::Read(read)])
            .await
            .map_err(Error::Spi)
    }

    async fn write_base(&mut self, write: &[u8], buff: &[u8]) -> Result<(), Error<E>> {
        self.spi
            .transaction(&mut [Operation::Write(write), Operation::Write(buff)])
            .await
            .map_err(Error::Spi)
    }

    /// Read the 16 bit status register
    pub async fn read_status(&mut self) -> Result<StatusRegister, Error<E>> {
        let geometry = self.active_geometry()?;
        let mut status = [0; 2];
        match geometry.status {
            StatusReadout::Combined(opcode) => {
                self.write_read_base(&[opcode], &mut status).await?;
            }
            StatusReadout::Split { high, low } => {
                let (msb, lsb) = status.split_at_mut(1);
                self.write_read_base(&[high], msb).await?;
                self.write_read_base(&[low], lsb).await?;
            }
        }
        Ok(status.into())
    }

    /// Poll the status register until the device is ready, see
    /// [`crate::blocking::At45::wait_ready`].
    pub async fn wait_ready(
        &mut self,
        operation: OperationKind,
        timeout_ms: u32,
    ) -> Result<StatusRegister, Error<E>> {
        let interval = self.active_geometry()?.delays.of(operation).max(1);
        let mut waited: u32 = 0;
        loop {
            let status = self.read_status().await?;
            if status.ready {
                return Ok(status);
            }
            if waited >= timeout_ms {
                #[cfg(feature = "defmt")]
                defmt::warn!("Still busy after {=u32} ms: {:?}", waited, status);
                return Err(Error::DeviceNotReady);
            }
            let wait = interval.min(timeout_ms - waited);
            self.delay.delay_ms(wait).await;
            waited = waited.saturating_add(wait);
        }
    }

    async fn finish(&mut self, operation: OperationKind) -> Result<StatusRegister, Error<E>> {
        let status = self
            .wait_ready(operation, self.config.timeouts.of(operation))
            .await?;
        if status.erase_program_error {
            #[cfg(feature = "defmt")]
            defmt::warn!("{:?} failed, status {=u16:#x}", operation, status.raw);
            return Err(Error::ProgramEraseError);
        }
        Ok(status)
    }

    /// Continuous read starting at a linear address, using the configured [`ReadMode`]
    pub async fn read(&mut self, address: u32, buff: &mut [u8]) -> Result<(), Error<E>> {
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

        let res = self
            .write_read_base(CommandFrame::new(command, packed).as_bytes(), buff)
            .await;
        #[cfg(feature = "defmt")]
        if res.is_ok() {
            defmt::trace!("Read from {=u32}, {=usize}: {:?}", address, buff.len(), buff);
        } else {
            defmt::error!("Read from {=u32} failed", address);
        }
        res
    }

    pub async fn read_page(
        &mut self,
        page: u32,
        offset: u32,
        buff: &mut [u8],
    ) -> Result<(), Error<E>> {
        let geometry = self.active_geometry()?;
        let packed = pack_address(&geometry, Section::Page, page, offset)?;
        check_page_span(&geometry, offset, buff.len())?;
        let frame = CommandFrame::new(Command::MainMemoryPageRead, packed);
        self.write_read_base(frame.as_bytes(), buff).await
    }

    pub async fn erase_page(&mut self, page: u32) -> Result<(), Error<E>> {
        let geometry = self.active_geometry()?;
        let packed = pack_address(&geometry, Section::Page, page, 0)?;
        self.command_write(CommandFrame::new(Command::PageErase, packed).as_bytes())
            .await?;
        self.finish(OperationKind::PageErase).await.map(|_| ())
    }

    pub async fn erase_block(&mut self, block: u32) -> Result<(), Error<E>> {
        let geometry = self.active_geometry()?;
        let packed = pack_address(&geometry, Section::Block, block, 0)?;
        self.command_write(CommandFrame::new(Command::BlockErase, packed).as_bytes())
            .await?;
        self.finish(OperationKind::BlockErase).await.map(|_| ())
    }

    /// Erase a sector. Sector 0 takes two commands, one for 0a and one for 0b.
    pub async fn erase_sector(&mut self, sector: u32) -> Result<(), Error<E>> {
        let geometry = self.active_geometry()?;
        for packed in sector_erase_address(&geometry, sector)?.iter() {
            self.command_write(CommandFrame::new(Command::SectorErase, packed).as_bytes())
                .await?;
            self.finish(OperationKind::SectorErase).await?;
        }
        Ok(())
    }

    pub async fn erase_chip(&mut self) -> Result<(), Error<E>> {
        self.active_geometry()?;
        #[cfg(feature = "defmt")]
        defmt::warn!("Erase chip");
        self.command_write(&CHIP_ERASE).await?;
        self.finish(OperationKind::ChipErase).await.map(|_| ())
    }

    async fn erase_unit(&mut self, unit: EraseUnit) -> Result<(), Error<E>> {
        match unit {
            EraseUnit::Sector(sector) => self.erase_sector(sector).await,
            EraseUnit::Block(block) => self.erase_block(block).await,
            EraseUnit::Page(page) => self.erase_page(page).await,
        }
    }

    /// Erase `length` bytes from `address`, both page aligned, with the fewest erase commands.
    pub async fn erase(&mut self, address: u32, length: u32) -> Result<(), Interrupted<E>> {
        let geometry = self.active_geometry()?;
        check_erase(&geometry, address, length)?;

        let mut completed = 0;
        for unit in ErasePlan::new(&geometry, address, length) {
            #[cfg(feature = "defmt")]
            defmt::debug!("Erase {:?}", unit);
            self.erase_unit(unit)
                .await
                .map_err(|error| Interrupted { completed, error })?;
            completed += unit.len(&geometry);
        }
        Ok(())
    }

    async fn write_segment(
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
        self.write_base(CommandFrame::new(command, packed).as_bytes(), data)
            .await?;
        self.finish(OperationKind::PageEraseProgram).await.map(|_| ())
    }

    /// Write `data` at a linear address, no erase needed beforehand.
    pub async fn write(&mut self, address: u32, data: &[u8]) -> Result<(), Interrupted<E>> {
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
                .await
                .map_err(|error| Interrupted { completed, error })?;
            completed += len;
            rest = later;
        }
        Ok(())
    }

    /// Program bytes of one page through buffer 1 without erasing it
    pub async fn program_page(
        &mut self,
        page: u32,
        offset: u32,
        data: &[u8],
    ) -> Result<(), Error<E>> {
        let geometry = self.active_geometry()?;
        let packed = pack_address(&geometry, Section::Page, page, offset)?;
        check_page_span(&geometry, offset, data.len())?;
        let frame = CommandFrame::new(Command::ProgramThroughBuffer1WithoutErase, packed);
        self.write_base(frame.as_bytes(), data).await?;
        self.finish(OperationKind::PageProgram).await.map(|_| ())
    }

    pub async fn buffer_write(
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
            .await
    }

    pub async fn buffer_read(
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
            .await
    }

    pub async fn buffer_commit(
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
        self.command_write(CommandFrame::new(command, packed).as_bytes())
            .await?;
        self.finish(operation).await.map(|_| ())
    }

    pub async fn configure_page_size(&mut self, mode: PageSizeMode) -> Result<(), Error<E>> {
        self.active_geometry()?;
        let command = match mode {
            PageSizeMode::Binary => CONFIGURE_BINARY_PAGE_SIZE,
            PageSizeMode::Extended => CONFIGURE_EXTENDED_PAGE_SIZE,
        };
        self.command_write(&command).await?;
        let status = self.finish(OperationKind::Configure).await?;
        if status.page_size_mode() != mode {
            return Err(Error::ProgramEraseError);
        }
        if let Some(geometry) = self.geometry.as_mut() {
            geometry.set_mode(mode);
        }
        Ok(())
    }

    pub async fn page_size_config(&mut self) -> Result<PageSizeMode, Error<E>> {
        Ok(self.read_status().await?.page_size_mode())
    }

    /// Read the JEDEC manufacturer and device id. Works without geometry.
    pub async fn read_device_info(&mut self) -> Result<DeviceInfo, Error<E>> {
        let mut id = [0; 3];
        self.write_read_base(&[Command::ReadDeviceInfo as u8], &mut id)
            .await?;
        Ok(id.into())
    }
}

impl<SPI: SpiDevice, D: DelayNs> embedded_storage_async::nor_flash::ErrorType
    for AsyncAt45<SPI, D>
{
    type Error = Error<SPI::Error>;
}

impl<SPI: SpiDevice, D: DelayNs> ReadNorFlash for AsyncAt45<SPI, D> {
    const READ_SIZE: usize = 1;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        if bytes.is_empty() {
            return Ok(());
        }
        AsyncAt45::read(self, offset, bytes).await
    }

    fn capacity(&self) -> usize {
        self.geometry
            .map_or(0, |geometry| geometry.capacity() as usize)
    }
}

impl<SPI: SpiDevice, D: DelayNs> NorFlash for AsyncAt45<SPI, D> {
    const WRITE_SIZE: usize = 1;

    const ERASE_SIZE: usize = PAGE_SIZE_COMMON_MULTIPLE as usize;

    async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if from > to
            || from % PAGE_SIZE_COMMON_MULTIPLE != 0
            || to % PAGE_SIZE_COMMON_MULTIPLE != 0
        {
            return Err(Error::InvalidArgument);
        }
        if from == to {
            return Ok(());
        }
        Ok(AsyncAt45::erase(self, from, to - from).await?)
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if bytes.is_empty() {
            return Ok(());
        }
        Ok(AsyncAt45::write(self, offset, bytes).await?)
    }
}

impl<SPI: SpiDevice, D: DelayNs> MultiwriteNorFlash for AsyncAt45<SPI, D> {}
