use core::fmt::Debug;

use embedded_storage::nor_flash::{NorFlashError, NorFlashErrorKind};

/// All possible errors emitted by the driver
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<SpiError> {
    /// Internal Spi error
    Spi(SpiError),

    /// Empty buffer, misaligned erase or value out of range
    InvalidArgument,

    /// Address range past the end of the device
    Overrun,

    /// Page, block or sector index out of range
    InvalidSection,

    /// The device stayed busy past the timeout
    DeviceNotReady,

    /// The status register reported an erase or program failure
    ProgramEraseError,

    /// No geometry configured yet
    NotInitialized,
}

/// A multi step erase or write that stopped part way through.
///
/// `completed` bytes of the request were fully applied before `error` occurred. For a write
/// they are the leading bytes of the data. For an erase they are the units of the
/// [`crate::erase::ErasePlan`] already executed, in plan order. Anything else in the range
/// may be partially erased or programmed.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted<SpiError> {
    pub completed: u32,
    pub error: Error<SpiError>,
}

impl<E> From<Error<E>> for Interrupted<E> {
    fn from(error: Error<E>) -> Self {
        Interrupted {
            completed: 0,
            error,
        }
    }
}

impl<E> From<Interrupted<E>> for Error<E> {
    fn from(interrupted: Interrupted<E>) -> Self {
        interrupted.error
    }
}

impl<SpiError> NorFlashError for Error<SpiError>
where
    SpiError: Debug,
{
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            Error::Overrun => NorFlashErrorKind::OutOfBounds,
            Error::InvalidArgument => NorFlashErrorKind::NotAligned,
            _ => NorFlashErrorKind::Other,
        }
    }
}
