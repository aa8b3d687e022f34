use crate::address::PackedAddress;

/// Longest opcode + address + dummy sequence sent ahead of a payload
pub(crate) const MAX_FRAME_LEN: usize = 9;

const DUMMY: u8 = 0x00;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Command {
    // Read
    MainMemoryPageRead = 0xD2,
    ContinuousArrayReadLf = 0x03,
    ContinuousArrayReadHf1 = 0x0B,
    ContinuousArrayReadHf2 = 0x1B,
    Buffer1ReadLf = 0xD1,
    Buffer2ReadLf = 0xD3,

    // Program and erase
    Buffer1Write = 0x84,
    Buffer2Write = 0x87,
    Buffer1ToPageWithErase = 0x83,
    Buffer2ToPageWithErase = 0x86,
    Buffer1ToPageWithoutErase = 0x88,
    Buffer2ToPageWithoutErase = 0x89,
    PageProgramThroughBuffer1 = 0x82,
    PageProgramThroughBuffer2 = 0x85,
    ProgramThroughBuffer1WithoutErase = 0x02,
    ReadModifyWriteBuffer1 = 0x58,
    ReadModifyWriteBuffer2 = 0x59,
    PageErase = 0x81,
    BlockErase = 0x50,
    SectorErase = 0x7C,

    // Additional
    StatusRead = 0xD7,
    ReadDeviceInfo = 0x9F,
}

impl Command {
    /// Dummy bytes clocked between the address and the data
    pub(crate) fn dummy_bytes(self) -> usize {
        match self {
            Command::ContinuousArrayReadHf1 => 1,
            Command::ContinuousArrayReadHf2 => 2,
            Command::MainMemoryPageRead => 4,
            _ => 0,
        }
    }
}

/// Multi byte opcodes, sent as is
pub(crate) const CHIP_ERASE: [u8; 4] = [0xC7, 0x94, 0x80, 0x9A];
pub(crate) const CONFIGURE_BINARY_PAGE_SIZE: [u8; 4] = [0x3D, 0x2A, 0x80, 0xA6];
pub(crate) const CONFIGURE_EXTENDED_PAGE_SIZE: [u8; 4] = [0x3D, 0x2A, 0x80, 0xA7];

/// Opcode, address and dummy bytes of one command, built fresh for every call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CommandFrame {
    bytes: [u8; MAX_FRAME_LEN],
    len: usize,
}

impl CommandFrame {
    pub(crate) fn new(command: Command, address: PackedAddress) -> Self {
        let mut bytes = [DUMMY; MAX_FRAME_LEN];
        bytes[0] = command as u8;
        let address = address.as_bytes();
        bytes[1..1 + address.len()].copy_from_slice(address);
        let len = 1 + address.len() + command.dummy_bytes();
        Self { bytes, len }
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}
