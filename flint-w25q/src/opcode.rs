//! W25Qxx instruction set.
//!
//! Opcodes and phase layouts follow the Winbond W25Q series datasheet;
//! the notes kept here are the ones that matter for driver correctness.

/// W25Qxx command opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Opcode {
    /// Sets WEL; required before any program, erase or register write
    WriteEnable = 0x06,
    /// Write enable for volatile status-register bits only (no WEL)
    WriteEnableVolatileSr = 0x50,
    WriteDisable = 0x04,

    ReadSr1 = 0x05,
    ReadSr2 = 0x35,
    ReadSr3 = 0x15,
    /// Non-volatile SR bits need WriteEnable first, volatile bits
    /// WriteEnableVolatileSr. SRL and LB[3:1] can never go 1 -> 0.
    WriteSr1 = 0x01,
    WriteSr2 = 0x31,
    WriteSr3 = 0x11,

    /// Standard-SPI-only sequential read; ignored while BUSY is set
    ReadData = 0x03,
    /// Sequential read at full clock; 8 dummy cycles after the address
    FastRead = 0x0B,
    /// Data on IO0/IO1; instruction and address still on one line
    FastReadDualOutput = 0x3B,
    /// Data on IO0-IO3; QE bit must be set first
    FastReadQuadOutput = 0x6B,
    /// Address and data both on two lines, 4 dummy cycles
    FastReadDualIo = 0xBB,
    /// Address and data both on four lines, 4 dummy cycles; QE required
    FastReadQuadIo = 0xEB,

    /// Wrap configuration for FastReadQuadIo; 6 dummy cycles then one
    /// quad-line alternate byte (bit4 disables, bits 6:5 pick the length)
    SetBurstWithWrap = 0x77,

    /// Programs up to one 256-byte page; clocking past the page end
    /// wraps back to the page start instead of advancing
    PageProgram = 0x02,
    /// Page program with the data phase on four lines; QE required
    QuadInputPageProgram = 0x32,

    /// 4 KiB erase; WEL must be set
    SectorErase = 0x20,
    BlockErase32K = 0x52,
    BlockErase64K = 0xD8,
    ChipErase = 0xC7,
    /// Alternate chip-erase encoding accepted by the device
    ChipEraseAlt = 0x60,

    /// Invalid for chip erase; no nested suspend of the same kind
    EraseProgramSuspend = 0x75,
    /// Ignored when SUS is clear or BUSY is set
    EraseProgramResume = 0x7A,

    /// Only ReleasePowerDown is recognized afterwards
    PowerDown = 0xB9,
    /// Doubles as the legacy device-id read: three dummy bytes, then
    /// the 8-bit device id
    ReleasePowerDown = 0xAB,

    /// Manufacturer + device id at address 0
    ReadManufacturerDeviceId = 0x90,
    /// Dual-I/O variant; 24-bit zero address, 4 dummy cycles
    ReadManufacturerDeviceIdDualIo = 0x92,
    /// Quad-I/O variant; 6 dummy cycles
    ReadManufacturerDeviceIdQuadIo = 0x94,
    /// 64-bit factory-programmed serial; four alternate bytes of zeros
    ReadUniqueId = 0x4B,
    ReadJedecId = 0x9F,
    /// A7-A0 select the starting byte of the 256-byte SFDP table
    ReadSfdpRegister = 0x5A,

    /// A13:A12 select the security register (01, 10, 11)
    EraseSecurityRegister = 0x44,
    ProgramSecurityRegister = 0x42,
    /// 8 dummy cycles after the address
    ReadSecurityRegister = 0x48,

    /// Per-sector/block write protection; WPS and WEL must be set
    IndividualBlockLock = 0x36,
    IndividualBlockUnlock = 0x39,
    ReadBlockLock = 0x3D,
    GlobalBlockLock = 0x7E,
    GlobalBlockUnlock = 0x98,

    /// Any command other than Reset after EnableReset drops the armed state
    EnableReset = 0x66,
    Reset = 0x99,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcodes_match_datasheet() {
        assert_eq!(Opcode::WriteEnable as u8, 0x06);
        assert_eq!(Opcode::ReadJedecId as u8, 0x9F);
        assert_eq!(Opcode::FastReadQuadOutput as u8, 0x6B);
        assert_eq!(Opcode::QuadInputPageProgram as u8, 0x32);
        assert_eq!(Opcode::SectorErase as u8, 0x20);
        assert_eq!(Opcode::ReleasePowerDown as u8, 0xAB);
        assert_eq!(Opcode::ReadSfdpRegister as u8, 0x5A);
        assert_eq!(Opcode::Reset as u8, 0x99);
    }
}
