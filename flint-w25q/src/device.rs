//! W25Qxx device driver.
//!
//! Identification and status-register reads are two-phase: the enquiry
//! issues a command+receive transaction into the shared scratch buffer
//! and queues a receive assignment; a later explicit [`W25q::resolve`]
//! drains the assignments in FIFO order, copying each scratch region to
//! its destination field in reversed byte order (the flash shifts
//! multi-byte values out MSB first). `resolve` must run once per enquiry
//! before the next enquiry is issued; serialization is the caller's job,
//! guaranteed in this firmware by the filesystem task being the only
//! caller.

use heapless::Vec;

use flint_hal::qspi::{BusError, LineMode, QspiBus};

use crate::opcode::Opcode;
use crate::protocol::{encode, Element};

/// Size of the shared receive scratch buffer
pub const SCRATCH_LEN: usize = 128;

/// Maximum receive assignments queued between two resolve calls
const MAX_PENDING: usize = 8;

/// Auto-polling sample interval in clock cycles
const POLL_INTERVAL: u8 = 2;

/// Driver error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Rejected input (empty program buffer, wrong security-register length)
    Invalid,
    /// The bus reported a transfer failure
    Bus,
}

impl From<BusError> for Error {
    fn from(_: BusError) -> Self {
        Error::Bus
    }
}

/// Status-register selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StatusRegister {
    Sr1,
    Sr2,
    Sr3,
}

/// Security-register selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecurityRegister {
    Sec1,
    Sec2,
    Sec3,
}

impl SecurityRegister {
    /// A15-A12 bits selecting the register in the address phase
    fn address_bits(self) -> u32 {
        match self {
            SecurityRegister::Sec1 => 1 << 12,
            SecurityRegister::Sec2 => 1 << 13,
            SecurityRegister::Sec3 => (1 << 12) | (1 << 13),
        }
    }
}

/// Wrap length for burst reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WrapLen {
    /// Wrap disabled
    Disable,
    Wrap8,
    Wrap16,
    Wrap32,
    Wrap64,
}

/// Device state targeted by the auto-polling wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceState {
    /// BUSY bit clear, device accepts the next operation
    Free,
    /// Program or erase in progress
    Busy,
    /// Program or erase suspended
    Suspend,
}

/// Destination of one queued receive assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxTarget {
    ManufacturerId,
    DeviceId16,
    DeviceId8,
    UniqueId,
    StatusRegister1,
    StatusRegister2,
    StatusRegister3,
    Sfdp,
}

#[derive(Debug, Clone, Copy)]
struct RxAssign {
    target: RxTarget,
    len: u8,
}

/// W25Qxx NOR flash device
///
/// Owns the device register mirror and the receive scratch buffer.
/// Exactly one task may drive a device instance at a time.
pub struct W25q<B: QspiBus> {
    bus: B,
    scratch: [u8; SCRATCH_LEN],
    pending: Vec<RxAssign, MAX_PENDING>,
    manufacturer_id: u8,
    device_id16: u16,
    device_id8: u8,
    unique_id: u64,
    sr1: u8,
    sr2: u8,
    sr3: u8,
    sfdp: u64,
}

impl<B: QspiBus> W25q<B> {
    /// Wrap a bus instance
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            scratch: [0; SCRATCH_LEN],
            pending: Vec::new(),
            manufacturer_id: 0,
            device_id16: 0,
            device_id8: 0,
            unique_id: 0,
            sr1: 0,
            sr2: 0,
            sr3: 0,
            sfdp: 0,
        }
    }

    /// Direct access to the underlying bus
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    fn push_assign(&mut self, target: RxTarget, len: u8) {
        // Overflow here means enquiries were issued without resolving;
        // the extra assignment is dropped like the extra data would be.
        let _ = self.pending.push(RxAssign { target, len });
    }

    /* identification enquiries */

    /// Issue a JEDEC id read; queues manufacturer id and 16-bit device id
    pub fn enquire_jedec_id(&mut self) -> Result<(), Error> {
        let cmd = encode(&[
            Element::instruction(Opcode::ReadJedecId),
            Element::data(3, LineMode::Single),
        ]);
        let ret = self.bus.receive(&cmd, &mut self.scratch[..3]);

        self.push_assign(RxTarget::ManufacturerId, 1);
        self.push_assign(RxTarget::DeviceId16, 2);

        ret.map_err(Error::from)
    }

    /// Issue the legacy 8-bit device id read (three dummy bytes first)
    pub fn enquire_device_id(&mut self) -> Result<(), Error> {
        let cmd = encode(&[
            Element::instruction(Opcode::ReleasePowerDown),
            Element::dummy_cycles(3 * 8),
            Element::data(1, LineMode::Single),
        ]);
        let ret = self.bus.receive(&cmd, &mut self.scratch[..1]);

        self.push_assign(RxTarget::DeviceId8, 1);

        ret.map_err(Error::from)
    }

    /// Issue the unique id read
    pub fn enquire_unique_id(&mut self) -> Result<(), Error> {
        let cmd = encode(&[
            Element::instruction(Opcode::ReadUniqueId),
            Element::dummy_cycles(3 * 8),
            Element::data(4, LineMode::Single),
            Element::alternate(0x00, 1, LineMode::Single),
        ]);
        let ret = self.bus.receive(&cmd, &mut self.scratch[..4]);

        self.push_assign(RxTarget::UniqueId, 4);

        ret.map_err(Error::from)
    }

    /// Issue a status-register read; resolves into the register mirror
    pub fn enquire_status_register(&mut self, sr: StatusRegister) -> Result<(), Error> {
        let (opcode, target) = match sr {
            StatusRegister::Sr1 => (Opcode::ReadSr1, RxTarget::StatusRegister1),
            StatusRegister::Sr2 => (Opcode::ReadSr2, RxTarget::StatusRegister2),
            StatusRegister::Sr3 => (Opcode::ReadSr3, RxTarget::StatusRegister3),
        };

        let cmd = encode(&[
            Element::instruction(opcode),
            Element::data(1, LineMode::Single),
        ]);
        let ret = self.bus.receive(&cmd, &mut self.scratch[..1]);

        self.push_assign(target, 1);

        ret.map_err(Error::from)
    }

    /// Issue the manufacturer + device id read at address 0
    pub fn enquire_man_dev_id(&mut self) -> Result<(), Error> {
        let cmd = encode(&[
            Element::instruction(Opcode::ReadManufacturerDeviceId),
            Element::address(0x00, 3, LineMode::Single),
            Element::data(2, LineMode::Single),
        ]);
        let ret = self.bus.receive(&cmd, &mut self.scratch[..2]);

        self.push_assign(RxTarget::ManufacturerId, 1);
        self.push_assign(RxTarget::DeviceId8, 1);

        ret.map_err(Error::from)
    }

    /// Dual-I/O variant of the manufacturer + device id read
    pub fn enquire_man_dev_id_dual_io(&mut self) -> Result<(), Error> {
        let cmd = encode(&[
            Element::instruction(Opcode::ReadManufacturerDeviceIdDualIo),
            Element::address(0x00, 3, LineMode::Dual),
            Element::dummy_cycles(4),
            Element::data(4, LineMode::Dual),
        ]);
        let ret = self.bus.receive(&cmd, &mut self.scratch[..4]);

        self.push_assign(RxTarget::ManufacturerId, 1);
        self.push_assign(RxTarget::DeviceId8, 1);

        ret.map_err(Error::from)
    }

    /// Quad-I/O variant of the manufacturer + device id read
    pub fn enquire_man_dev_id_quad_io(&mut self) -> Result<(), Error> {
        let cmd = encode(&[
            Element::instruction(Opcode::ReadManufacturerDeviceIdQuadIo),
            Element::address(0x00, 3, LineMode::Quad),
            Element::dummy_cycles(6),
            Element::data(6, LineMode::Quad),
        ]);
        let ret = self.bus.receive(&cmd, &mut self.scratch[..6]);

        self.push_assign(RxTarget::ManufacturerId, 1);
        self.push_assign(RxTarget::DeviceId8, 1);

        ret.map_err(Error::from)
    }

    /// Issue an SFDP register read
    pub fn enquire_sfdp_register(&mut self) -> Result<(), Error> {
        let cmd = encode(&[
            Element::instruction(Opcode::ReadSfdpRegister),
            Element::address(0x00, 3, LineMode::Single),
            Element::dummy_cycles(8),
            Element::data(2, LineMode::Single),
        ]);
        let ret = self.bus.receive(&cmd, &mut self.scratch[..2]);

        self.push_assign(RxTarget::Sfdp, 2);

        ret.map_err(Error::from)
    }

    /// Drain pending receive assignments in FIFO order.
    ///
    /// Each destination receives the bytes of its scratch region in
    /// reversed order: the flash shifts multi-byte values out MSB
    /// first, so the last received byte is the least significant one.
    /// Call once after each enquiry completes, before the next enquiry.
    pub fn resolve(&mut self) {
        let mut index = 0;
        for i in 0..self.pending.len() {
            let assign = self.pending[i];
            let len = assign.len as usize;
            let value = reversed_value(&self.scratch[index..index + len]);
            match assign.target {
                RxTarget::ManufacturerId => self.manufacturer_id = value as u8,
                RxTarget::DeviceId16 => self.device_id16 = value as u16,
                RxTarget::DeviceId8 => self.device_id8 = value as u8,
                RxTarget::UniqueId => self.unique_id = value,
                RxTarget::StatusRegister1 => self.sr1 = value as u8,
                RxTarget::StatusRegister2 => self.sr2 = value as u8,
                RxTarget::StatusRegister3 => self.sr3 = value as u8,
                RxTarget::Sfdp => self.sfdp = value,
            }
            index += len;
        }
        self.pending.clear();
    }

    /* write control */

    /// Set the write-enable latch
    pub fn write_enable(&mut self) -> Result<(), Error> {
        self.command_only(Opcode::WriteEnable)
    }

    /// Write enable for volatile status-register bits
    pub fn write_enable_volatile_sr(&mut self) -> Result<(), Error> {
        self.command_only(Opcode::WriteEnableVolatileSr)
    }

    /// Clear the write-enable latch
    pub fn write_disable(&mut self) -> Result<(), Error> {
        self.command_only(Opcode::WriteDisable)
    }

    /// Write one status register.
    ///
    /// Non-volatile bits require an immediately preceding
    /// [`write_enable`](Self::write_enable).
    pub fn write_register(&mut self, sr: StatusRegister, byte: u8) -> Result<(), Error> {
        let opcode = match sr {
            StatusRegister::Sr1 => Opcode::WriteSr1,
            StatusRegister::Sr2 => Opcode::WriteSr2,
            StatusRegister::Sr3 => Opcode::WriteSr3,
        };
        let cmd = encode(&[
            Element::instruction(opcode),
            Element::data(1, LineMode::Single),
        ]);
        self.bus.transmit(&cmd, Some(&[byte])).map_err(Error::from)
    }

    /* read variants */

    /// Standard-SPI sequential read
    pub fn read_data(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Error> {
        let cmd = encode(&[
            Element::instruction(Opcode::ReadData),
            Element::address(address, 3, LineMode::Single),
            Element::data(buf.len(), LineMode::Single),
        ]);
        self.bus.receive(&cmd, buf).map_err(Error::from)
    }

    /// Fast read, one line, 8 dummy cycles
    pub fn fast_read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Error> {
        let cmd = encode(&[
            Element::instruction(Opcode::FastRead),
            Element::address(address, 3, LineMode::Single),
            Element::dummy_cycles(8),
            Element::data(buf.len(), LineMode::Single),
        ]);
        self.bus.receive(&cmd, buf).map_err(Error::from)
    }

    /// Fast read with the data phase on two lines
    pub fn fast_read_dual_output(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Error> {
        let cmd = encode(&[
            Element::instruction(Opcode::FastReadDualOutput),
            Element::address(address, 3, LineMode::Single),
            Element::dummy_cycles(8),
            Element::data(buf.len(), LineMode::Dual),
        ]);
        self.bus.receive(&cmd, buf).map_err(Error::from)
    }

    /// Fast read with the data phase on four lines
    pub fn fast_read_quad_output(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Error> {
        let cmd = encode(&[
            Element::instruction(Opcode::FastReadQuadOutput),
            Element::address(address, 3, LineMode::Single),
            Element::dummy_cycles(8),
            Element::data(buf.len(), LineMode::Quad),
        ]);
        self.bus.receive(&cmd, buf).map_err(Error::from)
    }

    /// Fast read with address and data on two lines, 4 dummy cycles
    pub fn fast_read_dual_io(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Error> {
        let cmd = encode(&[
            Element::instruction(Opcode::FastReadDualIo),
            Element::address(address, 3, LineMode::Dual),
            Element::dummy_cycles(4),
            Element::data(buf.len(), LineMode::Dual),
        ]);
        self.bus.receive(&cmd, buf).map_err(Error::from)
    }

    /// Fast read with address and data on four lines, 4 dummy cycles
    pub fn fast_read_quad_io(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Error> {
        let cmd = encode(&[
            Element::instruction(Opcode::FastReadQuadIo),
            Element::address(address, 3, LineMode::Quad),
            Element::dummy_cycles(4),
            Element::data(buf.len(), LineMode::Quad),
        ]);
        self.bus.receive(&cmd, buf).map_err(Error::from)
    }

    /// Configure burst-with-wrap for quad-I/O reads
    pub fn set_burst_with_wrap(&mut self, len: WrapLen) -> Result<(), Error> {
        let (bit6, bit5, bit4) = match len {
            WrapLen::Disable => (0, 0, 1),
            WrapLen::Wrap8 => (0, 0, 0),
            WrapLen::Wrap16 => (1, 0, 0),
            WrapLen::Wrap32 => (0, 1, 0),
            WrapLen::Wrap64 => (1, 1, 0),
        };
        let byte = (bit4 << 4) | (bit5 << 5) | (bit6 << 6);

        let cmd = encode(&[
            Element::instruction(Opcode::SetBurstWithWrap),
            Element::alternate(byte, 1, LineMode::Quad),
            Element::dummy_cycles(6),
        ]);
        self.bus.transmit(&cmd, None).map_err(Error::from)
    }

    /* program variants */

    /// Program up to one page over a single line.
    ///
    /// The caller must keep `data` inside one 256-byte page; the device
    /// wraps within the page instead of advancing past it.
    pub fn page_program(&mut self, address: u32, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() {
            return Err(Error::Invalid);
        }
        let cmd = encode(&[
            Element::instruction(Opcode::PageProgram),
            Element::address(address, 3, LineMode::Single),
            Element::data(data.len(), LineMode::Single),
        ]);
        self.bus.transmit(&cmd, Some(data)).map_err(Error::from)
    }

    /// Page program with the data phase on four lines
    pub fn quad_input_page_program(&mut self, address: u32, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() {
            return Err(Error::Invalid);
        }
        let cmd = encode(&[
            Element::instruction(Opcode::QuadInputPageProgram),
            Element::address(address, 3, LineMode::Single),
            Element::data(data.len(), LineMode::Quad),
        ]);
        self.bus.transmit(&cmd, Some(data)).map_err(Error::from)
    }

    /* erase variants, all requiring a prior write_enable */

    /// Erase the 4 KiB sector containing `address`
    pub fn sector_erase(&mut self, address: u32) -> Result<(), Error> {
        self.erase_at(Opcode::SectorErase, address)
    }

    /// Erase the 32 KiB block containing `address`
    pub fn block_erase_32k(&mut self, address: u32) -> Result<(), Error> {
        self.erase_at(Opcode::BlockErase32K, address)
    }

    /// Erase the 64 KiB block containing `address`
    pub fn block_erase_64k(&mut self, address: u32) -> Result<(), Error> {
        self.erase_at(Opcode::BlockErase64K, address)
    }

    /// Erase the whole chip
    pub fn chip_erase(&mut self) -> Result<(), Error> {
        self.command_only(Opcode::ChipErase)
    }

    fn erase_at(&mut self, opcode: Opcode, address: u32) -> Result<(), Error> {
        let cmd = encode(&[
            Element::instruction(opcode),
            Element::address(address, 3, LineMode::Single),
        ]);
        self.bus.transmit(&cmd, None).map_err(Error::from)
    }

    /* suspend / power */

    /// Suspend a running program or erase
    pub fn erase_or_program_suspend(&mut self) -> Result<(), Error> {
        self.command_only(Opcode::EraseProgramSuspend)
    }

    /// Resume a suspended program or erase
    pub fn erase_or_program_resume(&mut self) -> Result<(), Error> {
        self.command_only(Opcode::EraseProgramResume)
    }

    /// Enter power-down; only power_up is recognized afterwards
    pub fn power_down(&mut self) -> Result<(), Error> {
        self.command_only(Opcode::PowerDown)
    }

    /// Release power-down
    pub fn power_up(&mut self) -> Result<(), Error> {
        self.command_only(Opcode::ReleasePowerDown)
    }

    /* security registers */

    /// Erase one 256-byte security register
    pub fn erase_security_register(&mut self, sr: SecurityRegister) -> Result<(), Error> {
        let cmd = encode(&[
            Element::instruction(Opcode::EraseSecurityRegister),
            Element::address(sr.address_bits(), 3, LineMode::Single),
        ]);
        self.bus.transmit(&cmd, None).map_err(Error::from)
    }

    /// Program one security register; the device expects exactly 255 bytes
    pub fn program_security_register(
        &mut self,
        sr: SecurityRegister,
        data: &[u8],
    ) -> Result<(), Error> {
        if data.len() != 0xFF {
            return Err(Error::Invalid);
        }
        let cmd = encode(&[
            Element::instruction(Opcode::ProgramSecurityRegister),
            Element::address(sr.address_bits(), 3, LineMode::Single),
            Element::data(data.len(), LineMode::Single),
        ]);
        self.bus.transmit(&cmd, Some(data)).map_err(Error::from)
    }

    /// Read from one security register starting at `address` within it
    pub fn read_security_register(
        &mut self,
        sr: SecurityRegister,
        address: u8,
        buf: &mut [u8],
    ) -> Result<(), Error> {
        let addr = sr.address_bits() | u32::from(address);
        let cmd = encode(&[
            Element::instruction(Opcode::ReadSecurityRegister),
            Element::address(addr, 3, LineMode::Single),
            Element::data(buf.len(), LineMode::Single),
        ]);
        self.bus.receive(&cmd, buf).map_err(Error::from)
    }

    /* block locking */

    /// Lock the sector/block containing `address` (WPS and WEL required)
    pub fn lock_block(&mut self, address: u32) -> Result<(), Error> {
        let cmd = encode(&[
            Element::instruction(Opcode::IndividualBlockLock),
            Element::address(address, 3, LineMode::Single),
        ]);
        self.bus.transmit(&cmd, None).map_err(Error::from)
    }

    /// Unlock the sector/block containing `address`
    pub fn unlock_block(&mut self, address: u32) -> Result<(), Error> {
        let cmd = encode(&[
            Element::instruction(Opcode::IndividualBlockUnlock),
            Element::address(address, 3, LineMode::Single),
        ]);
        self.bus.transmit(&cmd, None).map_err(Error::from)
    }

    /// Read the lock bit of the sector/block containing `address`
    pub fn read_block_lock(&mut self, address: u32, locked: &mut [u8; 1]) -> Result<(), Error> {
        let cmd = encode(&[
            Element::instruction(Opcode::ReadBlockLock),
            Element::address(address, 3, LineMode::Single),
            Element::data(1, LineMode::Single),
        ]);
        self.bus.receive(&cmd, locked).map_err(Error::from)
    }

    /// Lock every sector and block
    pub fn global_lock(&mut self) -> Result<(), Error> {
        self.command_only(Opcode::GlobalBlockLock)
    }

    /// Unlock every sector and block
    pub fn global_unlock(&mut self) -> Result<(), Error> {
        self.command_only(Opcode::GlobalBlockUnlock)
    }

    /* reset */

    /// Arm the software reset
    pub fn reset_enable(&mut self) -> Result<(), Error> {
        self.command_only(Opcode::EnableReset)
    }

    /// Execute the software reset; must directly follow reset_enable
    pub fn reset(&mut self) -> Result<(), Error> {
        self.command_only(Opcode::Reset)
    }

    /* auto-polling */

    /// Start hardware auto-polling until the device reaches `state`.
    ///
    /// Completion is raised through the status-match signal. Only the
    /// `Free` target is supported by the device's SR1 busy bit.
    pub fn wait_for_state(&mut self, state: DeviceState) -> Result<(), Error> {
        let (target, mask, opcode) = match state {
            DeviceState::Free => (0x00, 0x01, Opcode::ReadSr1),
            _ => return Err(Error::Invalid),
        };

        let cmd = encode(&[
            Element::instruction(opcode),
            Element::data(1, LineMode::Single),
        ]);
        self.bus
            .auto_poll(&cmd, target, mask, POLL_INTERVAL)
            .map_err(Error::from)
    }

    fn command_only(&mut self, opcode: Opcode) -> Result<(), Error> {
        let cmd = encode(&[Element::instruction(opcode)]);
        self.bus.transmit(&cmd, None).map_err(Error::from)
    }

    /* register mirror accessors */

    /// BUSY bit of SR1 as last resolved
    pub fn busy_bit(&self) -> u8 {
        self.sr1 & 1
    }

    /// Write-enable latch bit of SR1
    pub fn wel_bit(&self) -> u8 {
        self.sr1 & (1 << 1)
    }

    /// Quad-enable bit of SR2
    pub fn qe_bit(&self) -> u8 {
        self.sr2 & (1 << 1)
    }

    /// Write-protection-scheme bit of SR3
    pub fn wps_bit(&self) -> u8 {
        self.sr3 & (1 << 2)
    }

    /// Suspend bit of SR2
    pub fn sus_bit(&self) -> u8 {
        self.sr2 & (1 << 7)
    }

    /// SR1 as last resolved
    pub fn sr1(&self) -> u8 {
        self.sr1
    }

    /// SR2 as last resolved
    pub fn sr2(&self) -> u8 {
        self.sr2
    }

    /// SR3 as last resolved
    pub fn sr3(&self) -> u8 {
        self.sr3
    }

    /// SFDP register as last resolved
    pub fn sfdp(&self) -> u64 {
        self.sfdp
    }

    /// Manufacturer id as last resolved
    pub fn manufacturer_id(&self) -> u8 {
        self.manufacturer_id
    }

    /// 16-bit device id as last resolved
    pub fn device_id16(&self) -> u16 {
        self.device_id16
    }

    /// 8-bit device id as last resolved
    pub fn device_id8(&self) -> u8 {
        self.device_id8
    }

    /// Unique id as last resolved
    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }
}

/// Interpret a scratch region with its bytes reversed, little-endian.
///
/// Equivalent to a reversed-order byte copy into the destination field
/// on a little-endian target: the last scratch byte lands lowest.
fn reversed_value(src: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    for (dst, src) in bytes.iter_mut().zip(src.iter().rev()) {
        *dst = *src;
    }
    u64::from_le_bytes(bytes)
}
