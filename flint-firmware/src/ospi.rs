//! OCTOSPI transport for the flash driver.
//!
//! Maps the driver's transaction descriptor onto the peripheral's
//! transfer configuration. Transfers run to completion inside the call
//! and the matching completion signal is raised through the registry on
//! the way out, the same contract the simulated bus follows.

use embassy_stm32::mode::Blocking;
use embassy_stm32::ospi::{AddressSize, DummyCycles, Ospi, OspiWidth, TransferConfig};
use embassy_stm32::peripherals::OCTOSPI1;

use flint_hal::qspi::{BusError, Command, LineMode, Phase, QspiBus};
use flint_hal::signals::{BusId, Completion, SignalRegistry};

/// Retry budget for the software status-poll loop
const POLL_ATTEMPTS: usize = 100_000;

pub struct FlashBus {
    ospi: Ospi<'static, OCTOSPI1, Blocking>,
    registry: &'static SignalRegistry,
    id: BusId,
}

impl FlashBus {
    pub fn new(
        ospi: Ospi<'static, OCTOSPI1, Blocking>,
        registry: &'static SignalRegistry,
        id: BusId,
    ) -> Self {
        Self { ospi, registry, id }
    }
}

fn width(lines: LineMode) -> OspiWidth {
    match lines {
        LineMode::Single => OspiWidth::SING,
        LineMode::Dual => OspiWidth::DUAL,
        LineMode::Quad => OspiWidth::QUAD,
    }
}

fn size(bytes: u8) -> AddressSize {
    match bytes {
        1 => AddressSize::_8Bit,
        2 => AddressSize::_16Bit,
        3 => AddressSize::_24bit,
        _ => AddressSize::_32bit,
    }
}

fn dummy(count: u8) -> DummyCycles {
    match count {
        0 => DummyCycles::_0,
        1 => DummyCycles::_1,
        2 => DummyCycles::_2,
        3 => DummyCycles::_3,
        4 => DummyCycles::_4,
        5 => DummyCycles::_5,
        6 => DummyCycles::_6,
        7 => DummyCycles::_7,
        8 => DummyCycles::_8,
        9 => DummyCycles::_9,
        10 => DummyCycles::_10,
        11 => DummyCycles::_11,
        12 => DummyCycles::_12,
        13 => DummyCycles::_13,
        14 => DummyCycles::_14,
        15 => DummyCycles::_15,
        16 => DummyCycles::_16,
        17 => DummyCycles::_17,
        18 => DummyCycles::_18,
        19 => DummyCycles::_19,
        20 => DummyCycles::_20,
        21 => DummyCycles::_21,
        22 => DummyCycles::_22,
        23 => DummyCycles::_23,
        24 => DummyCycles::_24,
        25 => DummyCycles::_25,
        26 => DummyCycles::_26,
        27 => DummyCycles::_27,
        28 => DummyCycles::_28,
        29 => DummyCycles::_29,
        30 => DummyCycles::_30,
        _ => DummyCycles::_31,
    }
}

fn transfer_config(command: &Command) -> TransferConfig {
    let mut config = TransferConfig::default();

    if let Some(opcode) = command.opcode {
        config.instruction = Some(opcode as u32);
        config.iwidth = OspiWidth::SING;
    }
    if let Some(Phase { value, width: w, lines }) = command.address {
        config.address = Some(value);
        config.adsize = size(w);
        config.adwidth = width(lines);
    }
    if let Some(Phase { value, width: w, lines }) = command.alternate {
        config.alternate_bytes = Some(value);
        config.absize = size(w);
        config.abwidth = width(lines);
    }
    if let Some(data) = command.data {
        config.dwidth = width(data.lines);
    }
    config.dummy = dummy(command.dummy_cycles);

    config
}

impl QspiBus for FlashBus {
    fn transmit(&mut self, command: &Command, data: Option<&[u8]>) -> Result<(), BusError> {
        let config = transfer_config(command);
        let completion = match data {
            Some(data) if !data.is_empty() => {
                self.ospi
                    .blocking_write(data, config)
                    .map_err(|_| BusError::Transfer)?;
                Completion::Transmit
            }
            _ => {
                self.ospi
                    .blocking_command(&config)
                    .map_err(|_| BusError::Transfer)?;
                Completion::Command
            }
        };
        self.registry.raise(self.id, completion);
        Ok(())
    }

    fn receive(&mut self, command: &Command, buf: &mut [u8]) -> Result<(), BusError> {
        let config = transfer_config(command);
        self.ospi
            .blocking_read(buf, config)
            .map_err(|_| BusError::Transfer)?;
        self.registry.raise(self.id, Completion::Receive);
        Ok(())
    }

    fn auto_poll(
        &mut self,
        command: &Command,
        target: u8,
        mask: u8,
        _interval: u8,
    ) -> Result<(), BusError> {
        // Software status polling; the match raises the same signal the
        // hardware auto-poll interrupt would.
        let config = transfer_config(command);
        let mut status = [0u8; 1];
        for _ in 0..POLL_ATTEMPTS {
            self.ospi
                .blocking_read(&mut status, config)
                .map_err(|_| BusError::Transfer)?;
            if status[0] & mask == target {
                self.registry.raise(self.id, Completion::StatusMatch);
                return Ok(());
            }
        }
        Err(BusError::Busy)
    }
}
