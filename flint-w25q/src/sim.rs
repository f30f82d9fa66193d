//! In-memory flash model for host tests.
//!
//! `SimBus` behaves like a W25Qxx behind a QSPI peripheral: programs AND
//! bytes into the array and wrap within their 256-byte page, erases set
//! 0xFF, and every transfer raises the same completion signal the real
//! interrupt handler would, through a [`SignalRegistry`]. Transfers
//! complete inline before the bus call returns, so a waiter polling the
//! signal afterwards finds it already raised.

use alloc::vec;
use alloc::vec::Vec;

use flint_hal::qspi::{BusError, Command, QspiBus};
use flint_hal::signals::{BusId, Completion, SignalRegistry};

use crate::opcode::Opcode;

const PAGE_LEN: usize = 256;
const SECTOR_LEN: usize = 4096;

/// Simulated flash array and bus front-end
pub struct SimBus {
    mem: Vec<u8>,
    wel: bool,
    registry: &'static SignalRegistry,
    id: BusId,
    /// When set, transmit paths fail without raising any completion,
    /// modelling a wedged peripheral
    pub fail_writes: bool,
    /// Same for receive paths
    pub fail_reads: bool,
}

impl SimBus {
    /// Create a blank (all-0xFF) array of `capacity` bytes
    pub fn new(capacity: usize, registry: &'static SignalRegistry, id: BusId) -> Self {
        Self {
            mem: vec![0xFF; capacity],
            wel: false,
            registry,
            id,
            fail_writes: false,
            fail_reads: false,
        }
    }

    /// Direct view of the array, for test assertions
    pub fn contents(&self) -> &[u8] {
        &self.mem
    }

    fn program(&mut self, address: usize, data: &[u8]) {
        let page_start = address & !(PAGE_LEN - 1);
        let mut offset = address - page_start;
        for byte in data {
            // NOR programming only clears bits; wrap within the page.
            self.mem[page_start + offset] &= *byte;
            offset = (offset + 1) % PAGE_LEN;
        }
    }

    fn erase(&mut self, address: usize, len: usize) {
        let start = address & !(len - 1);
        for byte in &mut self.mem[start..start + len] {
            *byte = 0xFF;
        }
    }
}

impl QspiBus for SimBus {
    fn transmit(&mut self, command: &Command, data: Option<&[u8]>) -> Result<(), BusError> {
        if self.fail_writes {
            return Err(BusError::Transfer);
        }

        let address = command.address.map(|a| a.value as usize).unwrap_or(0);
        match command.opcode {
            Some(op) if op == Opcode::WriteEnable as u8 => self.wel = true,
            Some(op) if op == Opcode::WriteDisable as u8 => self.wel = false,
            Some(op)
                if op == Opcode::PageProgram as u8
                    || op == Opcode::QuadInputPageProgram as u8 =>
            {
                if self.wel {
                    if let Some(data) = data {
                        self.program(address, data);
                    }
                    self.wel = false;
                }
            }
            Some(op) if op == Opcode::SectorErase as u8 => {
                if self.wel {
                    self.erase(address, SECTOR_LEN);
                    self.wel = false;
                }
            }
            Some(op) if op == Opcode::BlockErase32K as u8 => {
                if self.wel {
                    self.erase(address, 32 * 1024);
                    self.wel = false;
                }
            }
            Some(op) if op == Opcode::BlockErase64K as u8 => {
                if self.wel {
                    self.erase(address, 64 * 1024);
                    self.wel = false;
                }
            }
            Some(op) if op == Opcode::ChipErase as u8 || op == Opcode::ChipEraseAlt as u8 => {
                if self.wel {
                    let len = self.mem.len();
                    self.erase(0, len);
                    self.wel = false;
                }
            }
            _ => {}
        }

        let completion = if command.data.is_some() {
            Completion::Transmit
        } else {
            Completion::Command
        };
        self.registry.raise(self.id, completion);
        Ok(())
    }

    fn receive(&mut self, command: &Command, buf: &mut [u8]) -> Result<(), BusError> {
        if self.fail_reads {
            return Err(BusError::Transfer);
        }

        let is_read = matches!(
            command.opcode,
            Some(op) if op == Opcode::ReadData as u8
                || op == Opcode::FastRead as u8
                || op == Opcode::FastReadDualOutput as u8
                || op == Opcode::FastReadQuadOutput as u8
                || op == Opcode::FastReadDualIo as u8
                || op == Opcode::FastReadQuadIo as u8
        );

        if is_read {
            let address = command.address.map(|a| a.value as usize).unwrap_or(0);
            buf.copy_from_slice(&self.mem[address..address + buf.len()]);
        } else {
            // Identification and register reads: no modelled content.
            buf.fill(0);
        }

        self.registry.raise(self.id, Completion::Receive);
        Ok(())
    }

    fn auto_poll(
        &mut self,
        _command: &Command,
        _target: u8,
        _mask: u8,
        _interval: u8,
    ) -> Result<(), BusError> {
        if self.fail_writes {
            return Err(BusError::Transfer);
        }
        // The array never stays busy, so every poll matches immediately.
        self.registry.raise(self.id, Completion::StatusMatch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flint_hal::qspi::LineMode;
    use crate::protocol::{encode, Element};

    extern crate std;
    use std::boxed::Box;

    fn fixture() -> (SimBus, &'static flint_hal::signals::FlashSignals) {
        let registry: &'static SignalRegistry = Box::leak(Box::new(SignalRegistry::new()));
        let signals = Box::leak(Box::new(flint_hal::signals::FlashSignals::new()));
        registry.register(BusId(0), signals).unwrap();
        (SimBus::new(64 * 1024, registry, BusId(0)), signals)
    }

    fn program_cmd(address: u32, len: usize) -> Command {
        encode(&[
            Element::instruction(Opcode::PageProgram),
            Element::address(address, 3, LineMode::Single),
            Element::data(len, LineMode::Single),
        ])
    }

    #[test]
    fn program_requires_write_enable() {
        let (mut bus, signals) = fixture();

        bus.transmit(&program_cmd(0, 2), Some(&[0x12, 0x34])).unwrap();
        assert_eq!(&bus.contents()[..2], &[0xFF, 0xFF]);

        bus.transmit(&encode(&[Element::instruction(Opcode::WriteEnable)]), None)
            .unwrap();
        bus.transmit(&program_cmd(0, 2), Some(&[0x12, 0x34])).unwrap();
        assert_eq!(&bus.contents()[..2], &[0x12, 0x34]);
        assert!(signals.tx_done.try_take().is_some());
    }

    #[test]
    fn program_wraps_within_its_page() {
        let (mut bus, _) = fixture();
        bus.transmit(&encode(&[Element::instruction(Opcode::WriteEnable)]), None)
            .unwrap();
        // Two bytes starting at the last byte of page 0.
        bus.transmit(&program_cmd(255, 2), Some(&[0xAA, 0xBB])).unwrap();
        assert_eq!(bus.contents()[255], 0xAA);
        assert_eq!(bus.contents()[0], 0xBB);
        assert_eq!(bus.contents()[256], 0xFF);
    }

    #[test]
    fn sector_erase_restores_ff() {
        let (mut bus, signals) = fixture();
        bus.transmit(&encode(&[Element::instruction(Opcode::WriteEnable)]), None)
            .unwrap();
        bus.transmit(&program_cmd(100, 1), Some(&[0x00])).unwrap();

        bus.transmit(&encode(&[Element::instruction(Opcode::WriteEnable)]), None)
            .unwrap();
        let erase = encode(&[
            Element::instruction(Opcode::SectorErase),
            Element::address(100, 3, LineMode::Single),
        ]);
        bus.transmit(&erase, None).unwrap();
        assert_eq!(bus.contents()[100], 0xFF);
        assert!(signals.cmd_done.try_take().is_some());
    }

    #[test]
    fn read_returns_array_contents() {
        let (mut bus, signals) = fixture();
        bus.transmit(&encode(&[Element::instruction(Opcode::WriteEnable)]), None)
            .unwrap();
        bus.transmit(&program_cmd(16, 4), Some(&[1, 2, 3, 4])).unwrap();

        let read = encode(&[
            Element::instruction(Opcode::FastReadQuadOutput),
            Element::address(16, 3, LineMode::Single),
            Element::dummy_cycles(8),
            Element::data(4, LineMode::Quad),
        ]);
        let mut buf = [0u8; 4];
        bus.receive(&read, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        assert!(signals.rx_done.try_take().is_some());
    }

    #[test]
    fn failing_bus_raises_nothing() {
        let (mut bus, signals) = fixture();
        bus.fail_writes = true;
        // Drain whatever an earlier call may have left.
        signals.tx_done.reset();
        signals.cmd_done.reset();

        let err = bus.transmit(&program_cmd(0, 1), Some(&[0]));
        assert_eq!(err, Err(BusError::Transfer));
        assert!(signals.tx_done.try_take().is_none());
        assert!(signals.cmd_done.try_take().is_none());

        bus.fail_reads = true;
        signals.rx_done.reset();
        let read = encode(&[
            Element::instruction(Opcode::ReadData),
            Element::address(0, 3, LineMode::Single),
            Element::data(1, LineMode::Single),
        ]);
        let mut buf = [0u8; 1];
        assert_eq!(bus.receive(&read, &mut buf), Err(BusError::Transfer));
        assert!(signals.rx_done.try_take().is_none());
    }
}
