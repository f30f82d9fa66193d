//! QSPI transaction descriptors and the bus transport trait.
//!
//! A flash transaction is described phase by phase: instruction, address,
//! alternate bytes, dummy cycles and a data phase, each with its own line
//! width. The driver builds a `Command` descriptor and hands it to a
//! `QspiBus` implementation together with the data buffer (if any); the
//! bus starts the transfer and completion arrives later through a
//! [`FlashSignals`](crate::signals::FlashSignals) set.

/// Number of I/O lines used by one transaction phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LineMode {
    /// Standard SPI, one data line
    #[default]
    Single,
    /// Dual SPI, two data lines
    Dual,
    /// Quad SPI, four data lines
    Quad,
}

impl LineMode {
    /// Line count as transmitted on the wire
    pub fn lines(self) -> u8 {
        match self {
            LineMode::Single => 1,
            LineMode::Dual => 2,
            LineMode::Quad => 4,
        }
    }
}

/// Address or alternate-byte phase of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Phase {
    /// Value shifted out during the phase
    pub value: u32,
    /// Width of the phase in bytes (1-4)
    pub width: u8,
    /// Line mode used for this phase
    pub lines: LineMode,
}

/// Data phase of a transaction
///
/// The buffer itself does not live in the descriptor; it is passed
/// alongside to [`QspiBus::transmit`] / [`QspiBus::receive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataPhase {
    /// Transfer length in bytes
    pub len: u16,
    /// Line mode used for the data phase
    pub lines: LineMode,
}

/// One complete transaction descriptor
///
/// Built by folding protocol elements; phases that never appear stay
/// `None` and the peripheral skips them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Command {
    /// Instruction opcode (always shifted out on one line)
    pub opcode: Option<u8>,
    /// Optional address phase
    pub address: Option<Phase>,
    /// Optional alternate-byte phase
    pub alternate: Option<Phase>,
    /// Dummy cycles inserted before the data phase
    pub dummy_cycles: u8,
    /// Optional data phase
    pub data: Option<DataPhase>,
}

/// Errors surfaced by a bus implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// The peripheral rejected or aborted the transfer
    Transfer,
    /// The peripheral is still busy with a previous transfer
    Busy,
}

/// Serial-flash transport
///
/// Implementations start the transfer and return; the matching
/// completion is raised from interrupt context through the signal
/// registry. The simulated bus used in host tests completes transfers
/// inline before returning.
pub trait QspiBus {
    /// Issue a command, optionally shifting out a data phase.
    ///
    /// A command without a data phase completes with
    /// [`Completion::Command`](crate::signals::Completion::Command);
    /// one with a data phase completes with
    /// [`Completion::Transmit`](crate::signals::Completion::Transmit).
    fn transmit(&mut self, command: &Command, data: Option<&[u8]>) -> Result<(), BusError>;

    /// Issue a command and shift the data phase into `buf`.
    ///
    /// Completes with [`Completion::Receive`](crate::signals::Completion::Receive).
    fn receive(&mut self, command: &Command, buf: &mut [u8]) -> Result<(), BusError>;

    /// Start hardware auto-polling of a one-byte status response.
    ///
    /// The peripheral re-issues `command` every `interval` clock cycles,
    /// masks the response with `mask` and raises
    /// [`Completion::StatusMatch`](crate::signals::Completion::StatusMatch)
    /// once the masked value equals `target`.
    fn auto_poll(
        &mut self,
        command: &Command,
        target: u8,
        mask: u8,
        interval: u8,
    ) -> Result<(), BusError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_mode_widths() {
        assert_eq!(LineMode::Single.lines(), 1);
        assert_eq!(LineMode::Dual.lines(), 2);
        assert_eq!(LineMode::Quad.lines(), 4);
    }

    #[test]
    fn default_command_is_empty() {
        let cmd = Command::default();
        assert_eq!(cmd.opcode, None);
        assert_eq!(cmd.address, None);
        assert_eq!(cmd.alternate, None);
        assert_eq!(cmd.dummy_cycles, 0);
        assert_eq!(cmd.data, None);
    }
}
