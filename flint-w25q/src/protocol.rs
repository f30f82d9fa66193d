//! Protocol elements and the descriptor fold.
//!
//! Device operations collect an ordered list of phase elements and fold
//! them into one [`Command`] descriptor. The fold is deliberately
//! permissive: `None` elements are skipped without complaint, and a
//! later element of the same kind silently overwrites an earlier one.

use flint_hal::qspi::{Command, DataPhase, LineMode, Phase};

use crate::opcode::Opcode;

/// Dummy-cycle counts above this cannot be encoded by the peripheral
const MAX_DUMMY_CYCLES: u8 = 31;

/// One phase of a flash transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Element {
    /// Ignored by the fold
    None,
    /// Instruction phase, always one line wide
    Instruction(Opcode),
    /// Address phase
    Address { value: u32, width: u8, lines: LineMode },
    /// Alternate-byte phase
    AlternateBytes { value: u32, width: u8, lines: LineMode },
    /// Dummy cycles before the data phase
    DummyCycles(u8),
    /// Data phase; the buffer travels beside the descriptor
    Data { len: u16, lines: LineMode },
}

impl Element {
    /// Instruction element
    pub fn instruction(opcode: Opcode) -> Self {
        Element::Instruction(opcode)
    }

    /// Address element of `width` bytes
    pub fn address(value: u32, width: u8, lines: LineMode) -> Self {
        Element::Address { value, width, lines }
    }

    /// Alternate-byte element of `width` bytes
    pub fn alternate(value: u32, width: u8, lines: LineMode) -> Self {
        Element::AlternateBytes { value, width, lines }
    }

    /// Dummy-cycle element; counts the hardware cannot encode degrade
    /// to a no-op element instead of failing the whole transaction
    pub fn dummy_cycles(count: u8) -> Self {
        if count > MAX_DUMMY_CYCLES {
            return Element::None;
        }
        Element::DummyCycles(count)
    }

    /// Data element covering `len` bytes
    pub fn data(len: usize, lines: LineMode) -> Self {
        Element::Data {
            len: len as u16,
            lines,
        }
    }
}

/// Fold an ordered element list into one transaction descriptor.
///
/// Dispatch is purely by element kind; duplicates overwrite, `None`
/// elements vanish. No cross-phase validation happens here.
pub fn encode(elements: &[Element]) -> Command {
    let mut command = Command::default();

    for element in elements {
        match *element {
            Element::None => {}
            Element::Instruction(opcode) => {
                command.opcode = Some(opcode as u8);
            }
            Element::Address { value, width, lines } => {
                command.address = Some(Phase { value, width, lines });
            }
            Element::AlternateBytes { value, width, lines } => {
                command.alternate = Some(Phase { value, width, lines });
            }
            Element::DummyCycles(count) => {
                command.dummy_cycles = count;
            }
            Element::Data { len, lines } => {
                command.data = Some(DataPhase { len, lines });
            }
        }
    }

    command
}
