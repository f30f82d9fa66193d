//! Hardware abstractions for the Flint storage firmware
//!
//! This crate defines the seams between the flash driver stack and the
//! actual serial-flash peripheral:
//!
//! - QSPI transaction descriptors (`Command` and its phases)
//! - The `QspiBus` transport trait implemented per chip/board
//! - The completion-signal set raised from interrupt context and the
//!   registry that routes a hardware instance to its signals

#![no_std]
#![deny(unsafe_code)]

pub mod qspi;
pub mod signals;

pub use qspi::{BusError, Command, DataPhase, LineMode, Phase, QspiBus};
pub use signals::{BusId, Completion, FlashSignals, RegistryFull, SignalRegistry};
