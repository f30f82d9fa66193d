//! W25Qxx serial NOR flash driver
//!
//! Implements the Winbond W25Qxx command set on top of the transport
//! abstractions in `flint-hal`:
//!
//! - Opcode table for the full instruction set
//! - Protocol elements and the fold that turns them into one
//!   transaction descriptor
//! - The `W25q` device driver: identification, status registers, read
//!   and program variants, erase, locking, reset, auto-polling
//! - An in-memory flash model behind the `sim` feature for host tests

#![no_std]
#![deny(unsafe_code)]

#[cfg(feature = "sim")]
extern crate alloc;

pub mod device;
pub mod opcode;
pub mod protocol;
#[cfg(feature = "sim")]
pub mod sim;

pub use device::{DeviceState, Error, SecurityRegister, StatusRegister, W25q, WrapLen};
pub use opcode::Opcode;
pub use protocol::{encode, Element};
#[cfg(feature = "sim")]
pub use sim::SimBus;
