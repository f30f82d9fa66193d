//! littlefs volume on W25Qxx flash, served by a single filesystem task
//!
//! Layering, bottom up:
//!
//! - [`geometry`]: flash layout constants and the page chunker
//! - [`store`]: the littlefs block store driving the flash device
//! - [`request`] / [`client`]: the stack-allocated request protocol and
//!   the handle tasks use to submit requests
//! - [`actor`]: the task that mounts the volume and serves requests
//!
//! Concurrency model: many clients, one server. The filesystem task is
//! the only code that touches the mounted volume or the flash bus;
//! clients block on a per-request reply signal with a bounded wait.

#![no_std]
#![deny(unsafe_code)]

// Keep first so the log macros are visible to the other modules.
mod fmt;

pub mod actor;
pub mod client;
pub mod geometry;
pub mod request;
pub mod store;

pub use actor::fs_actor;
pub use client::{FsClient, FsError, REPLY_TIMEOUT};
pub use request::{FsChannel, FsOp, RequestRef, PATH_CAPACITY, REQUEST_DEPTH};
pub use store::FlashStore;
