//! Hardware-completion signals and the instance registry.
//!
//! Flash transfers finish in interrupt context. Each flash bus instance
//! owns a [`FlashSignals`] set; interrupt handlers look the set up in a
//! [`SignalRegistry`] by bus identity and raise the matching signal.
//! The registry replaces a hard singleton: dispatch stays O(1) for the
//! handful of instances a board can carry, and tests can stand up their
//! own registries without global state.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use heapless::Vec;

/// Maximum number of flash bus instances a registry can route
pub const MAX_INSTANCES: usize = 2;

/// Identity of one flash bus instance (e.g. OCTOSPI1 = 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusId(pub u8);

/// Kind of hardware completion being reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Completion {
    /// A receive transfer finished
    Receive,
    /// A transmit transfer finished
    Transmit,
    /// A data-less command finished
    Command,
    /// Auto-polling matched its target value
    StatusMatch,
}

/// The four completion signals consumed by the block-store adapter
///
/// Raised from interrupt context (`Signal::signal` is interrupt-safe),
/// awaited only by the filesystem task.
pub struct FlashSignals {
    /// Receive transfer complete
    pub rx_done: Signal<CriticalSectionRawMutex, ()>,
    /// Transmit transfer complete
    pub tx_done: Signal<CriticalSectionRawMutex, ()>,
    /// Data-less command complete
    pub cmd_done: Signal<CriticalSectionRawMutex, ()>,
    /// Auto-polling status match
    pub status_match: Signal<CriticalSectionRawMutex, ()>,
}

impl FlashSignals {
    /// Create a fresh signal set with nothing pending
    pub const fn new() -> Self {
        Self {
            rx_done: Signal::new(),
            tx_done: Signal::new(),
            cmd_done: Signal::new(),
            status_match: Signal::new(),
        }
    }

    fn raise(&self, completion: Completion) {
        match completion {
            Completion::Receive => self.rx_done.signal(()),
            Completion::Transmit => self.tx_done.signal(()),
            Completion::Command => self.cmd_done.signal(()),
            Completion::StatusMatch => self.status_match.signal(()),
        }
    }
}

impl Default for FlashSignals {
    fn default() -> Self {
        Self::new()
    }
}

/// Error returned when registering more instances than the registry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegistryFull;

/// Maps bus identity to its signal set
///
/// Populated once at task construction, read from interrupt handlers.
pub struct SignalRegistry {
    slots: Mutex<CriticalSectionRawMutex, RefCell<Vec<(BusId, &'static FlashSignals), MAX_INSTANCES>>>,
}

impl SignalRegistry {
    /// Create an empty registry
    pub const fn new() -> Self {
        Self {
            slots: Mutex::new(RefCell::new(Vec::new())),
        }
    }

    /// Associate a bus instance with its signal set.
    ///
    /// Registering the same id again replaces the previous set.
    pub fn register(
        &self,
        id: BusId,
        signals: &'static FlashSignals,
    ) -> Result<(), RegistryFull> {
        self.slots.lock(|slots| {
            let mut slots = slots.borrow_mut();
            if let Some(slot) = slots.iter_mut().find(|(slot_id, _)| *slot_id == id) {
                slot.1 = signals;
                return Ok(());
            }
            slots.push((id, signals)).map_err(|_| RegistryFull)
        })
    }

    /// Raise one completion for a bus instance.
    ///
    /// Interrupt-safe; unknown ids are ignored (spurious interrupt from
    /// an instance nobody registered).
    pub fn raise(&self, id: BusId, completion: Completion) {
        self.slots.lock(|slots| {
            let slots = slots.borrow();
            if let Some((_, signals)) = slots.iter().find(|(slot_id, _)| *slot_id == id) {
                signals.raise(completion);
            }
        });
    }
}

impl Default for SignalRegistry {
    fn default() -> Self {
        Self::new()
    }
}
