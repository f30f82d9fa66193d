//! littlefs block store over the W25Qxx device.
//!
//! All flash traffic in the system funnels through here: quad-output
//! reads, page-chunked quad programs and sector erases, each paired
//! with the hardware completion signal the transfer raises. Every wait
//! is bounded; a completion that never arrives surfaces as an I/O error
//! to littlefs instead of hanging the filesystem task.

use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};
use littlefs2::driver::Storage;
use littlefs2::io::{Error, Result as LfsResult};

use flint_hal::qspi::QspiBus;
use flint_hal::signals::FlashSignals;
use flint_w25q::{DeviceState, StatusRegister, W25q};

use crate::geometry::{self, page_chunks};

/// Bound on any single completion wait
const OP_TIMEOUT: Duration = Duration::from_millis(1000);

/// Block store backing the littlefs volume
///
/// Owns the device and the signal set its bus raises completions on.
/// Constructed with its signals, so an operation can never wait on a
/// signal set that no interrupt handler feeds.
pub struct FlashStore<B: QspiBus> {
    device: W25q<B>,
    signals: &'static FlashSignals,
}

impl<B: QspiBus> FlashStore<B> {
    pub fn new(device: W25q<B>, signals: &'static FlashSignals) -> Self {
        Self { device, signals }
    }

    /// Direct access to the flash device, for bring-up diagnostics.
    pub fn device_mut(&mut self) -> &mut W25q<B> {
        &mut self.device
    }

    /// Read `buf.len()` bytes starting at `address`.
    pub async fn read_at(&mut self, address: u32, buf: &mut [u8]) -> LfsResult<()> {
        self.signals.rx_done.reset();
        self.device
            .fast_read_quad_output(address, buf)
            .map_err(|_| Error::IO)?;
        wait_done(&self.signals.rx_done).await
    }

    /// Program `data` starting at `address`, one page chunk at a time.
    ///
    /// Each chunk is write-enabled, programmed, and then held until the
    /// device reports itself free again; a failure mid-way leaves the
    /// earlier chunks programmed.
    pub async fn program_at(&mut self, address: u32, data: &[u8]) -> LfsResult<()> {
        for (chunk_address, chunk) in page_chunks(address, data) {
            self.device.write_enable().map_err(|_| Error::IO)?;

            self.signals.tx_done.reset();
            self.device
                .quad_input_page_program(chunk_address, chunk)
                .map_err(|_| Error::IO)?;
            wait_done(&self.signals.tx_done).await?;

            self.wait_free().await?;
        }
        Ok(())
    }

    /// Erase the 4 KiB sector containing `address`.
    pub async fn erase_sector(&mut self, address: u32) -> LfsResult<()> {
        self.signals.cmd_done.reset();
        self.device.write_enable().map_err(|_| Error::IO)?;
        wait_done(&self.signals.cmd_done).await?;

        self.signals.cmd_done.reset();
        self.device.sector_erase(address).map_err(|_| Error::IO)?;
        wait_done(&self.signals.cmd_done).await?;

        self.wait_free().await
    }

    /// Wait out any in-flight program or erase.
    pub async fn sync(&mut self) -> LfsResult<()> {
        self.wait_free().await
    }

    /// Read and log the chip identification and status registers.
    ///
    /// Diagnostic only; an unreadable id does not block mounting.
    pub async fn identify(&mut self) -> LfsResult<()> {
        self.enquire(W25q::enquire_jedec_id).await?;
        self.enquire(W25q::enquire_unique_id).await?;
        self.enquire(|dev| dev.enquire_status_register(StatusRegister::Sr1))
            .await?;
        self.enquire(|dev| dev.enquire_status_register(StatusRegister::Sr2))
            .await?;
        self.enquire(|dev| dev.enquire_status_register(StatusRegister::Sr3))
            .await?;
        self.enquire(W25q::enquire_sfdp_register).await?;

        info!(
            "flash id: manufacturer {} device {} unique {}",
            self.device.manufacturer_id(),
            self.device.device_id16(),
            self.device.unique_id(),
        );
        info!(
            "flash status: sr1 {} sr2 {} sr3 {} sfdp {}",
            self.device.sr1(),
            self.device.sr2(),
            self.device.sr3(),
            self.device.sfdp(),
        );
        Ok(())
    }

    /// Issue one register enquiry and resolve its answer.
    async fn enquire(
        &mut self,
        issue: impl FnOnce(&mut W25q<B>) -> Result<(), flint_w25q::Error>,
    ) -> LfsResult<()> {
        self.signals.rx_done.reset();
        issue(&mut self.device).map_err(|_| Error::IO)?;
        wait_done(&self.signals.rx_done).await?;
        self.device.resolve();
        Ok(())
    }

    /// Drop all write protection: global block unlock plus a cleared SR1.
    ///
    /// Bring-up only; a volume on a block-protected chip would mount and
    /// then fail every program.
    pub async fn clear_protection(&mut self) -> LfsResult<()> {
        self.signals.cmd_done.reset();
        self.device.write_enable().map_err(|_| Error::IO)?;
        wait_done(&self.signals.cmd_done).await?;

        self.signals.cmd_done.reset();
        self.device.global_unlock().map_err(|_| Error::IO)?;
        wait_done(&self.signals.cmd_done).await?;

        self.device.write_enable().map_err(|_| Error::IO)?;
        self.signals.tx_done.reset();
        self.device
            .write_register(StatusRegister::Sr1, 0x00)
            .map_err(|_| Error::IO)?;
        wait_done(&self.signals.tx_done).await?;

        self.wait_free().await
    }

    async fn wait_free(&mut self) -> LfsResult<()> {
        self.signals.status_match.reset();
        self.device
            .wait_for_state(DeviceState::Free)
            .map_err(|_| Error::IO)?;
        wait_done(&self.signals.status_match).await
    }
}

/// Await one completion signal within the operation bound.
///
/// The caller resets the signal before starting its transfer, so a
/// completion left over from an abandoned earlier wait cannot satisfy
/// this one.
async fn wait_done(signal: &Signal<CriticalSectionRawMutex, ()>) -> LfsResult<()> {
    match with_timeout(OP_TIMEOUT, signal.wait()).await {
        Ok(()) => Ok(()),
        Err(_) => {
            warn!("flash completion timed out");
            Err(Error::IO)
        }
    }
}

fn check_bounds(off: usize, len: usize) -> LfsResult<()> {
    let end = off.checked_add(len).ok_or(Error::IO)?;
    if end > geometry::CAPACITY {
        return Err(Error::IO);
    }
    Ok(())
}

impl<B: QspiBus> Storage for FlashStore<B> {
    const READ_SIZE: usize = geometry::READ_SIZE;
    const WRITE_SIZE: usize = geometry::PROG_SIZE;
    const BLOCK_SIZE: usize = geometry::BLOCK_SIZE;
    const BLOCK_COUNT: usize = geometry::BLOCK_COUNT;
    const BLOCK_CYCLES: isize = geometry::BLOCK_CYCLES;
    type CACHE_SIZE = littlefs2::consts::U256;
    type LOOKAHEAD_SIZE = littlefs2::consts::U256;

    // littlefs drives the store from the filesystem task, which is the
    // only flash user; blocking on the transfer here cannot starve
    // another flash operation.

    fn read(&mut self, off: usize, buf: &mut [u8]) -> LfsResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        check_bounds(off, buf.len())?;
        block_on(self.read_at(off as u32, buf))?;
        Ok(buf.len())
    }

    fn write(&mut self, off: usize, data: &[u8]) -> LfsResult<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        check_bounds(off, data.len())?;
        block_on(self.program_at(off as u32, data))?;
        Ok(data.len())
    }

    fn erase(&mut self, off: usize, len: usize) -> LfsResult<usize> {
        if len == 0 {
            return Ok(0);
        }
        if off % geometry::BLOCK_SIZE != 0 || len % geometry::BLOCK_SIZE != 0 {
            return Err(Error::IO);
        }
        check_bounds(off, len)?;
        for sector in (off..off + len).step_by(geometry::BLOCK_SIZE) {
            block_on(self.erase_sector(sector as u32))?;
        }
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flint_hal::signals::{BusId, SignalRegistry};
    use flint_w25q::SimBus;

    extern crate std;
    use std::boxed::Box;

    fn store() -> FlashStore<SimBus> {
        let registry: &'static SignalRegistry = Box::leak(Box::new(SignalRegistry::new()));
        let signals: &'static FlashSignals = Box::leak(Box::new(FlashSignals::new()));
        registry.register(BusId(0), signals).unwrap();
        let bus = SimBus::new(geometry::CAPACITY, registry, BusId(0));
        FlashStore::new(W25q::new(bus), signals)
    }

    #[test]
    fn write_read_round_trip() {
        let mut store = store();
        let mut data = [0u8; 512];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = i as u8;
        }

        assert_eq!(store.erase(0, geometry::BLOCK_SIZE), Ok(geometry::BLOCK_SIZE));
        assert_eq!(store.write(0, &data), Ok(512));

        let mut back = [0u8; 512];
        assert_eq!(store.read(0, &mut back), Ok(512));
        assert_eq!(back, data);
    }

    #[test]
    fn unaligned_erase_is_rejected() {
        let mut store = store();
        assert_eq!(store.erase(100, geometry::BLOCK_SIZE), Err(Error::IO));
        assert_eq!(store.erase(0, 100), Err(Error::IO));
    }

    #[test]
    fn out_of_range_access_is_rejected() {
        let mut store = store();
        let mut buf = [0u8; 64];
        assert_eq!(store.read(geometry::CAPACITY, &mut buf), Err(Error::IO));
        assert_eq!(store.write(geometry::CAPACITY - 32, &buf), Err(Error::IO));
    }

    #[test]
    fn write_spanning_pages_lands_contiguously() {
        let mut store = store();
        assert!(store.erase(0, geometry::BLOCK_SIZE).is_ok());

        let data = [0xA5u8; 600];
        assert_eq!(store.write(256, &data), Ok(600));

        let mut back = [0u8; 600];
        assert_eq!(store.read(256, &mut back), Ok(600));
        assert_eq!(back, data);
    }

    #[test]
    fn identify_resolves_ids_and_status_registers() {
        let mut store = store();
        assert_eq!(block_on(store.identify()), Ok(()));

        // The simulated flash answers every register enquiry with zero
        // bytes; all six transfers must have completed and resolved.
        assert_eq!(store.device.manufacturer_id(), 0);
        assert_eq!(store.device.sr1(), 0);
        assert_eq!(store.device.sr2(), 0);
        assert_eq!(store.device.sr3(), 0);
        assert_eq!(store.device.sfdp(), 0);
    }

    #[test]
    fn identify_fails_on_a_dead_bus() {
        let mut store = store();
        store.device.bus_mut().fail_reads = true;
        assert_eq!(block_on(store.identify()), Err(Error::IO));
    }

    #[test]
    fn failed_transfer_maps_to_io_error() {
        let mut store = store();
        store.device.bus_mut().fail_writes = true;
        assert_eq!(store.erase(0, geometry::BLOCK_SIZE), Err(Error::IO));
    }
}
