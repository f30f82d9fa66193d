//! Flint - NOR-flash filesystem firmware
//!
//! Brings up the OCTOSPI-attached W25Qxx flash, mounts a littlefs
//! volume on it and serves filesystem requests from the other tasks
//! through a single owning storage task.

#![no_std]
#![no_main]

use defmt::{info, unwrap, warn};
use embassy_executor::Spawner;
use embassy_stm32::mode::Blocking;
use embassy_stm32::ospi::{
    ChipSelectHighTime, Config as OspiConfig, FIFOThresholdLevel, MemorySize, MemoryType, Ospi,
    WrapSize,
};
use embassy_stm32::peripherals::OCTOSPI1;
use embassy_time::Timer;
use {defmt_rtt as _, panic_probe as _};

use flint_fs::{fs_actor, FlashStore, FsChannel, FsClient};
use flint_hal::signals::{BusId, FlashSignals, SignalRegistry};
use flint_w25q::W25q;

use crate::ospi::FlashBus;

mod ospi;

/// The single OCTOSPI instance carrying the flash
const FLASH_BUS: BusId = BusId(0);

static REGISTRY: SignalRegistry = SignalRegistry::new();
static SIGNALS: FlashSignals = FlashSignals::new();
static FS_CHANNEL: FsChannel = FsChannel::new();

#[embassy_executor::task]
async fn storage_task(store: FlashStore<FlashBus>) {
    fs_actor(store, &FS_CHANNEL).await
}

/// Record the boot in a log file and show what the volume holds.
#[embassy_executor::task]
async fn boot_report_task(client: FsClient) {
    if let Err(err) = client.append_file("/boot.log", b"boot\r\n").await {
        warn!("boot log append failed ({}), starting a fresh log", err);
        if let Err(err) = client.write_and_make_file("/boot.log", b"boot\r\n").await {
            warn!("boot log unavailable: {}", err);
            return;
        }
    }

    let mut listing = [0u8; 512];
    match client.read_dir("/", &mut listing).await {
        Ok(len) => match core::str::from_utf8(&listing[..len]) {
            Ok(text) => info!("volume root:\r\n{}", text),
            Err(_) => warn!("volume listing was not valid utf-8"),
        },
        Err(err) => warn!("volume listing failed: {}", err),
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("flint firmware starting");

    let p = embassy_stm32::init(Default::default());

    let config = OspiConfig {
        fifo_threshold: FIFOThresholdLevel::_16Bytes,
        memory_type: MemoryType::Standard,
        device_size: MemorySize::_8MiB,
        chip_select_high_time: ChipSelectHighTime::_1Cycle,
        free_running_clock: false,
        clock_mode: false,
        wrap_size: WrapSize::None,
        clock_prescaler: 4,
        sample_shifting: true,
        delay_hold_quarter_cycle: false,
        chip_select_boundary: 0,
        delay_block_bypass: true,
        max_transfer: 0,
        refresh: 0,
    };
    let ospi: Ospi<'static, OCTOSPI1, Blocking> = Ospi::new_blocking_quadspi(
        p.OCTOSPI1, p.PB2, p.PD11, p.PD12, p.PE2, p.PD13, p.PG6, config,
    );

    unwrap!(REGISTRY.register(FLASH_BUS, &SIGNALS));
    let bus = FlashBus::new(ospi, &REGISTRY, FLASH_BUS);
    let store = FlashStore::new(W25q::new(bus), &SIGNALS);

    unwrap!(spawner.spawn(storage_task(store)));

    // Give the storage task a head start on mounting before the first
    // requests queue up behind the reply timeout.
    Timer::after_millis(10).await;
    unwrap!(spawner.spawn(boot_report_task(FsClient::new(&FS_CHANNEL))));

    info!("flint firmware up");
}
