//! End-to-end scenarios: filesystem task + clients over simulated flash.

use std::future::Future;
use std::pin::pin;
use std::task::{Context, Poll, Waker};

use embassy_futures::block_on;
use embassy_futures::join::join;
use embassy_futures::select::{select, Either};
use littlefs2::io::Error;

use flint_fs::{fs_actor, geometry, FlashStore, FsChannel, FsClient, FsError};
use flint_hal::signals::{BusId, FlashSignals, SignalRegistry};
use flint_w25q::{SimBus, W25q};

struct Fixture {
    store: FlashStore<SimBus>,
    channel: &'static FsChannel,
}

fn fixture() -> Fixture {
    let registry: &'static SignalRegistry = Box::leak(Box::new(SignalRegistry::new()));
    let signals: &'static FlashSignals = Box::leak(Box::new(FlashSignals::new()));
    registry.register(BusId(0), signals).unwrap();

    let bus = SimBus::new(geometry::CAPACITY, registry, BusId(0));
    Fixture {
        store: FlashStore::new(W25q::new(bus), signals),
        channel: Box::leak(Box::new(FsChannel::new())),
    }
}

/// Drive the filesystem task and a client future to the client's end.
fn serve<T>(fixture: Fixture, client: impl Future<Output = T>) -> T {
    block_on(async {
        match select(fs_actor(fixture.store, fixture.channel), client).await {
            Either::First(never) => match never {},
            Either::Second(out) => out,
        }
    })
}

#[test]
fn write_then_read_round_trip() {
    let fx = fixture();
    let client = FsClient::new(fx.channel);

    serve(fx, async move {
        let written = client.write_and_make_file("/boot.cfg", b"hello").await;
        assert_eq!(written, Ok(5));

        let mut buf = [0u8; 32];
        let read = client.read_file("/boot.cfg", &mut buf).await;
        assert_eq!(read, Ok(5));
        assert_eq!(&buf[..5], b"hello");

        // Probe without reading reports the size.
        assert_eq!(client.open_file("/boot.cfg").await, Ok(5));
    });
}

#[test]
fn create_new_refuses_an_existing_file() {
    let fx = fixture();
    let client = FsClient::new(fx.channel);

    serve(fx, async move {
        assert_eq!(client.create_file("/once.txt", b"first").await, Ok(5));
        assert_eq!(
            client.create_file("/once.txt", b"again").await,
            Err(FsError::Filesystem(Error::ENTRY_ALREADY_EXISTED.code())),
        );

        // The original content survived the refused create.
        let mut buf = [0u8; 16];
        assert_eq!(client.read_file("/once.txt", &mut buf).await, Ok(5));
        assert_eq!(&buf[..5], b"first");
    });
}

#[test]
fn make_dir_refuses_an_existing_directory() {
    let fx = fixture();
    let client = FsClient::new(fx.channel);

    serve(fx, async move {
        assert_eq!(client.make_dir("/d").await, Ok(()));
        assert_eq!(
            client.make_dir("/d").await,
            Err(FsError::Filesystem(Error::ENTRY_ALREADY_EXISTED.code())),
        );

        // The directory itself is untouched by the refused create.
        assert_eq!(client.open_dir("/d").await, Ok(()));
    });
}

#[test]
fn append_extends_the_file() {
    let fx = fixture();
    let client = FsClient::new(fx.channel);

    serve(fx, async move {
        assert_eq!(client.write_and_make_file("/log.txt", b"one,").await, Ok(4));
        assert_eq!(client.append_file("/log.txt", b"two").await, Ok(3));

        let mut buf = [0u8; 16];
        assert_eq!(client.read_file("/log.txt", &mut buf).await, Ok(7));
        assert_eq!(&buf[..7], b"one,two");
    });
}

#[test]
fn plain_write_requires_an_existing_file() {
    let fx = fixture();
    let client = FsClient::new(fx.channel);

    serve(fx, async move {
        assert_eq!(
            client.write_file("/absent.txt", b"data").await,
            Err(FsError::Filesystem(Error::NO_SUCH_ENTRY.code())),
        );
        assert_eq!(client.write_and_make_file("/absent.txt", b"data").await, Ok(4));
        assert_eq!(client.write_file("/absent.txt", b"x").await, Ok(1));

        // Plain write truncates.
        let mut buf = [0u8; 16];
        assert_eq!(client.read_file("/absent.txt", &mut buf).await, Ok(1));
    });
}

#[test]
fn remove_makes_a_file_unreadable() {
    let fx = fixture();
    let client = FsClient::new(fx.channel);

    serve(fx, async move {
        assert_eq!(client.write_and_make_file("/tmp.bin", &[1, 2, 3]).await, Ok(3));
        assert_eq!(client.remove("/tmp.bin").await, Ok(()));

        let mut buf = [0u8; 8];
        assert_eq!(
            client.read_file("/tmp.bin", &mut buf).await,
            Err(FsError::Filesystem(Error::NO_SUCH_ENTRY.code())),
        );
    });
}

#[test]
fn directory_listing_renders_entries() {
    let fx = fixture();
    let client = FsClient::new(fx.channel);

    serve(fx, async move {
        assert_eq!(client.make_dir("/data").await, Ok(()));
        assert_eq!(client.write_and_make_file("/data/a.txt", b"abc").await, Ok(3));
        assert_eq!(client.make_dir("/data/sub").await, Ok(()));
        assert_eq!(client.open_dir("/data").await, Ok(()));

        let mut out = [0u8; 256];
        let len = client.read_dir("/data", &mut out).await.unwrap();
        let listing = std::str::from_utf8(&out[..len]).unwrap();

        // Exactly the two real entries; self and parent are skipped.
        let lines: Vec<&str> = listing.split("\r\n").filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().any(|l| l.starts_with("file ") && l.contains("a.txt")));
        assert!(lines.iter().any(|l| l.starts_with("dir ") && l.contains("sub")));
    });
}

#[test]
fn oversized_listing_reports_no_space() {
    let fx = fixture();
    let client = FsClient::new(fx.channel);

    serve(fx, async move {
        assert_eq!(client.make_dir("/d").await, Ok(()));
        assert_eq!(client.write_and_make_file("/d/file.txt", b"x").await, Ok(1));

        let mut tiny = [0u8; 8];
        assert_eq!(
            client.read_dir("/d", &mut tiny).await,
            Err(FsError::Filesystem(Error::NO_SPACE.code())),
        );
    });
}

#[test]
fn over_long_path_is_rejected_client_side() {
    let fx = fixture();
    let client = FsClient::new(fx.channel);

    serve(fx, async move {
        let long = "/".repeat(flint_fs::PATH_CAPACITY + 1);
        assert_eq!(
            client.open_file(&long).await,
            Err(FsError::InvalidArgument),
        );
    });
}

#[test]
fn concurrent_clients_both_complete() {
    let fx = fixture();
    let client_a = FsClient::new(fx.channel);
    let client_b = FsClient::new(fx.channel);

    serve(fx, async move {
        let a = async {
            client_a.write_and_make_file("/a.txt", b"from a").await.unwrap();
            let mut buf = [0u8; 16];
            let n = client_a.read_file("/a.txt", &mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"from a");
        };
        let b = async {
            client_b.write_and_make_file("/b.txt", b"from b").await.unwrap();
            let mut buf = [0u8; 16];
            let n = client_b.read_file("/b.txt", &mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"from b");
        };
        join(a, b).await;
    });
}

#[test]
fn requests_are_served_in_submission_order() {
    let fx = fixture();
    let client_a = FsClient::new(fx.channel);
    let client_b = FsClient::new(fx.channel);

    serve(fx, async move {
        assert_eq!(client_a.write_and_make_file("/order.txt", b"").await, Ok(0));

        // `a` enqueues its append before `b`; the filesystem task must
        // serve them in that order.
        let a = async {
            client_a.append_file("/order.txt", b"1").await.unwrap();
        };
        let b = async {
            client_b.append_file("/order.txt", b"2").await.unwrap();
        };
        join(a, b).await;

        let mut buf = [0u8; 4];
        assert_eq!(client_a.read_file("/order.txt", &mut buf).await, Ok(2));
        assert_eq!(&buf[..2], b"12");
    });
}

#[test]
fn existing_volume_is_mounted_without_reformat() {
    let fx = fixture();
    let mut store = fx.store;

    // Seed the volume the way a previous boot would have left it.
    littlefs2::fs::Filesystem::format(&mut store).unwrap();
    let mut alloc = littlefs2::fs::Filesystem::allocate();
    {
        let fs = littlefs2::fs::Filesystem::mount(&mut alloc, &mut store).unwrap();
        let path = littlefs2::path::Path::from_str_with_nul("/keep.txt\0").unwrap();
        fs.open_file_with_options_and_then(
            |o| o.write(true).create(true),
            path,
            |file| file.write(b"kept"),
        )
        .unwrap();
    }

    // The task must mount what it finds instead of formatting over it.
    let channel = fx.channel;
    let client = FsClient::new(channel);
    serve(Fixture { store, channel }, async move {
        let mut buf = [0u8; 8];
        assert_eq!(client.read_file("/keep.txt", &mut buf).await, Ok(4));
        assert_eq!(&buf[..4], b"kept");
    });
}

#[test]
fn unmountable_flash_never_answers() {
    let fx = fixture();
    let mut store = fx.store;
    // Writes fail outright: the blank volume cannot be formatted, the
    // task halts, and requests stay unanswered.
    store.device_mut().bus_mut().fail_writes = true;
    let client = FsClient::new(fx.channel);

    let combined = async {
        let ops = async {
            let _ = client.write_and_make_file("/never.txt", b"data").await;
            unreachable!("the filesystem task must not answer");
        };
        match select(fs_actor(store, fx.channel), ops).await {
            Either::First(never) => match never {},
            Either::Second(()) => {}
        }
    };

    // No reply can arrive, so the combined future must stay pending
    // however often it is polled (short of the client's reply timeout).
    let mut combined = pin!(combined);
    let mut cx = Context::from_waker(Waker::noop());
    for _ in 0..10_000 {
        assert!(matches!(combined.as_mut().poll(&mut cx), Poll::Pending));
    }
}
