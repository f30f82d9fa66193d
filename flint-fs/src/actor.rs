//! The filesystem task: sole owner of the mounted volume.
//!
//! Brings the flash up, mounts (formatting a blank or corrupt volume
//! once), then serves requests from the channel one at a time. Requests
//! never run concurrently, which is what makes the single mounted
//! filesystem and the single flash device safe to share.

use core::fmt::Write as _;
use core::sync::atomic::Ordering;

use littlefs2::fs::Filesystem;
use littlefs2::io::{Error, Result as LfsResult};
use littlefs2::path::Path;

use flint_hal::qspi::QspiBus;

use crate::request::{FsChannel, FsOp, FsRequest, PATH_CAPACITY};
use crate::store::FlashStore;

/// Run the filesystem task over `store`, serving `channel` forever.
///
/// A volume that cannot be mounted even after a fresh format is fatal:
/// the task stops dequeuing and every submitter times out, which beats
/// handing out a filesystem that cannot hold data.
pub async fn fs_actor<B: QspiBus>(mut store: FlashStore<B>, channel: &'static FsChannel) -> ! {
    if store.identify().await.is_err() {
        warn!("flash identification incomplete, continuing to mount");
    }
    if store.clear_protection().await.is_err() {
        warn!("could not clear flash write protection");
    }
    if store.sync().await.is_err() {
        warn!("flash not reporting ready before mount");
    }

    let mut alloc = Filesystem::allocate();

    if !Filesystem::is_mountable(&mut store) {
        info!("no mountable volume, formatting");
        if let Err(err) = Filesystem::format(&mut store) {
            error!("format failed ({}), filesystem task halting", err.code());
            halt().await
        }
    }

    let fs = match Filesystem::mount(&mut alloc, &mut store) {
        Ok(fs) => fs,
        Err(err) => {
            error!("mount failed ({}), filesystem task halting", err.code());
            halt().await
        }
    };
    info!("filesystem mounted");

    loop {
        let handle = channel.receive().await;
        let request = handle.request();
        let code = dispatch(&fs, request);
        request.ret.store(code, Ordering::Release);
        request.done.signal(());
    }
}

/// Park forever; submitters see their requests go unanswered.
async fn halt() -> ! {
    loop {
        core::future::pending::<()>().await;
    }
}

fn dispatch<B: QspiBus>(fs: &Filesystem<'_, FlashStore<B>>, request: &FsRequest) -> i32 {
    let mut raw: heapless::String<{ PATH_CAPACITY + 1 }> = heapless::String::new();
    if raw.push_str(request.path.as_str()).is_err() || raw.push('\0').is_err() {
        return Error::INVALID.code();
    }
    let path = match Path::from_str_with_nul(raw.as_str()) {
        Ok(path) => path,
        Err(_) => return Error::INVALID.code(),
    };

    let outcome = match request.op {
        FsOp::None => Err(Error::INVALID),
        FsOp::DirOpen => fs.read_dir_and_then(path, |_| Ok(0)),
        FsOp::DirRead => list_dir(fs, path, request),
        FsOp::DirMake => fs.create_dir(path).map(|()| 0),
        FsOp::FileOpen => {
            fs.open_file_with_options_and_then(|o| o.read(true), path, |file| file.len())
        }
        FsOp::FileRead => {
            fs.open_file_with_options_and_then(|o| o.read(true), path, |file| {
                match request.sink() {
                    Some(buf) => file.read(buf),
                    None => Err(Error::INVALID),
                }
            })
        }
        FsOp::FileWrite => fs.open_file_with_options_and_then(
            |o| o.write(true).truncate(true),
            path,
            |file| file.write(request.data()),
        ),
        FsOp::FileWriteAndMake => fs.open_file_with_options_and_then(
            |o| o.write(true).create(true).truncate(true),
            path,
            |file| file.write(request.data()),
        ),
        FsOp::FileCreateNew => fs.open_file_with_options_and_then(
            |o| o.write(true).create_new(true),
            path,
            |file| file.write(request.data()),
        ),
        FsOp::FileAppend => fs.open_file_with_options_and_then(
            |o| o.write(true).append(true),
            path,
            |file| file.write(request.data()),
        ),
        FsOp::Remove => fs.remove(path).map(|()| 0),
    };

    match outcome {
        Ok(value) => value as i32,
        Err(err) => {
            debug!("request failed with littlefs code {}", err.code());
            err.code()
        }
    }
}

/// Render a directory listing into the request buffer.
///
/// One entry per line: kind, name, size. The self and parent entries
/// are skipped. A listing that outgrows the buffer aborts with
/// `NO_SPACE` rather than handing back a truncated line.
fn list_dir<B: QspiBus>(
    fs: &Filesystem<'_, FlashStore<B>>,
    path: &Path,
    request: &FsRequest,
) -> LfsResult<usize> {
    let sink = request.sink().ok_or(Error::INVALID)?;
    let mut writer = SliceWriter::new(sink);

    fs.read_dir_and_then(path, |entries| {
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().as_str();
            if name == "." || name == ".." {
                continue;
            }
            let meta = entry.metadata();
            let kind = if meta.is_dir() { "dir" } else { "file" };
            write!(writer, "{:<5} {:<24} {}\r\n", kind, name, meta.len())
                .map_err(|_| Error::NO_SPACE)?;
        }
        Ok(writer.written())
    })
}

/// `core::fmt` sink over a byte buffer; errors once the buffer is full.
struct SliceWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> SliceWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn written(&self) -> usize {
        self.pos
    }
}

impl core::fmt::Write for SliceWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            return Err(core::fmt::Error);
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::SliceWriter;
    use core::fmt::Write as _;

    #[test]
    fn slice_writer_fills_then_errors() {
        let mut buf = [0u8; 8];
        let mut writer = SliceWriter::new(&mut buf);

        assert!(write!(writer, "abcd").is_ok());
        assert_eq!(writer.written(), 4);
        assert!(write!(writer, "efgh").is_ok());
        assert!(write!(writer, "i").is_err());
        assert_eq!(writer.written(), 8);
        assert_eq!(&buf, b"abcdefgh");
    }

    #[test]
    fn listing_line_format_is_stable() {
        let mut buf = [0u8; 64];
        let mut writer = SliceWriter::new(&mut buf);
        write!(writer, "{:<5} {:<24} {}\r\n", "file", "boot.cfg", 128).unwrap();
        let written = writer.written();
        let line = core::str::from_utf8(&buf[..written]).unwrap();
        assert_eq!(line, "file  boot.cfg                 128\r\n");
    }
}
