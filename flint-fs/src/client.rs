//! Client handle used by tasks that want filesystem access.
//!
//! Each operation builds a request on the caller's stack, sends a
//! handle to the filesystem task and waits for the reply signal. The
//! wait is bounded: a task must never hang forever because storage
//! went away, so a missed reply becomes [`FsError::TransportTimeout`].

use core::ptr::NonNull;
use core::sync::atomic::Ordering;

use embassy_time::{with_timeout, Duration};

use crate::request::{FsChannel, FsOp, FsRequest, RequestRef};

/// Bound on waiting for the filesystem task's reply.
///
/// Generous next to the per-transfer bound inside the block store, so
/// an expiry here means the task stopped serving, not a slow erase.
pub const REPLY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Errors surfaced to filesystem clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FsError {
    /// The flash itself failed or timed out underneath littlefs
    Io,
    /// Rejected before reaching the filesystem task
    InvalidArgument,
    /// The filesystem answered with an error; payload is the littlefs code
    Filesystem(i32),
    /// No reply within [`REPLY_TIMEOUT`]
    TransportTimeout,
}

impl FsError {
    fn from_code(code: i32) -> Self {
        if code == littlefs2::io::Error::IO.code() {
            FsError::Io
        } else {
            FsError::Filesystem(code)
        }
    }
}

/// Cheap, copyable handle to the filesystem task
#[derive(Clone, Copy)]
pub struct FsClient {
    channel: &'static FsChannel,
}

impl FsClient {
    pub fn new(channel: &'static FsChannel) -> Self {
        Self { channel }
    }

    /// Read a file into `buf`; answers with the number of bytes read.
    pub async fn read_file(&self, path: &str, buf: &mut [u8]) -> Result<usize, FsError> {
        let len = buf.len();
        self.submit(FsOp::FileRead, path, NonNull::new(buf.as_mut_ptr()), len)
            .await
    }

    /// Overwrite an existing file with `data`.
    pub async fn write_file(&self, path: &str, data: &[u8]) -> Result<usize, FsError> {
        self.submit_data(FsOp::FileWrite, path, data).await
    }

    /// Overwrite a file, creating it first when missing.
    pub async fn write_and_make_file(&self, path: &str, data: &[u8]) -> Result<usize, FsError> {
        self.submit_data(FsOp::FileWriteAndMake, path, data).await
    }

    /// Create a file that must not exist yet and write `data` to it.
    pub async fn create_file(&self, path: &str, data: &[u8]) -> Result<usize, FsError> {
        self.submit_data(FsOp::FileCreateNew, path, data).await
    }

    /// Append `data` to an existing file.
    pub async fn append_file(&self, path: &str, data: &[u8]) -> Result<usize, FsError> {
        self.submit_data(FsOp::FileAppend, path, data).await
    }

    /// Check that a file exists; answers with its size.
    pub async fn open_file(&self, path: &str) -> Result<usize, FsError> {
        self.submit(FsOp::FileOpen, path, None, 0).await
    }

    /// Render a directory listing into `out`; answers with its length.
    pub async fn read_dir(&self, path: &str, out: &mut [u8]) -> Result<usize, FsError> {
        let len = out.len();
        self.submit(FsOp::DirRead, path, NonNull::new(out.as_mut_ptr()), len)
            .await
    }

    /// Check that a directory exists.
    pub async fn open_dir(&self, path: &str) -> Result<(), FsError> {
        self.submit(FsOp::DirOpen, path, None, 0).await.map(|_| ())
    }

    /// Create a directory.
    pub async fn make_dir(&self, path: &str) -> Result<(), FsError> {
        self.submit(FsOp::DirMake, path, None, 0).await.map(|_| ())
    }

    /// Remove a file or an empty directory.
    pub async fn remove(&self, path: &str) -> Result<(), FsError> {
        self.submit(FsOp::Remove, path, None, 0).await.map(|_| ())
    }

    async fn submit_data(&self, op: FsOp, path: &str, data: &[u8]) -> Result<usize, FsError> {
        // The filesystem task only reads through a write-class buffer.
        let buffer = NonNull::new(data.as_ptr() as *mut u8);
        self.submit(op, path, buffer, data.len()).await
    }

    async fn submit(
        &self,
        op: FsOp,
        path: &str,
        buffer: Option<NonNull<u8>>,
        len: usize,
    ) -> Result<usize, FsError> {
        let request =
            FsRequest::new(op, path, buffer, len).map_err(|_| FsError::InvalidArgument)?;

        // The request stays pinned to this frame until the reply (or
        // the timeout that declares the filesystem task dead).
        self.channel.send(RequestRef::new(&request)).await;

        match with_timeout(REPLY_TIMEOUT, request.done.wait()).await {
            Ok(()) => {
                let code = request.ret.load(Ordering::Acquire);
                if code < 0 {
                    Err(FsError::from_code(code))
                } else {
                    Ok(code as usize)
                }
            }
            Err(_) => {
                warn!("filesystem request timed out");
                Err(FsError::TransportTimeout)
            }
        }
    }
}
