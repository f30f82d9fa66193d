//! The request protocol between client tasks and the filesystem task.
//!
//! A request lives on the submitting task's stack. What travels through
//! the channel is a pointer-sized handle; the filesystem task fills in
//! the result code, signals `done`, and never touches the request
//! again. The submitting task keeps the request (and the buffer it
//! points at) alive until `done` fires or it gives up waiting - a
//! missed reply only happens once the filesystem task has stopped
//! serving for good, after which nothing dereferences the handle.

use core::ptr::NonNull;
use core::sync::atomic::AtomicI32;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use heapless::String;

/// Requests the channel buffers before submitters start blocking
pub const REQUEST_DEPTH: usize = 4;

/// Longest accepted path, without the trailing nul
pub const PATH_CAPACITY: usize = 64;

/// Channel carrying request handles to the filesystem task
pub type FsChannel = Channel<CriticalSectionRawMutex, RequestRef, REQUEST_DEPTH>;

/// Filesystem operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FsOp {
    /// Placeholder; always answered with an invalid-argument code
    None,
    /// Verify a directory exists
    DirOpen,
    /// Render a directory listing into the request buffer
    DirRead,
    /// Create a directory
    DirMake,
    /// Verify a file exists; answers with its size
    FileOpen,
    /// Read file contents into the request buffer
    FileRead,
    /// Overwrite an existing file
    FileWrite,
    /// Overwrite, creating the file first if missing
    FileWriteAndMake,
    /// Create a file that must not exist yet
    FileCreateNew,
    /// Append to an existing file
    FileAppend,
    /// Remove a file or empty directory
    Remove,
}

/// The submitted path did not fit the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathTooLong;

/// One filesystem request, owned by the submitting task
pub struct FsRequest {
    pub(crate) op: FsOp,
    pub(crate) path: String<PATH_CAPACITY>,
    buffer: Option<NonNull<u8>>,
    len: usize,
    pub(crate) ret: AtomicI32,
    pub(crate) done: Signal<CriticalSectionRawMutex, ()>,
}

impl FsRequest {
    pub(crate) fn new(
        op: FsOp,
        path: &str,
        buffer: Option<NonNull<u8>>,
        len: usize,
    ) -> Result<Self, PathTooLong> {
        let mut owned = String::new();
        owned.push_str(path).map_err(|()| PathTooLong)?;
        Ok(Self {
            op,
            path: owned,
            buffer,
            len,
            ret: AtomicI32::new(0),
            done: Signal::new(),
        })
    }

    /// Payload of a write-class request; empty when no buffer came along.
    #[allow(unsafe_code)]
    pub(crate) fn data(&self) -> &[u8] {
        match self.buffer {
            // SAFETY: the submitter keeps the buffer borrowed for the
            // lifetime of the request; the filesystem task is the only
            // other side that looks at it, and only before `done`.
            Some(ptr) => unsafe { core::slice::from_raw_parts(ptr.as_ptr(), self.len) },
            None => &[],
        }
    }

    /// Destination of a read-class request.
    #[allow(unsafe_code)]
    pub(crate) fn sink(&self) -> Option<&mut [u8]> {
        // SAFETY: as in `data`; read-class submitters hand over a
        // uniquely borrowed mutable buffer and do not touch it until
        // `done` fires, so the slice is exclusive while it exists.
        self.buffer
            .map(|ptr| unsafe { core::slice::from_raw_parts_mut(ptr.as_ptr(), self.len) })
    }
}

/// Pointer-sized handle to a request living on another task's stack
#[derive(Clone, Copy)]
pub struct RequestRef(NonNull<FsRequest>);

// SAFETY: the handle crosses to the filesystem task while the
// submitting task keeps the request alive waiting on `done`; each
// request is dequeued and answered at most once.
#[allow(unsafe_code)]
unsafe impl Send for RequestRef {}

impl RequestRef {
    pub(crate) fn new(request: &FsRequest) -> Self {
        Self(NonNull::from(request))
    }

    /// Borrow the request behind the handle.
    #[allow(unsafe_code)]
    pub(crate) fn request(&self) -> &FsRequest {
        // SAFETY: see the Send impl; the submitter holds the request
        // alive until the reply it is waiting for has been signalled.
        unsafe { self.0.as_ref() }
    }
}
