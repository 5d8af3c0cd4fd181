use std::io;
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;
use windows_sys::Win32::Foundation::{
    ERROR_BROKEN_PIPE, ERROR_IO_PENDING, ERROR_MORE_DATA, ERROR_OPERATION_ABORTED,
    ERROR_PIPE_BUSY, FALSE, GENERIC_READ, GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE, TRUE,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, ReadFile, WriteFile, FILE_FLAG_OVERLAPPED, OPEN_EXISTING,
};
use windows_sys::Win32::System::Pipes::WaitNamedPipeW;
use windows_sys::Win32::System::Threading::CreateEventW;
use windows_sys::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};

use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

/// Wait for the server-configured default time-out.
const WAIT_DEFAULT: u32 = 0;

/// Windows named pipe client transport.
pub struct NamedPipe;

impl NamedPipe {
    /// Open a client handle to `\\.\pipe\<name>` (blocking).
    ///
    /// A pipe whose only instance is busy is waited on once before failing.
    pub fn connect(path: impl AsRef<Path>) -> Result<IpcStream> {
        let path = path.as_ref();
        let wide: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();
        let connect_err = |source| TransportError::Connect {
            path: path.to_path_buf(),
            source,
        };

        match PipeHandle::open(&wide) {
            Ok(pipe) => Ok(IpcStream::from_pipe(pipe)),
            Err(err) if err.raw_os_error() == Some(ERROR_PIPE_BUSY as i32) => {
                debug!(?path, "pipe busy; waiting for an instance");
                // SAFETY: `wide` is a NUL-terminated UTF-16 buffer that outlives the call.
                if unsafe { WaitNamedPipeW(wide.as_ptr(), WAIT_DEFAULT) } == 0 {
                    return Err(connect_err(io::Error::last_os_error()));
                }
                PipeHandle::open(&wide)
                    .map(IpcStream::from_pipe)
                    .map_err(connect_err)
            }
            Err(source) => Err(connect_err(source)),
        }
    }
}

/// An overlapped client handle to a named pipe.
///
/// Clones share the handle. Every read and write carries its own
/// `OVERLAPPED`, so a read parked on one clone never holds up a write on
/// another.
#[derive(Clone)]
pub(crate) struct PipeHandle {
    inner: Arc<PipeInner>,
}

struct PipeInner {
    handle: OwnedHandle,
    closed: AtomicBool,
}

impl PipeHandle {
    fn open(wide_path: &[u16]) -> io::Result<Self> {
        // SAFETY: `wide_path` is NUL-terminated; the remaining pointers may be null.
        let raw = unsafe {
            CreateFileW(
                wide_path.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                0,
                ptr::null(),
                OPEN_EXISTING,
                FILE_FLAG_OVERLAPPED,
                ptr::null_mut(),
            )
        };
        if raw == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }
        debug!("connected to named pipe");
        // SAFETY: `raw` is a valid handle that nothing else owns.
        let handle = unsafe { OwnedHandle::from_raw_handle(raw as _) };
        Ok(Self {
            inner: Arc::new(PipeInner {
                handle,
                closed: AtomicBool::new(false),
            }),
        })
    }

    fn raw(&self) -> HANDLE {
        self.inner.handle.as_raw_handle() as HANDLE
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Ok(0);
        }
        let len = u32::try_from(buf.len()).unwrap_or(u32::MAX);
        let result = self.overlapped(|handle, overlapped| {
            // SAFETY: `buf` stays borrowed until the operation has completed.
            unsafe { ReadFile(handle, buf.as_mut_ptr(), len, ptr::null_mut(), overlapped) }
        });
        match result {
            Ok(n) => Ok(n),
            // Host hung up, or `shutdown` cancelled the read.
            Err(err)
                if matches!(
                    err.raw_os_error(),
                    Some(code) if code == ERROR_BROKEN_PIPE as i32
                        || code == ERROR_OPERATION_ABORTED as i32
                ) =>
            {
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }

    pub(crate) fn write(&self, buf: &[u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let len = u32::try_from(buf.len()).unwrap_or(u32::MAX);
        self.overlapped(|handle, overlapped| {
            // SAFETY: `buf` stays borrowed until the operation has completed.
            unsafe { WriteFile(handle, buf.as_ptr(), len, ptr::null_mut(), overlapped) }
        })
    }

    /// Cancel pending I/O on every clone; later reads report end of stream.
    pub(crate) fn shutdown(&self) -> io::Result<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.cancel_pending();
        Ok(())
    }

    fn cancel_pending(&self) {
        // SAFETY: a null OVERLAPPED cancels all I/O issued on the handle.
        // Failure only means nothing was pending.
        unsafe { CancelIoEx(self.raw(), ptr::null()) };
    }

    /// Issue one overlapped operation and wait for it to complete.
    fn overlapped<F>(&self, issue: F) -> io::Result<usize>
    where
        F: FnOnce(HANDLE, *mut OVERLAPPED) -> i32,
    {
        // SAFETY: manual-reset, initially unset, unnamed event.
        let event = unsafe { CreateEventW(ptr::null(), TRUE, FALSE, ptr::null()) };
        if event.is_null() {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `event` is a fresh handle owned by this call.
        let event = unsafe { OwnedHandle::from_raw_handle(event as _) };

        // SAFETY: an all-zero OVERLAPPED is the documented initial state.
        let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
        overlapped.hEvent = event.as_raw_handle() as HANDLE;

        if issue(self.raw(), &mut overlapped) == 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(ERROR_IO_PENDING as i32) {
                return Err(err);
            }
        }
        // A shutdown racing with the issue above may have missed this operation.
        if self.is_closed() {
            self.cancel_pending();
        }

        let mut transferred = 0u32;
        // SAFETY: `overlapped` lives on this frame until the wait returns.
        let ok = unsafe { GetOverlappedResult(self.raw(), &overlapped, &mut transferred, TRUE) };
        if ok == 0 {
            let err = io::Error::last_os_error();
            // Message-mode pipes report a partial message this way.
            if err.raw_os_error() != Some(ERROR_MORE_DATA as i32) {
                return Err(err);
            }
        }
        Ok(transferred as usize)
    }
}
