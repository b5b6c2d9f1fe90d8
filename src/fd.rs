//! Descriptor model: raw fd plus offset behavior.
//!
//! Two kinds of descriptor exist. A *cursor* descriptor (regular file,
//! memfd) carries a userland byte offset that every transfer reads and
//! advances, so sequential operations pick up where the last one ended.
//! A *stream* descriptor (socket, pipe, eventfd) has no offset at all:
//! blocking syscalls use the plain non-positional forms and ring
//! submissions pass offset zero.
//!
//! [`Fd`] is a cheap-clone shared handle; multi-step operations capture
//! a clone in their heap-held state, which keeps the descriptor open for
//! the lifetime of the continuation chain.

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStringExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;

#[derive(Debug)]
struct FdInner {
    fd: OwnedFd,
    /// Userland cursor for seekable descriptors; `None` for streams.
    cursor: Option<AtomicU64>,
}

/// Shared handle to one open descriptor.
#[derive(Debug, Clone)]
pub struct Fd {
    inner: Arc<FdInner>,
}

impl Fd {
    /// Wrap an owned descriptor that maintains a byte cursor (regular
    /// files, memfds). The cursor starts at zero.
    pub fn seekable(fd: OwnedFd) -> Self {
        Self {
            inner: Arc::new(FdInner {
                fd,
                cursor: Some(AtomicU64::new(0)),
            }),
        }
    }

    /// Wrap an owned descriptor with no offset semantics (sockets,
    /// pipes, eventfds).
    pub fn stream(fd: OwnedFd) -> Self {
        Self {
            inner: Arc::new(FdInner { fd, cursor: None }),
        }
    }

    /// Open a regular file read-only as a seekable descriptor.
    pub fn open(path: &std::path::Path) -> Result<Self> {
        Ok(Self::from_file(File::open(path).map_err(crate::RingloopError::Io)?))
    }

    /// Create (or truncate) a regular file as a seekable descriptor.
    pub fn create(path: &std::path::Path) -> Result<Self> {
        Ok(Self::from_file(
            File::create(path).map_err(crate::RingloopError::Io)?,
        ))
    }

    /// Adopt a [`File`] as a seekable descriptor with its cursor at zero.
    pub fn from_file(file: File) -> Self {
        Self::seekable(OwnedFd::from(file))
    }

    /// Create a uniquely named temporary file like `mkostemp(3)`.
    ///
    /// `templ` is a path whose last six characters are `XXXXXX`; the
    /// kernel replaces them with a unique suffix. Returns the seekable
    /// descriptor together with the path actually created, so the
    /// caller can unlink it. `flags` takes open flags such as
    /// `O_CLOEXEC`.
    pub fn mkostemp(templ: &str, flags: i32) -> Result<(Self, std::path::PathBuf)> {
        let c_templ = CString::new(templ).map_err(|_| {
            crate::RingloopError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "template contains NUL",
            ))
        })?;
        let mut bytes = c_templ.into_bytes_with_nul();
        // SAFETY: bytes is a writable NUL-terminated buffer; mkostemp
        // rewrites the XXXXXX suffix in place.
        let fd = unsafe { libc::mkostemp(bytes.as_mut_ptr().cast(), flags) };
        if fd == -1 {
            return Err(io::Error::last_os_error().into());
        }
        bytes.pop();
        let path = std::path::PathBuf::from(std::ffi::OsString::from_vec(bytes));
        // SAFETY: fd was just returned by mkostemp and is unowned.
        Ok((Self::seekable(unsafe { OwnedFd::from_raw_fd(fd) }), path))
    }

    /// A stream handle to standard input, duplicated so dropping it does
    /// not close descriptor 0.
    pub fn stdin() -> Result<Self> {
        dup_std(libc::STDIN_FILENO)
    }

    /// A stream handle to standard output, duplicated like [`Fd::stdin`].
    pub fn stdout() -> Result<Self> {
        dup_std(libc::STDOUT_FILENO)
    }

    /// Create an anonymous memory-backed seekable descriptor.
    pub fn memfd(name: &str) -> Result<Self> {
        let c_name = CString::new(name).map_err(|_| {
            crate::RingloopError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "memfd name contains NUL",
            ))
        })?;
        // SAFETY: c_name is a valid NUL-terminated string; the result is
        // checked before being wrapped.
        let fd = unsafe { libc::memfd_create(c_name.as_ptr(), 0) };
        if fd == -1 {
            return Err(io::Error::last_os_error().into());
        }
        // SAFETY: fd was just returned by memfd_create and is unowned.
        Ok(Self::seekable(unsafe { OwnedFd::from_raw_fd(fd) }))
    }

    /// Create an eventfd counter as a stream descriptor.
    pub fn eventfd(init: u32) -> Result<Self> {
        // SAFETY: plain eventfd creation; the result is checked.
        let fd = unsafe { libc::eventfd(init, libc::EFD_CLOEXEC) };
        if fd == -1 {
            return Err(io::Error::last_os_error().into());
        }
        // SAFETY: fd was just returned by eventfd and is unowned.
        Ok(Self::stream(unsafe { OwnedFd::from_raw_fd(fd) }))
    }

    /// Create a pipe, returning `(read_end, write_end)` stream
    /// descriptors.
    pub fn pipe() -> Result<(Self, Self)> {
        let mut ends = [0 as RawFd; 2];
        // SAFETY: ends is a valid 2-element fd array; the result is
        // checked.
        let ret = unsafe { libc::pipe2(ends.as_mut_ptr(), libc::O_CLOEXEC) };
        if ret == -1 {
            return Err(io::Error::last_os_error().into());
        }
        // SAFETY: both fds were just created by pipe2 and are unowned.
        let (read, write) = unsafe {
            (
                OwnedFd::from_raw_fd(ends[0]),
                OwnedFd::from_raw_fd(ends[1]),
            )
        };
        Ok((Self::stream(read), Self::stream(write)))
    }

    /// The raw descriptor.
    pub fn raw(&self) -> RawFd {
        self.inner.fd.as_raw_fd()
    }

    /// Whether this descriptor carries a cursor.
    pub fn is_seekable(&self) -> bool {
        self.inner.cursor.is_some()
    }

    /// Offset to pass in ring submissions: the cursor position, or zero
    /// for streams (the kernel ignores it for non-seekable targets).
    pub fn offset(&self) -> u64 {
        match &self.inner.cursor {
            Some(cursor) => cursor.load(Ordering::Relaxed),
            None => 0,
        }
    }

    /// Reposition the cursor. No-op on stream descriptors.
    pub fn seek(&self, offset: u64) {
        if let Some(cursor) = &self.inner.cursor {
            cursor.store(offset, Ordering::Relaxed);
        }
    }

    /// Advance the cursor by `n` transferred bytes. No-op on stream
    /// descriptors.
    pub fn feed(&self, n: usize) {
        if let Some(cursor) = &self.inner.cursor {
            cursor.fetch_add(n as u64, Ordering::Relaxed);
        }
    }
}

fn dup_std(fd: RawFd) -> Result<Fd> {
    // SAFETY: duplicating a standard descriptor; the result is checked.
    let dup = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
    if dup == -1 {
        return Err(io::Error::last_os_error().into());
    }
    // SAFETY: dup was just created and is unowned.
    Ok(Fd::stream(unsafe { OwnedFd::from_raw_fd(dup) }))
}

impl AsFd for Fd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.fd.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memfd_has_cursor() {
        let fd = Fd::memfd("cursor-test").expect("memfd");
        assert!(fd.is_seekable());
        assert_eq!(fd.offset(), 0);
        fd.feed(5);
        assert_eq!(fd.offset(), 5);
        fd.seek(2);
        assert_eq!(fd.offset(), 2);
    }

    #[test]
    fn mkostemp_creates_a_seekable_file() {
        let templ = std::env::temp_dir().join("ringloop-XXXXXX");
        let (fd, path) =
            Fd::mkostemp(templ.to_str().expect("utf8 path"), libc::O_CLOEXEC).expect("mkostemp");
        assert!(fd.is_seekable());
        assert_eq!(fd.offset(), 0);
        // The XXXXXX suffix was replaced and the file exists on disk.
        assert_ne!(path, templ);
        assert!(path.exists());
        std::fs::remove_file(&path).expect("cleanup");
    }

    #[test]
    fn mkostemp_rejects_embedded_nul() {
        let err = Fd::mkostemp("bad\0XXXXXX", 0).expect_err("NUL in template");
        assert_eq!(err.into_io().kind(), std::io::ErrorKind::InvalidInput);
    }

    #[test]
    fn stdio_handles_are_duplicates() {
        let out = Fd::stdout().expect("stdout");
        assert!(!out.is_seekable());
        // Dropping the handle must not close the process's stdout.
        assert_ne!(out.raw(), libc::STDOUT_FILENO);
    }

    #[test]
    fn pipe_ends_are_streams() {
        let (read, write) = Fd::pipe().expect("pipe");
        assert!(!read.is_seekable());
        assert!(!write.is_seekable());
        write.feed(3);
        assert_eq!(write.offset(), 0);
    }

    #[test]
    fn clones_share_the_cursor() {
        let fd = Fd::memfd("shared-cursor").expect("memfd");
        let clone = fd.clone();
        clone.feed(7);
        assert_eq!(fd.offset(), 7);
    }

    #[test]
    fn memfd_rejects_nul_in_name() {
        assert!(Fd::memfd("bad\0name").is_err());
    }
}
