//! Blocking transfer facade.
//!
//! Direct syscalls, no ring involvement: each call loops in place,
//! re-applying the completion condition after every partial transfer.
//! Cursor descriptors use the positional `preadv`/`pwritev` forms and
//! advance their cursor; streams use plain `readv`/`writev`.
//!
//! A zero-byte read (EOF) terminates a read loop successfully with the
//! bytes transferred so far — mirroring POSIX short-read-at-EOF, not an
//! error.

use std::io;

use crate::error::Result;
use crate::fd::Fd;
use crate::transfer::{transfer_at_least, CompletionCondition};

enum Dir {
    Read,
    Write,
}

/// One read syscall; returns the raw transferred count (possibly zero at
/// EOF).
pub fn read_some(fd: &Fd, buf: &mut [u8]) -> Result<usize> {
    let iov = [libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    }];
    vectored(fd, &iov, Dir::Read)
}

/// One write syscall; returns the raw transferred count.
pub fn write_some(fd: &Fd, buf: &[u8]) -> Result<usize> {
    let iov = [libc::iovec {
        iov_base: buf.as_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    }];
    vectored(fd, &iov, Dir::Write)
}

/// Read until `cond` is satisfied, the buffer is full, or EOF.
pub fn read(fd: &Fd, buf: &mut [u8], cond: CompletionCondition) -> Result<usize> {
    let total = buf.len();
    let mut done = 0;
    loop {
        let want = cond.remaining(total, done);
        if want == 0 {
            return Ok(done);
        }
        let n = read_some(fd, &mut buf[done..done + want])?;
        if n == 0 {
            return Ok(done);
        }
        done += n;
    }
}

/// Write until `cond` is satisfied or the buffer is exhausted.
pub fn write(fd: &Fd, buf: &[u8], cond: CompletionCondition) -> Result<usize> {
    let total = buf.len();
    let mut done = 0;
    loop {
        let want = cond.remaining(total, done);
        if want == 0 {
            return Ok(done);
        }
        done += write_some(fd, &buf[done..done + want])?;
    }
}

/// Scatter-read across a buffer sequence until `cond` is satisfied or
/// EOF; the condition sees the sequence's total length.
pub fn read_seq(fd: &Fd, bufs: &mut [Vec<u8>], cond: CompletionCondition) -> Result<usize> {
    let total = crate::iovec::total_len(bufs);
    let mut done = 0;
    loop {
        let want = cond.remaining(total, done);
        if want == 0 {
            return Ok(done);
        }
        let mut iov = crate::iovec::IoVecs::default();
        iov.fill(bufs, done, want);
        let n = vectored(fd, iov.as_slice(), Dir::Read)?;
        if n == 0 {
            return Ok(done);
        }
        done += n;
    }
}

/// Gather-write across a buffer sequence until `cond` is satisfied.
pub fn write_seq(fd: &Fd, bufs: &[Vec<u8>], cond: CompletionCondition) -> Result<usize> {
    let total = crate::iovec::total_len(bufs);
    let mut done = 0;
    loop {
        let want = cond.remaining(total, done);
        if want == 0 {
            return Ok(done);
        }
        let mut iov = crate::iovec::IoVecs::default();
        iov.fill(bufs, done, want);
        done += vectored(fd, iov.as_slice(), Dir::Write)?;
    }
}

/// One scatter/gather syscall covering the remaining region of a
/// sequence.
pub fn read_some_seq(fd: &Fd, bufs: &mut [Vec<u8>]) -> Result<usize> {
    read_seq(fd, bufs, transfer_at_least(1))
}

/// See [`read_some_seq`].
pub fn write_some_seq(fd: &Fd, bufs: &[Vec<u8>]) -> Result<usize> {
    write_seq(fd, bufs, transfer_at_least(1))
}

fn vectored(fd: &Fd, iov: &[libc::iovec], dir: Dir) -> Result<usize> {
    let raw = fd.raw();
    let nr = iov.len() as libc::c_int;
    // SAFETY: the iovec array and its referenced buffers are borrowed
    // for the duration of this call; the syscall returns before they can
    // be released.
    let ret = unsafe {
        if fd.is_seekable() {
            let offset = fd.offset() as libc::off_t;
            match dir {
                Dir::Read => libc::preadv(raw, iov.as_ptr(), nr, offset),
                Dir::Write => libc::pwritev(raw, iov.as_ptr(), nr, offset),
            }
        } else {
            match dir {
                Dir::Read => libc::readv(raw, iov.as_ptr(), nr),
                Dir::Write => libc::writev(raw, iov.as_ptr(), nr),
            }
        }
    };
    if ret == -1 {
        return Err(io::Error::last_os_error().into());
    }
    let n = ret as usize;
    fd.feed(n);
    Ok(n)
}
