//! Tokenized syscall submissions.
//!
//! Each function pairs one opcode with a continuation: it builds the
//! submission entry, hands it to the context (which assigns the token),
//! and registers the continuation under that token. The pointer-taking
//! variants are `unsafe` because the kernel reads or writes through the
//! pointers after the call returns; callers keep the referenced memory
//! alive until the continuation runs. The multi-step drivers satisfy
//! this by owning buffers and iovec scratch in their heap-held state.

use std::os::fd::RawFd;

use io_uring::{opcode, types};

use crate::context::{Context, SyscallCallback, Token};
use crate::error::Result;

/// Submit a no-op entry.
pub fn nop(ctx: &Context, callback: SyscallCallback) -> Result<Token> {
    ctx.add_sqe_with_callback(opcode::Nop::new().build(), callback)
}

/// Submit a one-shot poll for `mask` events on `fd`.
pub fn poll_add(ctx: &Context, fd: RawFd, mask: u32, callback: SyscallCallback) -> Result<Token> {
    let entry = opcode::PollAdd::new(types::Fd(fd), mask).build();
    ctx.add_sqe_with_callback(entry, callback)
}

/// Submit a positional read into `buf`.
///
/// # Safety
///
/// `buf` must point to `len` writable bytes that stay valid until the
/// continuation is invoked.
pub unsafe fn read(
    ctx: &Context,
    fd: RawFd,
    buf: *mut u8,
    len: u32,
    offset: u64,
    callback: SyscallCallback,
) -> Result<Token> {
    let entry = opcode::Read::new(types::Fd(fd), buf, len)
        .offset(offset)
        .build();
    ctx.add_sqe_with_callback(entry, callback)
}

/// Submit a positional write from `buf`.
///
/// # Safety
///
/// `buf` must point to `len` readable bytes that stay valid until the
/// continuation is invoked.
pub unsafe fn write(
    ctx: &Context,
    fd: RawFd,
    buf: *const u8,
    len: u32,
    offset: u64,
    callback: SyscallCallback,
) -> Result<Token> {
    let entry = opcode::Write::new(types::Fd(fd), buf, len)
        .offset(offset)
        .build();
    ctx.add_sqe_with_callback(entry, callback)
}

/// Submit a vectored read.
///
/// # Safety
///
/// `iovecs` must point to `nr_vecs` iovec entries, and both the array
/// and every buffer it references must stay valid until the continuation
/// is invoked.
pub unsafe fn readv(
    ctx: &Context,
    fd: RawFd,
    iovecs: *const libc::iovec,
    nr_vecs: u32,
    offset: u64,
    callback: SyscallCallback,
) -> Result<Token> {
    let entry = opcode::Readv::new(types::Fd(fd), iovecs, nr_vecs)
        .offset(offset)
        .build();
    ctx.add_sqe_with_callback(entry, callback)
}

/// Submit a vectored write.
///
/// # Safety
///
/// Same contract as [`readv`]: array and referenced buffers outlive the
/// operation.
pub unsafe fn writev(
    ctx: &Context,
    fd: RawFd,
    iovecs: *const libc::iovec,
    nr_vecs: u32,
    offset: u64,
    callback: SyscallCallback,
) -> Result<Token> {
    let entry = opcode::Writev::new(types::Fd(fd), iovecs, nr_vecs)
        .offset(offset)
        .build();
    ctx.add_sqe_with_callback(entry, callback)
}

/// Submit an accept on a listening socket.
///
/// The continuation receives the accepted descriptor as the syscall
/// result. When `addr`/`addrlen` are non-null the kernel fills them with
/// the peer address; `addrlen` is value-result, sized at entry and
/// truncated on read-back.
///
/// # Safety
///
/// `addr` and `addrlen` are either both null or both valid for writes
/// until the continuation is invoked.
pub unsafe fn accept(
    ctx: &Context,
    fd: RawFd,
    addr: *mut libc::sockaddr,
    addrlen: *mut libc::socklen_t,
    callback: SyscallCallback,
) -> Result<Token> {
    let entry = opcode::Accept::new(types::Fd(fd), addr, addrlen).build();
    ctx.add_sqe_with_callback(entry, callback)
}

/// Submit a connect to the address behind `addr`.
///
/// # Safety
///
/// `addr` must point to `addrlen` valid bytes of socket address that
/// stay valid until the continuation is invoked.
pub unsafe fn connect(
    ctx: &Context,
    fd: RawFd,
    addr: *const libc::sockaddr,
    addrlen: libc::socklen_t,
    callback: SyscallCallback,
) -> Result<Token> {
    let entry = opcode::Connect::new(types::Fd(fd), addr, addrlen).build();
    ctx.add_sqe_with_callback(entry, callback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn nop_completes_with_zero() {
        let ctx = Context::new().expect("context");
        let result = Arc::new(AtomicI32::new(-1));
        let result2 = result.clone();
        let ctx2 = ctx.clone();
        nop(
            &ctx,
            Box::new(move |ret| {
                result2.store(ret.expect("nop result"), Ordering::SeqCst);
                ctx2.exit().expect("exit");
            }),
        )
        .expect("submit nop");
        ctx.run().expect("run");
        assert_eq!(result.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn writev_gathers_into_a_pipe() {
        let ctx = Context::new().expect("context");
        let (rx, tx) = crate::fd::Fd::pipe().expect("pipe");
        let bufs = [b"ab".to_vec(), b"cd".to_vec()];
        let iov: Vec<libc::iovec> = bufs
            .iter()
            .map(|b| libc::iovec {
                iov_base: b.as_ptr() as *mut libc::c_void,
                iov_len: b.len(),
            })
            .collect();

        let written = Arc::new(AtomicI32::new(0));
        let written2 = written.clone();
        let ctx2 = ctx.clone();
        // SAFETY: iov and bufs outlive run(), which drives the
        // continuation before returning.
        unsafe {
            writev(
                &ctx,
                tx.raw(),
                iov.as_ptr(),
                iov.len() as u32,
                0,
                Box::new(move |ret| {
                    written2.store(ret.expect("writev"), Ordering::SeqCst);
                    ctx2.exit().expect("exit");
                }),
            )
        }
        .expect("submit writev");
        ctx.run().expect("run");
        assert_eq!(written.load(Ordering::SeqCst), 4);

        let mut back = [0u8; 4];
        // SAFETY: reading into a live stack buffer.
        let n = unsafe { libc::read(rx.raw(), back.as_mut_ptr().cast(), back.len()) };
        assert_eq!(n, 4);
        assert_eq!(&back, b"abcd");
    }

    #[test]
    fn read_on_bad_fd_reports_errno() {
        let ctx = Context::new().expect("context");
        let seen = Arc::new(AtomicI32::new(0));
        let seen2 = seen.clone();
        let ctx2 = ctx.clone();
        let mut buf = vec![0u8; 16];
        // SAFETY: buf outlives the run() below, which drives the
        // continuation to completion before returning.
        unsafe {
            read(
                &ctx,
                -1,
                buf.as_mut_ptr(),
                buf.len() as u32,
                0,
                Box::new(move |ret| {
                    let err = ret.expect_err("read on fd -1 fails");
                    seen2.store(err.raw_os_error().unwrap_or(0), Ordering::SeqCst);
                    ctx2.exit().expect("exit");
                }),
            )
        }
        .expect("submit read");
        ctx.run().expect("run");
        assert_eq!(seen.load(Ordering::SeqCst), libc::EBADF);
        drop(buf);
    }
}
