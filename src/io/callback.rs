//! Callback transfer facade.
//!
//! Each function submits the first chunk and returns immediately; the
//! event loop drives the remaining chunks by resuming the transfer
//! driver from each completion. Buffers move into the operation for its
//! lifetime and come back through the callback, success or error, so
//! the kernel never reads or writes through a pointer the caller could
//! invalidate.
//!
//! The transfer driver is one state machine for all six entry points:
//! single buffers are wrapped as one-element sequences, and the
//! `_some` forms are transfers with an at-least-one-byte condition.

use io_uring::{opcode, types};
use tracing::trace;

use crate::context::Context;
use crate::error::Result;
use crate::fd::Fd;
use crate::iovec::{total_len, IoVecs};
use crate::op::Op;
use crate::transfer::{transfer_at_least, CompletionCondition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dir {
    Read,
    Write,
}

/// State of one in-flight condition-driven transfer.
struct SeqLocals {
    fd: Fd,
    bufs: Vec<Vec<u8>>,
    total: usize,
    done: usize,
    cond: CompletionCondition,
    dir: Dir,
    iov: IoVecs,
}

type TransferOp = Op<SeqLocals, usize>;

/// Issue the next chunk, or complete if the condition is satisfied.
fn transfer_run(mut op: TransferOp) {
    let want = op.locals.cond.remaining(op.locals.total, op.locals.done);
    if want == 0 {
        let done = op.locals.done;
        op.complete(Ok(done));
        return;
    }
    let l = &mut *op.locals;
    l.iov.fill(&l.bufs, l.done, want);
    let offset = if l.fd.is_seekable() { l.fd.offset() } else { 0 };
    let fd = types::Fd(l.fd.raw());
    // The iovec array and the buffers it references live in the boxed
    // locals, which the driver owns until the completion for this entry
    // has been delivered.
    let entry = match l.dir {
        Dir::Read => opcode::Readv::new(fd, l.iov.as_ptr(), l.iov.len() as u32)
            .offset(offset)
            .build(),
        Dir::Write => opcode::Writev::new(fd, l.iov.as_ptr(), l.iov.len() as u32)
            .offset(offset)
            .build(),
    };
    op.submit(entry, transfer_step);
}

fn transfer_step(mut op: TransferOp, result: Result<i32>) {
    let n = match result {
        Ok(n) => n as usize,
        Err(err) => {
            op.complete(Err(err));
            return;
        }
    };
    if n == 0 && op.locals.dir == Dir::Read {
        // EOF terminates a read transfer with whatever arrived.
        let done = op.locals.done;
        trace!(done, "read transfer hit EOF");
        op.complete(Ok(done));
        return;
    }
    op.locals.done += n;
    op.locals.fd.feed(n);
    transfer_run(op);
}

fn start(
    ctx: &Context,
    fd: &Fd,
    bufs: Vec<Vec<u8>>,
    cond: CompletionCondition,
    dir: Dir,
    callback: impl FnOnce(Result<usize>, Vec<Vec<u8>>) + Send + 'static,
) {
    let total = total_len(&bufs);
    let locals = SeqLocals {
        fd: fd.clone(),
        bufs,
        total,
        done: 0,
        cond,
        dir,
        iov: IoVecs::default(),
    };
    let op = Op::new(ctx.clone(), locals, move |locals: Box<SeqLocals>, result| {
        // Release the descriptor clone and iovec scratch before handing
        // control to the caller, so a continuation that waits for EOF on
        // this descriptor is not held open by our own locals.
        let SeqLocals { bufs, .. } = *locals;
        callback(result, bufs)
    });
    transfer_run(op);
}

fn start_single(
    ctx: &Context,
    fd: &Fd,
    buf: Vec<u8>,
    cond: CompletionCondition,
    dir: Dir,
    callback: impl FnOnce(Result<usize>, Vec<u8>) + Send + 'static,
) {
    start(ctx, fd, vec![buf], cond, dir, move |result, mut bufs| {
        callback(result, bufs.pop().unwrap_or_default())
    });
}

/// Read into `buf` until `cond` is satisfied, the buffer is full, or
/// EOF; the callback receives the byte count and the buffer back.
pub fn read(
    ctx: &Context,
    fd: &Fd,
    buf: Vec<u8>,
    cond: CompletionCondition,
    callback: impl FnOnce(Result<usize>, Vec<u8>) + Send + 'static,
) {
    start_single(ctx, fd, buf, cond, Dir::Read, callback);
}

/// Write `buf` until `cond` is satisfied or the buffer is exhausted.
pub fn write(
    ctx: &Context,
    fd: &Fd,
    buf: Vec<u8>,
    cond: CompletionCondition,
    callback: impl FnOnce(Result<usize>, Vec<u8>) + Send + 'static,
) {
    start_single(ctx, fd, buf, cond, Dir::Write, callback);
}

/// Read whatever a single submission delivers (at least one byte unless
/// at EOF).
pub fn read_some(
    ctx: &Context,
    fd: &Fd,
    buf: Vec<u8>,
    callback: impl FnOnce(Result<usize>, Vec<u8>) + Send + 'static,
) {
    read(ctx, fd, buf, transfer_at_least(1), callback);
}

/// Write whatever a single submission accepts (at least one byte).
pub fn write_some(
    ctx: &Context,
    fd: &Fd,
    buf: Vec<u8>,
    callback: impl FnOnce(Result<usize>, Vec<u8>) + Send + 'static,
) {
    write(ctx, fd, buf, transfer_at_least(1), callback);
}

/// Scatter-read across a buffer sequence; the condition sees the
/// sequence's total length.
pub fn read_seq(
    ctx: &Context,
    fd: &Fd,
    bufs: Vec<Vec<u8>>,
    cond: CompletionCondition,
    callback: impl FnOnce(Result<usize>, Vec<Vec<u8>>) + Send + 'static,
) {
    start(ctx, fd, bufs, cond, Dir::Read, callback);
}

/// Gather-write across a buffer sequence.
pub fn write_seq(
    ctx: &Context,
    fd: &Fd,
    bufs: Vec<Vec<u8>>,
    cond: CompletionCondition,
    callback: impl FnOnce(Result<usize>, Vec<Vec<u8>>) + Send + 'static,
) {
    start(ctx, fd, bufs, cond, Dir::Write, callback);
}

/// See [`read_some`], over a buffer sequence.
pub fn read_some_seq(
    ctx: &Context,
    fd: &Fd,
    bufs: Vec<Vec<u8>>,
    callback: impl FnOnce(Result<usize>, Vec<Vec<u8>>) + Send + 'static,
) {
    read_seq(ctx, fd, bufs, transfer_at_least(1), callback);
}

/// See [`write_some`], over a buffer sequence.
pub fn write_some_seq(
    ctx: &Context,
    fd: &Fd,
    bufs: Vec<Vec<u8>>,
    callback: impl FnOnce(Result<usize>, Vec<Vec<u8>>) + Send + 'static,
) {
    write_seq(ctx, fd, bufs, transfer_at_least(1), callback);
}
