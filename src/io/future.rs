//! Future transfer facade.
//!
//! A thin lift of the callback facade into `async`: each function
//! starts the callback-facade operation immediately, before any waker
//! exists, and resolves when that operation's callback fires. The
//! buffer travels with the result in both directions, so the caller
//! gets it back whether the transfer succeeded or failed.
//!
//! Futures here are driven by any executor whose waker is `Send`; the
//! in-crate [`crate::executor::spawn`] polls inline from the loop
//! thread.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context as TaskContext, Poll, Waker};

use crate::context::Context;
use crate::error::Result;
use crate::fd::Fd;
use crate::io::callback;
use crate::transfer::{transfer_at_least, CompletionCondition};

enum Slot<T> {
    /// Not resolved; holds the most recent poll's waker.
    Pending(Option<Waker>),
    Ready(T),
    Taken,
}

/// A one-shot future resolved by a loop continuation.
pub struct OpFuture<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

/// Write half of an [`OpFuture`]; consumed by the resolving callback.
pub(crate) struct Complete<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T> Complete<T> {
    pub(crate) fn set(self, value: T) {
        let waker = {
            let mut slot = self.slot.lock().expect("slot lock poisoned");
            match std::mem::replace(&mut *slot, Slot::Ready(value)) {
                Slot::Pending(waker) => waker,
                _ => None,
            }
        };
        // Waking outside the lock: the woken task may poll inline.
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Build a future and start its operation in one step.
///
/// `start` runs before the future can be polled, so a continuation that
/// fires inline (immediate submission failure) resolves the slot before
/// the first poll rather than deadlocking on a waker that was never
/// registered.
pub(crate) fn op_future<T, F>(start: F) -> OpFuture<T>
where
    F: FnOnce(Complete<T>),
{
    let slot = Arc::new(Mutex::new(Slot::Pending(None)));
    start(Complete { slot: slot.clone() });
    OpFuture { slot }
}

impl<T> Future for OpFuture<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<T> {
        let mut slot = self.slot.lock().expect("slot lock poisoned");
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(value) => Poll::Ready(value),
            Slot::Pending(_) => {
                *slot = Slot::Pending(Some(cx.waker().clone()));
                Poll::Pending
            }
            Slot::Taken => Poll::Pending,
        }
    }
}

/// Read into `buf` until `cond` is satisfied, the buffer is full, or
/// EOF.
pub async fn read(
    ctx: &Context,
    fd: &Fd,
    buf: Vec<u8>,
    cond: CompletionCondition,
) -> (Result<usize>, Vec<u8>) {
    op_future(|complete| {
        callback::read(ctx, fd, buf, cond, move |result, buf| {
            complete.set((result, buf))
        })
    })
    .await
}

/// Write `buf` until `cond` is satisfied or the buffer is exhausted.
pub async fn write(
    ctx: &Context,
    fd: &Fd,
    buf: Vec<u8>,
    cond: CompletionCondition,
) -> (Result<usize>, Vec<u8>) {
    op_future(|complete| {
        callback::write(ctx, fd, buf, cond, move |result, buf| {
            complete.set((result, buf))
        })
    })
    .await
}

/// One submission's worth of reading.
pub async fn read_some(ctx: &Context, fd: &Fd, buf: Vec<u8>) -> (Result<usize>, Vec<u8>) {
    read(ctx, fd, buf, transfer_at_least(1)).await
}

/// One submission's worth of writing.
pub async fn write_some(ctx: &Context, fd: &Fd, buf: Vec<u8>) -> (Result<usize>, Vec<u8>) {
    write(ctx, fd, buf, transfer_at_least(1)).await
}

/// Scatter-read across a buffer sequence.
pub async fn read_seq(
    ctx: &Context,
    fd: &Fd,
    bufs: Vec<Vec<u8>>,
    cond: CompletionCondition,
) -> (Result<usize>, Vec<Vec<u8>>) {
    op_future(|complete| {
        callback::read_seq(ctx, fd, bufs, cond, move |result, bufs| {
            complete.set((result, bufs))
        })
    })
    .await
}

/// Gather-write across a buffer sequence.
pub async fn write_seq(
    ctx: &Context,
    fd: &Fd,
    bufs: Vec<Vec<u8>>,
    cond: CompletionCondition,
) -> (Result<usize>, Vec<Vec<u8>>) {
    op_future(|complete| {
        callback::write_seq(ctx, fd, bufs, cond, move |result, bufs| {
            complete.set((result, bufs))
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::spawn;
    use crate::transfer::transfer_all;

    #[test]
    fn round_trip_through_async() {
        let ctx = Context::new().expect("context");
        let fd = Fd::memfd("future-round-trip").expect("memfd");

        let handle = spawn({
            let ctx = ctx.clone();
            let fd = fd.clone();
            async move {
                let bufs = vec![b"hello".to_vec(), b" ".to_vec(), b"world".to_vec()];
                let (result, _bufs) = write_seq(&ctx, &fd, bufs, transfer_all()).await;
                let written = result.expect("write_seq");

                fd.seek(0);
                let (result, buf) = read(&ctx, &fd, vec![0u8; 11], transfer_all()).await;
                let got = result.expect("read");

                ctx.exit().expect("exit");
                (written, got, buf)
            }
        });

        ctx.run().expect("run");
        let (written, got, buf) = handle.try_take().expect("task finished");
        assert_eq!(written, 11);
        assert_eq!(got, 11);
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn inline_resolution_before_first_poll() {
        // A slot resolved during start() must still deliver its value.
        let fut = op_future(|complete: Complete<u32>| complete.set(7));
        let value = futures::executor::block_on(fut);
        assert_eq!(value, 7);
    }

    #[test]
    #[should_panic(expected = "slot lock poisoned")]
    fn poisoned_slot_panics_instead_of_hanging() {
        let mut pending: Option<Complete<u32>> = None;
        let fut = op_future(|complete| pending = Some(complete));

        let slot = fut.slot.clone();
        std::thread::spawn(move || {
            let _guard = slot.lock().expect("first lock");
            panic!("poison the slot");
        })
        .join()
        .expect_err("the poisoning thread panicked");

        // Resolving must surface the poisoned lock, not drop the value.
        pending.expect("start captured the handle").set(7);
    }

    #[test]
    fn eof_resolves_with_partial_count() {
        let ctx = Context::new().expect("context");
        let (pipe_rx, pipe_tx) = Fd::pipe().expect("pipe");

        let handle = spawn({
            let ctx = ctx.clone();
            async move {
                let (result, _) = write(&ctx, &pipe_tx, b"ok".to_vec(), transfer_all()).await;
                result.expect("write");
                drop(pipe_tx);

                let (result, buf) = read(&ctx, &pipe_rx, vec![0u8; 8], transfer_all()).await;
                let n = result.expect("read");
                ctx.exit().expect("exit");
                (n, buf)
            }
        });

        ctx.run().expect("run");
        let (n, buf) = handle.try_take().expect("task finished");
        assert_eq!(n, 2);
        assert_eq!(&buf[..2], b"ok");
    }
}
