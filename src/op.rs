//! Generic driver for multi-step ring operations.
//!
//! A multi-step operation (a condition-driven transfer, an accept that
//! also captures the peer address) is a chain of submissions, each
//! resumed by the loop with the previous step's result. [`Op`] carries
//! that chain's state: the context handle, heap-held step-local state
//! (`locals`), and the caller's completion callback.
//!
//! Ownership moves forward through the chain: [`Op::submit`] transfers
//! the whole driver into the stored continuation, which hands it to a
//! plain resumption function. There is exactly one live owner at every
//! point, so the state needs no reference counting and is freed the
//! moment the chain completes or errors out. Because `locals` is boxed,
//! raw pointers taken into it (buffer and iovec addresses) stay valid
//! across the moves.

use io_uring::squeue;

use crate::context::Context;
use crate::error::Result;

/// State of one in-flight multi-step operation.
///
/// The completion callback receives the locals back along with the
/// result, so owned buffers and captured output (peer addresses, read
/// data) can be returned to the caller on success and on error alike.
pub(crate) struct Op<L, T> {
    ctx: Context,
    /// Step-local state. Public to the crate so step functions can read
    /// and update it directly.
    pub(crate) locals: Box<L>,
    callback: Box<dyn FnOnce(Box<L>, Result<T>) + Send>,
}

impl<L, T> Op<L, T>
where
    L: Send + 'static,
    T: Send + 'static,
{
    pub(crate) fn new(
        ctx: Context,
        locals: L,
        callback: impl FnOnce(Box<L>, Result<T>) + Send + 'static,
    ) -> Self {
        Self {
            ctx,
            locals: Box::new(locals),
            callback: Box::new(callback),
        }
    }

    pub(crate) fn ctx(&self) -> &Context {
        &self.ctx
    }

    /// Submit `entry` and resume at `next` when its completion arrives.
    ///
    /// On submission failure the driver is not lost: the error is routed
    /// into `next` immediately, exactly as a failed completion would be,
    /// so every chain ends in exactly one [`Op::complete`].
    pub(crate) fn submit(self, entry: squeue::Entry, next: fn(Op<L, T>, Result<i32>)) {
        let ctx = self.ctx.clone();
        let continuation: crate::SyscallCallback = Box::new(move |result| next(self, result));
        if let Err((err, continuation)) = ctx.add_sqe_recoverable(entry, continuation) {
            continuation(Err(err));
        }
    }

    /// Finish the operation, handing the locals and `result` to the
    /// caller's callback.
    pub(crate) fn complete(self, result: Result<T>) {
        (self.callback)(self.locals, result);
    }
}
