//! The proactor context: token registry, completion loop, self-wake.
//!
//! A [`Context`] owns one [`Ring`](crate::ring::Ring), a registry mapping
//! completion tokens to one-shot continuations, and an eventfd used to
//! wake the loop from other threads. Execution is single-threaded:
//! [`Context::run`] occupies its calling thread and dispatches every
//! continuation sequentially. Submission ([`Context::add_sqe`],
//! [`Context::add_sqe_with_callback`]), [`Context::cancel`],
//! [`Context::exit`], and [`Context::wake`] are thread-safe and may race
//! with the loop.
//!
//! Tokens are monotonically assigned `u64`s echoed back verbatim in the
//! completion's user-data field. A token holds at most one continuation,
//! and the continuation is removed from the registry the instant it is
//! looked up, so double invocation is impossible. A completion whose
//! token has no registered continuation is silently discarded — that is
//! the expected fate of operations cancelled before their completion was
//! observed.

use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use io_uring::squeue;
use tracing::{debug, trace};

use crate::config::RingConfig;
use crate::error::{Result, RingloopError};
use crate::ring::Ring;
use crate::syscall;

/// Opaque completion token correlating a submission with its completion.
pub type Token = u64;

/// One-shot continuation invoked with a completed operation's result.
///
/// A negative kernel result has already been translated into
/// [`RingloopError::Io`] carrying the errno; a non-negative result is the
/// syscall's return value.
pub type SyscallCallback = Box<dyn FnOnce(Result<i32>) + Send + 'static>;

struct ExitState {
    exiting: bool,
    error: Option<RingloopError>,
}

struct Inner {
    ring: Ring,
    /// Submission lock; the counter inside is the next token to assign.
    /// Held across the push so tokens enter the ring in assignment order.
    submission: Mutex<Token>,
    /// Pending continuations, keyed by token. Deliberately a separate
    /// lock from `submission` so completion matching never waits behind a
    /// submission in progress.
    callbacks: Mutex<HashMap<Token, SyscallCallback>>,
    /// Internal notifier; one poll on it is kept armed at all times.
    waker_fd: OwnedFd,
    /// True only while the loop is (about to be) blocked in `wait`.
    need_wake: AtomicBool,
    running: AtomicBool,
    exit: Mutex<ExitState>,
    reap_batch: usize,
}

/// Cheap-clone handle to one single-threaded proactor instance.
///
/// All clones refer to the same ring, registry, and loop state. The
/// underlying resources are torn down when the last clone (and the last
/// in-flight continuation capturing one) is dropped.
///
/// # Example
///
/// ```no_run
/// use ringloop::Context;
///
/// # fn main() -> ringloop::Result<()> {
/// let ctx = Context::new()?;
/// let ctx2 = ctx.clone();
/// std::thread::spawn(move || {
///     // submissions from other threads wake the loop promptly
///     ctx2.exit().unwrap();
/// });
/// ctx.run()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("ring", &self.inner.ring)
            .field("running", &self.inner.running.load(Ordering::Relaxed))
            .finish()
    }
}

impl Context {
    /// Create a context with default [`RingConfig`] and arm the
    /// self-wake poll.
    pub fn new() -> Result<Self> {
        Self::with_config(RingConfig::default())
    }

    /// Create a context with an explicit configuration.
    pub fn with_config(config: RingConfig) -> Result<Self> {
        let waker_fd = eventfd()?;
        let ring = Ring::new(config.entries)?;
        let ctx = Self {
            inner: Arc::new(Inner {
                ring,
                submission: Mutex::new(0),
                callbacks: Mutex::new(HashMap::new()),
                waker_fd,
                need_wake: AtomicBool::new(false),
                running: AtomicBool::new(false),
                exit: Mutex::new(ExitState {
                    exiting: false,
                    error: None,
                }),
                reap_batch: config.reap_batch,
            }),
        };
        ctx.arm_waker()?;
        Ok(ctx)
    }

    /// Submission slots in the underlying ring.
    pub fn capacity(&self) -> usize {
        self.inner.ring.capacity()
    }

    /// Submit a fire-and-forget entry.
    ///
    /// A token is consumed but no continuation is registered; the
    /// operation's completion will be discarded when it arrives. Used for
    /// bookkeeping entries whose outcome nobody observes.
    pub fn add_sqe(&self, entry: squeue::Entry) -> Result<Token> {
        let token = self.push_tagged(entry, None)?;
        self.wake()?;
        Ok(token)
    }

    /// Submit an entry and register `callback` under its token.
    ///
    /// On a full ring the call fails without side effects: no token is
    /// consumed and the continuation is not stored. On failure to wake
    /// the loop, the just-stored continuation is removed again and the
    /// wake error returned; the kernel operation may still complete and
    /// will be silently discarded.
    pub fn add_sqe_with_callback(
        &self,
        entry: squeue::Entry,
        callback: SyscallCallback,
    ) -> Result<Token> {
        self.add_sqe_recoverable(entry, callback)
            .map_err(|(err, _)| err)
    }

    /// Like [`Context::add_sqe_with_callback`], but hands the
    /// continuation back on failure so multi-step drivers can route the
    /// error into it instead of dropping it.
    pub(crate) fn add_sqe_recoverable(
        &self,
        entry: squeue::Entry,
        callback: SyscallCallback,
    ) -> std::result::Result<Token, (RingloopError, SyscallCallback)> {
        let mut slot = Some(callback);
        let pushed = self.push_tagged(entry, Some(&mut slot));
        let token = match pushed {
            Ok(token) => token,
            Err(err) => {
                let callback = slot.take().expect("callback unconsumed on push failure");
                return Err((err, callback));
            }
        };
        if let Err(err) = self.wake() {
            // Unwind: the continuation must not fire after we report
            // failure. The in-flight kernel op completes into the
            // silent-drop path.
            match self.take_callback(token) {
                Some(callback) => Err((err, callback)),
                // The loop raced us and already consumed it; the
                // operation effectively succeeded in submitting.
                None => Ok(token),
            }
        } else {
            Ok(token)
        }
    }

    /// Remove a still-pending continuation.
    ///
    /// Best effort: this only erases the registry entry. It does **not**
    /// cancel the in-flight kernel operation, whose completion will
    /// arrive and be silently discarded. Intended for unwinding a failed
    /// follow-up submission, not as a general cancellation API.
    pub fn cancel(&self, token: Token) {
        if self.take_callback(token).is_some() {
            trace!(token, "cancelled pending continuation");
        }
    }

    /// Request loop exit with a success result.
    pub fn exit(&self) -> Result<()> {
        {
            let mut exit = self.inner.exit.lock().expect("exit lock poisoned");
            exit.exiting = true;
        }
        self.wake()
    }

    /// Request loop exit carrying `error`, which [`Context::run`] will
    /// return.
    pub fn exit_with_error(&self, error: RingloopError) -> Result<()> {
        {
            let mut exit = self.inner.exit.lock().expect("exit lock poisoned");
            exit.error = Some(error);
            exit.exiting = true;
        }
        self.wake()
    }

    /// Wake the loop if it is blocked waiting for completions.
    ///
    /// A wake with no waiter is a no-op; the armed eventfd poll makes the
    /// next wait return immediately instead.
    pub fn wake(&self) -> Result<()> {
        if !self.inner.need_wake.load(Ordering::SeqCst) {
            return Ok(());
        }
        let value: u64 = 1;
        // SAFETY: waker_fd is a live eventfd and the write source is an
        // 8-byte integer on the stack.
        let written = unsafe {
            libc::write(
                self.inner.waker_fd.as_raw_fd(),
                std::ptr::addr_of!(value).cast(),
                std::mem::size_of::<u64>(),
            )
        };
        if written == -1 {
            return Err(io::Error::last_os_error().into());
        }
        trace!("woke loop");
        Ok(())
    }

    /// Run the completion loop until [`Context::exit`] is observed.
    ///
    /// Returns `Ok(())` for a plain exit, or the carried error from
    /// [`Context::exit_with_error`] / a fatal self-wake failure. The only
    /// blocking point is the ring's wait; every continuation runs on this
    /// thread, strictly sequentially, outside the registry lock.
    ///
    /// # Panics
    ///
    /// Panics if called while another `run` on the same context is still
    /// active: callback execution is single-threaded by contract.
    pub fn run(&self) -> Result<()> {
        let reentered = self.inner.running.swap(true, Ordering::AcqRel);
        assert!(!reentered, "Context::run is already active on this context");
        let result = self.run_loop();
        self.inner.running.store(false, Ordering::Release);
        result
    }

    fn run_loop(&self) -> Result<()> {
        let mut ready: Vec<(SyscallCallback, Result<i32>)> =
            Vec::with_capacity(self.inner.reap_batch);
        loop {
            if let Some(exit) = self.take_exit() {
                return exit;
            }

            // Raise the wake flag before flushing: a submission that
            // lands after this flush writes the eventfd, and the armed
            // poll turns that into a prompt wait return.
            self.inner.need_wake.store(true, Ordering::SeqCst);
            {
                let _guard = self.inner.submission.lock().expect("submission lock poisoned");
                match self.inner.ring.submit() {
                    Ok(submitted) => trace!(submitted, "flushed submissions"),
                    // Not fatal: the entries stay queued and the chained
                    // wait reports anything persistent.
                    Err(e) => debug!(error = %e, "submit failed"),
                }
            }
            let waited = self.inner.ring.submit_and_wait();
            self.inner.need_wake.store(false, Ordering::SeqCst);
            waited?;

            {
                let mut callbacks = self.inner.callbacks.lock().expect("registry lock poisoned");
                self.inner.ring.reap(self.inner.reap_batch, |token, raw| {
                    let result = if raw < 0 {
                        Err(RingloopError::Io(io::Error::from_raw_os_error(-raw)))
                    } else {
                        Ok(raw)
                    };
                    match callbacks.remove(&token) {
                        Some(callback) => ready.push((callback, result)),
                        // Cancelled or fire-and-forget; dropping is the
                        // intended behavior.
                        None => trace!(token, "completion without continuation, discarded"),
                    }
                });
            }

            // Invoke outside the lock so continuations can submit again.
            for (callback, result) in ready.drain(..) {
                callback(result);
            }
        }
    }

    /// Tag `entry` with the next token, push it, and (optionally) store
    /// the continuation — all under the submission lock, with the
    /// registry locked only for the insert.
    fn push_tagged(
        &self,
        entry: squeue::Entry,
        callback: Option<&mut Option<SyscallCallback>>,
    ) -> Result<Token> {
        let mut next = self.inner.submission.lock().expect("submission lock poisoned");
        let token = *next;
        let entry = entry.user_data(token);
        if let Some(slot) = callback {
            let mut callbacks = self.inner.callbacks.lock().expect("registry lock poisoned");
            self.inner.ring.push(&entry)?;
            let previous = callbacks.insert(
                token,
                slot.take().expect("continuation present for tokenized push"),
            );
            debug_assert!(previous.is_none(), "token reused while in flight");
        } else {
            self.inner.ring.push(&entry)?;
        }
        *next += 1;
        trace!(token, "queued submission");
        Ok(token)
    }

    fn take_callback(&self, token: Token) -> Option<SyscallCallback> {
        self.inner
            .callbacks
            .lock()
            .expect("registry lock poisoned")
            .remove(&token)
    }

    fn take_exit(&self) -> Option<Result<()>> {
        let mut exit = self.inner.exit.lock().expect("exit lock poisoned");
        if !exit.exiting {
            return None;
        }
        // Exit state is one-shot: clear the flag so a later run starts
        // clean even if exit() was requested twice before this drain.
        exit.exiting = false;
        Some(match exit.error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        })
    }

    /// Keep one poll armed on the waker eventfd. Its continuation drains
    /// the counter and re-arms itself; any failure of its own is fatal to
    /// the whole context.
    fn arm_waker(&self) -> Result<()> {
        let weak = Arc::downgrade(&self.inner);
        let fd = self.inner.waker_fd.as_raw_fd();
        syscall::poll_add(
            self,
            fd,
            libc::POLLIN as u32,
            Box::new(move |result| waker_event(&weak, result)),
        )?;
        Ok(())
    }
}

/// Continuation of the always-armed self-wake poll.
fn waker_event(weak: &Weak<Inner>, result: Result<i32>) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let ctx = Context { inner };
    if let Err(error) = result {
        let _ = ctx.exit_with_error(error);
        return;
    }
    let mut counter = [0u8; 8];
    // SAFETY: waker_fd is live and the destination is an 8-byte buffer,
    // the exact read size an eventfd requires.
    let read = unsafe {
        libc::read(
            ctx.inner.waker_fd.as_raw_fd(),
            counter.as_mut_ptr().cast(),
            counter.len(),
        )
    };
    if read == -1 {
        let _ = ctx.exit_with_error(io::Error::last_os_error().into());
        return;
    }
    if let Err(error) = ctx.arm_waker() {
        let _ = ctx.exit_with_error(error);
    }
}

fn eventfd() -> Result<OwnedFd> {
    // SAFETY: plain eventfd creation; the return value is checked before
    // being wrapped.
    let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
    if fd == -1 {
        return Err(io::Error::last_os_error().into());
    }
    // SAFETY: fd was just returned by eventfd and is owned by no one else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

static_assertions::assert_impl_all!(Context: Send, Sync);
