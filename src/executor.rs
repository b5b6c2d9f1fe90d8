//! Minimal inline-polling task executor.
//!
//! Tasks are polled on the thread that wakes them, which with this
//! crate's futures is the loop thread invoking a continuation. There is
//! no run queue and no worker threads; a wake either polls the task
//! right there or, if the task is already mid-poll on another frame,
//! sets a flag the active poll loop observes before finishing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Context;

use futures::future::BoxFuture;
use futures::task::{waker_ref, ArcWake};

struct Task {
    /// `None` once the future has completed.
    future: Mutex<Option<BoxFuture<'static, ()>>>,
    /// Set by wakes that arrive while a poll is in progress.
    repoll: AtomicBool,
}

impl ArcWake for Task {
    fn wake_by_ref(task: &Arc<Self>) {
        poll_task(task);
    }
}

fn poll_task(task: &Arc<Task>) {
    task.repoll.store(true, Ordering::SeqCst);
    loop {
        {
            let mut guard = match task.future.try_lock() {
                Ok(guard) => guard,
                // Another frame is polling; it will see the flag.
                Err(_) => return,
            };
            while task.repoll.swap(false, Ordering::SeqCst) {
                let Some(future) = guard.as_mut() else {
                    return;
                };
                let waker = waker_ref(task);
                let mut cx = Context::from_waker(&waker);
                if future.as_mut().poll(&mut cx).is_ready() {
                    *guard = None;
                    return;
                }
            }
        }
        // A wake may have landed between the last flag check and the
        // lock release; it would have failed try_lock, so re-check.
        if !task.repoll.load(Ordering::SeqCst) {
            return;
        }
    }
}

/// Handle to a spawned task's output.
pub struct JoinHandle<T> {
    out: Arc<Mutex<Option<T>>>,
}

impl<T> JoinHandle<T> {
    /// Take the output if the task has finished.
    pub fn try_take(&self) -> Option<T> {
        self.out.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Spawn a task, polling it once immediately on the current thread.
///
/// Progress after the first poll comes entirely from wakes, so a task
/// that awaits ring operations advances whenever the loop runs its
/// continuations. The output is retrieved with
/// [`JoinHandle::try_take`] after the loop exits.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    let out = Arc::new(Mutex::new(None));
    let slot = out.clone();
    let wrapped = async move {
        let value = future.await;
        if let Ok(mut slot) = slot.lock() {
            *slot = Some(value);
        }
    };
    let task = Arc::new(Task {
        future: Mutex::new(Some(Box::pin(wrapped))),
        repoll: AtomicBool::new(false),
    });
    poll_task(&task);
    JoinHandle { out }
}
