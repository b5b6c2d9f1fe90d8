//! Thin wrapper around the kernel submission/completion ring.
//!
//! [`Ring`] owns the `io_uring` instance and narrows its surface to what
//! the completion loop needs: push one entry, flush, block for a
//! completion, drain a batch. Queue creation happens exactly once, in
//! [`Ring::new`]; the RAII handle going away tears the ring down, so
//! "initialized twice" is unrepresentable.
//!
//! Internally the submission and completion cursors are guarded by two
//! small mutexes so that [`Ring::push`] may be called from any thread
//! while the loop thread drains completions.

use std::io;
use std::sync::Mutex;

use io_uring::{squeue, IoUring};
use tracing::trace;

use crate::error::{Result, RingloopError};

/// Owning wrapper around one kernel ring pair.
pub struct Ring {
    ring: IoUring,
    /// Serializes access to the submission queue cursor.
    sq: Mutex<()>,
    /// Serializes access to the completion queue cursor.
    cq: Mutex<()>,
}

impl std::fmt::Debug for Ring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ring")
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl Ring {
    /// Create a ring with `entries` submission slots.
    pub fn new(entries: u32) -> Result<Self> {
        let ring = IoUring::new(entries)?;
        Ok(Self {
            ring,
            sq: Mutex::new(()),
            cq: Mutex::new(()),
        })
    }

    /// Number of submission slots the kernel granted.
    pub fn capacity(&self) -> usize {
        self.ring.params().sq_entries() as usize
    }

    /// Queue one submission entry.
    ///
    /// Fails with [`RingloopError::RingFull`] when every slot is
    /// occupied; nothing is queued in that case. The entry is not handed
    /// to the kernel until the next [`Ring::submit`].
    pub fn push(&self, entry: &squeue::Entry) -> Result<()> {
        let _guard = self.sq.lock().expect("submission lock poisoned");
        // SAFETY: the sq mutex guarantees this is the only live
        // SubmissionQueue handle.
        let mut sq = unsafe { self.ring.submission_shared() };
        // Pick up slots the kernel has consumed since the last sync.
        sq.sync();
        // SAFETY: callers of push guarantee the entry's buffers and
        // descriptors stay valid until its completion is reaped.
        let pushed = unsafe { sq.push(entry) };
        sq.sync();
        pushed.map_err(|_| RingloopError::RingFull)
    }

    /// Flush queued entries to the kernel, returning how many were
    /// submitted.
    ///
    /// Kernel-side failure of an individual entry is not reported here;
    /// it arrives as a negative result in that entry's completion.
    pub fn submit(&self) -> io::Result<usize> {
        self.ring.submit()
    }

    /// Block until at least one completion is ready.
    ///
    /// Also flushes any still-queued entries, so a submission raced in
    /// just before the wait is not stranded.
    pub fn submit_and_wait(&self) -> io::Result<()> {
        self.ring.submit_and_wait(1)?;
        Ok(())
    }

    /// Drain up to `max` ready completions, invoking `f` with each
    /// entry's user data and raw result.
    ///
    /// Every drained entry is marked seen exactly once when the cursor
    /// is synced; the kernel may then reuse its slot.
    pub fn reap<F>(&self, max: usize, mut f: F) -> usize
    where
        F: FnMut(u64, i32),
    {
        let _guard = self.cq.lock().expect("completion lock poisoned");
        // SAFETY: the cq mutex guarantees this is the only live
        // CompletionQueue handle.
        let mut cq = unsafe { self.ring.completion_shared() };
        cq.sync();
        let mut drained = 0;
        while drained < max {
            let Some(cqe) = cq.next() else { break };
            f(cqe.user_data(), cqe.result());
            drained += 1;
        }
        cq.sync();
        trace!(drained, "reaped completions");
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use io_uring::opcode;

    #[test]
    fn create_and_capacity() {
        let ring = Ring::new(8).expect("ring creation");
        assert!(ring.capacity() >= 8);
    }

    #[test]
    fn nop_round_trip() {
        let ring = Ring::new(8).expect("ring creation");
        let entry = opcode::Nop::new().build().user_data(7);
        ring.push(&entry).expect("push nop");
        ring.submit_and_wait().expect("submit and wait");

        let mut seen = Vec::new();
        ring.reap(8, |token, result| seen.push((token, result)));
        assert_eq!(seen, vec![(7, 0)]);
    }

    #[test]
    fn push_past_capacity_reports_ring_full() {
        let ring = Ring::new(4).expect("ring creation");
        let capacity = ring.capacity();

        let mut pushed = 0;
        loop {
            let entry = opcode::Nop::new().build().user_data(pushed);
            match ring.push(&entry) {
                Ok(()) => pushed += 1,
                Err(RingloopError::RingFull) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
            assert!(pushed <= capacity as u64 + 1, "never saw RingFull");
        }
        assert_eq!(pushed, capacity as u64);
    }

    #[test]
    fn reap_respects_batch_limit() {
        let ring = Ring::new(8).expect("ring creation");
        for token in 0..4u64 {
            let entry = opcode::Nop::new().build().user_data(token);
            ring.push(&entry).expect("push nop");
        }
        ring.submit_and_wait().expect("submit and wait");

        let mut first = 0;
        ring.reap(2, |_, _| first += 1);
        assert_eq!(first, 2);

        // Remaining completions are still there for the next drain.
        let mut rest = 0;
        while rest < 2 {
            rest += ring.reap(8, |_, _| {});
        }
        assert_eq!(rest, 2);
    }
}
