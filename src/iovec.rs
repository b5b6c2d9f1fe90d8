//! Scatter/gather scratch arrays.
//!
//! Transfer drivers keep an iovec array alongside the buffers it points
//! into, both inside the operation's heap-held state, so the pointers
//! stay valid for as long as the kernel may dereference them.

/// An iovec array owned by an in-flight operation.
///
/// The raw pointers reference buffers held in the same operation state;
/// the state is moved only by `Box`, so the pointees never move while an
/// operation is in flight.
#[derive(Debug, Default)]
pub(crate) struct IoVecs(Vec<libc::iovec>);

// SAFETY: the pointers target buffers owned by the same (Send) operation
// state, which is only ever accessed by one continuation at a time.
unsafe impl Send for IoVecs {}

impl IoVecs {
    pub(crate) fn as_ptr(&self) -> *const libc::iovec {
        self.0.as_ptr()
    }

    pub(crate) fn as_slice(&self) -> &[libc::iovec] {
        &self.0
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    /// Rebuild the array to cover `want` bytes of `bufs`, skipping the
    /// first `done` bytes. Fully consumed buffers are dropped from the
    /// front; the first partial buffer starts mid-way.
    pub(crate) fn fill(&mut self, bufs: &[Vec<u8>], done: usize, want: usize) {
        self.0.clear();
        let mut skip = done;
        let mut take = want;
        for buf in bufs {
            if take == 0 {
                break;
            }
            if skip >= buf.len() {
                skip -= buf.len();
                continue;
            }
            let len = (buf.len() - skip).min(take);
            self.0.push(libc::iovec {
                iov_base: buf[skip..].as_ptr() as *mut libc::c_void,
                iov_len: len,
            });
            take -= len;
            skip = 0;
        }
    }
}

/// Total byte length of a buffer sequence.
pub(crate) fn total_len(bufs: &[Vec<u8>]) -> usize {
    bufs.iter().map(Vec::len).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lens(iov: &IoVecs) -> Vec<usize> {
        iov.0.iter().map(|v| v.iov_len).collect()
    }

    #[test]
    fn covers_whole_sequence() {
        let bufs = vec![b"hello".to_vec(), b" ".to_vec(), b"world".to_vec()];
        let mut iov = IoVecs::default();
        iov.fill(&bufs, 0, total_len(&bufs));
        assert_eq!(lens(&iov), vec![5, 1, 5]);
    }

    #[test]
    fn skips_consumed_prefix() {
        let bufs = vec![b"hello".to_vec(), b" ".to_vec(), b"world".to_vec()];
        let mut iov = IoVecs::default();
        // 6 bytes done: "hello" and " " fully consumed.
        iov.fill(&bufs, 6, 5);
        assert_eq!(lens(&iov), vec![5]);
    }

    #[test]
    fn splits_partial_buffer() {
        let bufs = vec![b"hello".to_vec(), b"world".to_vec()];
        let mut iov = IoVecs::default();
        iov.fill(&bufs, 3, 7);
        assert_eq!(lens(&iov), vec![2, 5]);
        // The partial entry points past the consumed bytes.
        let first = iov.0[0].iov_base as *const u8;
        assert_eq!(first, bufs[0][3..].as_ptr());
    }

    #[test]
    fn clamps_to_want() {
        let bufs = vec![b"hello".to_vec(), b"world".to_vec()];
        let mut iov = IoVecs::default();
        iov.fill(&bufs, 0, 7);
        assert_eq!(lens(&iov), vec![5, 2]);
    }

    #[test]
    fn total_len_sums() {
        let bufs = vec![vec![0u8; 3], vec![0u8; 4]];
        assert_eq!(total_len(&bufs), 7);
    }
}
