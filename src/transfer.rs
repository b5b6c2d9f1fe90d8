//! Completion conditions for multi-step transfers.
//!
//! A condition decides, from the buffer size and the bytes moved so far,
//! how many more bytes a transfer loop should request; zero means the
//! transfer is satisfied. EOF and errors terminate loops regardless of
//! the condition.

/// Policy deciding when a transfer loop stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionCondition {
    /// Keep going until the whole buffer has been transferred.
    All,
    /// Stop as soon as at least this many bytes have been transferred.
    AtLeast(usize),
    /// Stop once exactly this many bytes have been transferred; never
    /// request past the target.
    Exactly(usize),
}

/// Transfer until the buffer is exhausted.
pub fn transfer_all() -> CompletionCondition {
    CompletionCondition::All
}

/// Transfer until at least `n` bytes have moved (or the buffer is full).
pub fn transfer_at_least(n: usize) -> CompletionCondition {
    CompletionCondition::AtLeast(n)
}

/// Transfer exactly `n` bytes (or until the buffer is full, if smaller).
pub fn transfer_exactly(n: usize) -> CompletionCondition {
    CompletionCondition::Exactly(n)
}

impl CompletionCondition {
    /// Bytes the loop should still request, given the total buffer size
    /// and the bytes transferred so far. Zero means done.
    pub fn remaining(self, total: usize, done: usize) -> usize {
        match self {
            CompletionCondition::All => total.saturating_sub(done),
            CompletionCondition::AtLeast(n) => {
                if done < n.min(total) {
                    total - done
                } else {
                    0
                }
            }
            CompletionCondition::Exactly(n) => n.min(total).saturating_sub(done),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_all_requests_the_rest() {
        let cond = transfer_all();
        assert_eq!(cond.remaining(10, 0), 10);
        assert_eq!(cond.remaining(10, 4), 6);
        assert_eq!(cond.remaining(10, 10), 0);
    }

    #[test]
    fn at_least_stops_at_threshold() {
        let cond = transfer_at_least(4);
        assert_eq!(cond.remaining(10, 0), 10);
        assert_eq!(cond.remaining(10, 3), 7);
        assert_eq!(cond.remaining(10, 4), 0);
        assert_eq!(cond.remaining(10, 9), 0);
    }

    #[test]
    fn at_least_clamped_by_buffer() {
        // Threshold beyond the buffer: a full buffer satisfies it.
        let cond = transfer_at_least(20);
        assert_eq!(cond.remaining(10, 9), 1);
        assert_eq!(cond.remaining(10, 10), 0);
    }

    #[test]
    fn exactly_never_overshoots() {
        let cond = transfer_exactly(4);
        assert_eq!(cond.remaining(10, 0), 4);
        assert_eq!(cond.remaining(10, 3), 1);
        assert_eq!(cond.remaining(10, 4), 0);
    }

    #[test]
    fn exactly_clamped_by_buffer() {
        let cond = transfer_exactly(20);
        assert_eq!(cond.remaining(10, 0), 10);
        assert_eq!(cond.remaining(10, 10), 0);
    }
}
