//! Context configuration.

/// Tunables for a [`crate::Context`].
///
/// The defaults match the kernel-shared queue sizing the crate was
/// developed against: 1024 submission slots, with completions drained in
/// batches of the same size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingConfig {
    /// Number of submission queue entries. Rounded up to a power of two
    /// by the kernel.
    pub entries: u32,
    /// Maximum completions drained per loop iteration.
    pub reap_batch: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            entries: 1024,
            reap_batch: 1024,
        }
    }
}

impl RingConfig {
    /// Configuration with a specific submission queue depth.
    pub fn with_entries(entries: u32) -> Self {
        Self {
            entries,
            reap_batch: entries as usize,
        }
    }
}
