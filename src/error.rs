//! Error types shared by the ring, the context, and the I/O facades.
//!
//! The taxonomy is deliberately small. Kernel failures (a negative CQE
//! result or a `-1`-returning syscall) are carried as [`std::io::Error`]
//! with the raw errno preserved. A full submission queue is its own
//! variant so callers can distinguish back-pressure from real I/O
//! failure. Precondition violations (re-entering [`crate::Context::run`],
//! for example) panic rather than return: they are programming errors,
//! not runtime conditions.

use std::io;

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RingloopError>;

/// Error type for ring and context operations.
#[derive(Debug, Error)]
pub enum RingloopError {
    /// The submission queue has no free slot.
    ///
    /// Returned by [`crate::Context::add_sqe`] when the ring is at
    /// capacity. Nothing was submitted and no continuation was stored;
    /// the caller must back off and retry. There is no queuing beyond
    /// the ring's own capacity.
    #[error("submission queue full")]
    RingFull,

    /// An underlying system call failed.
    ///
    /// Wraps the raw OS error, whether it came from a negative CQE
    /// result, a failed `io_uring_enter`, or a plain blocking syscall.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RingloopError {
    /// Flatten into an [`io::Error`], mapping [`RingloopError::RingFull`]
    /// to `ENOBUFS` so the error survives channels that only carry OS
    /// errors.
    pub fn into_io(self) -> io::Error {
        match self {
            RingloopError::RingFull => io::Error::from_raw_os_error(libc::ENOBUFS),
            RingloopError::Io(e) => e,
        }
    }

    /// The raw OS error code, if one is attached.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            RingloopError::RingFull => Some(libc::ENOBUFS),
            RingloopError::Io(e) => e.raw_os_error(),
        }
    }
}

// Continuations and carried exit errors cross thread boundaries.
static_assertions::assert_impl_all!(RingloopError: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn ring_full_message() {
        let error = RingloopError::RingFull;
        assert_eq!(error.to_string(), "submission queue full");
    }

    #[test]
    fn io_error_conversion_preserves_kind() {
        let io_error = IoError::new(ErrorKind::PermissionDenied, "denied");
        let error = RingloopError::from(io_error);

        let RingloopError::Io(ref e) = error else {
            panic!("expected Io variant");
        };
        assert_eq!(e.kind(), ErrorKind::PermissionDenied);
        assert!(error.to_string().contains("I/O error"));
    }

    #[test]
    fn ring_full_flattens_to_enobufs() {
        let io = RingloopError::RingFull.into_io();
        assert_eq!(io.raw_os_error(), Some(libc::ENOBUFS));
    }

    #[test]
    fn raw_os_error_round_trip() {
        let error = RingloopError::from(IoError::from_raw_os_error(libc::EBADF));
        assert_eq!(error.raw_os_error(), Some(libc::EBADF));
    }

    #[test]
    fn source_is_preserved() {
        let io_error = IoError::new(ErrorKind::NotFound, "missing");
        let error = RingloopError::from(io_error);

        let source = error.source().expect("Io variant has a source");
        let io = source.downcast_ref::<IoError>().expect("io::Error source");
        assert_eq!(io.kind(), ErrorKind::NotFound);
    }
}
