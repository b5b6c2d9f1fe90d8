//! Descriptor transfer facades.
//!
//! The same six operations (`read`, `write`, their `_some` single-shot
//! forms, and the buffer-sequence variants) in three calling styles:
//!
//! - [`blocking`]: plain syscalls looped in place, no ring or loop
//!   involved.
//! - [`callback`]: ring submissions whose continuations drive a
//!   transfer state machine; the caller's callback fires from the loop.
//! - [`future`]: the callback facade lifted into `async`.
//!
//! All three share the completion-condition vocabulary from
//! [`crate::transfer`] and the descriptor model from [`crate::fd`].

pub mod blocking;
pub mod callback;
pub mod future;
