//! Single-threaded asynchronous I/O over io_uring.
//!
//! The crate is a proactor: callers submit kernel operations, a loop
//! demultiplexes completions by an opaque per-submission token, and
//! registered continuations run on the loop thread. On top of that one
//! protocol sit three interchangeable transfer facades (blocking,
//! callback, and future based) plus a TCP acceptor/connector layer.
//!
//! # Architecture
//!
//! - [`Context`] owns the ring, the token-keyed continuation registry,
//!   and an always-armed eventfd poll that lets other threads wake the
//!   loop. [`Context::run`] blocks until [`Context::exit`].
//! - [`syscall`] exposes tokenized single submissions; [`io`] builds
//!   the condition-driven transfer loops over them; [`net::tcp`] adds
//!   accept and connect.
//! - [`executor::spawn`] drives the future facade from the loop thread
//!   without any external runtime.
//!
//! # Example
//!
//! ```no_run
//! use ringloop::{transfer::transfer_all, Context, Fd};
//!
//! # fn main() -> ringloop::Result<()> {
//! let ctx = Context::new()?;
//! let fd = Fd::memfd("scratch")?;
//!
//! let ctx2 = ctx.clone();
//! ringloop::io::callback::write(&ctx, &fd, b"hi".to_vec(), transfer_all(), move |result, _buf| {
//!     result.unwrap();
//!     ctx2.exit().unwrap();
//! });
//! ctx.run()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Threading
//!
//! Continuations run strictly sequentially on the thread inside
//! [`Context::run`]. Submission, cancellation, and exit are safe from
//! any thread; a submission from outside the loop thread wakes the
//! loop through the eventfd.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, rust_2018_idioms)]

mod config;
mod context;
mod error;
pub mod executor;
mod fd;
pub mod io;
mod iovec;
pub mod net;
mod op;
mod ring;
pub mod syscall;
pub mod transfer;

pub use config::RingConfig;
pub use context::{Context, SyscallCallback, Token};
pub use error::{Result, RingloopError};
pub use fd::Fd;
pub use io::future::OpFuture;
pub use transfer::{transfer_all, transfer_at_least, transfer_exactly, CompletionCondition};
