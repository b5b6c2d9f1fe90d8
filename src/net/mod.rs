//! Socket interface layer.

use std::io;

use crate::error::Result;

pub mod tcp;

/// Set the process-wide SIGPIPE disposition to ignore.
///
/// Writes to a socket whose peer has closed then fail with `EPIPE`
/// through the normal result channel instead of killing the process.
/// Call once during startup, before spawning threads; the disposition
/// is global and this helper does not restore the previous one.
pub fn ignore_sigpipe() -> Result<()> {
    // SAFETY: SIG_IGN carries no handler to race with; changing the
    // disposition is an atomic kernel-side update.
    let prev = unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN) };
    if prev == libc::SIG_ERR {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}
