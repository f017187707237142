//! Self-pipe-style interrupt flag (spec §5, §9 "signal-driven blocking
//! I/O"): `SIGINT` sets an atomic flag from the handler rather than
//! unwinding directly, so the recv loop and `wait` polling loop can observe
//! and absorb it at a safe point. `SIGURG` (the queue doorbell) is never
//! touched here — masking it would make the transport unresponsive.

use nix::sys::signal::{self, SigHandler, Signal};
use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Install the handler. Call once from `main`.
pub fn install() -> nix::Result<()> {
    unsafe { signal::signal(Signal::SIGINT, SigHandler::Handler(on_sigint)) }?;
    Ok(())
}

/// Read and clear the interrupt flag.
pub fn take() -> bool {
    INTERRUPTED.swap(false, Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_reads_and_clears_the_flag() {
        INTERRUPTED.store(true, Ordering::SeqCst);
        assert!(take());
        assert!(!take());
    }
}
