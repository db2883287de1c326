//! Window-change signal handling.
//!
//! `SIGWINCH` only sets a flag; the session loop picks it up on its next
//! wakeup and pushes the new dimensions into both ptys. The handler is
//! installed without `SA_RESTART` so a pending resize interrupts the
//! loop's poll instead of waiting for the next byte of traffic.

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicBool, Ordering};

static SIGWINCH_RECEIVED: AtomicBool = AtomicBool::new(false);

extern "C" fn sigwinch_handler(_: libc::c_int) {
    SIGWINCH_RECEIVED.store(true, Ordering::Release);
}

/// Install the `SIGWINCH` handler.
pub fn install_resize_handler() {
    let handler = SigHandler::Handler(sigwinch_handler);
    let action = SigAction::new(handler, SaFlags::empty(), SigSet::empty());

    unsafe {
        if let Err(err) = sigaction(Signal::SIGWINCH, &action) {
            tracing::error!("Failed to set SIGWINCH handler: {}", err);
        }
    }
}

/// Consume a pending resize notification, if any.
pub fn take_pending_resize() -> bool {
    SIGWINCH_RECEIVED.swap(false, Ordering::AcqRel)
}
