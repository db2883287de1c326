//! Terminal mode management
//!
//! The supervisor owns the controlling terminal for the session's lifetime.
//! Raw mode hands every keystroke to the supervised shell unmodified; the
//! shell's own pty runs the line discipline instead. The previous state is
//! restored on drop and, via `emergency_cleanup`, from the panic hook.

use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::{stdout, Write};

/// Tracks whether raw mode was enabled and restores it on `undo`.
#[derive(Debug, Default)]
pub struct TerminalModes {
    raw_mode: bool,
}

impl TerminalModes {
    /// Enable raw mode.
    ///
    /// Failure is non-fatal: the session still runs, with the terminal's
    /// own line discipline in front of it.
    pub fn enable() -> Self {
        match enable_raw_mode() {
            Ok(()) => {
                tracing::debug!("Enabled raw mode");
                Self { raw_mode: true }
            }
            Err(err) => {
                tracing::warn!("Failed to enable raw mode, continuing in line mode: {}", err);
                Self { raw_mode: false }
            }
        }
    }

    /// Restore the terminal to its original state.
    ///
    /// Safe to call multiple times - only undoes what was enabled.
    pub fn undo(&mut self) {
        if self.raw_mode {
            let _ = disable_raw_mode();
            self.raw_mode = false;
            tracing::debug!("Disabled raw mode");
        }
        let _ = stdout().flush();
    }

    pub fn raw_mode_enabled(&self) -> bool {
        self.raw_mode
    }
}

impl Drop for TerminalModes {
    fn drop(&mut self) {
        self.undo();
    }
}

/// Unconditionally restore terminal state without tracking.
///
/// Intended for panic hooks, where the `TerminalModes` instance is out of
/// reach.
pub fn emergency_cleanup() {
    let _ = disable_raw_mode();
    let _ = stdout().flush();
}
