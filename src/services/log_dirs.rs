//! Log file locations
//!
//! Each supervisor instance logs to a PID-based file so concurrent
//! sessions never interleave their diagnostics.

use std::path::PathBuf;

/// Default path of this process's log file.
pub fn default_log_path() -> PathBuf {
    std::env::temp_dir().join(format!("witness-{}.log", std::process::id()))
}
