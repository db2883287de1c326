//! Tracing subscriber setup
//!
//! All diagnostics go to a file: the supervisor shares its stdout with the
//! supervised shell, so a log line on the terminal would corrupt the
//! session it is recording.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber with file logging.
///
/// Filtering follows `RUST_LOG` with an INFO default. Returns false if the
/// log file could not be created; the supervisor then runs unlogged rather
/// than refusing to start.
pub fn init_global(log_file_path: &Path) -> bool {
    let Ok(log_file) = File::create(log_file_path) else {
        return false;
    };

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let fmt_layer = fmt::layer().with_ansi(false).with_writer(Arc::new(log_file));

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();
    true
}
