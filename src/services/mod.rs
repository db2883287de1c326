//! Process-level services: logging, terminal state, and signal handling.

pub mod log_dirs;
pub mod signal_handler;
pub mod terminal_modes;
pub mod tracing_setup;
