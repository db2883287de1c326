// Session supervisor library - exposes all core modules for testing

pub mod classify;
pub mod config;
pub mod services;
pub mod snapshot;
pub mod supervisor;
