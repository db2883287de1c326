//! Append-only session transcript.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// File sink receiving every output byte that flows through the session
/// loop, in arrival order.
///
/// The transcript is best-effort: once the session is running, a write
/// failure here must never abort interactive use. Failures are logged on
/// first occurrence only, then writes keep being attempted quietly.
pub struct Transcript {
    file: File,
    path: PathBuf,
    degraded: bool,
}

impl Transcript {
    /// Open the transcript file write-truncate. Failing here is fatal to
    /// startup, unlike writes later on.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            degraded: false,
        })
    }

    pub fn append(&mut self, chunk: &[u8]) {
        if let Err(err) = self.file.write_all(chunk) {
            if !self.degraded {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "transcript write failed, transcript is best-effort"
                );
                self.degraded = true;
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
