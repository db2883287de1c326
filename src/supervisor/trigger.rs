//! The error trigger: where classified output becomes a snapshot.

use tracing::{info, warn};

use crate::classify::Classifier;
use crate::config::SnapshotConfig;
use crate::snapshot::{record_snapshot, SnapshotStore};

/// Consumes output chunks from the session loop; for each chunk the
/// classifier marks as an error, drives exactly one snapshot attempt.
///
/// The snapshot runs synchronously so the working directory is captured as
/// close as possible to the moment of detection, before further session
/// activity can mutate it. No de-duplication: a burst of matching chunks
/// produces a burst of commits.
pub struct ErrorTrigger<'a> {
    classifier: &'a dyn Classifier,
    store: &'a mut dyn SnapshotStore,
    config: SnapshotConfig,
}

impl<'a> ErrorTrigger<'a> {
    pub fn new(
        classifier: &'a dyn Classifier,
        store: &'a mut dyn SnapshotStore,
        config: SnapshotConfig,
    ) -> Self {
        Self {
            classifier,
            store,
            config,
        }
    }

    /// Classify one chunk and, on a positive result, record a snapshot.
    ///
    /// A failed snapshot is logged and swallowed: the audit trail is
    /// "at least attempted", never a reason to end an interactive session.
    pub fn on_chunk(&mut self, chunk: &[u8]) {
        if !self.classifier.classify(chunk) {
            return;
        }

        let message = compose_message(&self.config.message, chunk);
        match record_snapshot(&mut *self.store, &self.config, &message) {
            Ok(commit) => {
                info!(
                    branch = %self.config.error_branch,
                    %commit,
                    "error snapshot recorded"
                );
            }
            Err(err) => {
                warn!(error = %err, "error snapshot failed, session continues");
            }
        }
    }
}

/// Commit message: the configured first line, then the triggering chunk.
fn compose_message(prefix: &str, chunk: &[u8]) -> String {
    let text = String::from_utf8_lossy(chunk);
    let text = text.trim();
    if text.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}\n\n{text}\n")
    }
}
