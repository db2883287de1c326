//! Error classification over raw session output.

use regex::bytes::RegexSet;

/// Decides whether a chunk of session output denotes an error condition.
///
/// Implementations must be pure per chunk: the same bytes always yield the
/// same answer. Failures inside a classifier are swallowed as "no error"
/// (fail-open), so a broken pattern set can never stall session I/O.
pub trait Classifier {
    fn classify(&self, chunk: &[u8]) -> bool;
}

/// Pattern-based classifier over the raw byte stream.
///
/// Works on bytes rather than text so chunks that split multi-byte
/// characters or carry escape sequences still classify correctly.
pub struct PatternClassifier {
    set: RegexSet,
}

impl PatternClassifier {
    /// Build a classifier from the configured patterns.
    ///
    /// An invalid pattern set degrades to a classifier that never matches
    /// rather than refusing to start the session.
    pub fn new(patterns: &[String]) -> Self {
        let set = match RegexSet::new(patterns) {
            Ok(set) => set,
            Err(err) => {
                tracing::error!("Invalid classifier patterns, disabling classification: {}", err);
                RegexSet::empty()
            }
        };
        Self { set }
    }
}

impl Classifier for PatternClassifier {
    fn classify(&self, chunk: &[u8]) -> bool {
        !self.set.is_empty() && self.set.is_match(chunk)
    }
}
