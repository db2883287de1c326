//! Versioned error snapshots.
//!
//! Every detected error becomes one commit on a dedicated error branch.
//! The branch is created from the primary branch's head on first use and
//! then only ever advances linearly: each new commit's sole parent is the
//! branch's previous head, so the branch reads as a time-ordered record of
//! error occurrences.

mod git;

pub use git::GitSnapshotStore;

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

use crate::config::SnapshotConfig;

/// A commit identifier in the underlying store (hex object id for git).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRef(pub String);

impl fmt::Display for CommitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tree (directory content) identifier in the underlying store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeRef(pub String);

impl fmt::Display for TreeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("no repository found from {path}: {source}")]
    Discover {
        path: PathBuf,
        source: git2::Error,
    },

    #[error("branch '{name}': {source}")]
    Branch {
        name: String,
        source: git2::Error,
    },

    #[error("snapshotting the working directory: {0}")]
    Tree(git2::Error),

    #[error("creating commit on '{branch}': {source}")]
    Commit {
        branch: String,
        source: git2::Error,
    },
}

/// Minimal versioned-storage operations the supervisor needs.
///
/// `NotFound` is not an error for branch resolution: it is the signal that
/// the error branch has not been created yet.
pub trait SnapshotStore {
    fn resolve_branch(&self, name: &str) -> Result<Option<CommitRef>, SnapshotError>;

    /// Create `name` pointing at the head of `from`, returning the head.
    fn create_branch(&mut self, name: &str, from: &str) -> Result<CommitRef, SnapshotError>;

    /// Stage the current working directory and write it as a tree object.
    fn snapshot_working_directory(&mut self) -> Result<TreeRef, SnapshotError>;

    /// Create a commit with a single parent and advance `branch` to it.
    fn create_commit(
        &mut self,
        branch: &str,
        parent: &CommitRef,
        tree: &TreeRef,
        message: &str,
    ) -> Result<CommitRef, SnapshotError>;
}

/// Drive one full snapshot: ensure the error branch exists, capture the
/// working directory, and append a commit to the branch.
pub fn record_snapshot(
    store: &mut dyn SnapshotStore,
    config: &SnapshotConfig,
    message: &str,
) -> Result<CommitRef, SnapshotError> {
    let parent = match store.resolve_branch(&config.error_branch)? {
        Some(head) => head,
        None => {
            info!(
                branch = %config.error_branch,
                from = %config.primary_branch,
                "error branch does not exist yet, creating it"
            );
            store.create_branch(&config.error_branch, &config.primary_branch)?
        }
    };
    let tree = store.snapshot_working_directory()?;
    store.create_commit(&config.error_branch, &parent, &tree, message)
}
