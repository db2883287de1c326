//! Git-backed snapshot store (libgit2 via the `git2` crate).

use git2::{BranchType, ErrorCode, IndexAddOption, Oid, Repository};
use std::path::PathBuf;

use super::{CommitRef, SnapshotError, SnapshotStore, TreeRef};

pub struct GitSnapshotStore {
    workdir: PathBuf,
}

impl GitSnapshotStore {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Discover the repository per call rather than caching a handle, so a
    /// repository initialized while the session is already running is still
    /// picked up.
    fn repo(&self) -> Result<Repository, SnapshotError> {
        Repository::discover(&self.workdir).map_err(|source| SnapshotError::Discover {
            path: self.workdir.clone(),
            source,
        })
    }

    fn branch_head(repo: &Repository, name: &str) -> Result<Option<CommitRef>, SnapshotError> {
        match repo.find_branch(name, BranchType::Local) {
            Ok(branch) => {
                let commit =
                    branch
                        .get()
                        .peel_to_commit()
                        .map_err(|source| SnapshotError::Branch {
                            name: name.to_string(),
                            source,
                        })?;
                Ok(Some(CommitRef(commit.id().to_string())))
            }
            Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
            Err(source) => Err(SnapshotError::Branch {
                name: name.to_string(),
                source,
            }),
        }
    }
}

impl SnapshotStore for GitSnapshotStore {
    fn resolve_branch(&self, name: &str) -> Result<Option<CommitRef>, SnapshotError> {
        let repo = self.repo()?;
        Self::branch_head(&repo, name)
    }

    fn create_branch(&mut self, name: &str, from: &str) -> Result<CommitRef, SnapshotError> {
        let repo = self.repo()?;
        let target = repo
            .find_branch(from, BranchType::Local)
            .and_then(|branch| branch.get().peel_to_commit())
            .map_err(|source| SnapshotError::Branch {
                name: from.to_string(),
                source,
            })?;
        repo.branch(name, &target, false)
            .map_err(|source| SnapshotError::Branch {
                name: name.to_string(),
                source,
            })?;
        Ok(CommitRef(target.id().to_string()))
    }

    fn snapshot_working_directory(&mut self) -> Result<TreeRef, SnapshotError> {
        let repo = self.repo()?;
        let mut index = repo.index().map_err(SnapshotError::Tree)?;
        index
            .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
            .map_err(SnapshotError::Tree)?;
        index.write().map_err(SnapshotError::Tree)?;
        let tree_oid = index.write_tree().map_err(SnapshotError::Tree)?;
        Ok(TreeRef(tree_oid.to_string()))
    }

    fn create_commit(
        &mut self,
        branch: &str,
        parent: &CommitRef,
        tree: &TreeRef,
        message: &str,
    ) -> Result<CommitRef, SnapshotError> {
        let repo = self.repo()?;
        let commit_err = |source| SnapshotError::Commit {
            branch: branch.to_string(),
            source,
        };

        let tree_oid = Oid::from_str(&tree.0).map_err(commit_err)?;
        let tree = repo.find_tree(tree_oid).map_err(commit_err)?;
        let parent_oid = Oid::from_str(&parent.0).map_err(commit_err)?;
        let parent = repo.find_commit(parent_oid).map_err(commit_err)?;
        let sig = repo.signature().map_err(commit_err)?;

        // Committing through the branch ref advances it to the new commit.
        let refname = format!("refs/heads/{branch}");
        let oid = repo
            .commit(Some(&refname), &sig, &sig, message, &tree, &[&parent])
            .map_err(commit_err)?;
        Ok(CommitRef(oid.to_string()))
    }
}
