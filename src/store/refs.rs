//! branch and reference management.
//!
//! the catalog writes only to `main`. Updates go through a compare-and-swap
//! so a commit built on a stale head never lands.

use git2::{ErrorCode, Repository};

use crate::store::error::{StorageError, StorageResult};
use crate::store::types::{BranchName, CommitId};

pub struct RefManager;

impl RefManager {
    /// resolve a branch name to its current commit
    pub fn resolve_branch(repo: &Repository, branch: &BranchName) -> StorageResult<CommitId> {
        let reference = repo
            .find_reference(&branch.as_ref_path())
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;

        let commit = reference
            .peel_to_commit()
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;

        Ok(CommitId::new(commit.id()))
    }

    pub fn branch_exists(repo: &Repository, branch: &BranchName) -> bool {
        repo.find_reference(&branch.as_ref_path()).is_ok()
    }

    pub fn create_branch(repo: &Repository, branch: &BranchName, target: CommitId) -> StorageResult<()> {
        if Self::branch_exists(repo, branch) {
            return Err(StorageError::BranchAlreadyExists(branch.to_string()));
        }

        let commit = repo.find_commit(target.raw())?;
        repo.branch(branch.as_str(), &commit, false)?;

        Ok(())
    }

    /// move a branch only if it still points at `expected`.
    ///
    /// the check and the move are a single ref transaction in libgit2.
    pub fn update_branch_if_unchanged(
        repo: &Repository,
        branch: &BranchName,
        expected: CommitId,
        new_target: CommitId,
    ) -> StorageResult<()> {
        if !Self::branch_exists(repo, branch) {
            return Err(StorageError::RefNotFound(branch.to_string()));
        }

        let log_message = format!("update branch to {}", new_target.short());
        match repo.reference_matching(
            &branch.as_ref_path(),
            new_target.raw(),
            true,
            expected.raw(),
            &log_message,
        ) {
            Ok(_) => Ok(()),
            Err(e) if e.code() == ErrorCode::Modified => Err(StorageError::BranchMoved {
                branch: branch.to_string(),
            }),
            Err(e) => Err(StorageError::Git(e)),
        }
    }

    /// create `main` at the initial commit and point HEAD at it
    pub fn init_main_branch(repo: &Repository, initial_commit: CommitId) -> StorageResult<()> {
        let main = BranchName::main();

        if !Self::branch_exists(repo, &main) {
            Self::create_branch(repo, &main, initial_commit)?;
        }

        repo.set_head(&main.as_ref_path())?;
        Ok(())
    }
}
