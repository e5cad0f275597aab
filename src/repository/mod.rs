//! Repository adapters.
//!
//! An adapter is the capability surface the engine needs from one
//! repository endpoint. All side effects stay inside that endpoint;
//! nothing reaches another endpoint except through `push`, `fetch`
//! and `delete_remote_branch`.

mod git;
mod memory;

pub use git::GitRepository;
pub use memory::MemoryRepository;

use crate::error::Result;
use crate::remote::ORIGIN;
use crate::types::{AheadBehind, CommitId, EndpointRole, MergeOutcome};
use std::collections::BTreeSet;

/// Operations the engine performs against a single endpoint.
///
/// Ref arguments accept local branch names and remote-tracking names
/// (`origin/<branch>`).
pub trait RepositoryAdapter: Send + Sync {
    /// Which endpoint this adapter drives.
    fn role(&self) -> &EndpointRole;

    /// Names of local branches.
    fn list_local_branches(&self) -> Result<BTreeSet<String>>;

    /// Remote-tracking refs, as `origin/<branch>`.
    fn list_remote_branches(&self) -> Result<BTreeSet<String>>;

    /// The checked-out branch; `DetachedOrMissing` if there is none.
    fn current_branch(&self) -> Result<String>;

    /// Head of a local branch.
    fn branch_head(&self, name: &str) -> Result<Option<CommitId>>;

    /// Whether a ref resolves to a commit.
    fn ref_exists(&self, reference: &str) -> Result<bool>;

    /// Upstream of a local branch, as `origin/<branch>`.
    fn upstream(&self, name: &str) -> Result<Option<String>>;

    /// Create `name` at `from_ref`; `AlreadyExists` on collision.
    fn create_branch(&self, name: &str, from_ref: &str) -> Result<()>;

    /// Switch to `name`; `NotFound` if it is not a local branch.
    fn checkout(&self, name: &str) -> Result<()>;

    /// Add a commit on top of `target_branch` without switching to it.
    fn commit(&self, target_branch: &str, message: &str) -> Result<CommitId>;

    /// Point an existing local branch at `head`, dropping whatever it had
    /// on top.
    fn reset_branch(&self, name: &str, head: &CommitId) -> Result<()>;

    /// Delete a local branch. Absent branches are a no-op.
    fn delete_local_branch(&self, name: &str) -> Result<()>;

    /// Delete a branch on the remote and its tracking ref. Absent branches
    /// are a no-op.
    fn delete_remote_branch(&self, name: &str) -> Result<()>;

    /// Commits only in `a`, and commits only in `b`.
    fn ahead_behind(&self, a: &str, b: &str) -> Result<AheadBehind>;

    /// Refresh remote-tracking refs, dropping those whose branch is gone.
    fn fetch(&self) -> Result<()>;

    /// Publish `branch` and record `origin/<branch>` as its upstream.
    fn push(&self, branch: &str) -> Result<()>;

    /// Publish `branch`, replacing whatever the remote has.
    fn force_push(&self, branch: &str) -> Result<()>;

    /// Fetch, then merge `origin/<branch>` into `branch`.
    fn pull(&self, branch: &str) -> Result<MergeOutcome>;

    /// Merge `from_ref` into `into`, fast-forwarding when possible.
    fn merge(&self, into: &str, from_ref: &str) -> Result<MergeOutcome>;

    /// Replay the commits of `branch` that are not on `onto` on top of it.
    fn rebase(&self, branch: &str, onto: &str) -> Result<()>;

    /// Collapse the changes of `from` into one new commit on `into`.
    fn squash_merge(&self, into: &str, from: &str, message: &str) -> Result<CommitId>;
}

/// Remote-tracking name of `branch`.
pub fn tracking_ref(branch: &str) -> String {
    format!("{}/{}", ORIGIN, branch)
}

/// Branch name behind a remote-tracking ref, if it is one.
pub fn strip_tracking(reference: &str) -> Option<&str> {
    reference
        .strip_prefix(ORIGIN)
        .and_then(|rest| rest.strip_prefix('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracking_ref_roundtrip() {
        assert_eq!(tracking_ref("feature"), "origin/feature");
        assert_eq!(strip_tracking("origin/feature"), Some("feature"));
        assert_eq!(strip_tracking("feature"), None);
        assert_eq!(strip_tracking("originals/x"), None);
    }
}
