//! Divergence between branches and their counterparts.
//!
//! A branch has up to two counterparts: its remote-tracking ref, and (for
//! feature branches) the main branch. A branch is synchronized only when
//! it is even with every counterpart that applies to it.

use crate::classifier::BranchClassifier;
use crate::error::Result;
use crate::repository::{tracking_ref, RepositoryAdapter};
use crate::types::{BranchKind, SyncStatus};
use serde::Serialize;

/// Divergence of one local branch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BranchDivergence {
    pub branch: String,
    pub kind: BranchKind,

    /// Against `origin/<branch>`.
    pub remote: SyncStatus,

    /// Against main; only computed for feature branches.
    pub main: Option<SyncStatus>,
}

impl BranchDivergence {
    pub fn is_in_sync(&self) -> bool {
        self.remote.is_in_sync() && self.main.map_or(true, SyncStatus::is_in_sync)
    }
}

/// Computes sync status from ahead/behind counts.
pub struct DivergenceCalculator<'a> {
    classifier: &'a BranchClassifier,
}

impl<'a> DivergenceCalculator<'a> {
    pub fn new(classifier: &'a BranchClassifier) -> Self {
        Self { classifier }
    }

    /// Status of `a` relative to `b`; `Unknown` when either side is missing.
    pub fn status_between<A>(&self, repo: &A, a: &str, b: &str) -> Result<SyncStatus>
    where
        A: RepositoryAdapter + ?Sized,
    {
        if !repo.ref_exists(a)? || !repo.ref_exists(b)? {
            return Ok(SyncStatus::Unknown);
        }
        Ok(repo.ahead_behind(a, b)?.status())
    }

    /// Status of a local branch relative to its remote counterpart.
    pub fn status<A>(&self, repo: &A, branch: &str) -> Result<SyncStatus>
    where
        A: RepositoryAdapter + ?Sized,
    {
        self.status_between(repo, branch, &tracking_ref(branch))
    }

    /// Status of a branch relative to main.
    pub fn main_status<A>(&self, repo: &A, branch: &str) -> Result<SyncStatus>
    where
        A: RepositoryAdapter + ?Sized,
    {
        self.status_between(repo, branch, &self.classifier.main_branch())
    }

    /// Full divergence report for one branch.
    pub fn branch_divergence<A>(&self, repo: &A, branch: &str) -> Result<BranchDivergence>
    where
        A: RepositoryAdapter + ?Sized,
    {
        let kind = self.classifier.classify(branch);
        let remote = self.status(repo, branch)?;
        let main = match kind {
            BranchKind::Feature => Some(self.main_status(repo, branch)?),
            BranchKind::NonFeature => None,
        };

        Ok(BranchDivergence {
            branch: branch.to_string(),
            kind,
            remote,
            main,
        })
    }

    /// Every local branch except main that is not fully synchronized.
    pub fn out_of_sync_branches<A>(&self, repo: &A) -> Result<Vec<BranchDivergence>>
    where
        A: RepositoryAdapter + ?Sized,
    {
        let mut out_of_sync = Vec::new();
        for branch in repo.list_local_branches()? {
            if self.classifier.is_main(&branch) {
                continue;
            }
            let divergence = self.branch_divergence(repo, &branch)?;
            if !divergence.is_in_sync() {
                out_of_sync.push(divergence);
            }
        }
        Ok(out_of_sync)
    }

    /// Number of local branches, main excluded, that are not in sync.
    pub fn out_of_sync_count<A>(&self, repo: &A) -> Result<usize>
    where
        A: RepositoryAdapter + ?Sized,
    {
        Ok(self.out_of_sync_branches(repo)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::ObjectStore;
    use crate::remote::RemoteOrigin;
    use crate::repository::MemoryRepository;
    use crate::types::EndpointRole;
    use std::sync::Arc;

    fn setup() -> MemoryRepository {
        let objects = Arc::new(ObjectStore::new());
        let root = objects.create_commit(vec![], "initial commit").unwrap();
        let remote = Arc::new(RemoteOrigin::new(objects));
        remote.update("main", &root, false).unwrap();
        MemoryRepository::clone_remote(EndpointRole::Local, remote, "main").unwrap()
    }

    #[test]
    fn test_unpushed_branch_is_unknown() {
        let repo = setup();
        let classifier = BranchClassifier::new("main");
        let calc = DivergenceCalculator::new(&classifier);

        repo.create_branch("feature", "main").unwrap();
        assert_eq!(calc.status(&repo, "feature").unwrap(), SyncStatus::Unknown);
        assert_eq!(calc.out_of_sync_count(&repo).unwrap(), 1);

        repo.push("feature").unwrap();
        assert_eq!(calc.status(&repo, "feature").unwrap(), SyncStatus::InSync);
        assert_eq!(calc.out_of_sync_count(&repo).unwrap(), 0);
    }

    #[test]
    fn test_statuses() {
        let repo = setup();
        let classifier = BranchClassifier::new("main");
        let calc = DivergenceCalculator::new(&classifier);

        repo.create_branch("feature", "main").unwrap();
        repo.push("feature").unwrap();

        repo.commit("feature", "local work").unwrap();
        assert_eq!(calc.status(&repo, "feature").unwrap(), SyncStatus::Ahead);
        assert_eq!(calc.main_status(&repo, "feature").unwrap(), SyncStatus::Ahead);

        repo.commit("main", "main work").unwrap();
        assert_eq!(calc.main_status(&repo, "feature").unwrap(), SyncStatus::Diverged);
        assert_eq!(calc.main_status(&repo, "main").unwrap(), SyncStatus::InSync);
    }

    #[test]
    fn test_feature_behind_main_is_out_of_sync() {
        let repo = setup();
        let classifier = BranchClassifier::new("main");
        let calc = DivergenceCalculator::new(&classifier);

        repo.create_branch("feature", "main").unwrap();
        repo.push("feature").unwrap();
        repo.commit("main", "main work").unwrap();

        let report = calc.out_of_sync_branches(&repo).unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].remote, SyncStatus::InSync);
        assert_eq!(report[0].main, Some(SyncStatus::Behind));
    }

    #[test]
    fn test_non_feature_ignores_main() {
        let repo = setup();
        let classifier = BranchClassifier::new("main");
        classifier.register_non_feature("release").unwrap();
        let calc = DivergenceCalculator::new(&classifier);

        repo.create_branch("release", "main").unwrap();
        repo.commit("release", "hotfix").unwrap();
        repo.push("release").unwrap();

        let divergence = calc.branch_divergence(&repo, "release").unwrap();
        assert_eq!(divergence.main, None);
        assert!(divergence.is_in_sync());
        assert_eq!(calc.out_of_sync_count(&repo).unwrap(), 0);
    }
}
