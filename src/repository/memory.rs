//! In-process repository endpoint.

use super::{strip_tracking, tracking_ref, RepositoryAdapter};
use crate::error::{Result, SyncError};
use crate::objects::ObjectStore;
use crate::remote::RemoteOrigin;
use crate::types::{AheadBehind, CommitId, EndpointRole, MergeOutcome};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Refs and checkout state of one working copy.
#[derive(Clone, Debug, Default)]
struct WorkingCopy {
    /// Local branches.
    branches: BTreeMap<String, CommitId>,

    /// Remote-tracking refs by branch name, as of the last fetch or push.
    tracking: BTreeMap<String, CommitId>,

    /// Upstream configuration per local branch.
    upstreams: BTreeMap<String, String>,

    /// Checked-out branch.
    current: Option<String>,
}

impl WorkingCopy {
    fn resolve(&self, objects: &ObjectStore, reference: &str) -> Option<CommitId> {
        if let Some(branch) = strip_tracking(reference) {
            return self.tracking.get(branch).cloned();
        }
        if let Some(head) = self.branches.get(reference) {
            return Some(head.clone());
        }
        let id = CommitId(reference.to_string());
        objects.contains(&id).then_some(id)
    }

    fn require(&self, objects: &ObjectStore, reference: &str) -> Result<CommitId> {
        self.resolve(objects, reference)
            .ok_or_else(|| SyncError::NotFound(reference.to_string()))
    }

    fn require_branch(&self, name: &str) -> Result<CommitId> {
        self.branches
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(name.to_string()))
    }
}

/// A clone of the shared remote held entirely in memory.
///
/// Commits live in the object store shared with the remote; local refs,
/// remote-tracking refs and the checkout pointer belong to this endpoint
/// alone.
pub struct MemoryRepository {
    role: EndpointRole,
    objects: Arc<ObjectStore>,
    remote: Arc<RemoteOrigin>,
    state: RwLock<WorkingCopy>,
}

impl MemoryRepository {
    /// Clone `remote` and check out `default_branch`.
    pub fn clone_remote(
        role: EndpointRole,
        remote: Arc<RemoteOrigin>,
        default_branch: &str,
    ) -> Result<Self> {
        let tracking = remote.branches()?;
        let head = tracking
            .get(default_branch)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(tracking_ref(default_branch)))?;

        let mut state = WorkingCopy {
            tracking,
            ..Default::default()
        };
        state.branches.insert(default_branch.to_string(), head);
        state
            .upstreams
            .insert(default_branch.to_string(), tracking_ref(default_branch));
        state.current = Some(default_branch.to_string());

        debug!(%role, branch = default_branch, "Cloned remote");

        Ok(Self {
            role,
            objects: Arc::clone(remote.objects()),
            remote,
            state: RwLock::new(state),
        })
    }

    /// The remote this endpoint talks to.
    pub fn remote(&self) -> &Arc<RemoteOrigin> {
        &self.remote
    }

    /// Leave the working copy without a checked-out branch.
    pub fn detach(&self) {
        self.state.write().current = None;
    }
}

impl RepositoryAdapter for MemoryRepository {
    fn role(&self) -> &EndpointRole {
        &self.role
    }

    fn list_local_branches(&self) -> Result<BTreeSet<String>> {
        Ok(self.state.read().branches.keys().cloned().collect())
    }

    fn list_remote_branches(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .state
            .read()
            .tracking
            .keys()
            .map(|name| tracking_ref(name))
            .collect())
    }

    fn current_branch(&self) -> Result<String> {
        self.state
            .read()
            .current
            .clone()
            .ok_or(SyncError::DetachedOrMissing)
    }

    fn branch_head(&self, name: &str) -> Result<Option<CommitId>> {
        Ok(self.state.read().branches.get(name).cloned())
    }

    fn ref_exists(&self, reference: &str) -> Result<bool> {
        Ok(self.state.read().resolve(&self.objects, reference).is_some())
    }

    fn upstream(&self, name: &str) -> Result<Option<String>> {
        Ok(self.state.read().upstreams.get(name).cloned())
    }

    fn create_branch(&self, name: &str, from_ref: &str) -> Result<()> {
        let mut state = self.state.write();
        if state.branches.contains_key(name) {
            return Err(SyncError::AlreadyExists(name.to_string()));
        }
        let head = state.require(&self.objects, from_ref)?;

        debug!(role = %self.role, branch = name, from = from_ref, "Created branch");
        state.branches.insert(name.to_string(), head);
        Ok(())
    }

    fn checkout(&self, name: &str) -> Result<()> {
        let mut state = self.state.write();
        state.require_branch(name)?;
        state.current = Some(name.to_string());
        Ok(())
    }

    fn commit(&self, target_branch: &str, message: &str) -> Result<CommitId> {
        let mut state = self.state.write();
        let head = state.require_branch(target_branch)?;
        let id = self.objects.create_commit(vec![head], message)?;

        debug!(role = %self.role, branch = target_branch, commit = id.short(), "Committed");
        state.branches.insert(target_branch.to_string(), id.clone());
        Ok(id)
    }

    fn reset_branch(&self, name: &str, head: &CommitId) -> Result<()> {
        let mut state = self.state.write();
        state.require_branch(name)?;
        if !self.objects.contains(head) {
            return Err(SyncError::NotFound(head.to_string()));
        }
        debug!(role = %self.role, branch = name, head = head.short(), "Reset branch");
        state.branches.insert(name.to_string(), head.clone());
        Ok(())
    }

    fn delete_local_branch(&self, name: &str) -> Result<()> {
        let mut state = self.state.write();
        if state.current.as_deref() == Some(name) {
            return Err(SyncError::InvalidOperation(format!(
                "cannot delete the checked-out branch {}",
                name
            )));
        }
        if state.branches.remove(name).is_some() {
            debug!(role = %self.role, branch = name, "Deleted local branch");
        }
        state.upstreams.remove(name);
        Ok(())
    }

    fn delete_remote_branch(&self, name: &str) -> Result<()> {
        self.remote.delete(name)?;
        self.state.write().tracking.remove(name);
        Ok(())
    }

    fn ahead_behind(&self, a: &str, b: &str) -> Result<AheadBehind> {
        let (left, right) = {
            let state = self.state.read();
            (
                state.require(&self.objects, a)?,
                state.require(&self.objects, b)?,
            )
        };
        self.objects.ahead_behind(&left, &right)
    }

    fn fetch(&self) -> Result<()> {
        let remote_refs = self.remote.branches()?;
        let mut state = self.state.write();

        let pruned: Vec<_> = state
            .tracking
            .keys()
            .filter(|name| !remote_refs.contains_key(*name))
            .cloned()
            .collect();
        if !pruned.is_empty() {
            debug!(role = %self.role, ?pruned, "Pruned remote-tracking refs");
        }

        state.tracking = remote_refs;
        Ok(())
    }

    fn push(&self, branch: &str) -> Result<()> {
        self.publish(branch, false)
    }

    fn force_push(&self, branch: &str) -> Result<()> {
        self.publish(branch, true)
    }

    fn pull(&self, branch: &str) -> Result<MergeOutcome> {
        self.fetch()?;
        let upstream = tracking_ref(branch);
        if !self.ref_exists(&upstream)? {
            return Err(SyncError::NotFound(upstream));
        }
        self.merge(branch, &upstream)
    }

    fn merge(&self, into: &str, from_ref: &str) -> Result<MergeOutcome> {
        let mut state = self.state.write();
        let into_head = state.require_branch(into)?;
        let from_head = state.require(&self.objects, from_ref)?;

        if self.objects.is_ancestor(&from_head, &into_head)? {
            return Ok(MergeOutcome::UpToDate);
        }

        if self.objects.is_ancestor(&into_head, &from_head)? {
            debug!(role = %self.role, into, from = from_ref, "Fast-forward");
            state.branches.insert(into.to_string(), from_head.clone());
            return Ok(MergeOutcome::FastForward(from_head));
        }

        let message = format!("Merge {} into {}", from_ref, into);
        let id = self
            .objects
            .create_commit(vec![into_head, from_head], &message)?;
        debug!(role = %self.role, into, from = from_ref, commit = id.short(), "Merged");
        state.branches.insert(into.to_string(), id.clone());
        Ok(MergeOutcome::Merged(id))
    }

    fn rebase(&self, branch: &str, onto: &str) -> Result<()> {
        let mut state = self.state.write();
        let head = state.require_branch(branch)?;
        let onto_head = state.require(&self.objects, onto)?;

        if self.objects.is_ancestor(&onto_head, &head)? {
            return Ok(());
        }

        let mut new_head = onto_head;
        for commit in self.objects.unique_commits(&head, &new_head)? {
            new_head = self
                .objects
                .create_commit(vec![new_head], &commit.message)?;
        }

        debug!(role = %self.role, branch, onto, head = new_head.short(), "Rebased");
        state.branches.insert(branch.to_string(), new_head);
        Ok(())
    }

    fn squash_merge(&self, into: &str, from: &str, message: &str) -> Result<CommitId> {
        let mut state = self.state.write();
        let into_head = state.require_branch(into)?;
        state.require(&self.objects, from)?;

        let id = self.objects.create_commit(vec![into_head], message)?;
        debug!(role = %self.role, into, from, commit = id.short(), "Squash-merged");
        state.branches.insert(into.to_string(), id.clone());
        Ok(id)
    }
}

impl MemoryRepository {
    fn publish(&self, branch: &str, force: bool) -> Result<()> {
        let head = self.state.read().require_branch(branch)?;
        self.remote.update(branch, &head, force)?;

        let mut state = self.state.write();
        state.tracking.insert(branch.to_string(), head);
        state
            .upstreams
            .insert(branch.to_string(), tracking_ref(branch));
        Ok(())
    }
}
