//! The shared remote origin.
//!
//! The remote is a bare ref table over the shared object store. It is the
//! only state endpoints have in common; everything an endpoint learns
//! about another one passes through here via push and fetch.

use crate::error::{Result, SyncError};
use crate::objects::ObjectStore;
use crate::types::{CommitId, EndpointRole};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Conventional name of the shared remote.
pub const ORIGIN: &str = "origin";

/// A bare remote repository.
pub struct RemoteOrigin {
    /// Remote name as seen by clones.
    name: String,

    role: EndpointRole,

    /// Commit storage shared with every clone.
    objects: Arc<ObjectStore>,

    /// Branch name to head commit.
    refs: RwLock<BTreeMap<String, CommitId>>,

    /// Branches that refuse every update and deletion.
    protected: RwLock<BTreeSet<String>>,

    /// Simulated connectivity.
    reachable: AtomicBool,
}

impl RemoteOrigin {
    /// Create an empty remote.
    pub fn new(objects: Arc<ObjectStore>) -> Self {
        Self {
            name: ORIGIN.to_string(),
            role: EndpointRole::RemoteOrigin,
            objects,
            refs: RwLock::new(BTreeMap::new()),
            protected: RwLock::new(BTreeSet::new()),
            reachable: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> &EndpointRole {
        &self.role
    }

    pub fn objects(&self) -> &Arc<ObjectStore> {
        &self.objects
    }

    /// Toggle connectivity; while unreachable every call fails with
    /// `NetworkUnavailable`.
    pub fn set_reachable(&self, reachable: bool) {
        info!(endpoint = %self.role, reachable, "Remote connectivity changed");
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Refuse all future updates and deletions of `branch`.
    pub fn protect(&self, branch: &str) {
        self.protected.write().insert(branch.to_string());
    }

    pub fn unprotect(&self, branch: &str) {
        self.protected.write().remove(branch);
    }

    /// Snapshot of every branch on the remote.
    pub fn branches(&self) -> Result<BTreeMap<String, CommitId>> {
        self.ensure_reachable()?;
        Ok(self.refs.read().clone())
    }

    /// Head of one remote branch.
    pub fn head(&self, branch: &str) -> Result<Option<CommitId>> {
        self.ensure_reachable()?;
        Ok(self.refs.read().get(branch).cloned())
    }

    /// Point `branch` at `new_head`.
    ///
    /// Without `force`, the update must be a fast-forward of the current
    /// remote head.
    pub fn update(&self, branch: &str, new_head: &CommitId, force: bool) -> Result<()> {
        self.ensure_reachable()?;
        self.ensure_unprotected(branch)?;

        if !self.objects.contains(new_head) {
            return Err(SyncError::NotFound(new_head.to_string()));
        }

        let mut refs = self.refs.write();
        if let Some(old) = refs.get(branch) {
            if !force && !self.objects.is_ancestor(old, new_head)? {
                return Err(SyncError::RemoteRejected {
                    branch: branch.to_string(),
                    reason: "non-fast-forward".to_string(),
                });
            }
        }

        debug!(endpoint = %self.role, branch, head = new_head.short(), force, "Remote ref updated");
        refs.insert(branch.to_string(), new_head.clone());
        Ok(())
    }

    /// Remove `branch`. Removing an absent branch succeeds.
    pub fn delete(&self, branch: &str) -> Result<()> {
        self.ensure_reachable()?;
        self.ensure_unprotected(branch)?;

        if self.refs.write().remove(branch).is_some() {
            debug!(endpoint = %self.role, branch, "Remote ref deleted");
        }
        Ok(())
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.is_reachable() {
            Ok(())
        } else {
            Err(SyncError::NetworkUnavailable(self.name.clone()))
        }
    }

    fn ensure_unprotected(&self, branch: &str) -> Result<()> {
        if self.protected.read().contains(branch) {
            return Err(SyncError::RemoteRejected {
                branch: branch.to_string(),
                reason: "protected branch".to_string(),
            });
        }
        Ok(())
    }
}
