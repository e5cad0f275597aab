//! Multiple endpoints sharing one remote.
//!
//! A [`Topology`] owns the shared object store and remote; each endpoint
//! is a [`MemoryRepository`] cloned from it. Endpoints only see each
//! other's work through push and fetch.

use crate::error::Result;
use crate::objects::ObjectStore;
use crate::remote::RemoteOrigin;
use crate::repository::{MemoryRepository, RepositoryAdapter};
use crate::types::EndpointRole;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// Message of the commit every topology starts from.
pub const ROOT_COMMIT_MESSAGE: &str = "initial commit";

/// A shared remote and the endpoints cloned from it.
pub struct Topology {
    objects: Arc<ObjectStore>,
    remote: Arc<RemoteOrigin>,
    main_branch: String,
}

impl Topology {
    /// A remote with a single root commit on `main_branch`.
    pub fn new(main_branch: impl Into<String>) -> Result<Self> {
        let main_branch = main_branch.into();
        let objects = Arc::new(ObjectStore::new());
        let root = objects.create_commit(vec![], ROOT_COMMIT_MESSAGE)?;

        let remote = Arc::new(RemoteOrigin::new(Arc::clone(&objects)));
        remote.update(&main_branch, &root, false)?;

        info!(main = %main_branch, root = root.short(), "Created topology");
        Ok(Self {
            objects,
            remote,
            main_branch,
        })
    }

    pub fn main_branch(&self) -> &str {
        &self.main_branch
    }

    pub fn objects(&self) -> &Arc<ObjectStore> {
        &self.objects
    }

    pub fn remote(&self) -> &Arc<RemoteOrigin> {
        &self.remote
    }

    /// Clone the remote into a new endpoint with main checked out.
    pub fn clone_endpoint(&self, role: EndpointRole) -> Result<MemoryRepository> {
        MemoryRepository::clone_remote(role, Arc::clone(&self.remote), &self.main_branch)
    }

    pub fn local(&self) -> Result<MemoryRepository> {
        self.clone_endpoint(EndpointRole::Local)
    }

    pub fn peer(&self, name: &str) -> Result<MemoryRepository> {
        self.clone_endpoint(EndpointRole::Peer(name.to_string()))
    }
}

/// What one endpoint can observe about its branches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EndpointView {
    pub role: EndpointRole,
    pub current_branch: Option<String>,
    pub local_branches: BTreeSet<String>,
    /// Remote-tracking refs, as `origin/<branch>`.
    pub remote_branches: BTreeSet<String>,
}

impl EndpointView {
    pub fn capture<A>(repo: &A) -> Result<Self>
    where
        A: RepositoryAdapter + ?Sized,
    {
        Ok(Self {
            role: repo.role().clone(),
            current_branch: repo.current_branch().ok(),
            local_branches: repo.list_local_branches()?,
            remote_branches: repo.list_remote_branches()?,
        })
    }

    /// Local branches and remote-tracking refs together.
    pub fn existing_branches(&self) -> BTreeSet<String> {
        self.local_branches
            .union(&self.remote_branches)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::lifecycle::Orchestrator;
    use crate::types::BranchRelation;

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fresh_endpoints_agree() {
        let topology = Topology::new("main").unwrap();
        let local = topology.local().unwrap();
        let peer = topology.peer("coworker").unwrap();

        let local_view = EndpointView::capture(&local).unwrap();
        let peer_view = EndpointView::capture(&peer).unwrap();
        assert_eq!(local_view.existing_branches(), names(&["main", "origin/main"]));
        assert_eq!(local_view.existing_branches(), peer_view.existing_branches());
        assert_eq!(peer_view.role, EndpointRole::Peer("coworker".into()));
    }

    #[test]
    fn test_peer_sees_branch_after_fetch() {
        let topology = Topology::new("main").unwrap();
        let local = topology.local().unwrap();
        let peer = topology.peer("coworker").unwrap();
        let orch = Orchestrator::new(EngineConfig::default()).unwrap();

        orch.create(&local, "feature", BranchRelation::None).unwrap();
        assert!(!EndpointView::capture(&peer)
            .unwrap()
            .remote_branches
            .contains("origin/feature"));

        peer.fetch().unwrap();
        let view = EndpointView::capture(&peer).unwrap();
        assert!(view.remote_branches.contains("origin/feature"));
        assert!(!view.local_branches.contains("feature"));
        assert_eq!(view.current_branch.as_deref(), Some("main"));
    }
}
