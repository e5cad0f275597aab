//! Commit graph implementation.

use crate::error::{Result, SyncError};
use crate::types::{AheadBehind, Commit, CommitId, Timestamp};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared store of immutable commits.
pub struct ObjectStore {
    /// All commits by id.
    commits: RwLock<HashMap<CommitId, Commit>>,

    /// Creation order of each commit.
    order: RwLock<HashMap<CommitId, u64>>,

    /// Disambiguates commits with identical parents and message.
    nonce: AtomicU64,
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore {
    pub fn new() -> Self {
        Self {
            commits: RwLock::new(HashMap::new()),
            order: RwLock::new(HashMap::new()),
            nonce: AtomicU64::new(1),
        }
    }

    /// Create a commit on top of `parents`.
    ///
    /// Every parent must already be stored.
    pub fn create_commit(&self, parents: Vec<CommitId>, message: &str) -> Result<CommitId> {
        let mut commits = self.commits.write();

        for parent in &parents {
            if !commits.contains_key(parent) {
                return Err(SyncError::NotFound(parent.to_string()));
            }
        }

        let nonce = self.nonce.fetch_add(1, Ordering::Relaxed);
        let id = CommitId::compute(&parents, message, nonce);
        let commit = Commit {
            id: id.clone(),
            parents,
            message: message.to_string(),
            created: Timestamp::now(),
        };
        commits.insert(id.clone(), commit);
        self.order.write().insert(id.clone(), nonce);

        Ok(id)
    }

    /// Get a commit by id.
    pub fn get(&self, id: &CommitId) -> Option<Commit> {
        self.commits.read().get(id).cloned()
    }

    pub fn contains(&self, id: &CommitId) -> bool {
        self.commits.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.commits.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.read().is_empty()
    }

    /// All commits reachable from `id`, including `id` itself.
    pub fn ancestors(&self, id: &CommitId) -> Result<HashSet<CommitId>> {
        let commits = self.commits.read();
        if !commits.contains_key(id) {
            return Err(SyncError::NotFound(id.to_string()));
        }

        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([id.clone()]);

        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(commit) = commits.get(&next) {
                queue.extend(commit.parents.iter().cloned());
            }
        }

        Ok(seen)
    }

    /// Whether `ancestor` is reachable from `descendant`.
    pub fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> Result<bool> {
        if ancestor == descendant {
            return Ok(true);
        }
        Ok(self.ancestors(descendant)?.contains(ancestor))
    }

    /// Count commits reachable from exactly one side.
    pub fn ahead_behind(&self, a: &CommitId, b: &CommitId) -> Result<AheadBehind> {
        if a == b {
            return Ok(AheadBehind::default());
        }
        let left = self.ancestors(a)?;
        let right = self.ancestors(b)?;
        Ok(AheadBehind::new(
            left.difference(&right).count(),
            right.difference(&left).count(),
        ))
    }

    /// Non-merge commits reachable from `head` but not from `base`,
    /// oldest first.
    pub fn unique_commits(&self, head: &CommitId, base: &CommitId) -> Result<Vec<Commit>> {
        let excluded = self.ancestors(base)?;
        let included = self.ancestors(head)?;
        let commits = self.commits.read();

        let mut unique: Vec<Commit> = included
            .difference(&excluded)
            .filter_map(|id| commits.get(id).cloned())
            .filter(|c| !c.is_merge())
            .collect();

        // Parents are created before their children, so creation order is
        // a topological order.
        let order = self.order.read();
        unique.sort_by_key(|c| order.get(&c.id).copied().unwrap_or(u64::MAX));

        Ok(unique)
    }
}
