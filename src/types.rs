//! Core types for the sync engine.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque commit identifier.
///
/// The in-memory backend derives these from a SHA-256 digest; the git
/// backend stores whatever object name git reports.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitId(pub String);

impl CommitId {
    /// Derive an id from the commit's content.
    pub fn compute(parents: &[CommitId], message: &str, nonce: u64) -> Self {
        let mut hasher = Sha256::new();
        for parent in parents {
            hasher.update(parent.0.as_bytes());
            hasher.update(b"\n");
        }
        hasher.update(message.as_bytes());
        hasher.update(nonce.to_le_bytes());
        CommitId(hex::encode(hasher.finalize()))
    }

    /// Full hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for logs.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Debug for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitId({})", self.short())
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// An immutable commit in the graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub parents: Vec<CommitId>,
    pub message: String,
    pub created: Timestamp,
}

impl Commit {
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

/// Branch metadata as seen from one endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub head: CommitId,
    pub upstream: Option<String>,
    pub is_feature: bool,
}

/// Whether a branch takes part in automated sync and cleanup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchKind {
    Feature,
    NonFeature,
}

impl BranchKind {
    pub fn is_feature(self) -> bool {
        self == BranchKind::Feature
    }
}

/// Where the setup commit lands when creating a branch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchRelation {
    /// No commit; the branch sits exactly on main.
    #[default]
    None,
    /// Main gets a commit, leaving the branch behind it.
    Behind,
    /// The branch gets a commit, putting it ahead of main.
    Ahead,
}

/// Role of a repository endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointRole {
    Local,
    RemoteOrigin,
    Peer(String),
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointRole::Local => write!(f, "local"),
            EndpointRole::RemoteOrigin => write!(f, "origin"),
            EndpointRole::Peer(name) => write!(f, "peer:{}", name),
        }
    }
}

/// Commit counts between two refs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AheadBehind {
    /// Commits reachable from the first ref only.
    pub ahead: usize,
    /// Commits reachable from the second ref only.
    pub behind: usize,
}

impl AheadBehind {
    pub fn new(ahead: usize, behind: usize) -> Self {
        Self { ahead, behind }
    }

    pub fn status(self) -> SyncStatus {
        match (self.ahead, self.behind) {
            (0, 0) => SyncStatus::InSync,
            (_, 0) => SyncStatus::Ahead,
            (0, _) => SyncStatus::Behind,
            _ => SyncStatus::Diverged,
        }
    }
}

/// Relation of a ref to its expected counterpart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    InSync,
    Ahead,
    Behind,
    Diverged,
    /// The counterpart does not exist (e.g. an unpushed branch).
    Unknown,
}

impl SyncStatus {
    pub fn is_in_sync(self) -> bool {
        self == SyncStatus::InSync
    }
}

/// Result of merging one ref into a branch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    UpToDate,
    FastForward(CommitId),
    Merged(CommitId),
}
