//! Summaries of bulk operations.

use super::machine::OperationTrace;
use crate::error::SyncError;

/// A branch a sweep could not process.
#[derive(Debug)]
pub struct BranchFailure {
    pub branch: String,
    pub error: SyncError,
}

/// Result of a sync sweep.
#[derive(Debug)]
pub struct SyncReport {
    pub trace: OperationTrace,
    /// Branches that ended synchronized and published.
    pub synced: Vec<String>,
    /// Branches that failed, with the reason.
    pub failed: Vec<BranchFailure>,
    /// Branches the sweep never finished because it stopped early.
    pub pending: Vec<String>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.pending.is_empty()
    }

    /// Branches that may still be out of sync.
    pub fn out_of_sync(&self) -> Vec<&str> {
        self.failed
            .iter()
            .map(|f| f.branch.as_str())
            .chain(self.pending.iter().map(String::as_str))
            .collect()
    }
}

/// Result of a cleanup or prune sweep.
#[derive(Debug)]
pub struct CleanupReport {
    pub trace: OperationTrace,
    /// Branches that were deleted.
    pub deleted: Vec<String>,
    /// Non-feature branches left in place.
    pub kept: Vec<String>,
    /// Branches that could not be deleted.
    pub failed: Vec<BranchFailure>,
}

impl CleanupReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}
