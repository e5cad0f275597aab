//! Per-operation state machine.

use crate::error::{Result, SyncError};
use crate::types::EndpointRole;
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Progress of one orchestrated operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum OperationState {
    Started,
    /// Local refs and checkout reflect the operation.
    LocalApplied,
    /// The remote reflects the operation.
    RemoteApplied,
    /// Nothing further is owed to peers; they converge on their next fetch.
    PeerConverged,
    Completed,
    Aborted,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationState::Completed | OperationState::Aborted)
    }

    /// The only state reachable from this one without aborting.
    pub fn successor(self) -> Option<OperationState> {
        match self {
            OperationState::Started => Some(OperationState::LocalApplied),
            OperationState::LocalApplied => Some(OperationState::RemoteApplied),
            OperationState::RemoteApplied => Some(OperationState::PeerConverged),
            OperationState::PeerConverged => Some(OperationState::Completed),
            OperationState::Completed | OperationState::Aborted => None,
        }
    }
}

/// Which operation a trace belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum OperationKind {
    Create,
    Sync,
    Delete,
    Ship,
    Cleanup,
    Prune,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Create => "create",
            OperationKind::Sync => "sync",
            OperationKind::Delete => "delete",
            OperationKind::Ship => "ship",
            OperationKind::Cleanup => "cleanup",
            OperationKind::Prune => "prune",
        };
        f.write_str(name)
    }
}

/// Record of the states an operation passed through.
#[derive(Clone, Debug, Serialize)]
pub struct OperationTrace {
    pub kind: OperationKind,
    pub target: Option<String>,
    pub endpoint: EndpointRole,
    states: Vec<OperationState>,
    /// Why the operation aborted, if it did.
    pub failure: Option<String>,
}

impl OperationTrace {
    pub fn start(kind: OperationKind, target: Option<&str>, endpoint: &EndpointRole) -> Self {
        debug!(%kind, ?target, %endpoint, "Operation started");
        Self {
            kind,
            target: target.map(String::from),
            endpoint: endpoint.clone(),
            states: vec![OperationState::Started],
            failure: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> OperationState {
        self.states
            .last()
            .copied()
            .unwrap_or(OperationState::Started)
    }

    /// Every state visited, in order.
    pub fn states(&self) -> &[OperationState] {
        &self.states
    }

    pub fn is_completed(&self) -> bool {
        self.state() == OperationState::Completed
    }

    pub fn is_aborted(&self) -> bool {
        self.state() == OperationState::Aborted
    }

    /// Move to `next`, which must be the successor of the current state.
    pub fn advance(&mut self, next: OperationState) -> Result<()> {
        let current = self.state();
        if current.successor() != Some(next) {
            return Err(SyncError::InvalidOperation(format!(
                "{} cannot move from {:?} to {:?}",
                self.kind, current, next
            )));
        }

        debug!(kind = %self.kind, target = ?self.target, state = ?next, "Operation advanced");
        self.states.push(next);
        Ok(())
    }

    /// Walk the remaining states up to `Completed`.
    pub fn complete(&mut self) -> Result<()> {
        while let Some(next) = self.state().successor() {
            self.advance(next)?;
        }
        Ok(())
    }

    /// Enter `Aborted` unless already terminal.
    pub fn abort(&mut self, reason: impl fmt::Display) {
        if self.state().is_terminal() {
            return;
        }
        self.failure = Some(reason.to_string());
        self.states.push(OperationState::Aborted);
    }
}
