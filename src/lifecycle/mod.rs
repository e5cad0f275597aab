//! Branch lifecycle orchestration.
//!
//! Each operation runs as a small state machine
//! (`Started -> LocalApplied -> RemoteApplied -> PeerConverged -> Completed`,
//! or `Aborted`) against one endpoint, and always leaves that endpoint on a
//! named branch.

mod machine;
mod orchestrator;
mod report;

pub use machine::{OperationKind, OperationState, OperationTrace};
pub use orchestrator::{CreateOptions, Orchestrator};
pub use report::{BranchFailure, CleanupReport, SyncReport};
