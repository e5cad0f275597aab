//! # Branch Sync
//!
//! A branch synchronization and lifecycle engine for repositories that
//! share one remote.
//!
//! ## Core Concepts
//!
//! - **Endpoints**: a local clone, the `origin` remote and any number of
//!   peer clones, driven through the [`RepositoryAdapter`] trait
//! - **Classification**: every branch is a feature branch unless it is main
//!   or registered as non-feature
//! - **Divergence**: ahead/behind counts against the remote and against main
//! - **Lifecycle**: create, sync, delete, ship, cleanup and prune run as
//!   traced state machines that always leave a branch checked out
//!
//! ## Example
//!
//! ```ignore
//! use branchsync::{BranchRelation, EngineConfig, Orchestrator, Topology};
//!
//! let topology = Topology::new("main")?;
//! let local = topology.local()?;
//! let orchestrator = Orchestrator::new(EngineConfig::default())?;
//!
//! // Branch off main with one commit of its own
//! orchestrator.create(&local, "feature", BranchRelation::Ahead)?;
//!
//! // Fold it back into main and publish everything
//! orchestrator.sync(&local)?;
//! assert_eq!(orchestrator.out_of_sync_count(&local)?, 0);
//! ```

pub mod classifier;
pub mod config;
pub mod divergence;
pub mod error;
pub mod lifecycle;
pub mod objects;
pub mod peer;
pub mod remote;
pub mod repository;
pub mod types;

// Re-exports
pub use classifier::BranchClassifier;
pub use config::{EngineConfig, SyncStrategy, DEFAULT_MAIN_BRANCH};
pub use divergence::{BranchDivergence, DivergenceCalculator};
pub use error::{Result, SyncError};
pub use lifecycle::{
    BranchFailure, CleanupReport, CreateOptions, OperationKind, OperationState, OperationTrace,
    Orchestrator, SyncReport,
};
pub use objects::ObjectStore;
pub use peer::{EndpointView, Topology};
pub use remote::{RemoteOrigin, ORIGIN};
pub use repository::{
    strip_tracking, tracking_ref, GitRepository, MemoryRepository, RepositoryAdapter,
};
pub use types::*;
