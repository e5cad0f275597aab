//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default name of the integration branch.
pub const DEFAULT_MAIN_BRANCH: &str = "main";

/// How a feature branch's own commits travel back toward main.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStrategy {
    /// Merge main into the branch, then fast-forward main onto it.
    #[default]
    Merge,

    /// Replay the branch's commits on top of main, then fast-forward main
    /// onto it. Rewritten branches are force-pushed.
    Rebase,
}

/// Engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Integration branch every feature branch is created from.
    pub main_branch: String,

    /// Sync policy for feature branches.
    pub sync_strategy: SyncStrategy,

    /// Push newly created branches and set their upstream.
    pub publish_new_branches: bool,

    /// Keep syncing remaining branches after one fails.
    pub continue_on_error: bool,

    /// Where the branch classification registry is persisted, if anywhere.
    pub registry_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            main_branch: DEFAULT_MAIN_BRANCH.to_string(),
            sync_strategy: SyncStrategy::Merge,
            publish_new_branches: true,
            continue_on_error: false,
            registry_path: None,
        }
    }
}

impl EngineConfig {
    pub fn with_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.sync_strategy = strategy;
        self
    }

    pub fn with_registry(mut self, path: impl Into<PathBuf>) -> Self {
        self.registry_path = Some(path.into());
        self
    }
}
