//! Branch classification registry.
//!
//! Every branch is a feature branch unless it is the main branch or was
//! registered as non-feature. Non-feature branches are kept current with
//! main but never removed by cleanup sweeps.

use crate::error::{Result, SyncError};
use crate::types::BranchKind;
use fs2::FileExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Registry contents as persisted on disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Registry {
    main_branch: String,
    #[serde(default)]
    non_feature_branches: BTreeSet<String>,
}

/// Classifies branches and persists the classification.
pub struct BranchClassifier {
    /// Backing file, if the registry is persisted.
    path: Option<PathBuf>,

    registry: RwLock<Registry>,
}

impl BranchClassifier {
    /// In-memory classifier for the given main branch.
    pub fn new(main_branch: impl Into<String>) -> Self {
        Self {
            path: None,
            registry: RwLock::new(Registry {
                main_branch: main_branch.into(),
                non_feature_branches: BTreeSet::new(),
            }),
        }
    }

    /// Load the registry at `path`, or start a fresh one there.
    ///
    /// A main branch recorded in the file takes precedence over
    /// `main_branch`.
    pub fn load(path: impl AsRef<Path>, main_branch: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let registry = if path.exists() {
            let mut file = File::open(&path)?;
            file.lock_shared()?;
            let mut contents = String::new();
            let read = file.read_to_string(&mut contents);
            file.unlock()?;
            read?;

            serde_json::from_str(&contents)
                .map_err(|e| SyncError::Deserialization(format!("{}: {}", path.display(), e)))?
        } else {
            Registry {
                main_branch: main_branch.to_string(),
                non_feature_branches: BTreeSet::new(),
            }
        };

        debug!(
            path = %path.display(),
            main = %registry.main_branch,
            non_feature = registry.non_feature_branches.len(),
            "Loaded branch registry"
        );

        Ok(Self {
            path: Some(path),
            registry: RwLock::new(registry),
        })
    }

    pub fn main_branch(&self) -> String {
        self.registry.read().main_branch.clone()
    }

    pub fn is_main(&self, name: &str) -> bool {
        self.registry.read().main_branch == name
    }

    /// Classify a branch by name.
    pub fn classify(&self, name: &str) -> BranchKind {
        let registry = self.registry.read();
        if registry.main_branch == name || registry.non_feature_branches.contains(name) {
            BranchKind::NonFeature
        } else {
            BranchKind::Feature
        }
    }

    pub fn is_feature(&self, name: &str) -> bool {
        self.classify(name).is_feature()
    }

    /// Exclude `name` from automated cleanup. Returns whether anything
    /// changed.
    pub fn register_non_feature(&self, name: &str) -> Result<bool> {
        let changed = {
            let mut registry = self.registry.write();
            registry.main_branch != name && registry.non_feature_branches.insert(name.to_string())
        };

        if changed {
            info!(branch = name, "Registered non-feature branch");
            self.save()?;
        }
        Ok(changed)
    }

    /// Make `name` a feature branch again. Returns whether anything changed.
    pub fn register_feature(&self, name: &str) -> Result<bool> {
        let changed = self.registry.write().non_feature_branches.remove(name);

        if changed {
            info!(branch = name, "Registered feature branch");
            self.save()?;
        }
        Ok(changed)
    }

    pub fn non_feature_branches(&self) -> BTreeSet<String> {
        self.registry.read().non_feature_branches.clone()
    }

    /// Write the registry to its backing file, if it has one.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let encoded = serde_json::to_vec_pretty(&*self.registry.read())?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.lock_exclusive()?;
        let written = file
            .set_len(0)
            .and_then(|_| file.write_all(&encoded))
            .and_then(|_| file.sync_all());
        file.unlock()?;
        written?;

        Ok(())
    }
}
