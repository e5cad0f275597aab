//! Drives create, sync, delete and the bulk operations against one
//! repository endpoint at a time.

use super::machine::{OperationKind, OperationState, OperationTrace};
use super::report::{BranchFailure, CleanupReport, SyncReport};
use crate::classifier::BranchClassifier;
use crate::config::{EngineConfig, SyncStrategy};
use crate::divergence::DivergenceCalculator;
use crate::error::{Result, SyncError};
use crate::repository::{strip_tracking, tracking_ref, RepositoryAdapter};
use crate::types::{Branch, BranchKind, BranchRelation, CommitId, SyncStatus};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use tracing::{debug, info, instrument, warn};

/// Parameters for creating a branch.
#[derive(Clone, Debug)]
pub struct CreateOptions {
    pub name: String,
    pub relation: BranchRelation,
    /// Registers the branch under this kind. `None` leaves the registry
    /// untouched, so a name already registered keeps its kind.
    pub kind: Option<BranchKind>,
    /// Overrides `EngineConfig::publish_new_branches`.
    pub publish: Option<bool>,
}

impl CreateOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relation: BranchRelation::None,
            kind: None,
            publish: None,
        }
    }

    pub fn feature(name: impl Into<String>) -> Self {
        Self {
            kind: Some(BranchKind::Feature),
            ..Self::new(name)
        }
    }

    pub fn non_feature(name: impl Into<String>) -> Self {
        Self {
            kind: Some(BranchKind::NonFeature),
            ..Self::new(name)
        }
    }

    pub fn with_relation(mut self, relation: BranchRelation) -> Self {
        self.relation = relation;
        self
    }

    pub fn with_publish(mut self, publish: bool) -> Self {
        self.publish = Some(publish);
        self
    }
}

/// Branch lifecycle engine.
///
/// Holds the configuration and the classification registry; every
/// operation takes the endpoint it runs against.
pub struct Orchestrator {
    config: EngineConfig,
    classifier: BranchClassifier,

    /// Traces of finished operations, oldest first.
    history: Mutex<Vec<OperationTrace>>,
}

impl Orchestrator {
    /// Build an orchestrator, loading the registry if one is configured.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let classifier = match &config.registry_path {
            Some(path) => BranchClassifier::load(path, &config.main_branch)?,
            None => BranchClassifier::new(config.main_branch.clone()),
        };
        Ok(Self::with_classifier(config, classifier))
    }

    pub fn with_classifier(config: EngineConfig, classifier: BranchClassifier) -> Self {
        Self {
            config,
            classifier,
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn classifier(&self) -> &BranchClassifier {
        &self.classifier
    }

    pub fn divergence(&self) -> DivergenceCalculator<'_> {
        DivergenceCalculator::new(&self.classifier)
    }

    /// The integration branch, as recorded by the registry.
    pub fn main_branch(&self) -> String {
        self.classifier.main_branch()
    }

    /// Traces of every operation run so far.
    pub fn history(&self) -> Vec<OperationTrace> {
        self.history.lock().clone()
    }

    pub fn last_operation(&self) -> Option<OperationTrace> {
        self.history.lock().last().cloned()
    }

    /// Local branches, main excluded, that are not fully synchronized.
    pub fn out_of_sync_count<A>(&self, repo: &A) -> Result<usize>
    where
        A: RepositoryAdapter + ?Sized,
    {
        self.divergence().out_of_sync_count(repo)
    }

    /// Every local branch with its head, upstream and classification.
    pub fn branches<A>(&self, repo: &A) -> Result<Vec<Branch>>
    where
        A: RepositoryAdapter + ?Sized,
    {
        let mut branches = Vec::new();
        for name in repo.list_local_branches()? {
            let Some(head) = repo.branch_head(&name)? else {
                continue;
            };
            branches.push(Branch {
                upstream: repo.upstream(&name)?,
                is_feature: self.classifier.is_feature(&name),
                name,
                head,
            });
        }
        Ok(branches)
    }

    /// Create a branch off main and check it out.
    ///
    /// An unregistered name counts as a feature; a registered one keeps
    /// its kind. Any failure rolls the endpoint and the remote back.
    pub fn create<A>(&self, repo: &A, name: &str, relation: BranchRelation) -> Result<OperationTrace>
    where
        A: RepositoryAdapter + ?Sized,
    {
        self.create_with(repo, CreateOptions::new(name).with_relation(relation))
    }

    #[instrument(skip_all, fields(endpoint = %repo.role(), branch = %options.name))]
    pub fn create_with<A>(&self, repo: &A, options: CreateOptions) -> Result<OperationTrace>
    where
        A: RepositoryAdapter + ?Sized,
    {
        let mut trace =
            OperationTrace::start(OperationKind::Create, Some(options.name.as_str()), repo.role());
        let result = self.run_create(repo, &options, &mut trace);
        self.finish(trace, result)
    }

    fn run_create<A>(&self, repo: &A, options: &CreateOptions, trace: &mut OperationTrace) -> Result<()>
    where
        A: RepositoryAdapter + ?Sized,
    {
        let name = options.name.as_str();
        let initial = repo.current_branch()?;
        repo.create_branch(name, &self.main_branch())?;

        let mut footprint = Footprint::default();
        let result = self.apply_create(repo, options, trace, &mut footprint);
        if let Err(e) = result {
            warn!(branch = name, error = %e, "Create failed, rolling back");
            self.discard_branch(repo, name, &initial, &footprint);
            return Err(e);
        }
        Ok(())
    }

    fn apply_create<A>(
        &self,
        repo: &A,
        options: &CreateOptions,
        trace: &mut OperationTrace,
        footprint: &mut Footprint,
    ) -> Result<()>
    where
        A: RepositoryAdapter + ?Sized,
    {
        let name = options.name.as_str();
        let main = self.main_branch();
        repo.checkout(name)?;

        let target = match options.relation {
            BranchRelation::None => None,
            BranchRelation::Behind => Some(main.as_str()),
            BranchRelation::Ahead => Some(name),
        };
        if let Some(target) = target {
            let before = repo
                .branch_head(target)?
                .ok_or_else(|| SyncError::NotFound(target.to_string()))?;
            repo.commit(target, &format!("{} commit", target))?;
            if target != name {
                footprint.moved = Some((target.to_string(), before));
            }
        }
        trace.advance(OperationState::LocalApplied)?;

        let publish = options.publish.unwrap_or(self.config.publish_new_branches);
        if publish {
            repo.push(name)?;
            footprint.published = true;
            if target == Some(main.as_str()) {
                repo.push(&main)?;
            }
        }
        trace.advance(OperationState::RemoteApplied)?;

        match options.kind {
            None => {}
            Some(BranchKind::Feature) => {
                self.classifier.register_feature(name)?;
            }
            Some(BranchKind::NonFeature) => {
                self.classifier.register_non_feature(name)?;
            }
        }

        info!(branch = name, relation = ?options.relation, published = publish, "Created branch");
        trace.advance(OperationState::PeerConverged)?;
        trace.advance(OperationState::Completed)
    }

    /// Undo a partially created branch and return to `initial`.
    fn discard_branch<A>(&self, repo: &A, name: &str, initial: &str, footprint: &Footprint)
    where
        A: RepositoryAdapter + ?Sized,
    {
        if let Err(e) = repo.checkout(initial) {
            warn!(branch = initial, error = %e, "Could not return to initial branch");
        }
        if let Some((target, before)) = &footprint.moved {
            if let Err(e) = repo.reset_branch(target, before) {
                warn!(branch = %target, error = %e, "Could not restore branch head");
            }
        }
        if footprint.published {
            if let Err(e) = repo.delete_remote_branch(name) {
                warn!(branch = name, error = %e, "Could not unpublish partially created branch");
            }
        }
        if let Err(e) = repo.delete_local_branch(name) {
            warn!(branch = name, error = %e, "Could not remove partially created branch");
        }
    }

    /// Bring every local branch in line with the remote and with main.
    ///
    /// Fetching or a missing checkout fails the whole operation. Failures
    /// on individual branches land in the report; unless
    /// `continue_on_error` is set the sweep stops at the first one and the
    /// branches it never reached are reported as pending.
    #[instrument(skip_all, fields(endpoint = %repo.role()))]
    pub fn sync<A>(&self, repo: &A) -> Result<SyncReport>
    where
        A: RepositoryAdapter + ?Sized,
    {
        let mut trace = OperationTrace::start(OperationKind::Sync, None, repo.role());
        let initial = match repo.current_branch() {
            Ok(branch) => branch,
            Err(e) => return Err(self.fail(trace, e)),
        };

        let mut sweep = Sweep::default();
        let result = self.run_sync(repo, &mut trace, &mut sweep);
        self.return_to(repo, &initial);

        if let Err(e) = result {
            return Err(self.fail(trace, e));
        }

        if sweep.failed.is_empty() {
            trace.complete()?;
            info!(synced = sweep.synced.len(), "Sync complete");
        } else {
            let failed: Vec<&str> = sweep.failed.iter().map(|f| f.branch.as_str()).collect();
            warn!(?failed, pending = ?sweep.pending, "Sync incomplete");
            trace.abort(format!("failed to sync {}", failed.join(", ")));
        }
        self.record(&trace);

        Ok(SyncReport {
            trace,
            synced: sweep.synced,
            failed: sweep.failed,
            pending: sweep.pending,
        })
    }

    fn run_sync<A>(&self, repo: &A, trace: &mut OperationTrace, sweep: &mut Sweep) -> Result<()>
    where
        A: RepositoryAdapter + ?Sized,
    {
        let main = self.main_branch();
        repo.fetch()?;

        let branches = repo.list_local_branches()?;
        if !branches.contains(&main) {
            return Err(SyncError::NotFound(main));
        }
        let (features, non_features): (Vec<String>, Vec<String>) = branches
            .into_iter()
            .filter(|b| *b != main)
            .partition(|b| self.classifier.is_feature(b));

        // Main first takes in whatever the remote has.
        let main_tracking = tracking_ref(&main);
        if repo.ref_exists(&main_tracking)? {
            repo.merge(&main, &main_tracking)?;
        }

        // Fold each feature into main so later features see earlier ones.
        for branch in &features {
            if sweep.halted {
                break;
            }
            let result = self.integrate_feature(repo, branch, &main);
            self.note(sweep, branch, result);
        }

        for branch in &non_features {
            if sweep.halted {
                break;
            }
            let result = self.integrate_non_feature(repo, branch, &main);
            self.note(sweep, branch, result);
        }

        // Features integrated early are behind the final main.
        for branch in &features {
            if sweep.halted {
                break;
            }
            if sweep.has_failed(branch) {
                continue;
            }
            let result = repo.merge(branch, &main).map(|_| ());
            self.note(sweep, branch, result);
        }

        if !sweep.halted {
            trace.advance(OperationState::LocalApplied)?;

            let result = self.publish(repo, &main, false);
            self.note(sweep, &main, result);

            for branch in features.iter().chain(&non_features) {
                if sweep.halted {
                    break;
                }
                if sweep.has_failed(branch) {
                    continue;
                }
                let rewritten = self.config.sync_strategy == SyncStrategy::Rebase
                    && self.classifier.is_feature(branch);
                match self.publish(repo, branch, rewritten) {
                    Ok(()) => sweep.synced.push(branch.clone()),
                    Err(e) => self.note(sweep, branch, Err(e)),
                }
            }
        }

        if !sweep.halted {
            trace.advance(OperationState::RemoteApplied)?;
        }

        sweep.pending = features
            .iter()
            .chain(&non_features)
            .filter(|b| !sweep.synced.contains(b) && !sweep.has_failed(b))
            .cloned()
            .collect();
        Ok(())
    }

    /// Catch a feature branch up with its remote and main, then move main
    /// onto it.
    fn integrate_feature<A>(&self, repo: &A, branch: &str, main: &str) -> Result<()>
    where
        A: RepositoryAdapter + ?Sized,
    {
        let tracking = tracking_ref(branch);
        if repo.ref_exists(&tracking)? {
            repo.merge(branch, &tracking)?;
        }

        match self.config.sync_strategy {
            SyncStrategy::Merge => {
                repo.merge(branch, main)?;
            }
            SyncStrategy::Rebase => repo.rebase(branch, main)?,
        }

        repo.merge(main, branch)?;
        debug!(branch, "Integrated feature branch");
        Ok(())
    }

    /// Non-feature branches take from main but never give back.
    fn integrate_non_feature<A>(&self, repo: &A, branch: &str, main: &str) -> Result<()>
    where
        A: RepositoryAdapter + ?Sized,
    {
        let tracking = tracking_ref(branch);
        if repo.ref_exists(&tracking)? {
            repo.merge(branch, &tracking)?;
        }
        repo.merge(branch, main)?;
        debug!(branch, "Integrated non-feature branch");
        Ok(())
    }

    /// Push `branch` unless the remote already has it. `rewritten`
    /// branches may replace a diverged remote head.
    fn publish<A>(&self, repo: &A, branch: &str, rewritten: bool) -> Result<()>
    where
        A: RepositoryAdapter + ?Sized,
    {
        let tracking = tracking_ref(branch);
        if !repo.ref_exists(&tracking)? {
            return repo.push(branch);
        }

        match repo.ahead_behind(branch, &tracking)?.status() {
            SyncStatus::InSync => Ok(()),
            SyncStatus::Diverged | SyncStatus::Behind if rewritten => repo.force_push(branch),
            _ => repo.push(branch),
        }
    }

    fn note(&self, sweep: &mut Sweep, branch: &str, result: Result<()>) {
        if let Err(error) = result {
            warn!(branch, %error, "Branch failed to sync");
            sweep.failed.push(BranchFailure {
                branch: branch.to_string(),
                error,
            });
            if !self.config.continue_on_error {
                sweep.halted = true;
            }
        }
    }

    /// Delete a branch locally and on the remote, leaving main checked out.
    #[instrument(skip_all, fields(endpoint = %repo.role(), branch = %name))]
    pub fn delete<A>(&self, repo: &A, name: &str) -> Result<OperationTrace>
    where
        A: RepositoryAdapter + ?Sized,
    {
        let mut trace = OperationTrace::start(OperationKind::Delete, Some(name), repo.role());
        let result = self.run_delete(repo, name, &mut trace);
        self.return_to(repo, &self.main_branch());
        self.finish(trace, result)
    }

    fn run_delete<A>(&self, repo: &A, name: &str, trace: &mut OperationTrace) -> Result<()>
    where
        A: RepositoryAdapter + ?Sized,
    {
        if self.classifier.is_main(name) {
            return Err(SyncError::InvalidOperation(format!(
                "cannot delete the main branch {}",
                name
            )));
        }

        let main = self.main_branch();
        if repo.current_branch().ok().as_deref() != Some(main.as_str()) {
            repo.checkout(&main)?;
        }

        let published = self.is_published(repo, name)?;
        repo.delete_local_branch(name)?;
        trace.advance(OperationState::LocalApplied)?;

        if published {
            repo.delete_remote_branch(name)?;
        }
        trace.advance(OperationState::RemoteApplied)?;

        info!(branch = name, published, "Deleted branch");
        trace.advance(OperationState::PeerConverged)?;
        trace.advance(OperationState::Completed)
    }

    /// Whether `name` has a remote counterpart worth deleting.
    fn is_published<A>(&self, repo: &A, name: &str) -> Result<bool>
    where
        A: RepositoryAdapter + ?Sized,
    {
        Ok(repo.ref_exists(&tracking_ref(name))? || repo.upstream(name)?.is_some())
    }

    /// Squash a feature branch into main, publish main and delete the
    /// branch everywhere.
    #[instrument(skip_all, fields(endpoint = %repo.role(), branch = %name))]
    pub fn ship<A>(&self, repo: &A, name: &str, message: &str) -> Result<OperationTrace>
    where
        A: RepositoryAdapter + ?Sized,
    {
        let mut trace = OperationTrace::start(OperationKind::Ship, Some(name), repo.role());
        let initial = match repo.current_branch() {
            Ok(branch) => branch,
            Err(e) => return Err(self.fail(trace, e)),
        };

        let result = self.run_ship(repo, name, message, &mut trace);
        let target = if initial == name && result.is_ok() {
            self.main_branch()
        } else {
            initial
        };
        self.return_to(repo, &target);
        self.finish(trace, result)
    }

    fn run_ship<A>(&self, repo: &A, name: &str, message: &str, trace: &mut OperationTrace) -> Result<()>
    where
        A: RepositoryAdapter + ?Sized,
    {
        if !self.classifier.is_feature(name) {
            return Err(SyncError::NotFeatureBranch(name.to_string()));
        }
        if repo.branch_head(name)?.is_none() {
            return Err(SyncError::NotFound(name.to_string()));
        }

        let main = self.main_branch();
        repo.fetch()?;

        let main_tracking = tracking_ref(&main);
        if repo.ref_exists(&main_tracking)? {
            repo.merge(&main, &main_tracking)?;
        }
        let tracking = tracking_ref(name);
        if repo.ref_exists(&tracking)? {
            repo.merge(name, &tracking)?;
        }
        repo.merge(name, &main)?;

        if repo.ahead_behind(name, &main)?.ahead == 0 {
            return Err(SyncError::InvalidOperation(format!(
                "{} has no changes to ship",
                name
            )));
        }

        let published = self.is_published(repo, name)?;
        let squashed = repo.squash_merge(&main, name, message)?;
        if repo.current_branch().ok().as_deref() == Some(name) {
            repo.checkout(&main)?;
        }
        repo.delete_local_branch(name)?;
        trace.advance(OperationState::LocalApplied)?;

        repo.push(&main)?;
        if published {
            repo.delete_remote_branch(name)?;
        }
        trace.advance(OperationState::RemoteApplied)?;

        info!(branch = name, commit = squashed.short(), "Shipped branch");
        trace.advance(OperationState::PeerConverged)?;
        trace.advance(OperationState::Completed)
    }

    /// Delete every feature branch, local or remote-only. Non-feature
    /// branches and main are kept.
    #[instrument(skip_all, fields(endpoint = %repo.role()))]
    pub fn cleanup<A>(&self, repo: &A) -> Result<CleanupReport>
    where
        A: RepositoryAdapter + ?Sized,
    {
        let mut trace = OperationTrace::start(OperationKind::Cleanup, None, repo.role());
        let initial = match repo.current_branch() {
            Ok(branch) => branch,
            Err(e) => return Err(self.fail(trace, e)),
        };

        let mut report = Removal::default();
        let result = self.run_cleanup(repo, &mut trace, &mut report);
        self.return_to(repo, &initial);
        self.conclude(trace, result, report)
    }

    fn run_cleanup<A>(&self, repo: &A, trace: &mut OperationTrace, report: &mut Removal) -> Result<()>
    where
        A: RepositoryAdapter + ?Sized,
    {
        let main = self.main_branch();
        repo.checkout(&main)?;

        let local = repo.list_local_branches()?;
        let remote: BTreeSet<String> = repo
            .list_remote_branches()?
            .iter()
            .filter_map(|r| strip_tracking(r))
            .map(String::from)
            .collect();

        for name in local.union(&remote) {
            if *name == main {
                continue;
            }
            if !self.classifier.is_feature(name) {
                report.kept.push(name.clone());
                continue;
            }

            let result = self.is_published(repo, name).and_then(|published| {
                repo.delete_local_branch(name)?;
                if published {
                    repo.delete_remote_branch(name)?;
                }
                Ok(())
            });
            report.settle(name, result);
        }

        trace.advance(OperationState::LocalApplied)?;
        trace.advance(OperationState::RemoteApplied)
    }

    /// Fetch, then delete local feature branches whose remote branch is
    /// gone. Branches that were never published are left alone.
    #[instrument(skip_all, fields(endpoint = %repo.role()))]
    pub fn prune<A>(&self, repo: &A) -> Result<CleanupReport>
    where
        A: RepositoryAdapter + ?Sized,
    {
        let mut trace = OperationTrace::start(OperationKind::Prune, None, repo.role());
        let initial = match repo.current_branch() {
            Ok(branch) => branch,
            Err(e) => return Err(self.fail(trace, e)),
        };

        let mut report = Removal::default();
        let result = self.run_prune(repo, &initial, &mut trace, &mut report);
        self.return_to(repo, &initial);
        self.conclude(trace, result, report)
    }

    fn run_prune<A>(
        &self,
        repo: &A,
        initial: &str,
        trace: &mut OperationTrace,
        report: &mut Removal,
    ) -> Result<()>
    where
        A: RepositoryAdapter + ?Sized,
    {
        let main = self.main_branch();
        repo.fetch()?;

        let remote = repo.list_remote_branches()?;
        let mut stale = Vec::new();
        for name in repo.list_local_branches()? {
            if name == main {
                continue;
            }
            let Some(upstream) = repo.upstream(&name)? else {
                continue;
            };
            if remote.contains(&upstream) {
                continue;
            }
            if self.classifier.is_feature(&name) {
                stale.push(name);
            } else {
                report.kept.push(name);
            }
        }

        if stale.iter().any(|b| b == initial) {
            repo.checkout(&main)?;
        }
        for name in &stale {
            report.settle(name, repo.delete_local_branch(name));
        }
        trace.advance(OperationState::LocalApplied)
    }

    /// Check out `branch`, or main if `branch` no longer exists.
    fn return_to<A>(&self, repo: &A, branch: &str)
    where
        A: RepositoryAdapter + ?Sized,
    {
        let target = match repo.branch_head(branch) {
            Ok(Some(_)) => branch.to_string(),
            _ => self.main_branch(),
        };
        if repo.current_branch().ok().as_deref() == Some(target.as_str()) {
            return;
        }
        if let Err(e) = repo.checkout(&target) {
            warn!(branch = %target, error = %e, "Could not restore checkout");
        }
    }

    fn record(&self, trace: &OperationTrace) {
        self.history.lock().push(trace.clone());
    }

    /// Abort `trace`, record it, and hand back the error.
    fn fail(&self, mut trace: OperationTrace, error: SyncError) -> SyncError {
        warn!(kind = %trace.kind, target = ?trace.target, %error, "Operation aborted");
        trace.abort(&error);
        self.record(&trace);
        error
    }

    fn finish(&self, trace: OperationTrace, result: Result<()>) -> Result<OperationTrace> {
        match result {
            Ok(()) => {
                self.record(&trace);
                Ok(trace)
            }
            Err(e) => Err(self.fail(trace, e)),
        }
    }

    fn conclude(
        &self,
        mut trace: OperationTrace,
        result: Result<()>,
        removal: Removal,
    ) -> Result<CleanupReport> {
        if let Err(e) = result {
            return Err(self.fail(trace, e));
        }

        if removal.failed.is_empty() {
            trace.complete()?;
        } else {
            trace.abort(format!("{} branches could not be deleted", removal.failed.len()));
        }
        info!(
            kind = %trace.kind,
            deleted = removal.deleted.len(),
            kept = removal.kept.len(),
            failed = removal.failed.len(),
            "Branch removal finished"
        );
        self.record(&trace);

        Ok(CleanupReport {
            trace,
            deleted: removal.deleted,
            kept: removal.kept,
            failed: removal.failed,
        })
    }
}

/// What a create changed before failing.
#[derive(Default)]
struct Footprint {
    published: bool,
    /// Branch other than the new one that got a commit, with its prior head.
    moved: Option<(String, CommitId)>,
}

/// Progress of a sync sweep.
#[derive(Default)]
struct Sweep {
    synced: Vec<String>,
    failed: Vec<BranchFailure>,
    pending: Vec<String>,
    halted: bool,
}

impl Sweep {
    fn has_failed(&self, branch: &str) -> bool {
        self.failed.iter().any(|f| f.branch == branch)
    }
}

/// Progress of a cleanup or prune sweep.
#[derive(Default)]
struct Removal {
    deleted: Vec<String>,
    kept: Vec<String>,
    failed: Vec<BranchFailure>,
}

impl Removal {
    fn settle(&mut self, branch: &str, result: Result<()>) {
        match result {
            Ok(()) => self.deleted.push(branch.to_string()),
            Err(error) => {
                warn!(branch, %error, "Could not delete branch");
                self.failed.push(BranchFailure {
                    branch: branch.to_string(),
                    error,
                });
            }
        }
    }
}
