//! Git CLI backed repository endpoint.
//!
//! Shells out to `git` in a working copy. Failures are mapped onto the
//! engine's error taxonomy by inspecting git's stderr.

use super::{tracking_ref, RepositoryAdapter};
use crate::error::{Result, SyncError};
use crate::remote::ORIGIN;
use crate::types::{AheadBehind, CommitId, EndpointRole, MergeOutcome};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::{debug, instrument, warn};

/// A working copy driven through the git CLI.
pub struct GitRepository {
    role: EndpointRole,
    path: PathBuf,
}

impl GitRepository {
    /// Open an existing working copy.
    pub fn open(role: EndpointRole, path: impl AsRef<Path>) -> Result<Self> {
        let repo = Self {
            role,
            path: path.as_ref().to_path_buf(),
        };
        repo.run(&["rev-parse", "--git-dir"])?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run git and capture its output without interpreting the exit code.
    fn output(&self, args: &[&str]) -> Result<Output> {
        debug!(?args, path = %self.path.display(), "Running git command");

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;

        Ok(output)
    }

    /// Run git and return trimmed stdout, failing on a non-zero exit.
    fn run(&self, args: &[&str]) -> Result<String> {
        let output = self.output(args)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(classify_failure(args, stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run a git predicate: exit 0 is true, exit 1 is false.
    fn check(&self, args: &[&str]) -> Result<bool> {
        let output = self.output(args)?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                Err(classify_failure(args, stderr))
            }
        }
    }

    fn lines(&self, args: &[&str]) -> Result<BTreeSet<String>> {
        Ok(self
            .run(args)?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    fn resolve(&self, reference: &str) -> Result<Option<CommitId>> {
        for candidate in candidates(reference) {
            let spec = format!("{}^{{commit}}", candidate);
            let output = self.output(&["rev-parse", "--verify", "--quiet", &spec])?;
            if output.status.success() {
                let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
                return Ok(Some(CommitId(id)));
            }
        }
        Ok(None)
    }

    fn require(&self, reference: &str) -> Result<CommitId> {
        self.resolve(reference)?
            .ok_or_else(|| SyncError::NotFound(reference.to_string()))
    }

    fn require_branch(&self, name: &str) -> Result<CommitId> {
        self.resolve(&format!("refs/heads/{}", name))?
            .ok_or_else(|| SyncError::NotFound(name.to_string()))
    }

    /// Checked-out branch, if any.
    fn head_branch(&self) -> Result<Option<String>> {
        let output = self.output(&["symbolic-ref", "--quiet", "--short", "HEAD"])?;
        if output.status.success() {
            Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
        } else {
            Ok(None)
        }
    }

    /// Run `f` with `branch` checked out, then return to where we were.
    fn with_checkout<T>(&self, branch: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let previous = self.head_branch()?;
        if previous.as_deref() != Some(branch) {
            self.run(&["checkout", "-q", branch])?;
        }

        let result = f();

        if let Some(previous) = previous {
            if previous != branch {
                if let Err(e) = self.run(&["checkout", "-q", &previous]) {
                    warn!(branch = %previous, error = %e, "Could not return to branch");
                }
            }
        }

        result
    }

    fn update_branch(&self, name: &str, new_head: &CommitId, old_head: &CommitId) -> Result<()> {
        let refname = format!("refs/heads/{}", name);
        if self.head_branch()?.as_deref() == Some(name) {
            self.run(&["merge", "--ff-only", "-q", new_head.as_str()])?;
        } else {
            self.run(&["update-ref", &refname, new_head.as_str(), old_head.as_str()])?;
        }
        Ok(())
    }
}

impl RepositoryAdapter for GitRepository {
    fn role(&self) -> &EndpointRole {
        &self.role
    }

    fn list_local_branches(&self) -> Result<BTreeSet<String>> {
        self.lines(&["for-each-ref", "--format=%(refname:short)", "refs/heads"])
    }

    fn list_remote_branches(&self) -> Result<BTreeSet<String>> {
        let prefix = format!("refs/remotes/{}", ORIGIN);
        let head = tracking_ref("HEAD");
        Ok(self
            .lines(&["for-each-ref", "--format=%(refname:short)", &prefix])?
            .into_iter()
            .filter(|name| name != &head && name != ORIGIN)
            .collect())
    }

    fn current_branch(&self) -> Result<String> {
        self.head_branch()?.ok_or(SyncError::DetachedOrMissing)
    }

    fn branch_head(&self, name: &str) -> Result<Option<CommitId>> {
        self.resolve(&format!("refs/heads/{}", name))
    }

    fn ref_exists(&self, reference: &str) -> Result<bool> {
        Ok(self.resolve(reference)?.is_some())
    }

    /// Reads the branch configuration, so an upstream whose tracking ref
    /// was pruned is still reported.
    fn upstream(&self, name: &str) -> Result<Option<String>> {
        let refname = format!("refs/heads/{}", name);
        let upstream = self.run(&["for-each-ref", "--format=%(upstream:short)", &refname])?;
        Ok((!upstream.is_empty()).then_some(upstream))
    }

    #[instrument(skip_all, fields(path = %self.path.display(), name = %name, from_ref = %from_ref))]
    fn create_branch(&self, name: &str, from_ref: &str) -> Result<()> {
        if self.branch_head(name)?.is_some() {
            return Err(SyncError::AlreadyExists(name.to_string()));
        }
        let head = self.require(from_ref)?;
        self.run(&["branch", "--no-track", name, head.as_str()])?;
        Ok(())
    }

    #[instrument(skip_all, fields(path = %self.path.display(), name = %name))]
    fn checkout(&self, name: &str) -> Result<()> {
        self.require_branch(name)?;
        self.run(&["checkout", "-q", name])?;
        Ok(())
    }

    #[instrument(skip_all, fields(path = %self.path.display(), target_branch = %target_branch))]
    fn commit(&self, target_branch: &str, message: &str) -> Result<CommitId> {
        let head = self.require_branch(target_branch)?;
        let tree = self.run(&["rev-parse", &format!("{}^{{tree}}", head)])?;
        let id = CommitId(self.run(&["commit-tree", &tree, "-p", head.as_str(), "-m", message])?);

        let refname = format!("refs/heads/{}", target_branch);
        self.run(&["update-ref", &refname, id.as_str(), head.as_str()])?;
        Ok(id)
    }

    #[instrument(skip_all, fields(path = %self.path.display(), name = %name, head = %head))]
    fn reset_branch(&self, name: &str, head: &CommitId) -> Result<()> {
        let current = self.require_branch(name)?;
        if self.head_branch()?.as_deref() == Some(name) {
            self.run(&["reset", "-q", "--hard", head.as_str()])?;
        } else {
            let refname = format!("refs/heads/{}", name);
            self.run(&["update-ref", &refname, head.as_str(), current.as_str()])?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(path = %self.path.display(), name = %name))]
    fn delete_local_branch(&self, name: &str) -> Result<()> {
        if self.branch_head(name)?.is_none() {
            return Ok(());
        }
        if self.head_branch()?.as_deref() == Some(name) {
            return Err(SyncError::InvalidOperation(format!(
                "cannot delete the checked-out branch {}",
                name
            )));
        }
        self.run(&["branch", "-D", name])?;
        Ok(())
    }

    #[instrument(skip_all, fields(path = %self.path.display(), name = %name))]
    fn delete_remote_branch(&self, name: &str) -> Result<()> {
        match self.run(&["push", "-q", ORIGIN, "--delete", name]) {
            Ok(_) => {}
            Err(SyncError::RemoteRejected { reason, .. })
                if reason.contains("remote ref does not exist") =>
            {
                debug!(branch = name, "Remote branch already gone");
                let tracking = format!("refs/remotes/{}", tracking_ref(name));
                let output = self.output(&["update-ref", "-d", &tracking])?;
                if !output.status.success() {
                    warn!(
                        branch = name,
                        stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                        "Could not remove remote-tracking ref"
                    );
                }
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn ahead_behind(&self, a: &str, b: &str) -> Result<AheadBehind> {
        let left = self.require(a)?;
        let right = self.require(b)?;
        let range = format!("{}...{}", left, right);
        let counts = self.run(&["rev-list", "--left-right", "--count", &range])?;
        parse_left_right(&counts)
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn fetch(&self) -> Result<()> {
        self.run(&["fetch", "-q", "--prune", ORIGIN])?;
        Ok(())
    }

    #[instrument(skip_all, fields(path = %self.path.display(), branch = %branch))]
    fn push(&self, branch: &str) -> Result<()> {
        self.require_branch(branch)?;
        self.run(&["push", "-q", "-u", ORIGIN, branch])?;
        Ok(())
    }

    #[instrument(skip_all, fields(path = %self.path.display(), branch = %branch))]
    fn force_push(&self, branch: &str) -> Result<()> {
        self.require_branch(branch)?;
        self.run(&["push", "-q", "-u", "--force-with-lease", ORIGIN, branch])?;
        Ok(())
    }

    fn pull(&self, branch: &str) -> Result<MergeOutcome> {
        self.fetch()?;
        let upstream = tracking_ref(branch);
        if !self.ref_exists(&upstream)? {
            return Err(SyncError::NotFound(upstream));
        }
        self.merge(branch, &upstream)
    }

    #[instrument(skip_all, fields(path = %self.path.display(), into = %into, from_ref = %from_ref))]
    fn merge(&self, into: &str, from_ref: &str) -> Result<MergeOutcome> {
        let into_head = self.require_branch(into)?;
        let from_head = self.require(from_ref)?;

        if self.check(&["merge-base", "--is-ancestor", from_head.as_str(), into_head.as_str()])? {
            return Ok(MergeOutcome::UpToDate);
        }

        if self.check(&["merge-base", "--is-ancestor", into_head.as_str(), from_head.as_str()])? {
            self.update_branch(into, &from_head, &into_head)?;
            return Ok(MergeOutcome::FastForward(from_head));
        }

        let message = format!("Merge {} into {}", from_ref, into);
        self.with_checkout(into, || {
            if self
                .run(&["merge", "-q", "--no-ff", "-m", &message, from_head.as_str()])
                .is_err()
            {
                match self.output(&["merge", "--abort"]) {
                    Ok(output) if output.status.success() => {}
                    _ => warn!(into, "Could not abort failed merge"),
                }
                return Err(SyncError::MergeConflict {
                    into: into.to_string(),
                    from: from_ref.to_string(),
                });
            }
            Ok(MergeOutcome::Merged(self.require("HEAD")?))
        })
    }

    #[instrument(skip_all, fields(path = %self.path.display(), branch = %branch, onto = %onto))]
    fn rebase(&self, branch: &str, onto: &str) -> Result<()> {
        self.require_branch(branch)?;
        let onto_head = self.require(onto)?;
        let previous = self.head_branch()?;

        if self.run(&["rebase", "-q", onto_head.as_str(), branch]).is_err() {
            let _ = self.output(&["rebase", "--abort"]);
            return Err(SyncError::MergeConflict {
                into: branch.to_string(),
                from: onto.to_string(),
            });
        }

        // rebase leaves `branch` checked out
        if let Some(previous) = previous {
            if previous != branch {
                self.run(&["checkout", "-q", &previous])?;
            }
        }
        Ok(())
    }

    #[instrument(skip_all, fields(path = %self.path.display(), into = %into, from = %from))]
    fn squash_merge(&self, into: &str, from: &str, message: &str) -> Result<CommitId> {
        self.require_branch(into)?;
        let from_head = self.require(from)?;

        self.with_checkout(into, || {
            if self.run(&["merge", "-q", "--squash", from_head.as_str()]).is_err() {
                let _ = self.output(&["reset", "-q", "--merge"]);
                return Err(SyncError::MergeConflict {
                    into: into.to_string(),
                    from: from.to_string(),
                });
            }
            self.run(&["commit", "-q", "--allow-empty", "-m", message])?;
            self.require("HEAD")
        })
    }
}

/// Full ref names to try for `reference`, most specific first, so branch
/// names win over same-named tags or abbreviated object names.
fn candidates(reference: &str) -> Vec<String> {
    if reference.starts_with("refs/") || reference == "HEAD" {
        vec![reference.to_string()]
    } else if super::strip_tracking(reference).is_some() {
        vec![format!("refs/remotes/{}", reference)]
    } else {
        vec![format!("refs/heads/{}", reference), reference.to_string()]
    }
}

/// Parse `rev-list --left-right --count` output.
fn parse_left_right(output: &str) -> Result<AheadBehind> {
    let mut parts = output.split_whitespace();
    let mut next = || -> Result<usize> {
        parts
            .next()
            .ok_or_else(|| SyncError::Deserialization(format!("rev-list output: {:?}", output)))?
            .parse::<usize>()
            .map_err(|e| SyncError::Deserialization(format!("rev-list count: {}", e)))
    };
    let ahead = next()?;
    let behind = next()?;
    Ok(AheadBehind::new(ahead, behind))
}

/// Map a failed git invocation onto the error taxonomy.
fn classify_failure(args: &[&str], stderr: String) -> SyncError {
    let command = args.first().copied().unwrap_or("").to_string();
    let lower = stderr.to_lowercase();

    if lower.contains("could not read from remote")
        || lower.contains("unable to access")
        || lower.contains("does not appear to be a git repository")
        || lower.contains("could not resolve host")
    {
        return SyncError::NetworkUnavailable(stderr);
    }

    if command == "push"
        && (lower.contains("rejected")
            || lower.contains("failed to push")
            || lower.contains("remote ref does not exist"))
    {
        let branch = args.last().copied().unwrap_or("").to_string();
        return SyncError::RemoteRejected {
            branch,
            reason: stderr,
        };
    }

    if lower.contains("already exists") {
        let name = args.iter().rev().nth(1).copied().unwrap_or("").to_string();
        return SyncError::AlreadyExists(name);
    }

    if lower.contains("did not match any") || lower.contains("not a valid") {
        return SyncError::NotFound(args.last().copied().unwrap_or("").to_string());
    }

    SyncError::Backend { command, stderr }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_left_right() {
        assert_eq!(parse_left_right("3\t1\n").unwrap(), AheadBehind::new(3, 1));
        assert_eq!(parse_left_right("0 0").unwrap(), AheadBehind::new(0, 0));
        assert!(parse_left_right("").is_err());
        assert!(parse_left_right("x 1").is_err());
    }

    #[test]
    fn test_candidates() {
        assert_eq!(candidates("main"), vec!["refs/heads/main", "main"]);
        assert_eq!(candidates("origin/main"), vec!["refs/remotes/origin/main"]);
        assert_eq!(candidates("HEAD"), vec!["HEAD"]);
        assert_eq!(candidates("refs/tags/v1"), vec!["refs/tags/v1"]);
    }

    #[test]
    fn test_classify_failure() {
        let err = classify_failure(
            &["push", "-q", "origin", "feature"],
            "! [rejected] feature -> feature (non-fast-forward)".to_string(),
        );
        assert!(err.is_rejection());

        let err = classify_failure(
            &["fetch", "-q", "--prune", "origin"],
            "fatal: Could not read from remote repository.".to_string(),
        );
        assert!(err.is_network());

        let err = classify_failure(&["status"], "fatal: something odd".to_string());
        assert!(matches!(err, SyncError::Backend { .. }));
    }
}
