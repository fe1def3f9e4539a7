#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::core::exec::{CommandExecutor, CommandOutput, ExecError};
use crate::core::status::{GitStatus, WorktreeState, determine_worktree_state};
use crate::error::TwiggitError;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    /// Empty when `detached` is set; check the flag, not the string.
    pub branch: String,
    pub commit: String,
    pub detached: bool,
    /// Only meaningful after a status query; `list_worktrees` leaves it `false`.
    pub clean: bool,
    pub state: WorktreeState,
    pub locked: bool,
    pub prunable: bool,
}

impl WorktreeInfo {
    pub fn validate(&self) -> Result<(), TwiggitError> {
        if self.path.as_os_str().is_empty() {
            return Err(TwiggitError::GitExecution {
                command: "worktree list".to_owned(),
                message: "worktree entry without a path".to_owned(),
            });
        }
        if self.branch.is_empty() && !self.detached {
            return Err(TwiggitError::GitExecution {
                command: "worktree list".to_owned(),
                message: format!("worktree {} has no branch", self.path.display()),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn display_branch(&self) -> &str {
        if self.detached {
            "(detached)"
        } else {
            &self.branch
        }
    }
}

/// `.git` may be a directory (main checkout) or a gitlink file (worktree).
pub fn is_git_repository(path: &Path) -> Result<bool, TwiggitError> {
    let candidate = path.join(".git");
    match std::fs::symlink_metadata(&candidate) {
        Ok(meta) => Ok(meta.is_dir() || meta.is_file() || candidate.exists()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(TwiggitError::IoPath {
            path: candidate,
            source: e,
        }),
    }
}

/// Wraps the git command line. Every call is a single attempt bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct GitWorktreeAdapter {
    executor: Arc<dyn CommandExecutor>,
    timeout: Duration,
}

impl GitWorktreeAdapter {
    #[must_use]
    pub fn new(executor: Arc<dyn CommandExecutor>, timeout: Duration) -> Self {
        Self { executor, timeout }
    }

    pub fn list_worktrees(&self, repo: &Path) -> Result<Vec<WorktreeInfo>, TwiggitError> {
        let out = self.run(repo, &["worktree", "list", "--porcelain"])?;
        let entries = parse_worktree_porcelain(&out);
        for entry in &entries {
            entry.validate()?;
        }
        Ok(entries)
    }

    pub fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool, TwiggitError> {
        let refname = format!("refs/heads/{branch}");
        let args = ["show-ref", "--verify", "--quiet", refname.as_str()];
        let out = self.run_raw(repo, &args)?;
        match out.exit_code {
            0 => Ok(true),
            1 => Ok(false),
            _ => Err(execution_error(&args, &out)),
        }
    }

    /// True when `rev` names a commit: local branches, remote refs and hashes all count.
    pub fn revision_exists(&self, repo: &Path, rev: &str) -> Result<bool, TwiggitError> {
        let spec = format!("{rev}^{{commit}}");
        let args = ["rev-parse", "--verify", "--quiet", spec.as_str()];
        let out = self.run_raw(repo, &args)?;
        match out.exit_code {
            0 => Ok(true),
            1 => Ok(false),
            _ => Err(execution_error(&args, &out)),
        }
    }

    /// Branch checked out in `dir`, or `None` when HEAD is detached.
    pub fn current_branch(&self, dir: &Path) -> Result<Option<String>, TwiggitError> {
        let args = ["symbolic-ref", "--quiet", "--short", "HEAD"];
        let out = self.run_raw(dir, &args)?;
        match out.exit_code {
            0 => Ok(Some(out.stdout.trim().to_owned())),
            1 => Ok(None),
            _ => Err(execution_error(&args, &out)),
        }
    }

    /// The configured branch if it exists, else `main`, else `master`, else whatever
    /// the main checkout has checked out.
    pub fn default_branch(&self, repo: &Path, configured: &str) -> Result<String, TwiggitError> {
        for candidate in [configured, "main", "master"] {
            if !candidate.is_empty() && self.branch_exists(repo, candidate)? {
                return Ok(candidate.to_owned());
            }
        }
        Ok(self
            .current_branch(repo)?
            .unwrap_or_else(|| configured.to_owned()))
    }

    pub fn create_worktree(
        &self,
        repo: &Path,
        branch: &str,
        target: &Path,
        source: Option<&str>,
    ) -> Result<(), TwiggitError> {
        for wt in self.list_worktrees(repo)? {
            if same_path(&wt.path, target) || (!wt.detached && wt.branch == branch) {
                return Err(TwiggitError::BranchExistsAsWorktree {
                    branch: branch.to_owned(),
                    path: wt.path,
                });
            }
        }

        let target_str = target.to_string_lossy().into_owned();
        let target_str = target_str.as_str();
        let args: Vec<&str> = if self.branch_exists(repo, branch)? {
            vec!["worktree", "add", target_str, branch]
        } else if let Some(source) = source {
            if !self.revision_exists(repo, source)? {
                return Err(TwiggitError::SourceBranchNotFound {
                    project: repo_name(repo),
                    branch: source.to_owned(),
                });
            }
            vec!["worktree", "add", "-b", branch, target_str, source]
        } else {
            vec!["worktree", "add", "-b", branch, target_str]
        };

        let out = self.run_raw(repo, &args)?;
        if out.success() {
            log::info!("created worktree {} for branch {branch}", target.display());
            return Ok(());
        }
        let stderr = out.stderr.to_lowercase();
        if stderr.contains("is not a valid branch name") {
            return Err(TwiggitError::InvalidBranchName(branch.to_owned()));
        }
        if stderr.contains("invalid reference") || stderr.contains("not a valid object name") {
            return Err(TwiggitError::SourceBranchNotFound {
                project: repo_name(repo),
                branch: source.unwrap_or(branch).to_owned(),
            });
        }
        if stderr.contains("already checked out") || stderr.contains("is already used by worktree")
        {
            return Err(TwiggitError::BranchExistsAsWorktree {
                branch: branch.to_owned(),
                path: target.to_path_buf(),
            });
        }
        if stderr.contains("already exists") {
            return Err(TwiggitError::WorktreeAlreadyExists(target.to_path_buf()));
        }
        Err(execution_error(&args, &out))
    }

    /// `idempotent` turns "not a working tree" into success for cleanup paths.
    pub fn remove_worktree(
        &self,
        repo: &Path,
        worktree: &Path,
        force: bool,
        idempotent: bool,
    ) -> Result<(), TwiggitError> {
        let path = worktree.to_string_lossy().into_owned();
        let args: Vec<&str> = if force {
            vec!["worktree", "remove", "--force", path.as_str()]
        } else {
            vec!["worktree", "remove", path.as_str()]
        };
        let out = self.run_raw(repo, &args)?;
        if out.success() {
            log::info!("removed worktree {}", worktree.display());
            return Ok(());
        }
        let stderr = out.stderr.to_lowercase();
        if stderr.contains("contains modified or untracked files")
            || stderr.contains("use --force to delete it")
        {
            return Err(TwiggitError::UncommittedChanges(worktree.to_path_buf()));
        }
        if stderr.contains("is not a working tree") || stderr.contains("is not a worktree") {
            if idempotent {
                log::debug!(
                    "worktree {} already gone; treating as removed",
                    worktree.display()
                );
                return Ok(());
            }
            return Err(TwiggitError::WorktreeNotFound(
                worktree.display().to_string(),
            ));
        }
        Err(execution_error(&args, &out))
    }

    /// Drops registrations whose directories no longer exist.
    pub fn prune_worktree_metadata(&self, repo: &Path) -> Result<(), TwiggitError> {
        self.run(repo, &["worktree", "prune"])?;
        Ok(())
    }

    pub fn get_worktree_status(&self, worktree: &Path) -> Result<WorktreeInfo, TwiggitError> {
        let commit = self.run(worktree, &["rev-parse", "HEAD"])?.trim().to_owned();
        let branch = self.current_branch(worktree)?;
        let porcelain = self.run(worktree, &["status", "--porcelain"])?;
        let gs = GitStatus::from_porcelain(&porcelain);
        Ok(WorktreeInfo {
            path: worktree.to_path_buf(),
            detached: branch.is_none(),
            branch: branch.unwrap_or_default(),
            commit,
            clean: gs.is_clean(),
            state: determine_worktree_state(&gs),
            locked: false,
            prunable: false,
        })
    }

    /// `git merge-base --is-ancestor`: exit 0 is merged, 1 is not, anything else fails.
    pub fn is_branch_merged(
        &self,
        repo: &Path,
        branch: &str,
        into: &str,
    ) -> Result<bool, TwiggitError> {
        let args = ["merge-base", "--is-ancestor", branch, into];
        let out = self.run_raw(repo, &args)?;
        match out.exit_code {
            0 => Ok(true),
            1 => Ok(false),
            _ => Err(execution_error(&args, &out)),
        }
    }

    pub fn delete_branch(&self, repo: &Path, branch: &str, force: bool) -> Result<(), TwiggitError> {
        let flag = if force { "-D" } else { "-d" };
        let args = ["branch", flag, branch];
        let out = self.run_raw(repo, &args)?;
        if out.success() {
            log::info!("deleted branch {branch}");
            return Ok(());
        }
        if out.stderr.contains("not fully merged") {
            return Err(TwiggitError::BranchNotMerged {
                branch: branch.to_owned(),
                into: "HEAD".to_owned(),
            });
        }
        Err(execution_error(&args, &out))
    }

    pub fn run(&self, dir: &Path, args: &[&str]) -> Result<String, TwiggitError> {
        let out = self.run_raw(dir, args)?;
        if out.success() {
            Ok(out.stdout)
        } else {
            Err(execution_error(args, &out))
        }
    }

    pub fn run_raw(&self, dir: &Path, args: &[&str]) -> Result<CommandOutput, TwiggitError> {
        self.executor
            .execute(dir, "git", args, self.timeout)
            .map_err(|e| match e {
                ExecError::NotFound(_) => TwiggitError::GitNotFound,
                ExecError::Timeout(timeout) => TwiggitError::GitTimeout {
                    command: args.join(" "),
                    timeout,
                },
                ExecError::Io(e) => TwiggitError::GitExecution {
                    command: args.join(" "),
                    message: e.to_string(),
                },
            })
    }
}

fn execution_error(args: &[&str], out: &CommandOutput) -> TwiggitError {
    let message = sanitize_git_message(&out.stderr)
        .unwrap_or_else(|| format!("exited with status {}", out.exit_code));
    TwiggitError::GitExecution {
        command: args.join(" "),
        message,
    }
}

/// First meaningful stderr line with git's `fatal:`/`error:` style prefixes removed.
#[must_use]
pub fn sanitize_git_message(stderr: &str) -> Option<String> {
    const PREFIXES: &[&str] = &["fatal:", "error:", "usage:", "warning:", "hint:"];
    stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| !l.starts_with("hint:"))
        .map(|line| {
            let mut rest = line;
            while let Some(p) = PREFIXES.iter().find(|p| rest.starts_with(**p)) {
                rest = rest[p.len()..].trim_start();
            }
            rest.to_owned()
        })
        .find(|l| !l.is_empty())
}

fn repo_name(repo: &Path) -> String {
    repo.file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("repository")
        .to_owned()
}

/// Compares two paths after resolving symlinks where possible.
#[must_use]
pub fn same_path(a: &Path, b: &Path) -> bool {
    normalize_path(a) == normalize_path(b)
}

#[must_use]
pub fn normalize_path(p: &Path) -> PathBuf {
    std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf())
}

fn parse_worktree_porcelain(out: &str) -> Vec<WorktreeInfo> {
    let mut entries: Vec<WorktreeInfo> = Vec::new();
    let mut cur: Option<WorktreeInfo> = None;

    for line in out.lines() {
        let line = line.trim_end();
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(done) = cur.take() {
                entries.push(done);
            }
            cur = Some(WorktreeInfo {
                path: PathBuf::from(path),
                branch: String::new(),
                commit: String::new(),
                detached: false,
                clean: false,
                state: WorktreeState::Unknown,
                locked: false,
                prunable: false,
            });
            continue;
        }
        let Some(entry) = cur.as_mut() else {
            continue;
        };
        if let Some(branch) = line.strip_prefix("branch ") {
            branch
                .trim()
                .trim_start_matches("refs/heads/")
                .clone_into(&mut entry.branch);
        } else if let Some(head) = line.strip_prefix("HEAD ") {
            head.trim().clone_into(&mut entry.commit);
        } else if line == "detached" {
            entry.detached = true;
        } else if line == "locked" || line.starts_with("locked ") {
            entry.locked = true;
        } else if line == "prunable" || line.starts_with("prunable ") {
            entry.prunable = true;
        }
    }
    if let Some(done) = cur.take() {
        entries.push(done);
    }

    // Bare repositories list a `bare` entry with neither branch nor HEAD.
    entries.retain(|e| !(e.branch.is_empty() && !e.detached && e.commit.is_empty()));
    entries
}
