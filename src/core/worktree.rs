#![forbid(unsafe_code)]

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::context::Context;
use crate::core::git::{GitWorktreeAdapter, WorktreeInfo, same_path};
use crate::core::naming::{validate_branch_name, worktree_path};
use crate::core::registry::{Project, ProjectRegistry};
use crate::core::status::WorktreeState;
use crate::core::target::ResolvedTarget;
use crate::error::TwiggitError;

#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    pub default_source_branch: String,
    pub protected_branches: Vec<String>,
    /// `Some(n)` runs cross-project prune batches on at most `n` workers.
    pub max_concurrent: Option<usize>,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            default_source_branch: "main".to_owned(),
            protected_branches: vec!["main".to_owned(), "master".to_owned()],
            max_concurrent: None,
        }
    }
}

#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    pub force: bool,
    pub keep_branch: bool,
    pub merged_only: bool,
    pub change_dir: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum BranchOutcome {
    Deleted,
    Kept,
    /// Git refused the branch delete; the worktree itself is already gone.
    Refused(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub removed: PathBuf,
    pub branch: BranchOutcome,
    /// Where the caller should go next, when it was standing in the removed worktree.
    pub navigation: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Name,
    Date,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListedWorktree {
    pub project: String,
    #[serde(flatten)]
    pub info: WorktreeInfo,
    pub is_main: bool,
    pub modified: Option<String>,
    #[serde(skip)]
    pub modified_at: Option<SystemTime>,
}

/// The filesystem layout and git's registrations disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Inconsistency {
    /// A gitlinked directory under `worktrees_dir/<project>` git does not know about.
    Unregistered { project: String, path: PathBuf },
    /// Git lists a worktree whose directory is gone.
    Missing { project: String, path: PathBuf },
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unregistered { project, path } => write!(
                f,
                "{} is not registered as a worktree of '{project}'",
                path.display()
            ),
            Self::Missing { project, path } => write!(
                f,
                "'{project}' lists worktree {} but the directory is missing",
                path.display()
            ),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ListReport {
    pub worktrees: Vec<ListedWorktree>,
    pub inconsistencies: Vec<Inconsistency>,
}

/// Creates, deletes, lists and prunes worktrees under `worktrees_dir/<project>/<branch>`.
#[derive(Debug, Clone)]
pub struct WorktreeLifecycleManager {
    registry: ProjectRegistry,
    git: GitWorktreeAdapter,
    worktrees_dir: PathBuf,
    opts: LifecycleOptions,
}

impl WorktreeLifecycleManager {
    #[must_use]
    pub fn new(
        registry: ProjectRegistry,
        git: GitWorktreeAdapter,
        worktrees_dir: PathBuf,
        opts: LifecycleOptions,
    ) -> Self {
        Self {
            registry,
            git,
            worktrees_dir,
            opts,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ProjectRegistry {
        &self.registry
    }

    #[must_use]
    pub fn git(&self) -> &GitWorktreeAdapter {
        &self.git
    }

    #[must_use]
    pub fn worktrees_dir(&self) -> &Path {
        &self.worktrees_dir
    }

    #[must_use]
    pub fn options(&self) -> &LifecycleOptions {
        &self.opts
    }

    #[must_use]
    pub fn project_worktrees_dir(&self, project: &Project) -> PathBuf {
        self.worktrees_dir.join(&project.name)
    }

    #[must_use]
    pub fn is_protected(&self, branch: &str) -> bool {
        self.opts.protected_branches.iter().any(|b| b == branch)
    }

    fn is_main_token(&self, branch: &str) -> bool {
        branch == "main" || branch == self.opts.default_source_branch
    }

    fn check_not_protected(&self, branch: &str) -> Result<(), TwiggitError> {
        if self.is_protected(branch) {
            return Err(TwiggitError::ProtectedResource(format!(
                "protected branch '{branch}'"
            )));
        }
        Ok(())
    }

    pub fn default_branch(&self, project: &Project) -> Result<String, TwiggitError> {
        self.git
            .default_branch(&project.path, &self.opts.default_source_branch)
    }

    pub fn create(
        &self,
        project: &Project,
        branch: &str,
        source: Option<&str>,
    ) -> Result<WorktreeInfo, TwiggitError> {
        validate_branch_name(branch)?;

        let target = worktree_path(&self.worktrees_dir, &project.name, branch);
        if target.exists() {
            return Err(TwiggitError::WorktreeAlreadyExists(target));
        }

        let source = match source {
            Some(explicit) => {
                if !self.git.revision_exists(&project.path, explicit)? {
                    return Err(TwiggitError::SourceBranchNotFound {
                        project: project.name.clone(),
                        branch: explicit.to_owned(),
                    });
                }
                Some(explicit.to_owned())
            }
            None => self.implicit_source(project)?,
        };

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TwiggitError::IoPath {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        if let Err(e) = self
            .git
            .create_worktree(&project.path, branch, &target, source.as_deref())
        {
            if let Some(parent) = target.parent() {
                remove_empty_dirs(parent, &self.worktrees_dir);
            }
            return Err(e);
        }
        log::debug!(
            "created {} from {}",
            target.display(),
            source.as_deref().unwrap_or("HEAD")
        );

        self.git.get_worktree_status(&target)
    }

    fn implicit_source(&self, project: &Project) -> Result<Option<String>, TwiggitError> {
        let branch = self.default_branch(project)?;
        if self.git.revision_exists(&project.path, &branch)? {
            return Ok(Some(branch));
        }
        log::debug!(
            "default branch '{branch}' of '{}' has no commit; creating from HEAD",
            project.name
        );
        Ok(None)
    }

    /// Removes the worktree at `target.path`. The branch that goes with it is whatever
    /// that worktree has checked out now, which may differ from the name it was created under.
    pub fn delete(
        &self,
        target: &ResolvedTarget,
        opts: DeleteOptions,
        context: &Context,
    ) -> Result<DeleteOutcome, TwiggitError> {
        let project = &target.project;
        if target.is_main_checkout
            || self.is_main_token(&target.branch)
            || same_path(&target.path, &project.path)
        {
            return Err(TwiggitError::ProtectedResource(format!(
                "the main checkout of project '{}'",
                project.name
            )));
        }
        self.check_not_protected(&target.branch)?;

        let path = target.path.clone();
        if !path.exists() {
            return Err(TwiggitError::WorktreeNotFound(format!(
                "{}/{}",
                project.name, target.branch
            )));
        }

        let standing_in = matches!(
            context,
            Context::InWorktree { path: here, .. } if same_path(here, &path)
        );
        if standing_in && !opts.change_dir {
            return Err(TwiggitError::ProtectedResource(format!(
                "the worktree you are standing in ({})",
                path.display()
            )));
        }

        // Detached worktrees have no branch of their own to merge-check or delete.
        let live = self.git.current_branch(&path)?;
        if let Some(branch) = &live {
            self.check_not_protected(branch)?;
        }

        if !opts.force {
            let status = self.git.get_worktree_status(&path)?;
            if !status.clean {
                return Err(TwiggitError::UncommittedChanges(path));
            }
        }

        let branch = live.as_deref().unwrap_or(target.branch.as_str());
        if opts.merged_only {
            let into = self.default_branch(project)?;
            if live.is_none() || !self.git.is_branch_merged(&project.path, branch, &into)? {
                return Err(TwiggitError::BranchNotMerged {
                    branch: branch.to_owned(),
                    into,
                });
            }
        }

        let branch_outcome = self.remove_worktree_and_branch(
            project,
            branch,
            &path,
            opts.force,
            opts.keep_branch || live.is_none(),
            false,
        )?;

        let navigation = (opts.change_dir && standing_in).then(|| project.path.clone());
        Ok(DeleteOutcome {
            removed: path,
            branch: branch_outcome,
            navigation,
        })
    }

    /// Shared tail of `delete` and `prune`. A refused branch delete never fails the call.
    pub(crate) fn remove_worktree_and_branch(
        &self,
        project: &Project,
        branch: &str,
        path: &Path,
        force: bool,
        keep_branch: bool,
        idempotent: bool,
    ) -> Result<BranchOutcome, TwiggitError> {
        self.git
            .remove_worktree(&project.path, path, force, idempotent)?;
        if let Some(parent) = path.parent() {
            remove_empty_dirs(parent, &self.project_worktrees_dir(project));
        }

        if keep_branch {
            return Ok(BranchOutcome::Kept);
        }
        match self.git.delete_branch(&project.path, branch, force) {
            Ok(()) => Ok(BranchOutcome::Deleted),
            Err(e) => {
                log::warn!("kept branch '{branch}' of '{}': {e}", project.name);
                Ok(BranchOutcome::Refused(e.to_string()))
            }
        }
    }

    pub fn list(&self, projects: &[Project], sort: SortKey) -> Result<ListReport, TwiggitError> {
        let mut report = ListReport::default();
        for project in projects {
            let registered = self.git.list_worktrees(&project.path)?;
            report
                .inconsistencies
                .extend(self.check_consistency(project, &registered));

            for info in registered {
                let is_main = same_path(&info.path, &project.path);
                let info = self.with_status(info);
                let modified_at = std::fs::metadata(&info.path)
                    .and_then(|m| m.modified())
                    .ok();
                report.worktrees.push(ListedWorktree {
                    project: project.name.clone(),
                    is_main,
                    modified: modified_at.and_then(system_time_to_rfc3339),
                    modified_at,
                    info,
                });
            }
        }

        match sort {
            SortKey::Name => report.worktrees.sort_by(|a, b| {
                a.project
                    .cmp(&b.project)
                    .then_with(|| b.is_main.cmp(&a.is_main))
                    .then_with(|| a.info.branch.cmp(&b.info.branch))
            }),
            SortKey::Date => report
                .worktrees
                .sort_by(|a, b| b.modified_at.cmp(&a.modified_at)),
        }
        Ok(report)
    }

    fn with_status(&self, mut info: WorktreeInfo) -> WorktreeInfo {
        if !info.path.is_dir() {
            info.prunable = true;
            info.state = WorktreeState::Unknown;
            return info;
        }
        match self.git.get_worktree_status(&info.path) {
            Ok(status) => {
                info.clean = status.clean;
                info.state = status.state;
            }
            Err(e) => {
                log::warn!("failed to read status of {}: {e}", info.path.display());
                info.state = WorktreeState::Unknown;
            }
        }
        info
    }

    /// Compares `worktrees_dir/<project>` with what git has registered.
    #[must_use]
    pub fn check_consistency(
        &self,
        project: &Project,
        registered: &[WorktreeInfo],
    ) -> Vec<Inconsistency> {
        let base = self.project_worktrees_dir(project);
        let mut out = Vec::new();

        for dir in find_gitlinked_dirs(&base) {
            if !registered.iter().any(|wt| same_path(&wt.path, &dir)) {
                out.push(Inconsistency::Unregistered {
                    project: project.name.clone(),
                    path: dir,
                });
            }
        }

        let base_norm = crate::core::git::normalize_path(&base);
        for wt in registered {
            let under_base = wt.path.starts_with(&base) || wt.path.starts_with(&base_norm);
            if under_base && !wt.path.exists() {
                out.push(Inconsistency::Missing {
                    project: project.name.clone(),
                    path: wt.path.clone(),
                });
            }
        }
        out
    }
}

/// Directories below `base` carrying a `.git` gitlink file; their contents are not walked.
fn find_gitlinked_dirs(base: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![base.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            if path.join(".git").is_file() {
                found.push(path);
            } else {
                stack.push(path);
            }
        }
    }
    found.sort();
    found
}

/// Removes `start` and its ancestors while they are empty, stopping below `stop`.
fn remove_empty_dirs(start: &Path, stop: &Path) {
    let mut cur = Some(start);
    while let Some(dir) = cur {
        if !dir.starts_with(stop) || dir == stop {
            break;
        }
        if std::fs::remove_dir(dir).is_err() {
            break;
        }
        cur = dir.parent();
    }
}

fn system_time_to_rfc3339(t: SystemTime) -> Option<String> {
    let dt = OffsetDateTime::from(t);
    dt.format(&Rfc3339).ok()
}
