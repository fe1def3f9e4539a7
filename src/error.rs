#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TwiggitError {
    #[error("git is required but was not found in PATH")]
    GitNotFound,

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid branch name '{name}': {reason}")]
    InvalidBranchFormat { name: String, reason: String },

    #[error("git rejected branch name '{0}'")]
    InvalidBranchName(String),

    #[error("project '{0}' not found")]
    ProjectNotFound(String),

    #[error("worktree not found: {0}")]
    WorktreeNotFound(String),

    #[error("worktree already exists at {}", .0.display())]
    WorktreeAlreadyExists(PathBuf),

    #[error("branch '{branch}' is already checked out at {}", .path.display())]
    BranchExistsAsWorktree { branch: String, path: PathBuf },

    #[error("source branch '{branch}' not found in project '{project}'")]
    SourceBranchNotFound { project: String, branch: String },

    #[error("branch '{branch}' is not merged into '{into}'")]
    BranchNotMerged { branch: String, into: String },

    #[error("worktree at {} has uncommitted changes", .0.display())]
    UncommittedChanges(PathBuf),

    #[error("refusing to delete {0}")]
    ProtectedResource(String),

    #[error("'{spec}' is ambiguous: it matches {}", .candidates.join(", "))]
    AmbiguousTarget {
        spec: String,
        candidates: Vec<String>,
    },

    #[error("cannot infer a project for '{spec}' outside a managed project")]
    CannotInferProject {
        spec: String,
        /// The single `project/branch` the spec could have meant.
        candidate: Option<String>,
    },

    #[error("not inside a managed project or worktree")]
    NoTarget { available: Vec<String> },

    #[error("failed to detect context at {}: {msg}", .path.display())]
    ContextDetection { path: PathBuf, msg: String },

    #[error("git {command} timed out after {}s", .timeout.as_secs())]
    GitTimeout { command: String, timeout: Duration },

    #[error("git {command} failed: {message}")]
    GitExecution { command: String, message: String },

    #[error("prune cancelled")]
    PruneCancelled,

    #[error("failed to read confirmation: {0}")]
    Prompt(#[source] std::io::Error),

    #[error("io error at {path}: {source}")]
    IoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TwiggitError {
    pub fn cannot_infer(spec: impl Into<String>) -> Self {
        Self::CannotInferProject {
            spec: spec.into(),
            candidate: None,
        }
    }

    /// One actionable line shown under the error, for the kinds that have one.
    #[must_use]
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::InvalidBranchFormat { .. } | Self::InvalidBranchName(_) => Some(
                "branch names follow git ref rules: no spaces, '..', '~', '^', ':' or a trailing '.lock'"
                    .to_owned(),
            ),
            Self::ProjectNotFound(_) => {
                Some("run `twiggit list --all` to see the registered projects".to_owned())
            }
            Self::WorktreeNotFound(_) => {
                Some("run `twiggit list` to see the existing worktrees".to_owned())
            }
            Self::UncommittedChanges(_) => {
                Some("commit or stash the changes, or pass --force to discard them".to_owned())
            }
            Self::BranchNotMerged { .. } => {
                Some("merge the branch first, or drop --merged-only".to_owned())
            }
            Self::AmbiguousTarget { .. } => {
                Some("use `project/branch` to disambiguate".to_owned())
            }
            Self::CannotInferProject {
                candidate: Some(c), ..
            } => Some(format!("did you mean `{c}`?")),
            Self::CannotInferProject { candidate: None, .. } => Some(
                "use `project/branch` to name the project, or `--all` to list across projects"
                    .to_owned(),
            ),
            Self::NoTarget { available } => {
                if available.is_empty() {
                    Some("no projects found; check `projects_dir` in the config".to_owned())
                } else {
                    Some(format!("Available targets: {}", available.join(", ")))
                }
            }
            Self::ProtectedResource(_) => Some(
                "use --change-dir to leave the current worktree, or delete a non-main worktree"
                    .to_owned(),
            ),
            Self::GitTimeout { .. } => {
                Some("raise `git.cli_timeout` in the config if the repository is large".to_owned())
            }
            _ => None,
        }
    }
}
