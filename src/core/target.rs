#![forbid(unsafe_code)]

use std::path::PathBuf;

use serde::Serialize;

use crate::core::context::Context;
use crate::core::git::GitWorktreeAdapter;
use crate::core::naming::{escapes_project_dir, worktree_path};
use crate::core::registry::{Project, ProjectRegistry};
use crate::error::TwiggitError;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub project: Project,
    pub branch: String,
    pub path: PathBuf,
    pub is_main_checkout: bool,
}

/// How a target string was interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Empty spec, taken from the caller's context.
    FromContext(ResolvedTarget),
    AsBranch(ResolvedTarget),
    AsProject(ResolvedTarget),
    /// Empty spec outside any managed project.
    Unresolved,
}

impl Resolution {
    #[must_use]
    pub fn into_target(self) -> Option<ResolvedTarget> {
        match self {
            Self::FromContext(t) | Self::AsBranch(t) | Self::AsProject(t) => Some(t),
            Self::Unresolved => None,
        }
    }
}

/// Turns `""`, `branch`, `project/branch` or `project` into a concrete target.
///
/// Never mutates anything, so it is safe to call before a confirmation prompt.
#[derive(Debug, Clone)]
pub struct TargetResolver {
    registry: ProjectRegistry,
    worktrees_dir: PathBuf,
    default_branch: String,
    git: GitWorktreeAdapter,
}

impl TargetResolver {
    #[must_use]
    pub fn new(
        registry: ProjectRegistry,
        worktrees_dir: PathBuf,
        default_branch: String,
        git: GitWorktreeAdapter,
    ) -> Self {
        Self {
            registry,
            worktrees_dir,
            default_branch,
            git,
        }
    }

    #[must_use]
    pub fn is_main_token(&self, branch: &str) -> bool {
        branch == "main" || branch == self.default_branch
    }

    pub fn resolve(&self, context: &Context, spec: &str) -> Result<Resolution, TwiggitError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Ok(self.from_context(context));
        }

        if let Some((project_part, branch_part)) = spec.split_once('/') {
            // Explicit qualification wins whenever the first segment names a project.
            if let Ok(project) = self.registry.resolve(project_part) {
                if branch_part.is_empty() {
                    return Ok(Resolution::AsProject(self.main_checkout(project)?));
                }
                return Ok(Resolution::AsBranch(self.branch_target(project, branch_part)?));
            }
            // A slash-containing branch of the current project.
            if let Some(project) = context.project()
                && self.worktree_exists(project, spec)
            {
                return Ok(Resolution::AsBranch(
                    self.branch_target(project.clone(), spec)?,
                ));
            }
            return Err(TwiggitError::ProjectNotFound(project_part.to_owned()));
        }

        if let Some(project) = context.project() {
            if self.is_main_token(spec) || self.worktree_exists(project, spec) {
                return Ok(Resolution::AsBranch(
                    self.branch_target(project.clone(), spec)?,
                ));
            }
            if let Ok(other) = self.registry.resolve(spec) {
                return Ok(Resolution::AsProject(self.main_checkout(other)?));
            }
            return Err(TwiggitError::WorktreeNotFound(format!(
                "{}/{spec}",
                project.name
            )));
        }

        if let Ok(project) = self.registry.resolve(spec) {
            return Ok(Resolution::AsProject(self.main_checkout(project)?));
        }

        let mut candidates = self.projects_with_worktree(spec)?;
        if candidates.len() > 1 {
            return Err(TwiggitError::AmbiguousTarget {
                spec: spec.to_owned(),
                candidates,
            });
        }
        Err(TwiggitError::CannotInferProject {
            spec: spec.to_owned(),
            candidate: candidates.pop(),
        })
    }

    /// Like [`resolve`](Self::resolve) but an empty spec outside a project is an error.
    pub fn resolve_target(
        &self,
        context: &Context,
        spec: &str,
    ) -> Result<ResolvedTarget, TwiggitError> {
        match self.resolve(context, spec)? {
            Resolution::Unresolved => Err(TwiggitError::NoTarget {
                available: self.available_targets()?,
            }),
            other => other
                .into_target()
                .ok_or_else(|| TwiggitError::cannot_infer(spec)),
        }
    }

    /// Target for `create`: the worktree usually does not exist yet, so no existence probing.
    pub fn resolve_for_create(
        &self,
        context: &Context,
        spec: &str,
    ) -> Result<(Project, String), TwiggitError> {
        let spec = spec.trim();
        if let Some((project_part, branch_part)) = spec.split_once('/')
            && let Ok(project) = self.registry.resolve(project_part)
        {
            return Ok((project, branch_part.to_owned()));
        }
        match context.project() {
            Some(project) => Ok((project.clone(), spec.to_owned())),
            None => match spec.split_once('/') {
                Some((project_part, _)) => {
                    Err(TwiggitError::ProjectNotFound(project_part.to_owned()))
                }
                None => Err(TwiggitError::cannot_infer(spec)),
            },
        }
    }

    pub fn available_targets(&self) -> Result<Vec<String>, TwiggitError> {
        Ok(self
            .registry
            .list_projects()?
            .into_iter()
            .map(|p| p.name)
            .collect())
    }

    fn from_context(&self, context: &Context) -> Resolution {
        match context {
            Context::InProject { project } => Resolution::FromContext(ResolvedTarget {
                project: project.clone(),
                branch: self.default_branch.clone(),
                path: project.path.clone(),
                is_main_checkout: true,
            }),
            Context::InWorktree {
                project,
                branch,
                path,
            } => Resolution::FromContext(ResolvedTarget {
                project: project.clone(),
                branch: branch.clone(),
                path: path.clone(),
                is_main_checkout: false,
            }),
            Context::OutsideGit => Resolution::Unresolved,
        }
    }

    /// A detached main checkout is reported under the default branch name.
    fn main_checkout(&self, project: Project) -> Result<ResolvedTarget, TwiggitError> {
        let branch = self
            .git
            .current_branch(&project.path)?
            .unwrap_or_else(|| self.default_branch.clone());
        Ok(ResolvedTarget {
            path: project.path.clone(),
            project,
            branch,
            is_main_checkout: true,
        })
    }

    fn branch_target(
        &self,
        project: Project,
        branch: &str,
    ) -> Result<ResolvedTarget, TwiggitError> {
        if escapes_project_dir(branch) {
            return Err(TwiggitError::InvalidBranchFormat {
                name: branch.to_owned(),
                reason: "'.' and '..' path components are not allowed".to_owned(),
            });
        }
        if self.is_main_token(branch) {
            return Ok(ResolvedTarget {
                path: project.path.clone(),
                project,
                branch: branch.to_owned(),
                is_main_checkout: true,
            });
        }
        Ok(ResolvedTarget {
            path: worktree_path(&self.worktrees_dir, &project.name, branch),
            project,
            branch: branch.to_owned(),
            is_main_checkout: false,
        })
    }

    fn worktree_exists(&self, project: &Project, branch: &str) -> bool {
        !escapes_project_dir(branch)
            && worktree_path(&self.worktrees_dir, &project.name, branch).is_dir()
    }

    fn projects_with_worktree(&self, branch: &str) -> Result<Vec<String>, TwiggitError> {
        Ok(self
            .registry
            .list_projects()?
            .into_iter()
            .filter(|p| self.worktree_exists(p, branch))
            .map(|p| format!("{}/{branch}", p.name))
            .collect())
    }
}
