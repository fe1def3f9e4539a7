#![forbid(unsafe_code)]

use std::path::PathBuf;

use crate::core::context::Context;
use crate::core::target::{Resolution, ResolvedTarget, TargetResolver};
use crate::error::TwiggitError;

/// Where `cd` should land. The path is the only thing printed on stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationPlan {
    pub path: PathBuf,
    pub summary: String,
    pub target: ResolvedTarget,
}

#[derive(Debug, Clone)]
pub struct NavigationPlanner {
    targets: TargetResolver,
}

impl NavigationPlanner {
    #[must_use]
    pub fn new(targets: TargetResolver) -> Self {
        Self { targets }
    }

    /// Without a spec the caller's own location is returned; outside any project that is
    /// `NoTarget` listing what could be named instead.
    pub fn plan(
        &self,
        context: &Context,
        spec: Option<&str>,
    ) -> Result<NavigationPlan, TwiggitError> {
        let spec = spec.map(str::trim).unwrap_or_default();
        let target = match self.targets.resolve(context, spec)? {
            Resolution::Unresolved => {
                return Err(TwiggitError::NoTarget {
                    available: self.targets.available_targets()?,
                });
            }
            Resolution::FromContext(t) | Resolution::AsBranch(t) | Resolution::AsProject(t) => t,
        };

        if !target.is_main_checkout && !target.path.is_dir() {
            return Err(TwiggitError::WorktreeNotFound(format!(
                "{}/{}",
                target.project.name, target.branch
            )));
        }

        let summary = if target.is_main_checkout {
            format!("project '{}' (main checkout)", target.project.name)
        } else {
            format!(
                "worktree '{}' of project '{}'",
                target.branch, target.project.name
            )
        };
        log::debug!("navigating to {summary} at {}", target.path.display());
        Ok(NavigationPlan {
            path: target.path.clone(),
            summary,
            target,
        })
    }
}
