#![forbid(unsafe_code)]

use std::sync::Arc;

use crate::config::Config;
use crate::core::context::ContextResolver;
use crate::core::exec::{CommandExecutor, SystemExecutor};
use crate::core::git::GitWorktreeAdapter;
use crate::core::navigation::NavigationPlanner;
use crate::core::registry::ProjectRegistry;
use crate::core::target::TargetResolver;
use crate::core::worktree::{LifecycleOptions, WorktreeLifecycleManager};

/// Everything a command needs, built once from the loaded config.
#[derive(Debug)]
pub struct Services {
    pub registry: ProjectRegistry,
    pub context: ContextResolver,
    pub targets: TargetResolver,
    pub worktrees: WorktreeLifecycleManager,
    pub navigation: NavigationPlanner,
}

impl Services {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        Self::with_executor(cfg, Arc::new(SystemExecutor))
    }

    pub fn with_executor(
        cfg: &Config,
        executor: Arc<dyn CommandExecutor>,
    ) -> anyhow::Result<Self> {
        let projects_dir = cfg.projects_path()?;
        let worktrees_dir = cfg.worktrees_path()?;
        let registry = ProjectRegistry::new(projects_dir);
        let git = GitWorktreeAdapter::new(executor, cfg.cli_timeout());

        let context = ContextResolver::new(
            registry.clone(),
            worktrees_dir.clone(),
            git.clone(),
            cfg.context_cache_ttl(),
        );
        let targets = TargetResolver::new(
            registry.clone(),
            worktrees_dir.clone(),
            cfg.default_source_branch.clone(),
            git.clone(),
        );
        let worktrees = WorktreeLifecycleManager::new(
            registry.clone(),
            git,
            worktrees_dir,
            LifecycleOptions {
                default_source_branch: cfg.default_source_branch.clone(),
                protected_branches: cfg.prune.protected_branches.clone(),
                max_concurrent: cfg
                    .services
                    .concurrent_ops
                    .then_some(cfg.services.max_concurrent),
            },
        );
        let navigation = NavigationPlanner::new(targets.clone());

        Ok(Self {
            registry,
            context,
            targets,
            worktrees,
            navigation,
        })
    }
}
