#![forbid(unsafe_code)]

use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::core::git::{GitWorktreeAdapter, normalize_path};
use crate::core::registry::{Project, ProjectRegistry};
use crate::error::TwiggitError;

/// Where the caller is standing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Context {
    InProject {
        project: Project,
    },
    InWorktree {
        project: Project,
        branch: String,
        path: PathBuf,
    },
    OutsideGit,
}

impl Context {
    #[must_use]
    pub fn project(&self) -> Option<&Project> {
        match self {
            Self::InProject { project } | Self::InWorktree { project, .. } => Some(project),
            Self::OutsideGit => None,
        }
    }

    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::InProject { project } => format!("project '{}' (main checkout)", project.name),
            Self::InWorktree {
                project, branch, ..
            } => format!("worktree '{branch}' of project '{}'", project.name),
            Self::OutsideGit => "outside any managed project".to_owned(),
        }
    }
}

#[derive(Debug)]
struct CachedContext {
    cwd: PathBuf,
    at: Instant,
    context: Context,
}

/// Classifies a directory against `projects_dir` and `worktrees_dir`.
///
/// Repositories outside those two trees count as `OutsideGit`. Classifications may be
/// cached for `cache_ttl`; nothing that gates a mutation is ever cached here.
#[derive(Debug)]
pub struct ContextResolver {
    registry: ProjectRegistry,
    worktrees_dir: PathBuf,
    git: GitWorktreeAdapter,
    cache_ttl: Duration,
    cache: Mutex<Option<CachedContext>>,
}

impl ContextResolver {
    #[must_use]
    pub fn new(
        registry: ProjectRegistry,
        worktrees_dir: PathBuf,
        git: GitWorktreeAdapter,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            worktrees_dir,
            git,
            cache_ttl,
            cache: Mutex::new(None),
        }
    }

    pub fn detect_from_cwd(&self) -> Result<Context, TwiggitError> {
        let cwd = std::env::current_dir().map_err(|e| TwiggitError::ContextDetection {
            path: PathBuf::from("."),
            msg: format!("failed to get current directory: {e}"),
        })?;
        self.detect(&cwd)
    }

    pub fn detect(&self, cwd: &Path) -> Result<Context, TwiggitError> {
        let cwd = normalize_path(cwd);
        if let Some(hit) = self.cached(&cwd) {
            return Ok(hit);
        }
        let context = self.classify(&cwd)?;
        log::debug!("context for {}: {}", cwd.display(), context.summary());
        if !self.cache_ttl.is_zero()
            && let Ok(mut slot) = self.cache.lock()
        {
            *slot = Some(CachedContext {
                cwd,
                at: Instant::now(),
                context: context.clone(),
            });
        }
        Ok(context)
    }

    fn cached(&self, cwd: &Path) -> Option<Context> {
        if self.cache_ttl.is_zero() {
            return None;
        }
        let slot = self.cache.lock().ok()?;
        let entry = slot.as_ref()?;
        (entry.cwd == cwd && entry.at.elapsed() < self.cache_ttl).then(|| entry.context.clone())
    }

    fn classify(&self, cwd: &Path) -> Result<Context, TwiggitError> {
        let Some(root) = find_repo_root(cwd)? else {
            return Ok(Context::OutsideGit);
        };

        let worktrees_dir = normalize_path(&self.worktrees_dir);
        if let Ok(rel) = root.strip_prefix(&worktrees_dir) {
            let parts = normal_components(rel);
            if parts.len() >= 2 {
                let project_name = &parts[0];
                let dir_branch = parts[1..].join("/");
                let Ok(project) = self.registry.resolve(project_name) else {
                    log::debug!(
                        "{} is under worktrees_dir but project '{project_name}' is not registered",
                        root.display()
                    );
                    return Ok(Context::OutsideGit);
                };
                // Detached worktrees are known by their directory name.
                let branch = self.git.current_branch(&root)?.unwrap_or(dir_branch);
                return Ok(Context::InWorktree {
                    project,
                    branch,
                    path: root,
                });
            }
        }

        let projects_dir = normalize_path(self.registry.projects_dir());
        if let Ok(rel) = root.strip_prefix(&projects_dir) {
            let parts = normal_components(rel);
            if parts.len() == 1
                && let Ok(project) = self.registry.resolve(&parts[0])
            {
                return Ok(Context::InProject { project });
            }
        }

        Ok(Context::OutsideGit)
    }
}

fn normal_components(rel: &Path) -> Vec<String> {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().to_string()),
            _ => None,
        })
        .collect()
}

/// Walks up from `start` to the first directory holding a readable `.git`.
fn find_repo_root(start: &Path) -> Result<Option<PathBuf>, TwiggitError> {
    let mut cur = Some(start);
    while let Some(dir) = cur {
        let candidate = dir.join(".git");
        match std::fs::metadata(&candidate) {
            Ok(meta) if meta.is_dir() => {
                if !candidate.join("HEAD").is_file() {
                    return Err(TwiggitError::ContextDetection {
                        path: candidate,
                        msg: "git directory has no HEAD".to_owned(),
                    });
                }
                return Ok(Some(dir.to_path_buf()));
            }
            Ok(_) => {
                let raw = std::fs::read_to_string(&candidate).map_err(|e| {
                    TwiggitError::ContextDetection {
                        path: candidate.clone(),
                        msg: e.to_string(),
                    }
                })?;
                if !raw.trim_start().starts_with("gitdir:") {
                    return Err(TwiggitError::ContextDetection {
                        path: candidate,
                        msg: "gitlink file does not start with 'gitdir:'".to_owned(),
                    });
                }
                return Ok(Some(dir.to_path_buf()));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(TwiggitError::ContextDetection {
                    path: candidate,
                    msg: e.to_string(),
                });
            }
        }
        cur = dir.parent();
    }
    Ok(None)
}
