#![forbid(unsafe_code)]

use std::fmt;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;

use crate::core::context::Context;
use crate::core::git::same_path;
use crate::core::registry::Project;
use crate::core::worktree::{BranchOutcome, Inconsistency, WorktreeLifecycleManager};
use crate::error::TwiggitError;

#[derive(Debug, Clone)]
pub enum PruneScope {
    Project(Project),
    All,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PruneOptions {
    pub dry_run: bool,
    pub force: bool,
    pub delete_branches: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneCandidate {
    pub project: Project,
    pub branch: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum PruneOutcome {
    /// Dry-run only.
    Planned,
    Deleted { branch: BranchOutcome },
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PruneEntry {
    pub project: String,
    pub branch: String,
    pub path: PathBuf,
    pub outcome: PruneOutcome,
}

impl PruneEntry {
    fn skipped(project: &Project, branch: &str, path: PathBuf, reason: impl Into<String>) -> Self {
        Self {
            project: project.name.clone(),
            branch: branch.to_owned(),
            path,
            outcome: PruneOutcome::Skipped(reason.into()),
        }
    }

    fn failed(project: &Project, branch: &str, path: PathBuf, reason: impl Into<String>) -> Self {
        Self {
            project: project.name.clone(),
            branch: branch.to_owned(),
            path,
            outcome: PruneOutcome::Failed(reason.into()),
        }
    }
}

impl fmt::Display for PruneEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = format!("{}/{}", self.project, self.branch);
        match &self.outcome {
            PruneOutcome::Planned => write!(f, "would prune {target} ({})", self.path.display()),
            PruneOutcome::Deleted { branch } => match branch {
                BranchOutcome::Deleted => write!(f, "pruned {target} and its branch"),
                BranchOutcome::Kept => write!(f, "pruned {target}"),
                BranchOutcome::Refused(why) => {
                    write!(f, "pruned {target}; branch kept: {why}")
                }
            },
            PruneOutcome::Skipped(why) => write!(f, "skipped {target}: {why}"),
            PruneOutcome::Failed(why) => write!(f, "failed {target}: {why}"),
        }
    }
}

/// Read-only result of scanning a scope; nothing has been touched yet.
#[derive(Debug, Clone, Default)]
pub struct PrunePlan {
    pub scope_all: bool,
    pub candidates: Vec<PruneCandidate>,
    pub skipped: Vec<PruneEntry>,
    /// Projects with registrations whose directories are gone.
    pub stale: Vec<Project>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    pub entries: Vec<PruneEntry>,
}

impl PruneReport {
    pub fn count(&self, pred: impl Fn(&PruneOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.count(|o| matches!(o, PruneOutcome::Failed(_))) > 0
    }

    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} pruned, {} planned, {} skipped, {} failed",
            self.count(|o| matches!(o, PruneOutcome::Deleted { .. })),
            self.count(|o| matches!(o, PruneOutcome::Planned)),
            self.count(|o| matches!(o, PruneOutcome::Skipped(_))),
            self.count(|o| matches!(o, PruneOutcome::Failed(_))),
        )
    }
}

/// Only an unforced prune across every project asks first, and only when it would act.
#[must_use]
pub fn requires_confirmation(candidates: usize, scope_all: bool, force: bool) -> bool {
    scope_all && !force && candidates > 0
}

/// Shows the plan and reads one line; only `y` or `yes` proceeds.
pub fn confirm<R: BufRead, W: Write>(
    plan: &PrunePlan,
    input: &mut R,
    out: &mut W,
) -> Result<bool, TwiggitError> {
    writeln!(out, "The following worktrees will be pruned:").map_err(TwiggitError::Prompt)?;
    for c in &plan.candidates {
        writeln!(out, "  {}/{} ({})", c.project.name, c.branch, c.path.display())
            .map_err(TwiggitError::Prompt)?;
    }
    write!(out, "Proceed? [y/N] ").map_err(TwiggitError::Prompt)?;
    out.flush().map_err(TwiggitError::Prompt)?;

    let mut line = String::new();
    input.read_line(&mut line).map_err(TwiggitError::Prompt)?;
    let answer = line.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}

impl WorktreeLifecycleManager {
    pub fn plan_prune(
        &self,
        scope: &PruneScope,
        context: &Context,
    ) -> Result<PrunePlan, TwiggitError> {
        let projects = match scope {
            PruneScope::Project(p) => vec![p.clone()],
            PruneScope::All => self.registry().list_projects()?,
        };
        let mut plan = PrunePlan {
            scope_all: matches!(scope, PruneScope::All),
            ..PrunePlan::default()
        };
        for project in &projects {
            self.plan_project(project, context, &mut plan);
        }
        Ok(plan)
    }

    /// Failures here are recorded per project so the other projects still get planned.
    fn plan_project(&self, project: &Project, context: &Context, plan: &mut PrunePlan) {
        let base = self.project_worktrees_dir(project);
        let into = match self.default_branch(project) {
            Ok(b) => b,
            Err(e) => {
                plan.skipped
                    .push(PruneEntry::failed(project, "", project.path.clone(), e.to_string()));
                return;
            }
        };
        let registered = match self.git().list_worktrees(&project.path) {
            Ok(r) => r,
            Err(e) => {
                plan.skipped
                    .push(PruneEntry::failed(project, "", project.path.clone(), e.to_string()));
                return;
            }
        };

        for issue in self.check_consistency(project, &registered) {
            match issue {
                Inconsistency::Unregistered { path, .. } => {
                    let branch = path
                        .strip_prefix(&base)
                        .map(|rel| rel.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    plan.skipped.push(PruneEntry::skipped(
                        project,
                        &branch,
                        path,
                        "not registered with git",
                    ));
                }
                Inconsistency::Missing { .. } => {
                    if !plan.stale.contains(project) {
                        plan.stale.push(project.clone());
                    }
                }
            }
        }

        let current = match context {
            Context::InWorktree { path, .. } => Some(path.as_path()),
            _ => None,
        };

        for wt in registered {
            if same_path(&wt.path, &project.path) || !wt.path.exists() {
                continue;
            }
            let managed = wt.path.starts_with(&base)
                || wt.path.starts_with(crate::core::git::normalize_path(&base));
            let branch = wt.display_branch().to_owned();
            let reason = if !managed {
                Some("outside the worktrees directory".to_owned())
            } else if wt.detached {
                Some("detached HEAD".to_owned())
            } else if wt.locked {
                Some("locked".to_owned())
            } else if self.is_protected(&wt.branch) {
                Some("protected branch".to_owned())
            } else if wt.branch == into {
                Some("default branch".to_owned())
            } else if current.is_some_and(|here| same_path(here, &wt.path)) {
                Some("current worktree".to_owned())
            } else {
                None
            };
            if let Some(reason) = reason {
                plan.skipped
                    .push(PruneEntry::skipped(project, &branch, wt.path, reason));
                continue;
            }

            match self.git().is_branch_merged(&project.path, &wt.branch, &into) {
                Ok(true) => plan.candidates.push(PruneCandidate {
                    project: project.clone(),
                    branch: wt.branch,
                    path: wt.path,
                }),
                Ok(false) => plan.skipped.push(PruneEntry::skipped(
                    project,
                    &branch,
                    wt.path,
                    format!("not merged into {into}"),
                )),
                Err(e) => plan
                    .skipped
                    .push(PruneEntry::failed(project, &branch, wt.path, e.to_string())),
            }
        }
    }

    /// Removes every candidate. One failure never stops the rest.
    pub async fn execute_prune(&self, plan: PrunePlan, opts: PruneOptions) -> PruneReport {
        let mut entries = plan.skipped;
        let keep_branch = !opts.delete_branches;

        let mut batches: Vec<(Project, Vec<PruneCandidate>)> = Vec::new();
        for c in plan.candidates {
            match batches.iter_mut().find(|(p, _)| *p == c.project) {
                Some((_, batch)) => batch.push(c),
                None => batches.push((c.project.clone(), vec![c])),
            }
        }

        match self.options().max_concurrent {
            Some(max) if batches.len() > 1 => {
                let sem = Arc::new(Semaphore::new(max.max(1)));
                let mut handles = Vec::with_capacity(batches.len());
                for (project, batch) in batches {
                    let names: Vec<(String, PathBuf)> = batch
                        .iter()
                        .map(|c| (c.branch.clone(), c.path.clone()))
                        .collect();
                    let permit = sem.clone().acquire_owned().await;
                    let this = self.clone();
                    let worker_project = project.clone();
                    let handle = tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        this.prune_batch(&worker_project, batch, keep_branch)
                    });
                    handles.push((project, names, handle));
                }
                for (project, names, handle) in handles {
                    match handle.await {
                        Ok(mut done) => entries.append(&mut done),
                        Err(e) => {
                            log::warn!("prune worker for '{}' failed: {e}", project.name);
                            entries.extend(names.into_iter().map(|(branch, path)| {
                                PruneEntry::failed(&project, &branch, path, e.to_string())
                            }));
                        }
                    }
                }
            }
            _ => {
                for (project, batch) in batches {
                    entries.extend(self.prune_batch(&project, batch, keep_branch));
                }
            }
        }

        for project in &plan.stale {
            match self.git().prune_worktree_metadata(&project.path) {
                Ok(()) => log::info!("pruned stale worktree registrations of '{}'", project.name),
                Err(e) => log::warn!(
                    "failed to prune stale registrations of '{}': {e}",
                    project.name
                ),
            }
        }

        PruneReport { entries }
    }

    /// Candidates of one project, strictly in order.
    fn prune_batch(
        &self,
        project: &Project,
        batch: Vec<PruneCandidate>,
        keep_branch: bool,
    ) -> Vec<PruneEntry> {
        batch
            .into_iter()
            .map(|c| {
                let outcome = match self.remove_worktree_and_branch(
                    project,
                    &c.branch,
                    &c.path,
                    true,
                    keep_branch,
                    true,
                ) {
                    Ok(branch) => PruneOutcome::Deleted { branch },
                    Err(e) => {
                        log::warn!("failed to prune {}: {e}", c.path.display());
                        PruneOutcome::Failed(e.to_string())
                    }
                };
                PruneEntry {
                    project: project.name.clone(),
                    branch: c.branch,
                    path: c.path,
                    outcome,
                }
            })
            .collect()
    }

    /// Plans, asks when required, then executes. A declined prompt is `PruneCancelled`.
    pub async fn prune<R: BufRead, W: Write>(
        &self,
        scope: &PruneScope,
        opts: PruneOptions,
        context: &Context,
        input: &mut R,
        prompt: &mut W,
    ) -> Result<PruneReport, TwiggitError> {
        let plan = self.plan_prune(scope, context)?;
        if opts.dry_run {
            let mut entries = plan.skipped;
            entries.extend(plan.candidates.into_iter().map(|c| PruneEntry {
                project: c.project.name,
                branch: c.branch,
                path: c.path,
                outcome: PruneOutcome::Planned,
            }));
            return Ok(PruneReport { entries });
        }

        if requires_confirmation(plan.candidates.len(), plan.scope_all, opts.force)
            && !confirm(&plan, input, prompt)?
        {
            return Err(TwiggitError::PruneCancelled);
        }
        Ok(self.execute_prune(plan, opts).await)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use rstest::rstest;

    use super::*;
    use crate::core::exec::testing::ScriptedExecutor;
    use crate::core::git::GitWorktreeAdapter;
    use crate::core::registry::ProjectRegistry;
    use crate::core::worktree::LifecycleOptions;

    #[rstest]
    #[case(3, true, false, true)]
    #[case(3, true, true, false)]
    #[case(0, true, false, false)]
    #[case(3, false, false, false)]
    fn confirmation_rules(
        #[case] candidates: usize,
        #[case] scope_all: bool,
        #[case] force: bool,
        #[case] expected: bool,
    ) {
        assert_eq!(requires_confirmation(candidates, scope_all, force), expected);
    }

    #[rstest]
    #[case("y\n", true)]
    #[case("YES\n", true)]
    #[case("\n", false)]
    #[case("n\n", false)]
    #[case("sure\n", false)]
    #[case("", false)]
    fn confirm_accepts_only_yes(#[case] input: &str, #[case] expected: bool) {
        let plan = PrunePlan::default();
        let mut out = Vec::new();
        let got = confirm(&plan, &mut input.as_bytes(), &mut out).unwrap();
        assert_eq!(got, expected);
        assert!(String::from_utf8(out).unwrap().contains("Proceed?"));
    }

    struct Fixture {
        _td: tempfile::TempDir,
        worktrees: PathBuf,
        acme: Project,
        manager: WorktreeLifecycleManager,
        exec: Arc<ScriptedExecutor>,
    }

    fn fixture(script: impl FnOnce(&Path, &Path) -> ScriptedExecutor) -> Fixture {
        let td = tempfile::tempdir().expect("tempdir");
        let projects = td.path().join("projects");
        let worktrees = td.path().join("worktrees");
        std::fs::create_dir_all(projects.join("acme").join(".git")).unwrap();
        for branch in ["done", "wip", "detached-one", "main"] {
            let wt = worktrees.join("acme").join(branch);
            std::fs::create_dir_all(&wt).unwrap();
            std::fs::write(wt.join(".git"), "gitdir: /x\n").unwrap();
        }
        let registry = ProjectRegistry::new(projects.clone());
        let acme = registry.resolve("acme").unwrap();
        let exec = Arc::new(script(&acme.path, &worktrees.join("acme")));
        let manager = WorktreeLifecycleManager::new(
            registry,
            GitWorktreeAdapter::new(exec.clone(), Duration::from_secs(5)),
            worktrees.clone(),
            LifecycleOptions::default(),
        );
        Fixture {
            _td: td,
            worktrees,
            acme,
            manager,
            exec,
        }
    }

    fn porcelain(repo: &Path, wts: &Path) -> String {
        format!(
            "worktree {}\nHEAD a\nbranch refs/heads/main\n\n\
             worktree {}\nHEAD b\nbranch refs/heads/done\n\n\
             worktree {}\nHEAD c\nbranch refs/heads/wip\n\n\
             worktree {}\nHEAD d\ndetached\n\n\
             worktree {}\nHEAD e\nbranch refs/heads/main-copy\n\n\
             worktree {}\nHEAD f\nbranch refs/heads/gone\nprunable\n",
            repo.display(),
            wts.join("done").display(),
            wts.join("wip").display(),
            wts.join("detached-one").display(),
            wts.join("main").display(),
            wts.join("gone").display(),
        )
    }

    fn scripted(repo: &Path, wts: &Path) -> ScriptedExecutor {
        ScriptedExecutor::new()
            .on("show-ref --verify --quiet refs/heads/main", 0, "", "")
            .on("worktree list --porcelain", 0, &porcelain(repo, wts), "")
            .on("merge-base --is-ancestor done main", 0, "", "")
            .on("merge-base --is-ancestor wip main", 1, "", "")
            .on("merge-base --is-ancestor main-copy main", 0, "", "")
    }

    #[test]
    fn plan_selects_merged_managed_worktrees_only() {
        let f = fixture(scripted);
        let here = f.worktrees.join("acme").join("main");
        let ctx = Context::InWorktree {
            project: f.acme.clone(),
            branch: "main-copy".to_owned(),
            path: here,
        };
        let plan = f
            .manager
            .plan_prune(&PruneScope::Project(f.acme.clone()), &ctx)
            .unwrap();

        let names: Vec<_> = plan.candidates.iter().map(|c| c.branch.as_str()).collect();
        assert_eq!(names, vec!["done"]);
        assert_eq!(plan.stale, vec![f.acme.clone()]);

        let reasons: Vec<_> = plan
            .skipped
            .iter()
            .map(|e| (e.branch.as_str(), e.outcome.clone()))
            .collect();
        assert!(reasons.contains(&("wip", PruneOutcome::Skipped("not merged into main".into()))));
        assert!(reasons.contains(&("(detached)", PruneOutcome::Skipped("detached HEAD".into()))));
        assert!(reasons.contains(&("main-copy", PruneOutcome::Skipped("current worktree".into()))));
        assert!(!f.exec.calls().iter().any(|c| c.starts_with("worktree remove")));
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let f = fixture(scripted);
        let opts = PruneOptions {
            dry_run: true,
            ..PruneOptions::default()
        };
        let report = f
            .manager
            .prune(
                &PruneScope::All,
                opts,
                &Context::OutsideGit,
                &mut "".as_bytes(),
                &mut Vec::new(),
            )
            .await
            .unwrap();
        // `main-copy` is merged too once nobody is standing in it.
        assert_eq!(report.count(|o| matches!(o, PruneOutcome::Planned)), 2);
        assert!(!report.has_failures());
        assert!(
            !f.exec
                .calls()
                .iter()
                .any(|c| c.starts_with("worktree remove") || c == "worktree prune")
        );
    }

    #[tokio::test]
    async fn declined_prompt_cancels_all_scope() {
        let f = fixture(scripted);
        let err = f
            .manager
            .prune(
                &PruneScope::All,
                PruneOptions::default(),
                &Context::OutsideGit,
                &mut "n\n".as_bytes(),
                &mut Vec::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TwiggitError::PruneCancelled));
        assert!(!f.exec.calls().iter().any(|c| c.starts_with("worktree remove")));
    }

    #[tokio::test]
    async fn failures_are_reported_without_stopping() {
        let f = fixture(|repo, wts| {
            scripted(repo, wts).on(
                &format!("worktree remove --force {}", wts.join("done").display()),
                128,
                "",
                "fatal: cannot remove: permission denied\n",
            )
        });
        let report = f
            .manager
            .prune(
                &PruneScope::Project(f.acme.clone()),
                PruneOptions::default(),
                &Context::OutsideGit,
                &mut "".as_bytes(),
                &mut Vec::new(),
            )
            .await
            .unwrap();
        assert!(report.has_failures());
        let failed = report
            .entries
            .iter()
            .find(|e| matches!(e.outcome, PruneOutcome::Failed(_)))
            .unwrap();
        assert_eq!(failed.branch, "done");
        // Stale registrations are still cleaned up after a failure.
        assert!(f.exec.calls().contains(&"worktree prune".to_owned()));
    }

    #[tokio::test]
    async fn deletes_branch_only_when_asked() {
        let f = fixture(|repo, wts| {
            scripted(repo, wts)
                .on(
                    &format!("worktree remove --force {}", wts.join("done").display()),
                    0,
                    "",
                    "",
                )
                .on("branch -D done", 0, "", "")
                .on("worktree prune", 0, "", "")
        });
        let opts = PruneOptions {
            delete_branches: true,
            ..PruneOptions::default()
        };
        let report = f
            .manager
            .prune(
                &PruneScope::Project(f.acme.clone()),
                opts,
                &Context::OutsideGit,
                &mut "".as_bytes(),
                &mut Vec::new(),
            )
            .await
            .unwrap();
        let done = report.entries.iter().find(|e| e.branch == "done").unwrap();
        assert_eq!(
            done.outcome,
            PruneOutcome::Deleted {
                branch: BranchOutcome::Deleted
            }
        );
        assert!(f.exec.calls().contains(&"branch -D done".to_owned()));
    }
}
