mod common;

use std::io::Write as _;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use common::{TestEnv, git, git_available};

macro_rules! require_git {
    () => {
        if !git_available() {
            eprintln!("skipping: git not found");
            return;
        }
    };
}

fn twiggit(env: &TestEnv, cwd: &Path, args: &[&str], stdin: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_twiggit"))
        .args(args)
        .current_dir(cwd)
        .env("XDG_CONFIG_HOME", &env.config_home)
        .env("TWIGGIT_PROJECTS_DIR", &env.projects)
        .env("TWIGGIT_WORKTREES_DIR", &env.worktrees)
        .env_remove("TWIGGIT_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn twiggit");
    if let Some(mut input) = child.stdin.take() {
        input.write_all(stdin.as_bytes()).expect("write stdin");
    }
    child.wait_with_output().expect("wait twiggit")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

/// `project-x` with a `feature-1` worktree, plus `acme` with none.
fn env_with_feature() -> TestEnv {
    let env = TestEnv::new(&["project-x", "acme"]);
    let target = env.worktrees.join("project-x").join("feature-1");
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
    git(
        &env.project("project-x"),
        &["worktree", "add", "--quiet", "-b", "feature-1", &target.display().to_string()],
    );
    env
}

#[test]
fn cd_prints_exactly_the_path() {
    require_git!();
    let env = env_with_feature();
    let out = twiggit(&env, &env.outside, &["cd", "project-x/feature-1"], "");
    assert!(out.status.success(), "{}", stderr(&out));
    let expected = env.worktrees.join("project-x").join("feature-1");
    assert_eq!(stdout(&out), format!("{}\n", expected.display()));
}

#[test]
fn switch_to_project_lands_in_main_checkout() {
    require_git!();
    let env = env_with_feature();
    let out = twiggit(&env, &env.outside, &["switch", "acme"], "");
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out), format!("{}\n", env.project("acme").display()));
}

#[test]
fn bare_branch_outside_git_needs_qualification() {
    require_git!();
    let env = env_with_feature();
    let out = twiggit(&env, &env.outside, &["cd", "feature-1"], "");
    assert_eq!(out.status.code(), Some(1));
    assert!(stdout(&out).is_empty());
    let err = stderr(&out);
    assert!(
        err.starts_with("error: cannot infer a project for 'feature-1'"),
        "{err}"
    );
    assert!(err.contains("hint: did you mean `project-x/feature-1`?"), "{err}");
    assert!(!err.contains("ambiguous"), "{err}");
}

#[test]
fn cd_without_target_outside_git_lists_projects() {
    require_git!();
    let env = env_with_feature();
    let out = twiggit(&env, &env.outside, &["cd"], "");
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("Available targets: acme, project-x"));
}

#[test]
fn cd_by_branch_inside_project() {
    require_git!();
    let env = env_with_feature();
    let out = twiggit(&env, &env.project("project-x"), &["cd", "feature-1"], "");
    assert!(out.status.success(), "{}", stderr(&out));
    let expected = env.worktrees.join("project-x").join("feature-1");
    assert_eq!(stdout(&out).trim_end(), expected.display().to_string());
}

#[test]
fn create_with_cd_prints_only_the_new_path() {
    require_git!();
    let env = env_with_feature();
    let out = twiggit(&env, &env.outside, &["create", "acme/feature-2", "--cd"], "");
    assert!(out.status.success(), "{}", stderr(&out));
    let expected = env.worktrees.join("acme").join("feature-2");
    assert_eq!(stdout(&out), format!("{}\n", expected.display()));
    assert!(stderr(&out).contains("Created worktree"));
    assert!(expected.join("README.md").is_file());
}

#[test]
fn list_outside_project_suggests_all() {
    require_git!();
    let env = env_with_feature();
    let out = twiggit(&env, &env.outside, &["list"], "");
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("--all"));

    let out = twiggit(&env, &env.outside, &["list", "--all", "--json"], "");
    assert!(out.status.success(), "{}", stderr(&out));
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let worktrees = json["worktrees"].as_array().unwrap();
    assert_eq!(worktrees.len(), 3);
    assert!(worktrees.iter().any(|w| w["branch"] == "feature-1" && w["project"] == "project-x"));
}

#[test]
fn delete_change_dir_prints_main_checkout() {
    require_git!();
    let env = env_with_feature();
    let here = env.worktrees.join("project-x").join("feature-1");

    let out = twiggit(&env, &here, &["delete"], "");
    assert_eq!(out.status.code(), Some(1));
    assert!(here.is_dir());

    let out = twiggit(&env, &here, &["delete", "-C"], "");
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out), format!("{}\n", env.project("project-x").display()));
    assert!(!here.exists());
}

#[test]
fn delete_change_dir_from_outside_keeps_stdout_empty() {
    require_git!();
    let env = env_with_feature();
    let target = env.worktrees.join("project-x").join("feature-1");

    let out = twiggit(&env, &env.outside, &["delete", "-C", "project-x/feature-1"], "");
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out), "");
    assert!(stderr(&out).contains("Deleted worktree 'project-x/feature-1'"));
    assert!(!target.exists());
}

#[test]
fn plain_create_and_delete_report_on_stderr() {
    require_git!();
    let env = env_with_feature();

    let out = twiggit(&env, &env.outside, &["create", "acme/topic"], "");
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out), "");
    assert!(stderr(&out).contains("Created worktree 'topic'"));

    let out = twiggit(&env, &env.project("acme"), &["delete", "topic"], "");
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out), "");
}

#[test]
fn declined_prune_all_is_not_an_error() {
    require_git!();
    let env = env_with_feature();
    let out = twiggit(&env, &env.outside, &["prune", "--all"], "n\n");
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
    assert!(stderr(&out).contains("Prune cancelled"));
    assert!(env.worktrees.join("project-x").join("feature-1").is_dir());
}

#[test]
fn usage_errors_exit_two() {
    require_git!();
    let env = env_with_feature();
    let out = twiggit(&env, &env.outside, &["delete", "--bogus"], "");
    assert_eq!(out.status.code(), Some(2));
}
