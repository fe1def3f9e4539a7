#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;

use twiggit::config::Config;
use twiggit::core::services::Services;

pub fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok()
}

pub struct TestEnv {
    _td: tempfile::TempDir,
    pub root: PathBuf,
    pub projects: PathBuf,
    pub worktrees: PathBuf,
    pub config_home: PathBuf,
    pub outside: PathBuf,
}

impl TestEnv {
    /// Real repositories, each with one commit on `main`.
    pub fn new(projects: &[&str]) -> Self {
        let td = tempfile::tempdir().expect("tempdir");
        let root = std::fs::canonicalize(td.path()).expect("canonicalize tempdir");
        let env = Self {
            projects: root.join("projects"),
            worktrees: root.join("worktrees"),
            config_home: root.join("config"),
            outside: root.join("elsewhere"),
            root,
            _td: td,
        };
        std::fs::create_dir_all(&env.worktrees).expect("mkdir worktrees");
        std::fs::create_dir_all(&env.config_home).expect("mkdir config");
        std::fs::create_dir_all(&env.outside).expect("mkdir elsewhere");
        for name in projects {
            init_repo(&env.projects.join(name));
        }
        env
    }

    pub fn project(&self, name: &str) -> PathBuf {
        self.projects.join(name)
    }

    pub fn config(&self) -> Config {
        Config {
            projects_dir: self.projects.display().to_string(),
            worktrees_dir: self.worktrees.display().to_string(),
            ..Config::default()
        }
    }

    pub fn services(&self) -> Services {
        Services::from_config(&self.config()).expect("services")
    }
}

pub fn init_repo(repo: &Path) {
    std::fs::create_dir_all(repo).expect("mkdir repo");
    git(repo, &["init", "--quiet"]);
    git(repo, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git(repo, &["config", "user.email", "test@example.com"]);
    git(repo, &["config", "user.name", "Test"]);
    git(repo, &["config", "commit.gpgsign", "false"]);
    std::fs::write(repo.join("README.md"), "hello\n").expect("write");
    git(repo, &["add", "."]);
    git(repo, &["commit", "--quiet", "-m", "init"]);
}

pub fn commit_file(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).expect("write");
    git(dir, &["add", name]);
    git(dir, &["commit", "--quiet", "-m", name]);
}

pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git command");
    if !out.status.success() {
        panic!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&out.stderr)
        );
    }
    String::from_utf8_lossy(&out.stdout).into_owned()
}

pub fn branches(repo: &Path) -> Vec<String> {
    git(repo, &["branch", "--list", "--format=%(refname:short)"])
        .lines()
        .map(str::to_owned)
        .collect()
}
