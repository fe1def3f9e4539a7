#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Context as _;
use directories::BaseDirs;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::naming;
use crate::error::TwiggitError;

pub const PROJECTS_DIR_ENV: &str = "TWIGGIT_PROJECTS_DIR";
pub const WORKTREES_DIR_ENV: &str = "TWIGGIT_WORKTREES_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub projects_dir: String,
    pub worktrees_dir: String,
    pub default_source_branch: String,
    pub git: GitConfig,
    pub services: ServicesConfig,
    pub context_detection: ContextDetectionConfig,
    pub prune: PruneConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            projects_dir: "~/Projects".to_owned(),
            worktrees_dir: "~/Worktrees".to_owned(),
            default_source_branch: "main".to_owned(),
            git: GitConfig::default(),
            services: ServicesConfig::default(),
            context_detection: ContextDetectionConfig::default(),
            prune: PruneConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GitConfig {
    /// Seconds a single git invocation may run before it is killed.
    pub cli_timeout: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self { cli_timeout: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServicesConfig {
    pub concurrent_ops: bool,
    pub max_concurrent: usize,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            concurrent_ops: false,
            max_concurrent: 4,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContextDetectionConfig {
    pub cache_ttl_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PruneConfig {
    pub protected_branches: Vec<String>,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            protected_branches: vec!["main".to_owned(), "master".to_owned()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_file: PathBuf,
}

pub fn default_paths() -> anyhow::Result<ConfigPaths> {
    let base = match std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        Some(xdg) => PathBuf::from(xdg),
        None => home_dir()
            .context("failed to determine home directory")?
            .join(".config"),
    };
    Ok(ConfigPaths {
        config_file: base.join("twiggit").join("config.toml"),
    })
}

fn home_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

#[must_use]
pub fn expand_tilde(input: &str) -> String {
    if input == "~"
        && let Some(home) = home_dir()
    {
        return home.to_string_lossy().to_string();
    }
    if let Some(rest) = input.strip_prefix("~/")
        && let Some(home) = home_dir()
    {
        return home.join(rest).to_string_lossy().to_string();
    }
    input.to_owned()
}

pub fn expand_path(input: &str) -> anyhow::Result<PathBuf> {
    let expanded = expand_env_vars(&expand_tilde(input));
    let p = PathBuf::from(expanded);
    if p.is_absolute() {
        return Ok(p);
    }
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    Ok(cwd.join(p))
}

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").expect("env var pattern is valid")
});

fn expand_env_vars(input: &str) -> String {
    // Unknown variables are left untouched.
    ENV_VAR
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            std::env::var(key).unwrap_or_else(|_| caps[0].to_owned())
        })
        .to_string()
}

pub fn load() -> anyhow::Result<(Config, ConfigPaths)> {
    let paths = default_paths()?;
    let mut cfg = load_from_file(&paths.config_file)?;
    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    cfg.validate()?;
    log::debug!(
        "loaded config from {} (projects_dir={}, worktrees_dir={})",
        paths.config_file.display(),
        cfg.projects_dir,
        cfg.worktrees_dir
    );
    Ok((cfg, paths))
}

pub fn load_from_file(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let cfg: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to deserialize TOML in {}", path.display()))?;
    Ok(cfg)
}

pub fn apply_env_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup(PROJECTS_DIR_ENV).filter(|v| !v.trim().is_empty()) {
        cfg.projects_dir = v;
    }
    if let Some(v) = lookup(WORKTREES_DIR_ENV).filter(|v| !v.trim().is_empty()) {
        cfg.worktrees_dir = v;
    }
}

pub fn list_resolved_toml() -> anyhow::Result<String> {
    let (cfg, _paths) = load()?;
    Ok(toml::to_string_pretty(&cfg)?)
}

impl Config {
    pub fn validate(&self) -> Result<(), TwiggitError> {
        if self.projects_dir.trim().is_empty() {
            return Err(TwiggitError::Config(
                "projects_dir must not be empty".to_owned(),
            ));
        }
        if self.worktrees_dir.trim().is_empty() {
            return Err(TwiggitError::Config(
                "worktrees_dir must not be empty".to_owned(),
            ));
        }
        if self.projects_dir.trim() == self.worktrees_dir.trim() {
            return Err(TwiggitError::Config(
                "projects_dir and worktrees_dir must differ".to_owned(),
            ));
        }
        if self.default_source_branch.trim().is_empty() {
            return Err(TwiggitError::Config(
                "default_source_branch must not be empty".to_owned(),
            ));
        }
        if self.git.cli_timeout == 0 {
            return Err(TwiggitError::Config(
                "git.cli_timeout must be >= 1".to_owned(),
            ));
        }
        if self.services.max_concurrent == 0 {
            return Err(TwiggitError::Config(
                "services.max_concurrent must be >= 1".to_owned(),
            ));
        }
        for branch in &self.prune.protected_branches {
            naming::validate_branch_name(branch).map_err(|_| {
                TwiggitError::Config(format!(
                    "prune.protected_branches contains an invalid branch name '{branch}'"
                ))
            })?;
        }
        Ok(())
    }

    pub fn projects_path(&self) -> anyhow::Result<PathBuf> {
        expand_path(&self.projects_dir)
    }

    pub fn worktrees_path(&self) -> anyhow::Result<PathBuf> {
        expand_path(&self.worktrees_dir)
    }

    #[must_use]
    pub fn cli_timeout(&self) -> Duration {
        Duration::from_secs(self.git.cli_timeout)
    }

    #[must_use]
    pub fn context_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.context_detection.cache_ttl_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn config_validation_catches_invalid_values() {
        let mut cfg = Config::default();
        cfg.services.max_concurrent = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.git.cli_timeout = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.worktrees_dir = cfg.projects_dir.clone();
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.prune.protected_branches.push("bad..name".to_owned());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn loads_partial_file_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
projects_dir = "/srv/code"
default_source_branch = "develop"

[git]
cli_timeout = 30

[services]
concurrent_ops = true
"#,
        )
        .unwrap();

        let cfg = load_from_file(&path).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.projects_dir, "/srv/code");
        assert_eq!(cfg.worktrees_dir, "~/Worktrees");
        assert_eq!(cfg.default_source_branch, "develop");
        assert_eq!(cfg.cli_timeout(), Duration::from_secs(30));
        assert!(cfg.services.concurrent_ops);
        assert_eq!(cfg.services.max_concurrent, 4);
        assert_eq!(cfg.prune.protected_branches, vec!["main", "master"]);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = load_from_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn env_overrides_replace_directories() {
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg, |key| match key {
            PROJECTS_DIR_ENV => Some("/p".to_owned()),
            WORKTREES_DIR_ENV => Some("  ".to_owned()),
            _ => None,
        });
        assert_eq!(cfg.projects_dir, "/p");
        assert_eq!(cfg.worktrees_dir, "~/Worktrees");
    }

    #[test]
    fn expands_absolute_paths_verbatim() {
        let p = expand_path("/abs/path").unwrap();
        assert_eq!(p, PathBuf::from("/abs/path"));
    }
}
