#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::git::is_git_repository;
use crate::core::naming::is_valid_project_name;
use crate::error::TwiggitError;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Project {
    pub name: String,
    pub path: PathBuf,
}

/// Read-through view of `projects_dir`: one git repository per subdirectory.
#[derive(Debug, Clone)]
pub struct ProjectRegistry {
    projects_dir: PathBuf,
}

impl ProjectRegistry {
    #[must_use]
    pub fn new(projects_dir: PathBuf) -> Self {
        Self { projects_dir }
    }

    #[must_use]
    pub fn projects_dir(&self) -> &Path {
        &self.projects_dir
    }

    /// Directories that are not git repositories are skipped; an empty result is not an error.
    pub fn list_projects(&self) -> Result<Vec<Project>, TwiggitError> {
        let entries = match std::fs::read_dir(&self.projects_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!(
                    "projects directory {} does not exist",
                    self.projects_dir.display()
                );
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(TwiggitError::IoPath {
                    path: self.projects_dir.clone(),
                    source: e,
                });
            }
        };

        let mut projects = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| TwiggitError::IoPath {
                path: self.projects_dir.clone(),
                source: e,
            })?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_git_repository(&path)? {
                log::trace!("skipping {}: not a git repository", path.display());
                continue;
            }
            projects.push(Project {
                name: name.to_owned(),
                path: path.clone(),
            });
        }
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }

    /// Exact, case-sensitive lookup.
    pub fn resolve(&self, name: &str) -> Result<Project, TwiggitError> {
        if !is_valid_project_name(name) {
            return Err(TwiggitError::ProjectNotFound(name.to_owned()));
        }
        let path = self.projects_dir.join(name);
        if !path.is_dir() || !is_git_repository(&path)? {
            return Err(TwiggitError::ProjectNotFound(name.to_owned()));
        }
        // Case-insensitive filesystems would otherwise accept "Acme" for "acme".
        let listed = std::fs::read_dir(&self.projects_dir)
            .map_err(|e| TwiggitError::IoPath {
                path: self.projects_dir.clone(),
                source: e,
            })?
            .flatten()
            .any(|e| e.file_name().to_str() == Some(name));
        if !listed {
            return Err(TwiggitError::ProjectNotFound(name.to_owned()));
        }
        Ok(Project {
            name: name.to_owned(),
            path,
        })
    }
}
