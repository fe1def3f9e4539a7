#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use crate::error::TwiggitError;

const FORBIDDEN_CHARS: &[char] = &[' ', '~', '^', ':', '?', '*', '[', '\\'];

/// Checks a branch name against git's ref-name rules before git sees it.
pub fn validate_branch_name(name: &str) -> Result<(), TwiggitError> {
    let fail = |reason: &str| {
        Err(TwiggitError::InvalidBranchFormat {
            name: name.to_owned(),
            reason: reason.to_owned(),
        })
    };

    if name.is_empty() {
        return fail("name is empty");
    }
    if name == "HEAD" || name == "@" {
        return fail("name is reserved");
    }
    if name.starts_with('-') {
        return fail("name must not start with '-'");
    }
    if name.ends_with('.') || name.ends_with('-') || name.ends_with('/') {
        return fail("name must not end with '.', '-' or '/'");
    }
    if name.contains("..") {
        return fail("name must not contain '..'");
    }
    if name.contains("@{") {
        return fail("name must not contain '@{'");
    }
    if name.contains("//") {
        return fail("name must not contain empty path components");
    }
    if let Some(c) = name
        .chars()
        .find(|c| c.is_control() || FORBIDDEN_CHARS.contains(c))
    {
        return fail(&format!("name must not contain {c:?}"));
    }
    for component in name.split('/') {
        if component.starts_with('.') {
            return fail("path components must not start with '.'");
        }
        if component.ends_with(".lock") {
            return fail("path components must not end with '.lock'");
        }
    }
    Ok(())
}

/// Project names are single directory names under the projects directory.
#[must_use]
pub fn is_valid_project_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.chars().any(char::is_control)
}

/// True when a `.` or `..` component would move the path off `worktrees_dir/<project>`.
#[must_use]
pub fn escapes_project_dir(branch: &str) -> bool {
    branch.split('/').any(|c| c == "." || c == "..")
}

/// `worktrees_dir/<project>/<branch>`; slashes in the branch become nested directories.
#[must_use]
pub fn worktree_path(worktrees_dir: &Path, project: &str, branch: &str) -> PathBuf {
    let mut path = worktrees_dir.join(project);
    for component in branch.split('/').filter(|c| !c.is_empty()) {
        path.push(component);
    }
    path
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::simple("feature-x")]
    #[case::slashes("feature/login/v2")]
    #[case::dots_inside("release-1.2")]
    #[case::underscore("fix_bug_42")]
    #[case::unicode("ветка")]
    fn accepts_valid_branch_names(#[case] name: &str) {
        validate_branch_name(name).unwrap();
    }

    #[rstest]
    #[case::empty("")]
    #[case::head("HEAD")]
    #[case::at("@")]
    #[case::leading_dot(".hidden")]
    #[case::leading_dash("-x")]
    #[case::trailing_dot("feature.")]
    #[case::trailing_dash("feature-")]
    #[case::trailing_slash("feature/")]
    #[case::lock_suffix("feature.lock")]
    #[case::component_lock("a.lock/b")]
    #[case::component_dot("a/.b")]
    #[case::double_dot("a..b")]
    #[case::traversal("../escape")]
    #[case::reflog("a@{1}")]
    #[case::double_slash("a//b")]
    #[case::space("has space")]
    #[case::tilde("a~1")]
    #[case::caret("a^")]
    #[case::colon("a:b")]
    #[case::glob("a*")]
    #[case::control("a\tb")]
    fn rejects_invalid_branch_names(#[case] name: &str) {
        let err = validate_branch_name(name).unwrap_err();
        assert!(matches!(err, TwiggitError::InvalidBranchFormat { .. }));
    }

    #[test]
    fn project_names_are_single_components() {
        assert!(is_valid_project_name("acme"));
        assert!(is_valid_project_name("my.project"));
        assert!(!is_valid_project_name(""));
        assert!(!is_valid_project_name(".."));
        assert!(!is_valid_project_name("a/b"));
    }

    #[rstest]
    #[case::parent("..", true)]
    #[case::nested_parent("../../x", true)]
    #[case::inner_parent("feature/../x", true)]
    #[case::current("./x", true)]
    #[case::dots_in_name("release..1", false)]
    #[case::plain("feature/login", false)]
    fn detects_components_leaving_the_project_dir(#[case] branch: &str, #[case] escapes: bool) {
        assert_eq!(escapes_project_dir(branch), escapes);
    }

    #[test]
    fn nests_slash_branches_under_project() {
        let p = worktree_path(Path::new("/wt"), "acme", "feature/x");
        assert_eq!(p, PathBuf::from("/wt/acme/feature/x"));
        let p = worktree_path(Path::new("/wt"), "acme", "plain");
        assert_eq!(p, PathBuf::from("/wt/acme/plain"));
    }
}
