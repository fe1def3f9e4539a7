#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorktreeState {
    Clean,
    Modified,
    Staged,
    Conflict,
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct GitStatus {
    pub modified: u32,
    pub added: u32,
    pub deleted: u32,
    pub untracked: u32,
    pub staged: u32,
    pub conflicts: u32,
}

impl GitStatus {
    #[must_use]
    pub fn from_porcelain(out: &str) -> Self {
        let mut status = Self::default();
        for line in out.lines() {
            if line.len() < 2 {
                continue;
            }
            process_status_line(line, &mut status);
        }
        status
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.total_changes() == 0
    }

    #[must_use]
    pub fn total_changes(&self) -> u32 {
        self.modified + self.added + self.deleted + self.untracked + self.staged + self.conflicts
    }
}

fn process_status_line(line: &str, status: &mut GitStatus) {
    let bytes = line.as_bytes();
    let index = bytes[0] as char;
    let worktree = bytes[1] as char;

    if index == '?' && worktree == '?' {
        status.untracked += 1;
        return;
    }
    if index == 'U' || worktree == 'U' || (index == 'A' && worktree == 'A') {
        status.conflicts += 1;
        return;
    }
    if index != ' ' {
        status.staged += 1;
    }

    match worktree {
        'M' | 'T' => status.modified += 1,
        'A' => status.added += 1,
        'D' => status.deleted += 1,
        _ => {}
    }
}

#[must_use]
pub fn determine_worktree_state(status: &GitStatus) -> WorktreeState {
    if status.conflicts > 0 {
        return WorktreeState::Conflict;
    }
    if status.staged > 0 {
        return WorktreeState::Staged;
    }
    if status.modified > 0 || status.added > 0 || status.deleted > 0 || status.untracked > 0 {
        return WorktreeState::Modified;
    }
    WorktreeState::Clean
}

#[must_use]
pub fn format_state(state: WorktreeState) -> &'static str {
    match state {
        WorktreeState::Clean => "clean",
        WorktreeState::Modified => "modified",
        WorktreeState::Staged => "staged",
        WorktreeState::Conflict => "conflict",
        WorktreeState::Unknown => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_git_status_porcelain_v1_lines() {
        let gs = GitStatus::from_porcelain(
            " M foo.txt\nA  added.txt\n?? untracked.txt\nUU conflict.txt\n D gone.txt\n",
        );

        assert_eq!(gs.modified, 1);
        assert_eq!(gs.untracked, 1);
        assert_eq!(gs.conflicts, 1);
        assert_eq!(gs.deleted, 1);
        assert_eq!(gs.staged, 1);
        assert!(!gs.is_clean());
    }

    #[test]
    fn empty_output_is_clean() {
        let gs = GitStatus::from_porcelain("");
        assert!(gs.is_clean());
        assert_eq!(determine_worktree_state(&gs), WorktreeState::Clean);
    }

    #[test]
    fn untracked_only_is_not_clean() {
        let gs = GitStatus::from_porcelain("?? scratch.txt\n");
        assert!(!gs.is_clean());
        assert_eq!(determine_worktree_state(&gs), WorktreeState::Modified);
    }

    #[test]
    fn determines_worktree_state_priority() {
        let mut gs = GitStatus::default();
        assert_eq!(determine_worktree_state(&gs), WorktreeState::Clean);

        gs.modified = 1;
        assert_eq!(determine_worktree_state(&gs), WorktreeState::Modified);

        gs = GitStatus::default();
        gs.staged = 1;
        assert_eq!(determine_worktree_state(&gs), WorktreeState::Staged);

        gs = GitStatus::default();
        gs.conflicts = 1;
        gs.staged = 2;
        assert_eq!(determine_worktree_state(&gs), WorktreeState::Conflict);
    }
}
