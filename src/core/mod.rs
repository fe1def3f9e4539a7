#![forbid(unsafe_code)]

pub mod context;
pub mod exec;
pub mod git;
pub mod naming;
pub mod navigation;
pub mod prune;
pub mod registry;
pub mod services;
pub mod status;
pub mod target;
pub mod worktree;
