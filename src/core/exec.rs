#![forbid(unsafe_code)]

use std::io::Read as _;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use wait_timeout::ChildExt as _;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("program '{0}' not found")]
    NotFound(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Runs one program in a directory and reports what it printed.
///
/// A non-zero exit status is not an error at this level; callers decide what
/// each exit code means.
pub trait CommandExecutor: std::fmt::Debug + Send + Sync {
    fn execute(
        &self,
        dir: &Path,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl CommandExecutor for SystemExecutor {
    fn execute(
        &self,
        dir: &Path,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        let started = Instant::now();
        let mut child = Command::new(program)
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ExecError::NotFound(program.to_owned()),
                _ => ExecError::Io(e),
            })?;

        // Drain both pipes while waiting so a chatty child never blocks on a full pipe.
        let stdout_reader = child.stdout.take().map(|mut out| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = out.read_to_end(&mut buf);
                buf
            })
        });
        let stderr_reader = child.stderr.take().map(|mut err| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = err.read_to_end(&mut buf);
                buf
            })
        });

        let status = match child.wait_timeout(timeout)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                log::debug!(
                    "{program} {} killed after {:?} in {}",
                    args.join(" "),
                    timeout,
                    dir.display()
                );
                return Err(ExecError::Timeout(timeout));
            }
        };

        let stdout = stdout_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        let stderr = stderr_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        let exit_code = status.code().unwrap_or(-1);
        log::debug!(
            "{program} {} in {} -> {exit_code} ({:?})",
            args.join(" "),
            dir.display(),
            started.elapsed()
        );

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            exit_code,
        })
    }
}
