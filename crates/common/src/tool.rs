//! Subprocess runner for the site's command-line tools (drush, composer)
//!
//! Success is the process exit code. Each call states up front whether a
//! failure may be tolerated; the outcome says which of the three cases
//! happened instead of hiding it behind a flag.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// How a failed invocation is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecPolicy {
    /// A non-zero exit fails the caller
    Fatal,
    /// A non-zero exit is reported but does not fail the caller
    Tolerate,
}

/// Captured result of one invocation
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub command: String,
    /// Exit code, `None` when killed by a signal or never started
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    fn status_label(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {}", code),
            None => "no exit code".to_string(),
        }
    }
}

/// Outcome of an invocation under its policy
#[derive(Debug, Clone)]
pub enum ExecOutcome {
    Success(ExecOutput),
    SuppressedFailure(ExecOutput),
    FatalFailure(ExecOutput),
}

impl ExecOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecOutcome::Success(_))
    }

    pub fn output(&self) -> &ExecOutput {
        match self {
            ExecOutcome::Success(out)
            | ExecOutcome::SuppressedFailure(out)
            | ExecOutcome::FatalFailure(out) => out,
        }
    }

    /// Fatal failures become errors, everything else passes through
    pub fn into_result(self) -> Result<ExecOutput> {
        match self {
            ExecOutcome::Success(out) | ExecOutcome::SuppressedFailure(out) => Ok(out),
            ExecOutcome::FatalFailure(out) => Err(Error::CommandFailed {
                status: out.status_label(),
                command: out.command,
                stderr: out.stderr.trim().to_string(),
            }),
        }
    }
}

/// A tool invoked as an argv prefix plus per-call arguments, never through a shell
#[derive(Debug, Clone)]
pub struct ToolRunner {
    program: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl ToolRunner {
    pub fn new(program: Vec<String>, working_dir: Option<PathBuf>) -> Self {
        Self { program, working_dir }
    }

    /// Run the tool with extra arguments under a policy and timeout
    ///
    /// A timeout is always an error; it is not a tool failure that a
    /// policy can tolerate.
    pub async fn run(&self, args: &[&str], policy: ExecPolicy, timeout: Duration) -> Result<ExecOutcome> {
        let (program, prefix) = self
            .program
            .split_first()
            .ok_or_else(|| Error::InvalidConfig("tool command is empty".to_string()))?;

        let command_line = self
            .program
            .iter()
            .map(String::as_str)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        debug!("exec: {}", command_line);

        let mut cmd = Command::new(program);
        cmd.args(prefix)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Err(_) => {
                return Err(Error::Timeout {
                    command: command_line,
                    seconds: timeout.as_secs(),
                })
            }
            Ok(Ok(output)) => ExecOutput {
                command: command_line,
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            },
            // Could not start the tool at all; treated like a failed exit
            Ok(Err(e)) => ExecOutput {
                command: command_line,
                code: None,
                stdout: String::new(),
                stderr: e.to_string(),
            },
        };

        let succeeded = output.code == Some(0);
        Ok(match (succeeded, policy) {
            (true, _) => ExecOutcome::Success(output),
            (false, ExecPolicy::Tolerate) => {
                warn!(
                    "Ignoring failure of `{}` ({}): {}",
                    output.command,
                    output.status_label(),
                    output.stderr.trim()
                );
                ExecOutcome::SuppressedFailure(output)
            }
            (false, ExecPolicy::Fatal) => ExecOutcome::FatalFailure(output),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn runner(program: &[&str]) -> ToolRunner {
        ToolRunner::new(program.iter().map(|s| s.to_string()).collect(), None)
    }

    #[tokio::test]
    async fn test_success_outcome() {
        let tool = runner(&["echo"]);
        let outcome = tool.run(&["hello"], ExecPolicy::Fatal, Duration::from_secs(5)).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.output().stdout.trim(), "hello");
        assert_eq!(outcome.output().command, "echo hello");
    }

    #[tokio::test]
    async fn test_tolerated_failure_is_suppressed() {
        let tool = runner(&["false"]);
        let outcome = tool.run(&[], ExecPolicy::Tolerate, Duration::from_secs(5)).await.unwrap();
        assert!(matches!(outcome, ExecOutcome::SuppressedFailure(_)));
        assert!(outcome.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_fatal_failure_becomes_error() {
        let tool = runner(&["false"]);
        let outcome = tool.run(&[], ExecPolicy::Fatal, Duration::from_secs(5)).await.unwrap();
        assert!(matches!(outcome, ExecOutcome::FatalFailure(_)));
        assert!(matches!(outcome.into_result(), Err(Error::CommandFailed { .. })));
    }

    #[tokio::test]
    async fn test_missing_binary_respects_policy() {
        let tool = runner(&["cmsprobe-no-such-binary"]);
        let tolerated = tool.run(&[], ExecPolicy::Tolerate, Duration::from_secs(5)).await.unwrap();
        assert!(matches!(tolerated, ExecOutcome::SuppressedFailure(_)));
        assert_eq!(tolerated.output().code, None);

        let fatal = tool.run(&[], ExecPolicy::Fatal, Duration::from_secs(5)).await.unwrap();
        assert!(fatal.into_result().is_err());
    }

    #[tokio::test]
    async fn test_prefix_and_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ToolRunner::new(vec!["sh".to_string(), "-c".to_string(), "pwd; echo \"$0\"".to_string()], Some(dir.path().to_path_buf()));
        let outcome = tool.run(&["install"], ExecPolicy::Fatal, Duration::from_secs(5)).await.unwrap();
        let stdout = outcome.into_result().unwrap().stdout;
        let mut lines = stdout.lines();
        let cwd = std::fs::canonicalize(lines.next().unwrap()).unwrap();
        assert_eq!(cwd, std::fs::canonicalize(dir.path()).unwrap());
        assert_eq!(lines.next(), Some("install"));
    }

    #[tokio::test]
    async fn test_timeout_is_always_an_error() {
        let tool = runner(&["sleep"]);
        let result = tool.run(&["5"], ExecPolicy::Tolerate, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }
}
