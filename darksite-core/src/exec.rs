//! Subprocess execution
//!
//! Every external tool (salt, wg, systemctl, ssh-keyscan, ansible, ...) is
//! invoked through a [`CommandSpec`]: a program plus discrete arguments. Nothing
//! is ever composed into a local shell string, and secrets travel on stdin.
//! The [`CommandExecutor`] trait is the seam tests use to script responses.

use crate::error::{DarksiteError, DarksiteResult};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Exit code reported when a streamed command is killed on timeout
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// A fully structured command invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Bytes written to the child's stdin, then stdin is closed
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Re-target this command to run as `user` via `sudo -H -u <user> env K=V ...`.
    ///
    /// sudo resets the environment, so variables are carried as discrete
    /// `KEY=VALUE` arguments to `env` instead.
    pub fn as_user(self, user: &str) -> Self {
        let mut wrapped = CommandSpec::new("sudo").args(["-H", "-u", user, "env"]);
        for (key, value) in &self.env {
            wrapped.args.push(format!("{}={}", key, value));
        }
        wrapped.args.push(self.program);
        wrapped.args.extend(self.args);
        wrapped.cwd = self.cwd;
        wrapped.stdin = self.stdin;
        wrapped.timeout = self.timeout;
        wrapped
    }
}

impl fmt::Display for CommandSpec {
    /// Human readable form for logs; stdin and environment values are never shown
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Trimmed, lossily decoded stdout
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    /// stdout followed by stderr, trimmed
    pub fn combined_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&self.stderr));
        text.trim().to_string()
    }
}

/// Result of a streamed command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Exited(Option<i32>),
    TimedOut,
}

impl StreamOutcome {
    /// Shell-style exit code: [`TIMEOUT_EXIT_CODE`] on timeout, -1 when killed by a signal
    pub fn code(&self) -> i32 {
        match self {
            StreamOutcome::Exited(Some(code)) => *code,
            StreamOutcome::Exited(None) => -1,
            StreamOutcome::TimedOut => TIMEOUT_EXIT_CODE,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, StreamOutcome::Exited(Some(0)))
    }
}

/// Trait for executing commands - allows mocking in tests
#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run to completion and capture output.
    ///
    /// When `spec.timeout` elapses the child is killed and an
    /// `io::ErrorKind::TimedOut` error is returned.
    async fn execute(&self, spec: &CommandSpec) -> io::Result<CommandOutput>;

    /// Run while handing every stdout/stderr line to `sink` as it arrives
    async fn stream(
        &self,
        spec: &CommandSpec,
        sink: &mut (dyn for<'s> FnMut(&'s str) + Send),
    ) -> io::Result<StreamOutcome>;
}

/// Default command executor that runs real commands
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandExecutor;

impl SystemCommandExecutor {
    fn command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }

    async fn feed_stdin(child: &mut Child, spec: &CommandSpec) -> io::Result<()> {
        if let (Some(input), Some(mut stdin)) = (&spec.stdin, child.stdin.take()) {
            stdin.write_all(input).await?;
            stdin.shutdown().await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn execute(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        debug!(command = %spec, "executing");
        let mut child = Self::command(spec).spawn()?;
        Self::feed_stdin(&mut child, spec).await?;

        // Dropping the future on timeout drops the child, and kill_on_drop reaps it.
        let output = match spec.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("'{}' timed out after {:?}", spec, limit),
                    ))
                }
            },
            None => child.wait_with_output().await?,
        };

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn stream(
        &self,
        spec: &CommandSpec,
        sink: &mut (dyn for<'s> FnMut(&'s str) + Send),
    ) -> io::Result<StreamOutcome> {
        debug!(command = %spec, "streaming");
        let mut child = Self::command(spec).spawn()?;
        Self::feed_stdin(&mut child, spec).await?;

        let pumped = match spec.timeout {
            Some(limit) => tokio::time::timeout(limit, pump_lines(&mut child, sink))
                .await
                .ok(),
            None => Some(pump_lines(&mut child, sink).await),
        };

        match pumped {
            Some(status) => Ok(StreamOutcome::Exited(status?.code())),
            None => {
                warn!(command = %spec, "timed out, killing");
                if let Err(e) = child.kill().await {
                    warn!("failed to kill timed out command: {}", e);
                }
                Ok(StreamOutcome::TimedOut)
            }
        }
    }
}

/// Run a command that must succeed
pub async fn run_checked(
    executor: &dyn CommandExecutor,
    spec: &CommandSpec,
) -> DarksiteResult<CommandOutput> {
    let output = executor.execute(spec).await.map_err(|e| io_to_error(spec, e))?;
    if !output.success() {
        return Err(DarksiteError::CommandFailed {
            command: spec.to_string(),
            details: format!(
                "rc={:?}: {}",
                output.exit_code,
                truncate(&output.combined_text(), 300)
            ),
        });
    }
    Ok(output)
}

/// Run a command whose failure is only worth a warning; returns whether it succeeded
pub async fn run_best_effort(executor: &dyn CommandExecutor, spec: &CommandSpec) -> bool {
    match run_checked(executor, spec).await {
        Ok(_) => true,
        Err(e) => {
            warn!("{}", e);
            false
        }
    }
}

/// Map a spawn/wait failure onto the error model
pub fn io_to_error(spec: &CommandSpec, error: io::Error) -> DarksiteError {
    match (error.kind(), spec.timeout) {
        (io::ErrorKind::TimedOut, Some(duration)) => DarksiteError::Timeout {
            operation: spec.to_string(),
            duration,
        },
        _ => DarksiteError::CommandFailed {
            command: spec.to_string(),
            details: error.to_string(),
        },
    }
}

/// Shorten command output for log lines
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Forward merged stdout/stderr lines until both close, then reap the child
async fn pump_lines(
    child: &mut Child,
    sink: &mut (dyn for<'s> FnMut(&'s str) + Send),
) -> io::Result<std::process::ExitStatus> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stderr not captured"))?;

    let mut out = BufReader::new(stdout).lines();
    let mut err = BufReader::new(stderr).lines();
    let (mut out_open, mut err_open) = (true, true);

    while out_open || err_open {
        tokio::select! {
            line = out.next_line(), if out_open => match line? {
                Some(line) => sink(&line),
                None => out_open = false,
            },
            line = err.next_line(), if err_open => match line? {
                Some(line) => sink(&line),
                None => err_open = false,
            },
        }
    }

    child.wait().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_display() {
        let spec = CommandSpec::new("salt")
            .arg("*")
            .args(["cmd.run", "echo hi"])
            .env("SECRET", "value")
            .timeout(Duration::from_secs(5));
        assert_eq!(spec.to_string(), "salt * cmd.run 'echo hi'");
        assert_eq!(spec.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_as_user_carries_environment_as_arguments() {
        let spec = CommandSpec::new("ansible")
            .args(["all", "-m", "ping"])
            .env("ANSIBLE_NOCOLOR", "1")
            .current_dir("/srv/ansible")
            .as_user("ansible");

        assert_eq!(spec.program, "sudo");
        assert_eq!(
            spec.args,
            vec!["-H", "-u", "ansible", "env", "ANSIBLE_NOCOLOR=1", "ansible", "all", "-m", "ping"]
        );
        assert!(spec.env.is_empty());
        assert_eq!(spec.cwd, Some(PathBuf::from("/srv/ansible")));
    }

    #[test]
    fn test_stream_outcome_codes() {
        assert_eq!(StreamOutcome::TimedOut.code(), TIMEOUT_EXIT_CODE);
        assert_eq!(StreamOutcome::Exited(Some(2)).code(), 2);
        assert_eq!(StreamOutcome::Exited(None).code(), -1);
        assert!(StreamOutcome::Exited(Some(0)).success());
    }

    #[tokio::test]
    async fn test_system_executor_feeds_stdin() {
        let spec = CommandSpec::new("cat").stdin("private-material\n");
        let output = SystemCommandExecutor.execute(&spec).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout_text(), "private-material");
    }

    #[tokio::test]
    async fn test_system_executor_times_out() {
        let spec = CommandSpec::new("sleep")
            .arg("5")
            .timeout(Duration::from_millis(100));
        let err = SystemCommandExecutor.execute(&spec).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_stream_forwards_both_pipes() {
        let spec = CommandSpec::new("sh").args(["-c", "echo out; echo err 1>&2; exit 3"]);
        let mut lines = Vec::new();
        let outcome = SystemCommandExecutor
            .stream(&spec, &mut |line: &str| lines.push(line.to_string()))
            .await
            .unwrap();

        assert_eq!(outcome, StreamOutcome::Exited(Some(3)));
        lines.sort();
        assert_eq!(lines, vec!["err".to_string(), "out".to_string()]);
    }

    #[tokio::test]
    async fn test_run_checked_reports_failure() {
        let spec = CommandSpec::new("sh").args(["-c", "echo nope 1>&2; exit 2"]);
        let err = run_checked(&SystemCommandExecutor, &spec).await.unwrap_err();
        match err {
            DarksiteError::CommandFailed { details, .. } => {
                assert!(details.contains("rc=Some(2)"));
                assert!(details.contains("nope"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!run_best_effort(&SystemCommandExecutor, &spec).await);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
    }

    #[tokio::test]
    async fn test_stream_kills_on_timeout() {
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo started; sleep 5"])
            .timeout(Duration::from_millis(200));
        let mut lines = Vec::new();
        let outcome = SystemCommandExecutor
            .stream(&spec, &mut |line: &str| lines.push(line.to_string()))
            .await
            .unwrap();

        assert_eq!(outcome, StreamOutcome::TimedOut);
        assert_eq!(outcome.code(), 124);
        assert_eq!(lines, vec!["started".to_string()]);
    }
}
