//! Subprocess plumbing
//!
//! Every external tool (docker, certbot, systemctl, ...) is reached through a
//! [`CommandRunner`], so lifecycle code can be driven by scripted runners in
//! tests. The helpers at the bottom translate process results into crate
//! errors and log captured output before doing so.

use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};

// ============================================================================
// Invocation
// ============================================================================

/// A command line to run, with an optional working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    /// `sh -c <script>`, for pipelines.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Program and arguments joined by spaces.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

// ============================================================================
// Runner Trait
// ============================================================================

/// Runs external commands.
pub trait CommandRunner: Send + Sync {
    /// Runs to completion with stdout and stderr captured.
    fn output(&self, invocation: &Invocation)
    -> impl Future<Output = io::Result<CommandOutput>> + Send;

    /// Runs to completion attached to the terminal, returning the exit code.
    fn stream(&self, invocation: &Invocation)
    -> impl Future<Output = io::Result<Option<i32>>> + Send;

    /// Whether `program` resolves to an executable.
    fn exists(&self, program: &str) -> bool;
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    fn command(invocation: &Invocation) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&invocation.program);
        command.args(&invocation.args);
        if let Some(dir) = &invocation.cwd {
            command.current_dir(dir);
        }
        command
    }
}

impl CommandRunner for SystemRunner {
    async fn output(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        let output = Self::command(invocation)
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn stream(&self, invocation: &Invocation) -> io::Result<Option<i32>> {
        let status = Self::command(invocation)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await?;
        Ok(status.code())
    }

    fn exists(&self, program: &str) -> bool {
        find_in_path(program).is_some()
    }
}

/// Resolves a program name against `PATH`. Names containing `/` are checked
/// as paths.
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return is_executable(&path).then_some(path);
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

// ============================================================================
// Helpers
// ============================================================================

/// Runs a command and returns its output whatever the exit status.
///
/// Only a failure to launch is an error: a missing program becomes
/// [`Error::ToolMissing`].
pub async fn unchecked<R: CommandRunner>(
    runner: &R,
    invocation: &Invocation,
) -> Result<CommandOutput> {
    if let Some(dir) = &invocation.cwd
        && !dir.is_dir()
    {
        return Err(Error::file(
            dir,
            io::Error::new(io::ErrorKind::NotFound, "working directory does not exist"),
        ));
    }

    debug!("Running `{}`", invocation);
    let output = runner
        .output(invocation)
        .await
        .map_err(|e| launch_error(invocation, e))?;
    trace!(
        "`{}` exited with {:?} (stdout: {} bytes, stderr: {} bytes)",
        invocation,
        output.status,
        output.stdout.len(),
        output.stderr.len()
    );
    Ok(output)
}

/// Runs a command that must succeed. On failure the captured output is
/// logged and [`Error::CommandFailed`] returned.
pub async fn checked<R: CommandRunner>(
    runner: &R,
    invocation: &Invocation,
) -> Result<CommandOutput> {
    let output = unchecked(runner, invocation).await?;
    if !output.success() {
        log_output(invocation, &output);
        return Err(Error::CommandFailed {
            command: invocation.command_line(),
            status: output.status,
        });
    }
    Ok(output)
}

/// Runs a command whose failure is tolerated. Returns whether it succeeded.
pub async fn best_effort<R: CommandRunner>(runner: &R, invocation: &Invocation) -> bool {
    match unchecked(runner, invocation).await {
        Ok(output) if output.success() => true,
        Ok(output) => {
            warn!("`{}` failed with {:?}, continuing", invocation, output.status);
            debug!("stderr: {}", output.stderr.trim_end());
            false
        }
        Err(e) => {
            warn!("{}, continuing", e);
            false
        }
    }
}

/// Runs a command attached to the terminal. A non-zero exit is an error.
pub async fn streamed<R: CommandRunner>(runner: &R, invocation: &Invocation) -> Result<()> {
    debug!("Streaming `{}`", invocation);
    let status = runner
        .stream(invocation)
        .await
        .map_err(|e| launch_error(invocation, e))?;
    if status != Some(0) {
        return Err(Error::CommandFailed {
            command: invocation.command_line(),
            status,
        });
    }
    Ok(())
}

/// Logs the captured output of a failed command.
pub fn log_output(invocation: &Invocation, output: &CommandOutput) {
    error!("`{}` exited with {:?}", invocation, output.status);
    for (stream, text) in [("stdout", &output.stdout), ("stderr", &output.stderr)] {
        let text = text.trim_end();
        if !text.is_empty() {
            error!("{}:\n{}", stream, text);
        }
    }
}

fn launch_error(invocation: &Invocation, e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::NotFound {
        Error::ToolMissing {
            tool: invocation.program.clone(),
        }
    } else {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_command_line() {
        let inv = Invocation::new("docker")
            .args(["compose", "up"])
            .arg("-d")
            .current_dir("/home/hysteria2");
        assert_eq!(inv.to_string(), "docker compose up -d");
        assert_eq!(inv.cwd.as_deref(), Some(Path::new("/home/hysteria2")));
    }

    #[test]
    fn test_shell_invocation() {
        let inv = Invocation::shell("lsof -t -i:80 | xargs -r kill");
        assert_eq!(inv.program, "sh");
        assert_eq!(inv.args, vec!["-c", "lsof -t -i:80 | xargs -r kill"]);
    }

    #[test]
    fn test_find_in_path() {
        assert!(find_in_path("sh").is_some());
        assert!(find_in_path("definitely-not-a-real-tool-xyz").is_none());
    }

    #[tokio::test]
    async fn test_system_runner_captures_output() {
        let inv = Invocation::shell("echo out; echo err >&2; exit 3");
        let output = unchecked(&SystemRunner, &inv).await.unwrap();
        assert_eq!(output.status, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_checked_reports_exit_code() {
        let inv = Invocation::shell("exit 2");
        let err = checked(&SystemRunner, &inv).await.unwrap_err();
        assert!(matches!(err, Error::CommandFailed { status: Some(2), .. }));
    }

    #[tokio::test]
    async fn test_missing_program_is_tool_missing() {
        let inv = Invocation::new("definitely-not-a-real-tool-xyz");
        let err = unchecked(&SystemRunner, &inv).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ToolMissing { tool } if tool == "definitely-not-a-real-tool-xyz"
        ));
        assert!(!best_effort(&SystemRunner, &inv).await);
    }

    #[tokio::test]
    async fn test_missing_working_directory() {
        let inv = Invocation::new("true").current_dir("/nonexistent/heyhy-test");
        assert!(matches!(
            unchecked(&SystemRunner, &inv).await,
            Err(Error::File { .. })
        ));
    }
}
