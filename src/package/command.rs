//! Command normalization and execution.
//!
//! Catalog commands are written as YAML blocks and may span lines. They are
//! flattened into one shell line before they run. Every process is spawned
//! through a [`CommandRunner`], so tests and `--dry-run` can swap the real
//! process launcher out.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command as TokioCommand;
use tokio_util::sync::CancellationToken;

use super::env_path::PathOverlay;
use super::error::{PackageError, Result};
use crate::common::shell::shell_quote;
use crate::ui::prelude::*;

/// Collapse line breaks, tabs and repeated spaces into single spaces.
pub fn normalize_command(raw: &str) -> String {
    raw.split([' ', '\t', '\r', '\n'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// A process to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    shell_line: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            shell_line: None,
        }
    }

    /// Run `line` through the host shell (`sh -c` or `cmd /C`).
    pub fn shell(line: &str) -> Self {
        let line = normalize_command(line);
        let mut spec = if cfg!(windows) {
            let words = shell_words::split(&line).unwrap_or_else(|_| vec![line.clone()]);
            Self::new("cmd").arg("/C").args(words)
        } else {
            Self::new("sh").arg("-c").arg(line.clone())
        };
        spec.shell_line = Some(line);
        spec
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

    pub fn cwd(mut self, dir: Option<&Path>) -> Self {
        self.cwd = dir.map(Path::to_path_buf);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Human readable form used in logs and errors.
    pub fn display(&self) -> String {
        if let Some(line) = &self.shell_line {
            return line.clone();
        }
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal
    pub code: Option<i32>,
    /// Combined stdout and stderr
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Spawn the process and wait for it. A non-zero exit is not an error here.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Run a command and fail unless it exits 0 or with an allow-listed code.
pub async fn run_checked(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
    allowed_exit_codes: &[i32],
) -> Result<CommandOutput> {
    let output = runner.run(spec).await?;
    match output.code {
        Some(0) => Ok(output),
        Some(code) if allowed_exit_codes.contains(&code) => {
            emit(
                Level::Debug,
                "exec.allowed_exit",
                &format!("`{}` exited with allowed code {}", spec.display(), code),
                None,
            );
            Ok(output)
        }
        code => Err(PackageError::CommandFailed {
            command: spec.display(),
            code,
        }),
    }
}

/// Spawns real processes.
///
/// Output is streamed line by line to the debug log while the process runs.
/// Cancelling the token kills the child.
pub struct ShellRunner {
    token: CancellationToken,
    overlay: Arc<PathOverlay>,
}

impl ShellRunner {
    pub fn new(token: CancellationToken, overlay: Arc<PathOverlay>) -> Self {
        Self { token, overlay }
    }
}

async fn pump_lines<R>(reader: Option<R>, sink: Arc<Mutex<String>>)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                emit(Level::Debug, "exec.output", &line, None);
                let mut out = sink.lock().unwrap_or_else(|e| e.into_inner());
                out.push_str(&line);
                out.push('\n');
            }
            Ok(None) => break,
            Err(e) => {
                emit(
                    Level::Debug,
                    "exec.output",
                    &format!("stopped reading output: {}", e),
                    None,
                );
                break;
            }
        }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        if self.token.is_cancelled() {
            return Err(PackageError::Cancelled);
        }

        let display = spec.display();
        emit(Level::Info, "exec.command", &format!("$ {}", display), None);

        let mut cmd = TokioCommand::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        if !self.overlay.added().is_empty() {
            cmd.env("PATH", self.overlay.search_path());
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|source| PackageError::Spawn {
            command: display.clone(),
            source,
        })?;

        let sink = Arc::new(Mutex::new(String::new()));
        let stdout = tokio::spawn(pump_lines(child.stdout.take(), sink.clone()));
        let stderr = tokio::spawn(pump_lines(child.stderr.take(), sink.clone()));

        let status = tokio::select! {
            status = child.wait() => status
                .map_err(|e| PackageError::io(format!("waiting for `{}`", display), e))?,
            _ = self.token.cancelled() => {
                if let Err(e) = child.kill().await {
                    emit(
                        Level::Debug,
                        "exec.kill",
                        &format!("Could not kill `{}`: {}", display, e),
                        None,
                    );
                }
                emit(
                    Level::Warn,
                    "exec.cancelled",
                    &format!("Cancelled `{}`", display),
                    None,
                );
                return Err(PackageError::Cancelled);
            }
        };

        for (stream, pump) in [("stdout", stdout), ("stderr", stderr)] {
            if let Err(e) = pump.await {
                emit(
                    Level::Debug,
                    "exec.output",
                    &format!("Lost {} of `{}`: {}", stream, display, e),
                    None,
                );
            }
        }
        let output = sink.lock().unwrap_or_else(|e| e.into_inner()).clone();

        Ok(CommandOutput {
            code: status.code(),
            output,
        })
    }
}

/// Prints commands instead of running them.
pub struct DryRunRunner;

#[async_trait]
impl CommandRunner for DryRunRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let cwd = spec
            .cwd
            .as_ref()
            .map(|dir| format!(" (in {})", dir.display()))
            .unwrap_or_default();
        emit(
            Level::Info,
            "exec.dry_run",
            &format!("[DRY RUN] {}{}", spec.display(), cwd),
            None,
        );
        Ok(CommandOutput {
            code: Some(0),
            output: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_command_flattens_blocks() {
        let raw = "curl -fsSL https://example.org/key.gpg \\\r\n\t| gpg --dearmor\n   -o /usr/share/keyrings/key.gpg\n";
        assert_eq!(
            normalize_command(raw),
            "curl -fsSL https://example.org/key.gpg \\ | gpg --dearmor -o /usr/share/keyrings/key.gpg"
        );
    }

    #[test]
    fn test_normalize_command_is_idempotent() {
        let samples = [
            "  apt-get   install -y nginx  ",
            "line one\r\nline two\rline three\nline four",
            "\t\t",
            "",
            "echo 'a  b'",
        ];
        for sample in samples {
            let once = normalize_command(sample);
            assert_eq!(normalize_command(&once), once);
        }
        assert_eq!(normalize_command(" \r\n\t "), "");
    }

    #[test]
    fn test_shell_spec_display_uses_line() {
        let spec = CommandSpec::shell("echo hello\n  world");
        assert_eq!(spec.display(), "echo hello world");
    }

    #[test]
    fn test_program_spec_display_quotes_args() {
        let spec = CommandSpec::new("sc").args(["create", "GameAP Daemon", "start=auto"]);
        assert_eq!(spec.display(), "sc create 'GameAP Daemon' start=auto");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_runner_captures_output_and_code() {
        let runner = ShellRunner::new(
            CancellationToken::new(),
            Arc::new(PathOverlay::from_env()),
        );
        let out = runner
            .run(&CommandSpec::shell("echo out; echo err >&2; exit 3"))
            .await
            .unwrap();
        assert_eq!(out.code, Some(3));
        assert!(out.output.contains("out"));
        assert!(out.output.contains("err"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_checked_allow_list() {
        let runner = ShellRunner::new(
            CancellationToken::new(),
            Arc::new(PathOverlay::from_env()),
        );
        let spec = CommandSpec::shell("exit 42");
        assert!(run_checked(&runner, &spec, &[42]).await.is_ok());
        let err = run_checked(&runner, &spec, &[1, 2]).await.unwrap_err();
        assert!(matches!(err, PackageError::CommandFailed { code: Some(42), .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_runner_env_and_cwd() {
        let dir = tempfile::TempDir::new().unwrap();
        let runner = ShellRunner::new(
            CancellationToken::new(),
            Arc::new(PathOverlay::from_env()),
        );
        let spec = CommandSpec::shell("echo $PANELCTL_STEP_VALUE; pwd")
            .env("PANELCTL_STEP_VALUE", "from-step")
            .cwd(Some(dir.path()));
        let out = runner.run(&spec).await.unwrap();
        assert!(out.output.contains("from-step"));
        let canonical = dir.path().canonicalize().unwrap();
        assert!(out.output.contains(canonical.to_str().unwrap()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let token = CancellationToken::new();
        let runner = ShellRunner::new(token.clone(), Arc::new(PathOverlay::from_env()));

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let err = runner
            .run(&CommandSpec::shell("sleep 30"))
            .await
            .unwrap_err();
        assert!(matches!(err, PackageError::Cancelled));
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_output_pump_keeps_lines_read_before_invalid_bytes() {
        let sink = Arc::new(Mutex::new(String::new()));
        let input: &[u8] = b"first\n\xff\xfe\nlast\n";
        pump_lines(Some(input), sink.clone()).await;
        assert_eq!(*sink.lock().unwrap(), "first\n");
    }

    #[tokio::test]
    async fn test_dry_run_runner_succeeds_without_spawning() {
        let out = DryRunRunner
            .run(&CommandSpec::new("definitely-not-a-real-binary"))
            .await
            .unwrap();
        assert!(out.success());
    }
}
