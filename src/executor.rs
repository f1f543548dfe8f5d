//! Flexible command execution for test environments.
//!
//! This module contains the runner that executes test commands on behalf of
//! an environment. It handles:
//!
//! - Single shell commands (`pytest -v`) and shell scripts (`./run-e2e.sh`)
//! - Ordered command sequences that stop at the first failure
//! - Streaming output to an observer while buffering for the final result
//! - Timeouts with forceful termination
//!
//! Expected failures are encoded in [`ExecutionResult`]: a non-zero exit
//! code, the reserved timeout code, or the configuration-error code. The
//! runner itself never returns an error for these.
//!
//! # Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Command succeeded |
//! | 1 | Command failed (or could not be spawned) |
//! | 2 | Configuration problem (e.g. missing working directory) |
//! | 124 | Command timed out and was terminated |

pub mod compose;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;
use tracing::debug;

pub use compose::ComposeRunner;

/// Reserved exit code for configuration problems detected before spawning.
pub const EXIT_CONFIG_ERROR: i32 = 2;

/// Reserved exit code for commands terminated by timeout.
///
/// Distinct from any exit code a test framework produces on its own
/// (matches the shell convention for `timeout(1)`).
pub const EXIT_TIMEOUT: i32 = 124;

/// A test command: one shell command or an ordered sequence.
///
/// Deserializes from either a TOML string or an array of strings, so
/// descriptors can write `test_command = "pytest"` or
/// `test_command = ["npm run build", "npm test"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    /// A single command interpreted by the shell.
    Single(String),
    /// An ordered sequence executed fail-fast.
    Sequence(Vec<String>),
}

impl CommandSpec {
    /// Returns `true` if no command is configured.
    pub fn is_empty(&self) -> bool {
        match self {
            CommandSpec::Single(cmd) => cmd.trim().is_empty(),
            CommandSpec::Sequence(cmds) => cmds.is_empty(),
        }
    }

    /// Renders the command for logging and result records.
    pub fn display(&self) -> String {
        match self {
            CommandSpec::Single(cmd) => cmd.clone(),
            CommandSpec::Sequence(cmds) => cmds.join(" && "),
        }
    }
}

impl Default for CommandSpec {
    fn default() -> Self {
        CommandSpec::Single(String::new())
    }
}

impl From<&str> for CommandSpec {
    fn from(cmd: &str) -> Self {
        CommandSpec::Single(cmd.to_string())
    }
}

impl From<String> for CommandSpec {
    fn from(cmd: String) -> Self {
        CommandSpec::Single(cmd)
    }
}

impl From<Vec<String>> for CommandSpec {
    fn from(cmds: Vec<String>) -> Self {
        CommandSpec::Sequence(cmds)
    }
}

/// Observer invoked with each output line when streaming is enabled.
pub type OutputObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// Per-invocation execution options.
#[derive(Clone)]
pub struct ExecOptions {
    /// Maximum wall-clock time before the process is terminated.
    pub timeout: Option<Duration>,
    /// Extra environment variables for this invocation only.
    pub env: Vec<(String, String)>,
    /// Forward output lines to the runner's observer as they arrive.
    pub stream: bool,
    /// Interpret the command through `sh -c` (default) instead of
    /// splitting it into an argv.
    pub shell: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecOptions {
    /// Creates options with shell interpretation enabled.
    pub fn new() -> Self {
        Self {
            timeout: None,
            env: Vec::new(),
            stream: false,
            shell: true,
        }
    }

    /// Sets the execution timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Adds an environment variable for this invocation.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Enables streaming to the runner's observer.
    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }
}

/// Immutable outcome of one command invocation.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Exit code; see the module docs for reserved values.
    pub exit_code: i32,
    /// Captured standard output (merged with stderr when streaming).
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Wall-clock execution time.
    pub duration: Duration,
    /// The command that was run, rendered for display.
    pub command: String,
}

impl ExecutionResult {
    /// Returns `true` if the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs test commands in a working directory with a base environment.
///
/// The runner is the sole process-spawning component; environments delegate
/// test execution to it. A missing working directory is reported as a
/// configuration error without spawning anything.
pub struct CommandRunner {
    working_dir: PathBuf,
    base_env: Vec<(String, String)>,
    observer: Option<OutputObserver>,
}

impl CommandRunner {
    /// Creates a runner rooted at the given working directory.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            base_env: Vec::new(),
            observer: None,
        }
    }

    /// Adds a base environment variable applied to every invocation.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.base_env.push((key.into(), value.into()));
        self
    }

    /// Sets the observer that receives streamed output lines.
    pub fn with_observer(mut self, observer: OutputObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Executes a command or sequence and returns its result.
    pub async fn execute(&self, command: &CommandSpec, opts: &ExecOptions) -> ExecutionResult {
        match command {
            CommandSpec::Single(cmd) => self.execute_single(cmd, opts).await,
            CommandSpec::Sequence(cmds) => self.execute_sequence(cmds, opts).await,
        }
    }

    async fn execute_single(&self, command: &str, opts: &ExecOptions) -> ExecutionResult {
        if !self.working_dir.is_dir() {
            return ExecutionResult {
                exit_code: EXIT_CONFIG_ERROR,
                stdout: String::new(),
                stderr: format!(
                    "Working directory does not exist: {}",
                    self.working_dir.display()
                ),
                duration: Duration::ZERO,
                command: command.to_string(),
            };
        }

        let mut process = if opts.shell {
            let mut p = tokio::process::Command::new("/bin/sh");
            p.arg("-c").arg(command);
            p
        } else {
            let argv = match shell_words::split(command) {
                Ok(argv) if !argv.is_empty() => argv,
                _ => {
                    return ExecutionResult {
                        exit_code: EXIT_CONFIG_ERROR,
                        stdout: String::new(),
                        stderr: format!("Invalid command: {:?}", command),
                        duration: Duration::ZERO,
                        command: command.to_string(),
                    };
                }
            };
            let mut p = tokio::process::Command::new(&argv[0]);
            p.args(&argv[1..]);
            p
        };

        process.current_dir(&self.working_dir);
        for (key, value) in &self.base_env {
            process.env(key, value);
        }
        for (key, value) in &opts.env {
            process.env(key, value);
        }

        debug!("executing: {}", command);
        run_process(process, command, opts, self.observer.as_ref()).await
    }

    /// Executes commands in order, stopping at the first non-zero exit.
    ///
    /// The result aggregates the output of every attempted command (each
    /// prefixed with a header naming it) and carries the failing command's
    /// exit code. Commands after the failure are never started.
    async fn execute_sequence(&self, commands: &[String], opts: &ExecOptions) -> ExecutionResult {
        let mut all_stdout = Vec::new();
        let mut all_stderr = Vec::new();
        let mut total = Duration::ZERO;

        for cmd in commands {
            let result = self.execute_single(cmd, opts).await;
            all_stdout.push(format!("=== {} ===\n{}", cmd, result.stdout));
            if !result.stderr.is_empty() {
                all_stderr.push(format!("=== {} ===\n{}", cmd, result.stderr));
            }
            total += result.duration;

            if !result.success() {
                return ExecutionResult {
                    exit_code: result.exit_code,
                    stdout: all_stdout.join("\n"),
                    stderr: all_stderr.join("\n"),
                    duration: total,
                    command: commands.join(" && "),
                };
            }
        }

        ExecutionResult {
            exit_code: 0,
            stdout: all_stdout.join("\n"),
            stderr: all_stderr.join("\n"),
            duration: total,
            command: commands.join(" && "),
        }
    }
}

/// Spawns a prepared process and drives it to completion.
///
/// Shared by the local runner and [`ComposeRunner`]. Honors the timeout and
/// streaming options; spawn failures become exit code 1 results.
pub(crate) async fn run_process(
    mut process: tokio::process::Command,
    command: &str,
    opts: &ExecOptions,
    observer: Option<&OutputObserver>,
) -> ExecutionResult {
    let start = tokio::time::Instant::now();
    process.kill_on_drop(true);
    // Own process group, so a timeout can take down the whole tree.
    process.process_group(0);

    if opts.stream {
        run_streaming(process, command, opts, observer, start).await
    } else {
        run_buffered(process, command, opts, start).await
    }
}

/// Streams merged stdout/stderr lines to the observer while buffering them.
async fn run_streaming(
    mut process: tokio::process::Command,
    command: &str,
    opts: &ExecOptions,
    observer: Option<&OutputObserver>,
    start: tokio::time::Instant,
) -> ExecutionResult {
    process.stdout(Stdio::piped());
    process.stderr(Stdio::piped());

    let mut child = match process.spawn() {
        Ok(child) => child,
        Err(err) => return spawn_failure(command, err, start),
    };

    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");

    let stdout_lines = LinesStream::new(BufReader::new(stdout).lines());
    let stderr_lines = LinesStream::new(BufReader::new(stderr).lines());
    let mut lines = stream::select(stdout_lines, stderr_lines);

    let deadline = opts.timeout.map(|t| start + t);
    let mut buffer = String::new();

    loop {
        let next = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, lines.next()).await {
                Ok(next) => next,
                Err(_) => {
                    kill_process_tree(&mut child).await;
                    return ExecutionResult {
                        exit_code: EXIT_TIMEOUT,
                        stdout: buffer,
                        stderr: timeout_message(opts.timeout),
                        duration: start.elapsed(),
                        command: command.to_string(),
                    };
                }
            },
            None => lines.next().await,
        };

        match next {
            Some(line) => {
                let line = line.unwrap_or_default();
                if let Some(observer) = observer {
                    observer(&line);
                }
                buffer.push_str(&line);
                buffer.push('\n');
            }
            None => break,
        }
    }

    let exit_code = match child.wait().await {
        Ok(status) => status.code().unwrap_or(-1),
        Err(_) => -1,
    };

    ExecutionResult {
        exit_code,
        stdout: buffer,
        stderr: String::new(),
        duration: start.elapsed(),
        command: command.to_string(),
    }
}

/// Captures all output and returns once the process exits.
async fn run_buffered(
    mut process: tokio::process::Command,
    command: &str,
    opts: &ExecOptions,
    start: tokio::time::Instant,
) -> ExecutionResult {
    process.stdout(Stdio::piped());
    process.stderr(Stdio::piped());

    let child = match process.spawn() {
        Ok(child) => child,
        Err(err) => return spawn_failure(command, err, start),
    };
    let pid = child.id();

    let output = match opts.timeout {
        Some(timeout) => match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output,
            Err(_) => {
                if let Some(pid) = pid {
                    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
                }
                return ExecutionResult {
                    exit_code: EXIT_TIMEOUT,
                    stdout: String::new(),
                    stderr: timeout_message(opts.timeout),
                    duration: start.elapsed(),
                    command: command.to_string(),
                };
            }
        },
        None => child.wait_with_output().await,
    };

    match output {
        Ok(output) => ExecutionResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration: start.elapsed(),
            command: command.to_string(),
        },
        Err(err) => spawn_failure(command, err, start),
    }
}

/// Kills a child and everything in its process group.
async fn kill_process_tree(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        signal_group(pid, nix::sys::signal::Signal::SIGKILL);
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}

/// Delivers a signal to the process group led by `pid`.
pub(crate) fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(-(pid as i32)), signal);
}

fn spawn_failure(
    command: &str,
    err: std::io::Error,
    start: tokio::time::Instant,
) -> ExecutionResult {
    ExecutionResult {
        exit_code: 1,
        stdout: String::new(),
        stderr: err.to_string(),
        duration: start.elapsed(),
        command: command.to_string(),
    }
}

fn timeout_message(timeout: Option<Duration>) -> String {
    match timeout {
        Some(t) => format!("Command timed out after {}s", t.as_secs()),
        None => "Command timed out".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> CommandRunner {
        CommandRunner::new(".")
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let result = runner()
            .execute(&"echo 'hello world'".into(), &ExecOptions::new())
            .await;

        assert!(result.success());
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let result = runner().execute(&"exit 1".into(), &ExecOptions::new()).await;

        assert!(!result.success());
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test]
    async fn test_execute_with_env_vars() {
        let runner = CommandRunner::new(".").env("MY_VAR", "test123");
        let result = runner
            .execute(&"echo $MY_VAR".into(), &ExecOptions::new())
            .await;

        assert!(result.stdout.contains("test123"));
    }

    #[tokio::test]
    async fn test_per_call_env() {
        let result = runner()
            .execute(
                &"echo $CALL_VAR".into(),
                &ExecOptions::new().env("CALL_VAR", "per-call"),
            )
            .await;

        assert!(result.stdout.contains("per-call"));
    }

    #[tokio::test]
    async fn test_sequence_success() {
        let commands = vec![
            "echo first".to_string(),
            "echo second".to_string(),
            "echo third".to_string(),
        ];
        let result = runner()
            .execute(&CommandSpec::Sequence(commands), &ExecOptions::new())
            .await;

        assert!(result.success());
        assert!(result.stdout.contains("first"));
        assert!(result.stdout.contains("second"));
        assert!(result.stdout.contains("third"));
    }

    #[tokio::test]
    async fn test_sequence_stops_on_failure() {
        let commands = vec![
            "echo first".to_string(),
            "exit 3".to_string(),
            "echo never".to_string(),
        ];
        let result = runner()
            .execute(&CommandSpec::Sequence(commands), &ExecOptions::new())
            .await;

        assert_eq!(result.exit_code, 3);
        assert!(result.stdout.contains("first"));
        assert!(!result.stdout.contains("never"));
        assert_eq!(result.command, "echo first && exit 3 && echo never");
    }

    #[tokio::test]
    async fn test_missing_working_directory() {
        let runner = CommandRunner::new("/nonexistent/path/12345");
        let result = runner
            .execute(&"echo test".into(), &ExecOptions::new())
            .await;

        assert_eq!(result.exit_code, EXIT_CONFIG_ERROR);
        assert!(result.stderr.contains("does not exist"));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let result = runner()
            .execute(
                &"sleep 10".into(),
                &ExecOptions::new().timeout(Duration::from_millis(200)),
            )
            .await;

        assert_eq!(result.exit_code, EXIT_TIMEOUT);
        assert!(result.stderr.to_lowercase().contains("timed out"));
    }

    #[tokio::test]
    async fn test_streaming_buffers_and_forwards() {
        use std::sync::Mutex;

        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: OutputObserver = Arc::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string());
        });

        let runner = CommandRunner::new(".").with_observer(observer);
        let result = runner
            .execute(
                &"echo one; echo two".into(),
                &ExecOptions::new().streaming(),
            )
            .await;

        assert!(result.success());
        assert!(result.stdout.contains("one"));
        assert!(result.stdout.contains("two"));
        let seen = seen.lock().unwrap();
        assert!(seen.iter().any(|l| l == "one"));
        assert!(seen.iter().any(|l| l == "two"));
    }

    #[tokio::test]
    async fn test_streaming_merges_stderr() {
        let result = runner()
            .execute(
                &"echo out; echo err >&2".into(),
                &ExecOptions::new().streaming(),
            )
            .await;

        assert!(result.stdout.contains("out"));
        assert!(result.stdout.contains("err"));
        assert!(result.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_no_shell_mode_splits_argv() {
        let mut opts = ExecOptions::new();
        opts.shell = false;
        let result = runner().execute(&"echo plain-argv".into(), &opts).await;

        assert!(result.success());
        assert!(result.stdout.contains("plain-argv"));
    }

    #[tokio::test]
    async fn test_duration_tracked() {
        let result = runner()
            .execute(&"sleep 0.1".into(), &ExecOptions::new())
            .await;

        assert!(result.duration >= Duration::from_millis(100));
        assert!(result.duration < Duration::from_secs(2));
    }

    #[test]
    fn test_command_spec_display() {
        let single: CommandSpec = "pytest -v".into();
        assert_eq!(single.display(), "pytest -v");

        let seq = CommandSpec::Sequence(vec!["a".into(), "b".into()]);
        assert_eq!(seq.display(), "a && b");
    }

    #[test]
    fn test_command_spec_empty() {
        assert!(CommandSpec::Single("  ".into()).is_empty());
        assert!(CommandSpec::Sequence(vec![]).is_empty());
        assert!(!CommandSpec::Single("pytest".into()).is_empty());
    }
}
