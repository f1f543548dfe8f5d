//! Containerized command execution via the `docker compose` CLI.
//!
//! Testbed does not talk to a container runtime directly; every container
//! operation shells out to the host's `docker compose`, scoped to one
//! compose file and project name so concurrent evaluations cannot touch
//! each other's containers.

use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use super::{CommandSpec, ExecOptions, ExecutionResult, OutputObserver, run_process};

/// Executes commands inside a compose service container.
///
/// Exec invocations disable the pseudo-TTY (`-T`) so output capture stays
/// line-buffered, and inject per-call environment variables as discrete
/// `-e` flags. The test command itself always runs through `sh -c` inside
/// the container; host tooling is never assumed.
pub struct ComposeRunner {
    compose_file: String,
    project_name: Option<String>,
    service: String,
    project_dir: PathBuf,
    observer: Option<OutputObserver>,
}

impl ComposeRunner {
    /// Creates a runner targeting one service of one compose file.
    pub fn new(
        compose_file: impl Into<String>,
        service: impl Into<String>,
        project_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            compose_file: compose_file.into(),
            project_name: None,
            service: service.into(),
            project_dir: project_dir.into(),
            observer: None,
        }
    }

    /// Scopes all invocations to a compose project namespace.
    pub fn with_project_name(mut self, name: impl Into<String>) -> Self {
        self.project_name = Some(name.into());
        self
    }

    /// Sets the observer that receives streamed output lines.
    pub fn with_observer(mut self, observer: OutputObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The service commands are executed in.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Executes a command or sequence inside the service container.
    ///
    /// Sequences stop at the first non-zero exit; the aggregated result
    /// carries the output of every attempted command and the failing exit
    /// code.
    pub async fn execute(&self, command: &CommandSpec, opts: &ExecOptions) -> ExecutionResult {
        match command {
            CommandSpec::Single(cmd) => self.exec_in_service(cmd, opts).await,
            CommandSpec::Sequence(cmds) => {
                let mut results: Vec<ExecutionResult> = Vec::new();
                for cmd in cmds {
                    let result = self.exec_in_service(cmd, opts).await;
                    let failed = !result.success();
                    results.push(result);
                    if failed {
                        break;
                    }
                }

                ExecutionResult {
                    exit_code: results.last().map(|r| r.exit_code).unwrap_or(0),
                    stdout: results
                        .iter()
                        .map(|r| r.stdout.as_str())
                        .collect::<Vec<_>>()
                        .join("\n"),
                    stderr: results
                        .iter()
                        .filter(|r| !r.stderr.is_empty())
                        .map(|r| r.stderr.as_str())
                        .collect::<Vec<_>>()
                        .join("\n"),
                    duration: results.iter().map(|r| r.duration).sum(),
                    command: cmds.join(" && "),
                }
            }
        }
    }

    async fn exec_in_service(&self, command: &str, opts: &ExecOptions) -> ExecutionResult {
        let mut process = tokio::process::Command::new("docker");
        process.arg("compose").arg("-f").arg(&self.compose_file);
        if let Some(project) = &self.project_name {
            process.arg("-p").arg(project);
        }
        // -T disables the pseudo-TTY for reliable line-buffered capture
        process.arg("exec").arg("-T");
        for (key, value) in &opts.env {
            process.arg("-e").arg(format!("{}={}", key, value));
        }
        process.arg(&self.service).arg("sh").arg("-c").arg(command);
        process.current_dir(&self.project_dir);

        debug!("compose exec [{}]: {}", self.service, command);
        // Env was passed as -e flags; don't duplicate it on the host process.
        let host_opts = ExecOptions {
            env: Vec::new(),
            ..opts.clone()
        };
        run_process(process, command, &host_opts, self.observer.as_ref()).await
    }

    /// Runs a compose lifecycle subcommand (`build`, `up -d`, `down`, ...)
    /// scoped to this runner's compose file and project name.
    pub async fn lifecycle(
        &self,
        args: &[&str],
        timeout: Option<Duration>,
        stream: bool,
    ) -> ExecutionResult {
        let mut process = tokio::process::Command::new("docker");
        process.arg("compose").arg("-f").arg(&self.compose_file);
        if let Some(project) = &self.project_name {
            process.arg("-p").arg(project);
        }
        for arg in args {
            process.arg(arg);
        }
        process.current_dir(&self.project_dir);

        let rendered = format!("docker compose {}", args.join(" "));
        debug!("{}", rendered);
        let opts = ExecOptions {
            timeout,
            env: Vec::new(),
            stream,
            shell: true,
        };
        run_process(process, &rendered, &opts, self.observer.as_ref()).await
    }
}
