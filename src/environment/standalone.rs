//! Standalone child-process environment.
//!
//! Launches one service process (a dev server, a daemon) and watches its
//! combined output for a readiness pattern, or polls a TCP port. Teardown
//! sends SIGTERM and escalates to SIGKILL after a grace period.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use super::{
    DEFAULT_GRACE_PERIOD, DEFAULT_POLL_INTERVAL, Environment, EnvironmentKind, PhaseTimings,
    SetupResult, TestRunOptions, build_test_command, health,
};
use crate::config::{ConfigError, StandaloneSpec};
use crate::evaluation::TestReport;
use crate::executor::{CommandRunner, ExecOptions};
use crate::parser::parse_test_output;

/// Environment running one child process.
#[derive(Debug)]
pub struct StandaloneEnvironment {
    name: String,
    spec: StandaloneSpec,
    ready_regex: Option<Regex>,
    timings: PhaseTimings,
    child: Option<tokio::process::Child>,
    output: Arc<Mutex<String>>,
    readers: Vec<tokio::task::JoinHandle<()>>,
    ready: bool,
    poll_interval: Duration,
    grace_period: Duration,
}

impl StandaloneEnvironment {
    /// Creates the environment, compiling the ready pattern.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidReadyPattern`] if the pattern is not a valid
    /// regex.
    pub fn new(name: impl Into<String>, spec: StandaloneSpec) -> Result<Self, ConfigError> {
        let name = name.into();
        let ready_regex = match spec.ready_pattern.as_deref() {
            Some(pattern) if !pattern.is_empty() => {
                Some(
                    Regex::new(pattern).map_err(|source| ConfigError::InvalidReadyPattern {
                        environment: name.clone(),
                        source,
                    })?,
                )
            }
            _ => None,
        };

        Ok(Self {
            name,
            spec,
            ready_regex,
            timings: PhaseTimings::default(),
            child: None,
            output: Arc::new(Mutex::new(String::new())),
            readers: Vec::new(),
            ready: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
        })
    }

    /// Overrides the readiness poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overrides the SIGTERM→SIGKILL grace period.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// The configured service port, if any.
    pub fn port(&self) -> Option<u16> {
        self.spec.port
    }

    /// The local URL of the service, if a port is configured.
    pub fn server_url(&self) -> Option<String> {
        self.spec.port.map(|p| format!("http://localhost:{}", p))
    }

    /// Output collected from the child so far.
    pub fn collected_output(&self) -> String {
        self.output.lock().map(|o| o.clone()).unwrap_or_default()
    }

    fn spawn_reader(
        &mut self,
        stream: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    ) {
        let buffer = Arc::clone(&self.output);
        let handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Ok(mut buffer) = buffer.lock() {
                    buffer.push_str(&line);
                    buffer.push('\n');
                }
            }
        });
        self.readers.push(handle);
    }
}

#[async_trait]
impl Environment for StandaloneEnvironment {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::Standalone
    }

    fn timings(&self) -> PhaseTimings {
        self.timings
    }

    async fn setup(&mut self) -> SetupResult {
        let start = tokio::time::Instant::now();

        if self.spec.command.trim().is_empty() {
            return SetupResult::failed("no command configured", start.elapsed());
        }
        if !self.spec.common.working_dir.is_dir() {
            return SetupResult::failed(
                format!(
                    "working directory does not exist: {}",
                    self.spec.common.working_dir.display()
                ),
                start.elapsed(),
            );
        }

        let mut process = tokio::process::Command::new("/bin/sh");
        process
            .arg("-c")
            .arg(&self.spec.command)
            .current_dir(&self.spec.common.working_dir)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        // Own process group, so teardown can signal the whole tree.
        process.process_group(0);
        for (key, value) in &self.spec.env {
            process.env(key, value);
        }

        let mut child = match process.spawn() {
            Ok(child) => child,
            Err(err) => {
                return SetupResult::failed(
                    format!("failed to start '{}': {}", self.spec.command, err),
                    start.elapsed(),
                );
            }
        };

        if let Some(stdout) = child.stdout.take() {
            self.spawn_reader(stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_reader(stderr);
        }

        let pid = child.id();
        self.child = Some(child);
        self.timings.startup = start.elapsed();

        info!("started '{}' (pid {:?})", self.spec.command, pid);
        SetupResult::ok(
            format!("started '{}'", self.spec.command),
            self.timings.startup,
        )
        .with_detail("pid", serde_json::json!(pid))
    }

    async fn is_ready(&self) -> bool {
        if self.child.is_none() {
            return false;
        }
        if let Some(regex) = &self.ready_regex {
            let output = self.output.lock().map(|o| o.clone()).unwrap_or_default();
            return regex.is_match(&output);
        }
        if let Some(port) = self.spec.port {
            return health::port_open(port).await;
        }
        true
    }

    async fn wait_ready(&mut self, timeout: Duration) -> bool {
        let start = tokio::time::Instant::now();

        if self.child.is_none() {
            return false;
        }

        loop {
            if self.is_ready().await {
                self.ready = true;
                self.timings.health_check = start.elapsed();
                return true;
            }
            if start.elapsed() >= timeout {
                self.timings.health_check = start.elapsed();
                debug!("'{}' not ready after {:?}", self.name, timeout);
                return false;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn run_tests(&mut self, opts: &TestRunOptions) -> TestReport {
        if !self.ready {
            return TestReport::config_error();
        }

        let command = build_test_command(&self.spec.common.test_command, opts);
        if command.is_empty() {
            return TestReport::config_error();
        }

        let start = tokio::time::Instant::now();
        let mut runner = CommandRunner::new(&self.spec.common.working_dir);
        for (key, value) in &self.spec.env {
            runner = runner.env(key, value);
        }

        let mut exec_opts = ExecOptions::new();
        if let Some(timeout) = opts.timeout {
            exec_opts = exec_opts.timeout(timeout);
        }

        let result = runner.execute(&command, &exec_opts).await;
        self.timings.tests = start.elapsed();

        let combined = format!("{}\n{}", result.stdout, result.stderr);
        let counts = parse_test_output(&combined, result.exit_code);
        let mut report = TestReport::new(counts, result.exit_code);
        if let Some(category) = &opts.category {
            report = report.with_category(category);
        }
        report
    }

    async fn teardown(&mut self, keep_running: bool) {
        let start = tokio::time::Instant::now();
        self.ready = false;

        for reader in self.readers.drain(..) {
            reader.abort();
        }

        if keep_running {
            // Drop the handle without signalling; the process stays up.
            self.child = None;
            self.timings.cleanup = start.elapsed();
            return;
        }

        if let Some(mut child) = self.child.take() {
            if let Some(pid) = child.id() {
                let group = nix::unistd::Pid::from_raw(-(pid as i32));
                if nix::sys::signal::kill(group, nix::sys::signal::Signal::SIGTERM).is_ok() {
                    match tokio::time::timeout(self.grace_period, child.wait()).await {
                        Ok(_) => {
                            let _ = nix::sys::signal::kill(group, nix::sys::signal::Signal::SIGKILL);
                            self.timings.cleanup = start.elapsed();
                            return;
                        }
                        Err(_) => {
                            warn!("'{}' ignored SIGTERM; killing", self.name);
                        }
                    }
                }
                let _ = nix::sys::signal::kill(group, nix::sys::signal::Signal::SIGKILL);
            }
            let _ = child.kill().await;
            let _ = child.wait().await;
        }

        self.timings.cleanup = start.elapsed();
    }
}
