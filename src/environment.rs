//! Environment abstraction and its concrete lifecycles.
//!
//! An environment is a lifecycle-managed runtime target that tests run
//! against. Every variant honors the same contract:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      Environment                            │
//! │                                                             │
//! │  setup() ───► wait_ready(timeout) ───► run_tests() ──┐     │
//! │                                                       │     │
//! │  teardown(keep_running) ◄────────────────────────────┘     │
//! │  (safe anytime, including after a failed setup)            │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! | Variant | Module | Runtime |
//! |---------|--------|---------|
//! | Standalone | [`standalone`] | One child process |
//! | DockerCompose | [`compose`] | Multi-container compose stack |
//! | Composite | [`composite`] | Other environments, in order |
//! | Ngrok | [`tunnel`] | Public tunnel to a local port |
//! | Browser | [`browser`] | Server + tunnel + browser driver |
//!
//! Expected failures never panic and never return `Err`: a failed setup is
//! a failed [`SetupResult`], a readiness timeout is `wait_ready` returning
//! `false`, and a broken test run is an ERROR [`TestReport`]. Each phase
//! records its wall-clock duration into the environment's [`PhaseTimings`].

pub mod browser;
pub mod compose;
pub mod composite;
pub mod health;
pub mod resolver;
pub mod standalone;
pub mod tunnel;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::evaluation::TestReport;
use crate::executor::CommandSpec;

pub use resolver::EnvironmentResolver;

/// Default interval between readiness probes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default grace period between SIGTERM and SIGKILL at teardown.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// The kind of runtime an environment manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvironmentKind {
    Standalone,
    DockerCompose,
    Composite,
    Ngrok,
    Browser,
}

impl std::fmt::Display for EnvironmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EnvironmentKind::Standalone => "standalone",
            EnvironmentKind::DockerCompose => "docker-compose",
            EnvironmentKind::Composite => "composite",
            EnvironmentKind::Ngrok => "ngrok",
            EnvironmentKind::Browser => "browser",
        };
        f.write_str(s)
    }
}

/// Wall-clock durations of the lifecycle phases.
///
/// Owned exclusively by one environment instance and mutated only by it.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseTimings {
    /// Image or artifact build time.
    pub build: Duration,
    /// Process/container startup time.
    pub startup: Duration,
    /// Time spent polling readiness.
    pub health_check: Duration,
    /// Test command execution time.
    pub tests: Duration,
    /// Teardown time.
    pub cleanup: Duration,
}

impl PhaseTimings {
    /// Sum of all recorded phases.
    pub fn total(&self) -> Duration {
        self.build + self.startup + self.health_check + self.tests + self.cleanup
    }
}

/// Immutable outcome of one setup attempt.
#[derive(Debug, Clone)]
pub struct SetupResult {
    /// Whether the environment came up.
    pub success: bool,
    /// Human-readable outcome description.
    pub message: String,
    /// How long the attempt took.
    pub duration: Duration,
    /// Per-phase details (build output, pids, child results).
    pub details: serde_json::Map<String, Value>,
}

impl SetupResult {
    /// A successful setup.
    pub fn ok(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: true,
            message: message.into(),
            duration,
            details: serde_json::Map::new(),
        }
    }

    /// A failed setup.
    pub fn failed(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            message: message.into(),
            duration,
            details: serde_json::Map::new(),
        }
    }

    /// Attaches a detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

/// Options forwarded to [`Environment::run_tests`].
#[derive(Debug, Clone, Default)]
pub struct TestRunOptions {
    /// Test suite filter.
    pub suite: Option<String>,
    /// Test category filter.
    pub category: Option<String>,
    /// Verbose test output.
    pub verbose: bool,
    /// Timeout for the test command.
    pub timeout: Option<Duration>,
}

/// Callback receiving human-readable progress messages during waits.
pub type ProgressCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// A lifecycle-managed runtime target that tests run against.
///
/// The contract is identical across variants; see the module docs for the
/// phase ordering. Instances are not internally thread-safe and must not
/// be shared across concurrent evaluations.
#[async_trait]
pub trait Environment: std::fmt::Debug + Send + Sync {
    /// The environment's configured name.
    fn name(&self) -> &str;

    /// The kind of runtime this environment manages.
    fn kind(&self) -> EnvironmentKind;

    /// Phase durations recorded so far.
    fn timings(&self) -> PhaseTimings;

    /// Brings the environment up. Safe to call once.
    ///
    /// On failure, nothing that was started is left unreachable by
    /// [`teardown`](Self::teardown).
    async fn setup(&mut self) -> SetupResult;

    /// Non-blocking point-in-time readiness probe.
    async fn is_ready(&self) -> bool;

    /// Polls readiness at a fixed interval until ready or timeout.
    ///
    /// Returns within `timeout` plus one poll interval and never errors on
    /// timeout. Elapsed time is recorded into `timings.health_check`.
    async fn wait_ready(&mut self, timeout: Duration) -> bool;

    /// Runs the test command and normalizes its output.
    ///
    /// Valid only after `wait_ready` returned `true`; calling earlier is a
    /// contract violation answered with a fail-fast configuration-error
    /// report.
    async fn run_tests(&mut self, opts: &TestRunOptions) -> TestReport;

    /// Releases all acquired resources.
    ///
    /// Safe to call multiple times and after a failed setup.
    /// `keep_running` skips destructive termination but still restores
    /// non-destructive state such as signal handlers.
    async fn teardown(&mut self, keep_running: bool);
}

/// Appends framework-appropriate filter flags to a base test command.
///
/// - scripts (`./…` or `/…`) get `SUITE=`/`CATEGORY=` env prefixes and `-v`
/// - pytest gets `-m` markers and `-v`
/// - npm test / jest get `--testPathPattern`
/// - playwright gets `--grep`
///
/// Command sequences are returned unmodified.
pub fn build_test_command(base: &CommandSpec, opts: &TestRunOptions) -> CommandSpec {
    let cmd = match base {
        CommandSpec::Sequence(_) => return base.clone(),
        CommandSpec::Single(cmd) => cmd.clone(),
    };

    if cmd.starts_with("./") || cmd.starts_with('/') {
        let mut cmd = cmd;
        if let Some(suite) = &opts.suite {
            cmd = format!("SUITE={} {}", suite, cmd);
        }
        if let Some(category) = &opts.category {
            cmd = format!("CATEGORY={} {}", category, cmd);
        }
        if opts.verbose {
            cmd = format!("{} -v", cmd);
        }
        return CommandSpec::Single(cmd);
    }

    let mut cmd = cmd;
    if cmd.contains("pytest") {
        if let Some(suite) = &opts.suite {
            cmd = format!("{} -m {}", cmd, suite);
        }
        if let Some(category) = &opts.category {
            cmd = format!("{} -m {}", cmd, category);
        }
        if opts.verbose && !cmd.contains("-v") {
            cmd = format!("{} -v", cmd);
        }
    } else if cmd.contains("npm test") || cmd.contains("jest") {
        if let Some(suite) = &opts.suite {
            cmd = format!("{} --testPathPattern={}", cmd, suite);
        }
    } else if cmd.contains("playwright") {
        if let Some(suite) = &opts.suite {
            cmd = format!("{} --grep {}", cmd, suite);
        }
    }

    CommandSpec::Single(cmd)
}
