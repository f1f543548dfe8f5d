//! Configuration schema definitions for testbed.
//!
//! This module defines all configuration types deserialized from a
//! `testbed.toml` file. The heart of it is [`EnvironmentSpec`], a closed
//! tagged union discriminated by the `type` field: each environment kind
//! carries only its own fields next to the shared [`CommonSpec`], and
//! unknown tags are rejected at parse time.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── ProjectConfig          - Project identity
//! ├── RunConfig              - Timeouts, poll interval, streaming
//! └── environments           - Name → EnvironmentSpec
//!     ├── standalone         - One child process
//!     ├── docker-compose     - Multi-container stack
//!     ├── composite          - Dependency graph over other environments
//!     ├── ngrok              - Public tunnel to a local port
//!     └── browser            - Server + tunnel + browser test runner
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::executor::CommandSpec;

/// Root configuration loaded from `testbed.toml`.
///
/// # Example
///
/// ```toml
/// [project]
/// name = "shop"
///
/// [run]
/// ready_timeout_secs = 120
///
/// [environments.backend]
/// type = "docker-compose"
/// compose_file = "local.yml"
/// test_service = "api"
/// test_command = "pytest -v"
///
/// [environments.frontend]
/// type = "standalone"
/// command = "npm run dev"
/// ready_pattern = "ready in"
/// test_command = "npm test"
/// default = true
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Project identity.
    #[serde(default)]
    pub project: ProjectConfig,

    /// Run-level defaults (timeouts, polling).
    #[serde(default)]
    pub run: RunConfig,

    /// Named environment descriptors.
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentSpec>,
}

/// Project identity carried into evaluation metadata.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProjectConfig {
    /// Project name reported in results.
    pub name: Option<String>,
}

/// Run-level defaults.
///
/// | Field | Default |
/// |-------|---------|
/// | `ready_timeout_secs` | 120 |
/// | `test_timeout_secs` | 900 (15 minutes) |
/// | `poll_interval_ms` | 500 |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// How long `wait_ready` may poll before giving up.
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,

    /// Timeout for the test command itself.
    #[serde(default = "default_test_timeout")]
    pub test_timeout_secs: u64,

    /// Interval between readiness probes.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            ready_timeout_secs: default_ready_timeout(),
            test_timeout_secs: default_test_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

fn default_ready_timeout() -> u64 {
    120
}

fn default_test_timeout() -> u64 {
    900 // 15 minutes
}

fn default_poll_interval() -> u64 {
    500
}

/// Fields shared by every environment kind.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommonSpec {
    /// Command (or ordered command sequence) that runs the tests.
    #[serde(default)]
    pub test_command: CommandSpec,

    /// Working directory for the environment and its test command.
    ///
    /// Relative paths are resolved against the config file's directory
    /// at load time.
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Marks this environment as the one used when none is named.
    /// At most one environment per set may carry it.
    #[serde(default, rename = "default")]
    pub is_default: bool,
}

impl Default for CommonSpec {
    fn default() -> Self {
        Self {
            test_command: CommandSpec::default(),
            working_dir: default_working_dir(),
            is_default: false,
        }
    }
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

/// One environment descriptor, discriminated by the `type` field.
///
/// The union is closed: a descriptor with an unrecognized `type` fails to
/// deserialize, so invalid kinds never reach runtime.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EnvironmentSpec {
    /// One child process (dev server, daemon) started directly.
    Standalone(StandaloneSpec),

    /// A Docker Compose stack; tests run inside a service container.
    DockerCompose(ComposeSpec),

    /// A composition of previously declared environments.
    Composite(CompositeSpec),

    /// An ngrok tunnel exposing a local port.
    Ngrok(NgrokSpec),

    /// A browser-test environment: optional server, optional tunnel,
    /// and a browser test runner.
    Browser(BrowserSpec),
}

impl EnvironmentSpec {
    /// The shared fields of this descriptor.
    pub fn common(&self) -> &CommonSpec {
        match self {
            EnvironmentSpec::Standalone(s) => &s.common,
            EnvironmentSpec::DockerCompose(s) => &s.common,
            EnvironmentSpec::Composite(s) => &s.common,
            EnvironmentSpec::Ngrok(s) => &s.common,
            EnvironmentSpec::Browser(s) => &s.common,
        }
    }

    /// Mutable access to the shared fields (used by the loader to
    /// absolutize working directories).
    pub(crate) fn common_mut(&mut self) -> &mut CommonSpec {
        match self {
            EnvironmentSpec::Standalone(s) => &mut s.common,
            EnvironmentSpec::DockerCompose(s) => &mut s.common,
            EnvironmentSpec::Composite(s) => &mut s.common,
            EnvironmentSpec::Ngrok(s) => &mut s.common,
            EnvironmentSpec::Browser(s) => &mut s.common,
        }
    }

    /// The descriptor's type tag as written in config.
    pub fn kind_str(&self) -> &'static str {
        match self {
            EnvironmentSpec::Standalone(_) => "standalone",
            EnvironmentSpec::DockerCompose(_) => "docker-compose",
            EnvironmentSpec::Composite(_) => "composite",
            EnvironmentSpec::Ngrok(_) => "ngrok",
            EnvironmentSpec::Browser(_) => "browser",
        }
    }
}

/// Descriptor for a standalone child-process environment.
///
/// Readiness is observed either by matching `ready_pattern` against the
/// process output or by connecting to `port`; with neither configured the
/// environment counts as ready once the process is running.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StandaloneSpec {
    #[serde(flatten)]
    pub common: CommonSpec,

    /// Command that starts the service (e.g. `npm run dev`).
    #[serde(default)]
    pub command: String,

    /// Regex matched against combined process output to detect readiness.
    pub ready_pattern: Option<String>,

    /// TCP port polled to detect readiness.
    pub port: Option<u16>,

    /// Environment variables for the service and its test command.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Descriptor for a Docker Compose environment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ComposeSpec {
    #[serde(flatten)]
    pub common: CommonSpec,

    /// Compose file, relative to the working directory.
    #[serde(default = "default_compose_file")]
    pub compose_file: String,

    /// Services to build and start; empty means all.
    #[serde(default)]
    pub services: Vec<String>,

    /// Service whose container runs the test command.
    pub test_service: String,

    /// HTTP health check polled by `wait_ready`.
    pub health_check: Option<HealthCheckSpec>,

    /// Compose project namespace isolating this evaluation's containers.
    pub project_name: Option<String>,

    /// Start existing containers without rebuilding images.
    #[serde(default)]
    pub skip_build: bool,

    /// Environment variables injected into the test exec as `-e` flags.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_compose_file() -> String {
    "docker-compose.yml".to_string()
}

/// HTTP health check configuration.
///
/// A GET to `http://{host}:{port}{endpoint}` answering any 2xx within the
/// timeout means healthy. `host` defaults to localhost (the published
/// port); `service` names the service being probed for log output and
/// defaults to the test service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheckSpec {
    /// Service the probe is about.
    pub service: Option<String>,

    /// Host the published port is reachable on.
    #[serde(default = "default_health_host")]
    pub host: String,

    /// Endpoint path.
    #[serde(default = "default_health_endpoint")]
    pub endpoint: String,

    /// Published port.
    #[serde(default = "default_health_port")]
    pub port: u16,

    /// Probe budget in seconds when `wait_ready` gets no explicit timeout.
    #[serde(default = "default_health_timeout")]
    pub timeout: u64,
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            service: None,
            host: default_health_host(),
            endpoint: default_health_endpoint(),
            port: default_health_port(),
            timeout: default_health_timeout(),
        }
    }
}

fn default_health_host() -> String {
    "localhost".to_string()
}

fn default_health_endpoint() -> String {
    "/health".to_string()
}

fn default_health_port() -> u16 {
    8000
}

fn default_health_timeout() -> u64 {
    120
}

/// Descriptor for a composite environment.
///
/// Dependencies are set up in declared order and torn down in reverse.
/// Every name must refer to a declared environment and the graph must be
/// acyclic; both are checked at construction, never at runtime.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CompositeSpec {
    #[serde(flatten)]
    pub common: CommonSpec,

    /// Environments this one depends on, in startup order.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Tunnel settings shared by the ngrok environment and browser tunnels.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TunnelSpec {
    /// Local port to expose.
    #[serde(default = "default_tunnel_port")]
    pub port: u16,

    /// Auth token; falls back to the `NGROK_AUTHTOKEN` variable.
    pub auth_token: Option<String>,

    /// Agent region (us, eu, ap, au, sa, jp, in).
    #[serde(default = "default_tunnel_region")]
    pub region: String,
}

impl Default for TunnelSpec {
    fn default() -> Self {
        Self {
            port: default_tunnel_port(),
            auth_token: None,
            region: default_tunnel_region(),
        }
    }
}

fn default_tunnel_port() -> u16 {
    3000
}

fn default_tunnel_region() -> String {
    "us".to_string()
}

/// Descriptor for a standalone ngrok tunnel environment.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NgrokSpec {
    #[serde(flatten)]
    pub common: CommonSpec,

    #[serde(flatten)]
    pub tunnel: TunnelSpec,
}

/// Which browser test driver runs the tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestRunnerKind {
    /// A local browser driver (playwright).
    #[default]
    Local,
    /// A cloud driver that reaches the app through the tunnel's public URL.
    Cloud,
}

/// Descriptor for a browser-test environment.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BrowserSpec {
    #[serde(flatten)]
    pub common: CommonSpec,

    /// Optional local server started before the tests.
    pub server: Option<StandaloneSpec>,

    /// Optional tunnel exposing the server publicly.
    pub tunnel: Option<TunnelSpec>,

    /// Which driver executes the browser tests.
    #[serde(default)]
    pub test_runner: TestRunnerKind,
}
