//! Browser testing environment: server + tunnel + browser driver.
//!
//! Composes an optional standalone dev server and an optional tunnel with
//! a test adapter chosen by the descriptor's `test_runner`. The server
//! starts before the tunnel; readiness waits on the server first and
//! reserves the remaining budget for the tunnel; teardown reverses the
//! order.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::standalone::StandaloneEnvironment;
use super::tunnel::NgrokEnvironment;
use super::{
    Environment, EnvironmentKind, PhaseTimings, SetupResult, TestRunOptions,
};
use crate::adapter::{AdapterConfig, AdapterRegistry, AdapterRunOptions, TestAdapter};
use crate::config::{BrowserSpec, CommonSpec, ConfigError, NgrokSpec, TestRunnerKind};
use crate::evaluation::TestReport;

/// Registry name used for each test runner kind.
fn adapter_name(kind: TestRunnerKind) -> &'static str {
    match kind {
        TestRunnerKind::Local => "playwright",
        TestRunnerKind::Cloud => "cloud",
    }
}

/// Environment for browser tests with an integrated server and tunnel.
pub struct BrowserEnvironment {
    name: String,
    timings: PhaseTimings,
    server: Option<StandaloneEnvironment>,
    tunnel: Option<NgrokEnvironment>,
    adapter: Box<dyn TestAdapter>,
    runner_kind: TestRunnerKind,
    ready: bool,
}

impl std::fmt::Debug for BrowserEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserEnvironment")
            .field("name", &self.name)
            .field("timings", &self.timings)
            .field("server", &self.server)
            .field("tunnel", &self.tunnel)
            .field("adapter", &"<adapter>")
            .field("runner_kind", &self.runner_kind)
            .field("ready", &self.ready)
            .finish()
    }
}

impl BrowserEnvironment {
    /// Creates the environment, resolving the test adapter by name.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownAdapter`] when no adapter is registered for
    /// the configured test runner, and pattern errors from the embedded
    /// server descriptor.
    pub fn new(
        name: impl Into<String>,
        spec: BrowserSpec,
        registry: &AdapterRegistry,
    ) -> Result<Self, ConfigError> {
        let name = name.into();

        let adapter_name = adapter_name(spec.test_runner);
        let adapter = registry
            .create(adapter_name, &AdapterConfig::new(&spec.common.working_dir))
            .ok_or_else(|| ConfigError::UnknownAdapter(adapter_name.to_string()))?;

        let server = match spec.server {
            Some(mut server_spec) => {
                if server_spec.common.working_dir == std::path::Path::new(".") {
                    server_spec.common.working_dir = spec.common.working_dir.clone();
                }
                Some(StandaloneEnvironment::new(
                    format!("{}-server", name),
                    server_spec,
                )?)
            }
            None => None,
        };

        let tunnel = spec.tunnel.map(|tunnel_spec| {
            NgrokEnvironment::new(
                format!("{}-tunnel", name),
                NgrokSpec {
                    common: CommonSpec {
                        working_dir: spec.common.working_dir.clone(),
                        ..CommonSpec::default()
                    },
                    tunnel: tunnel_spec,
                },
            )
        });

        Ok(Self {
            name,
            timings: PhaseTimings::default(),
            server,
            tunnel,
            adapter,
            runner_kind: spec.test_runner,
            ready: false,
        })
    }

    /// The tunnel's public URL, once ready.
    pub fn tunnel_url(&self) -> Option<&str> {
        self.tunnel.as_ref().and_then(|t| t.public_url())
    }

    /// The local server URL, if a server with a port is configured.
    pub fn server_url(&self) -> Option<String> {
        self.server.as_ref().and_then(|s| s.server_url())
    }
}

#[async_trait]
impl Environment for BrowserEnvironment {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::Browser
    }

    fn timings(&self) -> PhaseTimings {
        self.timings
    }

    async fn setup(&mut self) -> SetupResult {
        let start = tokio::time::Instant::now();
        let mut details = serde_json::Map::new();

        if let Some(server) = self.server.as_mut() {
            let result = server.setup().await;
            details.insert(
                "server".to_string(),
                serde_json::json!({
                    "success": result.success,
                    "message": result.message,
                    "duration_seconds": result.duration.as_secs_f64(),
                }),
            );
            if !result.success {
                let mut setup = SetupResult::failed(
                    format!("Server failed to start: {}", result.message),
                    start.elapsed(),
                );
                setup.details = details;
                return setup;
            }
        }

        if let Some(tunnel) = self.tunnel.as_mut() {
            let result = tunnel.setup().await;
            details.insert(
                "tunnel".to_string(),
                serde_json::json!({
                    "success": result.success,
                    "message": result.message,
                    "duration_seconds": result.duration.as_secs_f64(),
                }),
            );
            if !result.success {
                if let Some(server) = self.server.as_mut() {
                    server.teardown(false).await;
                }
                let mut setup = SetupResult::failed(
                    format!("Tunnel failed to start: {}", result.message),
                    start.elapsed(),
                );
                setup.details = details;
                return setup;
            }
        }

        self.timings.startup = start.elapsed();
        let mut setup = SetupResult::ok(
            format!(
                "Browser environment ready (runner: {})",
                self.adapter.name()
            ),
            self.timings.startup,
        );
        setup.details = details;
        setup
    }

    async fn is_ready(&self) -> bool {
        let server_ready = match &self.server {
            Some(server) => server.is_ready().await,
            None => true,
        };
        let tunnel_ready = match &self.tunnel {
            Some(tunnel) => tunnel.is_ready().await,
            None => true,
        };
        server_ready && tunnel_ready
    }

    async fn wait_ready(&mut self, timeout: Duration) -> bool {
        let start = tokio::time::Instant::now();
        let deadline = start + timeout;

        if let Some(server) = self.server.as_mut() {
            if !server.wait_ready(timeout).await {
                warn!("server did not become ready");
                self.timings.health_check = start.elapsed();
                return false;
            }
            info!("server ready");
        }

        if let Some(tunnel) = self.tunnel.as_mut() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() || !tunnel.wait_ready(remaining).await {
                warn!("tunnel did not become ready");
                self.timings.health_check = start.elapsed();
                return false;
            }
            info!("tunnel ready at {:?}", tunnel.public_url());
        }

        self.ready = true;
        self.timings.health_check = start.elapsed();
        true
    }

    async fn run_tests(&mut self, opts: &TestRunOptions) -> TestReport {
        if !self.ready {
            return TestReport::config_error();
        }

        let start = tokio::time::Instant::now();

        if !self.adapter.validate_environment().await {
            warn!("adapter '{}' environment invalid", self.adapter.name());
            return TestReport::config_error();
        }

        let tests = self.adapter.discover(opts.category.as_deref()).await;

        // Cloud drivers reach the app through the tunnel; local drivers
        // hit the server directly.
        let target_url = match self.runner_kind {
            TestRunnerKind::Cloud => self
                .tunnel_url()
                .map(String::from)
                .or_else(|| self.server_url()),
            TestRunnerKind::Local => self.server_url(),
        };

        let run_opts = AdapterRunOptions {
            tests: (!tests.is_empty()).then_some(tests),
            suite: opts.suite.clone(),
            verbose: opts.verbose,
            timeout: opts.timeout,
            target_url,
        };

        let mut report = self.adapter.execute(&run_opts).await;
        self.timings.tests = start.elapsed();

        if let Some(category) = &opts.category {
            report = report.with_category(category);
        }
        report
    }

    async fn teardown(&mut self, keep_running: bool) {
        let start = tokio::time::Instant::now();
        self.ready = false;

        // Tunnel first, then the server it fronts.
        if let Some(tunnel) = self.tunnel.as_mut() {
            tunnel.teardown(keep_running).await;
        }
        if let Some(server) = self.server.as_mut() {
            server.teardown(keep_running).await;
        }

        self.timings.cleanup = start.elapsed();
    }
}
