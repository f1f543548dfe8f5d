//! Docker Compose environment for multi-container testing.
//!
//! Builds images (unless skipped), starts a named service subset, waits
//! for an HTTP health endpoint, and runs the test command inside the
//! target service's container. All container operations shell out to the
//! `docker compose` CLI scoped to one compose file and project name.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{
    DEFAULT_POLL_INTERVAL, Environment, EnvironmentKind, PhaseTimings, ProgressCallback,
    SetupResult, TestRunOptions, build_test_command, health,
};
use crate::config::{ComposeSpec, HealthCheckSpec};
use crate::evaluation::TestReport;
use crate::executor::{ComposeRunner, ExecOptions};
use crate::parser::parse_test_output;
use crate::signal::SignalGuard;

/// Environment managing a Docker Compose stack.
pub struct ComposeEnvironment {
    name: String,
    spec: ComposeSpec,
    health: HealthCheckSpec,
    runner: ComposeRunner,
    client: reqwest::Client,
    timings: PhaseTimings,
    is_up: bool,
    ready: bool,
    poll_interval: Duration,
    progress: Option<ProgressCallback>,
    signal_guard: Option<SignalGuard>,
}

impl std::fmt::Debug for ComposeEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposeEnvironment")
            .field("name", &self.name)
            .field("spec", &self.spec)
            .field("health", &self.health)
            .field("runner", &"<runner>")
            .field("timings", &self.timings)
            .field("is_up", &self.is_up)
            .field("ready", &self.ready)
            .field("poll_interval", &self.poll_interval)
            .field("progress", &self.progress.as_ref().map(|_| "<callback>"))
            .field("signal_guard", &self.signal_guard.as_ref().map(|_| "<guard>"))
            .finish()
    }
}

impl ComposeEnvironment {
    /// Creates the environment from its descriptor.
    pub fn new(name: impl Into<String>, spec: ComposeSpec) -> Self {
        let mut health = spec.health_check.clone().unwrap_or_default();
        if health.service.is_none() {
            health.service = Some(spec.test_service.clone());
        }

        let mut runner = ComposeRunner::new(
            &spec.compose_file,
            &spec.test_service,
            &spec.common.working_dir,
        );
        if let Some(project) = &spec.project_name {
            runner = runner.with_project_name(project);
        }

        Self {
            name: name.into(),
            health,
            runner,
            client: health::probe_client(),
            timings: PhaseTimings::default(),
            is_up: false,
            ready: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            progress: None,
            signal_guard: None,
            spec,
        }
    }

    /// Sets the callback receiving wait progress messages.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Overrides the readiness poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The URL polled by the health check.
    pub fn health_url(&self) -> String {
        format!(
            "http://{}:{}{}",
            self.health.host, self.health.port, self.health.endpoint
        )
    }

    fn service_args(&self) -> Vec<&str> {
        self.spec.services.iter().map(|s| s.as_str()).collect()
    }
}

#[async_trait]
impl Environment for ComposeEnvironment {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::DockerCompose
    }

    fn timings(&self) -> PhaseTimings {
        self.timings
    }

    async fn setup(&mut self) -> SetupResult {
        let total_start = tokio::time::Instant::now();

        match SignalGuard::install() {
            Ok(guard) => self.signal_guard = Some(guard),
            Err(err) => warn!("could not install signal handlers: {}", err),
        }

        let mut details = serde_json::Map::new();

        if !self.spec.skip_build {
            let build_start = tokio::time::Instant::now();
            let mut args = vec!["build"];
            args.extend(self.service_args());
            let build = self.runner.lifecycle(&args, None, false).await;
            self.timings.build = build_start.elapsed();
            details.insert(
                "build".to_string(),
                serde_json::json!({
                    "success": build.success(),
                    "duration_seconds": build.duration.as_secs_f64(),
                }),
            );

            if !build.success() {
                let mut result = SetupResult::failed(
                    format!("Build failed: {}", build.stderr.trim()),
                    total_start.elapsed(),
                );
                result.details = details;
                return result;
            }
        }

        let startup_start = tokio::time::Instant::now();
        let mut args = vec!["up", "-d"];
        args.extend(self.service_args());
        let up = self.runner.lifecycle(&args, None, false).await;
        self.timings.startup = startup_start.elapsed();
        details.insert(
            "startup".to_string(),
            serde_json::json!({
                "success": up.success(),
                "duration_seconds": up.duration.as_secs_f64(),
            }),
        );

        if !up.success() {
            let mut result = SetupResult::failed(
                format!("Failed to start containers: {}", up.stderr.trim()),
                total_start.elapsed(),
            );
            result.details = details;
            return result;
        }

        self.is_up = true;
        info!("compose stack '{}' is up", self.name);

        let started = if self.spec.services.is_empty() {
            "all services".to_string()
        } else {
            format!("{} services", self.spec.services.len())
        };
        let mut result = SetupResult::ok(format!("Started {}", started), total_start.elapsed());
        result.details = details;
        result
    }

    async fn is_ready(&self) -> bool {
        if !self.is_up {
            return false;
        }
        health::http_healthy(&self.client, &self.health_url()).await
    }

    async fn wait_ready(&mut self, timeout: Duration) -> bool {
        if !self.is_up {
            return false;
        }

        let start = tokio::time::Instant::now();
        let url = self.health_url();
        let service = self.health.service.as_deref().unwrap_or("service");
        if let Some(progress) = &self.progress {
            progress(&format!("waiting for {} at {}", service, url));
        }

        let healthy = health::wait_http_healthy(
            &self.client,
            &url,
            timeout,
            self.poll_interval,
            self.progress.as_ref(),
        )
        .await;

        self.timings.health_check = start.elapsed();
        self.ready = healthy;
        healthy
    }

    async fn run_tests(&mut self, opts: &TestRunOptions) -> TestReport {
        if !self.is_up || !self.ready {
            return TestReport::config_error();
        }

        let command = build_test_command(&self.spec.common.test_command, opts);
        if command.is_empty() {
            return TestReport::config_error();
        }

        let start = tokio::time::Instant::now();
        let mut exec_opts = ExecOptions::new();
        for (key, value) in &self.spec.env {
            exec_opts = exec_opts.env(key, value);
        }
        if let Some(timeout) = opts.timeout {
            exec_opts = exec_opts.timeout(timeout);
        }

        let result = self.runner.execute(&command, &exec_opts).await;
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

        if self.is_up && !keep_running {
            let down = self
                .runner
                .lifecycle(
                    &["down", "--volumes", "--remove-orphans"],
                    Some(Duration::from_secs(120)),
                    false,
                )
                .await;
            if !down.success() {
                warn!(
                    "compose down for '{}' exited {}: {}",
                    self.name,
                    down.exit_code,
                    down.stderr.trim()
                );
            }
            self.is_up = false;
        }

        // Restores the previous SIGINT/SIGTERM handlers, always.
        self.signal_guard = None;

        self.timings.cleanup = start.elapsed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommonSpec;
    use crate::evaluation::Verdict;

    fn spec(working_dir: &std::path::Path) -> ComposeSpec {
        ComposeSpec {
            common: CommonSpec {
                test_command: "pytest".into(),
                working_dir: working_dir.to_path_buf(),
                is_default: false,
            },
            compose_file: "docker-compose.yml".to_string(),
            services: vec!["api".to_string(), "db".to_string()],
            test_service: "api".to_string(),
            health_check: Some(HealthCheckSpec {
                service: None,
                host: "localhost".to_string(),
                endpoint: "/api/health/".to_string(),
                port: 8123,
                timeout: 30,
            }),
            project_name: Some("testbed-unit".to_string()),
            skip_build: false,
            env: Default::default(),
        }
    }

    #[test]
    fn test_health_url() {
        let env = ComposeEnvironment::new("backend", spec(std::path::Path::new(".")));
        assert_eq!(env.health_url(), "http://localhost:8123/api/health/");
        assert_eq!(env.health.service.as_deref(), Some("api"));
    }

    #[tokio::test]
    async fn test_run_tests_before_setup_is_error() {
        let mut env = ComposeEnvironment::new("backend", spec(std::path::Path::new(".")));
        let report = env.run_tests(&TestRunOptions::default()).await;

        assert_eq!(report.verdict(), Verdict::Error);
    }

    #[tokio::test]
    async fn test_teardown_after_failed_setup() {
        // No compose file in the directory, so setup fails whether or not
        // docker is installed; teardown must still be safe and repeatable.
        let dir = tempfile::tempdir().unwrap();
        let mut env = ComposeEnvironment::new("backend", spec(dir.path()));

        let result = env.setup().await;
        assert!(!result.success);

        env.teardown(false).await;
        env.teardown(false).await;
    }

    #[tokio::test]
    async fn test_wait_ready_without_setup_is_false() {
        let mut env = ComposeEnvironment::new("backend", spec(std::path::Path::new(".")));
        assert!(!env.wait_ready(Duration::from_millis(100)).await);
    }
}
