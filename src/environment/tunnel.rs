//! ngrok tunnel environment.
//!
//! Spawns the ngrok agent to expose a local port and discovers the public
//! URL through the agent's local API. The agent needs a moment to boot and
//! register the tunnel, so the URL fetch runs under a bounded retry.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use super::{
    DEFAULT_POLL_INTERVAL, Environment, EnvironmentKind, PhaseTimings, SetupResult,
    TestRunOptions, build_test_command,
};
use crate::config::NgrokSpec;
use crate::evaluation::TestReport;
use crate::executor::{CommandRunner, ExecOptions};
use crate::parser::parse_test_output;
use crate::retry::RetryPolicy;

/// Local API served by the running ngrok agent.
const AGENT_API_URL: &str = "http://127.0.0.1:4040/api/tunnels";

/// Grace period between SIGTERM and SIGKILL for the agent.
const AGENT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
enum TunnelError {
    #[error("agent api unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),
    #[error("no tunnel registered for port {0}")]
    NotRegistered(u16),
}

#[derive(Debug, Deserialize)]
struct TunnelList {
    tunnels: Vec<TunnelInfo>,
}

#[derive(Debug, Deserialize)]
struct TunnelInfo {
    public_url: String,
    proto: String,
    config: TunnelTarget,
}

#[derive(Debug, Deserialize)]
struct TunnelTarget {
    addr: String,
}

/// Picks the tunnel forwarding to the given local port, preferring https.
fn select_tunnel(list: &TunnelList, port: u16) -> Option<&TunnelInfo> {
    let suffix = format!(":{}", port);
    let matching = list.tunnels.iter().filter(|t| t.config.addr.ends_with(&suffix));
    matching
        .clone()
        .find(|t| t.proto == "https")
        .or_else(|| matching.clone().next())
}

async fn query_public_url(client: &reqwest::Client, port: u16) -> Result<String, TunnelError> {
    let list: TunnelList = client.get(AGENT_API_URL).send().await?.json().await?;
    select_tunnel(&list, port)
        .map(|t| t.public_url.clone())
        .ok_or(TunnelError::NotRegistered(port))
}

/// Environment exposing a local port through an ngrok tunnel.
#[derive(Debug)]
pub struct NgrokEnvironment {
    name: String,
    spec: NgrokSpec,
    timings: PhaseTimings,
    child: Option<tokio::process::Child>,
    client: reqwest::Client,
    public_url: Option<String>,
    ready: bool,
    poll_interval: Duration,
}

impl NgrokEnvironment {
    /// Creates the environment from its descriptor.
    pub fn new(name: impl Into<String>, spec: NgrokSpec) -> Self {
        Self {
            name: name.into(),
            spec,
            timings: PhaseTimings::default(),
            child: None,
            client: super::health::probe_client(),
            public_url: None,
            ready: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Overrides the readiness poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The tunneled local port.
    pub fn port(&self) -> u16 {
        self.spec.tunnel.port
    }

    /// The public URL, available once `wait_ready` returned true.
    pub fn public_url(&self) -> Option<&str> {
        self.public_url.as_deref()
    }
}

#[async_trait]
impl Environment for NgrokEnvironment {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::Ngrok
    }

    fn timings(&self) -> PhaseTimings {
        self.timings
    }

    async fn setup(&mut self) -> SetupResult {
        let start = tokio::time::Instant::now();

        let mut process = tokio::process::Command::new("ngrok");
        process
            .arg("http")
            .arg(self.spec.tunnel.port.to_string())
            .arg("--region")
            .arg(&self.spec.tunnel.region)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());
        if let Some(token) = &self.spec.tunnel.auth_token {
            process.env("NGROK_AUTHTOKEN", token);
        }
        process.process_group(0);
        process.kill_on_drop(true);

        match process.spawn() {
            Ok(child) => {
                let pid = child.id();
                self.child = Some(child);
                self.timings.startup = start.elapsed();
                info!(
                    "started ngrok agent for port {} (pid {:?})",
                    self.spec.tunnel.port, pid
                );
                SetupResult::ok(
                    format!("tunnel agent started for port {}", self.spec.tunnel.port),
                    self.timings.startup,
                )
                .with_detail("pid", serde_json::json!(pid))
            }
            Err(err) => SetupResult::failed(
                format!("failed to start ngrok: {}", err),
                start.elapsed(),
            ),
        }
    }

    async fn is_ready(&self) -> bool {
        if self.child.is_none() {
            return false;
        }
        query_public_url(&self.client, self.spec.tunnel.port)
            .await
            .is_ok()
    }

    async fn wait_ready(&mut self, timeout: Duration) -> bool {
        if self.child.is_none() {
            return false;
        }

        let start = tokio::time::Instant::now();
        let attempts = (timeout.as_millis() / self.poll_interval.as_millis().max(1)).max(1);
        let policy = RetryPolicy::new(attempts as usize)
            .with_initial_delay(self.poll_interval)
            .with_backoff_base(1.0);

        let client = self.client.clone();
        let port = self.spec.tunnel.port;
        let outcome = policy
            .run("ngrok tunnel registration", || {
                let client = client.clone();
                async move { query_public_url(&client, port).await }
            })
            .await;

        self.timings.health_check = start.elapsed();
        match outcome {
            Ok(url) => {
                info!("tunnel ready at {}", url);
                self.public_url = Some(url);
                self.ready = true;
                true
            }
            Err(err) => {
                warn!("tunnel never registered: {}", err);
                false
            }
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
        if let Some(url) = &self.public_url {
            runner = runner.env("TUNNEL_URL", url);
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
        self.public_url = None;

        if keep_running {
            if let Some(child) = self.child.take() {
                // Forgetting the handle leaves the agent running.
                std::mem::forget(child);
            }
            self.timings.cleanup = start.elapsed();
            return;
        }

        if let Some(mut child) = self.child.take() {
            if let Some(pid) = child.id() {
                let group = nix::unistd::Pid::from_raw(-(pid as i32));
                let _ = nix::sys::signal::kill(group, nix::sys::signal::Signal::SIGTERM);
                if tokio::time::timeout(AGENT_GRACE, child.wait()).await.is_err() {
                    let _ = nix::sys::signal::kill(group, nix::sys::signal::Signal::SIGKILL);
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                }
            } else {
                let _ = child.kill().await;
                let _ = child.wait().await;
            }
        }

        self.timings.cleanup = start.elapsed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TunnelSpec;
    use crate::evaluation::Verdict;

    fn parse_list(json: &str) -> TunnelList {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_select_tunnel_prefers_https() {
        let list = parse_list(
            r#"{"tunnels": [
                {"public_url": "http://abc.ngrok.io", "proto": "http",
                 "config": {"addr": "http://localhost:3000"}},
                {"public_url": "https://abc.ngrok.io", "proto": "https",
                 "config": {"addr": "http://localhost:3000"}}
            ]}"#,
        );

        let tunnel = select_tunnel(&list, 3000).unwrap();
        assert_eq!(tunnel.public_url, "https://abc.ngrok.io");
    }

    #[test]
    fn test_select_tunnel_by_port() {
        let list = parse_list(
            r#"{"tunnels": [
                {"public_url": "https://a.ngrok.io", "proto": "https",
                 "config": {"addr": "http://localhost:3000"}},
                {"public_url": "https://b.ngrok.io", "proto": "https",
                 "config": {"addr": "http://localhost:8080"}}
            ]}"#,
        );

        assert_eq!(
            select_tunnel(&list, 8080).unwrap().public_url,
            "https://b.ngrok.io"
        );
        assert!(select_tunnel(&list, 9999).is_none());
    }

    #[tokio::test]
    async fn test_run_tests_before_ready_is_error() {
        let mut env = NgrokEnvironment::new(
            "tunnel",
            NgrokSpec {
                common: Default::default(),
                tunnel: TunnelSpec::default(),
            },
        );

        let report = env.run_tests(&TestRunOptions::default()).await;
        assert_eq!(report.verdict(), Verdict::Error);
    }

    #[tokio::test]
    async fn test_teardown_without_setup_is_safe() {
        let mut env = NgrokEnvironment::new(
            "tunnel",
            NgrokSpec {
                common: Default::default(),
                tunnel: TunnelSpec::default(),
            },
        );

        env.teardown(false).await;
        env.teardown(false).await;
    }
}
