//! Composite environment delegating to a dependency graph.
//!
//! A composite owns no runtime resources of its own. Its dependencies are
//! set up and awaited in declared order, and torn down in reverse; a
//! failed dependency setup rolls back everything already started. Cycles
//! and undeclared names were rejected when the descriptor set was
//! validated, so none of that is re-checked here.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{
    Environment, EnvironmentKind, PhaseTimings, SetupResult, TestRunOptions, build_test_command,
};
use crate::config::CompositeSpec;
use crate::evaluation::TestReport;
use crate::executor::{CommandRunner, ExecOptions};
use crate::parser::parse_test_output;

/// Environment composed of previously declared environments.
#[derive(Debug)]
pub struct CompositeEnvironment {
    name: String,
    spec: CompositeSpec,
    deps: Vec<Box<dyn Environment>>,
    timings: PhaseTimings,
    is_up: bool,
    ready: bool,
}

impl CompositeEnvironment {
    /// Creates the composite over its resolved dependencies.
    ///
    /// `deps` must be in the descriptor's declared order; the resolver
    /// guarantees this.
    pub fn new(
        name: impl Into<String>,
        spec: CompositeSpec,
        deps: Vec<Box<dyn Environment>>,
    ) -> Self {
        Self {
            name: name.into(),
            spec,
            deps,
            timings: PhaseTimings::default(),
            is_up: false,
            ready: false,
        }
    }

    /// Names of the dependency environments, in startup order.
    pub fn dependency_names(&self) -> Vec<&str> {
        self.deps.iter().map(|d| d.name()).collect()
    }
}

#[async_trait]
impl Environment for CompositeEnvironment {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::Composite
    }

    fn timings(&self) -> PhaseTimings {
        self.timings
    }

    async fn setup(&mut self) -> SetupResult {
        let start = tokio::time::Instant::now();
        let mut details = serde_json::Map::new();

        for i in 0..self.deps.len() {
            let result = self.deps[i].setup().await;
            details.insert(
                self.deps[i].name().to_string(),
                serde_json::json!({
                    "success": result.success,
                    "message": result.message,
                    "duration_seconds": result.duration.as_secs_f64(),
                }),
            );

            if !result.success {
                let failed_name = self.deps[i].name().to_string();
                // Roll back whatever already started, newest first.
                for j in (0..i).rev() {
                    self.deps[j].teardown(false).await;
                }
                let mut setup = SetupResult::failed(
                    format!("dependency '{}' failed: {}", failed_name, result.message),
                    start.elapsed(),
                );
                setup.details = details;
                return setup;
            }
        }

        self.is_up = true;
        self.timings.startup = start.elapsed();
        info!(
            "composite '{}' started {} dependencies",
            self.name,
            self.deps.len()
        );

        let mut setup = SetupResult::ok(
            format!("Started {} dependencies", self.deps.len()),
            self.timings.startup,
        );
        setup.details = details;
        setup
    }

    async fn is_ready(&self) -> bool {
        if !self.is_up {
            return false;
        }
        for dep in &self.deps {
            if !dep.is_ready().await {
                return false;
            }
        }
        true
    }

    async fn wait_ready(&mut self, timeout: Duration) -> bool {
        if !self.is_up {
            return false;
        }

        let start = tokio::time::Instant::now();
        let deadline = start + timeout;

        for dep in self.deps.iter_mut() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                self.timings.health_check = start.elapsed();
                return false;
            }
            if !dep.wait_ready(remaining).await {
                warn!("dependency '{}' did not become ready", dep.name());
                self.timings.health_check = start.elapsed();
                return false;
            }
        }

        self.ready = true;
        self.timings.health_check = start.elapsed();
        true
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
        let runner = CommandRunner::new(&self.spec.common.working_dir);
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

        // Dependents go down before their dependencies.
        for dep in self.deps.iter_mut().rev() {
            dep.teardown(keep_running).await;
        }
        self.is_up = false;

        self.timings.cleanup = start.elapsed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommonSpec;
    use crate::evaluation::Verdict;
    use std::sync::{Arc, Mutex};

    /// Scripted environment recording lifecycle calls for order checks.
    #[derive(Debug)]
    struct ScriptedEnvironment {
        name: String,
        fail_setup: bool,
        never_ready: bool,
        log: Arc<Mutex<Vec<String>>>,
        timings: PhaseTimings,
    }

    impl ScriptedEnvironment {
        fn new(name: &str, log: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                fail_setup: false,
                never_ready: false,
                log,
                timings: PhaseTimings::default(),
            }
        }

        fn record(&self, event: &str) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", event, self.name));
        }
    }

    #[async_trait]
    impl Environment for ScriptedEnvironment {
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
            self.record("setup");
            if self.fail_setup {
                SetupResult::failed("scripted failure", Duration::ZERO)
            } else {
                SetupResult::ok("up", Duration::ZERO)
            }
        }

        async fn is_ready(&self) -> bool {
            !self.never_ready
        }

        async fn wait_ready(&mut self, timeout: Duration) -> bool {
            self.record("wait");
            if self.never_ready {
                tokio::time::sleep(timeout).await;
                false
            } else {
                true
            }
        }

        async fn run_tests(&mut self, _opts: &TestRunOptions) -> TestReport {
            TestReport::config_error()
        }

        async fn teardown(&mut self, _keep_running: bool) {
            self.record("teardown");
        }
    }

    fn composite_spec(test_command: &str) -> CompositeSpec {
        CompositeSpec {
            common: CommonSpec {
                test_command: test_command.into(),
                working_dir: ".".into(),
                is_default: false,
            },
            depends_on: vec!["a".to_string(), "b".to_string()],
        }
    }

    fn scripted_pair(
        log: &Arc<Mutex<Vec<String>>>,
    ) -> (ScriptedEnvironment, ScriptedEnvironment) {
        (
            ScriptedEnvironment::new("a", Arc::clone(log)),
            ScriptedEnvironment::new("b", Arc::clone(log)),
        )
    }

    #[tokio::test]
    async fn test_setup_in_order_teardown_reversed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = scripted_pair(&log);
        let mut env = CompositeEnvironment::new(
            "full",
            composite_spec("echo '1 passed in 0.1s'"),
            vec![Box::new(a), Box::new(b)],
        );

        assert!(env.setup().await.success);
        assert!(env.wait_ready(Duration::from_secs(1)).await);
        env.teardown(false).await;

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                "setup:a",
                "setup:b",
                "wait:a",
                "wait:b",
                "teardown:b",
                "teardown:a"
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_dependency_rolls_back_started_ones() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, mut b) = scripted_pair(&log);
        b.fail_setup = true;
        let mut env = CompositeEnvironment::new(
            "full",
            composite_spec("true"),
            vec![Box::new(a), Box::new(b)],
        );

        let result = env.setup().await;
        assert!(!result.success);
        assert!(result.message.contains("'b'"));

        let log = log.lock().unwrap();
        assert_eq!(*log, vec!["setup:a", "setup:b", "teardown:a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_respects_budget() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, mut b) = scripted_pair(&log);
        b.never_ready = true;
        let mut env = CompositeEnvironment::new(
            "full",
            composite_spec("true"),
            vec![Box::new(a), Box::new(b)],
        );

        assert!(env.setup().await.success);
        assert!(!env.wait_ready(Duration::from_secs(2)).await);

        env.teardown(false).await;
    }

    #[tokio::test]
    async fn test_runs_own_test_command_after_ready() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = scripted_pair(&log);
        let mut env = CompositeEnvironment::new(
            "full",
            composite_spec("echo '2 passed in 0.2s'"),
            vec![Box::new(a), Box::new(b)],
        );

        assert!(env.setup().await.success);
        assert!(env.wait_ready(Duration::from_secs(1)).await);

        let report = env.run_tests(&TestRunOptions::default()).await;
        assert_eq!(report.counts.passed, 2);
        assert_eq!(report.verdict(), Verdict::Pass);

        env.teardown(false).await;
    }

    #[tokio::test]
    async fn test_run_tests_before_ready_is_error() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = scripted_pair(&log);
        let mut env = CompositeEnvironment::new(
            "full",
            composite_spec("true"),
            vec![Box::new(a), Box::new(b)],
        );

        let report = env.run_tests(&TestRunOptions::default()).await;
        assert_eq!(report.verdict(), Verdict::Error);
    }
}
