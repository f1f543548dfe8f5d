//! Unified evaluation result schema with a cascading verdict.
//!
//! Every test run, whatever environment or framework produced it, is
//! reported through one schema:
//!
//! ```text
//! EvaluationResult
//! ├── EvaluationMetadata    identity: UUID, content hash, timestamp, context
//! └── SessionResult*        one logical unit of evaluation
//!     └── MetricResult*     one measured fact with a pass/fail flag
//! ```
//!
//! # Verdict Cascade
//!
//! The whole is never better than its worst part:
//!
//! - A session with zero metrics is ERROR; any failed metric makes it FAIL;
//!   otherwise PASS.
//! - An evaluation with zero sessions is ERROR; any ERROR session makes it
//!   ERROR; any FAIL session makes it FAIL; otherwise PASS.
//!
//! Verdicts are always derived, never stored.
//!
//! # Reproducibility
//!
//! [`EvaluationResult::finalize`] computes a content hash over the
//! semantically meaningful fields only — adapter type, category, project
//! name, verdict, and every session's name, verdict, and metric
//! name/value/passed triples. Timestamps, hostnames, and ids are excluded,
//! so two runs with identical results hash identically on different
//! machines at different times.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::executor::EXIT_CONFIG_ERROR;
use crate::parser::TestCounts;

/// Schema version embedded in serialized output; bump on breaking changes.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Errors for contract violations on an evaluation.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    /// A session was added after [`EvaluationResult::finalize`].
    #[error("cannot add session to finalized evaluation")]
    AlreadyFinalized,
}

/// Deterministic three-state verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    /// Everything measured passed.
    Pass,
    /// At least one measured fact failed.
    Fail,
    /// Nothing trustworthy was measured (config problem, no metrics,
    /// unrecognized output with a failing exit code).
    Error,
}

impl Verdict {
    /// Maps the verdict to a process exit code: PASS 0, FAIL 1, ERROR 2.
    pub fn exit_code(&self) -> i32 {
        match self {
            Verdict::Pass => 0,
            Verdict::Fail => 1,
            Verdict::Error => 2,
        }
    }

    /// The canonical uppercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How severely a failed metric should be treated in rendered output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// One measured fact with a caller-supplied pass/fail judgement.
///
/// The metric does not evaluate its own condition; callers compute
/// `passed` and the metric records the observation immutably.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricResult {
    /// Metric identifier, e.g. `tests_failed`.
    pub name: String,
    /// The observed value.
    pub value: Value,
    /// Description of the expected value or condition, e.g. `"0"` or `">0"`.
    pub expected: String,
    /// Whether the observation satisfied the condition.
    pub passed: bool,
    /// Optional human-readable description.
    pub message: Option<String>,
    /// Rendering severity; defaults to [`Severity::Error`].
    pub severity: Severity,
    /// Free-form enrichment data.
    pub metadata: serde_json::Map<String, Value>,
}

impl MetricResult {
    /// Creates a metric from an observation and its judgement.
    pub fn new(
        name: impl Into<String>,
        value: impl Into<Value>,
        expected: impl Into<String>,
        passed: bool,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            expected: expected.into(),
            passed,
            message: None,
            severity: Severity::Error,
            metadata: serde_json::Map::new(),
        }
    }

    /// Sets the human-readable message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// The observed value stringified for hashing (strings unquoted).
    fn value_string(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// A named group of metrics from one logical unit of evaluation.
///
/// The session verdict is derived from its metrics on demand and is never
/// stored: ERROR with zero metrics, FAIL if any metric failed, else PASS.
#[derive(Debug, Clone)]
pub struct SessionResult {
    /// Unique identifier for this session.
    pub session_id: String,
    /// Human-readable name (e.g. a category or project).
    pub session_name: String,
    /// Ordered metric observations.
    pub metrics: Vec<MetricResult>,
    /// When the session started.
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// Measured duration in seconds.
    pub duration_seconds: f64,
    /// Captured standard output, if any.
    pub stdout: String,
    /// Captured standard error, if any.
    pub stderr: String,
    /// Links to logs, screenshots, and other artifacts.
    pub artifacts: BTreeMap<String, String>,
    /// Adapter-specific metadata.
    pub metadata: serde_json::Map<String, Value>,
}

impl SessionResult {
    /// Creates an empty session with a fresh id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            session_name: name.into(),
            metrics: Vec::new(),
            started_at: chrono::Utc::now(),
            duration_seconds: 0.0,
            stdout: String::new(),
            stderr: String::new(),
            artifacts: BTreeMap::new(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Appends a metric observation.
    pub fn push_metric(&mut self, metric: MetricResult) {
        self.metrics.push(metric);
    }

    /// Derives the session verdict from its metrics.
    pub fn verdict(&self) -> Verdict {
        if self.metrics.is_empty() {
            Verdict::Error
        } else if self.metrics.iter().all(|m| m.passed) {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }

    /// Metrics that failed their condition.
    pub fn failed_metrics(&self) -> impl Iterator<Item = &MetricResult> {
        self.metrics.iter().filter(|m| !m.passed)
    }

    fn to_json(&self) -> Value {
        json!({
            "session_id": self.session_id,
            "session_name": self.session_name,
            "verdict": self.verdict(),
            "duration_seconds": self.duration_seconds,
            "started_at": self.started_at.to_rfc3339(),
            "metrics": self.metrics,
            "failed_metrics": self.failed_metrics().map(|m| m.name.clone()).collect::<Vec<_>>(),
            "artifacts": self.artifacts,
            "metadata": self.metadata,
            "has_stdout": !self.stdout.is_empty(),
            "has_stderr": !self.stderr.is_empty(),
        })
    }
}

/// Identity and context for one evaluation.
///
/// `run_hash` is empty until [`EvaluationResult::finalize`] and write-once
/// thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationMetadata {
    /// Globally unique id for this specific run.
    pub evaluation_id: String,
    /// Content hash computed at finalization.
    pub run_hash: String,
    /// When the evaluation was created (UTC).
    pub timestamp_utc: chrono::DateTime<chrono::Utc>,
    /// Total duration, recorded at finalization.
    pub duration_seconds: f64,
    /// Environment context (hostname, platform, version); excluded from
    /// the content hash.
    pub environment: BTreeMap<String, String>,
    /// Schema version of the serialized form.
    pub schema_version: String,
    /// The adapter or environment kind that produced the results.
    pub adapter_type: String,
    /// Optional test category.
    pub category: Option<String>,
    /// Optional project name.
    pub project_name: Option<String>,
    /// The command that was run, if known.
    pub command: Option<String>,
}

/// Aggregate statistics over all sessions.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationSummary {
    pub total_sessions: usize,
    pub passed_sessions: usize,
    pub failed_sessions: usize,
    pub error_sessions: usize,
    pub total_metrics: usize,
    pub passed_metrics: usize,
    pub failed_metrics: usize,
    pub total_duration_seconds: f64,
}

/// The unified result of one evaluation invocation.
///
/// Sessions are appended as they complete; [`finalize`](Self::finalize)
/// freezes the result, records the total duration, and computes the
/// reproducible content hash. Finalization is idempotent; adding a session
/// afterwards is an error, not a silent ignore.
#[derive(Debug)]
pub struct EvaluationResult {
    /// Identity and context.
    pub metadata: EvaluationMetadata,
    sessions: Vec<SessionResult>,
    diagnostics: Vec<String>,
    warnings: Vec<String>,
    start: Instant,
    finalized: bool,
}

impl EvaluationResult {
    /// Creates an evaluation, capturing identity and environment context.
    pub fn new(
        adapter_type: impl Into<String>,
        category: Option<String>,
        project_name: Option<String>,
    ) -> Self {
        let mut environment = BTreeMap::new();
        if let Ok(hostname) = nix::unistd::gethostname() {
            environment.insert(
                "hostname".to_string(),
                hostname.to_string_lossy().to_string(),
            );
        }
        environment.insert("platform".to_string(), std::env::consts::OS.to_string());
        environment.insert(
            "testbed_version".to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        );

        Self {
            metadata: EvaluationMetadata {
                evaluation_id: uuid::Uuid::new_v4().to_string(),
                run_hash: String::new(),
                timestamp_utc: chrono::Utc::now(),
                duration_seconds: 0.0,
                environment,
                schema_version: SCHEMA_VERSION.to_string(),
                adapter_type: adapter_type.into(),
                category,
                project_name,
                command: None,
            },
            sessions: Vec::new(),
            diagnostics: Vec::new(),
            warnings: Vec::new(),
            start: Instant::now(),
            finalized: false,
        }
    }

    /// Records the command that produced these results.
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.metadata.command = Some(command.into());
        self
    }

    /// Appends a completed session.
    ///
    /// # Errors
    ///
    /// [`EvaluationError::AlreadyFinalized`] once `finalize` has run.
    pub fn add_session(&mut self, session: SessionResult) -> Result<(), EvaluationError> {
        if self.finalized {
            return Err(EvaluationError::AlreadyFinalized);
        }
        self.sessions.push(session);
        Ok(())
    }

    /// Adds a diagnostic message to the output document.
    pub fn add_diagnostic(&mut self, message: impl Into<String>) {
        self.diagnostics.push(message.into());
    }

    /// Adds a warning message to the output document.
    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// The recorded sessions.
    pub fn sessions(&self) -> &[SessionResult] {
        &self.sessions
    }

    /// Derives the evaluation verdict from its sessions.
    pub fn verdict(&self) -> Verdict {
        if self.sessions.is_empty() {
            return Verdict::Error;
        }
        if self.sessions.iter().any(|s| s.verdict() == Verdict::Error) {
            return Verdict::Error;
        }
        if self.sessions.iter().any(|s| s.verdict() == Verdict::Fail) {
            return Verdict::Fail;
        }
        Verdict::Pass
    }

    /// The process exit code implied by the verdict.
    pub fn exit_code(&self) -> i32 {
        self.verdict().exit_code()
    }

    /// Computes aggregate statistics over all sessions.
    pub fn summary(&self) -> EvaluationSummary {
        let total_metrics: usize = self.sessions.iter().map(|s| s.metrics.len()).sum();
        let passed_metrics: usize = self
            .sessions
            .iter()
            .map(|s| s.metrics.iter().filter(|m| m.passed).count())
            .sum();

        EvaluationSummary {
            total_sessions: self.sessions.len(),
            passed_sessions: self.count_verdict(Verdict::Pass),
            failed_sessions: self.count_verdict(Verdict::Fail),
            error_sessions: self.count_verdict(Verdict::Error),
            total_metrics,
            passed_metrics,
            failed_metrics: total_metrics - passed_metrics,
            total_duration_seconds: self.sessions.iter().map(|s| s.duration_seconds).sum(),
        }
    }

    fn count_verdict(&self, verdict: Verdict) -> usize {
        self.sessions
            .iter()
            .filter(|s| s.verdict() == verdict)
            .count()
    }

    /// Whether `finalize` has been called.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// The content hash; empty before finalization.
    pub fn run_hash(&self) -> &str {
        &self.metadata.run_hash
    }

    /// Freezes the evaluation: records total duration and computes the
    /// content hash. Calling it again is a no-op that keeps the stored
    /// hash.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.metadata.duration_seconds = self.start.elapsed().as_secs_f64();
        self.metadata.run_hash = self.compute_hash();
        self.finalized = true;
    }

    /// Hash over content only: adapter/category/project, the verdict, and
    /// every session's name, verdict, and metric name/value/passed. Field
    /// order is fixed by the serialization structs below, so identical
    /// content always yields identical bytes.
    fn compute_hash(&self) -> String {
        #[derive(Serialize)]
        struct HashMetric<'a> {
            name: &'a str,
            value: String,
            passed: bool,
        }

        #[derive(Serialize)]
        struct HashSession<'a> {
            session_name: &'a str,
            verdict: &'a str,
            metrics: Vec<HashMetric<'a>>,
        }

        #[derive(Serialize)]
        struct HashContent<'a> {
            adapter_type: &'a str,
            category: Option<&'a str>,
            project_name: Option<&'a str>,
            verdict: &'a str,
            sessions: Vec<HashSession<'a>>,
        }

        let content = HashContent {
            adapter_type: &self.metadata.adapter_type,
            category: self.metadata.category.as_deref(),
            project_name: self.metadata.project_name.as_deref(),
            verdict: self.verdict().as_str(),
            sessions: self
                .sessions
                .iter()
                .map(|s| HashSession {
                    session_name: &s.session_name,
                    verdict: s.verdict().as_str(),
                    metrics: s
                        .metrics
                        .iter()
                        .map(|m| HashMetric {
                            name: &m.name,
                            value: m.value_string(),
                            passed: m.passed,
                        })
                        .collect(),
                })
                .collect(),
        };

        let bytes = serde_json::to_string(&content).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(bytes.as_bytes());
        let digest = hasher.finalize();
        format!("{:x}", digest)[..16].to_string()
    }

    /// Renders the complete evaluation document.
    pub fn to_json(&self) -> Value {
        json!({
            "metadata": {
                "evaluation_id": self.metadata.evaluation_id,
                "run_hash": self.metadata.run_hash,
                "timestamp_utc": self.metadata.timestamp_utc.to_rfc3339(),
                "duration_seconds": self.metadata.duration_seconds,
                "environment": self.metadata.environment,
                "schema_version": self.metadata.schema_version,
                "adapter_type": self.metadata.adapter_type,
                "category": self.metadata.category,
                "project_name": self.metadata.project_name,
                "command": self.metadata.command,
            },
            "verdict": self.verdict(),
            "exit_code": self.exit_code(),
            "summary": self.summary(),
            "sessions": self.sessions.iter().map(|s| s.to_json()).collect::<Vec<_>>(),
            "diagnostics": self.diagnostics,
            "warnings": self.warnings,
        })
    }
}

/// Raw test counts from one command execution, with the provenance and
/// exit code needed to judge them.
///
/// This is the intermediate format between the output parser and the
/// unified schema; [`into_evaluation`](Self::into_evaluation) is the only
/// path to reportable output.
#[derive(Debug, Clone)]
pub struct TestReport {
    /// Normalized counts.
    pub counts: TestCounts,
    /// The exit code of the test command.
    pub exit_code: i32,
    /// Optional category label.
    pub category: Option<String>,
}

impl TestReport {
    /// Wraps parsed counts and the commanding exit code.
    pub fn new(counts: TestCounts, exit_code: i32) -> Self {
        Self {
            counts,
            exit_code,
            category: None,
        }
    }

    /// A configuration-error report (exit code 2, nothing measured).
    pub fn config_error() -> Self {
        Self {
            counts: TestCounts {
                passed: 0,
                failed: 0,
                errors: 1,
                skipped: 0,
                duration: 0.0,
                source: crate::parser::ParseSource::Fallback,
            },
            exit_code: EXIT_CONFIG_ERROR,
            category: None,
        }
    }

    /// Sets the category label.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Derives the verdict for these counts.
    ///
    /// ERROR when the exit code is the configuration-error code, when no
    /// tests were counted, or when the counts are an exit-code guess
    /// (fallback provenance) and the command failed — guessed counts must
    /// never produce a false FAIL or PASS. Otherwise FAIL if anything
    /// failed or errored, else PASS.
    pub fn verdict(&self) -> Verdict {
        if self.exit_code == EXIT_CONFIG_ERROR {
            return Verdict::Error;
        }
        if self.counts.total() == 0 {
            return Verdict::Error;
        }
        if self.counts.source.is_fallback() && self.exit_code != 0 {
            return Verdict::Error;
        }
        if self.counts.failed > 0 || self.counts.errors > 0 {
            return Verdict::Fail;
        }
        Verdict::Pass
    }

    /// Converts the report into a finalized [`EvaluationResult`].
    ///
    /// A PASS or FAIL report becomes one session carrying the standard
    /// metric triple (tests_passed / tests_failed / tests_errors). An
    /// ERROR report becomes a session with no metrics, so the ERROR
    /// cascades instead of being misread as FAIL.
    pub fn into_evaluation(
        self,
        adapter_type: impl Into<String>,
        project_name: Option<String>,
    ) -> EvaluationResult {
        let session_name = self.category.clone().unwrap_or_else(|| "tests".to_string());
        let mut result = EvaluationResult::new(adapter_type, self.category.clone(), project_name);
        let mut session = SessionResult::new(&session_name);
        session.duration_seconds = self.counts.duration;

        if self.verdict() == Verdict::Error {
            result.add_diagnostic(format!(
                "no trustworthy test counts (exit code {}, parsed from {:?})",
                self.exit_code, self.counts.source
            ));
        } else {
            let counts = &self.counts;
            session.push_metric(
                MetricResult::new(
                    "tests_passed",
                    counts.passed,
                    ">0",
                    counts.passed > 0 || counts.total() == 0,
                )
                .with_message(format!("{} tests passed", counts.passed)),
            );
            session.push_metric(
                MetricResult::new("tests_failed", counts.failed, "0", counts.failed == 0)
                    .with_message(format!("{} tests failed", counts.failed)),
            );
            session.push_metric(
                MetricResult::new("tests_errors", counts.errors, "0", counts.errors == 0)
                    .with_message(format!("{} test errors", counts.errors)),
            );
        }

        // add_session cannot fail here: the evaluation is not finalized yet.
        let _ = result.add_session(session);
        result.finalize();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParseSource;

    fn counts(passed: u32, failed: u32, errors: u32, source: ParseSource) -> TestCounts {
        TestCounts {
            passed,
            failed,
            errors,
            skipped: 0,
            duration: 1.0,
            source,
        }
    }

    fn passing_session(name: &str) -> SessionResult {
        let mut session = SessionResult::new(name);
        session.push_metric(MetricResult::new("ok", 1, ">0", true));
        session
    }

    fn failing_session(name: &str) -> SessionResult {
        let mut session = SessionResult::new(name);
        session.push_metric(MetricResult::new("ok", 0, ">0", false));
        session
    }

    #[test]
    fn test_session_verdict_cascade() {
        assert_eq!(passing_session("a").verdict(), Verdict::Pass);
        assert_eq!(failing_session("a").verdict(), Verdict::Fail);
        assert_eq!(SessionResult::new("empty").verdict(), Verdict::Error);
    }

    #[test]
    fn test_evaluation_verdict_cascade() {
        let mut eval = EvaluationResult::new("shell", None, None);
        eval.add_session(passing_session("a")).unwrap();
        eval.add_session(passing_session("b")).unwrap();
        assert_eq!(eval.verdict(), Verdict::Pass);

        eval.add_session(failing_session("c")).unwrap();
        assert_eq!(eval.verdict(), Verdict::Fail);

        eval.add_session(SessionResult::new("empty")).unwrap();
        assert_eq!(eval.verdict(), Verdict::Error);
    }

    #[test]
    fn test_zero_sessions_is_error() {
        let eval = EvaluationResult::new("shell", None, None);
        assert_eq!(eval.verdict(), Verdict::Error);
        assert_eq!(eval.exit_code(), 2);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Verdict::Pass.exit_code(), 0);
        assert_eq!(Verdict::Fail.exit_code(), 1);
        assert_eq!(Verdict::Error.exit_code(), 2);
    }

    #[test]
    fn test_hash_reproducible_across_context() {
        let build = |host: &str| {
            let mut eval =
                EvaluationResult::new("shell", Some("unit".into()), Some("proj".into()));
            eval.metadata
                .environment
                .insert("hostname".to_string(), host.to_string());
            eval.add_session(passing_session("unit-tests")).unwrap();
            eval.finalize();
            eval
        };

        let a = build("host-a");
        let b = build("host-b");

        assert_eq!(a.run_hash(), b.run_hash());
        assert_eq!(a.run_hash().len(), 16);
    }

    #[test]
    fn test_hash_changes_with_metric_value() {
        let build = |value: i64| {
            let mut eval = EvaluationResult::new("shell", None, None);
            let mut session = SessionResult::new("s");
            session.push_metric(MetricResult::new("count", value, ">0", true));
            eval.add_session(session).unwrap();
            eval.finalize();
            eval
        };

        assert_ne!(build(1).run_hash(), build(2).run_hash());
    }

    #[test]
    fn test_finalize_idempotent() {
        let mut eval = EvaluationResult::new("shell", None, None);
        eval.add_session(passing_session("a")).unwrap();
        eval.finalize();
        let first = eval.run_hash().to_string();

        eval.finalize();
        assert_eq!(eval.run_hash(), first);
    }

    #[test]
    fn test_add_session_after_finalize_errors() {
        let mut eval = EvaluationResult::new("shell", None, None);
        eval.finalize();

        let err = eval.add_session(passing_session("late")).unwrap_err();
        assert!(matches!(err, EvaluationError::AlreadyFinalized));
    }

    #[test]
    fn test_report_verdict_pass() {
        let report = TestReport::new(counts(5, 0, 0, ParseSource::Pytest), 0);
        assert_eq!(report.verdict(), Verdict::Pass);
    }

    #[test]
    fn test_report_verdict_fail() {
        let report = TestReport::new(counts(5, 2, 0, ParseSource::Pytest), 1);
        assert_eq!(report.verdict(), Verdict::Fail);
    }

    #[test]
    fn test_report_fallback_failure_is_error() {
        // Guessed counts plus a failing exit code must not read as FAIL.
        let report = TestReport::new(counts(0, 1, 0, ParseSource::Fallback), 1);
        assert_eq!(report.verdict(), Verdict::Error);
    }

    #[test]
    fn test_report_fallback_success_is_pass() {
        let report = TestReport::new(counts(1, 0, 0, ParseSource::Fallback), 0);
        assert_eq!(report.verdict(), Verdict::Pass);
    }

    #[test]
    fn test_report_config_error() {
        let report = TestReport::config_error();
        assert_eq!(report.verdict(), Verdict::Error);
        assert_eq!(report.exit_code, 2);
    }

    #[test]
    fn test_into_evaluation_pass() {
        let report = TestReport::new(counts(3, 0, 0, ParseSource::Counters), 0);
        let eval = report.into_evaluation("standalone", Some("demo".into()));

        assert_eq!(eval.verdict(), Verdict::Pass);
        assert!(eval.is_finalized());
        let session = &eval.sessions()[0];
        assert_eq!(session.metrics.len(), 3);
        assert_eq!(session.metrics[0].name, "tests_passed");
        assert_eq!(session.metrics[0].value, serde_json::json!(3));
    }

    #[test]
    fn test_into_evaluation_error_cascades() {
        let report = TestReport::new(counts(0, 1, 0, ParseSource::Fallback), 1);
        let eval = report.into_evaluation("standalone", None);

        assert_eq!(eval.verdict(), Verdict::Error);
        assert!(eval.sessions()[0].metrics.is_empty());
    }

    #[test]
    fn test_summary() {
        let mut eval = EvaluationResult::new("shell", None, None);
        eval.add_session(passing_session("a")).unwrap();
        eval.add_session(failing_session("b")).unwrap();

        let summary = eval.summary();
        assert_eq!(summary.total_sessions, 2);
        assert_eq!(summary.passed_sessions, 1);
        assert_eq!(summary.failed_sessions, 1);
        assert_eq!(summary.total_metrics, 2);
        assert_eq!(summary.failed_metrics, 1);
    }

    #[test]
    fn test_json_document_shape() {
        let mut eval = EvaluationResult::new("shell", Some("unit".into()), None);
        eval.add_session(passing_session("a")).unwrap();
        eval.finalize();

        let doc = eval.to_json();
        assert_eq!(doc["verdict"], "PASS");
        assert_eq!(doc["exit_code"], 0);
        assert_eq!(doc["metadata"]["run_hash"], eval.run_hash());
        assert_eq!(doc["sessions"][0]["verdict"], "PASS");
    }
}
