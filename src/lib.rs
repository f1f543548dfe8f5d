//! testbed: a multi-environment test orchestration engine.
//!
//! Given a declarative description of one or more runtime environments —
//! a bare process, a Docker Compose stack, a tunnel, or a composition of
//! the above — testbed brings the environment up, waits until it is
//! observably healthy, executes a test command inside it, normalizes
//! heterogeneous test-framework output into a uniform result, and tears
//! the environment down.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Environments**: lifecycle-managed runtime targets
//!   (standalone process, docker-compose, composite, tunnel, browser)
//! - **Executor**: runs test commands locally or inside containers
//! - **Parser**: normalizes test-framework output into uniform counts
//! - **Evaluation**: aggregates sessions into one content-hashed verdict
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::time::Duration;
//! use testbed::config::load_config;
//! use testbed::environment::{EnvironmentResolver, TestRunOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(Path::new("testbed.toml"))?;
//!     let resolver = EnvironmentResolver::new(config.environment_set()?);
//!
//!     let mut env = resolver.resolve("backend")?;
//!     let setup = env.setup().await;
//!     if setup.success && env.wait_ready(Duration::from_secs(120)).await {
//!         let report = env.run_tests(&TestRunOptions::default()).await;
//!         let evaluation = report.into_evaluation("backend", None);
//!         println!("{}", evaluation.verdict());
//!     }
//!     env.teardown(false).await;
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod config;
pub mod environment;
pub mod evaluation;
pub mod executor;
pub mod parser;
pub mod retry;
pub mod signal;

// Re-export commonly used types
pub use config::{Config, ConfigError, EnvironmentSet, load_config};
pub use environment::{Environment, EnvironmentResolver, PhaseTimings, SetupResult, TestRunOptions};
pub use evaluation::{EvaluationResult, MetricResult, SessionResult, TestReport, Verdict};
pub use executor::{CommandRunner, CommandSpec, ExecOptions, ExecutionResult};
pub use parser::{ParseSource, TestCounts, parse_test_output};
pub use retry::RetryPolicy;
