//! testbed CLI - multi-environment test orchestration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use testbed::config::{self, Config, ConfigError, EnvironmentSpec};
use testbed::environment::{EnvironmentResolver, ProgressCallback, TestRunOptions};
use testbed::evaluation::{EvaluationResult, TestReport, Verdict};

#[derive(Parser)]
#[command(name = "testbed")]
#[command(about = "Multi-environment test orchestration", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "testbed.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tests in an environment
    Run {
        /// Environment to run in (defaults to the one marked default)
        #[arg(short, long)]
        env: Option<String>,

        /// Test suite filter
        #[arg(long)]
        suite: Option<String>,

        /// Test category filter
        #[arg(long)]
        category: Option<String>,

        /// Keep the environment running after tests
        #[arg(long)]
        keep_running: bool,

        /// Output the full evaluation document as JSON
        #[arg(long)]
        json: bool,

        /// Override the readiness timeout in seconds
        #[arg(long)]
        ready_timeout: Option<u64>,
    },

    /// List configured environments
    Environments,

    /// Validate the configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let exit_code = match cli.command {
        Commands::Run {
            env,
            suite,
            category,
            keep_running,
            json,
            ready_timeout,
        } => {
            run_tests(
                &cli.config,
                env,
                TestRunOptions {
                    suite,
                    category,
                    verbose: cli.verbose,
                    timeout: None,
                },
                keep_running,
                json,
                ready_timeout,
            )
            .await?
        }
        Commands::Environments => list_environments(&cli.config)?,
        Commands::Validate => validate_config(&cli.config)?,
    };

    std::process::exit(exit_code);
}

async fn run_tests(
    config_path: &Path,
    env_name: Option<String>,
    mut opts: TestRunOptions,
    keep_running: bool,
    json: bool,
    ready_timeout: Option<u64>,
) -> Result<i32> {
    let config = match load(config_path) {
        Ok(config) => config,
        Err(err) => return config_failure(err),
    };

    let set = match config.environment_set() {
        Ok(set) => set,
        Err(err) => return config_failure(err),
    };

    if set.is_empty() {
        eprintln!("{}", console::style("No environments configured").red());
        eprintln!("Add an [environments.<name>] section to {}", config_path.display());
        return Ok(2);
    }

    opts.timeout = Some(Duration::from_secs(config.run.test_timeout_secs));
    let ready_timeout =
        Duration::from_secs(ready_timeout.unwrap_or(config.run.ready_timeout_secs));

    // Progress spinner fed by environment wait callbacks
    let spinner = indicatif::ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(120));
    let spinner_handle = spinner.clone();
    let progress: ProgressCallback = Arc::new(move |msg: &str| {
        spinner_handle.set_message(msg.to_string());
    });

    let resolver = EnvironmentResolver::new(set).with_progress(progress);

    let env_name = match env_name.or_else(|| resolver.default_environment().map(String::from)) {
        Some(name) => name,
        None => return config_failure(ConfigError::NoDefaultEnvironment),
    };

    let mut env = match resolver.resolve(&env_name) {
        Ok(env) => env,
        Err(err) => {
            spinner.finish_and_clear();
            eprintln!("Available environments: {}", resolver.set().names().join(", "));
            return config_failure(err);
        }
    };

    let project_name = config.project.name.clone();
    let adapter_type = env.kind().to_string();

    info!("running tests in '{}' ({})", env_name, env.kind());

    spinner.set_message("setting up environment...");
    let setup = env.setup().await;
    if !setup.success {
        spinner.finish_and_clear();
        eprintln!(
            "{} {}",
            console::style("Setup failed:").red().bold(),
            setup.message
        );
        env.teardown(keep_running).await;
        let mut evaluation =
            TestReport::config_error().into_evaluation(adapter_type, project_name);
        evaluation.add_diagnostic(setup.message);
        return Ok(render(&evaluation, json, env.timings().total()));
    }

    spinner.set_message("waiting for environment to be ready...");
    if !env.wait_ready(ready_timeout).await {
        spinner.finish_and_clear();
        eprintln!(
            "{} environment not ready within {:?}",
            console::style("Error:").red().bold(),
            ready_timeout
        );
        env.teardown(keep_running).await;
        let mut evaluation =
            TestReport::config_error().into_evaluation(adapter_type, project_name);
        evaluation.add_diagnostic(format!(
            "environment '{}' did not become ready within {:?}",
            env_name, ready_timeout
        ));
        return Ok(render(&evaluation, json, env.timings().total()));
    }
    spinner.finish_and_clear();

    if !json {
        println!(
            "{} ({:.1}s)",
            console::style("Environment ready").green(),
            env.timings().health_check.as_secs_f64()
        );
    }

    let report = env.run_tests(&opts).await;
    env.teardown(keep_running).await;
    if keep_running && !json {
        println!(
            "{}",
            console::style("Keeping environment running (--keep-running)").yellow()
        );
    }

    let evaluation = report.into_evaluation(adapter_type, project_name);
    Ok(render(&evaluation, json, env.timings().total()))
}

/// Prints the evaluation and returns its exit code.
fn render(evaluation: &EvaluationResult, json: bool, total: Duration) -> i32 {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&evaluation.to_json()).unwrap_or_default()
        );
        return evaluation.exit_code();
    }

    let verdict = evaluation.verdict();
    let styled = match verdict {
        Verdict::Pass => console::style("PASS").green().bold(),
        Verdict::Fail => console::style("FAIL").red().bold(),
        Verdict::Error => console::style("ERROR").red().bold(),
    };

    let summary = evaluation.summary();
    println!();
    println!("Verdict: {}", styled);
    println!(
        "  Sessions: {} ({} passed, {} failed, {} error)",
        summary.total_sessions,
        summary.passed_sessions,
        summary.failed_sessions,
        summary.error_sessions
    );
    println!(
        "  Metrics:  {} ({} passed, {} failed)",
        summary.total_metrics, summary.passed_metrics, summary.failed_metrics
    );
    println!("  Duration: {:.1}s", total.as_secs_f64());
    println!("  Run hash: {}", evaluation.run_hash());

    for session in evaluation.sessions() {
        if session.verdict() != Verdict::Pass {
            println!();
            println!(
                "  {} {}",
                console::style(session.verdict().as_str()).red(),
                session.session_name
            );
            for metric in session.failed_metrics() {
                let message = metric.message.as_deref().unwrap_or(&metric.name);
                println!("    - {}", console::style(message).dim());
            }
        }
    }

    evaluation.exit_code()
}

fn list_environments(config_path: &Path) -> Result<i32> {
    let config = match load(config_path) {
        Ok(config) => config,
        Err(err) => return config_failure(err),
    };
    let set = match config.environment_set() {
        Ok(set) => set,
        Err(err) => return config_failure(err),
    };

    if set.is_empty() {
        println!("No environments defined in {}", config_path.display());
        return Ok(0);
    }

    println!("Available environments:");
    for (name, spec) in set.iter() {
        let default_marker = if spec.common().is_default {
            console::style(" (default)").green().to_string()
        } else {
            String::new()
        };
        let details = describe(spec);
        println!(
            "  {:<16} {:<16} {}{}",
            console::style(name).cyan(),
            spec.kind_str(),
            details,
            default_marker
        );
    }

    Ok(0)
}

fn describe(spec: &EnvironmentSpec) -> String {
    match spec {
        EnvironmentSpec::Standalone(s) => s.command.chars().take(40).collect(),
        EnvironmentSpec::DockerCompose(s) => {
            let mut details = format!("file: {}", s.compose_file);
            if !s.services.is_empty() {
                details.push_str(&format!(", services: {}", s.services.len()));
            }
            details
        }
        EnvironmentSpec::Composite(s) => format!("depends: {}", s.depends_on.join(", ")),
        EnvironmentSpec::Ngrok(s) => format!("port: {}", s.tunnel.port),
        EnvironmentSpec::Browser(s) => format!("runner: {:?}", s.test_runner).to_lowercase(),
    }
}

fn validate_config(config_path: &Path) -> Result<i32> {
    match load(config_path).and_then(|config| config.environment_set()) {
        Ok(set) => {
            println!(
                "{} {} environment(s) configured",
                console::style("Configuration OK:").green(),
                set.names().len()
            );
            Ok(0)
        }
        Err(err) => config_failure(err),
    }
}

fn load(config_path: &Path) -> std::result::Result<Config, ConfigError> {
    config::load_config(config_path)
}

/// Reports a configuration error and maps it to exit code 2.
fn config_failure(err: ConfigError) -> Result<i32> {
    eprintln!("{} {}", console::style("Error:").red().bold(), err);
    Ok(2)
}
