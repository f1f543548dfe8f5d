//! Playwright adapter: local browser-driver tests via the playwright CLI.
//!
//! Discovery runs `npx playwright test --list` and parses the listing;
//! execution runs the suite with the base URL pointed at the environment
//! under test. Results are normalized by the shared output parser.

use async_trait::async_trait;

use super::{AdapterConfig, AdapterRunOptions, TestAdapter, TestItem};
use crate::evaluation::TestReport;
use crate::executor::{CommandRunner, CommandSpec, ExecOptions};
use crate::parser::parse_test_output;

/// Adapter driving playwright through its CLI.
pub struct PlaywrightAdapter {
    config: AdapterConfig,
    config_file: String,
}

impl PlaywrightAdapter {
    /// Creates the adapter; honors a `config_file` entry in the extra
    /// settings (default `playwright.config.ts`).
    pub fn new(config: AdapterConfig) -> Self {
        let config_file = config
            .extra
            .get("config_file")
            .and_then(|v| v.as_str())
            .unwrap_or("playwright.config.ts")
            .to_string();
        Self {
            config,
            config_file,
        }
    }

    fn runner(&self, target_url: Option<&str>) -> CommandRunner {
        let mut runner = CommandRunner::new(&self.config.project_root);
        if let Some(url) = target_url {
            runner = runner.env("PLAYWRIGHT_TEST_BASE_URL", url);
        }
        runner
    }

    /// Parses `playwright test --list` output into test items.
    ///
    /// Listing lines look like
    /// `  [chromium] › auth.spec.ts:12:3 › login › accepts valid password`.
    fn parse_listing(output: &str) -> Vec<TestItem> {
        let mut items = Vec::new();
        for line in output.lines() {
            let trimmed = line.trim();
            if !trimmed.contains('›') {
                continue;
            }
            let mut parts = trimmed.split('›').map(str::trim);
            let first = parts.next().unwrap_or_default();
            // Skip the project tag when present.
            let location = if first.starts_with('[') {
                parts.next().unwrap_or_default()
            } else {
                first
            };
            let title = parts.collect::<Vec<_>>().join(" › ");
            if location.is_empty() || title.is_empty() {
                continue;
            }
            let path = location.split(':').next().unwrap_or(location).to_string();
            items.push(TestItem {
                id: format!("{} › {}", location, title),
                name: title,
                path,
                markers: Vec::new(),
            });
        }
        items
    }
}

#[async_trait]
impl TestAdapter for PlaywrightAdapter {
    fn name(&self) -> &str {
        "playwright"
    }

    async fn discover(&self, category: Option<&str>) -> Vec<TestItem> {
        let mut cmd = "npx playwright test --list".to_string();
        if let Some(category) = category {
            cmd = format!("{} --grep {}", cmd, category);
        }

        let result = self
            .runner(None)
            .execute(&CommandSpec::Single(cmd), &ExecOptions::new())
            .await;

        Self::parse_listing(&result.stdout)
    }

    async fn execute(&self, opts: &AdapterRunOptions) -> TestReport {
        let mut cmd = "npx playwright test".to_string();
        if let Some(suite) = &opts.suite {
            cmd = format!("{} --grep {}", cmd, suite);
        }
        if let Some(tests) = &opts.tests {
            for test in tests {
                cmd = format!("{} {}", cmd, test.path);
            }
        }

        let mut exec_opts = ExecOptions::new();
        if let Some(timeout) = opts.timeout {
            exec_opts = exec_opts.timeout(timeout);
        }

        let result = self
            .runner(opts.target_url.as_deref())
            .execute(&CommandSpec::Single(cmd), &exec_opts)
            .await;

        let combined = format!("{}\n{}", result.stdout, result.stderr);
        TestReport::new(
            parse_test_output(&combined, result.exit_code),
            result.exit_code,
        )
    }

    fn available_markers(&self) -> Vec<String> {
        Vec::new()
    }

    async fn validate_environment(&self) -> bool {
        let root = &self.config.project_root;
        root.is_dir()
            && (root.join(&self.config_file).exists()
                || root.join("playwright.config.js").exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listing() {
        let output = "\
Listing tests:
  [chromium] › auth.spec.ts:12:3 › login › accepts valid password
  [chromium] › auth.spec.ts:20:3 › login › rejects bad password
  cart.spec.ts:5:1 › checkout works
Total: 3 tests in 2 files";

        let items = PlaywrightAdapter::parse_listing(output);

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].path, "auth.spec.ts");
        assert_eq!(items[0].name, "login › accepts valid password");
        assert_eq!(items[2].name, "checkout works");
    }

    #[test]
    fn test_parse_listing_ignores_noise() {
        let items = PlaywrightAdapter::parse_listing("no tests here\nTotal: 0 tests");
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_validate_environment_requires_config() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = PlaywrightAdapter::new(AdapterConfig::new(dir.path()));
        assert!(!adapter.validate_environment().await);

        std::fs::write(dir.path().join("playwright.config.ts"), "export default {}").unwrap();
        assert!(adapter.validate_environment().await);
    }
}
