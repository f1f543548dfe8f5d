//! Test adapter boundary and registry.
//!
//! An adapter wraps one browser/test framework behind a small capability
//! interface; the engine only ever calls these four operations:
//!
//! - [`TestAdapter::discover`] — list runnable test items
//! - [`TestAdapter::execute`] — run tests and return a structured report
//! - [`TestAdapter::available_markers`] — list known markers/categories
//! - [`TestAdapter::validate_environment`] — check the framework is usable
//!
//! Adapters are found by name through an explicit [`AdapterRegistry`]
//! populated at process start; there is no reflection or plugin scanning.
//! Cloud drivers that talk to a remote CI provider live outside this crate
//! and are registered by the embedding application.

pub mod playwright;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::evaluation::TestReport;

pub use playwright::PlaywrightAdapter;

/// One test item discovered by an adapter.
#[derive(Debug, Clone)]
pub struct TestItem {
    /// Stable identifier usable for selection.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Source file the test lives in.
    pub path: String,
    /// Markers/tags attached to the test.
    pub markers: Vec<String>,
}

/// Configuration handed to adapter constructors.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Absolute project root the adapter operates in.
    pub project_root: PathBuf,
    /// Adapter-specific settings.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AdapterConfig {
    /// Creates a config with just the project root.
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Options for one adapter execution.
#[derive(Debug, Clone, Default)]
pub struct AdapterRunOptions {
    /// Specific tests to run; `None` runs everything.
    pub tests: Option<Vec<TestItem>>,
    /// Suite/grep filter.
    pub suite: Option<String>,
    /// Verbose output.
    pub verbose: bool,
    /// Timeout for the whole run.
    pub timeout: Option<Duration>,
    /// Base URL the tests should target (a tunnel's public URL for cloud
    /// drivers, the local server otherwise).
    pub target_url: Option<String>,
}

/// Capability interface for one test framework.
#[async_trait]
pub trait TestAdapter: Send + Sync {
    /// The adapter's registry name.
    fn name(&self) -> &str;

    /// Discovers runnable tests, optionally filtered by category.
    async fn discover(&self, category: Option<&str>) -> Vec<TestItem>;

    /// Runs tests and returns the normalized report.
    async fn execute(&self, opts: &AdapterRunOptions) -> TestReport;

    /// Markers/categories the framework knows about.
    fn available_markers(&self) -> Vec<String>;

    /// Whether the framework is installed and configured.
    async fn validate_environment(&self) -> bool;
}

/// Constructor producing an adapter from its configuration.
pub type AdapterConstructor = Box<dyn Fn(&AdapterConfig) -> Box<dyn TestAdapter> + Send + Sync>;

/// Explicit name → constructor registry.
///
/// Populated once at process start; resolving a name that was never
/// registered is a construction-time error for the caller.
#[derive(Default)]
pub struct AdapterRegistry {
    constructors: HashMap<String, AdapterConstructor>,
}

impl AdapterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with the adapters this crate ships.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("playwright", |config: &AdapterConfig| -> Box<dyn TestAdapter> {
            Box::new(PlaywrightAdapter::new(config.clone()))
        });
        registry
    }

    /// Registers a constructor under a name, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&AdapterConfig) -> Box<dyn TestAdapter> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
    }

    /// Instantiates the named adapter, if registered.
    pub fn create(&self, name: &str, config: &AdapterConfig) -> Option<Box<dyn TestAdapter>> {
        self.constructors.get(name).map(|ctor| ctor(config))
    }

    /// Whether a name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered adapter names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(|n| n.as_str()).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullAdapter;

    #[async_trait]
    impl TestAdapter for NullAdapter {
        fn name(&self) -> &str {
            "null"
        }

        async fn discover(&self, _category: Option<&str>) -> Vec<TestItem> {
            Vec::new()
        }

        async fn execute(&self, _opts: &AdapterRunOptions) -> TestReport {
            TestReport::config_error()
        }

        fn available_markers(&self) -> Vec<String> {
            Vec::new()
        }

        async fn validate_environment(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_builtin_registry_has_playwright() {
        let registry = AdapterRegistry::builtin();
        assert!(registry.contains("playwright"));
        assert!(!registry.contains("cloud"));

        let adapter = registry
            .create("playwright", &AdapterConfig::new("/tmp"))
            .unwrap();
        assert_eq!(adapter.name(), "playwright");
    }

    #[test]
    fn test_register_custom_adapter() {
        let mut registry = AdapterRegistry::new();
        registry.register("null", |_: &AdapterConfig| -> Box<dyn TestAdapter> {
            Box::new(NullAdapter)
        });

        assert!(registry.contains("null"));
        assert_eq!(registry.names(), vec!["null"]);
        assert!(registry.create("missing", &AdapterConfig::new("/tmp")).is_none());
    }
}
