//! Configuration loading and construction-time validation.
//!
//! The config file supplies named environment descriptors; everything that
//! can be wrong with them — an unknown type tag, more than one default,
//! a composite referencing an undeclared name, a dependency cycle — is
//! rejected here, before any process is spawned. Runtime code can assume
//! a valid [`EnvironmentSet`].

pub mod schema;

use std::collections::BTreeMap;
use std::path::Path;

pub use schema::{
    BrowserSpec, CommonSpec, ComposeSpec, CompositeSpec, Config, EnvironmentSpec, HealthCheckSpec,
    NgrokSpec, ProjectConfig, RunConfig, StandaloneSpec, TestRunnerKind, TunnelSpec,
};

/// Errors raised while loading or validating configuration.
///
/// All of these are configuration errors in the taxonomy sense: they are
/// detected before any environment starts and are never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid TOML or violates the schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// More than one environment is marked `default = true`.
    #[error("multiple default environments: '{first}' and '{second}'")]
    MultipleDefaults { first: String, second: String },

    /// A composite references a name that is not declared.
    #[error("environment '{environment}' depends on '{dependency}' which is not defined")]
    UnknownDependency {
        environment: String,
        dependency: String,
    },

    /// The composite dependency graph contains a cycle.
    #[error("environment '{environment}' participates in a dependency cycle")]
    DependencyCycle { environment: String },

    /// A name was requested that is not in the set.
    #[error("unknown environment '{0}'")]
    UnknownEnvironment(String),

    /// No environment is marked default and none was named.
    #[error("no default environment configured")]
    NoDefaultEnvironment,

    /// A standalone ready pattern is not a valid regex.
    #[error("environment '{environment}' has an invalid ready_pattern: {source}")]
    InvalidReadyPattern {
        environment: String,
        source: regex::Error,
    },

    /// A browser environment names a test runner with no registered adapter.
    #[error("no adapter registered for test runner '{0}'")]
    UnknownAdapter(String),
}

/// A validated, immutable set of environment descriptors.
///
/// Construction enforces the set invariants; afterwards the descriptors
/// are never mutated.
#[derive(Debug, Clone)]
pub struct EnvironmentSet {
    specs: BTreeMap<String, EnvironmentSpec>,
}

impl EnvironmentSet {
    /// Validates descriptors into a set.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MultipleDefaults`] if two descriptors claim default
    /// - [`ConfigError::UnknownDependency`] if a composite references an
    ///   undeclared name
    /// - [`ConfigError::DependencyCycle`] if composite dependencies loop
    pub fn new(specs: BTreeMap<String, EnvironmentSpec>) -> Result<Self, ConfigError> {
        let mut default_name: Option<&str> = None;
        for (name, spec) in &specs {
            if spec.common().is_default {
                if let Some(first) = default_name {
                    return Err(ConfigError::MultipleDefaults {
                        first: first.to_string(),
                        second: name.clone(),
                    });
                }
                default_name = Some(name);
            }
        }

        for (name, spec) in &specs {
            if let EnvironmentSpec::Composite(composite) = spec {
                for dep in &composite.depends_on {
                    if !specs.contains_key(dep) {
                        return Err(ConfigError::UnknownDependency {
                            environment: name.clone(),
                            dependency: dep.clone(),
                        });
                    }
                }
            }
        }

        let set = Self { specs };
        set.check_cycles()?;
        Ok(set)
    }

    /// Depth-first walk over composite edges rejecting cycles.
    fn check_cycles(&self) -> Result<(), ConfigError> {
        for name in self.specs.keys() {
            let mut stack = Vec::new();
            self.visit(name, &mut stack)?;
        }
        Ok(())
    }

    fn visit<'a>(&'a self, name: &'a str, stack: &mut Vec<&'a str>) -> Result<(), ConfigError> {
        if stack.contains(&name) {
            return Err(ConfigError::DependencyCycle {
                environment: name.to_string(),
            });
        }
        if let Some(EnvironmentSpec::Composite(composite)) = self.specs.get(name) {
            stack.push(name);
            for dep in &composite.depends_on {
                self.visit(dep, stack)?;
            }
            stack.pop();
        }
        Ok(())
    }

    /// Looks up a descriptor by name.
    pub fn get(&self, name: &str) -> Option<&EnvironmentSpec> {
        self.specs.get(name)
    }

    /// The name flagged `default = true`, if any.
    pub fn default_name(&self) -> Option<&str> {
        self.specs
            .iter()
            .find(|(_, spec)| spec.common().is_default)
            .map(|(name, _)| name.as_str())
    }

    /// Iterates over (name, descriptor) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &EnvironmentSpec)> {
        self.specs.iter().map(|(n, s)| (n.as_str(), s))
    }

    /// The declared environment names.
    pub fn names(&self) -> Vec<&str> {
        self.specs.keys().map(|n| n.as_str()).collect()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Loads and validates a config file.
///
/// Relative `working_dir` values are resolved against the config file's
/// directory, so an environment set behaves the same regardless of the
/// invocation directory.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    let mut config: Config = toml::from_str(&raw)?;

    let base = path.parent().unwrap_or(Path::new("."));
    for spec in config.environments.values_mut() {
        let common = spec.common_mut();
        if common.working_dir.is_relative() {
            common.working_dir = base.join(&common.working_dir);
        }
        if let EnvironmentSpec::Browser(browser) = spec {
            let browser_dir = browser.common.working_dir.clone();
            if let Some(server) = browser.server.as_mut() {
                // An omitted server working_dir inherits the browser's.
                if server.common.working_dir == Path::new(".") {
                    server.common.working_dir = browser_dir;
                } else if server.common.working_dir.is_relative() {
                    server.common.working_dir = base.join(&server.common.working_dir);
                }
            }
        }
    }

    Ok(config)
}

impl Config {
    /// Validates the environment descriptors into an [`EnvironmentSet`].
    pub fn environment_set(&self) -> Result<EnvironmentSet, ConfigError> {
        EnvironmentSet::new(self.environments.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_set(toml_src: &str) -> Result<EnvironmentSet, ConfigError> {
        let config: Config = toml::from_str(toml_src).unwrap();
        config.environment_set()
    }

    #[test]
    fn test_valid_set() {
        let set = parse_set(
            r#"
            [environments.backend]
            type = "docker-compose"
            test_service = "api"

            [environments.frontend]
            type = "standalone"
            command = "npm run dev"
            default = true

            [environments.full]
            type = "composite"
            depends_on = ["backend", "frontend"]
            "#,
        )
        .unwrap();

        assert_eq!(set.default_name(), Some("frontend"));
        assert_eq!(set.names().len(), 3);
        assert!(set.get("full").is_some());
    }

    #[test]
    fn test_multiple_defaults_rejected() {
        let err = parse_set(
            r#"
            [environments.a]
            type = "standalone"
            command = "x"
            default = true

            [environments.b]
            type = "standalone"
            command = "y"
            default = true
            "#,
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::MultipleDefaults { .. }));
    }

    #[test]
    fn test_undeclared_dependency_rejected() {
        let err = parse_set(
            r#"
            [environments.full]
            type = "composite"
            depends_on = ["missing"]
            "#,
        )
        .unwrap_err();

        match err {
            ConfigError::UnknownDependency {
                environment,
                dependency,
            } => {
                assert_eq!(environment, "full");
                assert_eq!(dependency, "missing");
            }
            other => panic!("wrong error: {}", other),
        }
    }

    #[test]
    fn test_dependency_cycle_rejected() {
        let err = parse_set(
            r#"
            [environments.a]
            type = "composite"
            depends_on = ["b"]

            [environments.b]
            type = "composite"
            depends_on = ["a"]
            "#,
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::DependencyCycle { .. }));
    }

    #[test]
    fn test_self_cycle_rejected() {
        let err = parse_set(
            r#"
            [environments.a]
            type = "composite"
            depends_on = ["a"]
            "#,
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::DependencyCycle { .. }));
    }

    #[test]
    fn test_diamond_dependencies_allowed() {
        // a → b, a → c, b → d, c → d: shared dependency, no cycle.
        let set = parse_set(
            r#"
            [environments.d]
            type = "standalone"
            command = "x"

            [environments.b]
            type = "composite"
            depends_on = ["d"]

            [environments.c]
            type = "composite"
            depends_on = ["d"]

            [environments.a]
            type = "composite"
            depends_on = ["b", "c"]
            "#,
        );

        assert!(set.is_ok());
    }

    #[test]
    fn test_load_config_absolutizes_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("testbed.toml");
        std::fs::write(
            &path,
            r#"
            [environments.app]
            type = "standalone"
            command = "true"
            working_dir = "sub"
            "#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        let spec = &config.environments["app"];
        assert!(spec.common().working_dir.is_absolute() || spec.common().working_dir.starts_with(dir.path()));
        assert!(spec.common().working_dir.ends_with("sub"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/testbed.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
