//! Resolves environment names into runnable environments.

use std::sync::Arc;

use tracing::debug;

use super::browser::BrowserEnvironment;
use super::compose::ComposeEnvironment;
use super::composite::CompositeEnvironment;
use super::standalone::StandaloneEnvironment;
use super::tunnel::NgrokEnvironment;
use super::{Environment, ProgressCallback};
use crate::adapter::AdapterRegistry;
use crate::config::{ConfigError, EnvironmentSet, EnvironmentSpec};

/// Builds [`Environment`] instances from a validated descriptor set.
///
/// Composite descriptors are resolved recursively in declared dependency
/// order; the set's construction-time validation guarantees the recursion
/// terminates.
pub struct EnvironmentResolver {
    set: EnvironmentSet,
    registry: Arc<AdapterRegistry>,
    progress: Option<ProgressCallback>,
}

impl EnvironmentResolver {
    /// Creates a resolver over a validated set with the builtin adapters.
    pub fn new(set: EnvironmentSet) -> Self {
        Self {
            set,
            registry: Arc::new(AdapterRegistry::builtin()),
            progress: None,
        }
    }

    /// Replaces the adapter registry (e.g. to add a cloud driver).
    pub fn with_registry(mut self, registry: Arc<AdapterRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Sets the callback receiving wait progress messages.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// The validated descriptor set.
    pub fn set(&self) -> &EnvironmentSet {
        &self.set
    }

    /// The name marked `default = true`, if any.
    pub fn default_environment(&self) -> Option<&str> {
        self.set.default_name()
    }

    /// Resolves a name into a runnable environment.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownEnvironment`] for unknown names, plus any
    /// construction error of the variant (invalid ready pattern, missing
    /// adapter).
    pub fn resolve(&self, name: &str) -> Result<Box<dyn Environment>, ConfigError> {
        let spec = self
            .set
            .get(name)
            .ok_or_else(|| ConfigError::UnknownEnvironment(name.to_string()))?;

        debug!("resolving environment '{}' ({})", name, spec.kind_str());

        match spec {
            EnvironmentSpec::Standalone(spec) => {
                Ok(Box::new(StandaloneEnvironment::new(name, spec.clone())?))
            }
            EnvironmentSpec::DockerCompose(spec) => {
                let mut env = ComposeEnvironment::new(name, spec.clone());
                if let Some(progress) = &self.progress {
                    env = env.with_progress(Arc::clone(progress));
                }
                Ok(Box::new(env))
            }
            EnvironmentSpec::Composite(spec) => {
                let deps = spec
                    .depends_on
                    .iter()
                    .map(|dep| self.resolve(dep))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Box::new(CompositeEnvironment::new(name, spec.clone(), deps)))
            }
            EnvironmentSpec::Ngrok(spec) => {
                Ok(Box::new(NgrokEnvironment::new(name, spec.clone())))
            }
            EnvironmentSpec::Browser(spec) => Ok(Box::new(BrowserEnvironment::new(
                name,
                spec.clone(),
                &self.registry,
            )?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::environment::EnvironmentKind;

    fn resolver(toml_src: &str) -> EnvironmentResolver {
        let config: Config = toml::from_str(toml_src).unwrap();
        EnvironmentResolver::new(config.environment_set().unwrap())
    }

    #[test]
    fn test_resolve_each_kind() {
        let resolver = resolver(
            r#"
            [environments.app]
            type = "standalone"
            command = "npm run dev"
            default = true

            [environments.backend]
            type = "docker-compose"
            test_service = "api"

            [environments.tunnel]
            type = "ngrok"
            port = 3000

            [environments.e2e]
            type = "browser"

            [environments.full]
            type = "composite"
            depends_on = ["app", "backend"]
            "#,
        );

        assert_eq!(resolver.default_environment(), Some("app"));
        assert_eq!(
            resolver.resolve("app").unwrap().kind(),
            EnvironmentKind::Standalone
        );
        assert_eq!(
            resolver.resolve("backend").unwrap().kind(),
            EnvironmentKind::DockerCompose
        );
        assert_eq!(
            resolver.resolve("tunnel").unwrap().kind(),
            EnvironmentKind::Ngrok
        );
        assert_eq!(
            resolver.resolve("e2e").unwrap().kind(),
            EnvironmentKind::Browser
        );
        assert_eq!(
            resolver.resolve("full").unwrap().kind(),
            EnvironmentKind::Composite
        );
    }

    #[test]
    fn test_resolve_unknown_name() {
        let resolver = resolver(
            r#"
            [environments.app]
            type = "standalone"
            command = "true"
            "#,
        );

        let err = resolver.resolve("missing").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownEnvironment(_)));
    }

    #[test]
    fn test_resolve_composite_builds_dependencies_in_order() {
        let resolver = resolver(
            r#"
            [environments.db]
            type = "standalone"
            command = "postgres"

            [environments.web]
            type = "standalone"
            command = "npm run dev"

            [environments.full]
            type = "composite"
            depends_on = ["db", "web"]
            test_command = "pytest"
            "#,
        );

        let env = resolver.resolve("full").unwrap();
        assert_eq!(env.kind(), EnvironmentKind::Composite);
        assert_eq!(env.name(), "full");
    }

    #[test]
    fn test_invalid_ready_pattern_surfaces_at_resolution() {
        let resolver = resolver(
            r#"
            [environments.app]
            type = "standalone"
            command = "true"
            ready_pattern = "(["
            "#,
        );

        let err = resolver.resolve("app").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidReadyPattern { .. }));
    }
}
