use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::repository::{PayrollRepository, RepositoryError};

/// Where the engine's data lives.
///
/// `backend` selects a registered [`RepositoryFactory`]; the factory decides
/// what `connection_string` means. For `sqlite` it is a file path, a
/// `sqlite:` URL or `:memory:`; the `memory` backend ignores it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub backend: String,
    pub connection_string: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            connection_string: ":memory:".to_string(),
        }
    }
}

/// Opens one kind of store. Binaries register every factory they link
/// against and pick one at runtime from [`DbConfig::backend`].
#[async_trait]
pub trait RepositoryFactory: Send + Sync {
    /// Lowercase name matched against [`DbConfig::backend`].
    fn backend_name(&self) -> &'static str;

    /// Returns a repository that is migrated and ready for the engine.
    async fn create(
        &self,
        config: &DbConfig,
    ) -> Result<Box<dyn PayrollRepository>, RepositoryError>;
}

#[derive(Default)]
pub struct RepositoryRegistry {
    factories: BTreeMap<&'static str, Box<dyn RepositoryFactory>>,
}

impl RepositoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `factory`; a factory already registered under the same name is
    /// dropped.
    pub fn register(
        &mut self,
        factory: Box<dyn RepositoryFactory>,
    ) {
        let name = factory.backend_name();
        if self.factories.insert(name, factory).is_some() {
            debug!(backend = name, "replaced repository factory");
        }
    }

    /// Registered backend names in alphabetical order.
    pub fn available_backends(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    /// Opens the store named by `config.backend`.
    ///
    /// # Errors
    /// [`RepositoryError::Configuration`] for an unregistered backend;
    /// otherwise whatever the factory reports.
    pub async fn create(
        &self,
        config: &DbConfig,
    ) -> Result<Box<dyn PayrollRepository>, RepositoryError> {
        let Some(factory) = self.factories.get(config.backend.as_str()) else {
            return Err(RepositoryError::Configuration(format!(
                "no '{}' backend registered (known: {})",
                config.backend,
                self.available_backends().join(", ")
            )));
        };

        debug!(backend = factory.backend_name(), "opening repository");
        factory.create(config).await
    }
}
