//! Provider registry — maps a provider name to the factory that builds it.
//!
//! The daemon builds one registry at startup and resolves every space's
//! `provider` option against it exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use fleet_core::SpaceConfig;

use crate::adapter::Provider;
use crate::error::{ProviderError, ProviderResult};
use crate::simulated::{SimulatedOptions, SimulatedProvider};

/// Builds the provider of one space from its configuration.
pub type ProviderFactory =
    Arc<dyn Fn(&SpaceConfig) -> ProviderResult<Arc<dyn Provider>> + Send + Sync>;

/// Provider name → factory.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every provider shipped with FleetGrid.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            SimulatedProvider::KIND,
            Arc::new(|space: &SpaceConfig| {
                let options = SimulatedOptions::from_options(&space.provider_options)?;
                let provider: Arc<dyn Provider> = Arc::new(SimulatedProvider::new(options));
                Ok(provider)
            }),
        );
        registry
    }

    /// Register (or replace) a factory.
    pub fn register(&mut self, name: &str, factory: ProviderFactory) {
        debug!(provider = %name, "provider registered");
        self.factories.insert(name.to_string(), factory);
    }

    /// Build the provider named by a space's configuration.
    pub fn build(&self, space: &SpaceConfig) -> ProviderResult<Arc<dyn Provider>> {
        let factory = self
            .factories
            .get(&space.provider)
            .ok_or_else(|| ProviderError::UnknownProvider(space.provider.clone()))?;
        factory(space)
    }
}
