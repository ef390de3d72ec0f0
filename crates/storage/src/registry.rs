//! Registry of configured storage locations.

use crate::backends::filesystem::FilesystemLocation;
use crate::error::{StorageError, StorageResult};
use crate::traits::StorageLocation;
use std::collections::BTreeMap;
use std::sync::Arc;
use strata_core::StorageTier;
use strata_core::config::LocationConfig;

/// A registered location: its tier, and a backend when bytes can be handled there.
#[derive(Clone)]
struct Registered {
    tier: StorageTier,
    backend: Option<Arc<dyn StorageLocation>>,
}

/// Storage locations known to the engine, by name.
///
/// OFFLINE locations are registered without a backend: references may point at
/// them, but no bytes are ever written, deleted or restored there.
#[derive(Clone, Default)]
pub struct LocationRegistry {
    locations: BTreeMap<String, Registered>,
}

impl LocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from configuration.
    pub async fn from_config(configs: &[LocationConfig]) -> StorageResult<Self> {
        let mut registry = Self::new();
        for config in configs {
            config.validate().map_err(StorageError::Config)?;
            if registry.contains(&config.name) {
                return Err(StorageError::Config(format!(
                    "duplicate location name '{}'",
                    config.name
                )));
            }
            match (&config.path, config.tier.is_physical()) {
                (Some(path), true) => {
                    let location = FilesystemLocation::new(
                        &config.name,
                        config.tier,
                        path,
                        config.verify_checksums,
                    )
                    .await?;
                    registry.register(Arc::new(location));
                }
                _ => registry.register_offline(&config.name),
            }
            tracing::info!(location = %config.name, tier = %config.tier, "storage location registered");
        }
        Ok(registry)
    }

    /// Register a location with a backend, replacing any previous one of the same name.
    pub fn register(&mut self, location: Arc<dyn StorageLocation>) {
        self.locations.insert(
            location.name().to_string(),
            Registered {
                tier: location.tier(),
                backend: Some(location),
            },
        );
    }

    /// Register a reference-only OFFLINE location.
    pub fn register_offline(&mut self, name: &str) {
        self.locations.insert(
            name.to_string(),
            Registered {
                tier: StorageTier::Offline,
                backend: None,
            },
        );
    }

    /// Whether a location of this name is configured.
    pub fn contains(&self, name: &str) -> bool {
        self.locations.contains_key(name)
    }

    /// Tier of a configured location.
    pub fn tier_of(&self, name: &str) -> Option<StorageTier> {
        self.locations.get(name).map(|r| r.tier)
    }

    /// Backend of a location that holds bytes.
    pub fn get(&self, name: &str) -> Option<Arc<dyn StorageLocation>> {
        self.locations.get(name).and_then(|r| r.backend.clone())
    }

    /// Backend of a location that holds bytes, or `UnknownLocation`.
    pub fn require(&self, name: &str) -> StorageResult<Arc<dyn StorageLocation>> {
        self.get(name)
            .ok_or_else(|| StorageError::UnknownLocation(name.to_string()))
    }

    /// Configured location names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.locations.keys().cloned().collect()
    }

    /// Check every location that has a backend.
    pub async fn health_check(&self) -> StorageResult<()> {
        for registered in self.locations.values() {
            if let Some(backend) = &registered.backend {
                backend.health_check().await?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for LocationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.locations.iter().map(|(name, r)| (name, r.tier)))
            .finish()
    }
}
