use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use ota_cache::CacheConfig;
use ota_entity::EntityStoreConfig;

/// Configuration of one service instance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub entity: EntityStoreConfig,
    pub cache: CacheConfig,
}

impl ServiceConfig {
    /// Read `path` as TOML, or return the defaults when no path is given.
    ///
    /// The `[entity]` section is validated after parsing.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config
            .entity
            .validate()
            .with_context(|| format!("invalid [entity] section in {}", path.display()))?;
        Ok(config)
    }
}
