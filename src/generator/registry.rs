//! Generator registry
//!
//! Generators are registered explicitly by name instead of living in global
//! state. [`GeneratorRegistry::with_builtins`] registers the four shipped
//! backends; callers may register further generators under their own names.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::{Backend, H2Generator, HanaGenerator, PostgresGenerator, SqliteGenerator, TriggerGenerator};
use crate::config::TrackingConfig;
use crate::error::{ChangelogError, ChangelogResult};

#[derive(Default)]
pub struct GeneratorRegistry {
    generators: BTreeMap<String, Arc<dyn TriggerGenerator>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `sqlite`, `hana`, `h2` and `postgres`
    pub fn with_builtins(config: &TrackingConfig) -> Self {
        let quoted = config.quoted_identifiers;
        let mut registry = Self::new();
        registry.register(Backend::Sqlite.name(), Arc::new(SqliteGenerator::new(quoted)));
        registry.register(Backend::Hana.name(), Arc::new(HanaGenerator::new(quoted)));
        registry.register(Backend::H2.name(), Arc::new(H2Generator::new(quoted)));
        registry.register(Backend::Postgres.name(), Arc::new(PostgresGenerator::new(quoted)));
        registry
    }

    /// Register (or replace) the generator for `name`
    pub fn register(&mut self, name: impl Into<String>, generator: Arc<dyn TriggerGenerator>) {
        let name = name.into().to_ascii_lowercase();
        debug!(backend = %name, "Registered trigger generator");
        self.generators.insert(name, generator);
    }

    /// Generator by name; built-in aliases such as `postgresql` resolve to their backend
    pub fn get(&self, name: &str) -> Option<Arc<dyn TriggerGenerator>> {
        let key = match name.parse::<Backend>() {
            Ok(backend) => backend.name().to_string(),
            Err(_) => name.to_ascii_lowercase(),
        };
        self.generators.get(&key).cloned()
    }

    pub fn require(&self, name: &str) -> ChangelogResult<Arc<dyn TriggerGenerator>> {
        self.get(name).ok_or_else(|| ChangelogError::UnsupportedBackend {
            backend: name.to_string(),
            registered: self.names().join(", "),
        })
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<&str> {
        self.generators.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }
}
