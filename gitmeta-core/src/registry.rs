use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::plugin::Plugin;

/// Name-keyed plugin registry, populated once during startup and read-only
/// afterwards. Registration happens through an explicit `register_all`-style
/// entry point in the binary rather than static initializers, so the full
/// set is visible in one place before the manager is constructed.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under `name`. Re-registration overwrites.
    pub fn register(&mut self, name: &str, plugin: Arc<dyn Plugin>) {
        if self.plugins.insert(name.to_string(), plugin).is_some() {
            warn!(plugin = name, "plugin re-registered, previous entry replaced");
        } else {
            info!(plugin = name, "plugin registered");
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Plugin>> {
        self.plugins.get(name)
    }

    /// Registered names in sorted order, so iteration downstream is
    /// deterministic.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
