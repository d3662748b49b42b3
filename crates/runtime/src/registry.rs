use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::plugin::{Plugin, StepDefinition};

struct RegisteredPlugin {
    plugin: Arc<dyn Plugin>,
    steps: BTreeMap<String, StepDefinition>,
}

/// Process-wide mapping from plugin name to plugin.
///
/// Populated at startup and then frozen behind an `Arc`; lookups need no
/// synchronisation.
pub struct PluginRegistry {
    plugins: HashMap<String, RegisteredPlugin>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    /// Register a plugin and capture its step table. Returns error if the
    /// name is empty or already registered.
    pub fn register(&mut self, plugin: impl Plugin + 'static) -> Result<(), RegistryError> {
        let name = plugin.name().to_string();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.plugins.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        let steps = plugin.steps();
        if steps.keys().any(|a| a.is_empty()) {
            return Err(RegistryError::EmptyAction(name));
        }
        tracing::debug!(plugin = %name, actions = steps.len(), "registered plugin");
        self.plugins.insert(
            name,
            RegisteredPlugin {
                plugin: Arc::new(plugin),
                steps,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(name).map(|p| Arc::clone(&p.plugin))
    }

    /// Definition of `action` within `plugin`, if both exist.
    pub fn definition(&self, plugin: &str, action: &str) -> Option<&StepDefinition> {
        self.plugins.get(plugin).and_then(|p| p.steps.get(action))
    }

    pub fn has_action(&self, plugin: &str, action: &str) -> bool {
        self.definition(plugin, action).is_some()
    }

    pub fn steps(&self, plugin: &str) -> Option<&BTreeMap<String, StepDefinition>> {
        self.plugins.get(plugin).map(|p| &p.steps)
    }

    /// Registered plugin names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Plugin with name '{0}' is already registered")]
    DuplicateName(String),
    #[error("Plugin name must not be empty")]
    EmptyName,
    #[error("Plugin '{0}' declares an action with an empty name")]
    EmptyAction(String),
}
