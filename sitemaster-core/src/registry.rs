//! Active plugins and their install/update bookkeeping.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{info, warn};

use crate::error::{LifecycleError, StoreError};
use crate::marks::{Mark, MarkCatalog};
use crate::plugin::MetricPlugin;

pub type SharedPlugin = Arc<dyn MetricPlugin>;

/// Ordered set of active plugins.
///
/// Readers take a snapshot; a concurrent `register` publishes a new list
/// instead of editing the one a running pass is iterating.
pub struct PluginRegistry {
    plugins: RwLock<Arc<[SharedPlugin]>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: RwLock::new(Arc::from(Vec::new())),
        }
    }

    pub fn with_plugins(plugins: impl IntoIterator<Item = SharedPlugin>) -> Self {
        let registry = Self::new();
        for plugin in plugins {
            registry.register(plugin);
        }
        registry
    }

    /// Append a plugin, or replace the one with the same name in place.
    pub fn register(&self, plugin: SharedPlugin) {
        let mut guard = self.plugins.write().unwrap_or_else(PoisonError::into_inner);
        let mut next: Vec<SharedPlugin> = guard.iter().cloned().collect();

        match next.iter().position(|p| p.name() == plugin.name()) {
            Some(idx) => next[idx] = plugin,
            None => next.push(plugin),
        }

        *guard = Arc::from(next);
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut guard = self.plugins.write().unwrap_or_else(PoisonError::into_inner);
        if !guard.iter().any(|p| p.name() == name) {
            return false;
        }

        let next: Vec<SharedPlugin> = guard.iter().filter(|p| p.name() != name).cloned().collect();
        *guard = Arc::from(next);
        true
    }

    pub fn active_plugins(&self) -> Arc<[SharedPlugin]> {
        self.plugins.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get(&self, name: &str) -> Option<SharedPlugin> {
        self.active_plugins().iter().find(|p| p.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.active_plugins().iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.active_plugins().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Persisted name -> installed version table.
pub trait VersionStore: Send + Sync {
    fn installed_versions(&self) -> Result<HashMap<String, u64>, StoreError>;
    fn set_installed_versions(&self, versions: &HashMap<String, u64>) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct InMemoryVersionStore {
    versions: RwLock<HashMap<String, u64>>,
}

impl InMemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VersionStore for InMemoryVersionStore {
    fn installed_versions(&self) -> Result<HashMap<String, u64>, StoreError> {
        Ok(self.versions.read().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn set_installed_versions(&self, versions: &HashMap<String, u64>) -> Result<(), StoreError> {
        *self.versions.write().unwrap_or_else(PoisonError::into_inner) = versions.clone();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAction {
    Install,
    Update { from: u64 },
    UpToDate,
}

/// Owns plugin lifecycle state: which plugins exist, which versions are
/// installed, and the mark catalog they register into.
pub struct PluginManager {
    registry: Arc<PluginRegistry>,
    versions: Arc<dyn VersionStore>,
    catalog: Arc<dyn MarkCatalog>,
    // Serializes read-modify-write cycles on the version table.
    lifecycle_lock: Mutex<()>,
}

impl PluginManager {
    pub fn new(
        registry: Arc<PluginRegistry>,
        versions: Arc<dyn VersionStore>,
        catalog: Arc<dyn MarkCatalog>,
    ) -> Self {
        Self {
            registry,
            versions,
            catalog,
            lifecycle_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn active_plugins(&self) -> Arc<[SharedPlugin]> {
        self.registry.active_plugins()
    }

    pub fn mark(&self, machine_name: &str) -> Result<Mark, StoreError> {
        self.catalog.mark(machine_name)
    }

    pub fn installed_version(&self, plugin: &dyn MetricPlugin) -> Result<Option<u64>, StoreError> {
        Ok(self.versions.installed_versions()?.get(plugin.name()).copied())
    }

    pub fn is_installed(&self, plugin: &dyn MetricPlugin) -> Result<bool, StoreError> {
        Ok(self.installed_version(plugin)?.is_some())
    }

    pub fn update_action(&self, plugin: &dyn MetricPlugin) -> Result<UpdateAction, StoreError> {
        Ok(match self.installed_version(plugin)? {
            None => UpdateAction::Install,
            Some(installed) if installed < plugin.version() => UpdateAction::Update { from: installed },
            Some(_) => UpdateAction::UpToDate,
        })
    }

    pub fn install(&self, plugin: &dyn MetricPlugin) -> Result<bool, LifecycleError> {
        let _guard = self.lifecycle_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut versions = self.versions.installed_versions()?;

        if versions.contains_key(plugin.name()) {
            return Ok(false);
        }
        if !plugin.on_install()? {
            warn!("Plugin {} declined install", plugin.name());
            return Ok(false);
        }

        self.define_marks(plugin)?;
        versions.insert(plugin.name().to_string(), plugin.version());
        self.versions.set_installed_versions(&versions)?;

        info!("Installed plugin {} (version {})", plugin.name(), plugin.version());
        Ok(true)
    }

    pub fn update(&self, plugin: &dyn MetricPlugin) -> Result<bool, LifecycleError> {
        let _guard = self.lifecycle_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut versions = self.versions.installed_versions()?;

        let Some(&installed) = versions.get(plugin.name()) else {
            return Ok(false);
        };
        if installed >= plugin.version() {
            return Ok(false);
        }
        if !plugin.on_update(installed)? {
            warn!("Plugin {} declined update from {}", plugin.name(), installed);
            return Ok(false);
        }

        self.define_marks(plugin)?;
        versions.insert(plugin.name().to_string(), plugin.version());
        self.versions.set_installed_versions(&versions)?;

        info!(
            "Updated plugin {} from {} to {}",
            plugin.name(),
            installed,
            plugin.version()
        );
        Ok(true)
    }

    pub fn uninstall(&self, plugin: &dyn MetricPlugin) -> Result<bool, LifecycleError> {
        let _guard = self.lifecycle_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut versions = self.versions.installed_versions()?;

        if !versions.contains_key(plugin.name()) {
            return Ok(false);
        }
        if !plugin.on_uninstall()? {
            warn!("Plugin {} declined uninstall", plugin.name());
            return Ok(false);
        }

        versions.remove(plugin.name());
        self.versions.set_installed_versions(&versions)?;

        info!("Uninstalled plugin {}", plugin.name());
        Ok(true)
    }

    /// Install or update as needed. `Ok(false)` when nothing changed.
    pub fn perform_update(&self, plugin: &dyn MetricPlugin) -> Result<bool, LifecycleError> {
        let action = self.update_action(plugin)?;
        self.apply(plugin, action)
    }

    /// Bring every registered plugin up to date, in registration order.
    /// Each entry carries the action attempted and whether it took effect.
    pub fn perform_all_updates(&self) -> Vec<(String, Result<(UpdateAction, bool), LifecycleError>)> {
        self.active_plugins()
            .iter()
            .map(|plugin| {
                let plugin = plugin.as_ref();
                let result = self
                    .update_action(plugin)
                    .map_err(LifecycleError::from)
                    .and_then(|action| Ok((action, self.apply(plugin, action)?)));
                (plugin.name().to_string(), result)
            })
            .collect()
    }

    fn apply(&self, plugin: &dyn MetricPlugin, action: UpdateAction) -> Result<bool, LifecycleError> {
        match action {
            UpdateAction::Install => self.install(plugin),
            UpdateAction::Update { .. } => self.update(plugin),
            UpdateAction::UpToDate => Ok(false),
        }
    }

    fn define_marks(&self, plugin: &dyn MetricPlugin) -> Result<(), StoreError> {
        for definition in plugin.marks() {
            self.catalog.define(&definition)?;
        }
        Ok(())
    }
}
