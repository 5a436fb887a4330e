use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::capability::{CapabilityGate, ChatBridge, NullChatBridge, NullSystemBridge, SystemBridge};
use crate::catalog::CatalogCache;
use crate::clock::unix_timestamp_ms;
use crate::error::{PluginRuntimeError, Result};
use crate::hooks::{HookDispatcher, HookHandler, NoopHookHandler};
use crate::manifest::{default_config_from_schema, validate_manifest, PluginManifest};
use crate::storage::KeyValueStore;

const PLUGIN_REGISTRY_STORE_KEY: &str = "nexus_plugin_registry";
const PLUGIN_REGISTRY_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
/// Enumerates supported `PluginStatus` values.
///
/// `Updating` and `Uninstalling` are the observable forms of a transition in
/// progress; the per-id in-flight guard is what enforces exclusivity.
pub enum PluginStatus {
    Installed,
    Active,
    Inactive,
    Error,
    Updating,
    Uninstalling,
}

impl PluginStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Error => "error",
            Self::Updating => "updating",
            Self::Uninstalling => "uninstalling",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `PluginInstance`: the mutable installed record for one plugin.
pub struct PluginInstance {
    pub manifest: PluginManifest,
    pub status: PluginStatus,
    pub config: BTreeMap<String, Value>,
    pub installed_at_unix_ms: u64,
    pub updated_at_unix_ms: u64,
    pub size_bytes: u64,
    #[serde(default)]
    pub last_error: Option<String>,
}

#[async_trait]
/// Trait contract for `PluginLoader` behavior.
///
/// Loads the plugin-side hook handler during activation. A loader failure is
/// what moves an instance to the `error` state.
pub trait PluginLoader: Send + Sync {
    async fn load(
        &self,
        manifest: &PluginManifest,
        config: &BTreeMap<String, Value>,
    ) -> anyhow::Result<Arc<dyn HookHandler>>;
}

/// Loader for hosts without a plugin code path wired in; every activation
/// yields the acknowledging no-op handler.
pub struct NoopPluginLoader;

#[async_trait]
impl PluginLoader for NoopPluginLoader {
    async fn load(
        &self,
        _manifest: &PluginManifest,
        _config: &BTreeMap<String, Value>,
    ) -> anyhow::Result<Arc<dyn HookHandler>> {
        Ok(Arc::new(NoopHookHandler))
    }
}

/// Public struct `PluginRegistryConfig` wiring the registry's collaborators.
pub struct PluginRegistryConfig {
    pub store: Arc<dyn KeyValueStore>,
    pub loader: Arc<dyn PluginLoader>,
    pub chat: Arc<dyn ChatBridge>,
    pub system: Arc<dyn SystemBridge>,
}

impl PluginRegistryConfig {
    /// Config with null chat/system bridges and the no-op loader.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            loader: Arc::new(NoopPluginLoader),
            chat: Arc::new(NullChatBridge),
            system: Arc::new(NullSystemBridge),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PluginRegistryRecord {
    schema_version: u32,
    plugins: Vec<PluginInstance>,
    active_ids: Vec<String>,
}

#[derive(Default)]
struct RegistryState {
    plugins: BTreeMap<String, PluginInstance>,
    gates: HashMap<String, Arc<CapabilityGate>>,
    in_flight: HashSet<String>,
}

/// Single source of truth for installed plugins and their lifecycle states.
///
/// Constructed once at host startup and shared by reference; no other
/// component mutates instance state. Lifecycle operations for one plugin id
/// are exclusive: a second call while one is in flight fails with
/// `LifecycleConflict`. Operations on distinct ids interleave freely.
pub struct PluginRegistry {
    store: Arc<dyn KeyValueStore>,
    loader: Arc<dyn PluginLoader>,
    chat: Arc<dyn ChatBridge>,
    system: Arc<dyn SystemBridge>,
    dispatcher: Arc<HookDispatcher>,
    state: Mutex<RegistryState>,
}

impl PluginRegistry {
    pub fn new(config: PluginRegistryConfig) -> Self {
        Self {
            store: config.store,
            loader: config.loader,
            chat: config.chat,
            system: config.system,
            dispatcher: Arc::new(HookDispatcher::new()),
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Restores the persisted registry record and brings previously active
    /// plugins back online through the loader. A plugin whose handler fails
    /// to load lands in the `error` state instead of failing the restore.
    pub async fn restore(config: PluginRegistryConfig) -> Result<Self> {
        let registry = Self::new(config);
        let Some(raw) = registry.store.get(PLUGIN_REGISTRY_STORE_KEY).await? else {
            return Ok(registry);
        };
        let record: PluginRegistryRecord = serde_json::from_value(raw)
            .map_err(|error| PluginRuntimeError::Storage(format!("registry record: {error}")))?;
        if record.schema_version != PLUGIN_REGISTRY_SCHEMA_VERSION {
            return Err(PluginRuntimeError::Storage(format!(
                "unsupported registry record schema version {}",
                record.schema_version
            )));
        }
        {
            let mut state = registry.state.lock().await;
            for instance in record.plugins {
                state.plugins.insert(instance.manifest.id.clone(), instance);
            }
        }
        // bring_online persists on both its success and failure paths, so the
        // stored record already reflects any plugin that landed in error.
        for plugin_id in &record.active_ids {
            if let Err(error) = registry.bring_online(plugin_id).await {
                tracing::warn!(
                    plugin_id = plugin_id.as_str(),
                    error = %error,
                    "failed to reactivate plugin on restore"
                );
            }
        }
        Ok(registry)
    }

    pub fn dispatcher(&self) -> Arc<HookDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Installs a validated manifest as a fresh instance in `installed` state
    /// with schema-derived default config. Rejects duplicates; a failed
    /// install leaves no partial instance behind.
    pub async fn install(&self, manifest: PluginManifest) -> Result<String> {
        let plugin_id = manifest.id.clone();
        self.begin(&plugin_id).await?;
        let result = self.install_inner(manifest).await;
        self.finish(&plugin_id).await;
        result
    }

    async fn install_inner(&self, manifest: PluginManifest) -> Result<String> {
        validate_manifest(&manifest)?;
        let plugin_id = manifest.id.clone();
        let now = unix_timestamp_ms();
        let instance = PluginInstance {
            config: default_config_from_schema(&manifest),
            size_bytes: manifest_size_bytes(&manifest),
            manifest,
            status: PluginStatus::Installed,
            installed_at_unix_ms: now,
            updated_at_unix_ms: now,
            last_error: None,
        };
        {
            let mut state = self.state.lock().await;
            if state.plugins.contains_key(&plugin_id) {
                return Err(PluginRuntimeError::Duplicate {
                    plugin_id: plugin_id.clone(),
                });
            }
            state.plugins.insert(plugin_id.clone(), instance);
            if let Err(error) = self.persist_locked(&state).await {
                state.plugins.remove(&plugin_id);
                return Err(error);
            }
        }
        tracing::debug!(plugin_id, "installed plugin");
        Ok(plugin_id)
    }

    /// Transitions `installed`/`inactive` to `active`: loads the hook
    /// handler, subscribes the manifest's hooks, and materializes the
    /// capability gate. On failure the instance lands in `error` with the
    /// message recorded. Reactivating an active plugin is a no-op.
    pub async fn activate(&self, plugin_id: &str) -> Result<()> {
        self.begin(plugin_id).await?;
        let result = self.activate_inner(plugin_id).await;
        self.finish(plugin_id).await;
        result
    }

    async fn activate_inner(&self, plugin_id: &str) -> Result<()> {
        {
            let state = self.state.lock().await;
            let instance = require_instance(&state, plugin_id)?;
            match instance.status {
                PluginStatus::Active => return Ok(()),
                PluginStatus::Installed | PluginStatus::Inactive => {}
                PluginStatus::Error => {
                    return Err(PluginRuntimeError::Validation(format!(
                        "plugin '{plugin_id}' is in error state; uninstall and reinstall it"
                    )));
                }
                PluginStatus::Updating | PluginStatus::Uninstalling => {
                    return Err(PluginRuntimeError::LifecycleConflict {
                        plugin_id: plugin_id.to_string(),
                    });
                }
            }
        }
        self.bring_online(plugin_id).await
    }

    /// Loader + hook subscription + gate materialization, shared by activate
    /// and restore. Assumes the per-id guard is held or concurrency is not
    /// yet possible (startup).
    async fn bring_online(&self, plugin_id: &str) -> Result<()> {
        let (manifest, config) = {
            let state = self.state.lock().await;
            let instance = require_instance(&state, plugin_id)?;
            (instance.manifest.clone(), instance.config.clone())
        };

        let handler = match self.loader.load(&manifest, &config).await {
            Ok(handler) => handler,
            Err(error) => {
                return self
                    .fail_activation(plugin_id, &error.to_string())
                    .await;
            }
        };

        for hook in &manifest.hooks {
            if let Err(error) = self
                .dispatcher
                .subscribe(plugin_id, *hook, Arc::clone(&handler))
                .await
            {
                self.dispatcher.unsubscribe_all(plugin_id).await;
                return self.fail_activation(plugin_id, &error.to_string()).await;
            }
        }

        let gate = Arc::new(CapabilityGate::new(
            &manifest,
            Arc::clone(&self.store),
            Arc::clone(&self.chat),
            Arc::clone(&self.system),
        ));
        {
            let mut state = self.state.lock().await;
            state.gates.insert(plugin_id.to_string(), gate);
            if let Some(instance) = state.plugins.get_mut(plugin_id) {
                instance.status = PluginStatus::Active;
                instance.last_error = None;
            }
            self.persist_locked(&state).await?;
        }
        tracing::debug!(plugin_id, "activated plugin");
        Ok(())
    }

    async fn fail_activation(&self, plugin_id: &str, message: &str) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if let Some(instance) = state.plugins.get_mut(plugin_id) {
                instance.status = PluginStatus::Error;
                instance.last_error = Some(message.to_string());
            }
            // The activation cause is the error the caller needs; a persist
            // failure here is logged, not returned.
            if let Err(error) = self.persist_locked(&state).await {
                tracing::warn!(
                    plugin_id,
                    error = %error,
                    "failed to persist error state after activation failure"
                );
            }
        }
        tracing::warn!(plugin_id, error = message, "plugin activation failed");
        Err(PluginRuntimeError::Activation {
            plugin_id: plugin_id.to_string(),
            message: message.to_string(),
        })
    }

    /// Transitions `active` to `inactive`: revokes the gate synchronously and
    /// removes every hook subscription, keeping the instance and its config.
    /// Deactivating a plugin that is not active is a no-op.
    pub async fn deactivate(&self, plugin_id: &str) -> Result<()> {
        self.begin(plugin_id).await?;
        let result = self.deactivate_inner(plugin_id).await;
        self.finish(plugin_id).await;
        result
    }

    async fn deactivate_inner(&self, plugin_id: &str) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            let instance = require_instance(&state, plugin_id)?;
            if instance.status != PluginStatus::Active {
                return Ok(());
            }
            if let Some(gate) = state.gates.remove(plugin_id) {
                gate.revoke();
            }
        }
        self.dispatcher.unsubscribe_all(plugin_id).await;
        {
            let mut state = self.state.lock().await;
            if let Some(instance) = state.plugins.get_mut(plugin_id) {
                instance.status = PluginStatus::Inactive;
            }
            self.persist_locked(&state).await?;
        }
        tracing::debug!(plugin_id, "deactivated plugin");
        Ok(())
    }

    /// Removes the instance entirely regardless of current state, revoking
    /// its gate and hook subscriptions first. Idempotent: an absent id is a
    /// no-op.
    pub async fn uninstall(&self, plugin_id: &str) -> Result<()> {
        self.begin(plugin_id).await?;
        let result = self.uninstall_inner(plugin_id).await;
        self.finish(plugin_id).await;
        result
    }

    async fn uninstall_inner(&self, plugin_id: &str) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if !state.plugins.contains_key(plugin_id) {
                return Ok(());
            }
            if let Some(instance) = state.plugins.get_mut(plugin_id) {
                instance.status = PluginStatus::Uninstalling;
            }
            if let Some(gate) = state.gates.remove(plugin_id) {
                gate.revoke();
            }
        }
        self.dispatcher.unsubscribe_all(plugin_id).await;
        {
            let mut state = self.state.lock().await;
            state.plugins.remove(plugin_id);
            self.persist_locked(&state).await?;
        }
        tracing::debug!(plugin_id, "uninstalled plugin");
        Ok(())
    }

    /// Replaces the manifest in place, preserving status and config and
    /// bumping the update time. Deliberately does not diff newly declared
    /// permissions against previously granted ones; an active plugin keeps
    /// its existing gate until the next activation.
    pub async fn update_manifest(&self, plugin_id: &str, manifest: PluginManifest) -> Result<()> {
        self.begin(plugin_id).await?;
        let result = self.update_manifest_inner(plugin_id, manifest).await;
        self.finish(plugin_id).await;
        result
    }

    async fn update_manifest_inner(
        &self,
        plugin_id: &str,
        manifest: PluginManifest,
    ) -> Result<()> {
        validate_manifest(&manifest)?;
        if manifest.id != plugin_id {
            return Err(PluginRuntimeError::Validation(format!(
                "replacement manifest id '{}' does not match plugin '{plugin_id}'",
                manifest.id
            )));
        }
        let prior_status = {
            let mut state = self.state.lock().await;
            let instance = require_instance(&state, plugin_id)?;
            let prior = instance.status;
            if let Some(instance) = state.plugins.get_mut(plugin_id) {
                instance.status = PluginStatus::Updating;
            }
            // Durable mid-transition marker, matching the registry's visible
            // "updating" status while the replacement is applied.
            self.persist_locked(&state).await?;
            prior
        };
        {
            let mut state = self.state.lock().await;
            if let Some(instance) = state.plugins.get_mut(plugin_id) {
                instance.size_bytes = manifest_size_bytes(&manifest);
                instance.manifest = manifest;
                instance.updated_at_unix_ms = unix_timestamp_ms();
                instance.status = prior_status;
            }
            self.persist_locked(&state).await?;
        }
        tracing::debug!(plugin_id, "updated plugin manifest");
        Ok(())
    }

    /// Merges `partial` into the instance's config map. The merge is not
    /// validated against the manifest's schema; the host settings surface is
    /// trusted to send well-formed values.
    pub async fn set_config(
        &self,
        plugin_id: &str,
        partial: BTreeMap<String, Value>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        require_instance(&state, plugin_id)?;
        if let Some(instance) = state.plugins.get_mut(plugin_id) {
            instance.config.extend(partial);
        }
        self.persist_locked(&state).await
    }

    /// Pure comparison of the installed version against the catalog's version
    /// for the same id. Absent catalog entry means no update.
    pub async fn check_update_available(
        &self,
        plugin_id: &str,
        catalog: &CatalogCache,
    ) -> Result<bool> {
        let installed_version = {
            let state = self.state.lock().await;
            require_instance(&state, plugin_id)?.manifest.version.clone()
        };
        Ok(match catalog.version_of(plugin_id).await {
            Some(catalog_version) => catalog_version != installed_version,
            None => false,
        })
    }

    pub async fn plugin(&self, plugin_id: &str) -> Option<PluginInstance> {
        self.state.lock().await.plugins.get(plugin_id).cloned()
    }

    pub async fn plugins(&self) -> Vec<PluginInstance> {
        self.state.lock().await.plugins.values().cloned().collect()
    }

    pub async fn installed_ids(&self) -> HashSet<String> {
        self.state.lock().await.plugins.keys().cloned().collect()
    }

    pub async fn active_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .plugins
            .values()
            .filter(|instance| instance.status == PluginStatus::Active)
            .map(|instance| instance.manifest.id.clone())
            .collect()
    }

    /// The capability gate for `plugin_id`, present iff the instance is
    /// active.
    pub async fn gate(&self, plugin_id: &str) -> Option<Arc<CapabilityGate>> {
        self.state.lock().await.gates.get(plugin_id).cloned()
    }

    async fn begin(&self, plugin_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.in_flight.insert(plugin_id.to_string()) {
            return Err(PluginRuntimeError::LifecycleConflict {
                plugin_id: plugin_id.to_string(),
            });
        }
        Ok(())
    }

    async fn finish(&self, plugin_id: &str) {
        self.state.lock().await.in_flight.remove(plugin_id);
    }

    async fn persist_locked(&self, state: &RegistryState) -> Result<()> {
        let record = PluginRegistryRecord {
            schema_version: PLUGIN_REGISTRY_SCHEMA_VERSION,
            plugins: state.plugins.values().cloned().collect(),
            active_ids: state
                .plugins
                .values()
                .filter(|instance| instance.status == PluginStatus::Active)
                .map(|instance| instance.manifest.id.clone())
                .collect(),
        };
        let raw = serde_json::to_value(&record)
            .map_err(|error| PluginRuntimeError::Storage(error.to_string()))?;
        self.store.set(PLUGIN_REGISTRY_STORE_KEY, raw).await
    }
}

fn require_instance<'state>(
    state: &'state RegistryState,
    plugin_id: &str,
) -> Result<&'state PluginInstance> {
    state
        .plugins
        .get(plugin_id)
        .ok_or_else(|| PluginRuntimeError::NotFound {
            plugin_id: plugin_id.to_string(),
        })
}

fn manifest_size_bytes(manifest: &PluginManifest) -> u64 {
    serde_json::to_string(manifest)
        .map(|raw| raw.len() as u64)
        .unwrap_or_default()
}
