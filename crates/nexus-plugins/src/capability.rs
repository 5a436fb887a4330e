use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{PluginRuntimeError, Result};
use crate::manifest::{PluginManifest, PluginPermission};
use crate::storage::KeyValueStore;

/// Callback invoked for each chat message delivered to a subscribed plugin.
pub type MessageCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// One-shot transform applied to the next user input before send.
pub type InputTransform = Arc<dyn Fn(String) -> String + Send + Sync>;

#[async_trait]
/// Trait contract for `ChatBridge` behavior.
///
/// The chat surface is an external collaborator; the gate only enforces the
/// permission boundary in front of it.
pub trait ChatBridge: Send + Sync {
    async fn send_message(&self, plugin_id: &str, content: &str) -> anyhow::Result<()>;
    async fn register_receive_callback(
        &self,
        plugin_id: &str,
        callback: MessageCallback,
    ) -> anyhow::Result<()>;
    async fn register_input_transform(
        &self,
        plugin_id: &str,
        transform: InputTransform,
    ) -> anyhow::Result<()>;
}

#[async_trait]
/// Trait contract for `SystemBridge` behavior.
pub trait SystemBridge: Send + Sync {
    async fn clipboard_read(&self) -> anyhow::Result<String>;
    async fn clipboard_write(&self, text: &str) -> anyhow::Result<()>;
    async fn notify(&self, title: &str, body: Option<&str>) -> anyhow::Result<()>;
    async fn open_file(&self) -> anyhow::Result<Option<String>>;
    async fn save_file(
        &self,
        content: &str,
        default_name: Option<&str>,
    ) -> anyhow::Result<Option<String>>;
}

/// Chat bridge that accepts registrations and drops messages. Used when the
/// host has not wired a chat surface yet.
pub struct NullChatBridge;

#[async_trait]
impl ChatBridge for NullChatBridge {
    async fn send_message(&self, plugin_id: &str, _content: &str) -> anyhow::Result<()> {
        tracing::debug!(plugin_id, "chat bridge absent; message dropped");
        Ok(())
    }

    async fn register_receive_callback(
        &self,
        _plugin_id: &str,
        _callback: MessageCallback,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn register_input_transform(
        &self,
        _plugin_id: &str,
        _transform: InputTransform,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// System bridge with empty clipboard and no file pickers.
pub struct NullSystemBridge;

#[async_trait]
impl SystemBridge for NullSystemBridge {
    async fn clipboard_read(&self) -> anyhow::Result<String> {
        Ok(String::new())
    }

    async fn clipboard_write(&self, _text: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn notify(&self, title: &str, _body: Option<&str>) -> anyhow::Result<()> {
        tracing::debug!(title, "system bridge absent; notification dropped");
        Ok(())
    }

    async fn open_file(&self) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    async fn save_file(
        &self,
        _content: &str,
        _default_name: Option<&str>,
    ) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

/// The permission-checked call surface granted to one active plugin.
///
/// Every method checks the revocation flag, then membership of its required
/// permission token in the manifest-declared set, before performing any
/// effect. Storage keys are auto-prefixed so plugins cannot reach each
/// other's persisted data. The registry revokes the gate on deactivate and
/// uninstall; a captured reference fails every later call.
pub struct CapabilityGate {
    plugin_id: String,
    permissions: HashSet<PluginPermission>,
    store: Arc<dyn KeyValueStore>,
    chat: Arc<dyn ChatBridge>,
    system: Arc<dyn SystemBridge>,
    revoked: AtomicBool,
}

impl CapabilityGate {
    pub(crate) fn new(
        manifest: &PluginManifest,
        store: Arc<dyn KeyValueStore>,
        chat: Arc<dyn ChatBridge>,
        system: Arc<dyn SystemBridge>,
    ) -> Self {
        Self {
            plugin_id: manifest.id.clone(),
            permissions: manifest.permissions.iter().copied().collect(),
            store,
            chat,
            system,
            revoked: AtomicBool::new(false),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }

    pub(crate) fn revoke(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }

    fn ensure_callable(&self, permission: PluginPermission) -> Result<()> {
        if self.is_revoked() {
            return Err(PluginRuntimeError::GateRevoked {
                plugin_id: self.plugin_id.clone(),
            });
        }
        if !self.permissions.contains(&permission) {
            return Err(PluginRuntimeError::PermissionDenied {
                plugin_id: self.plugin_id.clone(),
                permission,
            });
        }
        Ok(())
    }

    fn scoped_key(&self, key: &str) -> String {
        format!("plugin_{}_{}", self.plugin_id, key)
    }

    fn capability_error(&self, error: anyhow::Error) -> PluginRuntimeError {
        PluginRuntimeError::Capability {
            plugin_id: self.plugin_id.clone(),
            message: error.to_string(),
        }
    }

    pub async fn storage_get(&self, key: &str) -> Result<Option<Value>> {
        self.ensure_callable(PluginPermission::StorageRead)?;
        self.store.get(&self.scoped_key(key)).await
    }

    pub async fn storage_set(&self, key: &str, value: Value) -> Result<()> {
        self.ensure_callable(PluginPermission::StorageWrite)?;
        self.store.set(&self.scoped_key(key), value).await
    }

    pub async fn storage_delete(&self, key: &str) -> Result<()> {
        self.ensure_callable(PluginPermission::StorageWrite)?;
        self.store.delete(&self.scoped_key(key)).await
    }

    pub async fn send_chat_message(&self, content: &str) -> Result<()> {
        self.ensure_callable(PluginPermission::ChatSendMessage)?;
        self.chat
            .send_message(&self.plugin_id, content)
            .await
            .map_err(|error| self.capability_error(error))
    }

    pub async fn on_chat_message(&self, callback: MessageCallback) -> Result<()> {
        self.ensure_callable(PluginPermission::ChatReceiveMessage)?;
        self.chat
            .register_receive_callback(&self.plugin_id, callback)
            .await
            .map_err(|error| self.capability_error(error))
    }

    pub async fn modify_next_input(&self, transform: InputTransform) -> Result<()> {
        self.ensure_callable(PluginPermission::ChatModifyInput)?;
        self.chat
            .register_input_transform(&self.plugin_id, transform)
            .await
            .map_err(|error| self.capability_error(error))
    }

    pub async fn clipboard_read(&self) -> Result<String> {
        self.ensure_callable(PluginPermission::SystemClipboard)?;
        self.system
            .clipboard_read()
            .await
            .map_err(|error| self.capability_error(error))
    }

    pub async fn clipboard_write(&self, text: &str) -> Result<()> {
        self.ensure_callable(PluginPermission::SystemClipboard)?;
        self.system
            .clipboard_write(text)
            .await
            .map_err(|error| self.capability_error(error))
    }

    pub async fn notify(&self, title: &str, body: Option<&str>) -> Result<()> {
        self.ensure_callable(PluginPermission::SystemNotification)?;
        self.system
            .notify(title, body)
            .await
            .map_err(|error| self.capability_error(error))
    }

    pub async fn open_file(&self) -> Result<Option<String>> {
        self.ensure_callable(PluginPermission::SystemFileSystem)?;
        self.system
            .open_file()
            .await
            .map_err(|error| self.capability_error(error))
    }

    pub async fn save_file(&self, content: &str, default_name: Option<&str>) -> Result<Option<String>> {
        self.ensure_callable(PluginPermission::SystemFileSystem)?;
        self.system
            .save_file(content, default_name)
            .await
            .map_err(|error| self.capability_error(error))
    }

    /// Model listing is not wired downstream; the permission check still
    /// applies before the empty result.
    pub async fn list_models(&self) -> Result<Vec<Value>> {
        self.ensure_callable(PluginPermission::ModelsAccess)?;
        Ok(Vec::new())
    }

    pub async fn invoke_model(&self, model_id: &str, _options: Value) -> Result<Value> {
        self.ensure_callable(PluginPermission::ModelsAccess)?;
        tracing::debug!(plugin_id = %self.plugin_id, model_id, "model bridge absent");
        Ok(Value::Null)
    }

    pub async fn list_tools(&self) -> Result<Vec<Value>> {
        self.ensure_callable(PluginPermission::McpUseTools)?;
        Ok(Vec::new())
    }

    pub async fn call_tool(&self, tool_name: &str, _arguments: Value) -> Result<Value> {
        self.ensure_callable(PluginPermission::McpUseTools)?;
        tracing::debug!(plugin_id = %self.plugin_id, tool_name, "tool bridge absent");
        Ok(Value::Null)
    }

    pub async fn search_knowledge(&self, _query: &str) -> Result<Vec<Value>> {
        self.ensure_callable(PluginPermission::RagAccessKnowledgeBase)?;
        Ok(Vec::new())
    }

    pub async fn list_knowledge_bases(&self) -> Result<Vec<Value>> {
        self.ensure_callable(PluginPermission::RagAccessKnowledgeBase)?;
        Ok(Vec::new())
    }
}
