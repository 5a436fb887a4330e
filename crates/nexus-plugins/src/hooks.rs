use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::clock::unix_timestamp_ms;
use crate::error::{PluginRuntimeError, Result};
use crate::manifest::PluginHook;

#[derive(Debug, Clone, PartialEq)]
/// Public struct `HookEvent`: the envelope passed to every subscriber.
pub struct HookEvent {
    pub hook: PluginHook,
    pub payload: Value,
    pub timestamp_unix_ms: u64,
}

#[async_trait]
/// Trait contract for `HookHandler` behavior.
///
/// Implemented by plugin-side code loaded at activation. A failed handler is
/// captured per subscriber; it never aborts dispatch for the others.
pub trait HookHandler: Send + Sync {
    async fn handle(&self, event: &HookEvent) -> anyhow::Result<Value>;
}

#[derive(Debug, Clone, PartialEq)]
/// Enumerates supported `HookOutcome` values.
pub enum HookOutcome {
    Completed(Value),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
/// Public struct `HookDispatchRecord`: one subscriber's result for one event.
pub struct HookDispatchRecord {
    pub plugin_id: String,
    pub outcome: HookOutcome,
}

struct HookSubscription {
    plugin_id: String,
    hook: PluginHook,
    handler: Arc<dyn HookHandler>,
}

#[derive(Default)]
/// Routes named events to every active subscriber in subscription order.
///
/// Order is insertion order and carries no priority meaning; subscribers must
/// not rely on it for correctness.
pub struct HookDispatcher {
    subscriptions: Mutex<Vec<HookSubscription>>,
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one handler for one (plugin id, hook) pair. Registering the
    /// same pair twice is a validation failure; activation derives exactly one
    /// subscription per manifest hook.
    pub async fn subscribe(
        &self,
        plugin_id: &str,
        hook: PluginHook,
        handler: Arc<dyn HookHandler>,
    ) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock().await;
        let duplicate = subscriptions
            .iter()
            .any(|entry| entry.plugin_id == plugin_id && entry.hook == hook);
        if duplicate {
            return Err(PluginRuntimeError::Validation(format!(
                "plugin '{plugin_id}' is already subscribed to hook '{hook}'"
            )));
        }
        subscriptions.push(HookSubscription {
            plugin_id: plugin_id.to_string(),
            hook,
            handler,
        });
        Ok(())
    }

    /// Removes every subscription for `plugin_id`; returns how many were
    /// dropped. Called on deactivate and uninstall so a torn-down plugin can
    /// never observe further events.
    pub async fn unsubscribe_all(&self, plugin_id: &str) -> usize {
        let mut subscriptions = self.subscriptions.lock().await;
        let before = subscriptions.len();
        subscriptions.retain(|entry| entry.plugin_id != plugin_id);
        before - subscriptions.len()
    }

    pub async fn subscriber_ids(&self, hook: PluginHook) -> Vec<String> {
        self.subscriptions
            .lock()
            .await
            .iter()
            .filter(|entry| entry.hook == hook)
            .map(|entry| entry.plugin_id.clone())
            .collect()
    }

    pub async fn has_subscriptions(&self, plugin_id: &str) -> bool {
        self.subscriptions
            .lock()
            .await
            .iter()
            .any(|entry| entry.plugin_id == plugin_id)
    }

    /// Invokes every subscriber of `hook` sequentially and returns the full
    /// per-subscriber record set. Handlers run to completion; there is no
    /// dispatch deadline.
    pub async fn dispatch(&self, hook: PluginHook, payload: Value) -> Vec<HookDispatchRecord> {
        let event = HookEvent {
            hook,
            payload,
            timestamp_unix_ms: unix_timestamp_ms(),
        };
        // Snapshot under the lock, run handlers outside it: a handler may
        // itself dispatch or the registry may tear down concurrently.
        let subscribers: Vec<(String, Arc<dyn HookHandler>)> = self
            .subscriptions
            .lock()
            .await
            .iter()
            .filter(|entry| entry.hook == hook)
            .map(|entry| (entry.plugin_id.clone(), Arc::clone(&entry.handler)))
            .collect();

        let mut records = Vec::with_capacity(subscribers.len());
        let mut failed = 0usize;
        for (plugin_id, handler) in subscribers {
            let outcome = match handler.handle(&event).await {
                Ok(result) => HookOutcome::Completed(result),
                Err(error) => {
                    failed += 1;
                    HookOutcome::Failed(error.to_string())
                }
            };
            records.push(HookDispatchRecord { plugin_id, outcome });
        }
        tracing::debug!(
            hook = hook.as_str(),
            subscribers = records.len(),
            failed,
            "dispatched plugin hook"
        );
        records
    }
}

/// Handler used when no plugin loader is wired in: acknowledges the event and
/// returns null, mirroring a plugin with no registered behavior yet.
pub struct NoopHookHandler;

#[async_trait]
impl HookHandler for NoopHookHandler {
    async fn handle(&self, event: &HookEvent) -> anyhow::Result<Value> {
        tracing::debug!(hook = event.hook.as_str(), "noop hook handler invoked");
        Ok(Value::Null)
    }
}
