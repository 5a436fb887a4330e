use thiserror::Error;

use crate::manifest::PluginPermission;

#[derive(Debug, Error)]
/// Enumerates supported `PluginRuntimeError` values.
pub enum PluginRuntimeError {
    #[error("invalid manifest: {0}")]
    Validation(String),
    #[error("plugin '{plugin_id}' is already installed")]
    Duplicate { plugin_id: String },
    #[error("plugin '{plugin_id}' is not installed")]
    NotFound { plugin_id: String },
    #[error("permission denied for plugin '{plugin_id}': requires {permission}")]
    PermissionDenied {
        plugin_id: String,
        permission: PluginPermission,
    },
    #[error("a lifecycle operation is already in flight for plugin '{plugin_id}'")]
    LifecycleConflict { plugin_id: String },
    #[error("capability gate for plugin '{plugin_id}' has been revoked")]
    GateRevoked { plugin_id: String },
    #[error("activation of plugin '{plugin_id}' failed: {message}")]
    Activation { plugin_id: String, message: String },
    #[error("capability call failed for plugin '{plugin_id}': {message}")]
    Capability { plugin_id: String, message: String },
    #[error("storage error: {0}")]
    Storage(String),
    #[error("catalog refresh failed: {0}")]
    Catalog(String),
}

pub type Result<T> = std::result::Result<T, PluginRuntimeError>;
