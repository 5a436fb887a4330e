use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PluginRuntimeError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Enumerates supported `PluginPermission` values.
pub enum PluginPermission {
    #[serde(rename = "storage:read")]
    StorageRead,
    #[serde(rename = "storage:write")]
    StorageWrite,
    #[serde(rename = "network:fetch")]
    NetworkFetch,
    #[serde(rename = "chat:send-message")]
    ChatSendMessage,
    #[serde(rename = "chat:receive-message")]
    ChatReceiveMessage,
    #[serde(rename = "chat:modify-input")]
    ChatModifyInput,
    #[serde(rename = "models:access")]
    ModelsAccess,
    #[serde(rename = "system:clipboard")]
    SystemClipboard,
    #[serde(rename = "system:notification")]
    SystemNotification,
    #[serde(rename = "system:file-system")]
    SystemFileSystem,
    #[serde(rename = "mcp:use-tools")]
    McpUseTools,
    #[serde(rename = "rag:access-knowledge-base")]
    RagAccessKnowledgeBase,
}

impl PluginPermission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StorageRead => "storage:read",
            Self::StorageWrite => "storage:write",
            Self::NetworkFetch => "network:fetch",
            Self::ChatSendMessage => "chat:send-message",
            Self::ChatReceiveMessage => "chat:receive-message",
            Self::ChatModifyInput => "chat:modify-input",
            Self::ModelsAccess => "models:access",
            Self::SystemClipboard => "system:clipboard",
            Self::SystemNotification => "system:notification",
            Self::SystemFileSystem => "system:file-system",
            Self::McpUseTools => "mcp:use-tools",
            Self::RagAccessKnowledgeBase => "rag:access-knowledge-base",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim() {
            "storage:read" => Ok(Self::StorageRead),
            "storage:write" => Ok(Self::StorageWrite),
            "network:fetch" => Ok(Self::NetworkFetch),
            "chat:send-message" => Ok(Self::ChatSendMessage),
            "chat:receive-message" => Ok(Self::ChatReceiveMessage),
            "chat:modify-input" => Ok(Self::ChatModifyInput),
            "models:access" => Ok(Self::ModelsAccess),
            "system:clipboard" => Ok(Self::SystemClipboard),
            "system:notification" => Ok(Self::SystemNotification),
            "system:file-system" => Ok(Self::SystemFileSystem),
            "mcp:use-tools" => Ok(Self::McpUseTools),
            "rag:access-knowledge-base" => Ok(Self::RagAccessKnowledgeBase),
            other => Err(PluginRuntimeError::Validation(format!(
                "unsupported plugin permission '{other}'"
            ))),
        }
    }
}

impl fmt::Display for PluginPermission {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
/// Enumerates supported `PluginHook` values.
pub enum PluginHook {
    BeforeMessageSend,
    AfterMessageReceive,
    OnConversationStart,
    OnConversationEnd,
    OnPluginLoad,
    OnPluginUnload,
    OnSettingsChange,
}

impl PluginHook {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeMessageSend => "before-message-send",
            Self::AfterMessageReceive => "after-message-receive",
            Self::OnConversationStart => "on-conversation-start",
            Self::OnConversationEnd => "on-conversation-end",
            Self::OnPluginLoad => "on-plugin-load",
            Self::OnPluginUnload => "on-plugin-unload",
            Self::OnSettingsChange => "on-settings-change",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim() {
            "before-message-send" => Ok(Self::BeforeMessageSend),
            "after-message-receive" => Ok(Self::AfterMessageReceive),
            "on-conversation-start" => Ok(Self::OnConversationStart),
            "on-conversation-end" => Ok(Self::OnConversationEnd),
            "on-plugin-load" => Ok(Self::OnPluginLoad),
            "on-plugin-unload" => Ok(Self::OnPluginUnload),
            "on-settings-change" => Ok(Self::OnSettingsChange),
            other => Err(PluginRuntimeError::Validation(format!(
                "unsupported plugin hook '{other}'"
            ))),
        }
    }
}

impl fmt::Display for PluginHook {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
/// Enumerates supported `PluginCategory` values.
pub enum PluginCategory {
    Productivity,
    DeveloperTools,
    AiEnhancement,
    Integration,
    Utility,
    Custom,
}

impl PluginCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Productivity => "productivity",
            Self::DeveloperTools => "developer-tools",
            Self::AiEnhancement => "ai-enhancement",
            Self::Integration => "integration",
            Self::Utility => "utility",
            Self::Custom => "custom",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim() {
            "productivity" => Ok(Self::Productivity),
            "developer-tools" => Ok(Self::DeveloperTools),
            "ai-enhancement" => Ok(Self::AiEnhancement),
            "integration" => Ok(Self::Integration),
            "utility" => Ok(Self::Utility),
            "custom" => Ok(Self::Custom),
            other => Err(PluginRuntimeError::Validation(format!(
                "unsupported plugin category '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
/// Enumerates supported `ConfigPropertyType` values.
pub enum ConfigPropertyType {
    String,
    Number,
    Boolean,
    Select,
}

impl ConfigPropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Select => "select",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `ConfigProperty` describing one plugin configuration option.
pub struct ConfigProperty {
    #[serde(rename = "type")]
    pub property_type: ConfigPropertyType,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(rename = "enum", default)]
    pub choices: Vec<Value>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
/// Public struct `ConfigSchema` mapping option names to property descriptors.
pub struct ConfigSchema {
    pub properties: BTreeMap<String, ConfigProperty>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `PluginManifest`: the immutable descriptor of one extension.
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub categories: Vec<PluginCategory>,
    #[serde(default)]
    pub permissions: Vec<PluginPermission>,
    #[serde(default)]
    pub hooks: Vec<PluginHook>,
    #[serde(default)]
    pub config_schema: Option<ConfigSchema>,
}

impl PluginManifest {
    pub fn grants(&self, permission: PluginPermission) -> bool {
        self.permissions.contains(&permission)
    }
}

/// Validates a manifest against the closed vocabularies and schema rules.
///
/// A manifest that fails here must never reach the registry: install rejects
/// before creating any instance.
pub fn validate_manifest(manifest: &PluginManifest) -> Result<()> {
    validate_non_empty_field("id", &manifest.id)?;
    validate_non_empty_field("name", &manifest.name)?;
    validate_non_empty_field("version", &manifest.version)?;
    validate_identifier(&manifest.id)?;
    validate_version_string(&manifest.version)?;
    validate_unique_entries("permissions", &manifest.permissions)?;
    validate_unique_entries("hooks", &manifest.hooks)?;
    if let Some(schema) = manifest.config_schema.as_ref() {
        validate_config_schema(schema)?;
    }
    Ok(())
}

/// Derives the deterministic starting config for a fresh install: each schema
/// property with a declared default contributes it, absent defaults contribute
/// nothing.
pub fn default_config_from_schema(manifest: &PluginManifest) -> BTreeMap<String, Value> {
    let mut config = BTreeMap::new();
    let Some(schema) = manifest.config_schema.as_ref() else {
        return config;
    };
    for (name, property) in &schema.properties {
        if let Some(default) = property.default.as_ref() {
            config.insert(name.clone(), default.clone());
        }
    }
    config
}

fn validate_non_empty_field(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(PluginRuntimeError::Validation(format!(
            "manifest field '{name}' must be non-empty"
        )));
    }
    Ok(())
}

fn validate_identifier(id: &str) -> Result<()> {
    let valid = id
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if !valid {
        return Err(PluginRuntimeError::Validation(format!(
            "manifest id '{id}' must contain only ascii alphanumerics, '-' or '_'"
        )));
    }
    Ok(())
}

fn validate_version_string(version: &str) -> Result<()> {
    let all_numeric = version
        .split('.')
        .all(|component| !component.is_empty() && component.chars().all(|ch| ch.is_ascii_digit()));
    if !all_numeric {
        return Err(PluginRuntimeError::Validation(format!(
            "manifest version '{version}' must be dotted numeric components"
        )));
    }
    Ok(())
}

fn validate_unique_entries<T: std::hash::Hash + Eq>(name: &str, entries: &[T]) -> Result<()> {
    let unique: HashSet<&T> = entries.iter().collect();
    if unique.len() != entries.len() {
        return Err(PluginRuntimeError::Validation(format!(
            "manifest field '{name}' contains duplicate entries"
        )));
    }
    Ok(())
}

fn validate_config_schema(schema: &ConfigSchema) -> Result<()> {
    for (name, property) in &schema.properties {
        if name.trim().is_empty() {
            return Err(PluginRuntimeError::Validation(
                "config schema property names must be non-empty".to_string(),
            ));
        }
        if let (Some(min), Some(max)) = (property.min, property.max) {
            if min > max {
                return Err(PluginRuntimeError::Validation(format!(
                    "config property '{name}' has min {min} greater than max {max}"
                )));
            }
        }
        if property.property_type == ConfigPropertyType::Select {
            if property.choices.is_empty() {
                return Err(PluginRuntimeError::Validation(format!(
                    "select config property '{name}' requires a non-empty enum list"
                )));
            }
        } else if !property.choices.is_empty() {
            return Err(PluginRuntimeError::Validation(format!(
                "config property '{name}' declares an enum list but is not a select"
            )));
        }
        if let Some(default) = property.default.as_ref() {
            validate_default_value(name, property, default)?;
        }
    }
    Ok(())
}

fn validate_default_value(name: &str, property: &ConfigProperty, default: &Value) -> Result<()> {
    let matches_type = match property.property_type {
        ConfigPropertyType::String => default.is_string(),
        ConfigPropertyType::Number => default.is_number(),
        ConfigPropertyType::Boolean => default.is_boolean(),
        ConfigPropertyType::Select => property.choices.contains(default),
    };
    if !matches_type {
        return Err(PluginRuntimeError::Validation(format!(
            "config property '{name}' default does not match declared type '{}'",
            property.property_type.as_str()
        )));
    }
    if property.property_type == ConfigPropertyType::Number {
        let value = default.as_f64().unwrap_or_default();
        if property.min.is_some_and(|min| value < min)
            || property.max.is_some_and(|max| value > max)
        {
            return Err(PluginRuntimeError::Validation(format!(
                "config property '{name}' default {value} is outside its min/max bounds"
            )));
        }
    }
    Ok(())
}
