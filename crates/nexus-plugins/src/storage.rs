use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{PluginRuntimeError, Result};

#[async_trait]
/// Trait contract for `KeyValueStore` behavior.
///
/// One durable store backs both the registry record and extension-private
/// storage; callers isolate extensions by key prefix, the store itself has no
/// notion of ownership.
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Default)]
/// In-memory store for tests and hosts without durability requirements.
pub struct MemoryKeyValueStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

/// File-backed store holding one JSON document, rewritten atomically on every
/// mutation so a crash never leaves a partial registry record behind.
pub struct FileKeyValueStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Value>>,
}

impl FileKeyValueStore {
    /// Opens the store at `path`, loading the existing document when present.
    pub fn open(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|error| {
                PluginRuntimeError::Storage(format!(
                    "failed to read store file {}: {error}",
                    path.display()
                ))
            })?;
            serde_json::from_str::<BTreeMap<String, Value>>(&raw).map_err(|error| {
                PluginRuntimeError::Storage(format!(
                    "store file {} is not a JSON object: {error}",
                    path.display()
                ))
            })?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites the whole document through a sibling temp file so a reader
    /// opening `path` mid-write sees either the old record or the new one.
    fn persist(&self, entries: &BTreeMap<String, Value>) -> Result<()> {
        let rendered = serde_json::to_string_pretty(entries)
            .map_err(|error| PluginRuntimeError::Storage(error.to_string()))?;
        let parent = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|error| {
            PluginRuntimeError::Storage(format!(
                "failed to create store directory {}: {error}",
                parent.display()
            ))
        })?;
        // The temp file must live in the destination directory: rename is
        // only atomic within one filesystem.
        let mut staged = tempfile::NamedTempFile::new_in(parent).map_err(|error| {
            PluginRuntimeError::Storage(format!(
                "failed to stage store file in {}: {error}",
                parent.display()
            ))
        })?;
        staged.write_all(rendered.as_bytes()).map_err(|error| {
            PluginRuntimeError::Storage(format!("failed to write staged store file: {error}"))
        })?;
        staged.persist(&self.path).map_err(|error| {
            PluginRuntimeError::Storage(format!(
                "failed to replace store file {}: {error}",
                self.path.display()
            ))
        })?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value);
        self.persist(&entries)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}
