use std::cmp::Ordering;
use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::clock::unix_timestamp_ms;
use crate::error::{PluginRuntimeError, Result};
use crate::manifest::{PluginCategory, PluginManifest};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `CatalogFeedItem`: one remote entry before local enrichment.
pub struct CatalogFeedItem {
    pub manifest: PluginManifest,
    #[serde(default)]
    pub downloads: u64,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub review_count: u64,
    #[serde(default)]
    pub featured: bool,
    #[serde(default)]
    pub trending: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `CatalogEntry`: a feed item plus the derived `installed`
/// flag computed against the registry at refresh time.
pub struct CatalogEntry {
    pub manifest: PluginManifest,
    pub downloads: u64,
    pub rating: f64,
    pub review_count: u64,
    pub featured: bool,
    pub trending: bool,
    pub installed: bool,
}

#[async_trait]
/// Trait contract for `CatalogSource` behavior.
pub trait CatalogSource: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<Vec<CatalogFeedItem>>;
}

/// Source backed by a fixed item list; used by tests and the feed-file CLI.
pub struct StaticCatalogSource {
    items: Vec<CatalogFeedItem>,
}

impl StaticCatalogSource {
    pub fn new(items: Vec<CatalogFeedItem>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl CatalogSource for StaticCatalogSource {
    async fn fetch(&self) -> anyhow::Result<Vec<CatalogFeedItem>> {
        Ok(self.items.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `CatalogSortOrder` values.
pub enum CatalogSortOrder {
    Downloads,
    Rating,
    VersionRecency,
    Name,
}

#[derive(Default)]
struct CatalogCacheState {
    entries: Vec<CatalogEntry>,
    last_refresh_unix_ms: u64,
}

#[derive(Default)]
/// Refreshable snapshot of installable plugins.
///
/// Never authoritative for install state: the `installed` flag is computed
/// once per refresh, so installing after a refresh does not retroactively
/// update cached entries until the next refresh.
pub struct CatalogCache {
    state: Mutex<CatalogCacheState>,
}

impl CatalogCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the snapshot from `source`, marking entries whose id appears
    /// in `installed_ids`. Returns the number of cached entries.
    pub async fn refresh(
        &self,
        source: &dyn CatalogSource,
        installed_ids: &HashSet<String>,
    ) -> Result<usize> {
        let items = source
            .fetch()
            .await
            .map_err(|error| PluginRuntimeError::Catalog(error.to_string()))?;
        let entries: Vec<CatalogEntry> = items
            .into_iter()
            .map(|item| CatalogEntry {
                installed: installed_ids.contains(&item.manifest.id),
                manifest: item.manifest,
                downloads: item.downloads,
                rating: item.rating,
                review_count: item.review_count,
                featured: item.featured,
                trending: item.trending,
            })
            .collect();
        let count = entries.len();
        let mut state = self.state.lock().await;
        state.entries = entries;
        state.last_refresh_unix_ms = unix_timestamp_ms();
        tracing::debug!(entries = count, "refreshed plugin catalog");
        Ok(count)
    }

    pub async fn entries(&self) -> Vec<CatalogEntry> {
        self.state.lock().await.entries.clone()
    }

    pub async fn last_refresh_unix_ms(&self) -> u64 {
        self.state.lock().await.last_refresh_unix_ms
    }

    /// Case-insensitive substring search over name, description, and
    /// keywords.
    pub async fn search(&self, query: &str) -> Vec<CatalogEntry> {
        let needle = query.to_lowercase();
        self.state
            .lock()
            .await
            .entries
            .iter()
            .filter(|entry| {
                entry.manifest.name.to_lowercase().contains(&needle)
                    || entry.manifest.description.to_lowercase().contains(&needle)
                    || entry
                        .manifest
                        .keywords
                        .iter()
                        .any(|keyword| keyword.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect()
    }

    pub async fn entries_in_category(&self, category: PluginCategory) -> Vec<CatalogEntry> {
        self.state
            .lock()
            .await
            .entries
            .iter()
            .filter(|entry| entry.manifest.categories.contains(&category))
            .cloned()
            .collect()
    }

    pub async fn featured(&self) -> Vec<CatalogEntry> {
        self.state
            .lock()
            .await
            .entries
            .iter()
            .filter(|entry| entry.featured)
            .cloned()
            .collect()
    }

    pub async fn trending(&self) -> Vec<CatalogEntry> {
        self.state
            .lock()
            .await
            .entries
            .iter()
            .filter(|entry| entry.trending)
            .cloned()
            .collect()
    }

    /// Snapshot sorted by the requested order; ties break by name so output
    /// stays deterministic.
    pub async fn sorted(&self, order: CatalogSortOrder) -> Vec<CatalogEntry> {
        let mut entries = self.entries().await;
        entries.sort_by(|left, right| {
            let primary = match order {
                CatalogSortOrder::Downloads => right.downloads.cmp(&left.downloads),
                CatalogSortOrder::Rating => right.rating.total_cmp(&left.rating),
                CatalogSortOrder::VersionRecency => {
                    compare_version_strings(&right.manifest.version, &left.manifest.version)
                }
                CatalogSortOrder::Name => Ordering::Equal,
            };
            primary.then_with(|| {
                left.manifest
                    .name
                    .to_lowercase()
                    .cmp(&right.manifest.name.to_lowercase())
            })
        });
        entries
    }

    /// The catalog's version string for `plugin_id`, if listed. Feeds
    /// `check_update_available` on the registry.
    pub async fn version_of(&self, plugin_id: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .entries
            .iter()
            .find(|entry| entry.manifest.id == plugin_id)
            .map(|entry| entry.manifest.version.clone())
    }
}

/// Orders dotted version strings by numeric component, so `1.10.0` sorts
/// after `1.9.9`. Non-numeric components fall back to string order; missing
/// components count as zero.
pub fn compare_version_strings(left: &str, right: &str) -> Ordering {
    let left_parts: Vec<&str> = left.split('.').collect();
    let right_parts: Vec<&str> = right.split('.').collect();
    let length = left_parts.len().max(right_parts.len());
    for index in 0..length {
        let left_part = left_parts.get(index).copied().unwrap_or("0");
        let right_part = right_parts.get(index).copied().unwrap_or("0");
        let ordering = match (left_part.parse::<u64>(), right_part.parse::<u64>()) {
            (Ok(left_num), Ok(right_num)) => left_num.cmp(&right_num),
            _ => left_part.cmp(right_part),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
