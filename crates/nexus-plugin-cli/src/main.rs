//! Control CLI for the Nexus plugin runtime: validate and inspect manifests,
//! list persisted registry state, and query catalog feed files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use nexus_plugins::{
    validate_manifest, CatalogCache, CatalogEntry, CatalogFeedItem, CatalogSortOrder,
    FileKeyValueStore, PluginCategory, PluginInstance, PluginManifest, PluginRegistry,
    PluginRegistryConfig, PluginStatus, StaticCatalogSource,
};

#[derive(Debug, Parser)]
#[command(
    name = "nexus-pluginctl",
    about = "Inspect Nexus plugin manifests, registry state, and catalog feeds"
)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Manifest validation and inspection.
    Manifest {
        #[command(subcommand)]
        command: ManifestCommand,
    },
    /// Persisted registry inspection.
    Registry {
        #[command(subcommand)]
        command: RegistryCommand,
    },
    /// Catalog feed queries.
    Catalog {
        #[command(subcommand)]
        command: CatalogCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ManifestCommand {
    /// Validate a manifest file against the closed vocabularies and schema rules.
    Validate { path: PathBuf },
    /// Validate and print the full manifest report.
    Show { path: PathBuf },
}

#[derive(Debug, Subcommand)]
enum RegistryCommand {
    /// List installed plugins from a registry store file.
    List {
        #[arg(long)]
        store: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum CatalogCommand {
    /// Search and sort a catalog feed file.
    Search {
        #[arg(long)]
        feed: PathBuf,
        /// Case-insensitive substring over name, description, and keywords.
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long, value_enum, default_value_t = CliCatalogSort::Name)]
        sort: CliCatalogSort,
        /// Registry store used to mark installed entries.
        #[arg(long)]
        store: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliCatalogSort {
    Downloads,
    Rating,
    Version,
    Name,
}

impl From<CliCatalogSort> for CatalogSortOrder {
    fn from(value: CliCatalogSort) -> Self {
        match value {
            CliCatalogSort::Downloads => CatalogSortOrder::Downloads,
            CliCatalogSort::Rating => CatalogSortOrder::Rating,
            CliCatalogSort::Version => CatalogSortOrder::VersionRecency,
            CliCatalogSort::Name => CatalogSortOrder::Name,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        CliCommand::Manifest { command } => match command {
            ManifestCommand::Validate { path } => {
                let manifest = load_manifest(&path)?;
                println!("{}", render_manifest_summary(&path, &manifest));
            }
            ManifestCommand::Show { path } => {
                let manifest = load_manifest(&path)?;
                println!("{}", render_manifest_report(&path, &manifest));
            }
        },
        CliCommand::Registry { command } => match command {
            RegistryCommand::List { store } => {
                let registry = open_registry(&store).await?;
                let instances = registry.plugins().await;
                println!("{}", render_registry_report(&instances));
            }
        },
        CliCommand::Catalog { command } => match command {
            CatalogCommand::Search {
                feed,
                query,
                category,
                sort,
                store,
            } => {
                let entries =
                    run_catalog_search(&feed, query.as_deref(), category.as_deref(), sort, store)
                        .await?;
                println!("{}", render_catalog_report(&entries));
            }
        },
    }
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn load_manifest(path: &Path) -> Result<PluginManifest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    let manifest: PluginManifest = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse manifest {}", path.display()))?;
    validate_manifest(&manifest)?;
    Ok(manifest)
}

async fn open_registry(store_path: &Path) -> Result<PluginRegistry> {
    let store = Arc::new(FileKeyValueStore::open(store_path)?);
    let registry = PluginRegistry::restore(PluginRegistryConfig::new(store))
        .await
        .with_context(|| format!("failed to restore registry from {}", store_path.display()))?;
    Ok(registry)
}

async fn run_catalog_search(
    feed_path: &Path,
    query: Option<&str>,
    category: Option<&str>,
    sort: CliCatalogSort,
    store_path: Option<PathBuf>,
) -> Result<Vec<CatalogEntry>> {
    let raw = std::fs::read_to_string(feed_path)
        .with_context(|| format!("failed to read catalog feed {}", feed_path.display()))?;
    let items: Vec<CatalogFeedItem> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse catalog feed {}", feed_path.display()))?;

    let installed_ids = match store_path {
        Some(path) => open_registry(&path).await?.installed_ids().await,
        None => HashSet::new(),
    };

    let catalog = CatalogCache::new();
    catalog
        .refresh(&StaticCatalogSource::new(items), &installed_ids)
        .await?;

    let category = category.map(PluginCategory::parse).transpose()?;
    let mut entries = catalog.sorted(sort.into()).await;
    if let Some(query) = query {
        let needle = query.to_lowercase();
        entries.retain(|entry| {
            entry.manifest.name.to_lowercase().contains(&needle)
                || entry.manifest.description.to_lowercase().contains(&needle)
                || entry
                    .manifest
                    .keywords
                    .iter()
                    .any(|keyword| keyword.to_lowercase().contains(&needle))
        });
    }
    if let Some(category) = category {
        entries.retain(|entry| entry.manifest.categories.contains(&category));
    }
    Ok(entries)
}

fn render_manifest_summary(path: &Path, manifest: &PluginManifest) -> String {
    format!(
        "manifest validate: path={} id={} version={} hooks={} permissions={}",
        path.display(),
        manifest.id,
        manifest.version,
        manifest.hooks.len(),
        manifest.permissions.len()
    )
}

fn render_manifest_report(path: &Path, manifest: &PluginManifest) -> String {
    let mut lines = vec![
        format!("manifest show: path={}", path.display()),
        format!("- id: {}", manifest.id),
        format!("- name: {}", manifest.name),
        format!("- version: {}", manifest.version),
    ];
    if !manifest.description.is_empty() {
        lines.push(format!("- description: {}", manifest.description));
    }
    let mut permissions: Vec<&str> = manifest
        .permissions
        .iter()
        .map(|permission| permission.as_str())
        .collect();
    permissions.sort_unstable();
    lines.push(format!("- permissions ({}):", permissions.len()));
    lines.extend(permissions.iter().map(|name| format!("- {name}")));
    let mut hooks: Vec<&str> = manifest.hooks.iter().map(|hook| hook.as_str()).collect();
    hooks.sort_unstable();
    lines.push(format!("- hooks ({}):", hooks.len()));
    lines.extend(hooks.iter().map(|name| format!("- {name}")));
    let config_keys = manifest
        .config_schema
        .as_ref()
        .map(|schema| schema.properties.len())
        .unwrap_or_default();
    lines.push(format!("- config properties: {config_keys}"));
    lines.join("\n")
}

fn render_registry_report(instances: &[PluginInstance]) -> String {
    let active = instances
        .iter()
        .filter(|instance| instance.status == PluginStatus::Active)
        .count();
    let mut lines = vec![format!(
        "registry list: plugins={} active={}",
        instances.len(),
        active
    )];
    for instance in instances {
        let mut line = format!(
            "- id={} version={} status={} hooks={} permissions={}",
            instance.manifest.id,
            instance.manifest.version,
            instance.status.as_str(),
            instance.manifest.hooks.len(),
            instance.manifest.permissions.len()
        );
        if let Some(error) = instance.last_error.as_deref() {
            line.push_str(&format!(" last_error={error}"));
        }
        lines.push(line);
    }
    lines.join("\n")
}

fn render_catalog_report(entries: &[CatalogEntry]) -> String {
    let mut lines = vec![format!("catalog search: entries={}", entries.len())];
    for entry in entries {
        lines.push(format!(
            "- id={} version={} downloads={} rating={:.1} installed={} featured={} trending={}",
            entry.manifest.id,
            entry.manifest.version,
            entry.downloads,
            entry.rating,
            entry.installed,
            entry.featured,
            entry.trending
        ));
    }
    lines.join("\n")
}
