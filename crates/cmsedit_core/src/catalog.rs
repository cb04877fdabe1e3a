use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::item::{ContentItem, ItemId};
use crate::runtime::{ResolvedPaths, normalize_for_display};
use crate::site::{ManifestItem, ManifestVersion, SiteManifest};

const CATALOG_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS catalog_items (
    id INTEGER PRIMARY KEY,
    parent_id INTEGER,
    name TEXT NOT NULL,
    title TEXT NOT NULL,
    template TEXT NOT NULL,
    sort_order INTEGER NOT NULL,
    imported_at_unix INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_catalog_items_parent ON catalog_items(parent_id);
CREATE INDEX IF NOT EXISTS idx_catalog_items_template ON catalog_items(template);

CREATE TABLE IF NOT EXISTS catalog_versions (
    item_id INTEGER NOT NULL,
    version_index INTEGER NOT NULL,
    version_key TEXT NOT NULL,
    title TEXT NOT NULL,
    saved_by TEXT,
    PRIMARY KEY (item_id, version_index),
    FOREIGN KEY (item_id) REFERENCES catalog_items(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_catalog_versions_key ON catalog_versions(version_key);

CREATE TABLE IF NOT EXISTS catalog_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const START_ITEM_META_KEY: &str = "start_item_id";

#[derive(Debug, Clone, Serialize)]
pub struct CatalogImportReport {
    pub db_path: String,
    pub inserted_items: usize,
    pub inserted_versions: usize,
    pub start_item_id: ItemId,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogStats {
    pub items: usize,
    pub versions: usize,
    pub start_item_id: Option<ItemId>,
    pub by_template: BTreeMap<String, usize>,
}

/// How catalog items map onto public URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlScheme {
    pub application_path: String,
    pub default_extension: String,
}

impl Default for UrlScheme {
    fn default() -> Self {
        Self {
            application_path: crate::urls::DEFAULT_APPLICATION_PATH.to_string(),
            default_extension: crate::config::DEFAULT_EXTENSION.to_string(),
        }
    }
}

impl UrlScheme {
    fn base(&self) -> &str {
        self.application_path.trim_end_matches('/')
    }
}

#[derive(Debug, Clone)]
struct CatalogRecord {
    id: ItemId,
    parent_id: Option<ItemId>,
    name: String,
    title: String,
    template: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VersionRecord {
    pub item_id: ItemId,
    pub index: u32,
    pub key: String,
    pub title: String,
    pub saved_by: Option<String>,
}

/// In-memory snapshot of the content tree.
#[derive(Debug, Clone)]
pub struct Catalog {
    records: BTreeMap<ItemId, CatalogRecord>,
    paths: HashMap<ItemId, String>,
    by_path: HashMap<String, ItemId>,
    children: HashMap<(ItemId, String), ItemId>,
    versions: Vec<VersionRecord>,
    start_id: ItemId,
    start: CatalogRecord,
    scheme: UrlScheme,
}

impl Catalog {
    pub fn from_manifest(manifest: &SiteManifest, scheme: UrlScheme) -> Result<Self> {
        manifest.validate()?;
        let start_id = manifest
            .start_id()
            .ok_or_else(|| anyhow::anyhow!("site manifest has no start item"))?;

        let mut ordered = manifest.items.iter().collect::<Vec<_>>();
        ordered.sort_by_key(|item| (item.sort_order, item.id));

        let mut records = BTreeMap::new();
        let mut versions = Vec::new();
        for item in ordered {
            records.insert(
                item.id,
                CatalogRecord {
                    id: item.id,
                    parent_id: item.parent,
                    name: item.name.trim().to_string(),
                    title: item.title().to_string(),
                    template: item.template().to_string(),
                },
            );
            for version in &item.versions {
                versions.push(version_record(item, version));
            }
        }

        let mut paths = HashMap::new();
        let mut children = HashMap::new();
        for record in records.values() {
            if let Some(parent) = record.parent_id {
                children.insert((parent, record.name.to_lowercase()), record.id);
            }
        }
        for record in records.values() {
            paths.insert(record.id, tree_path(record.id, &records));
        }
        let by_path = paths
            .iter()
            .map(|(id, path)| (path.to_lowercase(), *id))
            .collect();
        let start = records
            .get(&start_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("start item {start_id} is not in the catalog"))?;

        Ok(Self {
            records,
            paths,
            by_path,
            children,
            versions,
            start_id,
            start,
            scheme,
        })
    }

    /// Load the imported catalog. Returns `None` when nothing has been imported yet.
    pub fn open(paths: &ResolvedPaths, scheme: UrlScheme) -> Result<Option<Self>> {
        let Some(connection) = open_catalog_connection(paths)? else {
            return Ok(None);
        };
        let manifest = read_manifest(&connection)?;
        if manifest.items.is_empty() {
            return Ok(None);
        }
        Self::from_manifest(&manifest, scheme)
            .with_context(|| format!("catalog in {} is inconsistent", paths.db_path.display()))
            .map(Some)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn item(&self, id: ItemId) -> Option<ContentItem> {
        self.records.get(&id).map(|record| self.content_item(record))
    }

    pub fn start_item(&self) -> ContentItem {
        self.content_item(&self.start)
    }

    pub fn parent_of(&self, item: &ContentItem) -> Option<ContentItem> {
        item.parent_id.and_then(|parent| self.item(parent))
    }

    /// Lookup by tree path; `/news`, `/news/` and `news/` are equivalent.
    pub fn item_by_path(&self, path: &str) -> Option<ContentItem> {
        let trimmed = path.trim().trim_matches('/');
        let normalized = if trimmed.is_empty() {
            "/".to_string()
        } else {
            format!("/{}/", trimmed.to_lowercase())
        };
        self.by_path
            .get(&normalized)
            .and_then(|id| self.item(*id))
    }

    /// Lookup by a public URL path relative to the start item, e.g. `news/2024.html`.
    pub fn item_by_url_path(&self, path: &str) -> Option<ContentItem> {
        let trimmed = path.trim().trim_matches('/');
        let extension = self.scheme.default_extension.as_str();
        let trimmed = if !extension.is_empty()
            && trimmed.len() >= extension.len()
            && trimmed
                .get(trimmed.len() - extension.len()..)
                .is_some_and(|tail| tail.eq_ignore_ascii_case(extension))
        {
            &trimmed[..trimmed.len() - extension.len()]
        } else {
            trimmed
        };

        let mut current = self.start_id;
        for segment in trimmed.split('/').filter(|segment| !segment.is_empty()) {
            current = *self.children.get(&(current, segment.to_lowercase()))?;
        }
        self.item(current)
    }

    pub fn version_by_index(&self, item_id: ItemId, index: u32) -> Option<ContentItem> {
        self.versions
            .iter()
            .find(|version| version.item_id == item_id && version.index == index)
            .and_then(|version| self.version_item(version))
    }

    /// Lookup by version key, restricted to one item when `item_id` is given.
    pub fn version_by_key(&self, item_id: Option<ItemId>, key: &str) -> Option<ContentItem> {
        self.versions
            .iter()
            .filter(|version| item_id.is_none_or(|id| version.item_id == id))
            .find(|version| version.key.eq_ignore_ascii_case(key.trim()))
            .and_then(|version| self.version_item(version))
    }

    pub fn versions_of(&self, item_id: ItemId) -> Vec<&VersionRecord> {
        self.versions
            .iter()
            .filter(|version| version.item_id == item_id)
            .collect()
    }

    fn version_item(&self, version: &VersionRecord) -> Option<ContentItem> {
        let mut item = self.item(version.item_id)?;
        item.title = version.title.clone();
        item.version_index = Some(version.index);
        item.version_key = Some(version.key.clone());
        Some(item)
    }

    fn content_item(&self, record: &CatalogRecord) -> ContentItem {
        let path = self
            .paths
            .get(&record.id)
            .cloned()
            .unwrap_or_else(|| "/".to_string());
        ContentItem {
            id: record.id,
            parent_id: record.parent_id,
            name: record.name.clone(),
            title: record.title.clone(),
            template: record.template.clone(),
            url: self.public_url(record.id, &path),
            path,
            version_index: None,
            version_key: None,
        }
    }

    fn public_url(&self, id: ItemId, path: &str) -> String {
        let base = self.scheme.base();
        if id == self.start_id {
            return format!("{base}/");
        }
        let start_path = self
            .paths
            .get(&self.start_id)
            .map(String::as_str)
            .unwrap_or("/");
        match path.strip_prefix(start_path) {
            Some(relative) if !relative.is_empty() => format!(
                "{base}/{}{}",
                relative.trim_end_matches('/'),
                self.scheme.default_extension
            ),
            _ => format!("{base}/?item={id}"),
        }
    }
}

fn tree_path(id: ItemId, records: &BTreeMap<ItemId, CatalogRecord>) -> String {
    let mut segments = Vec::new();
    let mut cursor = records.get(&id);
    while let Some(record) = cursor {
        let Some(parent) = record.parent_id else {
            break;
        };
        segments.push(record.name.as_str());
        cursor = records.get(&parent);
    }
    if segments.is_empty() {
        return "/".to_string();
    }
    segments.reverse();
    format!("/{}/", segments.join("/"))
}

fn version_record(item: &ManifestItem, version: &ManifestVersion) -> VersionRecord {
    let title = version
        .title
        .clone()
        .unwrap_or_else(|| item.title().to_string());
    let key = match version.key.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => key.to_string(),
        _ => compute_version_key(item.id, version.index, &title),
    };
    VersionRecord {
        item_id: item.id,
        index: version.index,
        key,
        title,
        saved_by: version.saved_by.clone(),
    }
}

fn compute_version_key(item_id: ItemId, index: u32, title: &str) -> String {
    let digest = Sha256::digest(format!("{item_id}:{index}:{title}").as_bytes());
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

pub fn import_manifest(paths: &ResolvedPaths, manifest: &SiteManifest) -> Result<CatalogImportReport> {
    manifest.validate()?;
    let start_item_id = manifest
        .start_id()
        .ok_or_else(|| anyhow::anyhow!("site manifest has no start item"))?;

    ensure_db_parent(paths)?;
    let mut connection = open_connection(&paths.db_path)?;
    initialize_schema(&connection)?;
    let imported_at = unix_timestamp()?;

    let transaction = connection
        .transaction()
        .context("failed to start catalog import transaction")?;
    transaction
        .execute_batch("DELETE FROM catalog_versions; DELETE FROM catalog_items; DELETE FROM catalog_meta;")
        .context("failed to clear catalog tables")?;

    let mut inserted_items = 0usize;
    let mut inserted_versions = 0usize;
    {
        let mut insert_item = transaction
            .prepare(
                "INSERT INTO catalog_items (id, parent_id, name, title, template, sort_order, imported_at_unix)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .context("failed to prepare catalog item insert")?;
        let mut insert_version = transaction
            .prepare(
                "INSERT INTO catalog_versions (item_id, version_index, version_key, title, saved_by)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .context("failed to prepare catalog version insert")?;

        for item in &manifest.items {
            insert_item
                .execute(params![
                    item.id,
                    item.parent,
                    item.name.trim(),
                    item.title(),
                    item.template(),
                    item.sort_order,
                    i64::try_from(imported_at).context("timestamp does not fit into i64")?,
                ])
                .with_context(|| format!("failed to insert catalog item {}", item.id))?;
            inserted_items += 1;
        }
        for item in &manifest.items {
            for version in &item.versions {
                let record = version_record(item, version);
                insert_version
                    .execute(params![
                        record.item_id,
                        record.index,
                        record.key,
                        record.title,
                        record.saved_by,
                    ])
                    .with_context(|| {
                        format!("failed to insert version {} of item {}", record.index, record.item_id)
                    })?;
                inserted_versions += 1;
            }
        }
    }
    transaction
        .execute(
            "INSERT INTO catalog_meta (key, value) VALUES (?1, ?2)",
            params![START_ITEM_META_KEY, start_item_id.to_string()],
        )
        .context("failed to store start item")?;
    transaction
        .commit()
        .context("failed to commit catalog import")?;

    Ok(CatalogImportReport {
        db_path: normalize_for_display(&paths.db_path),
        inserted_items,
        inserted_versions,
        start_item_id,
    })
}

pub fn load_catalog_stats(paths: &ResolvedPaths) -> Result<Option<CatalogStats>> {
    let Some(connection) = open_catalog_connection(paths)? else {
        return Ok(None);
    };
    let items = count_query(&connection, "SELECT COUNT(*) FROM catalog_items")?;
    let versions = count_query(&connection, "SELECT COUNT(*) FROM catalog_versions")?;
    let start_item_id = read_start_item(&connection)?;

    let mut statement = connection
        .prepare(
            "SELECT template, COUNT(*) AS count
             FROM catalog_items
             GROUP BY template
             ORDER BY template ASC",
        )
        .context("failed to prepare template aggregation query")?;
    let rows = statement
        .query_map([], |row| {
            let template: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((template, count))
        })
        .context("failed to run template aggregation query")?;

    let mut by_template = BTreeMap::new();
    for row in rows {
        let (template, count) = row.context("failed to read template aggregation row")?;
        let count = usize::try_from(count).context("template count does not fit into usize")?;
        by_template.insert(template, count);
    }

    Ok(Some(CatalogStats {
        items,
        versions,
        start_item_id,
        by_template,
    }))
}

fn read_manifest(connection: &Connection) -> Result<SiteManifest> {
    let mut item_statement = connection
        .prepare(
            "SELECT id, parent_id, name, title, template, sort_order
             FROM catalog_items
             ORDER BY sort_order ASC, id ASC",
        )
        .context("failed to prepare catalog item query")?;
    let rows = item_statement
        .query_map([], |row| {
            Ok(ManifestItem {
                id: row.get(0)?,
                parent: row.get(1)?,
                name: row.get(2)?,
                title: Some(row.get(3)?),
                template: Some(row.get(4)?),
                sort_order: row.get(5)?,
                versions: Vec::new(),
            })
        })
        .context("failed to run catalog item query")?;

    let mut items = Vec::new();
    let mut positions = HashMap::new();
    for row in rows {
        let item = row.context("failed to decode catalog item row")?;
        positions.insert(item.id, items.len());
        items.push(item);
    }

    let mut version_statement = connection
        .prepare(
            "SELECT item_id, version_index, version_key, title, saved_by
             FROM catalog_versions
             ORDER BY item_id ASC, version_index ASC",
        )
        .context("failed to prepare catalog version query")?;
    let rows = version_statement
        .query_map([], |row| {
            let item_id: ItemId = row.get(0)?;
            let version = ManifestVersion {
                index: row.get(1)?,
                key: Some(row.get(2)?),
                title: Some(row.get(3)?),
                saved_by: row.get(4)?,
            };
            Ok((item_id, version))
        })
        .context("failed to run catalog version query")?;
    for row in rows {
        let (item_id, version) = row.context("failed to decode catalog version row")?;
        let Some(position) = positions.get(&item_id) else {
            bail!("catalog version refers to missing item {item_id}");
        };
        items[*position].versions.push(version);
    }

    Ok(SiteManifest {
        start: read_start_item(connection)?,
        items,
    })
}

fn read_start_item(connection: &Connection) -> Result<Option<ItemId>> {
    let value: Option<String> = connection
        .query_row(
            "SELECT value FROM catalog_meta WHERE key = ?1",
            [START_ITEM_META_KEY],
            |row| row.get(0),
        )
        .optional()
        .context("failed to read start item from catalog_meta")?;
    value
        .map(|value| {
            value
                .parse::<ItemId>()
                .with_context(|| format!("invalid start item id in catalog: {value}"))
        })
        .transpose()
}

fn open_connection(db_path: &Path) -> Result<Connection> {
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    connection
        .busy_timeout(Duration::from_secs(5))
        .context("failed to set sqlite busy timeout")?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign_keys pragma")?;
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to enable WAL journal mode")?;
    Ok(connection)
}

fn open_catalog_connection(paths: &ResolvedPaths) -> Result<Option<Connection>> {
    if !paths.db_path.exists() {
        return Ok(None);
    }
    let connection = open_connection(&paths.db_path)?;
    if !table_exists(&connection, "catalog_items")?
        || !table_exists(&connection, "catalog_versions")?
        || !table_exists(&connection, "catalog_meta")?
    {
        return Ok(None);
    }
    Ok(Some(connection))
}

fn initialize_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(CATALOG_SCHEMA_SQL)
        .context("failed to initialize catalog schema")
}

fn ensure_db_parent(paths: &ResolvedPaths) -> Result<()> {
    let parent = paths
        .db_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("db path has no parent: {}", paths.db_path.display()))?;
    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create database parent directory {}",
            parent.display()
        )
    })
}

fn table_exists(connection: &Connection, table_name: &str) -> Result<bool> {
    let exists: i64 = connection
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [table_name],
            |row| row.get(0),
        )
        .with_context(|| format!("failed to check sqlite_master for table {table_name}"))?;
    Ok(exists == 1)
}

fn count_query(connection: &Connection, sql: &str) -> Result<usize> {
    let count: i64 = connection
        .query_row(sql, [], |row| row.get(0))
        .with_context(|| format!("failed query: {sql}"))?;
    usize::try_from(count).context("count does not fit into usize")
}

fn unix_timestamp() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before UNIX_EPOCH")
        .map(|duration| duration.as_secs())
}
