//! TOML description of a content tree, imported into the catalog.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::item::{FILESYSTEM_ITEM_ID, ItemId};

pub const DEFAULT_TEMPLATE: &str = "Page";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SiteManifest {
    /// Start item id; the root item when omitted.
    pub start: Option<ItemId>,
    #[serde(default)]
    pub items: Vec<ManifestItem>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: ItemId,
    pub parent: Option<ItemId>,
    pub name: String,
    pub title: Option<String>,
    pub template: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub versions: Vec<ManifestVersion>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ManifestVersion {
    pub index: u32,
    pub key: Option<String>,
    pub title: Option<String>,
    pub saved_by: Option<String>,
}

impl ManifestItem {
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }

    pub fn template(&self) -> &str {
        self.template.as_deref().unwrap_or(DEFAULT_TEMPLATE)
    }
}

impl SiteManifest {
    pub fn root(&self) -> Option<&ManifestItem> {
        self.items.iter().find(|item| item.parent.is_none())
    }

    pub fn start_id(&self) -> Option<ItemId> {
        self.start.or_else(|| self.root().map(|item| item.id))
    }

    /// Reject trees the catalog cannot represent.
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for item in &self.items {
            if item.id <= FILESYSTEM_ITEM_ID {
                bail!("item id must be positive: {}", item.id);
            }
            if !ids.insert(item.id) {
                bail!("duplicate item id: {}", item.id);
            }
            let name = item.name.trim();
            if name.is_empty() && item.parent.is_some() {
                bail!("item {} has an empty name", item.id);
            }
            if name.contains('/') {
                bail!("item {} name cannot contain `/`: {}", item.id, item.name);
            }
        }

        let roots = self
            .items
            .iter()
            .filter(|item| item.parent.is_none())
            .map(|item| item.id)
            .collect::<Vec<_>>();
        match roots.len() {
            0 => bail!("site manifest has no root item (an item without `parent`)"),
            1 => {}
            _ => bail!("site manifest has more than one root item: {roots:?}"),
        }

        let parents: HashMap<ItemId, Option<ItemId>> =
            self.items.iter().map(|item| (item.id, item.parent)).collect();
        let mut siblings: BTreeMap<(ItemId, String), ItemId> = BTreeMap::new();
        for item in &self.items {
            let Some(parent) = item.parent else {
                continue;
            };
            if !parents.contains_key(&parent) {
                bail!("item {} refers to missing parent {}", item.id, parent);
            }
            if let Some(existing) =
                siblings.insert((parent, item.name.trim().to_lowercase()), item.id)
            {
                bail!(
                    "items {} and {} share the name `{}` under parent {}",
                    existing,
                    item.id,
                    item.name,
                    parent
                );
            }
            ensure_acyclic(item.id, &parents)?;
        }

        for item in &self.items {
            let mut indices = HashSet::new();
            for version in &item.versions {
                if !indices.insert(version.index) {
                    bail!("item {} has duplicate version index {}", item.id, version.index);
                }
            }
        }

        if let Some(start) = self.start
            && !ids.contains(&start)
        {
            bail!("start item {start} does not exist");
        }
        Ok(())
    }
}

fn ensure_acyclic(id: ItemId, parents: &HashMap<ItemId, Option<ItemId>>) -> Result<()> {
    let mut seen = HashSet::new();
    let mut cursor = Some(id);
    while let Some(current) = cursor {
        if !seen.insert(current) {
            bail!("item {id} is part of a parent cycle");
        }
        cursor = parents.get(&current).copied().flatten();
    }
    Ok(())
}

pub fn parse_manifest(content: &str) -> Result<SiteManifest> {
    let manifest: SiteManifest = toml::from_str(content).context("failed to parse site manifest")?;
    manifest.validate()?;
    Ok(manifest)
}

pub fn load_manifest(path: &Path) -> Result<SiteManifest> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_manifest(&content).with_context(|| format!("invalid site manifest {}", path.display()))
}
