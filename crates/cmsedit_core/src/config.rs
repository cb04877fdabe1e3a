use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::item::UploadFolder;
use crate::naming::NameEditorSettings;
use crate::selection::{DEFAULT_SELECTED_QUERY_KEY, SelectionSettings};
use crate::urls::DEFAULT_APPLICATION_PATH;

pub const DEFAULT_EXTENSION: &str = ".html";
pub const DEFAULT_UPLOAD_FOLDER: &str = "~/upload/";
pub const DEFAULT_UPLOAD_DIRECTORY: &str = "uploads";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct EditorConfig {
    #[serde(default)]
    pub site: SiteSection,
    #[serde(default)]
    pub selection: SelectionSection,
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,
    #[serde(default)]
    pub actions: BTreeMap<String, String>,
    #[serde(default)]
    pub templates: BTreeMap<String, TemplateSection>,
    #[serde(default)]
    pub uploads: UploadsSection,
    #[serde(default)]
    pub naming: NameEditorSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SiteSection {
    pub url: Option<String>,
    pub application_path: Option<String>,
    pub default_extension: Option<String>,
    pub manifest: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SelectionSection {
    pub selected_query_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct TemplateSection {
    #[serde(default)]
    pub actions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct UploadsSection {
    #[serde(default)]
    pub folders: Vec<UploadFolderConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct UploadFolderConfig {
    pub path: String,
    pub url_prefix: Option<String>,
    pub directory: Option<String>,
}

impl UploadFolderConfig {
    /// Local directory backing the folder, relative to the project root.
    pub fn directory(&self) -> String {
        if let Some(directory) = self.directory.as_deref()
            && !directory.trim().is_empty()
        {
            return directory.trim().to_string();
        }
        self.path
            .trim_start_matches('~')
            .trim_matches('/')
            .to_string()
    }

    pub fn as_upload_folder(&self) -> UploadFolder {
        UploadFolder {
            path: self.path.clone(),
            url_prefix: self.url_prefix.clone(),
        }
    }
}

impl EditorConfig {
    /// Resolve the public site URL: env CMSEDIT_SITE_URL > config > None.
    pub fn site_url(&self) -> Option<String> {
        if let Ok(value) = env::var("CMSEDIT_SITE_URL") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return Some(trimmed);
            }
        }
        self.site.url.clone()
    }

    pub fn application_path(&self) -> &str {
        self.site
            .application_path
            .as_deref()
            .unwrap_or(DEFAULT_APPLICATION_PATH)
    }

    pub fn default_extension(&self) -> &str {
        self.site
            .default_extension
            .as_deref()
            .unwrap_or(DEFAULT_EXTENSION)
    }

    /// Resolve the selection key: env CMSEDIT_SELECTED_QUERY_KEY > config > "selected".
    pub fn selected_query_key(&self) -> String {
        if let Ok(value) = env::var("CMSEDIT_SELECTED_QUERY_KEY") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
        self.selection
            .selected_query_key
            .clone()
            .unwrap_or_else(|| DEFAULT_SELECTED_QUERY_KEY.to_string())
    }

    pub fn selection_settings(&self) -> SelectionSettings {
        SelectionSettings {
            selected_query_key: self.selected_query_key(),
            application_path: self.application_path().to_string(),
        }
    }

    /// Template-specific action first, then the site-wide default.
    pub fn action_template(&self, template: &str, action: &str) -> Option<&str> {
        self.templates
            .get(template)
            .and_then(|section| section.actions.get(action))
            .or_else(|| self.actions.get(action))
            .map(String::as_str)
    }

    /// Configured upload folders, or the single default `~/upload/` folder.
    pub fn upload_folders(&self) -> Vec<UploadFolderConfig> {
        if self.uploads.folders.is_empty() {
            return vec![UploadFolderConfig {
                path: DEFAULT_UPLOAD_FOLDER.to_string(),
                url_prefix: None,
                directory: Some(DEFAULT_UPLOAD_DIRECTORY.to_string()),
            }];
        }
        self.uploads.folders.clone()
    }

    pub fn validate(&self) -> Result<()> {
        for folder in &self.uploads.folders {
            if !folder.path.starts_with("~/") && !folder.path.starts_with('/') {
                bail!(
                    "upload folder path must start with `~/` or `/`: {}",
                    folder.path
                );
            }
        }
        if self.selected_query_key().trim().is_empty() {
            bail!("selection.selected_query_key cannot be empty");
        }
        Ok(())
    }
}

/// Load and parse an EditorConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<EditorConfig> {
    if !config_path.exists() {
        return Ok(EditorConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: EditorConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    parsed
        .validate()
        .with_context(|| format!("invalid configuration in {}", config_path.display()))?;
    Ok(parsed)
}
