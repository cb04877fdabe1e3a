use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::config::EditorConfig;
use crate::item::{
    ContentItem, DIRECTORY_TEMPLATE, FILE_TEMPLATE, FILESYSTEM_ITEM_ID, PathData, UploadFolder,
};
use crate::runtime::ResolvedPaths;
use crate::services::{ContentSource, UploadFolderSource};
use crate::urls::{strip_prefix_ignore_case, to_root_relative};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UploadedFile {
    pub virtual_path: String,
    pub public_url: String,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
struct MountedFolder {
    folder: UploadFolder,
    /// Root-relative virtual path with a trailing slash, e.g. `/upload/`.
    virtual_root: String,
    directory: PathBuf,
}

impl MountedFolder {
    fn public_url(&self, virtual_path: &str) -> String {
        match self.folder.url_prefix.as_deref().filter(|prefix| !prefix.is_empty()) {
            Some(prefix) => format!("{}{virtual_path}", prefix.trim_end_matches('/')),
            None => virtual_path.to_string(),
        }
    }
}

/// Upload folders of the site, each backed by a local directory.
#[derive(Debug, Clone, Default)]
pub struct UploadFolders {
    application_path: String,
    folders: Vec<MountedFolder>,
}

impl UploadFolders {
    pub fn new(application_path: &str, folders: Vec<(UploadFolder, PathBuf)>) -> Self {
        let folders = folders
            .into_iter()
            .map(|(folder, directory)| {
                let mut virtual_root = to_root_relative(&folder.path, application_path);
                if !virtual_root.ends_with('/') {
                    virtual_root.push('/');
                }
                MountedFolder {
                    folder,
                    virtual_root,
                    directory,
                }
            })
            .collect();
        Self {
            application_path: application_path.to_string(),
            folders,
        }
    }

    pub fn from_config(config: &EditorConfig, paths: &ResolvedPaths) -> Self {
        let folders = config
            .upload_folders()
            .iter()
            .map(|folder| {
                (
                    folder.as_upload_folder(),
                    paths.project_path(&folder.directory()),
                )
            })
            .collect();
        Self::new(config.application_path(), folders)
    }

    pub fn folders(&self) -> Vec<UploadFolder> {
        self.folders
            .iter()
            .map(|mounted| mounted.folder.clone())
            .collect()
    }

    pub fn directories(&self) -> Vec<&Path> {
        self.folders
            .iter()
            .map(|mounted| mounted.directory.as_path())
            .collect()
    }

    /// Every file below every folder, in folder order then path order.
    pub fn list_files(&self) -> Result<Vec<UploadedFile>> {
        let mut out = Vec::new();
        for mounted in &self.folders {
            if !mounted.directory.exists() {
                debug!(directory = %mounted.directory.display(), "upload directory missing");
                continue;
            }
            let mut files = Vec::new();
            for entry in WalkDir::new(&mounted.directory).follow_links(false) {
                let entry = entry
                    .with_context(|| format!("failed to walk {}", mounted.directory.display()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(&mounted.directory)
                    .with_context(|| {
                        format!(
                            "{} is outside {}",
                            entry.path().display(),
                            mounted.directory.display()
                        )
                    })?;
                let relative = relative
                    .components()
                    .map(|component| component.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                let metadata = entry
                    .metadata()
                    .with_context(|| format!("failed to stat {}", entry.path().display()))?;
                let virtual_path = format!("{}{relative}", mounted.virtual_root);
                files.push(UploadedFile {
                    public_url: mounted.public_url(&virtual_path),
                    virtual_path,
                    bytes: metadata.len(),
                });
            }
            files.sort_by(|left, right| left.virtual_path.cmp(&right.virtual_path));
            out.extend(files);
        }
        Ok(out)
    }

    fn locate<'p>(&self, path: &'p str) -> Option<(&MountedFolder, &'p str)> {
        self.folders.iter().find_map(|mounted| {
            if let Some(remainder) = strip_prefix_ignore_case(path, &mounted.virtual_root) {
                return Some((mounted, remainder));
            }
            let bare = mounted.virtual_root.trim_end_matches('/');
            if path.len() == bare.len() && strip_prefix_ignore_case(path, bare).is_some() {
                return Some((mounted, ""));
            }
            None
        })
    }

    fn file_item(&self, path: &str) -> Option<ContentItem> {
        let mut root_relative = to_root_relative(path.trim(), &self.application_path);
        // Remainders cut from a `url_prefix` ending in `/` arrive without the leading slash.
        if !root_relative.starts_with('/') {
            root_relative.insert(0, '/');
        }
        let (mounted, remainder) = self.locate(&root_relative)?;

        let segments = remainder
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>();
        if segments
            .iter()
            .any(|segment| *segment == ".." || *segment == "." || segment.contains('\\'))
        {
            debug!(path = %path, "rejected upload path");
            return None;
        }

        // Symlinks are not followed, matching `list_files`.
        let mut local = mounted.directory.clone();
        let mut metadata = fs::metadata(&local).ok()?;
        for segment in &segments {
            local.push(segment);
            metadata = fs::symlink_metadata(&local).ok()?;
            if metadata.file_type().is_symlink() {
                debug!(path = %path, "rejected symlinked upload path");
                return None;
            }
        }

        let joined = segments.join("/");
        let (template, virtual_path) = if metadata.is_dir() {
            let path = if joined.is_empty() {
                mounted.virtual_root.clone()
            } else {
                format!("{}{joined}/", mounted.virtual_root)
            };
            (DIRECTORY_TEMPLATE, path)
        } else {
            (FILE_TEMPLATE, format!("{}{joined}", mounted.virtual_root))
        };
        let name = segments
            .last()
            .map(|segment| segment.to_string())
            .unwrap_or_else(|| {
                mounted
                    .virtual_root
                    .trim_matches('/')
                    .rsplit('/')
                    .next()
                    .unwrap_or_default()
                    .to_string()
            });

        Some(ContentItem {
            id: FILESYSTEM_ITEM_ID,
            parent_id: None,
            title: name.clone(),
            name,
            template: template.to_string(),
            url: mounted.public_url(&virtual_path),
            path: virtual_path,
            version_index: None,
            version_key: None,
        })
    }
}

impl UploadFolderSource for UploadFolders {
    fn upload_folders_for_current_site(&self) -> Vec<UploadFolder> {
        self.folders()
    }
}

impl ContentSource for UploadFolders {
    fn resolve_path(&self, path: &str) -> PathData {
        self.file_item(path)
            .map(PathData::of)
            .unwrap_or_else(PathData::empty)
    }
}
