use serde::Serialize;

pub type ItemId = i32;

/// Id carried by items that live on the filesystem rather than in the catalog.
pub const FILESYSTEM_ITEM_ID: ItemId = 0;

pub const FILE_TEMPLATE: &str = "File";
pub const DIRECTORY_TEMPLATE: &str = "Directory";

/// A node in the content tree as handed out by the collaborator services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentItem {
    pub id: ItemId,
    pub parent_id: Option<ItemId>,
    pub name: String,
    pub title: String,
    pub template: String,
    pub path: String,
    pub url: String,
    pub version_index: Option<u32>,
    pub version_key: Option<String>,
}

impl ContentItem {
    pub fn is_version(&self) -> bool {
        self.version_index.is_some()
    }

    pub fn is_file(&self) -> bool {
        self.template == FILE_TEMPLATE
    }

    pub fn is_directory(&self) -> bool {
        self.template == DIRECTORY_TEMPLATE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadFolder {
    /// Virtual path of the folder, e.g. `~/upload/`.
    pub path: String,
    /// Absolute URL the folder is also served under, e.g. a CDN host.
    pub url_prefix: Option<String>,
}

/// Result of resolving a path inside a content source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathData {
    pub current_item: Option<ContentItem>,
}

impl PathData {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn of(item: ContentItem) -> Self {
        Self {
            current_item: Some(item),
        }
    }
}
