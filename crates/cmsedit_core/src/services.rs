//! Collaborator interfaces the selection resolver delegates every lookup to.
//!
//! A miss is always `None`; none of these calls fail.

use crate::item::{ContentItem, ItemId, PathData, UploadFolder};

pub trait Navigator {
    /// Resolve a tree path such as `/news/archive/` to an item.
    fn navigate(&self, path: &str) -> Option<ContentItem>;
}

pub trait UrlParser {
    fn parse(&self, url: &str) -> Option<ContentItem>;

    /// The root of the public site, used when nothing else is selected.
    fn start_item(&self) -> ContentItem;
}

pub trait Persister {
    fn get(&self, id: ItemId) -> Option<ContentItem>;
}

pub trait VersionRepository {
    /// Pick a historical version of `candidate` by index or key. Returns `None`
    /// when no version parameter applies.
    fn parse_version(
        &self,
        version_index: Option<&str>,
        version_key: Option<&str>,
        candidate: Option<&ContentItem>,
    ) -> Option<ContentItem>;
}

pub trait UploadFolderSource {
    /// Upload folders of the current site in configured order.
    fn upload_folders_for_current_site(&self) -> Vec<UploadFolder>;
}

pub trait ContentSource {
    fn resolve_path(&self, path: &str) -> PathData;
}

pub trait ActionPaths {
    /// Template URL of the named action defined by the item's template.
    fn find_path(&self, item: &ContentItem, action: &str) -> Option<String>;
}

pub trait TokenResolver {
    fn resolve_tokens(&self, url: &str) -> String;
}

/// Every collaborator the resolver needs, borrowed for the life of one request.
#[derive(Clone, Copy)]
pub struct SelectionServices<'a> {
    pub navigator: &'a dyn Navigator,
    pub url_parser: &'a dyn UrlParser,
    pub persister: &'a dyn Persister,
    pub versions: &'a dyn VersionRepository,
    pub upload_folders: &'a dyn UploadFolderSource,
    pub content_source: &'a dyn ContentSource,
    pub actions: &'a dyn ActionPaths,
    pub tokens: &'a dyn TokenResolver,
}

impl<'a> SelectionServices<'a> {
    /// Borrow all collaborators from a single engine implementing each of them.
    pub fn from_engine<E>(engine: &'a E) -> Self
    where
        E: Navigator
            + UrlParser
            + Persister
            + VersionRepository
            + UploadFolderSource
            + ContentSource
            + ActionPaths
            + TokenResolver,
    {
        Self {
            navigator: engine,
            url_parser: engine,
            persister: engine,
            versions: engine,
            upload_folders: engine,
            content_source: engine,
            actions: engine,
            tokens: engine,
        }
    }
}
