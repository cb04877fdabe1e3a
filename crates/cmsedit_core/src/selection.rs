//! Discovers which content item an editing interface is working on.
//!
//! The selected item is derived from request parameters through a fixed
//! precedence chain, each later step overwriting what earlier steps found:
//!
//! 1. `selected` (configurable key), a tree path resolved by the navigator
//! 2. `selectedUrl`, a public URL, or an uploaded file when that fails
//! 3. `item`, a numeric id resolved by the persister
//! 4. `versionIndex` / `versionKey`, applied to whatever was found so far

use tracing::debug;

use crate::error::{SelectionError, SelectionResult};
use crate::item::{ContentItem, ItemId};
use crate::request::{RequestHost, RequestParams};
use crate::services::SelectionServices;
use crate::urls::{append_query, decode_component, is_absolute_url, strip_prefix_ignore_case, to_root_relative};

pub const DEFAULT_SELECTED_QUERY_KEY: &str = "selected";
pub const SELECTED_URL_QUERY_KEY: &str = "selectedUrl";
pub const ITEM_QUERY_KEY: &str = "item";
pub const VERSION_INDEX_QUERY_KEY: &str = "versionIndex";
pub const VERSION_KEY_QUERY_KEY: &str = "versionKey";
pub const MEMORY_QUERY_KEY: &str = "memory";
pub const LOCATION_QUERY_KEY: &str = "location";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionSettings {
    pub selected_query_key: String,
    pub application_path: String,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            selected_query_key: DEFAULT_SELECTED_QUERY_KEY.to_string(),
            application_path: crate::urls::DEFAULT_APPLICATION_PATH.to_string(),
        }
    }
}

pub struct SelectionResolver<'a> {
    request: Option<RequestParams>,
    services: SelectionServices<'a>,
    settings: SelectionSettings,
    selected_item: Option<ContentItem>,
    memorized_item: Option<Option<ContentItem>>,
}

impl<'a> SelectionResolver<'a> {
    /// Resolve against the request of the page hosting a UI container.
    pub fn from_host(
        host: &dyn RequestHost,
        services: SelectionServices<'a>,
        settings: SelectionSettings,
    ) -> Self {
        Self::from_request(host.request().clone(), services, settings)
    }

    pub fn from_request(
        request: RequestParams,
        services: SelectionServices<'a>,
        settings: SelectionSettings,
    ) -> Self {
        Self {
            request: Some(request),
            services,
            settings,
            selected_item: None,
            memorized_item: None,
        }
    }

    /// Use an already known selection; request parsing is skipped entirely.
    pub fn from_items(
        selected: Option<ContentItem>,
        memorized: Option<ContentItem>,
        services: SelectionServices<'a>,
        settings: SelectionSettings,
    ) -> Self {
        Self {
            request: None,
            services,
            settings,
            selected_item: selected,
            memorized_item: memorized.map(Some),
        }
    }

    pub fn settings(&self) -> &SelectionSettings {
        &self.settings
    }

    /// The selected item, falling back to the start item when the request
    /// selects nothing. Computed once.
    pub fn selected_item(&mut self) -> SelectionResult<&ContentItem> {
        let item = match self.selected_item.take() {
            Some(item) => item,
            None => match self.parse_selection_from_request()? {
                Some(item) => item,
                None => {
                    debug!("no selection in request, using start item");
                    self.services.url_parser.start_item()
                }
            },
        };
        Ok(self.selected_item.insert(item))
    }

    pub fn set_selected_item(&mut self, item: ContentItem) {
        self.selected_item = Some(item);
    }

    /// The item placed in memory through the `memory` parameter. Computed once.
    pub fn memorized_item(&mut self) -> Option<&ContentItem> {
        if self.memorized_item.is_none() {
            self.memorized_item = Some(self.memory_from_request());
        }
        self.memorized_item.as_ref().and_then(Option::as_ref)
    }

    pub fn set_memorized_item(&mut self, item: Option<ContentItem>) {
        self.memorized_item = Some(item);
    }

    fn memory_from_request(&self) -> Option<ContentItem> {
        let request = self.request.as_ref()?;
        let memory = request.non_empty(MEMORY_QUERY_KEY)?;
        self.services.navigator.navigate(memory)
    }

    /// Run the precedence chain against the request. Unlike
    /// [`SelectionResolver::selected_item`] this does not fall back to the
    /// start item and may return `None`.
    pub fn parse_selection_from_request(&self) -> SelectionResult<Option<ContentItem>> {
        let Some(request) = self.request.as_ref() else {
            return Ok(None);
        };

        let mut candidate = None;

        if let Some(selected) = request.non_empty(&self.settings.selected_query_key) {
            let path = decode_component(selected);
            candidate = self.services.navigator.navigate(&path);
            debug!(path = %path, found = candidate.is_some(), "selection by path");
        }

        if let Some(selected_url) = request.non_empty(SELECTED_URL_QUERY_KEY) {
            candidate = self
                .services
                .url_parser
                .parse(selected_url)
                .or_else(|| self.select_file(request, selected_url));
            debug!(url = %selected_url, found = candidate.is_some(), "selection by url");
        }

        if let Some(item_id) = request.non_empty(ITEM_QUERY_KEY) {
            let id = parse_item_id(item_id)?;
            candidate = self.services.persister.get(id);
            debug!(id, found = candidate.is_some(), "selection by id");
        }

        let version = self.services.versions.parse_version(
            request.get(VERSION_INDEX_QUERY_KEY),
            request.get(VERSION_KEY_QUERY_KEY),
            candidate.as_ref(),
        );
        if let Some(version) = &version {
            debug!(id = version.id, index = ?version.version_index, "selection by version");
        }
        Ok(version.or(candidate))
    }

    fn select_file(&self, request: &RequestParams, selected_url: &str) -> Option<ContentItem> {
        request
            .query(LOCATION_QUERY_KEY)
            .filter(|location| !location.is_empty())?;

        if is_absolute_url(selected_url) {
            for folder in self.services.upload_folders.upload_folders_for_current_site() {
                let Some(prefix) = folder.url_prefix.as_deref().filter(|prefix| !prefix.is_empty())
                else {
                    continue;
                };
                if let Some(remainder) = strip_prefix_ignore_case(selected_url, prefix) {
                    debug!(prefix = %prefix, remainder = %remainder, "file selection in upload folder");
                    return self.services.content_source.resolve_path(remainder).current_item;
                }
            }
            return None;
        }

        let relative = to_root_relative(selected_url, &self.settings.application_path);
        let relative = relative.trim_start_matches('~');
        if !relative.starts_with('/') {
            return None;
        }
        self.services.navigator.navigate(relative)
    }

    /// URL of a named action of the selected item's template, carrying the
    /// selection. `None` when the template has no such action.
    pub fn action_url(&mut self, action_name: &str) -> SelectionResult<Option<String>> {
        let services = self.services;
        let key = self.settings.selected_query_key.clone();
        let selected = self.selected_item()?;
        let Some(template_url) = services.actions.find_path(selected, action_name) else {
            return Ok(None);
        };
        let url = append_query(&template_url, &key, &selected.path);
        Ok(Some(services.tokens.resolve_tokens(&url)))
    }

    /// `base_url` carrying the selection of `selected`, or of the current
    /// selected item when none is given.
    pub fn selected_url(
        &mut self,
        base_url: &str,
        selected: Option<&ContentItem>,
    ) -> SelectionResult<String> {
        let path = match selected {
            Some(item) => item.path.clone(),
            None => self.selected_item()?.path.clone(),
        };
        let url = append_query(base_url, &self.settings.selected_query_key, &path);
        Ok(self.services.tokens.resolve_tokens(&url))
    }
}

fn parse_item_id(value: &str) -> SelectionResult<ItemId> {
    value
        .trim()
        .parse::<ItemId>()
        .map_err(|source| SelectionError::InvalidItemId {
            key: ITEM_QUERY_KEY.to_string(),
            value: value.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::HashMap;

    use super::*;
    use crate::item::{PathData, UploadFolder};
    use crate::services::{
        ActionPaths, ContentSource, Navigator, Persister, TokenResolver, UploadFolderSource,
        UrlParser, VersionRepository,
    };
    use crate::urls::ConfiguredTokens;

    fn item(id: ItemId, path: &str) -> ContentItem {
        let name = path.trim_matches('/').rsplit('/').next().unwrap_or_default().to_string();
        ContentItem {
            id,
            parent_id: None,
            name: name.clone(),
            title: name,
            template: "Page".to_string(),
            path: path.to_string(),
            url: path.to_string(),
            version_index: None,
            version_key: None,
        }
    }

    #[derive(Default)]
    struct FakeEngine {
        by_path: HashMap<String, ContentItem>,
        by_url: HashMap<String, ContentItem>,
        by_id: HashMap<ItemId, ContentItem>,
        by_file: HashMap<String, ContentItem>,
        versions: HashMap<(ItemId, String), ContentItem>,
        folders: Vec<UploadFolder>,
        actions: HashMap<String, String>,
        navigations: Cell<usize>,
        tokens: ConfiguredTokens,
    }

    impl FakeEngine {
        fn new() -> Self {
            let mut engine = Self::default();
            engine.by_id.insert(1, item(1, "/"));
            engine
        }

        fn with_path(mut self, item: ContentItem) -> Self {
            self.by_path.insert(item.path.clone(), item.clone());
            self.by_id.insert(item.id, item);
            self
        }

        fn with_url(mut self, url: &str, item: ContentItem) -> Self {
            self.by_url.insert(url.to_string(), item);
            self
        }

        fn with_version(mut self, id: ItemId, index: &str, version: ContentItem) -> Self {
            self.versions.insert((id, index.to_string()), version);
            self
        }

        fn with_folder(mut self, path: &str, prefix: Option<&str>) -> Self {
            self.folders.push(UploadFolder {
                path: path.to_string(),
                url_prefix: prefix.map(str::to_string),
            });
            self
        }

        fn with_file(mut self, path: &str, item: ContentItem) -> Self {
            self.by_file.insert(path.to_string(), item);
            self
        }

        fn resolver(&self, query: &str) -> SelectionResolver<'_> {
            SelectionResolver::from_request(
                RequestParams::parse_query(query),
                SelectionServices::from_engine(self),
                SelectionSettings::default(),
            )
        }
    }

    impl Navigator for FakeEngine {
        fn navigate(&self, path: &str) -> Option<ContentItem> {
            self.navigations.set(self.navigations.get() + 1);
            self.by_path.get(path).cloned()
        }
    }

    impl UrlParser for FakeEngine {
        fn parse(&self, url: &str) -> Option<ContentItem> {
            self.by_url.get(url).cloned()
        }

        fn start_item(&self) -> ContentItem {
            item(1, "/")
        }
    }

    impl Persister for FakeEngine {
        fn get(&self, id: ItemId) -> Option<ContentItem> {
            self.by_id.get(&id).cloned()
        }
    }

    impl VersionRepository for FakeEngine {
        fn parse_version(
            &self,
            version_index: Option<&str>,
            _version_key: Option<&str>,
            candidate: Option<&ContentItem>,
        ) -> Option<ContentItem> {
            let candidate = candidate?;
            let index = version_index?;
            self.versions.get(&(candidate.id, index.to_string())).cloned()
        }
    }

    impl UploadFolderSource for FakeEngine {
        fn upload_folders_for_current_site(&self) -> Vec<UploadFolder> {
            self.folders.clone()
        }
    }

    impl ContentSource for FakeEngine {
        fn resolve_path(&self, path: &str) -> PathData {
            self.by_file
                .get(path)
                .cloned()
                .map(PathData::of)
                .unwrap_or_default()
        }
    }

    impl ActionPaths for FakeEngine {
        fn find_path(&self, _item: &ContentItem, action: &str) -> Option<String> {
            self.actions.get(action).cloned()
        }
    }

    impl TokenResolver for FakeEngine {
        fn resolve_tokens(&self, url: &str) -> String {
            self.tokens.resolve_tokens(url)
        }
    }

    #[test]
    fn empty_request_selects_start_item() {
        let engine = FakeEngine::new();
        let mut resolver = engine.resolver("");
        assert_eq!(resolver.parse_selection_from_request().expect("parse"), None);
        assert_eq!(resolver.selected_item().expect("selected").id, 1);
    }

    #[test]
    fn selected_path_resolves_through_navigator() {
        let engine = FakeEngine::new().with_path(item(5, "/news/"));
        let mut resolver = engine.resolver("selected=%252Fnews%252F");
        assert_eq!(resolver.selected_item().expect("selected").id, 5);
    }

    #[test]
    fn selected_url_overrides_selected_path() {
        let engine = FakeEngine::new()
            .with_path(item(5, "/news/"))
            .with_url("/about.html", item(6, "/about/"));
        let mut resolver = engine.resolver("selected=/news/&selectedUrl=/about.html");
        assert_eq!(resolver.selected_item().expect("selected").id, 6);
    }

    #[test]
    fn unresolvable_selected_url_clears_earlier_candidate() {
        let engine = FakeEngine::new().with_path(item(5, "/news/"));
        let resolver = engine.resolver("selected=/news/&selectedUrl=/bogus");
        assert_eq!(resolver.parse_selection_from_request().expect("parse"), None);
    }

    #[test]
    fn item_id_overrides_failed_selected_url() {
        let engine = FakeEngine::new().with_path(item(42, "/news/archive/"));
        let mut resolver = engine.resolver("item=42&selectedUrl=/bogus");
        assert_eq!(resolver.selected_item().expect("selected").id, 42);
    }

    #[test]
    fn item_id_overrides_resolved_selected_url() {
        let engine = FakeEngine::new()
            .with_path(item(42, "/news/archive/"))
            .with_url("/about.html", item(6, "/about/"));
        let resolver = engine.resolver("selectedUrl=/about.html&item=+42+");
        let parsed = resolver.parse_selection_from_request().expect("parse");
        assert_eq!(parsed.map(|item| item.id), Some(42));
    }

    #[test]
    fn malformed_item_id_is_an_error() {
        let engine = FakeEngine::new();
        let mut resolver = engine.resolver("selected=/&item=forty-two");
        let err = resolver.selected_item().expect_err("must fail");
        assert!(matches!(err, SelectionError::InvalidItemId { ref value, .. } if value == "forty-two"));
        assert!(err.to_string().contains("`item`"));
    }

    #[test]
    fn version_replaces_candidate_when_found() {
        let mut draft = item(5, "/news/");
        draft.version_index = Some(2);
        let engine = FakeEngine::new()
            .with_path(item(5, "/news/"))
            .with_version(5, "2", draft.clone());
        let mut resolver = engine.resolver("selected=/news/&versionIndex=2");
        assert_eq!(resolver.selected_item().expect("selected"), &draft);
    }

    #[test]
    fn missing_version_keeps_candidate() {
        let engine = FakeEngine::new().with_path(item(5, "/news/"));
        let mut resolver = engine.resolver("selected=/news/&versionIndex=9");
        let selected = resolver.selected_item().expect("selected");
        assert_eq!(selected.id, 5);
        assert!(!selected.is_version());
    }

    #[test]
    fn selected_item_is_computed_once_and_can_be_overridden() {
        let engine = FakeEngine::new().with_path(item(5, "/news/"));
        let mut resolver = engine.resolver("selected=/news/");
        resolver.selected_item().expect("selected");
        resolver.selected_item().expect("selected");
        assert_eq!(engine.navigations.get(), 1);

        resolver.set_selected_item(item(9, "/elsewhere/"));
        assert_eq!(resolver.selected_item().expect("selected").id, 9);
        assert_eq!(engine.navigations.get(), 1);
    }

    #[test]
    fn memorized_item_resolves_memory_parameter_once() {
        let engine = FakeEngine::new().with_path(item(7, "/clipboard/"));
        let mut resolver = engine.resolver("memory=/clipboard/");
        assert_eq!(resolver.memorized_item().map(|item| item.id), Some(7));
        assert_eq!(resolver.memorized_item().map(|item| item.id), Some(7));
        assert_eq!(engine.navigations.get(), 1);
    }

    #[test]
    fn explicit_pair_skips_request_parsing() {
        let engine = FakeEngine::new().with_path(item(7, "/clipboard/"));
        let mut resolver = SelectionResolver::from_items(
            Some(item(3, "/given/")),
            Some(item(4, "/memory/")),
            SelectionServices::from_engine(&engine),
            SelectionSettings::default(),
        );
        assert_eq!(resolver.selected_item().expect("selected").id, 3);
        assert_eq!(resolver.memorized_item().map(|item| item.id), Some(4));
        assert_eq!(resolver.parse_selection_from_request().expect("parse"), None);
        assert_eq!(engine.navigations.get(), 0);
    }

    #[test]
    fn explicit_pair_without_items_falls_back_to_defaults() {
        let engine = FakeEngine::new();
        let mut resolver = SelectionResolver::from_items(
            None,
            None,
            SelectionServices::from_engine(&engine),
            SelectionSettings::default(),
        );
        assert_eq!(resolver.memorized_item(), None);
        assert_eq!(resolver.selected_item().expect("selected").id, 1);
    }

    #[test]
    fn from_host_reads_the_hosting_request() {
        struct Container {
            request: RequestParams,
        }
        impl RequestHost for Container {
            fn request(&self) -> &RequestParams {
                &self.request
            }
        }

        let engine = FakeEngine::new().with_path(item(5, "/news/"));
        let container = Container {
            request: RequestParams::parse_query("selected=/news/"),
        };
        let mut resolver = SelectionResolver::from_host(
            &container,
            SelectionServices::from_engine(&engine),
            SelectionSettings::default(),
        );
        assert_eq!(resolver.selected_item().expect("selected").id, 5);
    }

    #[test]
    fn custom_selected_key_is_honoured() {
        let engine = FakeEngine::new().with_path(item(5, "/news/"));
        let mut resolver = SelectionResolver::from_request(
            RequestParams::parse_query("page=/news/&selected=/ignored/"),
            SelectionServices::from_engine(&engine),
            SelectionSettings {
                selected_query_key: "page".to_string(),
                ..SelectionSettings::default()
            },
        );
        assert_eq!(resolver.selected_item().expect("selected").id, 5);
        assert_eq!(
            resolver.selected_url("/edit.html", None).expect("url"),
            "/edit.html?page=%2Fnews%2F"
        );
    }

    #[test]
    fn absolute_file_url_resolves_in_first_matching_upload_folder() {
        let file = item(0, "/upload/a.png");
        let engine = FakeEngine::new()
            .with_folder("~/global/", None)
            .with_folder("~/upload/", Some("https://CDN.example.org"))
            .with_folder("~/other/", Some("https://cdn.example.org/upload"))
            .with_file("/upload/a.png", file.clone());
        let mut resolver =
            engine.resolver("selectedUrl=https%3A%2F%2Fcdn.example.org%2Fupload%2Fa.png&location=files");
        assert_eq!(resolver.selected_item().expect("selected"), &file);
    }

    #[test]
    fn absolute_file_url_without_matching_folder_is_a_miss() {
        let engine = FakeEngine::new()
            .with_path(item(8, "/upload/a.png"))
            .with_folder("~/upload/", Some("https://cdn.example.org"));
        let resolver =
            engine.resolver("selectedUrl=https://elsewhere.org/upload/a.png&location=files");
        assert_eq!(resolver.parse_selection_from_request().expect("parse"), None);
        assert_eq!(engine.navigations.get(), 0);
    }

    #[test]
    fn relative_file_url_navigates_from_root() {
        let engine = FakeEngine::new().with_path(item(8, "/upload/a.png"));
        let resolver = engine.resolver("selectedUrl=~/upload/a.png&location=files");
        let parsed = resolver.parse_selection_from_request().expect("parse");
        assert_eq!(parsed.map(|item| item.id), Some(8));

        let resolver = engine.resolver("selectedUrl=upload/a.png&location=files");
        assert_eq!(resolver.parse_selection_from_request().expect("parse"), None);
    }

    #[test]
    fn file_selection_requires_location_in_query_string() {
        let engine = FakeEngine::new().with_path(item(8, "/upload/a.png"));
        let resolver = SelectionResolver::from_request(
            RequestParams::parse_query("selectedUrl=/upload/a.png").with_form("location=files"),
            SelectionServices::from_engine(&engine),
            SelectionSettings::default(),
        );
        assert_eq!(resolver.parse_selection_from_request().expect("parse"), None);
    }

    #[test]
    fn selected_url_uses_explicit_item_or_selection() {
        let engine = FakeEngine::new().with_path(item(5, "/news/"));
        let mut resolver = engine.resolver("selected=/news/");
        assert_eq!(
            resolver.selected_url("{ManagementUrl}/Content/Edit.html", None).expect("url"),
            "/manage/Content/Edit.html?selected=%2Fnews%2F"
        );

        let first = resolver
            .selected_url("/edit.html", Some(&item(2, "/a/")))
            .expect("url");
        let second = resolver
            .selected_url("/edit.html", Some(&item(3, "/b/")))
            .expect("url");
        assert_eq!(first, "/edit.html?selected=%2Fa%2F");
        assert_eq!(second, "/edit.html?selected=%2Fb%2F");
    }

    #[test]
    fn action_url_appends_selection_to_template_path() {
        let mut engine = FakeEngine::new().with_path(item(5, "/news/"));
        engine
            .actions
            .insert("edit".to_string(), "{ManagementUrl}/Content/Edit.html".to_string());
        let mut resolver = engine.resolver("selected=/news/");
        assert_eq!(
            resolver.action_url("edit").expect("action"),
            Some("/manage/Content/Edit.html?selected=%2Fnews%2F".to_string())
        );
        assert_eq!(resolver.action_url("delete").expect("action"), None);
    }
}
