//! The collaborator services of one site, backed by the imported catalog and
//! the upload folders.

use anyhow::Result;
use percent_encoding::percent_decode_str;
use tracing::{debug, warn};
use url::Url;

use crate::catalog::{Catalog, UrlScheme};
use crate::config::EditorConfig;
use crate::item::{ContentItem, ItemId, PathData, UploadFolder};
use crate::naming::{NameAffixes, NameEditorSettings, name_affixes};
use crate::request::RequestParams;
use crate::runtime::ResolvedPaths;
use crate::selection::{ITEM_QUERY_KEY, SelectionResolver, SelectionSettings};
use crate::services::{
    ActionPaths, ContentSource, Navigator, Persister, SelectionServices, TokenResolver,
    UploadFolderSource, UrlParser, VersionRepository,
};
use crate::uploads::UploadFolders;
use crate::urls::{ConfiguredTokens, is_absolute_url, strip_prefix_ignore_case, to_root_relative};

pub struct SiteEngine {
    catalog: Catalog,
    uploads: UploadFolders,
    tokens: ConfiguredTokens,
    config: EditorConfig,
    site_host: Option<String>,
    settings: SelectionSettings,
}

impl SiteEngine {
    pub fn new(catalog: Catalog, uploads: UploadFolders, config: &EditorConfig) -> Self {
        let site_host = config.site_url().and_then(|site_url| match Url::parse(&site_url) {
            Ok(parsed) => parsed.host_str().map(str::to_ascii_lowercase),
            Err(err) => {
                warn!(url = %site_url, error = %err, "ignoring unparsable site url");
                None
            }
        });
        Self {
            tokens: ConfiguredTokens::new(config.application_path(), config.tokens.clone()),
            settings: config.selection_settings(),
            config: config.clone(),
            catalog,
            uploads,
            site_host,
        }
    }

    /// Build the engine for an initialized project. `None` until a catalog
    /// has been imported.
    pub fn open(paths: &ResolvedPaths, config: &EditorConfig) -> Result<Option<Self>> {
        let scheme = UrlScheme {
            application_path: config.application_path().to_string(),
            default_extension: config.default_extension().to_string(),
        };
        let Some(catalog) = Catalog::open(paths, scheme)? else {
            return Ok(None);
        };
        let uploads = UploadFolders::from_config(config, paths);
        Ok(Some(Self::new(catalog, uploads, config)))
    }

    pub fn settings(&self) -> &SelectionSettings {
        &self.settings
    }

    pub fn naming(&self) -> &NameEditorSettings {
        &self.config.naming
    }

    pub fn services(&self) -> SelectionServices<'_> {
        SelectionServices::from_engine(self)
    }

    pub fn resolver(&self, request: RequestParams) -> SelectionResolver<'_> {
        SelectionResolver::from_request(request, self.services(), self.settings.clone())
    }

    /// Prefix and suffix shown around the name field of `item`.
    pub fn name_affixes(&self, item: &ContentItem) -> NameAffixes {
        let parent = self.catalog.parent_of(item);
        name_affixes(
            item,
            parent.as_ref(),
            &self.catalog.start_item(),
            self.config.default_extension(),
        )
    }

    fn parse_site_url(&self, url: &str) -> Option<ContentItem> {
        let (path, request) = if is_absolute_url(url) {
            let parsed = Url::parse(url).ok()?;
            let host = parsed.host_str()?.to_ascii_lowercase();
            if self.site_host.as_deref() != Some(host.as_str()) {
                debug!(host = %host, "url belongs to another host");
                return None;
            }
            let request = parsed
                .query()
                .map(RequestParams::parse_query)
                .unwrap_or_default();
            (parsed.path().to_string(), request)
        } else {
            let relative = to_root_relative(url, &self.settings.application_path);
            let without_fragment = relative.split_once('#').map_or(relative.as_str(), |(head, _)| head);
            let path = without_fragment
                .split_once('?')
                .map_or(without_fragment, |(head, _)| head)
                .to_string();
            (path, RequestParams::from_url(without_fragment))
        };

        if let Some(raw) = request.non_empty(ITEM_QUERY_KEY) {
            return raw
                .trim()
                .parse::<ItemId>()
                .ok()
                .and_then(|id| self.catalog.item(id));
        }

        let decoded = percent_decode_str(&path).decode_utf8_lossy().into_owned();
        let base = self.settings.application_path.trim_end_matches('/');
        let relative = if decoded.len() == base.len() {
            strip_prefix_ignore_case(&decoded, base)?
        } else {
            strip_prefix_ignore_case(&decoded, &format!("{base}/"))?
        };
        self.catalog.item_by_url_path(relative)
    }
}

impl Navigator for SiteEngine {
    fn navigate(&self, path: &str) -> Option<ContentItem> {
        let path = path.trim();
        if path.is_empty() {
            return None;
        }
        self.catalog
            .item_by_path(path)
            .or_else(|| self.uploads.resolve_path(path).current_item)
    }
}

impl UrlParser for SiteEngine {
    fn parse(&self, url: &str) -> Option<ContentItem> {
        let url = url.trim();
        if url.is_empty() {
            return None;
        }
        self.parse_site_url(url)
    }

    fn start_item(&self) -> ContentItem {
        self.catalog.start_item()
    }
}

impl Persister for SiteEngine {
    fn get(&self, id: ItemId) -> Option<ContentItem> {
        self.catalog.item(id)
    }
}

impl VersionRepository for SiteEngine {
    fn parse_version(
        &self,
        version_index: Option<&str>,
        version_key: Option<&str>,
        candidate: Option<&ContentItem>,
    ) -> Option<ContentItem> {
        let version_index = version_index.map(str::trim).filter(|value| !value.is_empty());
        let version_key = version_key.map(str::trim).filter(|value| !value.is_empty());

        if let Some(raw) = version_index {
            match raw.parse::<u32>() {
                Ok(index) => {
                    if let Some(candidate) = candidate {
                        return self.catalog.version_by_index(candidate.id, index);
                    }
                }
                Err(err) => warn!(value = %raw, error = %err, "ignoring malformed version index"),
            }
        }

        let key = version_key?;
        self.catalog
            .version_by_key(candidate.map(|candidate| candidate.id), key)
    }
}

impl UploadFolderSource for SiteEngine {
    fn upload_folders_for_current_site(&self) -> Vec<UploadFolder> {
        self.uploads.upload_folders_for_current_site()
    }
}

impl ContentSource for SiteEngine {
    fn resolve_path(&self, path: &str) -> PathData {
        self.uploads.resolve_path(path)
    }
}

impl ActionPaths for SiteEngine {
    fn find_path(&self, item: &ContentItem, action: &str) -> Option<String> {
        self.config
            .action_template(&item.template, action)
            .map(str::to_string)
    }
}

impl TokenResolver for SiteEngine {
    fn resolve_tokens(&self, url: &str) -> String {
        self.tokens.resolve_tokens(url)
    }
}
