use serde::{Deserialize, Serialize};

use crate::item::ContentItem;

const RESERVED_NAME_CHARS: &[char] = &['%', '?', '&', '/', '\\', '+', ':', '<', '>', '#', '"', '*', '\''];
const MAX_PREFIX_CHARS: usize = 60;
const TRUNCATED_PREFIX_CHARS: usize = 50;

/// How the name field of an item is derived from its title.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NameEditorSettings {
    #[serde(default = "default_whitespace_replacement")]
    pub whitespace_replacement: char,
    #[serde(default = "default_to_lower")]
    pub to_lower: bool,
    #[serde(default)]
    pub ascii: bool,
}

impl Default for NameEditorSettings {
    fn default() -> Self {
        Self {
            whitespace_replacement: default_whitespace_replacement(),
            to_lower: default_to_lower(),
            ascii: false,
        }
    }
}

fn default_whitespace_replacement() -> char {
    '-'
}

fn default_to_lower() -> bool {
    true
}

/// Text shown around the name field: where the item will live and its extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameAffixes {
    pub prefix: String,
    pub suffix: String,
}

impl NameEditorSettings {
    pub fn clean_name(&self, title: &str) -> String {
        let replacement = self.whitespace_replacement;
        let mut out = String::with_capacity(title.len());
        let mut pending_separator = false;

        for ch in title.trim().chars() {
            if ch.is_whitespace() || ch == replacement {
                pending_separator = true;
                continue;
            }
            if RESERVED_NAME_CHARS.contains(&ch) || ch.is_control() {
                continue;
            }
            if self.ascii && !ch.is_ascii() {
                continue;
            }
            if pending_separator && !out.is_empty() {
                out.push(replacement);
            }
            pending_separator = false;
            if self.to_lower {
                out.extend(ch.to_lowercase());
            } else {
                out.push(ch);
            }
        }
        out
    }
}

pub fn name_affixes(
    item: &ContentItem,
    parent: Option<&ContentItem>,
    start: &ContentItem,
    default_extension: &str,
) -> NameAffixes {
    let mut affixes = NameAffixes {
        prefix: "/".to_string(),
        suffix: default_extension.to_string(),
    };

    let Some(parent) = parent else {
        return NameAffixes {
            prefix: String::new(),
            suffix: String::new(),
        };
    };
    if item.id == start.id {
        return NameAffixes {
            prefix: String::new(),
            suffix: String::new(),
        };
    }
    if parent.id == start.id || parent.url.contains('?') {
        return affixes;
    }

    // A parent URL without the extension keeps the defaults.
    let Some(index) = find_ignore_ascii_case(&parent.url, default_extension) else {
        return affixes;
    };
    let base = &parent.url[..index];
    let prefix = format!("{base}/");
    affixes.prefix = if prefix.chars().count() > MAX_PREFIX_CHARS {
        let truncated: String = prefix.chars().take(TRUNCATED_PREFIX_CHARS).collect();
        format!("{truncated}.../")
    } else {
        prefix
    };
    affixes
}

/// Byte offset of the first match of `needle`, comparing ASCII letters case-insensitively.
fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack.char_indices().map(|(index, _)| index).find(|index| {
        haystack
            .get(*index..*index + needle.len())
            .is_some_and(|window| window.eq_ignore_ascii_case(needle))
    })
}

/// Store an edited name on the item. Returns `true` when it changed.
pub fn apply_name(item: &mut ContentItem, text: &str) -> bool {
    if item.name == text {
        return false;
    }
    item.name = text.to_string();
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(id: i32, parent_id: Option<i32>, url: &str) -> ContentItem {
        ContentItem {
            id,
            parent_id,
            name: format!("page-{id}"),
            title: format!("Page {id}"),
            template: "Page".to_string(),
            path: format!("/page-{id}/"),
            url: url.to_string(),
            version_index: None,
            version_key: None,
        }
    }

    #[test]
    fn clean_name_replaces_whitespace_and_lowercases() {
        let settings = NameEditorSettings::default();
        assert_eq!(settings.clean_name("  Hello   World "), "hello-world");
        assert_eq!(settings.clean_name("Q&A: what's new?"), "qa-whats-new");
        assert_eq!(settings.clean_name("a - b"), "a-b");
    }

    #[test]
    fn clean_name_respects_ascii_and_case_settings() {
        let settings = NameEditorSettings {
            whitespace_replacement: '_',
            to_lower: false,
            ascii: true,
        };
        assert_eq!(settings.clean_name("Café Olé News"), "Caf_Ol_News");
    }

    #[test]
    fn start_and_root_items_have_no_affixes() {
        let start = page(1, Some(100), "/");
        let root = page(100, None, "/?item=100");
        let empty = NameAffixes {
            prefix: String::new(),
            suffix: String::new(),
        };
        assert_eq!(name_affixes(&start, Some(&root), &start, ".html"), empty);
        assert_eq!(name_affixes(&root, None, &start, ".html"), empty);
    }

    #[test]
    fn children_of_start_use_default_affixes() {
        let start = page(1, None, "/");
        let child = page(2, Some(1), "/news.html");
        let affixes = name_affixes(&child, Some(&start), &start, ".html");
        assert_eq!(affixes.prefix, "/");
        assert_eq!(affixes.suffix, ".html");
    }

    #[test]
    fn deeper_items_use_parent_url_as_prefix() {
        let start = page(1, None, "/");
        let parent = page(2, Some(1), "/news/2024.HTML");
        let child = page(3, Some(2), "/news/2024/launch.html");
        let affixes = name_affixes(&child, Some(&parent), &start, ".html");
        assert_eq!(affixes.prefix, "/news/2024/");
    }

    #[test]
    fn prefix_is_cut_at_the_extension_in_non_ascii_urls() {
        let start = page(1, None, "/");
        let parent = page(2, Some(1), "/İİİİ/news.HTML");
        let child = page(3, Some(2), "/İİİİ/news/x.html");
        let affixes = name_affixes(&child, Some(&parent), &start, ".html");
        assert_eq!(affixes.prefix, "/İİİİ/news/");
    }

    #[test]
    fn long_prefixes_are_truncated() {
        let start = page(1, None, "/");
        let long = format!("/{}.html", "a".repeat(70));
        let parent = page(2, Some(1), &long);
        let child = page(3, Some(2), "/x.html");
        let affixes = name_affixes(&child, Some(&parent), &start, ".html");
        assert_eq!(affixes.prefix, format!("/{}.../", "a".repeat(49)));
    }

    #[test]
    fn parent_urls_with_query_or_without_extension_keep_defaults() {
        let start = page(1, None, "/");
        let child = page(3, Some(2), "/x.html");
        let with_query = page(2, Some(50), "/?item=2");
        assert_eq!(name_affixes(&child, Some(&with_query), &start, ".html").prefix, "/");
        let bare = page(2, Some(1), "/news/");
        assert_eq!(name_affixes(&child, Some(&bare), &start, ".html").prefix, "/");
    }

    #[test]
    fn apply_name_reports_changes() {
        let mut item = page(2, Some(1), "/news.html");
        assert!(!apply_name(&mut item, "page-2"));
        assert!(apply_name(&mut item, "headlines"));
        assert_eq!(item.name, "headlines");
    }
}
