use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;
use url::{Url, form_urlencoded};

use crate::services::TokenResolver;

pub const DEFAULT_APPLICATION_PATH: &str = "/";
pub const MANAGEMENT_URL_TOKEN: &str = "ManagementUrl";
pub const DEFAULT_MANAGEMENT_URL: &str = "~/manage";

/// Append `key=value` to a possibly relative URL, keeping any `#fragment` last.
pub fn append_query(base: &str, key: &str, value: &str) -> String {
    let (head, fragment) = match base.split_once('#') {
        Some((head, fragment)) => (head, Some(fragment)),
        None => (base, None),
    };
    let separator = if !head.contains('?') {
        "?"
    } else if head.ends_with('?') || head.ends_with('&') {
        ""
    } else {
        "&"
    };

    let mut out = String::with_capacity(head.len() + key.len() + value.len() + 2);
    out.push_str(head);
    out.push_str(separator);
    out.extend(form_urlencoded::byte_serialize(key.as_bytes()));
    out.push('=');
    out.extend(form_urlencoded::byte_serialize(value.as_bytes()));
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

/// An absolute URL carries a scheme and a host (`https://cdn.example.org/a.png`).
pub fn is_absolute_url(value: &str) -> bool {
    Url::parse(value.trim()).is_ok_and(|parsed| parsed.has_host())
}

/// Turn an application-relative URL (`~/upload/a.png`) into a root-relative one.
pub fn to_root_relative(url: &str, application_path: &str) -> String {
    let base = application_path.trim_end_matches('/');
    if let Some(rest) = url.strip_prefix("~/") {
        return format!("{base}/{rest}");
    }
    if url == "~" {
        return format!("{base}/");
    }
    url.to_string()
}

pub fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) || head.to_lowercase() == prefix.to_lowercase() {
        Some(&value[prefix.len()..])
    } else {
        None
    }
}

/// Decode one URL component: `+` becomes a space, `%XX` sequences are decoded.
pub fn decode_component(value: &str) -> String {
    let spaced = value.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// Token resolver backed by a fixed table of `{Name}` replacements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfiguredTokens {
    application_path: String,
    values: BTreeMap<String, String>,
}

impl Default for ConfiguredTokens {
    fn default() -> Self {
        Self::new(DEFAULT_APPLICATION_PATH, BTreeMap::new())
    }
}

impl ConfiguredTokens {
    pub fn new(application_path: impl Into<String>, values: BTreeMap<String, String>) -> Self {
        let mut values = values;
        values
            .entry(MANAGEMENT_URL_TOKEN.to_string())
            .or_insert_with(|| DEFAULT_MANAGEMENT_URL.to_string());
        Self {
            application_path: application_path.into(),
            values,
        }
    }

    fn replace_tokens(&self, url: &str) -> String {
        let mut output = String::with_capacity(url.len());
        let mut rest = url;
        while let Some(start) = rest.find('{') {
            output.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let Some(end) = after.find('}') else {
                output.push_str(&rest[start..]);
                rest = "";
                break;
            };
            let name = &after[..end];
            match self.values.get(name) {
                Some(value) => output.push_str(value),
                None => {
                    output.push('{');
                    output.push_str(name);
                    output.push('}');
                }
            }
            rest = &after[end + 1..];
        }
        output.push_str(rest);
        output
    }
}

impl TokenResolver for ConfiguredTokens {
    fn resolve_tokens(&self, url: &str) -> String {
        to_root_relative(&self.replace_tokens(url), &self.application_path)
    }
}
