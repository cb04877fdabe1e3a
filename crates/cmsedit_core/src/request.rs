use url::form_urlencoded;

/// Query-string and form parameters of one inbound editing request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParams {
    query: Vec<(String, String)>,
    form: Vec<(String, String)>,
}

/// A UI container that can hand out the request of the page hosting it.
pub trait RequestHost {
    fn request(&self) -> &RequestParams;
}

impl RequestHost for RequestParams {
    fn request(&self) -> &RequestParams {
        self
    }
}

impl RequestParams {
    /// Parse a raw query string. A leading `?` is ignored.
    pub fn parse_query(raw: &str) -> Self {
        Self {
            query: parse_pairs(raw),
            form: Vec::new(),
        }
    }

    /// Parse the query part of a URL such as `/edit?selected=%2Fnews%2F#top`.
    pub fn from_url(url: &str) -> Self {
        let without_fragment = url.split_once('#').map_or(url, |(head, _)| head);
        match without_fragment.split_once('?') {
            Some((_, query)) => Self::parse_query(query),
            None => Self::default(),
        }
    }

    pub fn with_form(mut self, raw: &str) -> Self {
        self.form = parse_pairs(raw);
        self
    }

    /// Lookup across query string then form. Keys compare case-insensitively,
    /// the first value wins.
    pub fn get(&self, key: &str) -> Option<&str> {
        find(&self.query, key).or_else(|| find(&self.form, key))
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        find(&self.query, key)
    }

    /// Like [`RequestParams::get`] but treats an empty value as absent.
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|value| !value.is_empty())
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn is_empty(&self) -> bool {
        self.query.is_empty() && self.form.is_empty()
    }
}

fn parse_pairs(raw: &str) -> Vec<(String, String)> {
    let raw = raw.strip_prefix('?').unwrap_or(raw);
    form_urlencoded::parse(raw.as_bytes())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

fn find<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(key))
        .map(|(_, value)| value.as_str())
}

#[cfg(test)]
mod tests {
    use super::RequestParams;

    #[test]
    fn parse_query_decodes_values_and_keeps_order() {
        let request = RequestParams::parse_query("?selected=%2Fnews%2F&memory=/about/&selected=/other/");
        assert_eq!(request.get("selected"), Some("/news/"));
        assert_eq!(request.get("memory"), Some("/about/"));
        assert_eq!(request.query_pairs().len(), 3);
    }

    #[test]
    fn get_is_case_insensitive_and_falls_back_to_form() {
        let request = RequestParams::parse_query("SelectedUrl=/a.html").with_form("item=7");
        assert_eq!(request.get("selectedUrl"), Some("/a.html"));
        assert_eq!(request.get("item"), Some("7"));
        assert_eq!(request.query("item"), None);
    }

    #[test]
    fn non_empty_ignores_blank_values() {
        let request = RequestParams::parse_query("selected=&item=3");
        assert_eq!(request.get("selected"), Some(""));
        assert_eq!(request.non_empty("selected"), None);
        assert_eq!(request.non_empty("item"), Some("3"));
    }

    #[test]
    fn from_url_reads_only_the_query_part() {
        let request = RequestParams::from_url("/manage/edit.html?selected=/news/#details");
        assert_eq!(request.get("selected"), Some("/news/"));
        assert!(RequestParams::from_url("/manage/edit.html").is_empty());
    }
}
