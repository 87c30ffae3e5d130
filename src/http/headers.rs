//! Case-insensitive header multimap.

use crate::http::{compress::CompressType, types::parse_decimal};

/// Header names mapped to their values in insertion order.
///
/// Names compare ASCII case-insensitively and keep the spelling of their
/// first insertion. Lookups are linear, which beats hashing for the few
/// dozen headers a request carries.
///
/// # Examples
/// ```
/// use wireline::HeaderTable;
///
/// let mut headers = HeaderTable::new();
/// headers.add("X-Foo", "1");
/// headers.add("x-foo", "2");
///
/// assert_eq!(headers.get_all("X-FOO"), ["1", "2"]);
/// assert_eq!(headers.get_last("x-Foo"), Some("2"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderTable {
    entries: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    name: String,
    values: Vec<String>,
}

impl HeaderTable {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    #[inline]
    fn entry_mut(&mut self, name: &str) -> Option<&mut Entry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    /// Appends `value` to the values of `name`.
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entry_mut(name) {
            Some(entry) => entry.values.push(value),
            None => self.entries.push(Entry {
                name: name.to_owned(),
                values: vec![value],
            }),
        }
    }

    /// Replaces every value of `name` with `value`.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entry_mut(name) {
            Some(entry) => {
                entry.values.clear();
                entry.values.push(value);
            }
            None => self.entries.push(Entry {
                name: name.to_owned(),
                values: vec![value],
            }),
        }
    }

    #[inline]
    pub fn get_first(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    #[inline]
    pub fn get_last(&self, name: &str) -> Option<&str> {
        self.get_all(name).last().map(String::as_str)
    }

    /// Every value of `name`, oldest first; empty when absent.
    #[inline]
    pub fn get_all(&self, name: &str) -> &[String] {
        match self.entry(name) {
            Some(entry) => &entry.values,
            None => &[],
        }
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    /// Removes `name`, returning whether it was present.
    pub fn del(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|entry| !entry.name.eq_ignore_ascii_case(name));
        before != self.entries.len()
    }

    /// Calls `f` once per header name, in first-insertion order.
    pub fn each(&self, mut f: impl FnMut(&str, &[String])) {
        for entry in &self.entries {
            f(&entry.name, &entry.values);
        }
    }

    /// Iterates `(name, value)` pairs, one per value.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().flat_map(|entry| {
            entry
                .values
                .iter()
                .map(move |value| (entry.name.as_str(), value.as_str()))
        })
    }

    /// Number of distinct names.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Whether any comma-separated value of `name` equals `token`,
    /// ignoring case.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .iter()
            .flat_map(|value| value.split(','))
            .any(|part| part.trim().eq_ignore_ascii_case(token))
    }

    // typed accessors

    /// The last `Content-Length` value, if it is a valid non-negative integer.
    pub fn content_length(&self) -> Option<u64> {
        parse_decimal(self.get_last("Content-Length")?.trim().as_bytes())
    }

    /// Sets `Content-Length`, or removes it with `None`.
    pub fn set_content_length(&mut self, length: Option<u64>) {
        match length {
            Some(length) => self.set("Content-Length", length.to_string()),
            None => {
                self.del("Content-Length");
            }
        }
    }

    #[inline]
    pub fn content_type(&self) -> Option<&str> {
        self.get_last("Content-Type")
    }

    /// Sets `Content-Type`; `None` or an empty string removes it.
    pub fn set_content_type(&mut self, content_type: Option<&str>) {
        match content_type {
            Some(value) if !value.is_empty() => self.set("Content-Type", value),
            _ => {
                self.del("Content-Type");
            }
        }
    }

    /// First supported coding listed in `Accept-Encoding`.
    ///
    /// Parameters such as `;q=0.5` are ignored and `*` means gzip.
    pub fn accepted_compress_type(&self) -> Option<CompressType> {
        self.get_all("Accept-Encoding")
            .iter()
            .flat_map(|value| value.split(','))
            .map(|part| part.split(';').next().unwrap_or_default().trim())
            .find_map(|coding| match coding.to_ascii_lowercase().as_str() {
                "gzip" | "*" => Some(CompressType::Gzip),
                "deflate" => Some(CompressType::Deflate),
                "br" => Some(CompressType::Brotli),
                _ => None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_and_case() {
        let mut headers = HeaderTable::new();
        headers.add("X-Foo", "v1");
        headers.add("Host", "example.com");
        headers.add("x-foo", "v2");
        headers.add("X-FOO", "v3");

        assert_eq!(headers.get_all("X-FOO"), ["v1", "v2", "v3"]);
        assert_eq!(headers.get_first("x-foo"), Some("v1"));
        assert_eq!(headers.get_last("x-foo"), Some("v3"));
        assert_eq!(headers.len(), 2);

        let mut names = Vec::new();
        headers.each(|name, values| names.push((name.to_owned(), values.len())));
        assert_eq!(names, [("X-Foo".to_owned(), 3), ("Host".to_owned(), 1)]);
    }

    #[test]
    fn set_and_del() {
        let mut headers = HeaderTable::new();
        headers.add("Vary", "a");
        headers.add("Vary", "b");
        headers.set("vary", "c");
        assert_eq!(headers.get_all("Vary"), ["c"]);

        assert!(headers.del("VARY"));
        assert!(!headers.del("vary"));
        assert!(headers.get_all("vary").is_empty());
        assert_eq!(headers.get_first("vary"), None);
    }

    #[test]
    fn content_length() {
        #[rustfmt::skip]
        let cases: [(&[&str], Option<u64>); 6] = [
            (&[],            None),
            (&["42"],        Some(42)),
            (&["1", " 7 "],  Some(7)),
            (&["-1"],        None),
            (&["abc"],       None),
            (&["0"],         Some(0)),
        ];

        for (values, expected) in cases {
            let mut headers = HeaderTable::new();
            for value in values {
                headers.add("content-length", *value);
            }
            assert_eq!(headers.content_length(), expected, "{values:?}");
        }

        let mut headers = HeaderTable::new();
        headers.set_content_length(Some(10));
        assert_eq!(headers.get_all("Content-Length"), ["10"]);
        headers.set_content_length(None);
        assert!(!headers.contains("content-length"));
    }

    #[test]
    fn content_type() {
        let mut headers = HeaderTable::new();
        headers.set_content_type(Some("text/html"));
        assert_eq!(headers.content_type(), Some("text/html"));

        headers.set_content_type(Some(""));
        assert_eq!(headers.content_type(), None);

        headers.set_content_type(Some("a/b"));
        headers.set_content_type(None);
        assert_eq!(headers.content_type(), None);
    }

    #[test]
    fn accept_encoding() {
        #[rustfmt::skip]
        let cases: [(&[&str], Option<CompressType>); 8] = [
            (&[],                              None),
            (&["identity"],                    None),
            (&["gzip, deflate, br"],           Some(CompressType::Gzip)),
            (&["br;q=1.0, gzip;q=0.8"],        Some(CompressType::Brotli)),
            (&["identity", "DEFLATE"],         Some(CompressType::Deflate)),
            (&["*"],                           Some(CompressType::Gzip)),
            (&["compress, x-gzip"],            None),
            (&[" BR "],                        Some(CompressType::Brotli)),
        ];

        for (values, expected) in cases {
            let mut headers = HeaderTable::new();
            for value in values {
                headers.add("Accept-Encoding", *value);
            }
            assert_eq!(headers.accepted_compress_type(), expected, "{values:?}");
        }
    }

    #[test]
    fn tokens() {
        let mut headers = HeaderTable::new();
        headers.add("Connection", "keep-alive, Upgrade");
        assert!(headers.has_token("connection", "upgrade"));
        assert!(!headers.has_token("connection", "close"));
    }
}
