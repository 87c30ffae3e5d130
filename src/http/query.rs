//! Query string splitting and decoding.

use crate::http::uri::{unescape, UriError};
use memchr::memchr;

/// Decoded `name=value` pairs of a query string, in order.
///
/// Pairs are split on `&`, names and values are percent-decoded with `+`
/// read as a space. A segment without `=` yields an empty value.
///
/// # Examples
/// ```
/// use wireline::query::QueryParams;
///
/// let params = QueryParams::parse("?name=J%C3%BCrgen+K&flag&tag=a&tag=b").unwrap();
/// assert_eq!(params.get("name"), Some("Jürgen K"));
/// assert_eq!(params.get("flag"), Some(""));
/// assert_eq!(params.get_all("tag").collect::<Vec<_>>(), ["a", "b"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    /// Parses `query`, with or without the leading `?`.
    pub fn parse(query: &str) -> Result<Self, UriError> {
        let data = query.strip_prefix('?').unwrap_or(query);
        let mut pairs = Vec::new();

        let mut start = 0;
        while start < data.len() {
            let end = memchr(b'&', &data.as_bytes()[start..])
                .map(|pos| start + pos)
                .unwrap_or(data.len());

            let segment = &data[start..end];
            start = end + 1;

            if segment.is_empty() {
                continue;
            }

            let (name, value) = match memchr(b'=', segment.as_bytes()) {
                Some(index) => (&segment[..index], &segment[index + 1..]),
                None => (segment, ""),
            };

            pairs.push((unescape(name, true)?, unescape(value, true)?));
        }

        Ok(Self { pairs })
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Every value of `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic() {
        let cases = ["a=1&b=2", "?a=1&b=2"];

        for line in cases {
            let params = QueryParams::parse(line).unwrap();

            assert_eq!(params.len(), 2);
            assert_eq!(params.iter().collect::<Vec<_>>(), [("a", "1"), ("b", "2")]);
        }
    }

    #[test]
    fn full() {
        let params = QueryParams::parse("flag&empty=&=val&&key=va%3Dlue+x").unwrap();

        #[rustfmt::skip]
        let expected = [
            ("flag",  ""),
            ("empty", ""),
            ("",      "val"),
            ("key",   "va=lue x"),
        ];
        assert_eq!(params.iter().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn lookup() {
        let params = QueryParams::parse("tag=a&id=7&tag=b").unwrap();

        // the value outlives the name it was looked up with
        let first = {
            let name = String::from("tag");
            params.get(&name)
        };
        assert_eq!(first, Some("a"));
        assert_eq!(params.get("id"), Some("7"));
        assert_eq!(params.get("missing"), None);
        assert_eq!(params.get_all("tag").collect::<Vec<_>>(), ["a", "b"]);
    }

    #[test]
    fn empty_and_errors() {
        assert!(QueryParams::parse("").unwrap().is_empty());
        assert!(QueryParams::parse("?").unwrap().is_empty());
        assert_eq!(
            QueryParams::parse("a=%zz"),
            Err(UriError::BadEscape { index: 0 })
        );
    }
}
