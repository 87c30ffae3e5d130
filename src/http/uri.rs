//! Request-target parsing.

use memchr::{memchr, memrchr};
use std::{error, fmt};

/// A parsed request target.
///
/// Every component but the path is optional. The query string is kept
/// exactly as received; see [`crate::http::query`] for decoding it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Uri {
    pub scheme: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: String,
    pub query: Option<String>,
    pub fragment: Option<String>,
}

/// Why a target was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UriError {
    /// A byte outside the allowed character set.
    BadChar { byte: u8, index: usize },
    /// `%` not followed by two hex digits.
    BadEscape { index: usize },
    /// Decoded bytes are not UTF-8.
    BadUtf8,
    /// Unterminated `[` in an IPv6 host.
    BadHost,
    BadPort,
}

impl error::Error for UriError {}

impl fmt::Display for UriError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UriError::BadChar { byte, index } => {
                write!(f, "bad char 0x{byte:02x} in raw at {index}")
            }
            UriError::BadEscape { index } => write!(f, "bad percent escape at {index}"),
            UriError::BadUtf8 => f.write_str("decoded component is not UTF-8"),
            UriError::BadHost => f.write_str("unterminated IPv6 host"),
            UriError::BadPort => f.write_str("bad port value"),
        }
    }
}

static SAFE: [bool; 256] = {
    let mut table = [false; 256];
    let extra = b"-_.!~*'();/?:@&=+$,#%[]";

    let mut i = 0;
    while i < 256 {
        let b = i as u8;
        table[i] = b.is_ascii_alphanumeric();
        i += 1;
    }

    let mut i = 0;
    while i < extra.len() {
        table[extra[i] as usize] = true;
        i += 1;
    }

    table
};

/// Port implied by a well-known scheme.
pub fn default_port(scheme: &str) -> Option<u16> {
    Some(match scheme {
        "http" | "ws" => 80,
        "https" | "wss" => 443,
        "ftp" => 21,
        "mysql" => 3306,
        "redis" => 6379,
        "postgres" | "postgresql" => 5432,
        _ => return None,
    })
}

impl Uri {
    /// Parses `raw`.
    ///
    /// With `allow_authority`, `scheme://[user[:pass]@]host[:port]/path`
    /// and a bare `host[:port]` (the `CONNECT` form) are understood;
    /// otherwise the target is `[scheme:]path`.
    ///
    /// # Examples
    /// ```
    /// use wireline::Uri;
    ///
    /// let uri = Uri::parse("https://bob@example.com/a%20b?x=1#top", true).unwrap();
    /// assert_eq!(uri.scheme.as_deref(), Some("https"));
    /// assert_eq!(uri.username.as_deref(), Some("bob"));
    /// assert_eq!(uri.port, Some(443));
    /// assert_eq!(uri.path, "/a b");
    /// assert_eq!(uri.query.as_deref(), Some("x=1"));
    /// assert_eq!(uri.fragment.as_deref(), Some("top"));
    /// ```
    pub fn parse(raw: &str, allow_authority: bool) -> Result<Uri, UriError> {
        let bytes = raw.as_bytes();
        if let Some(index) = bytes.iter().position(|&b| !SAFE[b as usize]) {
            return Err(UriError::BadChar {
                byte: bytes[index],
                index,
            });
        }

        let mut uri = Uri::default();
        let mut rest = raw;

        if let Some(index) = memrchr(b'#', rest.as_bytes()) {
            uri.fragment = Some(unescape(&rest[index + 1..], false)?);
            rest = &rest[..index];
        }

        if let Some(index) = memchr(b'?', rest.as_bytes()) {
            uri.query = Some(rest[index + 1..].to_owned());
            rest = &rest[..index];
        }

        match (allow_authority, rest.find("://")) {
            (true, Some(index)) => {
                uri.scheme = Some(rest[..index].to_ascii_lowercase());
                uri.parse_hierarchy(&rest[index + 3..])?;
            }
            (true, None) if rest.starts_with("//") => uri.parse_hierarchy(&rest[2..])?,
            (true, None) if !rest.is_empty() && !rest.starts_with('/') => {
                uri.parse_authority(rest)?;
            }
            _ => {
                let path = match scheme_end(rest) {
                    Some(index) => {
                        uri.scheme = Some(rest[..index].to_ascii_lowercase());
                        &rest[index + 1..]
                    }
                    None => rest,
                };
                uri.path = unescape(path, false)?;
            }
        }

        if uri.port.is_none() && uri.host.is_some() {
            uri.port = uri.scheme.as_deref().and_then(default_port);
        }

        Ok(uri)
    }

    fn parse_hierarchy(&mut self, rest: &str) -> Result<(), UriError> {
        let (authority, path) = match memchr(b'/', rest.as_bytes()) {
            Some(index) => rest.split_at(index),
            None => (rest, "/"),
        };

        self.parse_authority(authority)?;
        self.path = unescape(path, false)?;
        Ok(())
    }

    fn parse_authority(&mut self, authority: &str) -> Result<(), UriError> {
        let host_port = match memrchr(b'@', authority.as_bytes()) {
            Some(index) => {
                let userinfo = &authority[..index];
                match memchr(b':', userinfo.as_bytes()) {
                    Some(colon) => {
                        self.username = Some(unescape(&userinfo[..colon], false)?);
                        self.password = Some(unescape(&userinfo[colon + 1..], false)?);
                    }
                    None => self.username = Some(unescape(userinfo, false)?),
                }
                &authority[index + 1..]
            }
            None => authority,
        };

        let (host, port) = match host_port.strip_prefix('[') {
            Some(literal) => {
                let close = memchr(b']', literal.as_bytes()).ok_or(UriError::BadHost)?;
                let port = match &literal[close + 1..] {
                    "" => None,
                    tail => Some(tail.strip_prefix(':').ok_or(UriError::BadPort)?),
                };
                (&literal[..close], port)
            }
            None => match memrchr(b':', host_port.as_bytes()) {
                Some(index) => (&host_port[..index], Some(&host_port[index + 1..])),
                None => (host_port, None),
            },
        };

        if !host.is_empty() {
            self.host = Some(unescape(host, false)?);
        }
        if let Some(port) = port {
            self.port = Some(port.parse().map_err(|_| UriError::BadPort)?);
        }

        Ok(())
    }
}

/// End of a `scheme:` prefix, if `rest` starts with one.
fn scheme_end(rest: &str) -> Option<usize> {
    let bytes = rest.as_bytes();
    if !bytes.first()?.is_ascii_alphabetic() {
        return None;
    }

    let index = memchr(b':', bytes)?;
    bytes[1..index]
        .iter()
        .all(|&b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'.'))
        .then_some(index)
}

/// Percent-decodes `raw`; `plus_as_space` also turns `+` into a space.
///
/// ```
/// use wireline::uri::unescape;
///
/// assert_eq!(unescape("a%20b+c", false).unwrap(), "a b+c");
/// assert_eq!(unescape("a%20b+c", true).unwrap(), "a b c");
/// assert!(unescape("%zz", false).is_err());
/// ```
pub fn unescape(raw: &str, plus_as_space: bool) -> Result<String, UriError> {
    let bytes = raw.as_bytes();
    if memchr(b'%', bytes).is_none() && !(plus_as_space && memchr(b'+', bytes).is_some()) {
        return Ok(raw.to_owned());
    }

    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hi = bytes.get(i + 1).and_then(|&b| hex_value(b));
                let lo = bytes.get(i + 2).and_then(|&b| hex_value(b));
                match (hi, lo) {
                    (Some(hi), Some(lo)) => out.push(hi << 4 | lo),
                    _ => return Err(UriError::BadEscape { index: i }),
                }
                i += 3;
            }
            b'+' if plus_as_space => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8(out).map_err(|_| UriError::BadUtf8)
}

#[inline]
const fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
