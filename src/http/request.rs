use crate::{
    errors::{Error, Limit, ProtocolError},
    http::{
        headers::HeaderTable,
        query::QueryParams,
        types::{parse_decimal, Method, Version},
        uri::{Uri, UriError},
    },
    io::{pool::PooledBuf, reader::BufferedReader},
    limits::ReqLimits,
};
use std::{sync::OnceLock, time::Duration};
use tokio::{io::AsyncRead, time::Instant};

/// A parsed HTTP request.
///
/// Owned by the connection and reused for every request it carries.
pub struct Request {
    pub(crate) method: Method,
    pub(crate) target: String,
    pub(crate) version: Version,
    pub(crate) headers: HeaderTable,
    pub(crate) uri: OnceLock<Result<Uri, UriError>>,
    pub(crate) body: PooledBuf,
}

impl Request {
    /// An empty `GET / HTTP/1.1` request, not tied to any pool.
    pub fn new() -> Self {
        Self::with_body_buffer(PooledBuf::detached(0))
    }

    pub(crate) fn with_body_buffer(body: PooledBuf) -> Self {
        Self {
            method: Method::Get,
            target: String::new(),
            version: Version::Http11,
            headers: HeaderTable::with_capacity(16),
            uri: OnceLock::new(),
            body,
        }
    }

    #[inline]
    pub fn method(&self) -> Method {
        self.method
    }

    /// The request target exactly as received.
    #[inline]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    #[inline]
    pub fn headers(&self) -> &HeaderTable {
        &self.headers
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The target parsed as a URI, computed at most once per request.
    pub fn uri(&self) -> Result<&Uri, &UriError> {
        self.uri
            .get_or_init(|| Uri::parse(&self.target, self.allows_authority()))
            .as_ref()
    }

    /// Decoded path, empty when the target did not parse.
    pub fn path(&self) -> &str {
        self.uri().map_or("", |uri| uri.path.as_str())
    }

    /// Raw query string, without the `?`.
    pub fn query(&self) -> Option<&str> {
        self.uri().ok()?.query.as_deref()
    }

    /// Query string split into decoded pairs.
    pub fn query_params(&self) -> Result<QueryParams, UriError> {
        QueryParams::parse(self.query().unwrap_or_default())
    }

    /// Host from an absolute target, else from the `Host` header.
    pub fn host(&self) -> Option<&str> {
        match self.uri() {
            Ok(Uri { host: Some(host), .. }) => Some(host.as_str()),
            _ => self.headers.get_last("Host"),
        }
    }

    #[inline]
    pub fn content_length(&self) -> Option<u64> {
        self.headers.content_length()
    }

    #[inline]
    fn allows_authority(&self) -> bool {
        self.method == Method::Connect || self.target.contains("://")
    }

    /// Back to the state of [`Request::new`], keeping allocations.
    pub fn reset(&mut self) {
        self.method = Method::Get;
        self.target.clear();
        self.version = Version::Http11;
        self.headers.clear();
        self.uri.take();
        self.body.clear();
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("target", &self.target)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .finish()
    }
}

//

/// Progress of the request being parsed; each state names what has been
/// read so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParseState {
    None,
    MethodRead,
    TargetRead,
    VersionRead,
    HeadersRead,
    BodyRead,
    Dispatched,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Parsed {
    /// A complete request is ready for the handler.
    Request,
    /// The peer closed the connection between requests.
    Closed,
}

/// Incremental request parser, one per connection.
#[derive(Debug)]
pub(crate) struct RequestParser {
    pub(crate) state: ParseState,
    first_line: usize,
    header_count: usize,
    started: Instant,
}

impl RequestParser {
    pub(crate) fn new() -> Self {
        Self {
            state: ParseState::None,
            first_line: 0,
            header_count: 0,
            started: Instant::now(),
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.state = ParseState::None;
        self.first_line = 0;
        self.header_count = 0;
    }

    /// Time left of `read_timeout` since the request started.
    #[inline]
    fn remaining(&self, read_timeout: Duration) -> Result<Option<Duration>, Error> {
        if read_timeout.is_zero() {
            return Ok(None);
        }

        read_timeout
            .checked_sub(self.started.elapsed())
            .filter(|left| !left.is_zero())
            .map(Some)
            .ok_or(Error::ReadTimeout)
    }

    /// Request-line bytes still allowed, `0` meaning unlimited.
    #[inline]
    fn first_line_budget(&self, limits: &ReqLimits) -> Result<usize, Error> {
        match limits.first_line_size {
            0 => Ok(0),
            max if self.first_line >= max => Err(Error::LimitExceeded(Limit::FirstLine)),
            max => Ok(max - self.first_line),
        }
    }

    /// Drives the state machine until a whole request sits in `req`.
    ///
    /// `line` is scratch space for one line at a time. Returns
    /// [`Parsed::Closed`] when the peer hangs up before sending a byte of
    /// the next request.
    pub(crate) async fn parse<S: AsyncRead + Unpin>(
        &mut self,
        reader: &mut BufferedReader<S>,
        req: &mut Request,
        line: &mut Vec<u8>,
        limits: &ReqLimits,
        read_timeout: Duration,
    ) -> Result<Parsed, Error> {
        loop {
            match self.state {
                ParseState::None => {
                    self.started = Instant::now();
                    let max = self.first_line_budget(limits)?;

                    match reader.read_until(line, b' ', self.remaining(read_timeout)?, max).await {
                        Ok(()) => {}
                        Err(Error::UnexpectedEof) if line.is_empty() => return Ok(Parsed::Closed),
                        Err(err) => return Err(err.with_limit(Limit::FirstLine)),
                    }

                    self.first_line += line.len();
                    req.method = Method::from_bytes(strip_last(line))?;
                    self.state = ParseState::MethodRead;
                }
                ParseState::MethodRead => {
                    let max = self.first_line_budget(limits)?;
                    reader
                        .read_until(line, b' ', self.remaining(read_timeout)?, max)
                        .await
                        .map_err(|err| err.with_limit(Limit::FirstLine))?;

                    self.first_line += line.len();
                    let raw = simdutf8::basic::from_utf8(strip_last(line))
                        .map_err(|_| ProtocolError::InvalidEncoding)?;

                    req.target.clear();
                    match (raw.is_empty(), req.method) {
                        (true, Method::Connect) => {
                            return Err(ProtocolError::InvalidTarget(UriError::BadHost).into())
                        }
                        (true, _) => req.target.push('/'),
                        (false, _) => req.target.push_str(raw),
                    }

                    let uri = Uri::parse(&req.target, req.allows_authority())
                        .map_err(ProtocolError::InvalidTarget)?;
                    let acceptable = match req.method {
                        Method::Connect => uri.host.is_some(),
                        _ => !uri.path.is_empty() || uri.host.is_some(),
                    };
                    if !acceptable {
                        return Err(ProtocolError::InvalidTarget(UriError::BadHost).into());
                    }

                    req.uri = OnceLock::from(Ok(uri));
                    self.state = ParseState::TargetRead;
                }
                ParseState::TargetRead => {
                    let max = self.first_line_budget(limits)?;
                    reader
                        .read_until(line, b'\n', self.remaining(read_timeout)?, max)
                        .await
                        .map_err(|err| err.with_limit(Limit::FirstLine))?;

                    self.first_line += line.len();
                    let raw = strip_last(line);
                    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);

                    req.version = Version::from_bytes(raw)?;
                    self.state = ParseState::VersionRead;
                }
                ParseState::VersionRead => {
                    let text = reader
                        .read_line(line, self.remaining(read_timeout)?, limits.header_line_size)
                        .await
                        .map_err(|err| err.with_limit(Limit::HeaderLine))?;
                    let text = text.trim_end_matches(['\r', '\n']);

                    if text.is_empty() {
                        self.state = ParseState::HeadersRead;
                        continue;
                    }

                    self.header_count += 1;
                    if limits.header_count != 0 && self.header_count > limits.header_count {
                        return Err(Error::LimitExceeded(Limit::HeaderCount));
                    }

                    let (name, value) = text.split_once(':').ok_or(ProtocolError::MissingColon)?;
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(ProtocolError::EmptyHeaderName.into());
                    }

                    req.headers.add(name, value.trim());
                }
                ParseState::HeadersRead => {
                    if req.headers.contains("Transfer-Encoding") {
                        return Err(ProtocolError::UnsupportedTransferEncoding.into());
                    }

                    if let Some(value) = req.headers.get_last("Content-Length") {
                        let length = parse_decimal(value.trim().as_bytes())
                            .and_then(|length| usize::try_from(length).ok())
                            .ok_or(ProtocolError::InvalidContentLength)?;

                        if length > 0 {
                            if limits.body_size != 0 && length > limits.body_size {
                                return Err(Error::LimitExceeded(Limit::Body));
                            }

                            req.body.clear();
                            req.body.resize(length, 0);
                            reader
                                .read_exactly(&mut req.body, self.remaining(read_timeout)?)
                                .await?;
                        }
                    }

                    self.state = ParseState::BodyRead;
                }
                ParseState::BodyRead => return Ok(Parsed::Request),
                ParseState::Dispatched => {
                    req.reset();
                    self.reset();
                }
            }
        }
    }
}

/// `line` without its trailing delimiter.
#[inline]
fn strip_last(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((_, rest)) => rest,
        None => line,
    }
}
