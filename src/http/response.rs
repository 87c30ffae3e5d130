//! Response model: status line, headers and exactly one body.

use crate::{
    errors::Error,
    http::{
        compress::{CompressType, Compressor},
        headers::HeaderTable,
        types::{mime_for_path, StatusCode, Version, OCTET_STREAM},
    },
    io::pool::PooledBuf,
};
use serde::Serialize;
use std::{
    borrow::Cow,
    fmt, io,
    path::{Path, PathBuf},
};
use tokio::io::AsyncRead;

pub use write::WriteBuffer;

/// A handler-supplied byte source, sent with chunked framing.
pub type BodyStream = Box<dyn AsyncRead + Send + Unpin>;

/// Which body a [`Response`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    None,
    PlainText,
    Binary,
    Json,
    File,
    Stream,
}

#[derive(Default)]
pub(crate) enum Body {
    #[default]
    None,
    PlainText,
    Binary,
    Json,
    File(FileRef),
    Stream(BodyStream),
}

impl Body {
    pub(crate) fn kind(&self) -> BodyKind {
        match self {
            Body::None => BodyKind::None,
            Body::PlainText => BodyKind::PlainText,
            Body::Binary => BodyKind::Binary,
            Body::Json => BodyKind::Json,
            Body::File(_) => BodyKind::File,
            Body::Stream(_) => BodyKind::Stream,
        }
    }
}

/// A file to send as the response body, optionally a byte range of it.
///
/// # Examples
/// ```
/// use wireline::FileRef;
///
/// // bytes 100 through 199, both inclusive
/// let part = FileRef::new("static/video.mp4").range(100, 199);
/// assert_eq!(part.len_hint(), Some(100));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub(crate) path: PathBuf,
    pub(crate) range: Option<(u64, u64)>,
    pub(crate) via_send_file: bool,
}

impl FileRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            range: None,
            via_send_file: false,
        }
    }

    /// Restricts the body to the inclusive byte range `begin..=end`.
    pub fn range(mut self, begin: u64, end: u64) -> Self {
        self.range = Some((begin, end));
        self
    }

    /// Sends the whole file with `Content-Length` in one pass instead of
    /// chunked framing, when no compression applies.
    pub fn via_send_file(mut self, enabled: bool) -> Self {
        self.via_send_file = enabled;
        self
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Length of the selected range, when one is set and well-formed.
    pub fn len_hint(&self) -> Option<u64> {
        let (begin, end) = self.range?;
        end.checked_sub(begin).map(|n| n + 1)
    }
}

/// The response a handler fills in.
///
/// A response carries at most one body: once [`write`](Response::write),
/// [`write_json`](Response::write_json), [`write_file`](Response::write_file)
/// or any other body method succeeded, every further body call fails with
/// [`Error::AlreadyWritten`] until [`reset_body`](Response::reset_body).
///
/// # Examples
/// ```
/// use wireline::{Error, Response, StatusCode};
///
/// let mut resp = Response::new();
/// resp.status(StatusCode::Created).header("X-Request-Id", "42");
///
/// resp.write("created").unwrap();
/// assert_eq!(resp.write_json(&[1, 2, 3]), Err(Error::AlreadyWritten));
///
/// resp.reset_body();
/// resp.write_json(&[1, 2, 3]).unwrap();
/// assert_eq!(resp.headers().content_type(), Some("application/json"));
/// ```
pub struct Response {
    pub(crate) version: Version,
    pub(crate) status: StatusCode,
    pub(crate) reason: Option<Cow<'static, str>>,
    pub(crate) headers: HeaderTable,
    pub(crate) body: Body,
    pub(crate) buffer: PooledBuf,
    pub(crate) encoder: Option<Compressor>,
    pub(crate) compress: Option<CompressType>,
    pub(crate) min_compression_size: usize,
    pub(crate) compression_level: u32,
    no_compression: bool,
    /// `Content-Type` filled in by a body method, removed again by `reset_body`.
    default_type: Option<&'static str>,
}

impl Response {
    /// An empty `HTTP/1.1 200 OK` response, not tied to any pool.
    pub fn new() -> Self {
        Self::with_body_buffer(PooledBuf::detached(0))
    }

    pub(crate) fn with_body_buffer(buffer: PooledBuf) -> Self {
        Self {
            version: Version::Http11,
            status: StatusCode::Ok,
            reason: None,
            headers: HeaderTable::with_capacity(8),
            body: Body::None,
            buffer,
            encoder: None,
            compress: None,
            min_compression_size: 0,
            compression_level: 6,
            no_compression: false,
            default_type: None,
        }
    }

    #[inline]
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    /// Overrides the reason phrase sent after the status code.
    #[inline]
    pub fn status_text(&mut self, text: impl Into<Cow<'static, str>>) -> &mut Self {
        self.reason = Some(text.into());
        self
    }

    #[inline]
    pub fn version(&mut self, version: Version) -> &mut Self {
        self.version = version;
        self
    }

    /// Appends a header value.
    #[inline]
    pub fn header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        if name.eq_ignore_ascii_case("Content-Type") {
            self.default_type = None;
        }
        self.headers.add(name, value);
        self
    }

    #[inline]
    pub fn headers(&self) -> &HeaderTable {
        &self.headers
    }

    #[inline]
    pub fn headers_mut(&mut self) -> &mut HeaderTable {
        &mut self.headers
    }

    /// Ends the connection after this response.
    #[inline]
    pub fn close(&mut self) -> &mut Self {
        self.headers.set("Connection", "close");
        self
    }

    /// Sends this body uncompressed even if the client accepts a coding.
    ///
    /// Holds until [`reset_body`](Self::reset_body) or [`reset`](Self::reset).
    #[inline]
    pub fn no_compression(&mut self) -> &mut Self {
        self.no_compression = true;
        self
    }

    #[inline]
    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    /// The reason phrase that will be sent.
    pub fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or(self.status.reason())
    }

    #[inline]
    pub fn body_kind(&self) -> BodyKind {
        self.body.kind()
    }

    /// Buffered body bytes written so far.
    ///
    /// Empty for file and stream bodies, and for a compressed body before
    /// it is sent.
    #[inline]
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Sets a `text/plain` body.
    pub fn write<T: WriteBuffer>(&mut self, value: T) -> Result<(), Error> {
        self.claim(Body::PlainText, "text/plain")?;
        value.write_to(&mut self.buffer);
        self.maybe_compress()
    }

    /// Sets an `application/octet-stream` body.
    pub fn write_bytes(&mut self, data: impl AsRef<[u8]>) -> Result<(), Error> {
        self.claim(Body::Binary, OCTET_STREAM)?;
        self.buffer.extend_from_slice(data.as_ref());
        self.maybe_compress()
    }

    /// Serializes `value` as the `application/json` body.
    pub fn write_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Error> {
        self.claim(Body::Json, "application/json")?;
        serde_json::to_writer(&mut *self.buffer, value).map_err(io::Error::from)?;
        self.maybe_compress()
    }

    /// Sends a file, or a byte range of it, as the body.
    ///
    /// The file is opened when the response is sent.
    pub fn write_file(&mut self, file: FileRef) -> Result<(), Error> {
        let mime = mime_for_path(&file.path);
        self.claim(Body::File(file), mime)
    }

    /// Streams `stream` as the body with chunked framing.
    pub fn write_stream<R>(&mut self, stream: R) -> Result<(), Error>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.claim(Body::Stream(Box::new(stream)), OCTET_STREAM)
    }

    /// Drops the body so another one can be set.
    ///
    /// Status and headers stay, except a `Content-Type` that the body method
    /// filled in by default. [`no_compression`](Self::no_compression) is
    /// lifted.
    pub fn reset_body(&mut self) {
        self.body = Body::None;
        self.buffer.clear();
        self.no_compression = false;

        if self.encoder.take().is_some() {
            self.headers.del("Content-Encoding");
        }
        if let Some(default) = self.default_type.take() {
            if self.headers.content_type() == Some(default) {
                self.headers.del("Content-Type");
            }
        }
    }

    /// Back to the state of [`Response::new`], keeping allocations.
    pub fn reset(&mut self) {
        self.version = Version::Http11;
        self.status = StatusCode::Ok;
        self.reason = None;
        self.headers.clear();
        self.body = Body::None;
        self.buffer.clear();
        self.encoder = None;
        self.compress = None;
        self.no_compression = false;
        self.default_type = None;
    }

    fn claim(&mut self, body: Body, content_type: &'static str) -> Result<(), Error> {
        if !matches!(self.body, Body::None) {
            return Err(Error::AlreadyWritten);
        }

        if self.headers.content_type().is_none() {
            self.headers.set_content_type(Some(content_type));
            self.default_type = Some(content_type);
        }

        self.body = body;
        Ok(())
    }

    /// The coding to apply, if one was negotiated and not switched off.
    #[inline]
    pub(crate) fn negotiated(&self) -> Option<CompressType> {
        match self.no_compression {
            true => None,
            false => self.compress,
        }
    }

    /// Routes the buffered body through the encoder once it is big enough.
    fn maybe_compress(&mut self) -> Result<(), Error> {
        if self.encoder.is_some()
            || self.buffer.is_empty()
            || self.buffer.len() < self.min_compression_size
        {
            return Ok(());
        }

        if let Some(kind) = self.negotiated() {
            let mut encoder = self.start_compression(kind);
            encoder.write_all(&self.buffer)?;
            self.buffer.clear();
            self.encoder = Some(encoder);
        }

        Ok(())
    }

    /// Creates an encoder for `kind` and announces it in `Content-Encoding`.
    pub(crate) fn start_compression(&mut self, kind: CompressType) -> Compressor {
        let encoder = Compressor::new(kind, self.compression_level);
        self.headers.set("Content-Encoding", encoder.kind().as_str());
        self.headers.add("Vary", "Accept-Encoding");
        encoder
    }

    /// Flushes the encoder, leaving the compressed body in the buffer.
    pub(crate) fn finish_compression(&mut self) -> Result<(), Error> {
        if let Some(encoder) = self.encoder.take() {
            encoder.finish(&mut self.buffer)?;
        }
        Ok(())
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("version", &self.version)
            .field("status", &self.status)
            .field("reason", &self.reason())
            .field("headers", &self.headers)
            .field("body", &self.body.kind())
            .field("buffered", &self.buffer.len())
            .field("encoder", &self.encoder)
            .finish()
    }
}

/// Formats `n` in decimal into the tail of a fixed array.
///
/// Returns the array and the index of the first digit.
#[inline]
pub(crate) const fn number_to_bytes(mut n: u128) -> ([u8; 39], usize) {
    let mut buffer = [b'0'; 39];
    let mut i = 39;

    if n == 0 {
        return (buffer, 38);
    }

    while n > 0 {
        i -= 1;
        buffer[i] = b'0' + (n % 10) as u8;
        n /= 10;
    }

    (buffer, i)
}

pub mod write {
    use super::*;
    use std::{rc::Rc, sync::Arc};

    /// Values that can be written as a plain-text body.
    ///
    /// Implemented for strings, bytes, booleans, chars and integers.
    /// Floats are left out so their formatting stays the caller's choice.
    ///
    /// # Example
    /// ```
    /// use wireline::WriteBuffer;
    ///
    /// struct Celsius(i32);
    ///
    /// impl WriteBuffer for Celsius {
    ///     fn write_to(&self, buffer: &mut Vec<u8>) {
    ///         self.0.write_to(buffer);
    ///         buffer.extend_from_slice(" C".as_bytes());
    ///     }
    /// }
    /// ```
    pub trait WriteBuffer {
        /// Appends the value's representation to `buffer`.
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (bytes, $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let closure = $conn;
                    closure(self, buffer);
                }
            })*
        };
        (number($type:ty), $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conn(*self as $type, buffer);
                }
            })*
        };
    }

    impl<T: WriteBuffer + ?Sized> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl WriteBuffer for str {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self.as_bytes());
        }
    }
    impl WriteBuffer for [u8] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        bytes, |value: &str, buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value.as_bytes());
        } => String, Box<str>, Cow<'_, str>, Arc<str>, Rc<str>
    }
    impl_write_buffer! {
        bytes, |value: &[u8], buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value);
        } => Vec<u8>, Box<[u8]>, Cow<'_, [u8]>, Arc<[u8]>, Rc<[u8]>
    }
    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        number(u128), write_unsigned => u8, u16, u32, u64, u128, usize
    }
    impl_write_buffer! {
        number(i128), write_signed => i8, i16, i32, i64, i128, isize
    }
    impl WriteBuffer for bool {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(match self {
                true => b"true",
                false => b"false",
            });
        }
    }
    impl WriteBuffer for char {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            let mut buf = [0u8; 4];
            buffer.extend_from_slice(self.encode_utf8(&mut buf).as_bytes());
        }
    }

    #[inline(always)]
    pub(crate) fn write_unsigned(value: u128, buffer: &mut Vec<u8>) {
        let (arr, start) = number_to_bytes(value);
        buffer.extend_from_slice(&arr[start..]);
    }

    #[inline(always)]
    fn write_signed(value: i128, buffer: &mut Vec<u8>) {
        if value < 0 {
            buffer.push(b'-');
        }
        write_unsigned(value.unsigned_abs(), buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::compress::tests::decompress;

    #[test]
    fn defaults() {
        let resp = Response::new();
        assert_eq!(resp.status_code(), StatusCode::Ok);
        assert_eq!(resp.reason(), "OK");
        assert_eq!(resp.body_kind(), BodyKind::None);
        assert!(resp.headers().is_empty());
    }

    #[test]
    fn content_type_by_body() {
        let mut text = Response::new();
        text.write("ok").unwrap();

        let mut bytes = Response::new();
        bytes.write_bytes([0u8, 1, 2]).unwrap();

        let mut json = Response::new();
        json.write_json(&serde_json::json!({"a": 1})).unwrap();

        let mut file = Response::new();
        file.write_file(FileRef::new("site/index.html")).unwrap();

        let mut stream = Response::new();
        stream.write_stream(&b"abc"[..]).unwrap();

        #[rustfmt::skip]
        let cases = [
            (text,   BodyKind::PlainText, "text/plain",               &b"ok"[..]),
            (bytes,  BodyKind::Binary,    OCTET_STREAM,               &[0, 1, 2][..]),
            (json,   BodyKind::Json,      "application/json",         &br#"{"a":1}"#[..]),
            (file,   BodyKind::File,      "text/html; charset=utf-8", &b""[..]),
            (stream, BodyKind::Stream,    OCTET_STREAM,               &b""[..]),
        ];

        for (resp, kind, content_type, buffered) in cases {
            assert_eq!(resp.body_kind(), kind);
            assert_eq!(resp.headers().content_type(), Some(content_type), "{kind:?}");
            assert_eq!(resp.buffered(), buffered, "{kind:?}");
        }
    }

    #[test]
    fn explicit_content_type_wins() {
        let mut resp = Response::new();
        resp.headers_mut().set_content_type(Some("text/csv"));
        resp.write("a,b").unwrap();
        resp.reset_body();

        assert_eq!(resp.headers().content_type(), Some("text/csv"));
    }

    #[test]
    fn reset_body_keeps_handler_type() {
        let mut resp = Response::new();
        resp.write("<p>hi</p>").unwrap();
        resp.headers_mut().set_content_type(Some("text/html"));
        resp.reset_body();
        assert_eq!(resp.headers().content_type(), Some("text/html"));

        let mut resp = Response::new();
        resp.write_bytes(b"x").unwrap();
        resp.header("Content-Type", "image/png");
        resp.reset_body();
        assert_eq!(resp.headers().content_type(), Some("image/png"));
    }

    #[test]
    fn reset_body_lifts_opt_out() {
        let mut resp = Response::new();
        resp.compress = Some(CompressType::Gzip);
        resp.no_compression();
        assert_eq!(resp.negotiated(), None);

        resp.reset_body();
        assert_eq!(resp.negotiated(), Some(CompressType::Gzip));
    }

    #[test]
    fn single_body() {
        let mut resp = Response::new();
        resp.write("text").unwrap();

        assert_eq!(resp.write_json(&1), Err(Error::AlreadyWritten));
        assert_eq!(resp.write("again"), Err(Error::AlreadyWritten));
        assert_eq!(resp.write_bytes(b"x"), Err(Error::AlreadyWritten));
        assert_eq!(resp.write_file(FileRef::new("a")), Err(Error::AlreadyWritten));
        assert_eq!(resp.buffered(), b"text");

        resp.reset_body();
        assert_eq!(resp.headers().content_type(), None);
        resp.write_json(&"x").unwrap();
        assert_eq!(resp.buffered(), br#""x""#);
    }

    #[test]
    fn write_values() {
        #[rustfmt::skip]
        let cases: [(Box<dyn Fn(&mut Response) -> Result<(), Error>>, &[u8]); 6] = [
            (Box::new(|r: &mut Response| r.write("str")),               b"str"),
            (Box::new(|r: &mut Response| r.write(String::from("own"))), b"own"),
            (Box::new(|r: &mut Response| r.write(-120i32)),             b"-120"),
            (Box::new(|r: &mut Response| r.write(0u64)),                b"0"),
            (Box::new(|r: &mut Response| r.write(true)),                b"true"),
            (Box::new(|r: &mut Response| r.write(b"raw")),              b"raw"),
        ];

        for (write, expected) in cases {
            let mut resp = Response::new();
            write(&mut resp).unwrap();
            assert_eq!(resp.buffered(), expected);
        }
    }

    #[test]
    fn reset_matches_new() {
        let mut resp = Response::new();
        resp.status(StatusCode::NotFound)
            .status_text("Gone Fishing")
            .version(Version::Http10)
            .header("X-A", "1")
            .close();
        resp.compress = Some(CompressType::Gzip);
        resp.write("body").unwrap();

        resp.reset();
        let fresh = Response::new();

        assert_eq!(resp.status_code(), fresh.status_code());
        assert_eq!(resp.reason(), fresh.reason());
        assert_eq!(resp.version, fresh.version);
        assert_eq!(resp.headers(), fresh.headers());
        assert_eq!(resp.body_kind(), fresh.body_kind());
        assert_eq!(resp.buffered(), fresh.buffered());
        assert_eq!(resp.negotiated(), None);
    }

    #[test]
    fn compression_threshold() {
        #[rustfmt::skip]
        let cases = [
            (Some(CompressType::Gzip),   false, 10,   "short",                 false),
            (Some(CompressType::Gzip),   false, 4,    "long enough",           true),
            (Some(CompressType::Brotli), false, 0,    "any",                   true),
            (Some(CompressType::Gzip),   true,  0,    "opted out",             false),
            (None,                       false, 0,    "not negotiated",        false),
        ];

        for (compress, opt_out, min, body, compressed) in cases {
            let mut resp = Response::new();
            resp.compress = compress;
            resp.min_compression_size = min;
            if opt_out {
                resp.no_compression();
            }

            resp.write(body).unwrap();
            resp.finish_compression().unwrap();

            match compressed {
                true => {
                    let kind = compress.unwrap();
                    assert_eq!(resp.headers().get_first("Content-Encoding"), Some(kind.as_str()));
                    assert_eq!(decompress(kind, resp.buffered()), body.as_bytes());
                }
                false => {
                    assert!(!resp.headers().contains("Content-Encoding"), "{body}");
                    assert_eq!(resp.buffered(), body.as_bytes());
                }
            }
        }
    }

    #[test]
    fn reset_body_drops_encoding() {
        let mut resp = Response::new();
        resp.compress = Some(CompressType::Deflate);
        resp.write("compressed").unwrap();
        assert!(resp.headers().contains("content-encoding"));

        resp.reset_body();
        assert!(!resp.headers().contains("content-encoding"));
        assert!(resp.encoder.is_none());
    }

    #[test]
    fn file_ranges() {
        #[rustfmt::skip]
        let cases = [
            (FileRef::new("f").range(100, 199), Some(100)),
            (FileRef::new("f").range(0, 0),     Some(1)),
            (FileRef::new("f").range(5, 4),     None),
            (FileRef::new("f"),                 None),
        ];

        for (file, expected) in cases {
            assert_eq!(file.len_hint(), expected, "{file:?}");
        }
    }

    #[test]
    fn numbers() {
        #[rustfmt::skip]
        let cases: [(u128, &[u8]); 4] = [
            (0,          b"0"),
            (7,          b"7"),
            (1000,       b"1000"),
            (u64::MAX as u128, b"18446744073709551615"),
        ];

        for (n, expected) in cases {
            let (arr, start) = number_to_bytes(n);
            assert_eq!(&arr[start..], expected);
        }
    }
}
