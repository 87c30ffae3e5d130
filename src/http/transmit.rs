//! Writes a [`Response`] to the wire.
//!
//! The body decides the framing:
//! - buffered bodies go out with `Content-Length` in one write,
//! - files small enough for one read are buffered as well,
//! - larger files and handler streams use chunked framing,
//! - a file marked `via_send_file` is copied raw after a `Content-Length` head.
//!
//! HTTP/1.0 clients never see chunked framing: sized bodies go out with
//! `Content-Length`, the rest is delimited by closing the connection.
//! `1xx`, `204` and `304` responses are sent as a bare head.

use crate::{
    errors::{Error, IoError},
    http::{
        compress::Compressor,
        context::RequestContext,
        response::{write::write_unsigned, Body, FileRef, Response},
        types::{Method, StatusCode, Version},
    },
};
use std::{
    io::{self, SeekFrom, Write},
    mem,
    time::{Duration, SystemTime},
};
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt},
};

/// Bodies up to this size share one write with the head.
const INLINE_BODY: usize = 8 * 1024;

impl RequestContext {
    /// Sends the response; the body is consumed.
    pub(crate) async fn send_response<W: AsyncWrite + Unpin>(
        &mut self,
        io: &mut W,
        write_timeout: Duration,
    ) -> Result<(), Error> {
        let body = mem::take(&mut self.response.body);
        if !self.response.status.allows_body() {
            return self.send_bodiless(io, write_timeout).await;
        }

        match body {
            Body::File(file) => self.send_file(io, file, write_timeout).await,
            Body::Stream(mut stream) => self.send_chunked(io, &mut stream, write_timeout).await,
            _ => self.send_buffered(io, write_timeout).await,
        }
    }

    #[inline]
    fn head_only(&self) -> bool {
        self.request.method == Method::Head
    }

    #[inline]
    fn chunked_allowed(&self) -> bool {
        self.request.version >= Version::Http11
    }

    async fn send_bodiless<W: AsyncWrite + Unpin>(
        &mut self,
        io: &mut W,
        timeout: Duration,
    ) -> Result<(), Error> {
        self.response.reset_body();
        self.response.headers.set_content_length(None);
        self.response.headers.del("Transfer-Encoding");

        encode_head(&mut self.response, &mut self.line);
        write_timed(io, &self.line, timeout).await?;
        flush_timed(io, timeout).await
    }

    async fn send_buffered<W: AsyncWrite + Unpin>(
        &mut self,
        io: &mut W,
        timeout: Duration,
    ) -> Result<(), Error> {
        self.response.finish_compression()?;

        let len = self.response.buffer.len();
        self.response.headers.set_content_length(Some(len as u64));
        encode_head(&mut self.response, &mut self.line);

        let body: &[u8] = match self.head_only() {
            true => &[],
            false => &self.response.buffer,
        };

        if body.len() <= INLINE_BODY {
            self.line.extend_from_slice(body);
            write_timed(io, &self.line, timeout).await?;
        } else {
            write_timed(io, &self.line, timeout).await?;
            write_timed(io, body, timeout).await?;
        }

        flush_timed(io, timeout).await
    }

    async fn send_file<W: AsyncWrite + Unpin>(
        &mut self,
        io: &mut W,
        file: FileRef,
        timeout: Duration,
    ) -> Result<(), Error> {
        let mut handle = File::open(&file.path).await?;
        let size = handle.metadata().await?.len();

        if let Some((begin, end)) = file.range {
            if end < begin || end >= size {
                return Err(Error::BadRange { begin, end, size });
            }

            let len = end - begin + 1;
            self.response
                .headers
                .set("Content-Range", format!("bytes {begin}-{end}/{size}"));
            if self.response.status == StatusCode::Ok {
                self.response.status = StatusCode::PartialContent;
            }

            handle.seek(SeekFrom::Start(begin)).await?;
            return self.send_sized(io, handle.take(len), len, timeout).await;
        }

        if file.via_send_file && self.response.negotiated().is_none() {
            return self.send_raw(io, handle, size, timeout).await;
        }

        self.send_sized(io, handle, size, timeout).await
    }

    /// Buffers `reader` when `len` fits one read, streams it otherwise.
    async fn send_sized<W, R>(
        &mut self,
        io: &mut W,
        mut reader: R,
        len: u64,
        timeout: Duration,
    ) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin,
        R: AsyncRead + Unpin,
    {
        if len > self.read_size as u64 {
            if !self.chunked_allowed() && self.response.negotiated().is_none() {
                return self.send_raw(io, reader, len, timeout).await;
            }
            return self.send_chunked(io, &mut reader, timeout).await;
        }

        self.response.buffer.clear();
        reader.read_to_end(&mut self.response.buffer).await?;

        if let Some(kind) = self.response.negotiated() {
            let mut encoder = self.response.start_compression(kind);
            encoder.write_all(&self.response.buffer)?;
            self.response.buffer.clear();
            self.response.encoder = Some(encoder);
        }

        self.send_buffered(io, timeout).await
    }

    /// `Content-Length` head followed by `size` bytes of `reader` copied as is.
    async fn send_raw<W, R>(
        &mut self,
        io: &mut W,
        mut reader: R,
        size: u64,
        timeout: Duration,
    ) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin,
        R: AsyncRead + Unpin,
    {
        self.response.headers.set_content_length(Some(size));
        encode_head(&mut self.response, &mut self.line);
        write_timed(io, &self.line, timeout).await?;
        flush_timed(io, timeout).await?;

        if self.head_only() {
            return Ok(());
        }

        let mut left = size;
        while left > 0 {
            let want = (self.read_size as u64).min(left) as usize;
            self.scratch.resize(want, 0);

            let n = reader.read(&mut self.scratch[..want]).await?;
            if n == 0 {
                return Err(Error::UnexpectedEof);
            }

            write_timed(io, &self.scratch[..n], timeout).await?;
            left -= n as u64;
        }

        flush_timed(io, timeout).await
    }

    /// Streams `reader` with chunked framing, compressing when negotiated.
    ///
    /// Without compression every read becomes one chunk. With it, encoder
    /// output collects in the body buffer and is framed whenever it
    /// reaches the read size. For an HTTP/1.0 client the same pieces go out
    /// unframed and the connection is closed after them.
    async fn send_chunked<W, R>(
        &mut self,
        io: &mut W,
        reader: &mut R,
        timeout: Duration,
    ) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin,
        R: AsyncRead + Unpin + ?Sized,
    {
        let read_size = self.read_size;
        let mut encoder: Option<Compressor> = self
            .response
            .negotiated()
            .map(|kind| self.response.start_compression(kind));

        let framed = self.chunked_allowed();
        self.response.headers.set_content_length(None);
        if framed {
            self.response.headers.set("Transfer-Encoding", "chunked");
        } else {
            self.response.headers.del("Transfer-Encoding");
            if !self.response.headers.has_token("Connection", "close") {
                self.response.close();
            }
        }
        encode_head(&mut self.response, &mut self.line);
        write_timed(io, &self.line, timeout).await?;

        if self.head_only() {
            return flush_timed(io, timeout).await;
        }

        let pending = &mut self.response.buffer;
        pending.clear();

        loop {
            self.scratch.resize(read_size, 0);
            let n = reader.read(&mut self.scratch[..read_size]).await?;
            if n == 0 {
                break;
            }

            match &mut encoder {
                None => write_chunk(io, &self.scratch[..n], &mut self.line, framed, timeout).await?,
                Some(encoder) => {
                    encoder.write_all(&self.scratch[..n])?;
                    if encoder.pending() >= read_size {
                        pending.clear();
                        encoder.drain_into(pending);
                        write_chunk(io, pending, &mut self.line, framed, timeout).await?;
                    }
                }
            }
        }

        if let Some(encoder) = encoder {
            pending.clear();
            encoder.finish(pending)?;
            write_chunk(io, pending, &mut self.line, framed, timeout).await?;
        }

        if framed {
            write_timed(io, b"0\r\n\r\n", timeout).await?;
        }
        flush_timed(io, timeout).await
    }
}

/// Stamps `Date` and serializes the status line and headers into `dst`.
fn encode_head(resp: &mut Response, dst: &mut Vec<u8>) {
    resp.headers
        .set("Date", httpdate::fmt_http_date(SystemTime::now()));

    dst.clear();
    dst.extend_from_slice(resp.version.as_str().as_bytes());
    dst.push(b' ');
    write_unsigned(resp.status.as_u16() as u128, dst);
    dst.push(b' ');
    dst.extend_from_slice(resp.reason().as_bytes());
    dst.extend_from_slice(b"\r\n");

    for (name, value) in resp.headers.iter() {
        dst.extend_from_slice(name.as_bytes());
        dst.extend_from_slice(b": ");
        dst.extend_from_slice(value.as_bytes());
        dst.extend_from_slice(b"\r\n");
    }
    dst.extend_from_slice(b"\r\n");
}

/// Writes `data` as one chunk, or bare when not `framed`; empty data
/// writes nothing.
async fn write_chunk<W: AsyncWrite + Unpin>(
    io: &mut W,
    data: &[u8],
    frame: &mut Vec<u8>,
    framed: bool,
    timeout: Duration,
) -> Result<(), Error> {
    if data.is_empty() {
        return Ok(());
    }
    if !framed {
        return write_timed(io, data, timeout).await;
    }

    frame.clear();
    write!(frame, "{:X}\r\n", data.len())?;
    frame.extend_from_slice(data);
    frame.extend_from_slice(b"\r\n");

    write_timed(io, frame, timeout).await
}

#[inline]
fn write_timeout() -> Error {
    Error::Io(IoError(io::Error::new(io::ErrorKind::TimedOut, "write timeout")))
}

async fn write_timed<W: AsyncWrite + Unpin>(
    io: &mut W,
    data: &[u8],
    timeout: Duration,
) -> Result<(), Error> {
    match timeout.is_zero() {
        true => io.write_all(data).await?,
        false => tokio::time::timeout(timeout, io.write_all(data))
            .await
            .map_err(|_| write_timeout())??,
    }
    Ok(())
}

async fn flush_timed<W: AsyncWrite + Unpin>(io: &mut W, timeout: Duration) -> Result<(), Error> {
    match timeout.is_zero() {
        true => io.flush().await?,
        false => tokio::time::timeout(timeout, io.flush())
            .await
            .map_err(|_| write_timeout())??,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        http::compress::{tests::decompress, CompressType},
        tools::{context, decode_chunked, split_response, temp_file},
    };

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn send(ctx: &mut RequestContext) -> (String, Vec<u8>) {
        let mut out = Vec::new();
        ctx.send_response(&mut out, TIMEOUT).await.unwrap();
        split_response(&out)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn plain_text() {
        let mut ctx = context();
        ctx.response.write("ok").unwrap();

        let (head, body) = send(&mut ctx).await;
        assert!(head.starts_with(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\nDate: "
        ));
        assert!(head.ends_with(" GMT\r\n\r\n"));
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn empty_and_custom_status() {
        let mut ctx = context();
        ctx.response
            .status(StatusCode::NotFound)
            .status_text("Nothing Here")
            .header("X-Trace", "abc");

        let (head, body) = send(&mut ctx).await;
        assert!(head.starts_with("HTTP/1.1 404 Nothing Here\r\nX-Trace: abc\r\nContent-Length: 0\r\n"));
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn head_request_has_no_body() {
        let mut ctx = context();
        ctx.request.method = Method::Head;
        ctx.response.write("hidden").unwrap();

        let (head, body) = send(&mut ctx).await;
        assert!(head.contains("Content-Length: 6\r\n"));
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn large_buffered_body() {
        let data = pattern(INLINE_BODY * 3);
        let mut ctx = context();
        ctx.response.write_bytes(&data).unwrap();

        let (head, body) = send(&mut ctx).await;
        assert!(head.contains(&format!("Content-Length: {}\r\n", data.len())));
        assert_eq!(body, data);
    }

    #[tokio::test]
    async fn compressed_buffered_body() {
        let text = "compress me ".repeat(200);
        let mut ctx = context();
        ctx.request.headers.add("Accept-Encoding", "gzip");
        ctx.prepare(&crate::limits::RespLimits {
            enable_compression: true,
            ..Default::default()
        });
        ctx.response.write(text.as_str()).unwrap();

        let (head, body) = send(&mut ctx).await;
        assert!(head.contains("Content-Encoding: gzip\r\n"));
        assert!(head.contains(&format!("Content-Length: {}\r\n", body.len())));
        assert!(body.len() < text.len());
        assert_eq!(decompress(CompressType::Gzip, &body), text.as_bytes());
    }

    #[tokio::test]
    async fn large_file_is_chunked() {
        let data = pattern(10 * 1024 * 1024);
        let path = temp_file("chunked_10mb.bin", &data);

        let mut ctx = context();
        ctx.read_size = 4096;
        ctx.response.write_file(FileRef::new(&path)).unwrap();

        let (head, body) = send(&mut ctx).await;
        assert!(head.contains("Transfer-Encoding: chunked\r\n"));
        assert!(head.contains("Content-Type: application/octet-stream\r\n"));
        assert!(!head.contains("Content-Length"));
        assert!(body.ends_with(b"0\r\n\r\n"));

        let chunks = decode_chunked(&body);
        assert!(chunks.iter().all(|chunk| chunk.len() <= 4096));
        assert_eq!(chunks.concat(), data);

        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn small_file_is_buffered() {
        let path = temp_file("small.json", br#"{"k":"v"}"#);

        let mut ctx = context();
        ctx.response.write_file(FileRef::new(&path)).unwrap();

        let (head, body) = send(&mut ctx).await;
        assert!(head.contains("Content-Type: application/json\r\n"));
        assert!(head.contains("Content-Length: 9\r\n"));
        assert_eq!(body, br#"{"k":"v"}"#);

        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn file_range() {
        let data = pattern(1000);
        let path = temp_file("range_1000.bin", &data);

        #[rustfmt::skip]
        let cases = [
            (100, 199, 4096, "Content-Length: 100\r\n"),
            (0,   999, 64,   "Transfer-Encoding: chunked\r\n"),
            (999, 999, 4096, "Content-Length: 1\r\n"),
        ];

        for (begin, end, read_size, framing) in cases {
            let mut ctx = context();
            ctx.read_size = read_size;
            ctx.response.write_file(FileRef::new(&path).range(begin, end)).unwrap();

            let (head, body) = send(&mut ctx).await;
            assert!(head.starts_with("HTTP/1.1 206 Partial Content\r\n"), "{head}");
            assert!(head.contains(&format!("Content-Range: bytes {begin}-{end}/1000\r\n")));
            assert!(head.contains(framing), "{head}");

            let payload = match framing.starts_with("Transfer") {
                true => decode_chunked(&body).concat(),
                false => body,
            };
            assert_eq!(payload, &data[begin as usize..=end as usize]);
        }

        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn bad_ranges() {
        let path = temp_file("range_bad.bin", &pattern(1000));

        #[rustfmt::skip]
        let cases = [
            (100,  99),
            (0,    1000),
            (5000, 6000),
        ];

        for (begin, end) in cases {
            let mut ctx = context();
            ctx.response.write_file(FileRef::new(&path).range(begin, end)).unwrap();

            let mut out = Vec::new();
            let result = ctx.send_response(&mut out, TIMEOUT).await;
            assert_eq!(result, Err(Error::BadRange { begin, end, size: 1000 }));
            assert!(out.is_empty());
        }

        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn send_file_path() {
        let data = pattern(50_000);
        let path = temp_file("send_file.bin", &data);

        let mut ctx = context();
        ctx.read_size = 4096;
        ctx.response
            .write_file(FileRef::new(&path).via_send_file(true))
            .unwrap();

        let (head, body) = send(&mut ctx).await;
        assert!(head.contains("Content-Length: 50000\r\n"));
        assert!(!head.contains("Transfer-Encoding"));
        assert_eq!(body, data);

        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn stream_round_trip() {
        #[rustfmt::skip]
        let cases: [(usize, usize); 4] = [
            (0,      16),
            (1,      16),
            (4096,   4096),
            (70_001, 1000),
        ];

        for (len, read_size) in cases {
            let data = pattern(len);
            let mut ctx = context();
            ctx.read_size = read_size;
            ctx.response.write_stream(std::io::Cursor::new(data.clone())).unwrap();

            let (head, body) = send(&mut ctx).await;
            assert!(head.contains("Transfer-Encoding: chunked\r\n"));

            let chunks = decode_chunked(&body);
            assert!(chunks.iter().all(|chunk| !chunk.is_empty() && chunk.len() <= read_size));
            assert_eq!(chunks.concat(), data, "{len}");
        }
    }

    #[tokio::test]
    async fn compressed_stream() {
        let data = pattern(200_000);

        for kind in [CompressType::Gzip, CompressType::Deflate, CompressType::Brotli] {
            let mut ctx = context();
            ctx.read_size = 4096;
            ctx.response.compress = Some(kind);
            ctx.response.write_stream(std::io::Cursor::new(data.clone())).unwrap();

            let (head, body) = send(&mut ctx).await;
            assert!(head.contains(&format!("Content-Encoding: {}\r\n", kind.as_str())));
            assert!(head.contains("Transfer-Encoding: chunked\r\n"));

            let compressed = decode_chunked(&body).concat();
            assert_eq!(decompress(kind, &compressed), data, "{kind:?}");
        }
    }

    #[tokio::test]
    async fn http10_file_has_length() {
        let data = pattern(20_000);
        let path = temp_file("http10_file.bin", &data);

        let mut ctx = context();
        ctx.request.version = Version::Http10;
        ctx.read_size = 4096;
        ctx.response.write_file(FileRef::new(&path)).unwrap();

        let (head, body) = send(&mut ctx).await;
        assert!(head.contains("Content-Length: 20000\r\n"));
        assert!(!head.contains("Transfer-Encoding"));
        assert_eq!(body, data);

        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn http10_stream_until_close() {
        let data = pattern(30_000);

        for compress in [None, Some(CompressType::Gzip)] {
            let mut ctx = context();
            ctx.request.version = Version::Http10;
            ctx.read_size = 4096;
            ctx.response.compress = compress;
            ctx.response.write_stream(std::io::Cursor::new(data.clone())).unwrap();

            let (head, body) = send(&mut ctx).await;
            assert!(head.contains("Connection: close\r\n"), "{compress:?}");
            assert!(!head.contains("Transfer-Encoding"));
            assert!(!head.contains("Content-Length"));

            match compress {
                Some(kind) => assert_eq!(decompress(kind, &body), data),
                None => assert_eq!(body, data),
            }
        }
    }

    #[tokio::test]
    async fn bodiless_statuses() {
        #[rustfmt::skip]
        let cases = [
            StatusCode::SwitchingProtocols,
            StatusCode::NoContent,
            StatusCode::NotModified,
        ];

        for status in cases {
            let mut ctx = context();
            ctx.response.status(status);
            ctx.response.write("dropped").unwrap();

            let (head, body) = send(&mut ctx).await;
            assert!(head.starts_with(&format!("HTTP/1.1 {} ", status.as_u16())));
            assert!(!head.contains("Content-Length"), "{status:?}");
            assert!(!head.contains("Content-Type"), "{status:?}");
            assert!(body.is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn write_timeout_fires() {
        let (client, mut server) = tokio::io::duplex(16);
        let mut ctx = context();
        ctx.response.write_bytes(pattern(1024)).unwrap();

        let result = ctx.send_response(&mut server, Duration::from_secs(1)).await;
        match result {
            Err(Error::Io(IoError(err))) => assert_eq!(err.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected {other:?}"),
        }
        drop(client);
    }
}
