//! The per-request working set handed to a [`Handler`](crate::Handler).

use crate::{
    http::{request::Request, response::Response, types::Version},
    io::pool::{BufferPool, PooledBuf},
    limits::RespLimits,
    server::connection::Upgraded,
};
use std::{fmt, future::Future, net::SocketAddr, pin::Pin, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    time::Instant,
};

/// Any byte stream a connection can run over.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Io for T {}

pub(crate) type UpgradeFn =
    Box<dyn FnOnce(Upgraded) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// One request, its response and the buffers used to serve them.
///
/// Lives as long as the connection and is reset between requests.
///
/// # Examples
/// ```
/// use wireline::{Handler, HandlerError, RequestContext, StatusCode};
///
/// struct Greeter;
///
/// impl Handler for Greeter {
///     async fn handle(&self, ctx: &mut RequestContext) -> Result<(), HandlerError> {
///         let name = ctx.request.query_params()?.get("name").unwrap_or("world").to_owned();
///
///         ctx.response.status(StatusCode::Ok);
///         ctx.response.write(format!("hello, {name}"))?;
///         Ok(())
///     }
/// }
/// ```
pub struct RequestContext {
    pub request: Request,
    pub response: Response,
    pub(crate) scratch: PooledBuf,
    pub(crate) line: PooledBuf,
    pub(crate) read_size: usize,
    pub(crate) deadline: Option<Instant>,
    pub(crate) upgrade: Option<UpgradeFn>,
    peer_addr: Option<SocketAddr>,
}

impl RequestContext {
    /// Leases every buffer from `shard` of `pool`.
    pub(crate) fn new(pool: &Arc<BufferPool>, shard: usize, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            request: Request::with_body_buffer(pool.lease(shard, 0)),
            response: Response::with_body_buffer(pool.lease(shard, 0)),
            scratch: pool.lease(shard, 0),
            line: pool.lease(shard, 256),
            read_size: RespLimits::default().stream_read_buffer_size,
            deadline: None,
            upgrade: None,
            peer_addr,
        }
    }

    /// Takes over the connection once the response is sent.
    ///
    /// `callback` receives the raw stream together with any bytes the
    /// client already sent past this request. The connection is not closed
    /// when the callback returns; dropping the stream closes it.
    ///
    /// ```no_run
    /// use tokio::io::AsyncWriteExt;
    /// use wireline::{HandlerError, RequestContext, StatusCode};
    ///
    /// fn switch(ctx: &mut RequestContext) -> Result<(), HandlerError> {
    ///     ctx.response
    ///         .status(StatusCode::SwitchingProtocols)
    ///         .header("Upgrade", "echo")
    ///         .header("Connection", "Upgrade");
    ///
    ///     ctx.upgrade(|mut upgraded| async move {
    ///         let _ = upgraded.io.write_all(&upgraded.read_buf).await;
    ///     });
    ///     Ok(())
    /// }
    /// ```
    pub fn upgrade<F, Fut>(&mut self, callback: F)
    where
        F: FnOnce(Upgraded) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.upgrade = Some(Box::new(move |upgraded| Box::pin(callback(upgraded))));
    }

    /// Whether [`upgrade`](Self::upgrade) was requested.
    #[inline]
    pub fn is_hijacked(&self) -> bool {
        self.upgrade.is_some()
    }

    /// When the handler will be cut off, if a handle timeout is set.
    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[inline]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Applies response limits and negotiates compression for the request
    /// just parsed.
    pub(crate) fn prepare(&mut self, limits: &RespLimits) {
        self.read_size = limits.stream_read_buffer_size.max(1);
        self.response.min_compression_size = limits.min_compression_size;
        self.response.compression_level = limits.compression_level;
        self.response.compress = match limits.enable_compression {
            true => self.request.headers.accepted_compress_type(),
            false => None,
        };
    }

    /// Decides whether the connection outlives this exchange.
    ///
    /// Both sides must speak HTTP/1.1: the request, and the response as the
    /// handler left it. `Connection: close` is added to the response when
    /// the answer is no.
    pub(crate) fn keep_alive(&mut self, conn_allows: bool) -> bool {
        let alive = conn_allows
            && self.request.version.min(self.response.version) >= Version::Http11
            && !self.request.headers.has_token("Connection", "close")
            && !self.response.headers.has_token("Connection", "close");

        if !alive && self.upgrade.is_none() && !self.response.headers.has_token("Connection", "close") {
            self.response.close();
        }
        alive
    }

    pub(crate) fn reset(&mut self) {
        self.request.reset();
        self.response.reset();
        self.scratch.clear();
        self.deadline = None;
        self.upgrade = None;
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request", &self.request)
            .field("response", &self.response)
            .field("deadline", &self.deadline)
            .field("hijacked", &self.is_hijacked())
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{http::compress::CompressType, tools::context};

    #[test]
    fn keep_alive_rules() {
        #[rustfmt::skip]
        let cases = [
            (Version::Http11, Version::Http11, None,          None,          true,  true),
            (Version::Http11, Version::Http11, Some("close"), None,          true,  false),
            (Version::Http11, Version::Http11, None,          Some("close"), true,  false),
            (Version::Http11, Version::Http11, Some("Keep-Alive, Close"), None, true, false),
            (Version::Http10, Version::Http11, None,          None,          true,  false),
            (Version::Http11, Version::Http10, None,          None,          true,  false),
            (Version::Http11, Version::Http11, None,          None,          false, false),
        ];

        for (version, resp_version, req_conn, resp_conn, allows, expected) in cases {
            let mut ctx = context();
            ctx.request.version = version;
            ctx.response.version(resp_version);
            if let Some(value) = req_conn {
                ctx.request.headers.add("Connection", value);
            }
            if let Some(value) = resp_conn {
                ctx.response.header("Connection", value);
            }

            assert_eq!(
                ctx.keep_alive(allows),
                expected,
                "{version:?} {resp_version:?} {req_conn:?} {resp_conn:?}"
            );
            assert_eq!(
                ctx.response.headers().has_token("Connection", "close"),
                !expected
            );
        }
    }

    #[test]
    fn upgrade_skips_close_header() {
        let mut ctx = context();
        ctx.request.version = Version::Http10;
        ctx.upgrade(|_| async {});

        assert!(ctx.is_hijacked());
        assert!(!ctx.keep_alive(true));
        assert!(!ctx.response.headers().contains("Connection"));

        ctx.reset();
        assert!(!ctx.is_hijacked());
    }

    #[test]
    fn negotiation() {
        #[rustfmt::skip]
        let cases = [
            (true,  Some("br, gzip"), Some(CompressType::Brotli)),
            (true,  None,             None),
            (false, Some("gzip"),     None),
        ];

        for (enabled, accept, expected) in cases {
            let mut ctx = context();
            if let Some(value) = accept {
                ctx.request.headers.add("Accept-Encoding", value);
            }

            let limits = RespLimits {
                enable_compression: enabled,
                stream_read_buffer_size: 0,
                ..RespLimits::default()
            };
            ctx.prepare(&limits);

            assert_eq!(ctx.response.negotiated(), expected);
            assert_eq!(ctx.read_size, 1);
        }
    }
}
