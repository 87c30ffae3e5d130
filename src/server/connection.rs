use crate::{
    errors::Error,
    http::{
        context::{Io, RequestContext, UpgradeFn},
        request::{ParseState, Parsed, RequestParser},
        types::StatusCode,
    },
    io::{pool::BufferPool, reader::BufferedReader},
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits},
    server::server_impl::Handler,
};
use std::{
    fmt, mem,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    time::{timeout_at, Instant},
};
use tracing::{debug, error, trace, warn};

pub(crate) type AllLimits = (ServerLimits, ConnLimits, ReqLimits, RespLimits);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Callbacks run once when the connection goes away, however it goes.
#[derive(Default)]
pub(crate) struct OnClose(Vec<Box<dyn FnOnce() + Send>>);

impl OnClose {
    fn run(&mut self) {
        for callback in mem::take(&mut self.0) {
            callback();
        }
    }
}

impl Drop for OnClose {
    fn drop(&mut self) {
        self.run();
    }
}

/// A raw stream taken over by an upgrade callback.
///
/// `read_buf` holds what the client sent after the upgrade request and the
/// server already read. Dropping this value closes the connection.
pub struct Upgraded {
    pub io: Box<dyn Io>,
    pub read_buf: Vec<u8>,
    _guard: OnClose,
}

impl fmt::Debug for Upgraded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upgraded")
            .field("read_buf", &self.read_buf.len())
            .finish_non_exhaustive()
    }
}

/// The socket side of a connection.
pub(crate) struct Connection<S> {
    pub(crate) id: u64,
    pub(crate) reader: BufferedReader<S>,
    peer_addr: Option<SocketAddr>,
    alive: bool,
    on_close: OnClose,
    created: Instant,
    request_count: usize,
}

impl<S> Connection<S> {
    pub(crate) fn new(reader: BufferedReader<S>, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            reader,
            peer_addr,
            alive: true,
            on_close: OnClose::default(),
            created: Instant::now(),
            request_count: 0,
        }
    }

    /// Registers `callback` to run when the connection is closed or dropped.
    pub(crate) fn on_close(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.on_close.0.push(Box::new(callback));
    }

    /// Whether another request may follow on this connection.
    #[inline]
    fn allows_more(&self, limits: &ConnLimits) -> bool {
        let max = limits.max_requests_per_connection;
        let lifetime = limits.connection_lifetime;

        (max == 0 || self.request_count < max)
            && (lifetime.is_zero() || self.created.elapsed() < lifetime)
    }
}

impl<S: AsyncWrite + Unpin> Connection<S> {
    /// Shuts the stream down and runs the on-close callbacks; later calls
    /// do nothing.
    pub(crate) async fn close(&mut self) {
        if !self.alive {
            return;
        }
        self.alive = false;

        let _ = self.reader.get_mut().shutdown().await;
        self.on_close.run();
    }
}

impl<S: Io> Connection<S> {
    fn into_upgraded(self) -> Upgraded {
        let Connection {
            reader, on_close, ..
        } = self;
        let (io, read_buf) = reader.into_parts();

        Upgraded {
            io: Box::new(io),
            read_buf,
            _guard: on_close,
        }
    }
}

//

/// Serves HTTP on one connection until it closes or is upgraded.
pub(crate) struct HttpConnection<H, S> {
    handler: Arc<H>,
    pub(crate) conn: Connection<S>,
    parser: RequestParser,
    ctx: RequestContext,

    conn_limits: ConnLimits,
    req_limits: ReqLimits,
    resp_limits: RespLimits,
}

enum Outcome {
    Close,
    Upgrade(UpgradeFn),
}

impl<H, S> HttpConnection<H, S>
where
    H: Handler,
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub(crate) fn new(
        handler: Arc<H>,
        io: S,
        peer_addr: Option<SocketAddr>,
        pool: &Arc<BufferPool>,
        shard: usize,
        limits: &AllLimits,
    ) -> Self {
        let reader = BufferedReader::new(io, pool.lease(shard, 0));

        Self {
            handler,
            conn: Connection::new(reader, peer_addr),
            parser: RequestParser::new(),
            ctx: RequestContext::new(pool, shard, peer_addr),

            conn_limits: limits.1.clone(),
            req_limits: limits.2.clone(),
            resp_limits: limits.3.clone(),
        }
    }

    pub(crate) async fn run(mut self) {
        let id = self.conn.id;
        let peer = self.conn.peer_addr;
        trace!(conn = id, ?peer, "connection opened");

        match self.serve().await {
            Ok(Outcome::Upgrade(callback)) => {
                debug!(conn = id, ?peer, "connection upgraded");
                let HttpConnection { conn, .. } = self;
                callback(conn.into_upgraded()).await;
                return;
            }
            Ok(Outcome::Close) => trace!(conn = id, ?peer, "connection closed"),
            Err(err @ Error::Handler(_)) => error!(conn = id, ?peer, error = %err, "request failed"),
            Err(err @ Error::HandleTimeout) => warn!(conn = id, ?peer, error = %err, "connection aborted"),
            Err(err) if err.is_expected() => debug!(conn = id, ?peer, error = %err, "connection lost"),
            Err(err) => warn!(conn = id, ?peer, error = %err, "connection failed"),
        }

        self.conn.close().await;
    }

    async fn serve(&mut self) -> Result<Outcome, Error> {
        let read_timeout = self.conn_limits.read_timeout;
        let write_timeout = self.conn_limits.write_timeout;

        loop {
            let parsed = self
                .parser
                .parse(
                    &mut self.conn.reader,
                    &mut self.ctx.request,
                    &mut self.ctx.line,
                    &self.req_limits,
                    read_timeout,
                )
                .await?;

            if parsed == Parsed::Closed {
                return Ok(Outcome::Close);
            }

            self.conn.request_count += 1;
            self.ctx.prepare(&self.resp_limits);

            let failure = self.dispatch().await?;
            let alive = self.ctx.keep_alive(self.conn.allows_more(&self.conn_limits));

            match self.ctx.send_response(self.conn.reader.get_mut(), write_timeout).await {
                Ok(()) => {}
                Err(Error::BadRange { begin, end, size }) => {
                    debug!(conn = self.conn.id, begin, end, size, "range not satisfiable");
                    self.ctx.response.reset();
                    self.ctx
                        .response
                        .status(StatusCode::RangeNotSatisfiable)
                        .header("Content-Range", format!("bytes */{size}"))
                        .close();
                    self.ctx.send_response(self.conn.reader.get_mut(), write_timeout).await?;
                    return Ok(Outcome::Close);
                }
                Err(err) => return Err(err),
            }
            self.parser.state = ParseState::Dispatched;

            if let Some(message) = failure {
                return Err(Error::Handler(message));
            }
            if let Some(callback) = self.ctx.upgrade.take() {
                return Ok(Outcome::Upgrade(callback));
            }
            if !alive {
                return Ok(Outcome::Close);
            }

            self.ctx.reset();
        }
    }

    /// Runs the handler; a failure is turned into a `500` response and its
    /// message returned.
    async fn dispatch(&mut self) -> Result<Option<String>, Error> {
        let handle_timeout = self.conn_limits.handle_timeout;

        let outcome = match handle_timeout.is_zero() {
            true => self.handler.handle(&mut self.ctx).await,
            false => {
                let deadline = Instant::now() + handle_timeout;
                self.ctx.deadline = Some(deadline);

                timeout_at(deadline, self.handler.handle(&mut self.ctx))
                    .await
                    .map_err(|_| Error::HandleTimeout)?
            }
        };

        let Err(err) = outcome else {
            return Ok(None);
        };

        self.ctx.upgrade = None;
        self.ctx.response.reset();
        self.ctx
            .response
            .status(StatusCode::InternalServerError)
            .close()
            .write(StatusCode::InternalServerError.reason())?;

        Ok(Some(err.to_string()))
    }
}
