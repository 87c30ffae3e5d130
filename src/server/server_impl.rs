use crate::{
    errors::HandlerError,
    http::context::RequestContext,
    io::pool::BufferPool,
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits, SocketOptions},
    server::connection::{AllLimits, HttpConnection},
};
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use std::{
    future::Future,
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::{watch, Notify},
};
use tracing::{debug, info, trace, warn};

/// Application logic invoked once per parsed request.
///
/// The handler fills in `ctx.response`; leaving it untouched sends an empty
/// `200 OK`. Returning an error sends `500 Internal Server Error` and closes
/// the connection.
///
/// # Examples
/// ```
/// use wireline::{Handler, HandlerError, Method, RequestContext, StatusCode};
///
/// struct Api;
///
/// impl Handler for Api {
///     async fn handle(&self, ctx: &mut RequestContext) -> Result<(), HandlerError> {
///         match (ctx.request.method(), ctx.request.path()) {
///             (Method::Get, "/health") => ctx.response.write("ok")?,
///             (Method::Post, "/echo") => {
///                 let body = ctx.request.body().to_vec();
///                 ctx.response.write_bytes(body)?;
///             }
///             _ => {
///                 ctx.response.status(StatusCode::NotFound);
///             }
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    fn handle(
        &self,
        ctx: &mut RequestContext,
    ) -> impl Future<Output = Result<(), HandlerError>> + Send;
}

const SERVICE_UNAVAILABLE: &[u8] =
    b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// Creates a listening socket configured by `options`.
///
/// Must be called from within a Tokio runtime.
///
/// # Examples
/// ```no_run
/// use wireline::{limits::SocketOptions, server::bind_listener};
///
/// # async fn run() -> std::io::Result<()> {
/// let options = SocketOptions {
///     backlog: 1024,
///     ..SocketOptions::default()
/// };
/// let listener = bind_listener("0.0.0.0:8080".parse().unwrap(), &options)?;
/// # Ok(())
/// # }
/// ```
pub fn bind_listener(addr: SocketAddr, options: &SocketOptions) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(options.reuse_address)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(options.backlog.min(i32::MAX as u32) as i32)?;

    TcpListener::from_std(socket.into())
}

/// Applies per-connection options to an accepted stream.
fn configure_stream(stream: &TcpStream, options: &SocketOptions) -> io::Result<()> {
    stream.set_nodelay(options.no_delay)?;

    let socket = SockRef::from(stream);
    if options.keep_alive {
        let mut keepalive = TcpKeepalive::new();
        if !options.keep_alive_time.is_zero() {
            keepalive = keepalive.with_time(options.keep_alive_time);
        }
        #[cfg(target_os = "linux")]
        {
            if !options.keep_alive_interval.is_zero() {
                keepalive = keepalive.with_interval(options.keep_alive_interval);
            }
            if options.keep_alive_retries != 0 {
                keepalive = keepalive.with_retries(options.keep_alive_retries);
            }
        }
        socket.set_tcp_keepalive(&keepalive)?;
    }
    if options.recv_buffer_size != 0 {
        socket.set_recv_buffer_size(options.recv_buffer_size)?;
    }
    if options.send_buffer_size != 0 {
        socket.set_send_buffer_size(options.send_buffer_size)?;
    }

    Ok(())
}

/// Accept errors that only concern the one client.
#[inline]
fn is_transient_accept(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
    )
}

/// Number of open connections, with a wake-up when it drops to zero.
#[derive(Debug, Default)]
struct LiveConnections {
    count: AtomicUsize,
    idle: Notify,
}

impl LiveConnections {
    #[inline]
    fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    #[inline]
    fn enter(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    fn leave(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_one();
        }
    }

    async fn drained(&self) {
        while self.count() != 0 {
            self.idle.notified().await;
        }
    }
}

/// Stops a running [`Server`].
///
/// Cloneable and usable from any task.
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    /// Stops accepting and force-closes every open connection.
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }
}

/// An HTTP/1.1 server bound to a listener.
///
/// See [`ServerBuilder`] for configuration.
pub struct Server<H: Handler> {
    listener: TcpListener,
    handler: Arc<H>,
    limits: AllLimits,
    socket_options: SocketOptions,
    pool: Arc<BufferPool>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl<H: Handler> Server<H> {
    #[inline]
    pub fn builder() -> ServerBuilder<H> {
        ServerBuilder {
            listener: None,
            handler: None,

            server_limits: None,
            connection_limits: None,
            request_limits: None,
            response_limits: None,
            socket_options: None,
        }
    }

    /// A handle that stops this server from elsewhere.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown.clone())
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until shut down, serving each on its own task.
    ///
    /// Returns once shutdown was requested and every connection task ended.
    pub async fn launch(self) {
        let Server {
            listener,
            handler,
            limits,
            socket_options,
            pool,
            shutdown,
        } = self;

        let live = Arc::new(LiveConnections::default());
        let mut stop = shutdown.subscribe();
        info!(addr = ?listener.local_addr().ok(), "server started");

        loop {
            let accepted = tokio::select! {
                biased;
                _ = stopped(&mut stop) => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, addr) = match accepted {
                Ok(value) => value,
                Err(err) if is_transient_accept(err.kind()) => {
                    trace!(error = %err, "accept failed");
                    continue;
                }
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            if let Err(err) = configure_stream(&stream, &socket_options) {
                debug!(peer = %addr, error = %err, "cannot configure socket");
                continue;
            }

            let max = limits.0.max_connections;
            if max != 0 && live.count() >= max {
                debug!(peer = %addr, "connection limit reached");
                tokio::spawn(reject(stream, limits.1.write_timeout));
                continue;
            }

            let mut conn = HttpConnection::new(
                handler.clone(),
                stream,
                Some(addr),
                &pool,
                pool.assign_shard(),
                &limits,
            );

            live.enter();
            let tracker = live.clone();
            conn.conn.on_close(move || tracker.leave());

            let mut stop = shutdown.subscribe();
            tokio::spawn(async move {
                tokio::select! {
                    _ = conn.run() => {}
                    _ = stopped(&mut stop) => {}
                }
            });
        }

        info!(open = live.count(), "server stopping");
        live.drained().await;
    }
}

/// Resolves once shutdown was requested, without keeping the value borrowed.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

/// Answers a connection over capacity with a canned `503`.
async fn reject(mut stream: TcpStream, write_timeout: Duration) {
    let write = stream.write_all(SERVICE_UNAVAILABLE);
    let _ = match write_timeout.is_zero() {
        true => write.await,
        false => tokio::time::timeout(write_timeout, write)
            .await
            .unwrap_or(Ok(())),
    };
    let _ = stream.shutdown().await;
}

//

/// Builder for [`Server`].
///
/// `listener` and `handler` are required; every limit falls back to its
/// `Default`.
///
/// # Examples
/// ```no_run
/// use std::time::Duration;
/// use tokio::net::TcpListener;
/// use wireline::{limits::ConnLimits, Handler, HandlerError, RequestContext, Server};
///
/// struct Hello;
///
/// impl Handler for Hello {
///     async fn handle(&self, ctx: &mut RequestContext) -> Result<(), HandlerError> {
///         ctx.response.write("hello")?;
///         Ok(())
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     Server::builder()
///         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
///         .handler(Hello)
///         .connection_limits(ConnLimits {
///             handle_timeout: Duration::from_secs(5),
///             ..ConnLimits::default()
///         })
///         .build()
///         .launch()
///         .await;
/// }
/// ```
pub struct ServerBuilder<H: Handler> {
    listener: Option<TcpListener>,
    handler: Option<Arc<H>>,

    server_limits: Option<ServerLimits>,
    connection_limits: Option<ConnLimits>,
    request_limits: Option<ReqLimits>,
    response_limits: Option<RespLimits>,
    socket_options: Option<SocketOptions>,
}

impl<H: Handler> ServerBuilder<H> {
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    #[inline(always)]
    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    #[inline(always)]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.response_limits = Some(limits);
        self
    }

    /// Options applied to every accepted stream.
    #[inline(always)]
    pub fn socket_options(mut self, options: SocketOptions) -> Self {
        self.socket_options = Some(options);
        self
    }

    /// # Panics
    /// When [`listener`](Self::listener) or [`handler`](Self::handler) was
    /// not called.
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server<H> {
        let (shutdown, _) = watch::channel(false);

        Server {
            listener: self
                .listener
                .expect("The `listener` method must be called to create"),
            handler: self
                .handler
                .expect("The `handler` method must be called to create"),
            limits: (
                self.server_limits.unwrap_or_default(),
                self.connection_limits.unwrap_or_default(),
                self.request_limits.unwrap_or_default(),
                self.response_limits.unwrap_or_default(),
            ),
            socket_options: self.socket_options.unwrap_or_default(),
            pool: BufferPool::per_cpu(),
            shutdown: Arc::new(shutdown),
        }
    }
}
