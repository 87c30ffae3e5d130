//! Server configuration: size ceilings, timeouts and socket options
//!
//! Every struct here is a plain value with conservative defaults. Loading
//! them from a file is left to the application; the engine only consumes
//! the values.
//!
//! A size limit of `0` and a timeout of [`Duration::ZERO`] disable the
//! corresponding check.
//!
//! # Examples
//!
//! ```no_run
//! # use wireline::{Handler, HandlerError, RequestContext};
//! # struct MyHandler;
//! # impl Handler for MyHandler {
//! #     async fn handle(&self, _: &mut RequestContext) -> Result<(), HandlerError> { Ok(()) }
//! # }
//! use wireline::{Server, limits::{ConnLimits, ReqLimits, RespLimits}};
//! use tokio::net::TcpListener;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .handler(MyHandler)
//!         .connection_limits(ConnLimits {
//!             read_timeout: Duration::from_secs(5),
//!             handle_timeout: Duration::from_secs(30),
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             header_count: 64,
//!             body_size: 16 * 1024,
//!             ..ReqLimits::default()
//!         })
//!         .response_limits(RespLimits {
//!             enable_compression: true,
//!             ..RespLimits::default()
//!         })
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```

use std::time::Duration;

/// Server-wide admission control.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Maximum number of connections served at the same time (default: `10_000`).
    ///
    /// A connection accepted above this number receives a canned
    /// `503 Service Unavailable` response and is closed without being parsed.
    pub max_connections: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            _priv: (),
        }
    }
}

/// Per-connection timeouts and keep-alive bounds.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Wall-clock budget for reading one whole request (default: `10s`).
    ///
    /// The clock starts when the parser begins waiting for the first byte
    /// of a request. Every read computes the remaining time from that
    /// instant and fails with [`Error::ReadTimeout`](crate::Error::ReadTimeout)
    /// once it is spent. An idle keep-alive connection is therefore closed
    /// after this duration.
    pub read_timeout: Duration,

    /// Upper bound for each individual socket write (default: `10s`).
    pub write_timeout: Duration,

    /// Upper bound for one [`Handler::handle`](crate::Handler::handle) call
    /// (default: disabled).
    ///
    /// On expiry the handler future is dropped and the connection is closed
    /// without a response.
    pub handle_timeout: Duration,

    /// Maximum number of requests served over one connection (default: unlimited).
    pub max_requests_per_connection: usize,

    /// Maximum lifetime of one connection (default: unlimited).
    ///
    /// Checked between requests, so a request in progress is never cut off.
    pub connection_lifetime: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            handle_timeout: Duration::ZERO,
            max_requests_per_connection: 0,
            connection_lifetime: Duration::ZERO,
            _priv: (),
        }
    }
}

/// Size ceilings applied while a request is parsed.
///
/// Exceeding any of them closes the connection immediately with no
/// response; see [`Error::LimitExceeded`](crate::Error::LimitExceeded).
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum length of the request line, `CRLF` included (default: `4096`).
    pub first_line_size: usize,

    /// Maximum length of one header line, `CRLF` included (default: `4096`).
    pub header_line_size: usize,

    /// Maximum number of header lines (default: `1024`).
    pub header_count: usize,

    /// Maximum `Content-Length` accepted (default: `1 MiB`).
    ///
    /// Checked before a single body byte is read.
    pub body_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            first_line_size: 4096,
            header_line_size: 4096,
            header_count: 1024,
            body_size: 1024 * 1024,
            _priv: (),
        }
    }
}

/// Response transmission tuning.
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Negotiate `Content-Encoding` from the request's `Accept-Encoding`
    /// (default: `false`).
    pub enable_compression: bool,

    /// Buffered bodies smaller than this are sent uncompressed (default: `1024`).
    pub min_compression_size: usize,

    /// Size of the per-connection scratch buffer (default: `4096`).
    ///
    /// Files and streams are read in pieces of this size, and it is the
    /// threshold between the buffered and the chunked transfer paths.
    pub stream_read_buffer_size: usize,

    /// Compression level, `0..=9` (default: `6`).
    ///
    /// Mapped onto the brotli quality range for `br`.
    pub compression_level: u32,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            enable_compression: false,
            min_compression_size: 1024,
            stream_read_buffer_size: 4096,
            compression_level: 6,
            _priv: (),
        }
    }
}

/// Options applied to the listening socket and to every accepted stream.
///
/// Keep-alive probing is only enabled when [`keep_alive`](Self::keep_alive)
/// is `true`; a zero probe setting keeps the operating system default.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// `SO_REUSEADDR` on the listening socket (default: `true`).
    pub reuse_address: bool,

    /// Pending-connection backlog passed to `listen` (default: `128`).
    pub backlog: u32,

    /// `SO_KEEPALIVE` on accepted streams (default: `false`).
    pub keep_alive: bool,

    /// Idle time before the first keep-alive probe (default: OS default).
    pub keep_alive_time: Duration,

    /// Interval between keep-alive probes (default: OS default, Linux only).
    pub keep_alive_interval: Duration,

    /// Number of unanswered probes before the peer is considered dead
    /// (default: OS default, Linux only).
    pub keep_alive_retries: u32,

    /// `TCP_NODELAY` on accepted streams (default: `true`).
    pub no_delay: bool,

    /// `SO_RCVBUF` in bytes, `0` keeps the OS default (default: `10240`).
    pub recv_buffer_size: usize,

    /// `SO_SNDBUF` in bytes, `0` keeps the OS default (default: `10240`).
    pub send_buffer_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            reuse_address: true,
            backlog: 128,
            keep_alive: false,
            keep_alive_time: Duration::ZERO,
            keep_alive_interval: Duration::ZERO,
            keep_alive_retries: 0,
            no_delay: true,
            recv_buffer_size: 10240,
            send_buffer_size: 10240,
            _priv: (),
        }
    }
}
