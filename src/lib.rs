//! wireline - an embeddable HTTP/1.1 engine on top of Tokio
//!
//! Accepts TCP connections, parses requests incrementally under strict size
//! and time limits, hands each request to a [`Handler`] and transmits the
//! response it built. Connections are persistent and pipelined requests are
//! answered in order.
//!
//! # Features
//!
//! - **Pooled buffers** - a sharded [`BufferPool`] recycles every per-request buffer
//! - **Bounded parsing** - request line, header lines, header count and body size are capped
//! - **Per-request read budget** - one wall-clock deadline covers all reads of a request
//! - **Transfer paths** - buffered, chunked, compressed (`gzip`, `deflate`, `br`),
//!   byte ranges and a plain-copy file path
//! - **Upgrades** - handlers can take over the raw stream after the response
//!
//! # Examples
//!
//! Quick start:
//! ```no_run
//! use tokio::net::TcpListener;
//! use wireline::{Handler, HandlerError, RequestContext, Server};
//!
//! struct Hello;
//!
//! impl Handler for Hello {
//!     async fn handle(&self, ctx: &mut RequestContext) -> Result<(), HandlerError> {
//!         ctx.response.write("Hello World!")?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .handler(Hello)
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```
//! Serving files:
//! ```no_run
//! use tokio::net::TcpListener;
//! use wireline::{FileRef, Handler, HandlerError, Method, RequestContext, Server, StatusCode};
//!
//! struct Files;
//!
//! impl Handler for Files {
//!     async fn handle(&self, ctx: &mut RequestContext) -> Result<(), HandlerError> {
//!         if ctx.request.method() != Method::Get {
//!             ctx.response.status(StatusCode::MethodNotAllowed);
//!             return Ok(());
//!         }
//!
//!         let path = format!("./public{}", ctx.request.path());
//!         ctx.response.write_file(FileRef::new(path))?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .handler(Files)
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```
//!
//! See [`limits`] for configuration.

pub(crate) mod io {
    pub(crate) mod pool;
    pub(crate) mod reader;
}
pub(crate) mod http {
    pub(crate) mod compress;
    pub(crate) mod context;
    pub(crate) mod headers;
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod transmit;
    pub(crate) mod types;
    pub mod uri;
}
pub mod server {
    //! Listener setup and the accept loop.

    pub(crate) mod connection;
    pub(crate) mod server_impl;

    pub use connection::Upgraded;
    pub use server_impl::{bind_listener, Handler, Server, ServerBuilder, ShutdownHandle};
}
pub(crate) mod errors;
pub mod limits;

pub use crate::{
    errors::{Error, HandlerError, IoError, Limit, ProtocolError},
    http::{
        compress::CompressType,
        context::{Io, RequestContext},
        headers::HeaderTable,
        query,
        request::Request,
        response::{BodyKind, BodyStream, FileRef, Response, WriteBuffer},
        types::{mime_for_path, Method, StatusCode, Version},
        uri::{self, Uri, UriError},
    },
    io::{
        pool::{BufferPool, PooledBuf},
        reader::BufferedReader,
    },
    server::{Handler, Server, ServerBuilder, ShutdownHandle, Upgraded},
};
