//! Typed failures of the protocol engine.
//!
//! Nothing here is stringly typed: callers match on [`Error`] to decide
//! whether a connection loss is worth a log line.

use crate::http::uri::UriError;
use std::{error, fmt, io};

/// Handler failure type.
pub type HandlerError = Box<dyn error::Error + Send + Sync>;

/// Every way a connection, a parse or a transmission can fail.
#[derive(Debug, PartialEq)]
pub enum Error {
    /// The peer sent bytes that cannot be framed as a request.
    Protocol(ProtocolError),
    /// A configured size ceiling was crossed.
    LimitExceeded(Limit),
    /// The read budget of the current request ran out.
    ReadTimeout,
    /// The peer closed the stream in the middle of a read.
    UnexpectedEof,
    /// A second body was set on a response; call
    /// [`Response::reset_body`](crate::Response::reset_body) first.
    AlreadyWritten,
    /// A file range outside `begin <= end < size`.
    BadRange { begin: u64, end: u64, size: u64 },
    /// The handler did not finish within `handle_timeout`.
    HandleTimeout,
    /// The handler returned an error.
    Handler(String),
    /// Socket or file I/O failure.
    Io(IoError),
}

/// Kinds of malformed requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    EmptyMethod,
    InvalidMethod,
    InvalidTarget(UriError),
    InvalidVersion,
    /// Request line or header is not valid UTF-8.
    InvalidEncoding,
    MissingColon,
    EmptyHeaderName,
    InvalidContentLength,
    /// Chunked (or any other transfer-coded) request bodies are not parsed.
    UnsupportedTransferEncoding,
}

/// The ceiling named by [`Error::LimitExceeded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    FirstLine,
    HeaderLine,
    HeaderCount,
    Body,
    /// A delimiter scan without a caller-specific name.
    Delimiter,
}

impl Error {
    /// Whether this is routine network weather rather than a server fault.
    ///
    /// Timeouts, EOF, peer resets and client mistakes are expected; a
    /// handler failure or an unusual I/O error is not.
    pub fn is_expected(&self) -> bool {
        match self {
            Error::Protocol(_)
            | Error::LimitExceeded(_)
            | Error::ReadTimeout
            | Error::UnexpectedEof => true,
            Error::Io(err) => is_disconnect(err.0.kind()),
            Error::AlreadyWritten
            | Error::BadRange { .. }
            | Error::HandleTimeout
            | Error::Handler(_) => false,
        }
    }

    /// Renames a generic [`Limit::Delimiter`] overflow into `limit`.
    #[inline]
    pub(crate) fn with_limit(self, limit: Limit) -> Self {
        match self {
            Error::LimitExceeded(Limit::Delimiter) => Error::LimitExceeded(limit),
            other => other,
        }
    }
}

/// Socket errors a listener or connection sees when the peer simply went away.
#[inline]
pub(crate) fn is_disconnect(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
    )
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(&err.0),
            Error::Protocol(ProtocolError::InvalidTarget(err)) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Protocol(err) => write!(f, "malformed request: {err}"),
            Error::LimitExceeded(limit) => write!(f, "{limit} limit exceeded"),
            Error::ReadTimeout => f.write_str("read timeout"),
            Error::UnexpectedEof => f.write_str("unexpected end of stream"),
            Error::AlreadyWritten => {
                f.write_str("the body has already been written, call reset_body first")
            }
            Error::BadRange { begin, end, size } => {
                write!(f, "range {begin}-{end} is outside a file of {size} bytes")
            }
            Error::HandleTimeout => f.write_str("handler timed out"),
            Error::Handler(msg) => write!(f, "handler failed: {msg}"),
            Error::Io(err) => write!(f, "{}", err.0),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::EmptyMethod => f.write_str("empty method"),
            ProtocolError::InvalidMethod => f.write_str("unknown method"),
            ProtocolError::InvalidTarget(err) => write!(f, "bad target: {err}"),
            ProtocolError::InvalidVersion => f.write_str("unsupported protocol version"),
            ProtocolError::InvalidEncoding => f.write_str("head is not valid UTF-8"),
            ProtocolError::MissingColon => f.write_str("header line without ':'"),
            ProtocolError::EmptyHeaderName => f.write_str("empty header name"),
            ProtocolError::InvalidContentLength => f.write_str("invalid Content-Length"),
            ProtocolError::UnsupportedTransferEncoding => {
                f.write_str("transfer-coded request bodies are not supported")
            }
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Limit::FirstLine => "request line",
            Limit::HeaderLine => "header line",
            Limit::HeaderCount => "header count",
            Limit::Body => "body size",
            Limit::Delimiter => "line",
        })
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Error::UnexpectedEof,
            io::ErrorKind::TimedOut => Error::ReadTimeout,
            _ => Error::Io(IoError(err)),
        }
    }
}

impl From<ProtocolError> for Error {
    #[inline]
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

/// [`io::Error`] compared by kind only.
#[derive(Debug)]
pub struct IoError(pub io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_conversion() {
        #[rustfmt::skip]
        let cases = [
            (io::ErrorKind::UnexpectedEof,   Error::UnexpectedEof),
            (io::ErrorKind::TimedOut,        Error::ReadTimeout),
            (io::ErrorKind::BrokenPipe,      Error::Io(IoError(io::ErrorKind::BrokenPipe.into()))),
        ];

        for (kind, expected) in cases {
            assert_eq!(Error::from(io::Error::from(kind)), expected);
        }
    }

    #[test]
    fn classification() {
        #[rustfmt::skip]
        let cases = [
            (Error::ReadTimeout,                              true),
            (Error::UnexpectedEof,                            true),
            (Error::LimitExceeded(Limit::HeaderCount),        true),
            (Error::Protocol(ProtocolError::MissingColon),    true),
            (io::Error::from(io::ErrorKind::ConnectionReset).into(), true),
            (io::Error::from(io::ErrorKind::PermissionDenied).into(), false),
            (Error::Handler("boom".into()),                   false),
            (Error::HandleTimeout,                            false),
        ];

        for (err, expected) in cases {
            assert_eq!(err.is_expected(), expected, "{err}");
        }
    }

    #[test]
    fn limit_renaming() {
        assert_eq!(
            Error::LimitExceeded(Limit::Delimiter).with_limit(Limit::HeaderLine),
            Error::LimitExceeded(Limit::HeaderLine)
        );
        assert_eq!(
            Error::ReadTimeout.with_limit(Limit::HeaderLine),
            Error::ReadTimeout
        );
    }
}
