//! Incremental reads over a connection.
//!
//! [`BufferedReader`] keeps a small staging buffer in front of the socket so
//! delimiter scans do not cost one syscall per byte. Every read takes an
//! optional timeout; the socket is only awaited when the staging buffer
//! cannot satisfy the request.

use crate::{
    errors::{Error, Limit, ProtocolError},
    io::pool::PooledBuf,
};
use memchr::memchr;
use std::time::Duration;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    time::{timeout_at, Instant},
};

/// Bytes requested from the socket per staging refill.
pub const STAGING_SIZE: usize = 512;

/// Staged reader over `S`.
///
/// `max` arguments of `0` disable the size check, and a `None` timeout
/// waits forever.
#[derive(Debug)]
pub struct BufferedReader<S> {
    io: S,
    staging: PooledBuf,
    pos: usize,
    filled: usize,
}

impl<S> BufferedReader<S> {
    /// Wraps `io`, using `staging` as the lookahead buffer.
    pub fn new(io: S, mut staging: PooledBuf) -> Self {
        staging.clear();
        staging.resize(STAGING_SIZE, 0);

        Self {
            io,
            staging,
            pos: 0,
            filled: 0,
        }
    }

    #[inline]
    pub fn get_ref(&self) -> &S {
        &self.io
    }

    /// The underlying stream, for writing.
    ///
    /// Reading from it directly skips whatever is staged.
    #[inline]
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.io
    }

    /// Bytes read from the socket but not consumed yet.
    #[inline]
    pub fn buffered(&self) -> &[u8] {
        &self.staging[self.pos..self.filled]
    }

    /// Gives back the stream together with the unconsumed staged bytes.
    pub fn into_parts(self) -> (S, Vec<u8>) {
        let rest = self.buffered().to_vec();
        (self.io, rest)
    }

    /// Copies staged bytes into `dst`, returns how many were copied.
    #[inline]
    fn drain_into(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.filled - self.pos);
        dst[..n].copy_from_slice(&self.staging[self.pos..self.pos + n]);
        self.pos += n;
        n
    }
}

impl<S: AsyncRead + Unpin> BufferedReader<S> {
    /// Reads into `dst` up to and including the first `delim`.
    ///
    /// `dst` is cleared first. On EOF before the delimiter `dst` keeps the
    /// partial bytes and [`Error::UnexpectedEof`] is returned.
    pub async fn read_until(
        &mut self,
        dst: &mut Vec<u8>,
        delim: u8,
        timeout: Option<Duration>,
        max: usize,
    ) -> Result<(), Error> {
        dst.clear();
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if self.pos == self.filled && self.fill(deadline).await? == 0 {
                return Err(Error::UnexpectedEof);
            }

            let staged = &self.staging[self.pos..self.filled];
            let (take, found) = match memchr(delim, staged) {
                Some(index) => (index + 1, true),
                None => (staged.len(), false),
            };

            if max != 0 && dst.len() + take > max {
                return Err(Error::LimitExceeded(Limit::Delimiter));
            }

            dst.extend_from_slice(&staged[..take]);
            self.pos += take;

            if found {
                return Ok(());
            }
        }
    }

    /// [`read_until`](Self::read_until) a `\n`, decoded as UTF-8.
    ///
    /// The returned line still carries its line terminator.
    pub async fn read_line<'a>(
        &mut self,
        dst: &'a mut Vec<u8>,
        timeout: Option<Duration>,
        max: usize,
    ) -> Result<&'a str, Error> {
        self.read_until(dst, b'\n', timeout, max).await?;

        simdutf8::basic::from_utf8(dst)
            .map_err(|_| Error::Protocol(ProtocolError::InvalidEncoding))
    }

    /// Fills `buf` completely.
    pub async fn read_exactly(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<(), Error> {
        let staged = self.drain_into(buf);
        let rest = &mut buf[staged..];

        if rest.is_empty() {
            return Ok(());
        }

        let read = self.io.read_exact(rest);
        match timeout {
            Some(t) => timeout_at(Instant::now() + t, read)
                .await
                .map_err(|_| Error::ReadTimeout)??,
            None => read.await?,
        };

        Ok(())
    }

    /// Reads until at least `minimum` bytes of `buf` are filled.
    ///
    /// Returns how many bytes were written, which may be up to `buf.len()`.
    /// On EOF, `fail_on_end` decides between [`Error::UnexpectedEof`] and
    /// returning the short count.
    pub async fn read_at_least(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
        minimum: usize,
        fail_on_end: bool,
    ) -> Result<usize, Error> {
        let minimum = minimum.min(buf.len());
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut count = self.drain_into(buf);

        while count < minimum {
            let read = self.io.read(&mut buf[count..]);
            let n = match deadline {
                Some(deadline) => timeout_at(deadline, read)
                    .await
                    .map_err(|_| Error::ReadTimeout)??,
                None => read.await?,
            };

            if n == 0 {
                return match fail_on_end {
                    true => Err(Error::UnexpectedEof),
                    false => Ok(count),
                };
            }
            count += n;
        }

        Ok(count)
    }

    async fn fill(&mut self, deadline: Option<Instant>) -> Result<usize, Error> {
        let read = self.io.read(&mut self.staging[..]);
        let n = match deadline {
            Some(deadline) => timeout_at(deadline, read)
                .await
                .map_err(|_| Error::ReadTimeout)??,
            None => read.await?,
        };

        self.pos = 0;
        self.filled = n;
        Ok(n)
    }
}
