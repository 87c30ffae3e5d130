//! Response body compression filter.
//!
//! Each encoder writes into a `Vec<u8>` it owns, so the transmitter can
//! drain compressed bytes while a file or stream is still being fed in.

use flate2::{
    write::{GzEncoder, ZlibEncoder},
    Compression,
};
use std::{
    fmt,
    io::{self, Write},
};

const BROTLI_BUFFER: usize = 4096;
const BROTLI_WINDOW: u32 = 22;

/// Content codings the server can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressType {
    Gzip,
    /// zlib-wrapped deflate, as `Content-Encoding: deflate` requires.
    Deflate,
    Brotli,
}

impl CompressType {
    /// The `Content-Encoding` token.
    pub const fn as_str(&self) -> &'static str {
        match self {
            CompressType::Gzip => "gzip",
            CompressType::Deflate => "deflate",
            CompressType::Brotli => "br",
        }
    }
}

enum Encoder {
    Gzip(GzEncoder<Vec<u8>>),
    Deflate(ZlibEncoder<Vec<u8>>),
    Brotli(Box<brotli::CompressorWriter<Vec<u8>>>),
}

/// An active compression stream.
pub(crate) struct Compressor {
    kind: CompressType,
    encoder: Encoder,
}

impl Compressor {
    /// `level` is `0..=9`; brotli uses it as its quality.
    pub(crate) fn new(kind: CompressType, level: u32) -> Self {
        let level = level.min(9);

        let encoder = match kind {
            CompressType::Gzip => {
                Encoder::Gzip(GzEncoder::new(Vec::new(), Compression::new(level)))
            }
            CompressType::Deflate => {
                Encoder::Deflate(ZlibEncoder::new(Vec::new(), Compression::new(level)))
            }
            CompressType::Brotli => Encoder::Brotli(Box::new(brotli::CompressorWriter::new(
                Vec::new(),
                BROTLI_BUFFER,
                level,
                BROTLI_WINDOW,
            ))),
        };

        Self { kind, encoder }
    }

    #[inline]
    pub(crate) fn kind(&self) -> CompressType {
        self.kind
    }

    pub(crate) fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match &mut self.encoder {
            Encoder::Gzip(w) => w.write_all(data),
            Encoder::Deflate(w) => w.write_all(data),
            Encoder::Brotli(w) => w.write_all(data),
        }
    }

    #[inline]
    fn output(&self) -> &Vec<u8> {
        match &self.encoder {
            Encoder::Gzip(w) => w.get_ref(),
            Encoder::Deflate(w) => w.get_ref(),
            Encoder::Brotli(w) => w.get_ref(),
        }
    }

    /// Compressed bytes produced and not drained yet.
    #[inline]
    pub(crate) fn pending(&self) -> usize {
        self.output().len()
    }

    /// Moves the compressed bytes produced so far into `dst`.
    pub(crate) fn drain_into(&mut self, dst: &mut Vec<u8>) {
        let output = match &mut self.encoder {
            Encoder::Gzip(w) => w.get_mut(),
            Encoder::Deflate(w) => w.get_mut(),
            Encoder::Brotli(w) => w.get_mut(),
        };
        dst.extend_from_slice(output);
        output.clear();
    }

    /// Ends the stream and moves every remaining byte into `dst`.
    pub(crate) fn finish(self, dst: &mut Vec<u8>) -> io::Result<()> {
        let output = match self.encoder {
            Encoder::Gzip(w) => w.finish()?,
            Encoder::Deflate(w) => w.finish()?,
            // emits the final meta-block
            Encoder::Brotli(w) => (*w).into_inner(),
        };

        dst.extend_from_slice(&output);
        Ok(())
    }
}

impl fmt::Debug for Compressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compressor")
            .field("kind", &self.kind)
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::read::{GzDecoder, ZlibDecoder};
    use std::io::Read;

    pub(crate) fn decompress(kind: CompressType, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        match kind {
            CompressType::Gzip => GzDecoder::new(data).read_to_end(&mut out),
            CompressType::Deflate => ZlibDecoder::new(data).read_to_end(&mut out),
            CompressType::Brotli => brotli::Decompressor::new(data, 4096).read_to_end(&mut out),
        }
        .unwrap();
        out
    }

    #[test]
    fn round_trip() {
        let input: Vec<u8> = (0..20_000u32).flat_map(|i| (i % 251).to_le_bytes()).collect();

        for kind in [CompressType::Gzip, CompressType::Deflate, CompressType::Brotli] {
            let mut compressor = Compressor::new(kind, 6);
            assert_eq!(compressor.kind(), kind);
            let mut out = Vec::new();

            for piece in input.chunks(3000) {
                compressor.write_all(piece).unwrap();
                compressor.drain_into(&mut out);
                assert_eq!(compressor.pending(), 0);
            }
            compressor.finish(&mut out).unwrap();

            assert_eq!(decompress(kind, &out), input, "{kind:?}");
        }
    }

    #[test]
    fn tokens() {
        #[rustfmt::skip]
        let cases = [
            (CompressType::Gzip,    "gzip"),
            (CompressType::Deflate, "deflate"),
            (CompressType::Brotli,  "br"),
        ];

        for (kind, token) in cases {
            assert_eq!(kind.as_str(), token);
        }
    }
}
