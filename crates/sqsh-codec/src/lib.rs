#![forbid(unsafe_code)]
//! Compression codec dispatch.
//!
//! SquashFS selects one codec per image; the same codec decodes both
//! metadata blocks (bounded by 8 KiB) and data blocks (bounded by the
//! image block size). Every id in 1..=6 is recognized so that opening an
//! image never fails on the codec alone; decoding with a codec that was
//! compiled out fails with `UnsupportedCodec`.

use sqsh_error::{Result, SqfsError};

#[cfg(any(feature = "gzip", feature = "lzma", feature = "xz"))]
use std::io::Read;

/// One of the six codecs a v4.0 superblock may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Gzip,
    Lzma,
    Lzo,
    Xz,
    Lz4,
    Zstd,
}

impl Codec {
    /// Map a superblock compression id. `None` for ids outside 1..=6.
    #[must_use]
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            1 => Some(Self::Gzip),
            2 => Some(Self::Lzma),
            3 => Some(Self::Lzo),
            4 => Some(Self::Xz),
            5 => Some(Self::Lz4),
            6 => Some(Self::Zstd),
            _ => None,
        }
    }

    #[must_use]
    pub fn id(self) -> u16 {
        match self {
            Self::Gzip => 1,
            Self::Lzma => 2,
            Self::Lzo => 3,
            Self::Xz => 4,
            Self::Lz4 => 5,
            Self::Zstd => 6,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Lzma => "lzma",
            Self::Lzo => "lzo",
            Self::Xz => "xz",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }

    /// Whether the decoder for this codec is compiled into the build.
    #[must_use]
    pub fn is_available(self) -> bool {
        match self {
            Self::Gzip => cfg!(feature = "gzip"),
            Self::Lzma => cfg!(feature = "lzma"),
            Self::Lzo => cfg!(feature = "lzo"),
            Self::Xz => cfg!(feature = "xz"),
            Self::Lz4 => cfg!(feature = "lz4"),
            Self::Zstd => cfg!(feature = "zstd"),
        }
    }

    /// Decompress `src`, producing at most `max_out` bytes.
    ///
    /// `max_out` is 8192 for metadata blocks and the image block size for
    /// data blocks; a stream that inflates past it is reported as
    /// `BlockSizeOverflow`.
    pub fn decompress(self, src: &[u8], max_out: usize) -> Result<Vec<u8>> {
        match self {
            #[cfg(feature = "gzip")]
            Self::Gzip => gzip_decompress(src, max_out),
            #[cfg(feature = "lzma")]
            Self::Lzma => lzma_decompress(src, max_out),
            #[cfg(feature = "lzo")]
            Self::Lzo => lzo_decompress(src, max_out),
            #[cfg(feature = "xz")]
            Self::Xz => xz_decompress(src, max_out),
            #[cfg(feature = "lz4")]
            Self::Lz4 => lz4_decompress(src, max_out),
            #[cfg(feature = "zstd")]
            Self::Zstd => zstd_decompress(src, max_out),
            #[allow(unreachable_patterns)]
            missing => Err(SqfsError::UnsupportedCodec {
                id: missing.id(),
                name: missing.name(),
            }),
        }
    }
}

/// Drain a decoder into a vec, rejecting output beyond `max_out`.
#[cfg(any(feature = "gzip", feature = "lzma", feature = "xz"))]
fn read_bounded<R: Read>(reader: R, max_out: usize, codec: &'static str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(max_out.min(64 * 1024));
    let n = reader
        .take(max_out as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| SqfsError::CodecCorrupt {
            codec,
            detail: e.to_string(),
        })?;
    if n > max_out {
        return Err(SqfsError::BlockSizeOverflow {
            produced: n,
            limit: max_out,
        });
    }
    Ok(out)
}

// squashfs "gzip" payloads are raw zlib streams.
#[cfg(feature = "gzip")]
fn gzip_decompress(src: &[u8], max_out: usize) -> Result<Vec<u8>> {
    read_bounded(flate2::read::ZlibDecoder::new(src), max_out, "gzip")
}

#[cfg(feature = "xz")]
fn xz_decompress(src: &[u8], max_out: usize) -> Result<Vec<u8>> {
    let stream =
        xz2::stream::Stream::new_stream_decoder(u64::MAX, 0).map_err(|e| SqfsError::CodecCorrupt {
            codec: "xz",
            detail: e.to_string(),
        })?;
    read_bounded(xz2::read::XzDecoder::new_stream(src, stream), max_out, "xz")
}

/// Legacy lzma payloads are usually lzma_alone streams (13-byte
/// properties+size header), but some packers emit a bare lzma1 stream.
/// Probe the alone format first and fall back to a synthesized header.
#[cfg(feature = "lzma")]
fn lzma_decompress(src: &[u8], max_out: usize) -> Result<Vec<u8>> {
    match lzma_alone_decompress(src, max_out) {
        Ok(out) => Ok(out),
        Err(SqfsError::BlockSizeOverflow { produced, limit }) => {
            Err(SqfsError::BlockSizeOverflow { produced, limit })
        }
        Err(first) => {
            tracing::warn!(
                target: "sqsh::codec",
                error = %first,
                "lzma payload does not decode as lzma_alone, retrying as a bare lzma1 stream"
            );
            let mut framed = Vec::with_capacity(src.len() + 13);
            framed.push(0x5D);
            framed.extend_from_slice(&(1_u32 << 23).to_le_bytes());
            framed.extend_from_slice(&u64::MAX.to_le_bytes());
            framed.extend_from_slice(src);
            lzma_alone_decompress(&framed, max_out).map_err(|_| first)
        }
    }
}

#[cfg(feature = "lzma")]
fn lzma_alone_decompress(src: &[u8], max_out: usize) -> Result<Vec<u8>> {
    let stream =
        xz2::stream::Stream::new_lzma_decoder(u64::MAX).map_err(|e| SqfsError::CodecCorrupt {
            codec: "lzma",
            detail: e.to_string(),
        })?;
    read_bounded(
        xz2::read::XzDecoder::new_stream(src, stream),
        max_out,
        "lzma",
    )
}

#[cfg(feature = "lz4")]
fn lz4_decompress(src: &[u8], max_out: usize) -> Result<Vec<u8>> {
    lz4_flex::block::decompress(src, max_out).map_err(|e| SqfsError::CodecCorrupt {
        codec: "lz4",
        detail: e.to_string(),
    })
}

#[cfg(feature = "zstd")]
fn zstd_decompress(src: &[u8], max_out: usize) -> Result<Vec<u8>> {
    zstd::bulk::decompress(src, max_out).map_err(|e| SqfsError::CodecCorrupt {
        codec: "zstd",
        detail: e.to_string(),
    })
}

#[cfg(feature = "lzo")]
fn lzo_decompress(src: &[u8], max_out: usize) -> Result<Vec<u8>> {
    let mut out = vec![0_u8; max_out];
    let written = {
        let (written, err) = rust_lzo::LZOContext::decompress_to_slice(src, &mut out);
        if !matches!(err, rust_lzo::LZOError::OK) {
            return Err(SqfsError::CodecCorrupt {
                codec: "lzo",
                detail: format!("{err:?}"),
            });
        }
        written.len()
    };
    out.truncate(written);
    Ok(out)
}
