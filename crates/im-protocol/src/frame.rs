//! Length-prefixed, optionally deflate-compressed frame codec.
//!
//! The wire header is three little-endian `u32` words: a compression
//! flag, the on-wire payload length, and the length the payload has
//! once decompressed. Frames whose declared sizes are non-positive or
//! exceed [`MAX_PACKAGE_SIZE`] are rejected without attempting to read
//! further from the stream — the connection that sent them is not
//! worth resynchronising with.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::bufread::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::io::Read;
use tokio_util::codec::{Decoder, Encoder};

/// Header size in bytes: three little-endian u32 words.
pub const HEADER_LEN: usize = 12;

/// Largest payload (compressed or plain) the codec will accept.
pub const MAX_PACKAGE_SIZE: u32 = 10 * 1024 * 1024;

/// Outbound frames at or above this size are compressed; smaller
/// frames are sent plain, matching the threshold the server applies
/// when building responses.
pub const DEFAULT_COMPRESS_THRESHOLD: usize = 1024;

const COMPRESS_FLAG_NONE: u32 = 0;
const COMPRESS_FLAG_DEFLATE: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame size out of bounds: compressSize={compress_size}, originSize={origin_size}")]
    SizeOutOfBounds { compress_size: u32, origin_size: u32 },
    #[error("unknown compression flag {0}")]
    UnknownCompressFlag(u32),
    #[error("decompression failed: {0}")]
    Decompress(#[source] std::io::Error),
    #[error("decompressed length {actual} did not match declared originSize {expected}")]
    InflatedLengthMismatch { expected: u32, actual: usize },
    #[error("compression failed: {0}")]
    Compress(#[source] std::io::Error),
    #[error("payload too large to encode: {0} bytes")]
    EncodeTooLarge(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Decodes and encodes frames over a byte stream, surfacing plain
/// (already-inflated) payload bytes to the layer above.
#[derive(Debug, Default)]
pub struct FrameCodec {
    compress_threshold: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            compress_threshold: DEFAULT_COMPRESS_THRESHOLD,
        }
    }

    pub fn with_compress_threshold(compress_threshold: usize) -> Self {
        Self { compress_threshold }
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let compress_flag = u32::from_le_bytes(src[0..4].try_into().unwrap());
        let compress_size = u32::from_le_bytes(src[4..8].try_into().unwrap());
        let origin_size = u32::from_le_bytes(src[8..12].try_into().unwrap());

        let compressed = match compress_flag {
            COMPRESS_FLAG_NONE => false,
            COMPRESS_FLAG_DEFLATE => true,
            other => return Err(FrameError::UnknownCompressFlag(other)),
        };

        if origin_size == 0
            || origin_size > MAX_PACKAGE_SIZE
            || (compressed && (compress_size == 0 || compress_size > MAX_PACKAGE_SIZE))
        {
            return Err(FrameError::SizeOutOfBounds {
                compress_size,
                origin_size,
            });
        }

        let on_wire_len = if compressed { compress_size } else { origin_size } as usize;
        let needed = HEADER_LEN + on_wire_len;
        if src.len() < needed {
            src.reserve(needed - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let raw = src.split_to(on_wire_len);

        if !compressed {
            return Ok(Some(raw));
        }

        let mut decoder = ZlibDecoder::new(&raw[..]);
        let mut out = Vec::with_capacity(origin_size as usize);
        decoder.read_to_end(&mut out).map_err(FrameError::Decompress)?;
        if out.len() != origin_size as usize {
            return Err(FrameError::InflatedLengthMismatch {
                expected: origin_size,
                actual: out.len(),
            });
        }
        Ok(Some(BytesMut::from(&out[..])))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let origin_size = item.len();
        if origin_size == 0 || origin_size as u64 > MAX_PACKAGE_SIZE as u64 {
            return Err(FrameError::EncodeTooLarge(origin_size));
        }

        if origin_size < self.compress_threshold {
            dst.put_u32_le(COMPRESS_FLAG_NONE);
            dst.put_u32_le(0);
            dst.put_u32_le(origin_size as u32);
            dst.extend_from_slice(&item);
            return Ok(());
        }

        let mut encoder = ZlibEncoder::new(&item[..], Compression::default());
        let mut compressed = Vec::new();
        encoder.read_to_end(&mut compressed).map_err(FrameError::Compress)?;

        dst.put_u32_le(COMPRESS_FLAG_DEFLATE);
        dst.put_u32_le(compressed.len() as u32);
        dst.put_u32_le(origin_size as u32);
        dst.extend_from_slice(&compressed);
        Ok(())
    }
}
