//! Binary stream read inside a decoded frame: `cmd`, `seq`, a
//! length-prefixed body, and whatever extra typed fields a given
//! command appends after the body.

use bytes::{Buf, BufMut, BytesMut};

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("unexpected end of payload, needed {needed} more bytes")]
    Truncated { needed: usize },
    #[error("length-prefixed field too large: {0} bytes")]
    FieldTooLarge(usize),
    #[error("field was not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

pub type PayloadResult<T> = Result<T, PayloadError>;

/// Largest length prefix this codec will honour for a single field.
/// Bounds the amount of memory a malformed prefix can make us
/// allocate before we ever see the bytes it claims follow it.
const MAX_FIELD_LEN: usize = 16 * 1024 * 1024;

pub struct PayloadReader<'a> {
    buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn require(&self, n: usize) -> PayloadResult<()> {
        if self.buf.len() < n {
            Err(PayloadError::Truncated { needed: n - self.buf.len() })
        } else {
            Ok(())
        }
    }

    pub fn read_i32(&mut self) -> PayloadResult<i32> {
        self.require(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn read_i64(&mut self) -> PayloadResult<i64> {
        self.require(8)?;
        Ok(self.buf.get_i64_le())
    }

    pub fn read_bytes(&mut self) -> PayloadResult<Vec<u8>> {
        self.require(4)?;
        let len = self.buf.get_u32_le() as usize;
        if len > MAX_FIELD_LEN {
            return Err(PayloadError::FieldTooLarge(len));
        }
        self.require(len)?;
        let out = self.buf[..len].to_vec();
        self.buf.advance(len);
        Ok(out)
    }

    pub fn read_str(&mut self) -> PayloadResult<String> {
        let raw = self.read_bytes()?;
        Ok(std::str::from_utf8(&raw)?.to_owned())
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }
}

#[derive(Default)]
pub struct PayloadWriter {
    buf: BytesMut,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    pub fn write_i32(&mut self, v: i32) -> &mut Self {
        self.buf.put_i32_le(v);
        self
    }

    pub fn write_i64(&mut self, v: i64) -> &mut Self {
        self.buf.put_i64_le(v);
        self
    }

    pub fn write_bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.put_u32_le(v.len() as u32);
        self.buf.extend_from_slice(v);
        self
    }

    pub fn write_str(&mut self, v: &str) -> &mut Self {
        self.write_bytes(v.as_bytes())
    }

    /// Appends bytes verbatim, with no length prefix. Used for
    /// extra fields that were already encoded by the caller (a
    /// raw `i32` chat target, a pre-built extras blob being
    /// forwarded unchanged).
    pub fn raw(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    pub fn into_bytes(self) -> BytesMut {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_i32_i64_and_bytes() {
        let mut w = PayloadWriter::new();
        w.write_i32(-7).write_i64(1_234_567_890_123).write_bytes(b"hello");
        let buf = w.into_bytes();

        let mut r = PayloadReader::new(&buf);
        assert_eq!(r.read_i32().unwrap(), -7);
        assert_eq!(r.read_i64().unwrap(), 1_234_567_890_123);
        assert_eq!(r.read_bytes().unwrap(), b"hello");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn read_str_validates_utf8() {
        let mut w = PayloadWriter::new();
        w.write_bytes(&[0xff, 0xfe]);
        let buf = w.into_bytes();
        let mut r = PayloadReader::new(&buf);
        assert!(r.read_str().is_err());
    }

    #[test]
    fn truncated_read_reports_needed_bytes() {
        let mut r = PayloadReader::new(&[0u8, 1, 2]);
        let err = r.read_i64().unwrap_err();
        assert!(matches!(err, PayloadError::Truncated { needed: 5 }));
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(MAX_FIELD_LEN as u32 + 1);
        let mut r = PayloadReader::new(&buf);
        assert!(matches!(r.read_bytes(), Err(PayloadError::FieldTooLarge(_))));
    }
}
