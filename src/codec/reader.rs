//! Bounded Byte Views
//!
//! Cursor types used by the codec. Every read is checked against the
//! remaining length of the underlying slice; nothing ever advances past
//! the end of a validated buffer.

use super::CodecError;

/// Read cursor over an immutable byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Create a reader positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to consume.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// True once every byte has been consumed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Take the next `len` bytes.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if len > self.remaining() {
            return Err(CodecError::Truncated {
                needed: len,
                available: self.remaining(),
            });
        }
        let buf: &'a [u8] = self.buf;
        let bytes = &buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Split off a sub-reader over the next `len` bytes.
    pub fn sub_reader(&mut self, len: usize) -> Result<ByteReader<'a>, CodecError> {
        self.take(len).map(ByteReader::new)
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    /// Read a big-endian u32.
    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a big-endian i32.
    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        self.read_u32().map(|v| v as i32)
    }

    /// Read a length field and check it against what is left.
    ///
    /// `unit` is the byte size of one counted element, so a claimed length
    /// can be rejected before any allocation happens.
    pub fn read_len(&mut self, unit: usize) -> Result<usize, CodecError> {
        let len = self.read_u32()? as usize;
        let needed = len.saturating_mul(unit);
        if needed > self.remaining() {
            return Err(CodecError::Truncated {
                needed,
                available: self.remaining(),
            });
        }
        Ok(len)
    }

    /// Read bytes up to (not including) the next NUL and skip the NUL.
    pub fn read_cstr(&mut self) -> Result<&'a [u8], CodecError> {
        let buf: &'a [u8] = self.buf;
        let rest = &buf[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(CodecError::UnterminatedString)?;
        let bytes = &rest[..end];
        self.pos += end + 1;
        Ok(bytes)
    }

    /// Fail unless every byte has been consumed.
    pub fn finish(&self) -> Result<(), CodecError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes {
                count: self.remaining(),
            })
        }
    }
}

/// Append-only writer with big-endian helpers.
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Current length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when nothing has been written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append one byte.
    #[inline]
    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Append a big-endian u32.
    #[inline]
    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Append a big-endian i32.
    #[inline]
    pub fn put_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Append raw bytes.
    #[inline]
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Append bytes followed by a NUL terminator.
    #[inline]
    pub fn put_cstr(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        self.buf.push(0);
    }

    /// Reserve a u32 slot to be filled in later with [`ByteWriter::patch_u32`].
    pub fn reserve_u32(&mut self) -> usize {
        let at = self.buf.len();
        self.put_u32(0);
        at
    }

    /// Overwrite a previously reserved u32 slot.
    pub fn patch_u32(&mut self, at: usize, value: u32) {
        self.buf[at..at + 4].copy_from_slice(&value.to_be_bytes());
    }

    /// Consume the writer.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_past_end_is_truncated() {
        let data = [1u8, 2, 3];
        let mut r = ByteReader::new(&data);
        assert_eq!(r.take(2).unwrap(), &[1, 2]);
        assert!(matches!(
            r.take(2),
            Err(CodecError::Truncated { needed: 2, available: 1 })
        ));
        // A failed read does not move the cursor.
        assert_eq!(r.position(), 2);
    }

    #[test]
    fn test_read_len_rejects_oversized_claim() {
        let mut w = ByteWriter::new();
        w.put_u32(1_000_000);
        w.put_u32(7);
        let bytes = w.into_inner();
        let mut r = ByteReader::new(&bytes);
        assert!(matches!(r.read_len(4), Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn test_cstr() {
        let data = b"abc\0de";
        let mut r = ByteReader::new(data);
        assert_eq!(r.read_cstr().unwrap(), b"abc");
        assert!(matches!(r.read_cstr(), Err(CodecError::UnterminatedString)));
    }

    #[test]
    fn test_finish_reports_trailing() {
        let data = [0u8; 3];
        let mut r = ByteReader::new(&data);
        r.read_u8().unwrap();
        assert!(matches!(r.finish(), Err(CodecError::TrailingBytes { count: 2 })));
    }

    #[test]
    fn test_patch_reserved_slot() {
        let mut w = ByteWriter::new();
        let at = w.reserve_u32();
        w.put_bytes(b"xyz");
        w.patch_u32(at, 3);
        let bytes = w.into_inner();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_u32().unwrap(), 3);
        assert_eq!(r.take(3).unwrap(), b"xyz");
    }
}
