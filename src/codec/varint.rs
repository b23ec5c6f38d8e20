//! Variable-length integers and the byte reader the decoders share.
//!
//! Integers are unsigned LEB128: seven bits per byte, low bits first, high
//! bit set on every byte except the last. Strings and byte blobs are
//! prefixed with their byte length.

use crate::error::CodecError;

// =============================================================================
// Writing
// =============================================================================

pub(crate) fn write_u8(buf: &mut Vec<u8>, value: u8) {
    buf.push(value);
}

pub(crate) fn write_var(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

pub(crate) fn write_buf(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_var(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

pub(crate) fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_buf(buf, s.as_bytes());
}

// =============================================================================
// Reading
// =============================================================================

/// A cursor over an input buffer. Every read is bounds checked.
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Reader<'a> {
        return Reader { bytes, pos: 0 };
    }

    pub fn position(&self) -> usize {
        return self.pos;
    }

    pub fn is_empty(&self) -> bool {
        return self.pos >= self.bytes.len();
    }

    /// Fail unless every byte has been consumed.
    pub fn finish(&self) -> Result<(), CodecError> {
        if !self.is_empty() {
            return Err(CodecError::TrailingBytes(self.bytes.len() - self.pos));
        }
        return Ok(());
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        let byte = *self.bytes.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        self.pos += 1;
        return Ok(byte);
    }

    pub fn read_var(&mut self) -> Result<u64, CodecError> {
        let mut value: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            let bits = (byte & 0x7f) as u64;
            if shift >= 64 || (shift == 63 && bits > 1) {
                return Err(CodecError::VarIntOverflow(64));
            }
            value |= bits << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    pub fn read_var_u32(&mut self) -> Result<u32, CodecError> {
        let value = self.read_var()?;
        return u32::try_from(value).map_err(|_| CodecError::VarIntOverflow(32));
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(len).ok_or(CodecError::UnexpectedEof)?;
        let bytes = self.bytes.get(self.pos..end).ok_or(CodecError::UnexpectedEof)?;
        self.pos = end;
        return Ok(bytes);
    }

    pub fn read_buf(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.read_var()?;
        let len = usize::try_from(len).map_err(|_| CodecError::UnexpectedEof)?;
        return self.read_bytes(len);
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let bytes = self.read_buf()?;
        let s = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
        return Ok(s.to_string());
    }
}
