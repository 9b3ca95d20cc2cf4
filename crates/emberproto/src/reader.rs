use bytes::Bytes;

use crate::ProtoError;

/// Little-endian cursor over one packet body.
///
/// Every read is bounds-checked against the frame it was handed; a short
/// field comes back as [`ProtoError::TooShort`] rather than a panic.
pub struct PacketReader {
    buf: Bytes,
    offset: usize,
}

impl PacketReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn take(&mut self, n: usize) -> Result<&[u8], ProtoError> {
        if self.remaining() < n {
            return Err(ProtoError::TooShort {
                need: self.offset + n,
                got: self.buf.len(),
            });
        }
        let s = &self.buf[self.offset..self.offset + n];
        self.offset += n;
        Ok(s)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), ProtoError> {
        self.take(n).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtoError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, ProtoError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16_le(&mut self) -> Result<u16, ProtoError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_i16_le(&mut self) -> Result<i16, ProtoError> {
        Ok(self.read_u16_le()? as i16)
    }

    pub fn read_u32_le(&mut self) -> Result<u32, ProtoError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32_le(&mut self) -> Result<i32, ProtoError> {
        Ok(self.read_u32_le()? as i32)
    }

    pub fn read_u64_le(&mut self) -> Result<u64, ProtoError> {
        let b = self.take(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Ok(u64::from_le_bytes(a))
    }

    pub fn read_i64_le(&mut self) -> Result<i64, ProtoError> {
        Ok(self.read_u64_le()? as i64)
    }

    /// NUL-terminated byte run; the terminator is consumed. Non-UTF8 input
    /// is replaced, not rejected; account names arrive from a peer we do
    /// not control.
    pub fn read_cstring(&mut self) -> Result<String, ProtoError> {
        let rest = &self.buf[self.offset..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtoError::Malformed("unterminated string"))?;
        let s = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.offset += end + 1;
        Ok(s)
    }

    /// Whatever is left of the body, as an owned slice of the frame.
    pub fn rest(&mut self) -> Bytes {
        let out = self.buf.slice(self.offset..);
        self.offset = self.buf.len();
        out
    }
}
