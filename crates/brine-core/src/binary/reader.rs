//! Byte cursor with LEB128 decoding and absolute offset tracking.

use crate::error::DecodeError;
use crate::types::{Limits, RefType, ValType};

pub type Result<T> = std::result::Result<T, DecodeError>;

/// Cursor over a byte slice.
///
/// `base` is the absolute offset of `bytes[0]` within the module, so errors
/// raised by sub-readers still report module offsets.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            base: 0,
        }
    }

    /// Absolute offset of the next byte.
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// A `DecodeError` at the current offset.
    pub fn error(&self, message: impl Into<String>) -> DecodeError {
        DecodeError::new(message, self.offset())
    }

    pub fn peek_u8(&self) -> Result<u8> {
        self.bytes
            .get(self.pos)
            .copied()
            .ok_or_else(|| self.error("unexpected end"))
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = self.peek_u8()?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| self.error("unexpected end"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Split off the next `len` bytes as an independent reader.
    pub fn sub_reader(&mut self, len: usize) -> Result<Reader<'a>> {
        let base = self.offset();
        let bytes = self.read_bytes(len)?;
        Ok(Reader {
            bytes,
            pos: 0,
            base,
        })
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.read_bytes(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.read_bytes(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    // ── LEB128 ────────────────────────────────────────────────────────

    /// Unsigned LEB128 `u32`: at most 5 bytes, unused bits of the last byte
    /// must be zero.
    pub fn read_var_u32(&mut self) -> Result<u32> {
        let mut result: u32 = 0;
        for i in 0..5 {
            let byte = self.read_u8()?;
            if i == 4 {
                if byte & 0x80 != 0 {
                    return Err(self.error("integer representation too long"));
                }
                if byte & 0x70 != 0 {
                    return Err(self.error("integer too large"));
                }
            }
            result |= ((byte & 0x7f) as u32) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(self.error("integer representation too long"))
    }

    pub fn read_var_i32(&mut self) -> Result<i32> {
        self.read_signed(32).map(|v| v as i32)
    }

    pub fn read_var_i64(&mut self) -> Result<i64> {
        self.read_signed(64)
    }

    /// Signed 33-bit LEB128, used for block type indices.
    pub fn read_var_s33(&mut self) -> Result<i64> {
        self.read_signed(33)
    }

    /// Signed LEB128 of width `bits`. Unused bits of the final byte must be
    /// copies of the sign bit.
    fn read_signed(&mut self, bits: u32) -> Result<i64> {
        let max_bytes = bits.div_ceil(7);
        let mut result: i64 = 0;
        let mut shift = 0u32;
        for i in 0..max_bytes {
            let byte = self.read_u8()?;
            let last = i + 1 == max_bytes;
            if last {
                if byte & 0x80 != 0 {
                    return Err(self.error("integer representation too long"));
                }
                let used = bits - 7 * (max_bytes - 1);
                let mask = (0x7fu8 << (used - 1)) & 0x7f;
                let rest = byte & mask;
                if rest != 0 && rest != mask {
                    return Err(self.error("integer too large"));
                }
            }
            result |= ((byte & 0x7f) as i64) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                return Ok(result);
            }
        }
        Err(self.error("integer representation too long"))
    }

    // ── Composite encodings ───────────────────────────────────────────

    /// Length-prefixed UTF-8 name.
    pub fn read_name(&mut self) -> Result<String> {
        let len = self.read_var_u32()? as usize;
        let offset = self.offset();
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::new("malformed UTF-8 encoding", offset))
    }

    /// Vector length prefix. A count that cannot possibly fit in the
    /// remaining bytes is rejected before anything is allocated.
    pub fn read_count(&mut self) -> Result<u32> {
        let count = self.read_var_u32()?;
        if count as usize > self.remaining() {
            return Err(self.error("unexpected end"));
        }
        Ok(count)
    }

    /// `vec(T)` decoded element by element.
    pub fn read_vec<T>(&mut self, mut item: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let count = self.read_count()?;
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            items.push(item(self)?);
        }
        Ok(items)
    }

    pub fn read_val_type(&mut self) -> Result<ValType> {
        let offset = self.offset();
        let byte = self.read_u8()?;
        val_type_from_byte(byte)
            .ok_or_else(|| DecodeError::new(format!("malformed value type 0x{byte:02x}"), offset))
    }

    pub fn read_ref_type(&mut self) -> Result<RefType> {
        let offset = self.offset();
        match self.read_u8()? {
            0x70 => Ok(RefType::Func),
            0x6f => Ok(RefType::Extern),
            _ => Err(DecodeError::new("malformed reference type", offset)),
        }
    }

    pub fn read_limits(&mut self) -> Result<Limits> {
        let offset = self.offset();
        match self.read_u8()? {
            0x00 => Ok(Limits {
                min: self.read_var_u32()?,
                max: None,
            }),
            0x01 => Ok(Limits {
                min: self.read_var_u32()?,
                max: Some(self.read_var_u32()?),
            }),
            _ => Err(DecodeError::new("integer too large", offset)),
        }
    }
}

pub(crate) fn val_type_from_byte(byte: u8) -> Option<ValType> {
    match byte {
        0x7f => Some(ValType::I32),
        0x7e => Some(ValType::I64),
        0x7d => Some(ValType::F32),
        0x7c => Some(ValType::F64),
        0x70 => Some(ValType::FuncRef),
        0x6f => Some(ValType::ExternRef),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(bytes: &[u8]) -> Reader<'_> {
        Reader::new(bytes)
    }

    #[test]
    fn unsigned_leb() {
        assert_eq!(reader(&[0x00]).read_var_u32(), Ok(0));
        assert_eq!(reader(&[0xe5, 0x8e, 0x26]).read_var_u32(), Ok(624485));
        assert_eq!(
            reader(&[0xff, 0xff, 0xff, 0xff, 0x0f]).read_var_u32(),
            Ok(u32::MAX)
        );
        // padded zero is fine as long as it fits in 5 bytes
        assert_eq!(reader(&[0x80, 0x80, 0x80, 0x80, 0x00]).read_var_u32(), Ok(0));
    }

    #[test]
    fn unsigned_leb_rejects_long_and_large() {
        let err = reader(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x00])
            .read_var_u32()
            .unwrap_err();
        assert_eq!(err.message, "integer representation too long");
        let err = reader(&[0xff, 0xff, 0xff, 0xff, 0x1f]).read_var_u32().unwrap_err();
        assert_eq!(err.message, "integer too large");
    }

    #[test]
    fn signed_leb() {
        assert_eq!(reader(&[0x7f]).read_var_i32(), Ok(-1));
        assert_eq!(reader(&[0xc0, 0xbb, 0x78]).read_var_i32(), Ok(-123456));
        assert_eq!(
            reader(&[0x80, 0x80, 0x80, 0x80, 0x78]).read_var_i32(),
            Ok(i32::MIN)
        );
        assert_eq!(
            reader(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x7f]).read_var_i64(),
            Ok(i64::MIN)
        );
    }

    #[test]
    fn signed_leb_rejects_bad_sign_extension() {
        // bit 31 set but unused bits are zero
        let err = reader(&[0x80, 0x80, 0x80, 0x80, 0x70]).read_var_i32().unwrap_err();
        assert_eq!(err.message, "integer too large");
        let err = reader(&[0xff, 0xff, 0xff, 0xff, 0x4f]).read_var_i32().unwrap_err();
        assert_eq!(err.message, "integer too large");
    }

    #[test]
    fn s33_accepts_type_index() {
        assert_eq!(reader(&[0x05]).read_var_s33(), Ok(5));
        assert_eq!(reader(&[0x40]).read_var_s33(), Ok(-64));
    }

    #[test]
    fn sub_reader_reports_absolute_offsets() {
        let mut r = reader(&[1, 2, 3, 4]);
        r.read_u8().unwrap();
        let mut sub = r.sub_reader(2).unwrap();
        assert_eq!(sub.offset(), 1);
        sub.read_bytes(2).unwrap();
        assert_eq!(sub.read_u8().unwrap_err().offset, 3);
        assert_eq!(r.offset(), 3);
    }

    #[test]
    fn names_must_be_utf8() {
        assert_eq!(reader(&[2, b'o', b'k']).read_name(), Ok("ok".to_string()));
        let err = reader(&[1, 0xff]).read_name().unwrap_err();
        assert_eq!(err.message, "malformed UTF-8 encoding");
    }

    #[test]
    fn counts_larger_than_input_fail_early() {
        let err = reader(&[0xff, 0xff, 0x03]).read_count().unwrap_err();
        assert_eq!(err.message, "unexpected end");
    }
}
