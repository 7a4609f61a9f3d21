//! Byte-buffer primitives.
//!
//! `ByteReader` is a bounds-checked little-endian reader over a borrowed
//! slice; `ByteWriter` is a growable little-endian writer. Both expose
//! absolute seeks because the formats in this crate store absolute file
//! offsets in their tables.
//!
//! The writer tracks a high-water mark: a build can seek backward to
//! backpatch a header and `finish()` still returns everything written.
//! Backpatching itself goes through [`Patch`] handles handed out by
//! `reserve_four`, so call sites never seek back by hand.

use crate::error::{Error, Result};

pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        ByteReader { buf, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn check(&self, ofs: usize, len: usize) -> Result<()> {
        if ofs + len > self.buf.len() {
            return Err(Error::Truncated {
                offset: ofs,
                wanted: len,
            });
        }
        Ok(())
    }

    pub fn get_one(&mut self) -> Result<u8> {
        self.check(self.pos, 1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn get_two(&mut self) -> Result<u16> {
        self.check(self.pos, 2)?;
        let v = u16::from_le_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    pub fn get_four(&mut self) -> Result<u32> {
        self.check(self.pos, 4)?;
        let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    pub fn get_range(&mut self, len: usize) -> Result<&'a [u8]> {
        self.check(self.pos, len)?;
        let v = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(v)
    }

    /// Absolute-offset range read; does not move the cursor.
    pub fn get_range_at(&self, ofs: usize, len: usize) -> Result<&'a [u8]> {
        self.check(ofs, len)?;
        Ok(&self.buf[ofs..ofs + len])
    }

    /// Fixed-width ASCII field, trailing NULs stripped.
    pub fn get_fixed_str(&mut self, width: usize) -> Result<String> {
        let raw = self.get_range(width)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(width);
        Ok(raw[..end].iter().map(|&b| b as char).collect())
    }

    /// Zero-terminated ASCII string.
    pub fn get_cstr(&mut self) -> Result<String> {
        let mut s = String::new();
        loop {
            let b = self.get_one()?;
            if b == 0 {
                return Ok(s);
            }
            s.push(b as char);
        }
    }

    pub fn skip(&mut self, delta: usize) -> Result<()> {
        self.check(self.pos, delta)?;
        self.pos += delta;
        Ok(())
    }

    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.buf.len() {
            return Err(Error::Truncated {
                offset: self.pos,
                wanted: pos - self.pos,
            });
        }
        self.pos = pos;
        Ok(())
    }
}

/// Handle for a reserved 4-byte slot in a [`ByteWriter`].
#[derive(Debug, Clone, Copy)]
pub struct Patch(usize);

#[derive(Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
    pos: usize,
    high: usize,
}

impl ByteWriter {
    pub fn new() -> Self {
        ByteWriter::default()
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    fn ensure(&mut self, len: usize) {
        let needed = self.pos + len;
        if needed > self.buf.len() {
            self.buf.resize(needed, 0);
        }
        if needed > self.high {
            self.high = needed;
        }
    }

    pub fn put_one(&mut self, v: u8) {
        self.ensure(1);
        self.buf[self.pos] = v;
        self.pos += 1;
    }

    pub fn put_two(&mut self, v: u16) {
        self.ensure(2);
        self.buf[self.pos..self.pos + 2].copy_from_slice(&v.to_le_bytes());
        self.pos += 2;
    }

    pub fn put_four(&mut self, v: u32) {
        self.ensure(4);
        self.buf[self.pos..self.pos + 4].copy_from_slice(&v.to_le_bytes());
        self.pos += 4;
    }

    pub fn put_range(&mut self, bytes: &[u8]) {
        self.ensure(bytes.len());
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    pub fn put_zeros(&mut self, len: usize) {
        self.ensure(len);
        self.pos += len;
    }

    /// Zero-terminated ASCII string.
    pub fn put_cstr(&mut self, s: &str) {
        self.put_range(s.as_bytes());
        self.put_one(0);
    }

    /// Fixed-width ASCII field, truncated or NUL-padded to `width`.
    pub fn put_fixed_str(&mut self, s: &str, width: usize) {
        let bytes = s.as_bytes();
        for i in 0..width {
            self.put_one(if i < bytes.len() { bytes[i] } else { 0 });
        }
    }

    /// Reserve a 4-byte slot at the cursor, to be filled in later.
    pub fn reserve_four(&mut self) -> Patch {
        let p = Patch(self.pos);
        self.put_four(0);
        p
    }

    /// Fill a reserved slot. The cursor does not move.
    pub fn patch_four(&mut self, p: Patch, v: u32) {
        self.buf[p.0..p.0 + 4].copy_from_slice(&v.to_le_bytes());
    }

    /// Forward seeks zero-fill and count toward the high-water mark.
    pub fn seek(&mut self, pos: usize) {
        if pos > self.pos {
            self.ensure(pos - self.pos);
        }
        self.pos = pos;
    }

    pub fn skip(&mut self, delta: usize) {
        self.seek(self.pos + delta);
    }

    /// Return the written bytes, truncated to the high-water mark.
    pub fn finish(mut self) -> Vec<u8> {
        self.buf.truncate(self.high);
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn reader_little_endian() {
        let data = [0x01u8, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
        let mut r = ByteReader::new(&data);
        assert_eq!(r.get_one().unwrap(), 0x01);
        assert_eq!(r.get_two().unwrap(), 0x0302);
        assert_eq!(r.get_four().unwrap(), 0x07060504);
        assert_eq!(r.pos(), 7);
    }

    #[test]
    fn reader_truncated() {
        let data = [0u8; 3];
        let mut r = ByteReader::new(&data);
        assert_eq!(
            r.get_four(),
            Err(Error::Truncated {
                offset: 0,
                wanted: 4
            })
        );
    }

    #[test]
    fn reader_strings() {
        let data = b".text\0\0\0foo\0";
        let mut r = ByteReader::new(data);
        assert_eq!(r.get_fixed_str(8).unwrap(), ".text");
        assert_eq!(r.get_cstr().unwrap(), "foo");
    }

    #[test]
    fn writer_backpatch_keeps_cursor() {
        let mut w = ByteWriter::new();
        w.put_four(0x11111111);
        let p = w.reserve_four();
        w.put_four(0x33333333);
        w.patch_four(p, 0x22222222);
        assert_eq!(w.pos(), 12);
        let bytes = w.finish();
        assert_eq!(&bytes[4..8], &0x2222_2222u32.to_le_bytes());
    }

    #[test]
    fn writer_high_water_survives_backward_seek() {
        let mut w = ByteWriter::new();
        w.put_range(&[1, 2, 3, 4, 5, 6, 7, 8]);
        w.seek(0);
        w.put_one(0xff);
        let bytes = w.finish();
        assert_eq!(bytes.len(), 8);
        assert_eq!(bytes[0], 0xff);
        assert_eq!(bytes[7], 8);
    }

    #[test]
    fn writer_trailing_skip_extends() {
        let mut w = ByteWriter::new();
        w.put_one(1);
        w.skip(7);
        assert_eq!(w.finish(), vec![1, 0, 0, 0, 0, 0, 0, 0]);
    }
}
