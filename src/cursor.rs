//! Bounded little-endian reader over an in-memory buffer
//!
//! Every read is checked against the buffer end; a failed read reports the
//! offset and length it attempted instead of panicking.

/// A read that would run past the end of the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutOfBounds {
    /// Offset where the read started
    pub offset: usize,
    /// Bytes requested
    pub needed: usize,
}

/// Position + bounded read over a byte slice
#[derive(Clone, Debug)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    /// Cursor at offset 0.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Cursor at `offset`; the offset itself is validated on first read.
    pub fn at(data: &'a [u8], offset: usize) -> Self {
        Self { data, pos: offset }
    }

    /// Current offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left after the current offset.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Move to an absolute offset.
    pub fn seek(&mut self, offset: usize) {
        self.pos = offset;
    }

    /// Borrow `len` bytes and advance past them.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], OutOfBounds> {
        let err = OutOfBounds {
            offset: self.pos,
            needed: len,
        };
        let end = self.pos.checked_add(len).ok_or(err)?;
        let bytes = self.data.get(self.pos..end).ok_or(err)?;
        self.pos = end;
        Ok(bytes)
    }

    /// Advance without reading.
    pub fn skip(&mut self, len: usize) -> Result<(), OutOfBounds> {
        self.take(len).map(|_| ())
    }

    /// Read a little-endian `u16`.
    pub fn read_u16_le(&mut self) -> Result<u16, OutOfBounds> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a little-endian `u32`.
    pub fn read_u32_le(&mut self) -> Result<u32, OutOfBounds> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a little-endian `u32` without advancing.
    pub fn peek_u32_le(&self) -> Result<u32, OutOfBounds> {
        self.clone().read_u32_le()
    }
}
