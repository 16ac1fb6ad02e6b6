//! Random-access reader over an immutable ROM or sequence blob.
//!
//! Offsets are flat indices into the loaded buffer. Pointers stored inside
//! the data are bus addresses and go through [`SequenceReader::translate`],
//! which subtracts the reader's base address (the cartridge base for M4A,
//! zero for SDAT files whose offsets are already file-relative).

use alloc::sync::Arc;

use crate::error::ReadError;

/// Address at which the GBA maps cartridge ROM.
pub const GBA_ROM_BASE: u32 = 0x0800_0000;

/// Shared, cheaply clonable view of a loaded blob.
#[derive(Clone, Debug)]
pub struct SequenceReader {
    data: Arc<[u8]>,
    base: u32,
}

impl SequenceReader {
    /// Reader whose pointers are plain file offsets.
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self::with_base(data, 0)
    }

    /// Reader whose pointers are bus addresses starting at `base`.
    pub fn with_base(data: impl Into<Arc<[u8]>>, base: u32) -> Self {
        Self {
            data: data.into(),
            base,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// The whole blob.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    fn out_of_range(&self, offset: usize) -> ReadError {
        ReadError::OutOfRange {
            offset,
            len: self.data.len(),
        }
    }

    /// Convert a stored pointer into a flat offset, rejecting anything
    /// outside the blob.
    pub fn translate(&self, pointer: u32) -> Result<usize, ReadError> {
        let offset = pointer
            .checked_sub(self.base)
            .ok_or_else(|| self.out_of_range(pointer as usize))? as usize;
        if offset >= self.data.len() {
            return Err(self.out_of_range(offset));
        }
        Ok(offset)
    }

    pub fn read_bytes(&self, offset: usize, len: usize) -> Result<&[u8], ReadError> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| self.out_of_range(offset))?;
        self.data
            .get(offset..end)
            .ok_or_else(|| self.out_of_range(offset))
    }

    pub fn read_u8(&self, offset: usize) -> Result<u8, ReadError> {
        self.data
            .get(offset)
            .copied()
            .ok_or_else(|| self.out_of_range(offset))
    }

    pub fn read_u16(&self, offset: usize) -> Result<u16, ReadError> {
        let b = self.read_bytes(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32, ReadError> {
        let b = self.read_bytes(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a stored pointer at `offset` and translate it.
    pub fn read_pointer(&self, offset: usize) -> Result<usize, ReadError> {
        self.translate(self.read_u32(offset)?)
    }

    /// A forward-reading cursor starting at `offset`.
    pub fn cursor(&self, offset: usize) -> Cursor<'_> {
        Cursor {
            reader: self,
            offset,
        }
    }
}

/// Sequential reader over a [`SequenceReader`]. Advances only on success.
#[derive(Clone, Debug)]
pub struct Cursor<'a> {
    reader: &'a SequenceReader,
    offset: usize,
}

impl<'a> Cursor<'a> {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn reader(&self) -> &'a SequenceReader {
        self.reader
    }

    /// Move to a flat offset, validating it lies inside the blob.
    pub fn set_offset(&mut self, offset: usize) -> Result<(), ReadError> {
        if offset >= self.reader.len() {
            return Err(self.reader.out_of_range(offset));
        }
        self.offset = offset;
        Ok(())
    }

    /// Move to a stored pointer's target.
    pub fn set_pointer(&mut self, pointer: u32) -> Result<(), ReadError> {
        self.offset = self.reader.translate(pointer)?;
        Ok(())
    }

    /// Next byte without consuming it.
    pub fn peek(&self) -> Result<u8, ReadError> {
        self.reader.read_u8(self.offset)
    }

    pub fn u8(&mut self) -> Result<u8, ReadError> {
        let v = self.reader.read_u8(self.offset)?;
        self.offset += 1;
        Ok(v)
    }

    pub fn i8(&mut self) -> Result<i8, ReadError> {
        Ok(self.u8()? as i8)
    }

    pub fn u16(&mut self) -> Result<u16, ReadError> {
        let v = self.reader.read_u16(self.offset)?;
        self.offset += 2;
        Ok(v)
    }

    pub fn i16(&mut self) -> Result<i16, ReadError> {
        Ok(self.u16()? as i16)
    }

    /// Little-endian 24-bit value.
    pub fn u24(&mut self) -> Result<u32, ReadError> {
        let b = self.reader.read_bytes(self.offset, 3)?;
        let v = u32::from_le_bytes([b[0], b[1], b[2], 0]);
        self.offset += 3;
        Ok(v)
    }

    pub fn u32(&mut self) -> Result<u32, ReadError> {
        let v = self.reader.read_u32(self.offset)?;
        self.offset += 4;
        Ok(v)
    }

    /// Stored pointer, translated to a flat offset.
    pub fn pointer(&mut self) -> Result<usize, ReadError> {
        let raw = self.reader.read_u32(self.offset)?;
        let target = self.reader.translate(raw)?;
        self.offset += 4;
        Ok(target)
    }

    /// MIDI-style variable-length quantity, 7 bits per byte, at most 4 bytes.
    pub fn var_len(&mut self) -> Result<u32, ReadError> {
        let start = self.offset;
        let mut value = 0u32;
        for _ in 0..4 {
            let byte = match self.u8() {
                Ok(b) => b,
                Err(e) => {
                    self.offset = start;
                    return Err(e);
                }
            };
            value = (value << 7) | u32::from(byte & 0x7F);
            if byte & 0x80 == 0 {
                break;
            }
        }
        Ok(value)
    }
}
