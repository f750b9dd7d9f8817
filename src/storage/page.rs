use byteorder::{BigEndian, ByteOrder};

use crate::common::{DbError, Result};

const INT_SIZE: usize = std::mem::size_of::<i32>();

/// In-memory image of one block. Integers are big-endian; a string is stored
/// as an i32 byte length followed by its UTF-8 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    data: Vec<u8>,
}

impl Page {
    pub fn new(block_size: usize) -> Self {
        Self {
            data: vec![0; block_size],
        }
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    pub fn contents_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Bytes a string occupies on a page, length prefix included.
    pub fn string_size(s: &str) -> usize {
        INT_SIZE + s.len()
    }

    pub fn get_int(&self, offset: usize) -> Result<i32> {
        self.check_bounds(offset, INT_SIZE)?;
        Ok(BigEndian::read_i32(&self.data[offset..offset + INT_SIZE]))
    }

    pub fn set_int(&mut self, offset: usize, value: i32) -> Result<()> {
        self.check_bounds(offset, INT_SIZE)?;
        BigEndian::write_i32(&mut self.data[offset..offset + INT_SIZE], value);
        Ok(())
    }

    pub fn get_string(&self, offset: usize) -> Result<String> {
        let len = self.get_int(offset)?;
        if len < 0 {
            return Err(DbError::Other(format!(
                "negative string length {} at offset {}",
                len, offset
            )));
        }
        let start = offset + INT_SIZE;
        self.check_bounds(start, len as usize)?;
        let bytes = &self.data[start..start + len as usize];
        String::from_utf8(bytes.to_vec())
            .map_err(|e| DbError::Other(format!("invalid utf-8 at offset {}: {}", offset, e)))
    }

    pub fn set_string(&mut self, offset: usize, value: &str) -> Result<()> {
        // Check the whole footprint before touching anything
        self.check_bounds(offset, Self::string_size(value))?;
        self.set_int(offset, value.len() as i32)?;
        let start = offset + INT_SIZE;
        self.data[start..start + value.len()].copy_from_slice(value.as_bytes());
        Ok(())
    }

    /// Offsets of the ints that together cover `[start, end)`. The last one is
    /// pulled back inside the page, so neighbouring slots may overlap.
    pub fn covering_ints(&self, start: usize, end: usize) -> Vec<usize> {
        let last = match self.data.len().checked_sub(INT_SIZE) {
            Some(last) => last,
            None => return Vec::new(),
        };
        let mut slots: Vec<usize> = (start..end.min(self.data.len()))
            .step_by(INT_SIZE)
            .map(|at| at.min(last))
            .collect();
        slots.dedup();
        slots
    }

    fn check_bounds(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(()),
            _ => Err(DbError::PageOverflow {
                offset,
                len,
                block_size: self.data.len(),
            }),
        }
    }
}
