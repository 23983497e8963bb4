//! Block map: one `{ i32 offset, u32 length }` entry per representation.
//!
//! Offsets are relative to the start of the payload region.  The wire
//! sentinel [`BACK_REFERENCE`] marks an entry whose length field is a dedup
//! index instead of a byte count; in memory that is [`BlockEntry::BackReference`].

use std::io::{Read, Write};

use super::header::{FieldReader, FieldWriter};
use crate::error::{Error, Result};

pub const ENTRY_SIZE: usize = 8;

/// Offset value that can never be a legitimate (non-negative) offset.
pub const BACK_REFERENCE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockEntry {
    Data { offset: u64, length: u64 },
    BackReference(u32),
}

impl BlockEntry {
    pub fn read<R: Read>(f: &mut FieldReader<R>) -> Result<Self> {
        let offset = f.i32()?;
        let length = f.u32()?;
        match offset {
            BACK_REFERENCE => Ok(BlockEntry::BackReference(length)),
            o if o < 0 => Err(Error::Corrupt(format!("negative block offset {o}"))),
            o => Ok(BlockEntry::Data { offset: o as u64, length: length as u64 }),
        }
    }

    pub fn write<W: Write>(&self, f: &mut FieldWriter<W>) -> Result<()> {
        match *self {
            BlockEntry::Data { offset, length } => {
                let offset = i32::try_from(offset)
                    .map_err(|_| Error::Unsupported(format!("payload offset {offset} exceeds format range")))?;
                let length = u32::try_from(length)
                    .map_err(|_| Error::Unsupported(format!("payload length {length} exceeds format range")))?;
                f.i32(offset)?;
                f.u32(length)?;
            }
            BlockEntry::BackReference(index) => {
                f.i32(BACK_REFERENCE)?;
                f.u32(index)?;
            }
        }
        Ok(())
    }
}
