//! Container header: one canonical in-memory shape, per-version codecs.
//!
//! # On-disk layout
//!
//! ```text
//! minimal header (16 B, every version)
//!   u32 signature      SIGNATURE ("MPIC"), its byte-reversed form, or 0
//!   u32 version        5..=8
//!   u32 count          block-map entries
//!   u32 payload_size   bytes in the payload region
//! extended header
//!   v5      (none)
//!   v6      u32 name_table_size, u32 bag_size
//!   v7, v8  u32 name_table_size, u32 bag_size, u32 extra_size
//! ```
//!
//! # Endianness
//! The format is nominally little-endian.  A reader that sees the reversed
//! signature byteswaps every multi-byte field that follows; the swap is one
//! explicit step per field in [`FieldReader`], independent of the layout.

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::error::{Error, Result};

/// "MPIC" in little-endian byte order.
pub const SIGNATURE:         u32 = 0x4349_504D;
/// Written by big-endian producers; means "byteswap everything after".
pub const SIGNATURE_SWAPPED: u32 = 0x4D50_4943;

pub const MIN_VERSION:     u32 = 5;
pub const CURRENT_VERSION: u32 = 8;

/// First version with a metadata bag.
pub const BAG_VERSION:        u32 = 6;
/// First version with an extra-data trailer.
pub const EXTRA_VERSION:      u32 = 7;
/// First version whose payloads carry their own identifier.
pub const EMBEDDED_ID_VERSION: u32 = 8;

pub const MINIMAL_HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

// ── Field I/O ────────────────────────────────────────────────────────────────

/// Reads little-endian fields, byteswapping each one when `swap` is set.
pub struct FieldReader<R> {
    inner: R,
    swap:  bool,
}

impl<R: Read> FieldReader<R> {
    pub fn new(inner: R, swap: bool) -> Self {
        Self { inner, swap }
    }

    pub fn u16(&mut self) -> io::Result<u16> {
        let v = self.inner.read_u16::<LittleEndian>()?;
        Ok(if self.swap { v.swap_bytes() } else { v })
    }

    pub fn u32(&mut self) -> io::Result<u32> {
        let v = self.inner.read_u32::<LittleEndian>()?;
        Ok(if self.swap { v.swap_bytes() } else { v })
    }

    pub fn i32(&mut self) -> io::Result<i32> {
        let v = self.inner.read_i32::<LittleEndian>()?;
        Ok(if self.swap { v.swap_bytes() } else { v })
    }

    pub fn bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = crate::error::try_alloc(len)?;
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn inner_mut(&mut self) -> &mut R { &mut self.inner }
}

/// Writes fields in the chosen byte order.
pub struct FieldWriter<W> {
    inner:  W,
    endian: Endian,
}

impl<W: Write> FieldWriter<W> {
    pub fn new(inner: W, endian: Endian) -> Self {
        Self { inner, endian }
    }

    pub fn u16(&mut self, v: u16) -> io::Result<()> {
        match self.endian {
            Endian::Little => self.inner.write_u16::<LittleEndian>(v),
            Endian::Big    => self.inner.write_u16::<BigEndian>(v),
        }
    }

    pub fn u32(&mut self, v: u32) -> io::Result<()> {
        match self.endian {
            Endian::Little => self.inner.write_u32::<LittleEndian>(v),
            Endian::Big    => self.inner.write_u32::<BigEndian>(v),
        }
    }

    pub fn i32(&mut self, v: i32) -> io::Result<()> {
        match self.endian {
            Endian::Little => self.inner.write_i32::<LittleEndian>(v),
            Endian::Big    => self.inner.write_i32::<BigEndian>(v),
        }
    }

    pub fn bytes(&mut self, b: &[u8]) -> io::Result<()> {
        self.inner.write_all(b)
    }

    pub fn get_ref(&self) -> &W { &self.inner }
}

// ── Header ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContainerHeader {
    pub endian:          Endian,
    pub version:         u32,
    pub count:           u32,
    pub payload_size:    u32,
    pub name_table_size: u32,
    pub bag_size:        u32,
    pub extra_size:      u32,
}

impl ContainerHeader {
    /// Bytes of extended header that follow the minimal header.
    pub fn extended_size(version: u32) -> Result<usize> {
        match version {
            5     => Ok(0),
            6     => Ok(8),
            7 | 8 => Ok(12),
            v     => Err(Error::UnsupportedVersion(v)),
        }
    }

    /// Minimal plus extended header size.
    pub fn encoded_size(&self) -> Result<usize> {
        Ok(MINIMAL_HEADER_SIZE + Self::extended_size(self.version)?)
    }

    pub fn block_map_size(&self) -> u64 {
        self.count as u64 * super::block_map::ENTRY_SIZE as u64
    }

    /// Bytes from the end of the header to the end of the payload region.
    pub fn body_size(&self) -> u64 {
        self.name_table_size as u64
            + self.bag_size as u64
            + self.extra_size as u64
            + self.block_map_size()
            + self.payload_size as u64
    }

    pub fn total_size(&self) -> Result<u64> {
        Ok(self.encoded_size()? as u64 + self.body_size())
    }

    /// Classify a leading `u32` read little-endian.
    ///
    /// `Ok(None)` is the empty-container marker; `Ok(Some(swap))` a
    /// recognized signature.
    pub fn classify_signature(raw: u32) -> Result<Option<bool>> {
        match raw {
            0                 => Ok(None),
            SIGNATURE         => Ok(Some(false)),
            SIGNATURE_SWAPPED => Ok(Some(true)),
            other             => Err(Error::BadSignature(other)),
        }
    }

    /// Parse a full header.  `Ok(None)` means the empty-container marker.
    ///
    /// The minimal header is read first; its version selects the extended
    /// shape, which is parsed completely before returning.
    pub fn read<R: Read>(reader: R) -> Result<Option<Self>> {
        let mut raw = FieldReader::new(reader, false);
        let Some(swap) = Self::classify_signature(raw.u32()?)? else {
            return Ok(None);
        };
        let mut f = FieldReader::new(raw.inner, swap);

        let mut header = ContainerHeader {
            endian:       if swap { Endian::Big } else { Endian::Little },
            version:      f.u32()?,
            count:        f.u32()?,
            payload_size: f.u32()?,
            ..Default::default()
        };
        match Self::extended_size(header.version)? {
            0 => {}
            8 => {
                header.name_table_size = f.u32()?;
                header.bag_size        = f.u32()?;
            }
            _ => {
                header.name_table_size = f.u32()?;
                header.bag_size        = f.u32()?;
                header.extra_size      = f.u32()?;
            }
        }
        Ok(Some(header))
    }

    pub fn write<W: Write>(&self, writer: W) -> Result<()> {
        let ext = Self::extended_size(self.version)?;
        if ext == 0 && (self.name_table_size | self.bag_size | self.extra_size) != 0 {
            return Err(Error::Unsupported(format!("version {} has no extended header", self.version)));
        }
        if ext == 8 && self.extra_size != 0 {
            return Err(Error::Unsupported(format!("version {} has no extra data", self.version)));
        }
        let mut f = FieldWriter::new(writer, self.endian);
        f.u32(SIGNATURE)?;
        f.u32(self.version)?;
        f.u32(self.count)?;
        f.u32(self.payload_size)?;
        if ext >= 8 {
            f.u32(self.name_table_size)?;
            f.u32(self.bag_size)?;
        }
        if ext >= 12 {
            f.u32(self.extra_size)?;
        }
        Ok(())
    }
}
