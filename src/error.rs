//! Crate-wide error type.
//!
//! Codec resolution misses are NOT errors; they surface as `Option::None`
//! from the registry.  Everything here aborts the current read or write.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A backing file or a requested representation does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
    /// Leading four bytes are neither the container signature nor its
    /// byte-reversed form.
    #[error("Invalid container signature {0:#010x}")]
    BadSignature(u32),
    /// Structurally invalid container body.
    #[error("Corrupt container: {0}")]
    Corrupt(String),
    #[error("Unsupported container version: {0}")]
    UnsupportedVersion(u32),
    /// A size or offset points past the end of the source.
    #[error("Truncated data: need {needed} bytes at offset {offset}, source holds {available}")]
    Truncated { offset: u64, needed: u64, available: u64 },
    #[error("Out of memory allocating {0} bytes")]
    OutOfMemory(usize),
    /// A codec or format version declines the request.
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// The drawing-settings bag could not be (de)serialized.
    #[error("Metadata bag error: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Map an `UnexpectedEof` from the underlying stream to [`Error::Truncated`].
    pub(crate) fn from_read(e: io::Error, offset: u64, needed: u64, available: u64) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::Truncated { offset, needed, available }
        } else {
            Error::Io(e)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Allocate a zeroed buffer, reporting allocation failure instead of aborting.
pub(crate) fn try_alloc(len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| Error::OutOfMemory(len))?;
    buf.resize(len, 0);
    Ok(buf)
}
