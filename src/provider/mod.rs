//! Bounded byte sources handed to codecs.
//!
//! A [`DataProvider`] exposes a fixed-size byte range from some backing
//! store: memory, a seekable stream, a file on disk, or a window over another
//! provider.  Codecs never see the backing store itself.
//!
//! # Direct access
//! `begin_direct_access` returns a contiguous view of the whole range.
//! Memory-backed providers hand out a view of their buffer.  Sequential
//! sources materialize a temporary buffer on the first `begin` and share it
//! with every nested `begin`; only the matching last `end_direct_access`
//! releases it.  The reference count lives behind a per-instance mutex, so
//! balanced pairs on the same provider from different threads are safe.
//!
//! Prefer [`DirectAccess::begin`], which ends the access on drop.

mod sources;

pub use sources::{FileProvider, MemoryProvider, SliceProvider, StreamProvider};

use std::fmt;
use std::io;
use std::ops::{Deref, Range};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use crate::error::{try_alloc, Error, Result};

// ── ByteView ─────────────────────────────────────────────────────────────────

/// Cheaply clonable, immutable view into a shared buffer.
#[derive(Clone)]
pub struct ByteView {
    buf:   Arc<[u8]>,
    range: Range<usize>,
}

impl ByteView {
    pub fn new(buf: Arc<[u8]>) -> Self {
        let range = 0..buf.len();
        Self { buf, range }
    }

    /// Sub-view relative to this view.  Returns `None` when out of bounds.
    pub fn slice(&self, offset: usize, len: usize) -> Option<ByteView> {
        let start = self.range.start.checked_add(offset)?;
        let end   = start.checked_add(len)?;
        if end > self.range.end {
            return None;
        }
        Some(Self { buf: Arc::clone(&self.buf), range: start..end })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[self.range.clone()]
    }
}

impl Deref for ByteView {
    type Target = [u8];
    fn deref(&self) -> &[u8] { self.as_slice() }
}

impl AsRef<[u8]> for ByteView {
    fn as_ref(&self) -> &[u8] { self.as_slice() }
}

impl From<Vec<u8>> for ByteView {
    fn from(v: Vec<u8>) -> Self { Self::new(v.into()) }
}

impl From<&[u8]> for ByteView {
    fn from(v: &[u8]) -> Self { Self::new(v.into()) }
}

impl PartialEq for ByteView {
    fn eq(&self, other: &Self) -> bool { self.as_slice() == other.as_slice() }
}

impl Eq for ByteView {}

impl fmt::Debug for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteView({} bytes)", self.range.len())
    }
}

// ── DataProvider ─────────────────────────────────────────────────────────────

pub trait DataProvider: Send + Sync {
    /// Size of the exposed range in bytes.
    fn size(&self) -> u64;

    /// Fill `buf` with the bytes starting at `offset`.
    ///
    /// Fails with [`Error::Truncated`] when `offset + buf.len()` exceeds
    /// [`size`](Self::size).
    fn get_data(&self, buf: &mut [u8], offset: u64) -> Result<()>;

    /// Contiguous view of the whole range.  Must be balanced by
    /// [`end_direct_access`](Self::end_direct_access).
    fn begin_direct_access(&self) -> Result<ByteView>;

    fn end_direct_access(&self);

    /// Zero-copy view when the provider is memory-backed.
    fn as_view(&self) -> Option<ByteView> { None }

    /// Copy the whole range into a fresh view, or share it when memory-backed.
    fn to_view(&self) -> Result<ByteView> {
        if let Some(view) = self.as_view() {
            return Ok(view);
        }
        Ok(ByteView::from(self.read_all()?))
    }

    fn read_all(&self) -> Result<Vec<u8>> {
        let len = usize::try_from(self.size())
            .map_err(|_| Error::OutOfMemory(usize::MAX))?;
        let mut buf = try_alloc(len)?;
        self.get_data(&mut buf, 0)?;
        Ok(buf)
    }

    /// Up to `n` leading bytes; shorter when the provider is smaller.
    fn leading_bytes(&self, n: usize) -> Result<Vec<u8>> {
        let n = (self.size().min(n as u64)) as usize;
        let mut buf = try_alloc(n)?;
        self.get_data(&mut buf, 0)?;
        Ok(buf)
    }
}

/// Check `[offset, offset+len)` against a source of `available` bytes.
pub(crate) fn check_range(offset: u64, len: u64, available: u64) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= available => Ok(()),
        _ => Err(Error::Truncated { offset, needed: len, available }),
    }
}

// ── DirectAccess guard ───────────────────────────────────────────────────────

/// RAII pairing of `begin_direct_access` / `end_direct_access`.
pub struct DirectAccess<'a> {
    provider: &'a dyn DataProvider,
    view:     ByteView,
}

impl<'a> DirectAccess<'a> {
    pub fn begin(provider: &'a dyn DataProvider) -> Result<Self> {
        let view = provider.begin_direct_access()?;
        Ok(Self { provider, view })
    }

    pub fn view(&self) -> &ByteView { &self.view }
}

impl Deref for DirectAccess<'_> {
    type Target = [u8];
    fn deref(&self) -> &[u8] { self.view.as_slice() }
}

impl Drop for DirectAccess<'_> {
    fn drop(&mut self) {
        self.provider.end_direct_access();
    }
}

// ── Sequential cursor ────────────────────────────────────────────────────────

/// `io::Read` adapter that walks a provider from a starting offset.
pub struct ProviderCursor<'a> {
    provider: &'a dyn DataProvider,
    pos:      u64,
}

impl<'a> ProviderCursor<'a> {
    pub fn new(provider: &'a dyn DataProvider) -> Self {
        Self { provider, pos: 0 }
    }

    pub fn position(&self) -> u64 { self.pos }

    pub fn set_position(&mut self, pos: u64) { self.pos = pos; }
}

impl io::Read for ProviderCursor<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.provider.size().saturating_sub(self.pos);
        let n = (buf.len() as u64).min(remaining) as usize;
        if n == 0 {
            return Ok(0);
        }
        self.provider.get_data(&mut buf[..n], self.pos).map_err(|e| match e {
            Error::Io(io_err) => io_err,
            other => io::Error::new(io::ErrorKind::Other, other),
        })?;
        self.pos += n as u64;
        Ok(n)
    }
}

// ── Materialization bookkeeping ──────────────────────────────────────────────

#[derive(Default)]
struct Materialized {
    depth: usize,
    view:  Option<ByteView>,
}

/// Reference-counted temporary buffer for sequential providers.
#[derive(Default)]
pub(crate) struct DirectAccessState {
    inner: Mutex<Materialized>,
}

impl DirectAccessState {
    fn lock(&self) -> MutexGuard<'_, Materialized> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Materialize on the first call; later calls share the same buffer.
    pub(crate) fn begin<F>(&self, load: F) -> Result<ByteView>
    where
        F: FnOnce() -> Result<ByteView>,
    {
        let mut state = self.lock();
        if let Some(view) = &state.view {
            let view = view.clone();
            state.depth += 1;
            return Ok(view);
        }
        let view = load()?;
        state.view  = Some(view.clone());
        state.depth = 1;
        Ok(view)
    }

    /// Release one level; the buffer is freed when the depth reaches zero.
    pub(crate) fn end(&self) {
        let mut state = self.lock();
        match state.depth {
            0 => warn!("end_direct_access without matching begin"),
            1 => {
                state.depth = 0;
                state.view  = None;
            }
            _ => state.depth -= 1,
        }
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.lock().depth
    }

    #[cfg(test)]
    pub(crate) fn is_materialized(&self) -> bool {
        self.lock().view.is_some()
    }
}
