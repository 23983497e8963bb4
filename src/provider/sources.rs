use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{check_range, ByteView, DataProvider, DirectAccessState};
use crate::error::{try_alloc, Error, Result};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Memory ───────────────────────────────────────────────────────────────────

/// Provider over an in-memory buffer.  Direct access is free.
#[derive(Clone, Debug)]
pub struct MemoryProvider {
    view: ByteView,
}

impl MemoryProvider {
    pub fn new(view: ByteView) -> Self {
        Self { view }
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self::new(ByteView::from(bytes))
    }
}

impl DataProvider for MemoryProvider {
    fn size(&self) -> u64 { self.view.len() as u64 }

    fn get_data(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        check_range(offset, buf.len() as u64, self.size())?;
        let start = offset as usize;
        buf.copy_from_slice(&self.view[start..start + buf.len()]);
        Ok(())
    }

    fn begin_direct_access(&self) -> Result<ByteView> { Ok(self.view.clone()) }

    fn end_direct_access(&self) {}

    fn as_view(&self) -> Option<ByteView> { Some(self.view.clone()) }
}

// ── Stream ───────────────────────────────────────────────────────────────────

/// Provider over a seekable stream.  The range is `[base, base + len)` of
/// the stream; reads are positioned, so the stream cursor is not part of the
/// provider's state.
pub struct StreamProvider<R: Read + Seek + Send> {
    stream: Mutex<R>,
    base:   u64,
    len:    u64,
    direct: DirectAccessState,
}

impl<R: Read + Seek + Send> StreamProvider<R> {
    /// Expose everything from the current position to the end of the stream.
    pub fn new(mut stream: R) -> Result<Self> {
        let base = stream.stream_position()?;
        let end  = stream.seek(SeekFrom::End(0))?;
        Ok(Self::with_range(stream, base, end.saturating_sub(base)))
    }

    pub fn with_range(stream: R, base: u64, len: u64) -> Self {
        Self { stream: Mutex::new(stream), base, len, direct: DirectAccessState::default() }
    }

    pub fn into_inner(self) -> R {
        self.stream.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<R: Read + Seek + Send> DataProvider for StreamProvider<R> {
    fn size(&self) -> u64 { self.len }

    fn get_data(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        check_range(offset, buf.len() as u64, self.len)?;
        let mut stream = lock(&self.stream);
        stream.seek(SeekFrom::Start(self.base + offset))?;
        stream.read_exact(buf)
            .map_err(|e| Error::from_read(e, offset, buf.len() as u64, self.len))
    }

    fn begin_direct_access(&self) -> Result<ByteView> {
        self.direct.begin(|| Ok(ByteView::from(self.read_all()?)))
    }

    fn end_direct_access(&self) { self.direct.end() }
}

// ── File ─────────────────────────────────────────────────────────────────────

/// Provider over a file on disk.  The file is opened on first read.
pub struct FileProvider {
    path:   PathBuf,
    len:    u64,
    file:   Mutex<Option<File>>,
    direct: DirectAccessState,
}

impl FileProvider {
    /// Fails with [`Error::NotFound`] when `path` does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let meta = std::fs::metadata(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
            _ => Error::Io(e),
        })?;
        Ok(Self {
            path,
            len:    meta.len(),
            file:   Mutex::new(None),
            direct: DirectAccessState::default(),
        })
    }

    pub fn path(&self) -> &Path { &self.path }
}

impl DataProvider for FileProvider {
    fn size(&self) -> u64 { self.len }

    fn get_data(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        check_range(offset, buf.len() as u64, self.len)?;
        let mut slot = lock(&self.file);
        if slot.is_none() {
            let f = File::open(&self.path).map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => Error::NotFound(self.path.display().to_string()),
                _ => Error::Io(e),
            })?;
            *slot = Some(f);
        }
        let file = slot.as_mut().ok_or_else(|| Error::NotFound(self.path.display().to_string()))?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
            .map_err(|e| Error::from_read(e, offset, buf.len() as u64, self.len))
    }

    fn begin_direct_access(&self) -> Result<ByteView> {
        self.direct.begin(|| Ok(ByteView::from(self.read_all()?)))
    }

    fn end_direct_access(&self) { self.direct.end() }
}

// ── Slice ────────────────────────────────────────────────────────────────────

/// Bounded window `[offset, offset + len)` over another provider.
pub struct SliceProvider<'a> {
    parent: &'a dyn DataProvider,
    offset: u64,
    len:    u64,
    direct: DirectAccessState,
}

impl<'a> SliceProvider<'a> {
    /// Fails with [`Error::Truncated`] when the window exceeds the parent.
    pub fn new(parent: &'a dyn DataProvider, offset: u64, len: u64) -> Result<Self> {
        check_range(offset, len, parent.size())?;
        Ok(Self { parent, offset, len, direct: DirectAccessState::default() })
    }
}

impl DataProvider for SliceProvider<'_> {
    fn size(&self) -> u64 { self.len }

    fn get_data(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        check_range(offset, buf.len() as u64, self.len)?;
        self.parent.get_data(buf, self.offset + offset)
    }

    fn begin_direct_access(&self) -> Result<ByteView> {
        if let Some(view) = self.as_view() {
            return Ok(view);
        }
        self.direct.begin(|| {
            let mut buf = try_alloc(self.len as usize)?;
            self.parent.get_data(&mut buf, self.offset)?;
            Ok(ByteView::from(buf))
        })
    }

    fn end_direct_access(&self) {
        if self.parent.as_view().is_none() {
            self.direct.end();
        }
    }

    fn as_view(&self) -> Option<ByteView> {
        self.parent.as_view()?.slice(self.offset as usize, self.len as usize)
    }
}

// Shared providers can be handed around behind an `Arc`.
impl<P: DataProvider + ?Sized> DataProvider for Arc<P> {
    fn size(&self) -> u64 { (**self).size() }
    fn get_data(&self, buf: &mut [u8], offset: u64) -> Result<()> { (**self).get_data(buf, offset) }
    fn begin_direct_access(&self) -> Result<ByteView> { (**self).begin_direct_access() }
    fn end_direct_access(&self) { (**self).end_direct_access() }
    fn as_view(&self) -> Option<ByteView> { (**self).as_view() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::DirectAccess;
    use std::io::{Cursor, Write};

    #[test]
    fn memory_provider_bounds() {
        let p = MemoryProvider::from_vec(b"abcdef".to_vec());
        let mut buf = [0u8; 3];
        p.get_data(&mut buf, 2).unwrap();
        assert_eq!(&buf, b"cde");
        assert!(matches!(p.get_data(&mut buf, 4), Err(Error::Truncated { .. })));
        assert_eq!(p.leading_bytes(100).unwrap(), b"abcdef");
    }

    #[test]
    fn stream_provider_starts_at_current_position() {
        let mut cur = Cursor::new(b"xxpayload".to_vec());
        cur.seek(SeekFrom::Start(2)).unwrap();
        let p = StreamProvider::new(cur).unwrap();
        assert_eq!(p.size(), 7);
        assert_eq!(p.read_all().unwrap(), b"payload");
    }

    #[test]
    fn stream_direct_access_is_reference_counted() {
        let p = StreamProvider::new(Cursor::new(vec![9u8; 32])).unwrap();
        {
            let outer = DirectAccess::begin(&p).unwrap();
            {
                let inner = DirectAccess::begin(&p).unwrap();
                assert_eq!(inner.len(), 32);
                assert_eq!(p.direct.depth(), 2);
            }
            assert!(p.direct.is_materialized());
            assert_eq!(outer[0], 9);
        }
        assert!(!p.direct.is_materialized());
    }

    #[test]
    fn stream_direct_access_across_threads() {
        let p = Arc::new(StreamProvider::new(Cursor::new((0u8..=255).collect::<Vec<_>>())).unwrap());
        let handles: Vec<_> = (0..4).map(|_| {
            let p = Arc::clone(&p);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let view = p.begin_direct_access().unwrap();
                    assert_eq!(view[255], 255);
                    p.end_direct_access();
                }
            })
        }).collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(p.direct.depth(), 0);
        assert!(!p.direct.is_materialized());
    }

    #[test]
    fn file_provider_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileProvider::open(dir.path().join("absent.png")).err().unwrap();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn file_provider_reads_lazily() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"GIF89a....").unwrap();
        tmp.flush().unwrap();
        let p = FileProvider::open(tmp.path()).unwrap();
        assert_eq!(p.size(), 10);
        assert_eq!(p.leading_bytes(6).unwrap(), b"GIF89a");
    }

    #[test]
    fn slice_provider_is_zero_copy_over_memory() {
        let parent = MemoryProvider::from_vec(b"0123456789".to_vec());
        let s = SliceProvider::new(&parent, 3, 4).unwrap();
        assert_eq!(&*s.as_view().unwrap(), b"3456");
        assert!(SliceProvider::new(&parent, 8, 4).is_err());
    }

    #[test]
    fn slice_provider_over_stream_materializes_window_only() {
        let parent = StreamProvider::new(Cursor::new(b"0123456789".to_vec())).unwrap();
        let s = SliceProvider::new(&parent, 5, 5).unwrap();
        let view = DirectAccess::begin(&s).unwrap();
        assert_eq!(&*view, b"56789");
        assert!(!parent.direct.is_materialized());
    }
}
