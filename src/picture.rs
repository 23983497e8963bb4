//! [`PictureContainer`]: the multi-representation picture value.
//!
//! ```no_run
//! use multipic::PictureContainer;
//!
//! let mut pic = PictureContainer::new();
//! pic.add_data(Some(".pict"), b"legacy vector bytes".to_vec(), true)?;
//! pic.add_file("logo.png", false)?;
//! pic.save("logo.mpic")?;
//!
//! let pic = PictureContainer::open("logo.mpic")?;
//! assert_eq!(pic.count_representations(), 2);
//! # Ok::<(), multipic::Error>(())
//! ```
//!
//! # Backing store
//! A container loaded from a blob remembers that blob.  Parsing may be
//! deferred until first access ([`PictureContainer::deferred`]), and an
//! unmodified container writes its backing bytes back verbatim.

use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{Read, Seek, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::codec::builtin::ids;
use crate::codec::{CodecRegistry, Purpose};
use crate::dedup::DedupAccumulator;
use crate::error::{Error, Result};
use crate::format::{self, PictureParts, ReadOptions, WriteOptions};
use crate::provider::{ByteView, DataProvider, FileProvider, MemoryProvider, StreamProvider};
use crate::representation::Representation;
use crate::settings::{DrawingSettings, Transform};

#[derive(Debug, Clone, Default)]
struct Contents {
    representations: BTreeMap<String, Representation>,
    best_display:    Option<String>,
    best_printing:   Option<String>,
    settings:        DrawingSettings,
    extra_data:      Option<Vec<u8>>,
}

impl Contents {
    fn from_parts(parts: PictureParts) -> Self {
        Contents {
            representations: parts.representations,
            settings:        parts.settings,
            extra_data:      parts.extra_data,
            ..Default::default()
        }
    }

    fn pick_best(&mut self, registry: &CodecRegistry) {
        self.best_display  = registry.select_best_in(&self.representations, Purpose::Display);
        self.best_printing = registry.select_best_in(&self.representations, Purpose::Printing);
    }
}

/// A set of interchangeable encodings of one picture, keyed by codec
/// identifier, plus drawing settings and optional opaque extra data.
///
/// `Send` but not `Sync`: one owner mutates it, like any plain value.
#[derive(Clone)]
pub struct PictureContainer {
    registry:   Arc<CodecRegistry>,
    /// Last persisted form, when still meaningful on its own.
    backing:    Option<ByteView>,
    dirty:      bool,
    /// Materialized state.  `None` while a deferred backing store is unparsed.
    contents:   Option<Contents>,
    lazy:       OnceCell<Contents>,
    load_error: OnceCell<Arc<Error>>,
}

impl Default for PictureContainer {
    fn default() -> Self { Self::new() }
}

impl PictureContainer {
    // ── Construction ─────────────────────────────────────────────────────────

    /// Empty container bound to the process-wide registry.
    pub fn new() -> Self {
        Self::with_registry(CodecRegistry::shared())
    }

    pub fn with_registry(registry: Arc<CodecRegistry>) -> Self {
        Self {
            registry,
            backing:    None,
            dirty:      false,
            contents:   Some(Contents::default()),
            lazy:       OnceCell::new(),
            load_error: OnceCell::new(),
        }
    }

    pub fn from_bytes(bytes: impl Into<ByteView>) -> Result<Self> {
        let mut pic = Self::new();
        pic.load(bytes)?;
        Ok(pic)
    }

    /// Read everything from the stream's current position to its end.
    pub fn read_from<R: Read + Seek + Send>(reader: R) -> Result<Self> {
        let provider = StreamProvider::new(reader)?;
        let mut pic = Self::new();
        pic.load_provider(&provider)?;
        Ok(pic)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let provider = FileProvider::open(path)?;
        let mut pic = Self::new();
        pic.load_provider(&provider)?;
        Ok(pic)
    }

    /// Keep `bytes` as the backing store and parse on first access.
    ///
    /// A parse failure leaves the container empty; the error is available
    /// from [`load_error`](Self::load_error).
    pub fn deferred(registry: Arc<CodecRegistry>, bytes: impl Into<ByteView>) -> Self {
        let mut pic = Self::with_registry(registry);
        pic.backing = Some(bytes.into());
        pic.contents = None;
        pic
    }

    // ── Loading ──────────────────────────────────────────────────────────────

    /// Replace the contents with the blob in `bytes`.
    ///
    /// On failure the container is left empty and the error returned.
    pub fn load(&mut self, bytes: impl Into<ByteView>) -> Result<()> {
        let view = bytes.into();
        self.load_provider(&MemoryProvider::new(view.clone()))?;
        if !view.is_empty() {
            self.backing = Some(view);
        }
        Ok(())
    }

    fn load_provider(&mut self, provider: &dyn DataProvider) -> Result<()> {
        self.load_with(provider, &mut DedupAccumulator::new(), &ReadOptions::default())
    }

    /// Load through a caller-owned accumulator, so back references into
    /// containers read earlier in the same call tree resolve.
    ///
    /// No backing store is kept: the blob may depend on that context.
    pub fn load_with(
        &mut self,
        provider: &dyn DataProvider,
        dedup:    &mut DedupAccumulator,
        opts:     &ReadOptions,
    ) -> Result<()> {
        self.reset();
        match format::read_container(&self.registry, provider, dedup, opts) {
            Ok(parts) => {
                let mut contents = Contents::from_parts(parts);
                self.refresh(&mut contents);
                debug!(count = contents.representations.len(), "loaded picture container");
                self.contents = Some(contents);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "picture container load failed; reset to empty");
                Err(e)
            }
        }
    }

    fn reset(&mut self) {
        self.backing    = None;
        self.dirty      = false;
        self.contents   = Some(Contents::default());
        self.lazy       = OnceCell::new();
        self.load_error = OnceCell::new();
    }

    fn parse_backing(&self) -> Contents {
        let Some(backing) = &self.backing else {
            return Contents::default();
        };
        let provider = MemoryProvider::new(backing.clone());
        let mut dedup = DedupAccumulator::new();
        match format::read_container(&self.registry, &provider, &mut dedup, &ReadOptions::default()) {
            Ok(parts) => {
                let mut contents = Contents::from_parts(parts);
                self.refresh(&mut contents);
                contents
            }
            Err(e) => {
                warn!(error = %e, "deferred picture container parse failed");
                let _ = self.load_error.set(Arc::new(e));
                Contents::default()
            }
        }
    }

    fn contents(&self) -> &Contents {
        match &self.contents {
            Some(c) => c,
            None    => self.lazy.get_or_init(|| self.parse_backing()),
        }
    }

    /// Mutable access; marks the container dirty.
    fn contents_mut(&mut self) -> &mut Contents {
        let contents = match self.contents.take() {
            Some(c) => c,
            None    => self.lazy.take().unwrap_or_else(|| self.parse_backing()),
        };
        self.dirty = true;
        self.contents.insert(contents)
    }

    fn refresh(&self, contents: &mut Contents) {
        contents.pick_best(&self.registry);
    }

    /// Apply `f` to the contents, then recompute the best picks.
    fn mutate<T>(&mut self, f: impl FnOnce(&mut Contents) -> T) -> T {
        let registry = Arc::clone(&self.registry);
        let contents = self.contents_mut();
        let out = f(&mut *contents);
        contents.pick_best(&registry);
        out
    }

    // ── Saving ───────────────────────────────────────────────────────────────

    /// Serialize with default options.  An unmodified container returns its
    /// backing bytes unchanged.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if let (false, Some(backing)) = (self.dirty, &self.backing) {
            return Ok(backing.to_vec());
        }
        self.to_bytes_with(&WriteOptions::default())
    }

    pub fn to_bytes_with(&self, opts: &WriteOptions) -> Result<Vec<u8>> {
        self.write_with(&mut DedupAccumulator::new(), opts)
    }

    /// Serialize through a caller-owned accumulator.  Representations it
    /// already holds are written as back references.
    pub fn write_with(&self, dedup: &mut DedupAccumulator, opts: &WriteOptions) -> Result<Vec<u8>> {
        let c = self.contents();
        format::write_container(
            &self.registry,
            &c.representations,
            &c.settings,
            c.extra_data.as_deref(),
            dedup,
            opts,
        )
    }

    /// Write to `writer` and adopt the written bytes as the backing store.
    pub fn write_to<W: Write>(&mut self, mut writer: W) -> Result<()> {
        let bytes = self.to_bytes()?;
        writer.write_all(&bytes)?;
        self.mark_saved(bytes);
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let bytes = self.to_bytes()?;
        fs::write(path.as_ref(), &bytes)?;
        debug!(path = %path.as_ref().display(), size = bytes.len(), "saved picture container");
        self.mark_saved(bytes);
        Ok(())
    }

    fn mark_saved(&mut self, bytes: Vec<u8>) {
        self.contents_mut();
        self.backing = (!bytes.is_empty()).then(|| ByteView::from(bytes));
        self.dirty = false;
    }

    // ── Representations ──────────────────────────────────────────────────────

    pub fn count_representations(&self) -> usize {
        self.contents().representations.len()
    }

    /// No representations and no extra data.
    pub fn is_empty(&self) -> bool {
        let c = self.contents();
        c.representations.is_empty() && c.extra_data.is_none()
    }

    /// Look up by key, or by any identifier that resolves to the same codec
    /// (`".jpeg"` finds the `".jpg"` entry).
    pub fn representation(&self, id: &str) -> Option<&Representation> {
        let reps = &self.contents().representations;
        if let Some(rep) = reps.get(id) {
            return Some(rep);
        }
        let descriptor = self.registry.resolve_by_identifier(id)?;
        reps.get(&descriptor.id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.representation(id).is_some()
    }

    /// Representations in key order.
    pub fn representations(&self) -> impl Iterator<Item = &Representation> {
        self.contents().representations.values()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.contents().representations.keys().map(String::as_str)
    }

    pub fn representation_map(&self) -> &BTreeMap<String, Representation> {
        &self.contents().representations
    }

    /// Insert `rep` under its codec identifier, returning the one it replaced.
    pub fn add_representation(&mut self, rep: Representation) -> Option<Representation> {
        let id = rep.id().to_owned();
        self.mutate(|c| c.representations.insert(id, rep))
    }

    /// Resolve a codec for `bytes` (explicit `id`, then sniffing, then
    /// pass-through when `allow_unknown`) and add the result.
    pub fn add_data(
        &mut self,
        id:            Option<&str>,
        bytes:         impl Into<ByteView>,
        allow_unknown: bool,
    ) -> Result<Representation> {
        let provider = MemoryProvider::new(bytes.into());
        self.add_from_provider(id, &provider, allow_unknown)
    }

    pub fn add_from_provider(
        &mut self,
        id:            Option<&str>,
        provider:      &dyn DataProvider,
        allow_unknown: bool,
    ) -> Result<Representation> {
        let descriptor = self.registry
            .resolve(id, provider, allow_unknown)?
            .ok_or_else(|| Error::Unsupported(format!("no codec for {}", id.unwrap_or("untyped data"))))?;
        let rep = self.registry.create_representation(&descriptor, provider)?;
        self.add_representation(rep.clone());
        Ok(rep)
    }

    /// Add a file's contents, typed by its extension and then by sniffing.
    pub fn add_file<P: AsRef<Path>>(&mut self, path: P, allow_unknown: bool) -> Result<Representation> {
        let path = path.as_ref();
        let ext = path.extension().map(|e| format!(".{}", e.to_string_lossy().to_lowercase()));
        let provider = FileProvider::open(path)?;
        self.add_from_provider(ext.as_deref(), &provider, allow_unknown)
    }

    pub fn remove_representation(&mut self, id: &str) -> Option<Representation> {
        let key = match self.representation(id) {
            Some(rep) => rep.id().to_owned(),
            None      => id.to_owned(),
        };
        if !self.contents().representations.contains_key(&key) {
            return None;
        }
        self.mutate(|c| c.representations.remove(&key))
    }

    /// Drop every representation, the settings and the extra data.
    pub fn clear(&mut self) {
        self.mutate(|c| *c = Contents::default());
    }

    /// Add (sharing, not copying) every representation of `other`.
    pub fn share_representations_from(&mut self, other: &PictureContainer) {
        let shared: Vec<Representation> = other.representations().cloned().collect();
        self.mutate(|c| {
            for rep in shared {
                c.representations.insert(rep.id().to_owned(), rep);
            }
        });
    }

    /// Independent copy: same registry, fresh payload buffers, no backing.
    pub fn deep_copy(&self) -> PictureContainer {
        let src = self.contents();
        let contents = Contents {
            representations: src.representations.iter()
                .map(|(k, r)| (k.clone(), r.deep_copy()))
                .collect(),
            ..src.clone()
        };
        let mut copy = Self::with_registry(Arc::clone(&self.registry));
        copy.contents = Some(contents);
        copy
    }

    /// Parse a representation that is itself a container.
    ///
    /// The result is an independent value; nothing links it back to `self`.
    pub fn nested(&self, id: &str) -> Result<Option<PictureContainer>> {
        let Some(rep) = self.representation(id) else {
            return Ok(None);
        };
        if rep.id() != ids::CONTAINER {
            return Ok(None);
        }
        let mut inner = Self::with_registry(Arc::clone(&self.registry));
        inner.load(rep.payload().clone())?;
        Ok(Some(inner))
    }

    // ── Best picks ───────────────────────────────────────────────────────────

    pub fn best_for_display(&self) -> Option<&Representation> {
        let c = self.contents();
        c.representations.get(c.best_display.as_deref()?)
    }

    pub fn best_for_printing(&self) -> Option<&Representation> {
        let c = self.contents();
        c.representations.get(c.best_printing.as_deref()?)
    }

    /// Recompute the best picks, e.g. after [`CodecRegistry::set_policy`].
    pub fn refresh_best_picks(&mut self) {
        let dirty = self.dirty;
        self.mutate(|_| ());
        self.dirty = dirty;
    }

    /// Width and height reported by the best display representation.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.best_for_display()
            .map(|r| (r.width(), r.height()))
            .filter(|&(w, h)| w > 0 && h > 0)
    }

    // ── Settings and extra data ──────────────────────────────────────────────

    pub fn settings(&self) -> &DrawingSettings {
        &self.contents().settings
    }

    pub fn set_settings(&mut self, settings: DrawingSettings) {
        self.contents_mut().settings = settings;
    }

    pub fn set_transform(&mut self, transform: Transform) -> Result<()> {
        if !transform.is_finite() {
            return Err(Error::InvalidParameter("transform has non-finite components".into()));
        }
        self.contents_mut().settings.transform = transform;
        Ok(())
    }

    pub fn extra_data(&self) -> Option<&[u8]> {
        self.contents().extra_data.as_deref()
    }

    /// Attach opaque bytes carried alongside the representations.  Empty
    /// data is the same as none.
    pub fn set_extra_data(&mut self, data: Option<Vec<u8>>) {
        self.contents_mut().extra_data = data.filter(|d| !d.is_empty());
    }

    // ── State ────────────────────────────────────────────────────────────────

    /// Modified since the last load or save.
    pub fn is_dirty(&self) -> bool { self.dirty }

    pub fn has_backing_store(&self) -> bool { self.backing.is_some() }

    /// Failure from parsing a deferred backing store, if any.
    pub fn load_error(&self) -> Option<&Error> {
        self.contents();
        self.load_error.get().map(|e| e.as_ref())
    }

    pub fn registry(&self) -> &Arc<CodecRegistry> { &self.registry }
}

impl fmt::Debug for PictureContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.contents();
        f.debug_struct("PictureContainer")
            .field("representations", &c.representations.keys().collect::<Vec<_>>())
            .field("best_display", &c.best_display)
            .field("best_printing", &c.best_printing)
            .field("settings", &c.settings)
            .field("extra_data", &c.extra_data.as_ref().map(Vec::len))
            .field("dirty", &self.dirty)
            .finish()
    }
}
