//! One encoded form of a picture value.
//!
//! A [`Representation`] is a shared handle: cloning it shares the payload
//! and the codec descriptor, and [`Representation::ptr_eq`] compares object
//! identity.  The dedup accumulator relies on that identity, never on byte
//! equality.

use std::fmt;
use std::sync::Arc;

use crate::codec::CodecDescriptor;
use crate::error::{Error, Result};
use crate::provider::ByteView;

/// What a representation's payload means to the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepresentationKind {
    /// Encoded image bytes.
    Encoded,
    /// Metadata about where the picture came from; carries no image bytes
    /// and is never indexed by the dedup accumulator.
    Provenance,
    /// In-memory only; its codec refuses to serialize it.
    Synthetic,
}

/// Codec-reported geometry.  Zero width/height means "not reported".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub width:       u32,
    pub height:      u32,
    pub frame_count: u32,
}

impl Default for ImageInfo {
    fn default() -> Self {
        Self { width: 0, height: 0, frame_count: 1 }
    }
}

impl ImageInfo {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, frame_count: 1 }
    }

    pub fn with_frames(mut self, frame_count: u32) -> Self {
        self.frame_count = frame_count;
        self
    }
}

struct Inner {
    codec:   Arc<CodecDescriptor>,
    payload: ByteView,
    kind:    RepresentationKind,
    info:    ImageInfo,
}

#[derive(Clone)]
pub struct Representation(Arc<Inner>);

impl Representation {
    /// An `Encoded` representation with no reported geometry.
    pub fn new(codec: Arc<CodecDescriptor>, payload: impl Into<ByteView>) -> Self {
        Self::with_info(codec, payload, RepresentationKind::Encoded, ImageInfo::default())
    }

    pub fn with_info(
        codec:   Arc<CodecDescriptor>,
        payload: impl Into<ByteView>,
        kind:    RepresentationKind,
        info:    ImageInfo,
    ) -> Self {
        Self(Arc::new(Inner { codec, payload: payload.into(), kind, info }))
    }

    /// Identifier of the owning codec; also the container key.
    pub fn id(&self) -> &str { &self.0.codec.id }

    pub fn codec(&self) -> &Arc<CodecDescriptor> { &self.0.codec }

    pub fn payload(&self) -> &ByteView { &self.0.payload }

    pub fn len(&self) -> usize { self.0.payload.len() }

    pub fn is_empty(&self) -> bool { self.0.payload.is_empty() }

    pub fn kind(&self) -> RepresentationKind { self.0.kind }

    pub fn info(&self) -> ImageInfo { self.0.info }

    pub fn width(&self) -> u32 { self.0.info.width }

    pub fn height(&self) -> u32 { self.0.info.height }

    pub fn frame_count(&self) -> u32 { self.0.info.frame_count }

    /// Whether the owning codec agrees to write this representation into a
    /// container.
    pub fn is_serializable(&self) -> bool {
        self.0.codec.codec().can_serialize(self)
    }

    /// Standalone file bytes from the owning codec.  `Unsupported` when the
    /// codec is not flagged as an encoder.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let codec = &self.0.codec;
        if !codec.can_encode() {
            return Err(Error::Unsupported(format!("codec '{}' cannot encode", codec.id)));
        }
        codec.codec().encode(self)
    }

    /// Object identity: `true` only for clones of the same representation.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Independent copy with its own payload buffer.
    pub fn deep_copy(&self) -> Self {
        Self::with_info(
            Arc::clone(&self.0.codec),
            ByteView::from(self.0.payload.as_slice()),
            self.0.kind,
            self.0.info,
        )
    }

    /// Address used as the identity key by the dedup accumulator.
    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Representation")
            .field("id", &self.id())
            .field("kind", &self.0.kind)
            .field("bytes", &self.0.payload.len())
            .field("info", &self.0.info)
            .finish()
    }
}
