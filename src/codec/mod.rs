//! Codec descriptors, the codec capability trait, and identifier rules.
//!
//! # Identity rules
//! A codec is known by one canonical identifier (its `id`, e.g. `".png"`),
//! which is also the key its representations use inside a container.  It may
//! additionally be reached through:
//!   - file extensions (`".png"`, `".PNG"`),
//!   - legacy four-character type tags (`"PNGf"`),
//!   - mime types or platform type identifiers (`"image/png"`).
//!
//! An identifier string is classified by shape alone (see
//! [`IdentifierKind::classify`]): a leading `.` is an extension, exactly four
//! ASCII characters are a type tag, anything else is a mime type.
//!
//! # Capabilities
//! Every format implements [`Codec`]: identify, decode, and optionally
//! encode.  The core never touches pixels; "decode" builds a
//! [`Representation`] around the encoded bytes and may peek at the header for
//! geometry.  Adding a format means adding a `Codec` impl and registering a
//! descriptor; registry dispatch never changes.

pub mod builtin;
pub mod registry;

pub use registry::{BestPolicy, CodecRegistry, Purpose};

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::provider::DataProvider;
use crate::representation::Representation;

// ── Identifier classification ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Extension,
    TypeTag,
    MimeType,
}

impl IdentifierKind {
    pub fn classify(id: &str) -> Self {
        if id.starts_with('.') {
            IdentifierKind::Extension
        } else if id.len() == 4 && id.is_ascii() {
            IdentifierKind::TypeTag
        } else {
            IdentifierKind::MimeType
        }
    }
}

// ── Flags ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodecFlags(u32);

impl CodecFlags {
    pub const NONE:           CodecFlags = CodecFlags(0);
    /// The codec can encode a representation back to bytes.
    pub const ENCODER:        CodecFlags = CodecFlags(1 << 0);
    /// Signature sniffing must be confirmed by [`Codec::identify`].
    pub const VALIDATES_DATA: CodecFlags = CodecFlags(1 << 1);
    /// Internal descriptor, not advertised to users.
    pub const PRIVATE:        CodecFlags = CodecFlags(1 << 2);

    pub fn contains(self, other: CodecFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 { self.0 }
}

impl std::ops::BitOr for CodecFlags {
    type Output = CodecFlags;
    fn bitor(self, rhs: CodecFlags) -> CodecFlags { CodecFlags(self.0 | rhs.0) }
}

// ── Signatures ───────────────────────────────────────────────────────────────

/// Byte pattern expected at a fixed offset.  `None` bytes are wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub offset:  usize,
    pub pattern: Vec<Option<u8>>,
}

impl Signature {
    pub fn exact(offset: usize, bytes: &[u8]) -> Self {
        Self { offset, pattern: bytes.iter().copied().map(Some).collect() }
    }

    /// Parse a space-separated hex pattern, `??` for a wildcard byte:
    /// `"52 49 46 46 ?? ?? ?? ?? 57 45 42 50"`.
    pub fn parse(offset: usize, pattern: &str) -> Result<Self> {
        let pattern = pattern
            .split_whitespace()
            .map(|tok| {
                if tok == "??" {
                    Ok(None)
                } else {
                    u8::from_str_radix(tok, 16).map(Some).map_err(|_| {
                        Error::InvalidParameter(format!("bad signature byte '{tok}'"))
                    })
                }
            })
            .collect::<Result<Vec<_>>>()?;
        if pattern.is_empty() {
            return Err(Error::InvalidParameter("empty signature pattern".into()));
        }
        Ok(Self { offset, pattern })
    }

    /// One past the last byte this signature inspects.
    pub fn end(&self) -> usize { self.offset + self.pattern.len() }

    pub fn matches(&self, lead: &[u8]) -> bool {
        let Some(window) = lead.get(self.offset..self.end()) else {
            return false;
        };
        window
            .iter()
            .zip(&self.pattern)
            .all(|(b, p)| p.map_or(true, |p| p == *b))
    }
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    /// Deeper content check, consulted when the descriptor carries
    /// [`CodecFlags::VALIDATES_DATA`].
    fn identify(&self, _provider: &dyn DataProvider) -> Result<bool> {
        Ok(true)
    }

    /// Build a representation around the provider's bytes.
    fn decode(
        &self,
        descriptor: &Arc<CodecDescriptor>,
        provider:   &dyn DataProvider,
    ) -> Result<Representation>;

    /// Produce standalone encoded bytes for `rep`.
    fn encode(&self, rep: &Representation) -> Result<Vec<u8>> {
        Err(Error::Unsupported(format!("codec '{}' cannot encode", rep.id())))
    }

    /// Whether `rep` may be written into a container.
    fn can_serialize(&self, _rep: &Representation) -> bool {
        true
    }
}

// ── Descriptor ───────────────────────────────────────────────────────────────

pub struct CodecDescriptor {
    pub id:         String,
    pub extensions: Vec<String>,
    pub mime_types: Vec<String>,
    pub type_tags:  Vec<[u8; 4]>,
    pub signatures: Vec<Signature>,
    pub flags:      CodecFlags,
    codec:          Arc<dyn Codec>,
}

impl CodecDescriptor {
    pub fn new(id: impl Into<String>, codec: Arc<dyn Codec>) -> Self {
        Self {
            id:         id.into(),
            extensions: Vec::new(),
            mime_types: Vec::new(),
            type_tags:  Vec::new(),
            signatures: Vec::new(),
            flags:      CodecFlags::NONE,
            codec,
        }
    }

    pub fn with_extensions(mut self, exts: &[&str]) -> Self {
        self.extensions.extend(exts.iter().map(|s| s.to_string()));
        self
    }

    pub fn with_mime_types(mut self, mimes: &[&str]) -> Self {
        self.mime_types.extend(mimes.iter().map(|s| s.to_string()));
        self
    }

    pub fn with_type_tags(mut self, tags: &[&[u8; 4]]) -> Self {
        self.type_tags.extend(tags.iter().map(|t| **t));
        self
    }

    pub fn with_signature(mut self, sig: Signature) -> Self {
        self.signatures.push(sig);
        self
    }

    pub fn with_flags(mut self, flags: CodecFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn codec(&self) -> &Arc<dyn Codec> { &self.codec }

    pub fn is_private(&self) -> bool { self.flags.contains(CodecFlags::PRIVATE) }

    pub fn can_encode(&self) -> bool { self.flags.contains(CodecFlags::ENCODER) }

    /// Does `id` name this codec, under the classification rules?
    pub fn matches_identifier(&self, id: &str) -> bool {
        if self.id == id {
            return true;
        }
        match IdentifierKind::classify(id) {
            IdentifierKind::Extension => {
                self.extensions.iter().any(|e| e.eq_ignore_ascii_case(id))
            }
            IdentifierKind::TypeTag => {
                self.type_tags.iter().any(|t| t.as_slice() == id.as_bytes())
            }
            IdentifierKind::MimeType => {
                self.mime_types.iter().any(|m| m.eq_ignore_ascii_case(id))
            }
        }
    }

    /// Signature-level check against the leading bytes of some data.
    pub fn matches_signature(&self, lead: &[u8]) -> bool {
        self.signatures.iter().any(|s| s.matches(lead))
    }

    /// Whether this descriptor takes part in signature sniffing at all.
    pub fn is_sniffable(&self) -> bool {
        !self.signatures.is_empty() || self.flags.contains(CodecFlags::VALIDATES_DATA)
    }

    /// Full sniff: signatures (if any) then `identify` for validating codecs.
    pub fn sniff(&self, lead: &[u8], provider: &dyn DataProvider) -> Result<bool> {
        if !self.signatures.is_empty() && !self.matches_signature(lead) {
            return Ok(false);
        }
        if self.flags.contains(CodecFlags::VALIDATES_DATA) {
            return self.codec.identify(provider);
        }
        Ok(!self.signatures.is_empty())
    }

    /// Largest number of leading bytes any signature inspects.
    pub fn sniff_len(&self) -> usize {
        self.signatures.iter().map(Signature::end).max().unwrap_or(0)
    }
}

impl fmt::Debug for CodecDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecDescriptor")
            .field("id", &self.id)
            .field("extensions", &self.extensions)
            .field("mime_types", &self.mime_types)
            .field("type_tags", &self.type_tags.iter()
                .map(|t| String::from_utf8_lossy(t).into_owned())
                .collect::<Vec<_>>())
            .field("flags", &self.flags)
            .finish()
    }
}
