//! Built-in codec set.
//!
//! None of these decode pixels.  Raster codecs peek at their own header for
//! width/height (and GIF counts frames); everything else carries the bytes
//! untouched.  Priority order in [`builtin_descriptors`] is the sniffing
//! order.

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use super::{Codec, CodecDescriptor, CodecFlags, Signature};
use crate::error::{Error, Result};
use crate::format::header::{SIGNATURE, SIGNATURE_SWAPPED};
use crate::provider::DataProvider;
use crate::representation::{ImageInfo, Representation, RepresentationKind};

/// Canonical identifiers of the built-in codecs.
pub mod ids {
    pub const PNG:       &str = ".png";
    pub const JPEG:      &str = ".jpg";
    pub const GIF:       &str = ".gif";
    pub const WEBP:      &str = ".webp";
    pub const TIFF:      &str = ".tif";
    pub const BMP:       &str = ".bmp";
    pub const SVG:       &str = ".svg";
    pub const PDF:       &str = ".pdf";
    pub const EMF:       &str = ".emf";
    pub const PICT:      &str = ".pict";
    pub const CONTAINER: &str = ".mpic";
    pub const REFERENCE: &str = "application/x-mpic-reference";
    pub const MEMORY:    &str = "application/x-mpic-memory";
    /// Identifier bound to pass-through data that arrives with no name.
    pub const UNKNOWN:   &str = "application/octet-stream";
}

/// Prefix of a file-reference payload; the UTF-8 target follows.
pub const REFERENCE_PREFIX: &[u8] = b"mpic-ref:";

// ── Pass-through ─────────────────────────────────────────────────────────────

/// Carries bytes without interpreting them.  Backs every synthesized
/// descriptor for unrecognized formats.
pub struct PassThroughCodec;

impl Codec for PassThroughCodec {
    fn decode(&self, descriptor: &Arc<CodecDescriptor>, provider: &dyn DataProvider) -> Result<Representation> {
        Ok(Representation::new(Arc::clone(descriptor), provider.to_view()?))
    }

    fn encode(&self, rep: &Representation) -> Result<Vec<u8>> {
        Ok(rep.payload().to_vec())
    }
}

// ── Header peeking ───────────────────────────────────────────────────────────

type PeekFn     = fn(&[u8]) -> Option<ImageInfo>;
type ValidateFn = fn(&[u8]) -> bool;

/// Bytes handed to a validating codec's `identify`.
const VALIDATE_WINDOW: usize = 1024;

/// Encoded-image codec that reports geometry from the format header.
pub struct HeaderPeekCodec {
    peek:     Option<PeekFn>,
    validate: Option<ValidateFn>,
}

impl HeaderPeekCodec {
    pub const fn new(peek: Option<PeekFn>) -> Self {
        Self { peek, validate: None }
    }

    pub const fn validating(peek: Option<PeekFn>, validate: ValidateFn) -> Self {
        Self { peek, validate: Some(validate) }
    }
}

impl Codec for HeaderPeekCodec {
    fn identify(&self, provider: &dyn DataProvider) -> Result<bool> {
        match self.validate {
            Some(validate) => Ok(validate(&provider.leading_bytes(VALIDATE_WINDOW)?)),
            None => Ok(true),
        }
    }

    fn decode(&self, descriptor: &Arc<CodecDescriptor>, provider: &dyn DataProvider) -> Result<Representation> {
        let payload = provider.to_view()?;
        let info = self.peek.and_then(|peek| peek(&payload)).unwrap_or_default();
        Ok(Representation::with_info(Arc::clone(descriptor), payload, RepresentationKind::Encoded, info))
    }

    fn encode(&self, rep: &Representation) -> Result<Vec<u8>> {
        Ok(rep.payload().to_vec())
    }
}

fn peek_png(d: &[u8]) -> Option<ImageInfo> {
    // IHDR is always the first chunk.
    if d.get(12..16)? != b"IHDR" {
        return None;
    }
    let w = BigEndian::read_u32(d.get(16..20)?);
    let h = BigEndian::read_u32(d.get(20..24)?);
    Some(ImageInfo::new(w, h))
}

fn peek_jpeg(d: &[u8]) -> Option<ImageInfo> {
    let mut pos = 2;
    while pos + 4 <= d.len() {
        if d[pos] != 0xFF {
            return None;
        }
        let marker = d[pos + 1];
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        let is_sof = (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            let h = BigEndian::read_u16(d.get(pos + 5..pos + 7)?);
            let w = BigEndian::read_u16(d.get(pos + 7..pos + 9)?);
            return Some(ImageInfo::new(w as u32, h as u32));
        }
        let seg_len = BigEndian::read_u16(d.get(pos + 2..pos + 4)?) as usize;
        pos += 2 + seg_len;
    }
    None
}

fn gif_color_table_len(flags: u8) -> usize {
    if flags & 0x80 != 0 { 3 * (1usize << ((flags & 0x07) + 1)) } else { 0 }
}

fn gif_skip_sub_blocks(d: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        let n = *d.get(pos)? as usize;
        pos += 1;
        if n == 0 {
            return Some(pos);
        }
        pos += n;
    }
}

/// Counts image descriptors; a truncated stream reports the frames seen so far.
fn peek_gif(d: &[u8]) -> Option<ImageInfo> {
    if d.len() < 13 {
        return None;
    }
    let w = LittleEndian::read_u16(&d[6..8]) as u32;
    let h = LittleEndian::read_u16(&d[8..10]) as u32;
    let mut pos = 13 + gif_color_table_len(d[10]);
    let mut frames = 0u32;
    while let Some(&block) = d.get(pos) {
        match block {
            0x2C => {
                frames += 1;
                let Some(&local_flags) = d.get(pos + 9) else { break };
                pos += 10 + gif_color_table_len(local_flags) + 1;
                match gif_skip_sub_blocks(d, pos) {
                    Some(next) => pos = next,
                    None => break,
                }
            }
            0x21 => match gif_skip_sub_blocks(d, pos + 2) {
                Some(next) => pos = next,
                None => break,
            },
            _ => break,
        }
    }
    Some(ImageInfo::new(w, h).with_frames(frames.max(1)))
}

fn peek_bmp(d: &[u8]) -> Option<ImageInfo> {
    let w = LittleEndian::read_i32(d.get(18..22)?);
    let h = LittleEndian::read_i32(d.get(22..26)?);
    Some(ImageInfo::new(w.unsigned_abs(), h.unsigned_abs()))
}

fn peek_webp(d: &[u8]) -> Option<ImageInfo> {
    match d.get(12..16)? {
        b"VP8X" => {
            let w = 1 + LittleEndian::read_u24(d.get(24..27)?);
            let h = 1 + LittleEndian::read_u24(d.get(27..30)?);
            Some(ImageInfo::new(w, h))
        }
        b"VP8L" => {
            let b = d.get(21..25)?;
            let w = 1 + (b[0] as u32 | ((b[1] as u32 & 0x3F) << 8));
            let h = 1 + ((b[1] as u32 >> 6) | ((b[2] as u32) << 2) | ((b[3] as u32 & 0x0F) << 10));
            Some(ImageInfo::new(w, h))
        }
        b"VP8 " => {
            let w = LittleEndian::read_u16(d.get(26..28)?) & 0x3FFF;
            let h = LittleEndian::read_u16(d.get(28..30)?) & 0x3FFF;
            Some(ImageInfo::new(w as u32, h as u32))
        }
        _ => None,
    }
}

fn looks_like_svg(lead: &[u8]) -> bool {
    let text = String::from_utf8_lossy(lead);
    let text = text.trim_start_matches('\u{feff}').trim_start();
    if text.starts_with("<svg") {
        return true;
    }
    text.starts_with("<?xml") && text.contains("<svg")
}

// ── File reference (provenance) ──────────────────────────────────────────────

/// Records where a picture came from.  Not image data.
pub struct ReferenceCodec;

impl ReferenceCodec {
    pub fn payload_for(target: &str) -> Vec<u8> {
        let mut out = REFERENCE_PREFIX.to_vec();
        out.extend_from_slice(target.as_bytes());
        out
    }

    /// Target path or URL carried by a reference representation.
    pub fn target(rep: &Representation) -> Option<String> {
        let rest = rep.payload().strip_prefix(REFERENCE_PREFIX)?;
        std::str::from_utf8(rest).ok().map(str::to_owned)
    }
}

impl Codec for ReferenceCodec {
    fn decode(&self, descriptor: &Arc<CodecDescriptor>, provider: &dyn DataProvider) -> Result<Representation> {
        let payload = provider.to_view()?;
        if !payload.starts_with(REFERENCE_PREFIX) {
            return Err(Error::InvalidParameter("file reference payload lacks its prefix".into()));
        }
        Ok(Representation::with_info(
            Arc::clone(descriptor),
            payload,
            RepresentationKind::Provenance,
            ImageInfo::default(),
        ))
    }

    fn encode(&self, rep: &Representation) -> Result<Vec<u8>> {
        Ok(rep.payload().to_vec())
    }
}

// ── In-memory ────────────────────────────────────────────────────────────────

/// Holds scratch bytes that live only in memory.  Never serialized.
pub struct MemoryCodec;

impl Codec for MemoryCodec {
    fn decode(&self, descriptor: &Arc<CodecDescriptor>, provider: &dyn DataProvider) -> Result<Representation> {
        Ok(Representation::with_info(
            Arc::clone(descriptor),
            provider.to_view()?,
            RepresentationKind::Synthetic,
            ImageInfo::default(),
        ))
    }

    fn can_serialize(&self, _rep: &Representation) -> bool {
        false
    }
}

// ── Descriptor table ─────────────────────────────────────────────────────────

/// Private pass-through descriptor bound to `id`, for data no codec claims.
pub fn pass_through_descriptor(id: &str) -> CodecDescriptor {
    let d = CodecDescriptor::new(id, Arc::new(PassThroughCodec))
        .with_flags(CodecFlags::ENCODER | CodecFlags::PRIVATE);
    match super::IdentifierKind::classify(id) {
        super::IdentifierKind::Extension => d.with_extensions(&[id]),
        super::IdentifierKind::TypeTag => {
            let mut tag = [0u8; 4];
            tag.copy_from_slice(id.as_bytes());
            d.with_type_tags(&[&tag])
        }
        super::IdentifierKind::MimeType => d.with_mime_types(&[id]),
    }
}

/// Built-in descriptors in sniffing priority order.
pub fn builtin_descriptors() -> Vec<Arc<CodecDescriptor>> {
    let enc = CodecFlags::ENCODER;
    let descriptors = vec![
        CodecDescriptor::new(ids::PNG, Arc::new(HeaderPeekCodec::new(Some(peek_png))))
            .with_extensions(&[".png"])
            .with_mime_types(&["image/png", "public.png"])
            .with_type_tags(&[b"PNGf"])
            .with_signature(Signature::exact(0, b"\x89PNG\r\n\x1a\n"))
            .with_flags(enc),
        CodecDescriptor::new(ids::JPEG, Arc::new(HeaderPeekCodec::new(Some(peek_jpeg))))
            .with_extensions(&[".jpg", ".jpeg", ".jpe"])
            .with_mime_types(&["image/jpeg", "public.jpeg"])
            .with_type_tags(&[b"JPEG"])
            .with_signature(Signature::exact(0, &[0xFF, 0xD8, 0xFF]))
            .with_flags(enc),
        CodecDescriptor::new(ids::GIF, Arc::new(HeaderPeekCodec::new(Some(peek_gif))))
            .with_extensions(&[".gif"])
            .with_mime_types(&["image/gif", "com.compuserve.gif"])
            .with_type_tags(&[b"GIFf"])
            .with_signature(Signature::exact(0, b"GIF87a"))
            .with_signature(Signature::exact(0, b"GIF89a"))
            .with_flags(enc),
        CodecDescriptor::new(ids::WEBP, Arc::new(HeaderPeekCodec::new(Some(peek_webp))))
            .with_extensions(&[".webp"])
            .with_mime_types(&["image/webp", "org.webmproject.webp"])
            .with_type_tags(&[b"WEBP"])
            .with_signature(Signature {
                offset:  0,
                pattern: vec![
                    Some(b'R'), Some(b'I'), Some(b'F'), Some(b'F'),
                    None, None, None, None,
                    Some(b'W'), Some(b'E'), Some(b'B'), Some(b'P'),
                ],
            })
            .with_flags(enc),
        CodecDescriptor::new(ids::TIFF, Arc::new(HeaderPeekCodec::new(None)))
            .with_extensions(&[".tif", ".tiff"])
            .with_mime_types(&["image/tiff", "public.tiff"])
            .with_type_tags(&[b"TIFF"])
            .with_signature(Signature::exact(0, b"II*\0"))
            .with_signature(Signature::exact(0, b"MM\0*"))
            .with_flags(enc),
        CodecDescriptor::new(ids::BMP, Arc::new(HeaderPeekCodec::new(Some(peek_bmp))))
            .with_extensions(&[".bmp", ".dib"])
            .with_mime_types(&["image/bmp", "com.microsoft.bmp"])
            .with_type_tags(&[b"BMPf"])
            .with_signature(Signature::exact(0, b"BM"))
            .with_flags(enc),
        CodecDescriptor::new(ids::SVG, Arc::new(HeaderPeekCodec::validating(None, looks_like_svg)))
            .with_extensions(&[".svg"])
            .with_mime_types(&["image/svg+xml", "public.svg-image"])
            .with_type_tags(&[b"svg "])
            .with_flags(enc | CodecFlags::VALIDATES_DATA),
        CodecDescriptor::new(ids::PDF, Arc::new(HeaderPeekCodec::new(None)))
            .with_extensions(&[".pdf"])
            .with_mime_types(&["application/pdf", "com.adobe.pdf"])
            .with_type_tags(&[b"PDF "])
            .with_signature(Signature::exact(0, b"%PDF-"))
            .with_flags(enc),
        CodecDescriptor::new(ids::EMF, Arc::new(HeaderPeekCodec::new(None)))
            .with_extensions(&[".emf"])
            .with_mime_types(&["image/emf", "com.microsoft.emf"])
            .with_type_tags(&[b"EMF "])
            .with_signature(Signature::exact(40, b" EMF"))
            .with_flags(enc),
        // PICT has no reliable signature; only reachable by identifier.
        CodecDescriptor::new(ids::PICT, Arc::new(HeaderPeekCodec::new(None)))
            .with_extensions(&[".pict", ".pct", ".pic"])
            .with_mime_types(&["image/pict", "image/x-pict", "com.apple.pict"])
            .with_type_tags(&[b"PICT"])
            .with_flags(enc),
        CodecDescriptor::new(ids::CONTAINER, Arc::new(HeaderPeekCodec::new(None)))
            .with_extensions(&[".mpic"])
            .with_mime_types(&["application/x-mpic"])
            .with_type_tags(&[b"MPIC"])
            .with_signature(Signature::exact(0, &SIGNATURE.to_le_bytes()))
            .with_signature(Signature::exact(0, &SIGNATURE_SWAPPED.to_le_bytes()))
            .with_flags(enc),
        CodecDescriptor::new(ids::REFERENCE, Arc::new(ReferenceCodec))
            .with_mime_types(&[ids::REFERENCE])
            .with_signature(Signature::exact(0, REFERENCE_PREFIX))
            .with_flags(enc | CodecFlags::PRIVATE),
        CodecDescriptor::new(ids::MEMORY, Arc::new(MemoryCodec))
            .with_mime_types(&[ids::MEMORY])
            .with_flags(CodecFlags::PRIVATE),
    ];
    descriptors.into_iter().map(Arc::new).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_header(w: u32, h: u32) -> Vec<u8> {
        let mut d = b"\x89PNG\r\n\x1a\n\x00\x00\x00\x0dIHDR".to_vec();
        d.extend_from_slice(&w.to_be_bytes());
        d.extend_from_slice(&h.to_be_bytes());
        d.extend_from_slice(&[8, 6, 0, 0, 0]);
        d
    }

    fn gif_frames(n: usize) -> Vec<u8> {
        let mut d = b"GIF89a".to_vec();
        d.extend_from_slice(&[10, 0, 20, 0, 0x80, 0, 0]); // 2-entry global table
        d.extend_from_slice(&[0; 6]);
        for _ in 0..n {
            d.extend_from_slice(&[0x21, 0xF9, 4, 0, 0, 0, 0, 0]); // graphic control
            d.extend_from_slice(&[0x2C, 0, 0, 0, 0, 10, 0, 20, 0, 0]);
            d.extend_from_slice(&[2, 2, 0x4C, 0x01, 0]);
        }
        d.push(0x3B);
        d
    }

    #[test]
    fn png_geometry() {
        assert_eq!(peek_png(&png_header(640, 480)), Some(ImageInfo::new(640, 480)));
        assert_eq!(peek_png(b"\x89PNG"), None);
    }

    #[test]
    fn gif_counts_frames() {
        assert_eq!(peek_gif(&gif_frames(1)).unwrap().frame_count, 1);
        let info = peek_gif(&gif_frames(3)).unwrap();
        assert_eq!((info.width, info.height, info.frame_count), (10, 20, 3));
        // Truncation keeps what was counted.
        let mut cut = gif_frames(2);
        cut.truncate(cut.len() - 4);
        assert_eq!(peek_gif(&cut).unwrap().frame_count, 2);
    }

    #[test]
    fn jpeg_geometry_from_sof() {
        let mut d = vec![0xFF, 0xD8];
        d.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00]); // APP0
        d.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x00, 0x30, 0x00, 0x40, 0x01, 0, 0, 0]);
        assert_eq!(peek_jpeg(&d), Some(ImageInfo::new(64, 48)));
    }

    #[test]
    fn bmp_top_down_height_is_positive() {
        let mut d = vec![0u8; 26];
        d[..2].copy_from_slice(b"BM");
        d[18..22].copy_from_slice(&32i32.to_le_bytes());
        d[22..26].copy_from_slice(&(-16i32).to_le_bytes());
        assert_eq!(peek_bmp(&d), Some(ImageInfo::new(32, 16)));
    }

    #[test]
    fn webp_vp8x_canvas() {
        let mut d = b"RIFF\0\0\0\0WEBPVP8X".to_vec();
        d.extend_from_slice(&[0; 8]);
        d.extend_from_slice(&[99, 0, 0, 49, 0, 0]);
        assert_eq!(peek_webp(&d), Some(ImageInfo::new(100, 50)));
    }

    #[test]
    fn svg_detection() {
        assert!(looks_like_svg(b"<svg xmlns='http://www.w3.org/2000/svg'/>"));
        assert!(looks_like_svg(b"\xef\xbb\xbf  <?xml version='1.0'?>\n<svg/>"));
        assert!(!looks_like_svg(b"<?xml version='1.0'?><html/>"));
    }

    #[test]
    fn reference_round_trip() {
        let d: Arc<CodecDescriptor> = builtin_descriptors()
            .into_iter()
            .find(|d| d.id == ids::REFERENCE)
            .unwrap();
        let p = crate::provider::MemoryProvider::from_vec(ReferenceCodec::payload_for("/tmp/a.png"));
        let rep = d.codec().decode(&d, &p).unwrap();
        assert_eq!(rep.kind(), RepresentationKind::Provenance);
        assert_eq!(ReferenceCodec::target(&rep).as_deref(), Some("/tmp/a.png"));

        let bad = crate::provider::MemoryProvider::from_vec(b"nope".to_vec());
        assert!(d.codec().decode(&d, &bad).is_err());
    }

    #[test]
    fn encoders_emit_payload_and_memory_refuses() {
        let find = |id: &str| builtin_descriptors().into_iter().find(|d| d.id == id).unwrap();

        let png = find(ids::PNG);
        let rep = png.codec().decode(&png, &crate::provider::MemoryProvider::from_vec(png_header(4, 4))).unwrap();
        assert_eq!(rep.encode().unwrap(), png_header(4, 4));

        let memory = find(ids::MEMORY);
        assert!(!memory.can_encode());
        let scratch = memory.codec()
            .decode(&memory, &crate::provider::MemoryProvider::from_vec(b"scratch".to_vec()))
            .unwrap();
        assert!(matches!(scratch.encode(), Err(Error::Unsupported(_))));
        assert!(matches!(memory.codec().encode(&scratch), Err(Error::Unsupported(_))));
    }

    #[test]
    fn pass_through_descriptor_binds_identifier() {
        assert!(pass_through_descriptor(".xyz").matches_identifier(".XYZ"));
        assert!(pass_through_descriptor("ABCD").matches_identifier("ABCD"));
        assert!(pass_through_descriptor("image/x-foo").matches_identifier("image/x-foo"));
        assert!(pass_through_descriptor(".xyz").is_private());
    }
}
