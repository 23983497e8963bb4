//! Versioned container codec.
//!
//! Serializes a set of representations, drawing settings and optional extra
//! data into one byte blob, and back.  See [`header`] for the header layout.
//!
//! # Body
//! ```text
//! name table   v6, v7: one u16-length-prefixed UTF-8 identifier per entry
//! bag          serde_json DrawingSettings; size 0 means defaults
//! extra data   v7+
//! block map    count x { i32 offset, u32 length }
//! payloads     offsets relative to this region; in v8 each payload starts
//!              with its own u16-length-prefixed identifier
//! ```
//!
//! # Auto-detection
//! A zero-length blob or a leading zero `u32` is the empty container.  A
//! blob that starts with neither signature is a single raw representation
//! (the write side's shortcut for one plain image) and is resolved by
//! signature sniffing.

pub mod block_map;
pub mod header;

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::codec::builtin::ids;
use crate::codec::CodecRegistry;
use crate::dedup::{Admission, DedupAccumulator};
use crate::error::{try_alloc, Error, Result};
use crate::provider::{check_range, DataProvider, MemoryProvider, ProviderCursor, SliceProvider};
use crate::representation::{Representation, RepresentationKind};
use crate::settings::DrawingSettings;

pub use block_map::{BlockEntry, BACK_REFERENCE};
pub use header::{ContainerHeader, Endian, CURRENT_VERSION, MIN_VERSION, SIGNATURE, SIGNATURE_SWAPPED};

use header::{FieldReader, FieldWriter, BAG_VERSION, EMBEDDED_ID_VERSION, EXTRA_VERSION};

/// Largest header any version writes.
const MAX_HEADER_SIZE: usize = header::MINIMAL_HEADER_SIZE + 12;

// ── Options ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Keep raw blobs no codec recognizes as pass-through representations
    /// instead of failing.
    pub accept_unknown: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self { accept_unknown: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub version:            u32,
    pub endian:             Endian,
    /// Write a lone plain image as its raw bytes with no container header.
    pub allow_raw_shortcut: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self { version: CURRENT_VERSION, endian: Endian::Little, allow_raw_shortcut: true }
    }
}

// ── Parts ────────────────────────────────────────────────────────────────────

/// Everything a container blob carries, detached from any container value.
#[derive(Debug, Clone, Default)]
pub struct PictureParts {
    pub representations: BTreeMap<String, Representation>,
    pub settings:        DrawingSettings,
    pub extra_data:      Option<Vec<u8>>,
}

impl PictureParts {
    pub fn is_empty(&self) -> bool {
        self.representations.is_empty() && self.extra_data.is_none()
    }
}

/// What a blob looks like before any body is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Empty,
    Raw,
    Container(ContainerHeader),
}

fn is_container_lead(lead: &[u8]) -> Option<bool> {
    let raw = u32::from_le_bytes(lead.get(..4)?.try_into().ok()?);
    match ContainerHeader::classify_signature(raw) {
        Ok(None)    => Some(false),
        Ok(Some(_)) => Some(true),
        Err(_)      => None,
    }
}

/// Header-only parse of `provider`.
pub fn inspect(provider: &dyn DataProvider) -> Result<Layout> {
    let size = provider.size();
    if size == 0 {
        return Ok(Layout::Empty);
    }
    let lead = provider.leading_bytes(4)?;
    match is_container_lead(&lead) {
        None        => return Ok(Layout::Raw),
        Some(false) => return Ok(Layout::Empty),
        Some(true)  => {}
    }
    let header = ContainerHeader::read(ProviderCursor::new(provider))
        .map_err(|e| match e {
            Error::Io(io) => Error::from_read(io, 0, MAX_HEADER_SIZE as u64, size),
            other         => other,
        })?
        .ok_or_else(|| Error::Corrupt("signature vanished on reparse".into()))?;
    Ok(Layout::Container(header))
}

// ── Read ─────────────────────────────────────────────────────────────────────

/// Parse a blob of any supported shape.
///
/// Every representation materialized here is added to `dedup` in block-map
/// order, mirroring what [`write_container`] did, so back references from
/// later containers in the same call tree resolve.
pub fn read_container(
    registry: &CodecRegistry,
    provider: &dyn DataProvider,
    dedup:    &mut DedupAccumulator,
    opts:     &ReadOptions,
) -> Result<PictureParts> {
    match inspect(provider)? {
        Layout::Empty             => Ok(PictureParts::default()),
        Layout::Raw               => read_raw(registry, provider, dedup, opts),
        Layout::Container(header) => read_body(registry, provider, &header, dedup),
    }
}

fn read_raw(
    registry: &CodecRegistry,
    provider: &dyn DataProvider,
    dedup:    &mut DedupAccumulator,
    opts:     &ReadOptions,
) -> Result<PictureParts> {
    let descriptor = registry
        .resolve(None, provider, opts.accept_unknown)?
        .ok_or_else(|| Error::Unsupported("no codec recognizes the data".into()))?;
    debug!(id = %descriptor.id, size = provider.size(), "read raw representation");
    let rep = registry.create_representation(&descriptor, provider)?;
    dedup.add(&rep);
    let mut parts = PictureParts::default();
    parts.representations.insert(rep.id().to_owned(), rep);
    Ok(parts)
}

fn read_at(provider: &dyn DataProvider, offset: u64, len: u32) -> Result<Vec<u8>> {
    let mut buf = try_alloc(len as usize)?;
    provider.get_data(&mut buf, offset)?;
    Ok(buf)
}

fn read_body(
    registry: &CodecRegistry,
    provider: &dyn DataProvider,
    header:   &ContainerHeader,
    dedup:    &mut DedupAccumulator,
) -> Result<PictureParts> {
    let swap = header.endian == Endian::Big;
    let total = header.total_size()?;
    check_range(0, total, provider.size())?;
    debug!(version = header.version, count = header.count, swapped = swap, "read container");

    let mut pos = header.encoded_size()? as u64;
    let name_table = read_at(provider, pos, header.name_table_size)?;
    pos += header.name_table_size as u64;
    let bag = read_at(provider, pos, header.bag_size)?;
    pos += header.bag_size as u64;
    let extra = read_at(provider, pos, header.extra_size)?;
    pos += header.extra_size as u64;

    let map_size = header.block_map_size();
    let map_bytes = read_at(
        provider,
        pos,
        u32::try_from(map_size).map_err(|_| Error::Corrupt(format!("{} block-map entries", header.count)))?,
    )?;
    let payload_base = pos + map_size;

    let names = if header.version < EMBEDDED_ID_VERSION {
        parse_name_table(&name_table, header.count, swap)?
    } else {
        vec![None; header.count as usize]
    };

    let mut parts = PictureParts {
        settings: if bag.is_empty() { DrawingSettings::default() } else { DrawingSettings::from_bag(&bag)? },
        extra_data: (!extra.is_empty()).then_some(extra),
        ..Default::default()
    };

    let mut map = FieldReader::new(Cursor::new(&map_bytes), swap);
    for (i, name) in names.into_iter().enumerate() {
        let rep = match BlockEntry::read(&mut map)? {
            BlockEntry::BackReference(index) => dedup
                .get(index)
                .cloned()
                .ok_or_else(|| Error::Corrupt(format!("entry {i}: back reference {index} is unresolved")))?,
            BlockEntry::Data { offset, length } => {
                check_range(offset, length, header.payload_size as u64)?;
                let block = SliceProvider::new(provider, payload_base + offset, length)?;
                let rep = if header.version >= EMBEDDED_ID_VERSION {
                    let (id, skip) = read_embedded_id(&block, swap)?;
                    let data = SliceProvider::new(&block, skip, length - skip)?;
                    materialize(registry, Some(&id), &data)?
                } else {
                    materialize(registry, name.as_deref(), &block)?
                };
                dedup.add(&rep);
                rep
            }
        };
        match parts.representations.entry(rep.id().to_owned()) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(rep);
            }
            std::collections::btree_map::Entry::Occupied(slot) => {
                warn!(id = %slot.key(), entry = i, "duplicate representation ignored");
            }
        }
    }
    Ok(parts)
}

/// Explicit name, then sniffing, then pass-through.  An entry the writer
/// stored is always kept, so the last step is unconditional.
fn materialize(registry: &CodecRegistry, name: Option<&str>, data: &dyn DataProvider) -> Result<Representation> {
    let descriptor = registry
        .resolve(name, data, true)?
        .ok_or_else(|| Error::Unsupported("no codec for container entry".into()))?;
    registry.create_representation(&descriptor, data)
}

fn parse_name_table(bytes: &[u8], count: u32, swap: bool) -> Result<Vec<Option<String>>> {
    if bytes.is_empty() {
        return Ok(vec![None; count as usize]);
    }
    let corrupt = |what: &str| Error::Corrupt(format!("name table: {what}"));
    let mut f = FieldReader::new(Cursor::new(bytes), swap);
    let mut names = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let len = f.u16().map_err(|_| corrupt("truncated length"))?;
        let raw = f.bytes(len as usize).map_err(|_| corrupt("truncated identifier"))?;
        let name = String::from_utf8(raw).map_err(|_| corrupt("identifier is not UTF-8"))?;
        names.push((!name.is_empty()).then_some(name));
    }
    if f.inner_mut().position() != bytes.len() as u64 {
        return Err(corrupt("trailing bytes"));
    }
    Ok(names)
}

fn read_embedded_id(block: &dyn DataProvider, swap: bool) -> Result<(String, u64)> {
    let mut len = [0u8; 2];
    block.get_data(&mut len, 0)
        .map_err(|_| Error::Corrupt("payload too short for its identifier".into()))?;
    let mut len = u16::from_le_bytes(len);
    if swap {
        len = len.swap_bytes();
    }
    let len = len as u64;
    let mut id = try_alloc(len as usize)?;
    block.get_data(&mut id, 2)
        .map_err(|_| Error::Corrupt("payload identifier runs past its block".into()))?;
    let id = String::from_utf8(id).map_err(|_| Error::Corrupt("payload identifier is not UTF-8".into()))?;
    Ok((id, 2 + len))
}

// ── Write ────────────────────────────────────────────────────────────────────

fn to_u32(v: usize, what: &str) -> Result<u32> {
    u32::try_from(v).map_err(|_| Error::Unsupported(format!("{what} of {v} bytes exceeds format range")))
}

/// Whether `rep` can be stored as the whole blob and read back unchanged.
fn shortcut_candidate(registry: &CodecRegistry, rep: &Representation) -> Result<bool> {
    if rep.kind() != RepresentationKind::Encoded || rep.id() == ids::CONTAINER || rep.is_empty() {
        return Ok(false);
    }
    // A payload that auto-detects as a container (or as empty) would not
    // come back as itself.
    let payload = rep.payload();
    if is_container_lead(payload).is_some() {
        return Ok(false);
    }
    let sniffed = registry.resolve_for_data(&MemoryProvider::new(payload.clone()))?;
    Ok(sniffed.is_some_and(|d| Arc::ptr_eq(&d, rep.codec())))
}

/// Whether a nameless (v5) entry holding `rep` reads back under its own key:
/// sniffing finds the same identifier, or finds nothing and `rep` already
/// lives under the pass-through identifier.
fn sniffs_back_to_own_key(registry: &CodecRegistry, rep: &Representation) -> Result<bool> {
    let sniffed = registry.resolve_for_data(&MemoryProvider::new(rep.payload().clone()))?;
    Ok(match sniffed {
        Some(d) => d.id == rep.id(),
        None    => rep.id() == ids::UNKNOWN,
    })
}

/// Serialize a container.
///
/// Representations whose codec refuses serialization are skipped.  Every
/// written representation is offered to `dedup`; one it already holds is
/// stored as a back reference instead of its bytes.
pub fn write_container(
    registry:        &CodecRegistry,
    representations: &BTreeMap<String, Representation>,
    settings:        &DrawingSettings,
    extra_data:      Option<&[u8]>,
    dedup:           &mut DedupAccumulator,
    opts:            &WriteOptions,
) -> Result<Vec<u8>> {
    let version = opts.version;
    if !(MIN_VERSION..=CURRENT_VERSION).contains(&version) {
        return Err(Error::UnsupportedVersion(version));
    }
    let extra = extra_data.filter(|e| !e.is_empty());
    let participating: Vec<&Representation> = representations.values()
        .filter(|r| r.is_serializable())
        .collect();

    if participating.is_empty() && extra.is_none() && settings.is_default() {
        return Ok(Vec::new());
    }

    if opts.allow_raw_shortcut
        && participating.len() == 1
        && extra.is_none()
        && settings.is_default()
        && shortcut_candidate(registry, participating[0])?
    {
        let rep = participating[0];
        if let Admission::New(_) = dedup.add(rep) {
            debug!(id = %rep.id(), size = rep.len(), "wrote raw representation");
            return Ok(rep.payload().to_vec());
        }
    }

    if extra.is_some() && version < EXTRA_VERSION {
        return Err(Error::Unsupported(format!("version {version} cannot carry extra data")));
    }
    if !settings.is_default() && version < BAG_VERSION {
        return Err(Error::Unsupported(format!("version {version} cannot carry drawing settings")));
    }
    if version < BAG_VERSION {
        for rep in &participating {
            if !sniffs_back_to_own_key(registry, rep)? {
                return Err(Error::Unsupported(format!(
                    "version {version} stores no identifiers and '{}' would not be recognized on read",
                    rep.id()
                )));
            }
        }
    }

    let mark = dedup.len();
    let written = write_body(&participating, settings, extra, dedup, opts);
    if written.is_err() {
        dedup.truncate(mark);
    }
    written
}

/// Lay out the header, tables and payloads.  Admissions made here are only
/// valid if this returns `Ok`.
fn write_body(
    participating: &[&Representation],
    settings:      &DrawingSettings,
    extra:         Option<&[u8]>,
    dedup:         &mut DedupAccumulator,
    opts:          &WriteOptions,
) -> Result<Vec<u8>> {
    let version = opts.version;
    let mut names    = Vec::new();
    let mut entries  = Vec::with_capacity(participating.len());
    let mut payloads = Vec::new();
    {
        let mut names_w   = FieldWriter::new(&mut names, opts.endian);
        let mut payload_w = FieldWriter::new(&mut payloads, opts.endian);
        for rep in participating {
            let id_len = u16::try_from(rep.id().len())
                .map_err(|_| Error::InvalidParameter(format!("identifier {:?} is too long", rep.id())))?;
            if (BAG_VERSION..EMBEDDED_ID_VERSION).contains(&version) {
                names_w.u16(id_len)?;
                names_w.bytes(rep.id().as_bytes())?;
            }
            let entry = match dedup.add(rep) {
                Admission::Existing(index) => BlockEntry::BackReference(index),
                Admission::New(_) | Admission::Exempt => {
                    let start = payload_w.get_ref().len();
                    if version >= EMBEDDED_ID_VERSION {
                        payload_w.u16(id_len)?;
                        payload_w.bytes(rep.id().as_bytes())?;
                    }
                    payload_w.bytes(rep.payload())?;
                    BlockEntry::Data { offset: start as u64, length: (payload_w.get_ref().len() - start) as u64 }
                }
            };
            entries.push(entry);
        }
    }
    let bag = if settings.is_default() { Vec::new() } else { settings.to_bag()? };
    let extra = extra.unwrap_or_default();

    let header = ContainerHeader {
        endian:          opts.endian,
        version,
        count:           to_u32(entries.len(), "block map")?,
        payload_size:    to_u32(payloads.len(), "payload region")?,
        name_table_size: to_u32(names.len(), "name table")?,
        bag_size:        to_u32(bag.len(), "metadata bag")?,
        extra_size:      to_u32(extra.len(), "extra data")?,
    };
    let total = usize::try_from(header.total_size()?).map_err(|_| Error::OutOfMemory(usize::MAX))?;
    let mut out = Vec::new();
    out.try_reserve_exact(total).map_err(|_| Error::OutOfMemory(total))?;

    header.write(&mut out)?;
    out.extend_from_slice(&names);
    out.extend_from_slice(&bag);
    out.extend_from_slice(extra);
    {
        let mut map_w = FieldWriter::new(&mut out, opts.endian);
        for entry in &entries {
            entry.write(&mut map_w)?;
        }
    }
    out.extend_from_slice(&payloads);
    debug!(version, count = header.count, size = out.len(), "wrote container");
    Ok(out)
}
