//! Codec registry: resolution by identifier or by signature, unknown-data
//! pass-through synthesis, and best-representation selection.
//!
//! # Tiers
//! Descriptors live in three tiers, always scanned in this order:
//!   1. built-in (fixed at construction),
//!   2. platform-provided ([`CodecRegistry::register_platform`]),
//!   3. dynamically registered ([`CodecRegistry::register`]), which is also
//!      where synthesized pass-through descriptors land.
//!
//! The two mutable tiers and the best-pick policy sit behind one mutex.
//!
//! # Fallback chain
//! [`CodecRegistry::resolve`] tries explicit identifier → signature sniff →
//! pass-through synthesis.  A miss at every step is `Ok(None)`, not an
//! error; the caller decides what to do next.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tracing::debug;

use super::builtin::{self, ids};
use super::CodecDescriptor;
use crate::error::Result;
use crate::picture::PictureContainer;
use crate::provider::{DataProvider, MemoryProvider};
use crate::representation::{Representation, RepresentationKind};

/// Leading bytes read for sniffing when no signature needs more.
const MIN_SNIFF_LEN: usize = 64;

// ── Best-pick policy ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Display,
    Printing,
}

/// Ordered preference lists used by [`CodecRegistry::select_best`].
///
/// Entries are container keys (canonical codec identifiers).  A format
/// listed in `animated` outranks the display list when its representation
/// has more than one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestPolicy {
    pub display:  Vec<String>,
    pub printing: Vec<String>,
    pub animated: Vec<String>,
}

impl Default for BestPolicy {
    fn default() -> Self {
        let own = |v: &[&str]| v.iter().map(|s| s.to_string()).collect();
        Self {
            display: own(&[
                ids::PNG, ids::JPEG, ids::WEBP, ids::GIF, ids::TIFF, ids::BMP,
                ids::SVG, ids::PDF, ids::EMF, ids::PICT,
            ]),
            printing: own(&[
                ids::PDF, ids::SVG, ids::EMF, ids::PICT, ids::TIFF, ids::PNG,
                ids::JPEG, ids::WEBP, ids::BMP, ids::GIF,
            ]),
            animated: own(&[ids::GIF]),
        }
    }
}

impl BestPolicy {
    /// Pick a key from `reps` for `purpose`.
    ///
    /// Order: animated override (display only), the purpose's list, the only
    /// representation present, then the first non-provenance key.
    pub fn pick(&self, reps: &BTreeMap<String, Representation>, purpose: Purpose) -> Option<String> {
        if reps.is_empty() {
            return None;
        }
        if purpose == Purpose::Display {
            let animated = self.animated.iter()
                .find(|id| reps.get(id.as_str()).is_some_and(|r| r.frame_count() > 1));
            if let Some(id) = animated {
                return Some(id.clone());
            }
        }
        let list = match purpose {
            Purpose::Display  => &self.display,
            Purpose::Printing => &self.printing,
        };
        if let Some(id) = list.iter().find(|id| reps.contains_key(id.as_str())) {
            return Some(id.clone());
        }
        if reps.len() == 1 {
            return reps.keys().next().cloned();
        }
        reps.iter()
            .find(|(_, r)| r.kind() != RepresentationKind::Provenance)
            .or_else(|| reps.iter().next())
            .map(|(k, _)| k.clone())
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Tiers {
    platform: Vec<Arc<CodecDescriptor>>,
    dynamic:  Vec<Arc<CodecDescriptor>>,
    policy:   BestPolicy,
}

pub struct CodecRegistry {
    builtin: Vec<Arc<CodecDescriptor>>,
    tiers:   Mutex<Tiers>,
}

impl Default for CodecRegistry {
    fn default() -> Self { Self::new() }
}

static SHARED: OnceLock<Arc<CodecRegistry>> = OnceLock::new();

impl CodecRegistry {
    /// Fresh registry holding only the built-in codecs.
    pub fn new() -> Self {
        Self::with_builtins(builtin::builtin_descriptors())
    }

    pub fn with_builtins(builtin: Vec<Arc<CodecDescriptor>>) -> Self {
        Self { builtin, tiers: Mutex::new(Tiers::default()) }
    }

    /// Process-wide registry, built on first use.
    pub fn shared() -> Arc<CodecRegistry> {
        Arc::clone(SHARED.get_or_init(|| Arc::new(CodecRegistry::new())))
    }

    fn lock(&self) -> MutexGuard<'_, Tiers> {
        self.tiers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Registration ─────────────────────────────────────────────────────────

    pub fn register(&self, descriptor: CodecDescriptor) -> Arc<CodecDescriptor> {
        let d = Arc::new(descriptor);
        debug!(id = %d.id, "registered dynamic codec");
        self.lock().dynamic.push(Arc::clone(&d));
        d
    }

    pub fn register_platform(&self, descriptor: CodecDescriptor) -> Arc<CodecDescriptor> {
        let d = Arc::new(descriptor);
        debug!(id = %d.id, "registered platform codec");
        self.lock().platform.push(Arc::clone(&d));
        d
    }

    /// Every descriptor in priority order.
    pub fn descriptors(&self) -> Vec<Arc<CodecDescriptor>> {
        let tiers = self.lock();
        self.builtin.iter()
            .chain(&tiers.platform)
            .chain(&tiers.dynamic)
            .cloned()
            .collect()
    }

    pub fn policy(&self) -> BestPolicy {
        self.lock().policy.clone()
    }

    pub fn set_policy(&self, policy: BestPolicy) {
        self.lock().policy = policy;
    }

    // ── Resolution ───────────────────────────────────────────────────────────

    /// First descriptor that `id` names, or `None`.
    pub fn resolve_by_identifier(&self, id: &str) -> Option<Arc<CodecDescriptor>> {
        let tiers = self.lock();
        Self::find_by_identifier(&self.builtin, &tiers, id)
    }

    fn find_by_identifier(
        builtin: &[Arc<CodecDescriptor>],
        tiers:   &Tiers,
        id:      &str,
    ) -> Option<Arc<CodecDescriptor>> {
        builtin.iter()
            .chain(&tiers.platform)
            .chain(&tiers.dynamic)
            .find(|d| d.matches_identifier(id))
            .cloned()
    }

    /// First descriptor whose signature check accepts the provider's data.
    pub fn resolve_for_data(&self, provider: &dyn DataProvider) -> Result<Option<Arc<CodecDescriptor>>> {
        let candidates: Vec<_> = self.descriptors()
            .into_iter()
            .filter(|d| d.is_sniffable())
            .collect();
        let want = candidates.iter()
            .map(|d| d.sniff_len())
            .max()
            .unwrap_or(0)
            .max(MIN_SNIFF_LEN);
        let lead = provider.leading_bytes(want)?;
        for d in candidates {
            if d.sniff(&lead, provider)? {
                debug!(id = %d.id, "codec resolved by signature");
                return Ok(Some(d));
            }
        }
        Ok(None)
    }

    /// Resolve `id`, or bind a private pass-through descriptor to it when
    /// `allow_unknown` is set.  Later lookups of `id` find that descriptor.
    pub fn resolve_or_synthesize_unknown(&self, id: &str, allow_unknown: bool) -> Option<Arc<CodecDescriptor>> {
        let mut tiers = self.lock();
        if let Some(d) = Self::find_by_identifier(&self.builtin, &tiers, id) {
            return Some(d);
        }
        if !allow_unknown {
            return None;
        }
        let d = Arc::new(builtin::pass_through_descriptor(id));
        debug!(id, "synthesized pass-through codec");
        tiers.dynamic.push(Arc::clone(&d));
        Some(d)
    }

    /// Full fallback chain: explicit identifier, signature sniff, then
    /// pass-through synthesis bound to `id` (or [`ids::UNKNOWN`]).
    pub fn resolve(
        &self,
        id:            Option<&str>,
        provider:      &dyn DataProvider,
        allow_unknown: bool,
    ) -> Result<Option<Arc<CodecDescriptor>>> {
        if let Some(d) = id.and_then(|id| self.resolve_by_identifier(id)) {
            return Ok(Some(d));
        }
        if let Some(d) = self.resolve_for_data(provider)? {
            return Ok(Some(d));
        }
        Ok(self.resolve_or_synthesize_unknown(id.unwrap_or(ids::UNKNOWN), allow_unknown))
    }

    // ── Construction ─────────────────────────────────────────────────────────

    pub fn create_representation(
        &self,
        descriptor: &Arc<CodecDescriptor>,
        provider:   &dyn DataProvider,
    ) -> Result<Representation> {
        descriptor.codec().decode(descriptor, provider)
    }

    /// Resolve through the full chain and decode `bytes` in one step.
    pub fn make_representation(
        &self,
        id:            Option<&str>,
        bytes:         impl Into<crate::provider::ByteView>,
        allow_unknown: bool,
    ) -> Result<Option<Representation>> {
        let provider = MemoryProvider::new(bytes.into());
        match self.resolve(id, &provider, allow_unknown)? {
            Some(d) => Ok(Some(self.create_representation(&d, &provider)?)),
            None => Ok(None),
        }
    }

    // ── Best pick ────────────────────────────────────────────────────────────

    pub fn select_best(&self, container: &PictureContainer, purpose: Purpose) -> Option<String> {
        self.select_best_in(container.representation_map(), purpose)
    }

    pub fn select_best_in(&self, reps: &BTreeMap<String, Representation>, purpose: Purpose) -> Option<String> {
        self.lock().policy.pick(reps, purpose)
    }
}
