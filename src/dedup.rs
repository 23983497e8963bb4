//! Per-call dedup of shared representations.
//!
//! A [`DedupAccumulator`] lives for exactly one read or write call tree.  On
//! write, the first occurrence of a representation object emits its bytes
//! and later occurrences emit a back reference to its index.  On read, every
//! materialized representation is added in the same order, so back
//! references resolve to the object created for the first occurrence.
//!
//! Identity is object identity ([`Representation::ptr_eq`]), never byte
//! equality.  Provenance representations are exempt: always reported new,
//! never indexed.

use std::collections::HashMap;

use crate::representation::{Representation, RepresentationKind};

/// Outcome of [`DedupAccumulator::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    New(u32),
    Existing(u32),
    /// Reported as new but not indexed.
    Exempt,
}

impl Admission {
    pub fn is_new(self) -> bool {
        !matches!(self, Admission::Existing(_))
    }

    pub fn index(self) -> Option<u32> {
        match self {
            Admission::New(i) | Admission::Existing(i) => Some(i),
            Admission::Exempt => None,
        }
    }
}

#[derive(Default)]
pub struct DedupAccumulator {
    // Holding a clone keeps every indexed address alive and unique.
    entries: Vec<Representation>,
    by_identity: HashMap<usize, u32>,
}

impl DedupAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, rep: &Representation) -> Admission {
        if rep.kind() == RepresentationKind::Provenance {
            return Admission::Exempt;
        }
        if let Some(&index) = self.by_identity.get(&rep.identity()) {
            return Admission::Existing(index);
        }
        let index = self.entries.len() as u32;
        self.by_identity.insert(rep.identity(), index);
        self.entries.push(rep.clone());
        Admission::New(index)
    }

    pub fn get(&self, index: u32) -> Option<&Representation> {
        self.entries.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every representation admitted at or after index `len`.
    /// A failed write uses this to drop admissions it never emitted.
    pub fn truncate(&mut self, len: usize) {
        let start = len.min(self.entries.len());
        for rep in self.entries.drain(start..) {
            self.by_identity.remove(&rep.identity());
        }
    }
}
