// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Record source: the id-addressed storage substrate.
//!
//! A [`RecordSource`] maps record ids to records or tombstones. Lookups are
//! tri-state (present, deleted, unfetched) and readers must treat all
//! three distinctly: a tombstone reads as an explicit null, an unfetched id
//! reads as missing data.
//!
//! Cyclic graphs need no special casing here: references are ids into the
//! map, never structural pointers, so storage is cycle-agnostic and only
//! traversals bound their depth.
use std::collections::BTreeMap;

use rustc_hash::FxHashSet;

use crate::ident::{DataId, FieldKey};
use crate::record::Record;

/// Entry stored for one id.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
enum Stored {
    /// Live record.
    Record(Record),
    /// Explicit deleted-record marker, distinct from "never fetched".
    Tombstone,
}

/// Tri-state result of a record lookup.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Lookup<'a> {
    /// The record exists.
    Present(&'a Record),
    /// The record was explicitly deleted; reads yield null.
    Deleted,
    /// The id has never been written; reads are missing data.
    Unfetched,
}

impl<'a> Lookup<'a> {
    /// Returns the record when present.
    #[must_use]
    pub fn record(self) -> Option<&'a Record> {
        match self {
            Self::Present(record) => Some(record),
            Self::Deleted | Self::Unfetched => None,
        }
    }
}

/// In-memory mapping from record id to record or tombstone.
///
/// Iteration order over ids is deterministic (ascending id), which keeps
/// publish receipts and GC sweeps reproducible.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RecordSource {
    records: BTreeMap<DataId, Stored>,
}

impl RecordSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up `id`, distinguishing present, deleted, and unfetched.
    #[must_use]
    pub fn get(&self, id: &DataId) -> Lookup<'_> {
        match self.records.get(id) {
            Some(Stored::Record(record)) => Lookup::Present(record),
            Some(Stored::Tombstone) => Lookup::Deleted,
            None => Lookup::Unfetched,
        }
    }

    /// Returns a mutable reference to a present record.
    pub fn get_mut(&mut self, id: &DataId) -> Option<&mut Record> {
        match self.records.get_mut(id) {
            Some(Stored::Record(record)) => Some(record),
            _ => None,
        }
    }

    /// Inserts or replaces the record stored under its own id.
    pub fn set(&mut self, record: Record) {
        self.records
            .insert(record.id().clone(), Stored::Record(record));
    }

    /// Marks `id` as deleted. Subsequent lookups return [`Lookup::Deleted`].
    pub fn delete(&mut self, id: DataId) {
        self.records.insert(id, Stored::Tombstone);
    }

    /// Forgets `id` entirely. Subsequent lookups return [`Lookup::Unfetched`].
    pub fn remove(&mut self, id: &DataId) {
        self.records.remove(id);
    }

    /// Returns `true` if `id` is present or tombstoned.
    #[must_use]
    pub fn has(&self, id: &DataId) -> bool {
        self.records.contains_key(id)
    }

    /// Iterates over all known ids (present and tombstoned) in ascending
    /// order. The iterator borrows the source and can be restarted by
    /// calling again.
    pub fn ids(&self) -> impl Iterator<Item = &DataId> {
        self.records.keys()
    }

    /// Number of entries, counting tombstones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` when the source holds no entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Merges `sink` into this source, recording what changed in `touched`.
    ///
    /// Per-record semantics:
    /// - id unknown here, record in sink: created (structural change, every
    ///   written field touched);
    /// - tombstone here, record in sink: resurrected (structural);
    /// - record here, tombstone in sink: deleted (structural, every
    ///   previously stored field touched);
    /// - record on both sides: field-by-field last-write-wins merge; only
    ///   fields whose value or error list actually changed are touched.
    ///
    /// Record-level touched ids accumulate for any change; structural ids
    /// only for creation/deletion/resurrection. The field-granular notify
    /// path intersects fine keys plus structural ids, the coarse path
    /// intersects record-level ids.
    pub fn merge(&mut self, sink: RecordSource, touched: &mut TouchedKeys) {
        for (id, stored) in sink.records {
            match stored {
                Stored::Tombstone => match self.records.get(&id) {
                    Some(Stored::Tombstone) => {}
                    Some(Stored::Record(prev)) => {
                        let keys: Vec<_> = prev.fields().map(|(k, _)| k.clone()).collect();
                        for key in keys {
                            touched.fields.insert(FieldKey::new(id.clone(), key));
                        }
                        touched.mark_structural(id.clone());
                        self.records.insert(id, Stored::Tombstone);
                    }
                    None => {
                        touched.mark_structural(id.clone());
                        self.records.insert(id, Stored::Tombstone);
                    }
                },
                Stored::Record(incoming) => match self.records.get_mut(&id) {
                    Some(Stored::Record(existing)) => {
                        let outcome = existing.merge_from(incoming);
                        if outcome.typename_changed {
                            touched.records.insert(id.clone());
                        }
                        for key in outcome.changed {
                            touched.records.insert(id.clone());
                            touched.fields.insert(FieldKey::new(id.clone(), key));
                        }
                    }
                    Some(Stored::Tombstone) | None => {
                        for (key, _) in incoming.fields() {
                            touched.fields.insert(FieldKey::new(id.clone(), key.clone()));
                        }
                        touched.mark_structural(id.clone());
                        self.records.insert(id, Stored::Record(incoming));
                    }
                },
            }
        }
    }
}

/// Overlay over a base source: reads fall through, writes land in the sink.
///
/// The normalizer works against an overlay so that a failing payload part can
/// be discarded without corrupting committed state; only a completed sink is
/// ever merged into the canonical source.
#[derive(Debug)]
pub struct OverlaySource<'a> {
    base: &'a RecordSource,
    sink: RecordSource,
}

impl<'a> OverlaySource<'a> {
    /// Creates an empty overlay over `base`.
    #[must_use]
    pub fn new(base: &'a RecordSource) -> Self {
        Self {
            base,
            sink: RecordSource::new(),
        }
    }

    /// Looks up `id` in the sink first, falling through to the base.
    #[must_use]
    pub fn get(&self, id: &DataId) -> Lookup<'_> {
        match self.sink.get(id) {
            Lookup::Unfetched => self.base.get(id),
            hit => hit,
        }
    }

    /// Returns a mutable record in the sink, copying it up from the base on
    /// first write if needed. Returns `None` for deleted or unfetched ids.
    pub fn get_mut(&mut self, id: &DataId) -> Option<&mut Record> {
        if self.sink.get(id) == Lookup::Unfetched {
            match self.base.get(id) {
                Lookup::Present(record) => self.sink.set(record.clone()),
                Lookup::Deleted | Lookup::Unfetched => return None,
            }
        }
        self.sink.get_mut(id)
    }

    /// Inserts or replaces a record in the sink.
    pub fn set(&mut self, record: Record) {
        self.sink.set(record);
    }

    /// Tombstones `id` in the sink.
    pub fn delete(&mut self, id: DataId) {
        self.sink.delete(id);
    }

    /// Consumes the overlay, yielding the accumulated sink.
    #[must_use]
    pub fn into_sink(self) -> RecordSource {
        self.sink
    }
}

/// Identifiers touched by one or more publishes, consumed by notify.
#[derive(Clone, Debug, Default)]
pub struct TouchedKeys {
    /// Records with any change at all (coarse notification test).
    pub records: FxHashSet<DataId>,
    /// Records created, deleted, or resurrected (structural changes also
    /// intersect against record-level seen keys in field-granular mode,
    /// because a reader that found an id unfetched has no field keys for
    /// it).
    pub structural: FxHashSet<DataId>,
    /// Exact `(record, field)` keys whose value or error list changed.
    pub fields: FxHashSet<FieldKey>,
}

impl TouchedKeys {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when nothing was touched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.structural.is_empty() && self.fields.is_empty()
    }

    fn mark_structural(&mut self, id: DataId) {
        self.records.insert(id.clone());
        self.structural.insert(id);
    }
}
