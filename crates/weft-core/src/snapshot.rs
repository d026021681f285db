// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Snapshot type: the immutable result of one read.
use rustc_hash::FxHashSet;

use crate::data::DataValue;
use crate::ident::{DataId, FieldKey, StorageKey};
use crate::selection::RequiredAction;
use crate::selector::Selector;

/// Record and field keys a read visited.
///
/// Record-level keys are always tracked: every record the read touched,
/// whether present, deleted, or unfetched. Field-level composite keys are
/// tracked in field-granular mode only, for every field access attempted on
/// a present record.
#[derive(Clone, Debug, Default)]
pub struct SeenKeys {
    /// Every record id the read visited.
    pub records: FxHashSet<DataId>,
    /// Exact `(record, field)` keys the read consulted (field-granular mode).
    pub fields: FxHashSet<FieldKey>,
}

impl SeenKeys {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Error surfaced on a snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataError {
    /// Server-reported error attached to a field the read visited.
    Field {
        /// Record owning the errored field.
        owner: DataId,
        /// Storage key of the errored field.
        key: StorageKey,
        /// Message from the payload.
        message: Box<str>,
    },
    /// A required field read null or missing.
    MissingRequired {
        /// Record owning the missing field.
        owner: DataId,
        /// Storage key of the missing field.
        key: StorageKey,
        /// Declared action of the required field.
        action: RequiredAction,
    },
}

/// Result of one read: data plus missing/error metadata, seen keys, and the
/// epoch the read observed.
///
/// Snapshots are immutable; a subsequent read for the same selector produces
/// a fresh snapshot, recycling unchanged subtrees of the data so consumers
/// can rely on node identity.
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// What was read.
    pub selector: Selector,
    /// The resulting data tree. Missing and explicit-null values both read
    /// as [`DataValue::Null`]; `is_missing_data` tells them apart in
    /// aggregate.
    pub data: DataValue,
    /// `true` when any reachable record or field was unfetched.
    pub is_missing_data: bool,
    /// Records and fields the read visited.
    pub seen: SeenKeys,
    /// Field-level and required-field errors encountered.
    pub errors: Vec<DataError>,
    /// Store epoch the read observed. Zero for reads outside a store.
    pub epoch: u64,
}
