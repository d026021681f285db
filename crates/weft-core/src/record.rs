// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Record type: the flat, field-keyed representation of one graph entity.
use std::collections::BTreeMap;

use crate::ident::{DataId, StorageKey};
use crate::value::Value;

/// Server-reported error attached to one field of one record.
///
/// Field errors are data, not control flow: they are stored beside the field
/// value, surfaced in snapshots, and participate in change detection (an
/// error appearing on an otherwise-unchanged null field is a change).
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldError {
    /// Human-readable message from the server payload.
    pub message: Box<str>,
}

impl FieldError {
    /// Creates a field error with the given message.
    #[must_use]
    pub fn new(message: impl Into<Box<str>>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Materialised record for a single entity in the normalized graph.
///
/// A record is a flat property bag plus an error plane. The record's identity
/// and type are first-class entries rather than ordinary fields, mirroring
/// the reserved `__id`/`__typename` keys of the wire representation.
///
/// Invariants
/// - Records are exclusively owned by their record source and never aliased
///   outside it; readers copy values out.
/// - `fields` holds no entry for unfetched fields; explicit nulls are stored
///   as [`Value::Scalar`] nulls.
/// - The error plane holds entries only for fields that currently carry at
///   least one error.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Record {
    id: DataId,
    typename: Box<str>,
    fields: BTreeMap<StorageKey, Value>,
    errors: BTreeMap<StorageKey, Vec<FieldError>>,
}

impl Record {
    /// Creates an empty record with the given identity and type name.
    #[must_use]
    pub fn new(id: DataId, typename: impl Into<Box<str>>) -> Self {
        Self {
            id,
            typename: typename.into(),
            fields: BTreeMap::new(),
            errors: BTreeMap::new(),
        }
    }

    /// Returns the record's identity.
    #[must_use]
    pub fn id(&self) -> &DataId {
        &self.id
    }

    /// Returns the record's concrete type name.
    #[must_use]
    pub fn typename(&self) -> &str {
        &self.typename
    }

    /// Rewrites the record's type name.
    ///
    /// Normalization uses this when a later payload reports a different
    /// concrete type for an already-known id; the publish merge surfaces the
    /// change record-level.
    pub fn set_typename(&mut self, typename: impl Into<Box<str>>) {
        self.typename = typename.into();
    }

    /// Returns the stored value for `key`, or `None` when unfetched.
    #[must_use]
    pub fn get(&self, key: &StorageKey) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns `true` if `key` has a stored value (including explicit null).
    #[must_use]
    pub fn has(&self, key: &StorageKey) -> bool {
        self.fields.contains_key(key)
    }

    /// Inserts or replaces the value for `key`, returning the previous value.
    pub fn set(&mut self, key: StorageKey, value: Value) -> Option<Value> {
        self.fields.insert(key, value)
    }

    /// Iterates over stored fields in deterministic key order.
    pub fn fields(&self) -> impl Iterator<Item = (&StorageKey, &Value)> {
        self.fields.iter()
    }

    /// Returns the errors currently attached to `key`.
    #[must_use]
    pub fn field_errors(&self, key: &StorageKey) -> &[FieldError] {
        self.errors.get(key).map_or(&[], Vec::as_slice)
    }

    /// Replaces the errors attached to `key`.
    ///
    /// Passing an empty list clears the entry.
    pub fn set_field_errors(&mut self, key: StorageKey, errors: Vec<FieldError>) {
        if errors.is_empty() {
            self.errors.remove(&key);
        } else {
            self.errors.insert(key, errors);
        }
    }

    /// Iterates over all fields that carry errors, in deterministic order.
    pub fn errors(&self) -> impl Iterator<Item = (&StorageKey, &[FieldError])> {
        self.errors.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Merges `incoming` into this record, field by field, last write wins.
    ///
    /// Returns the storage keys whose stored value or error list actually
    /// changed (shallow inequality). Fields absent from `incoming` are left
    /// untouched; for fields `incoming` does write, its error list for that
    /// key (possibly empty) replaces the current one.
    ///
    /// A type-name change is recorded under the incoming record's keys only
    /// if a field changed; callers that need record-level change tracking for
    /// type migration observe it through the returned `typename_changed`
    /// flag.
    pub fn merge_from(&mut self, incoming: Record) -> MergeOutcome {
        let mut changed = Vec::new();
        let mut typename_changed = false;
        if self.typename != incoming.typename {
            self.typename = incoming.typename;
            typename_changed = true;
        }
        let mut incoming_errors = incoming.errors;
        for (key, value) in incoming.fields {
            let errors = incoming_errors.remove(&key).unwrap_or_default();
            let value_changed = self.fields.get(&key) != Some(&value);
            let errors_changed = self.field_errors(&key) != errors.as_slice();
            if value_changed {
                self.fields.insert(key.clone(), value);
            }
            if errors_changed {
                self.set_field_errors(key.clone(), errors);
            }
            if value_changed || errors_changed {
                changed.push(key);
            }
        }
        // Errors reported for fields the payload did not otherwise write
        // (e.g. an errored field that stayed null) still transition state.
        for (key, errors) in incoming_errors {
            if self.field_errors(&key) != errors.as_slice() {
                self.set_field_errors(key.clone(), errors);
                changed.push(key);
            }
        }
        MergeOutcome {
            changed,
            typename_changed,
        }
    }
}

/// Result of [`Record::merge_from`].
#[derive(Debug)]
pub struct MergeOutcome {
    /// Storage keys whose value or error list changed.
    pub changed: Vec<StorageKey>,
    /// `true` if the record's type name was rewritten.
    pub typename_changed: bool,
}
