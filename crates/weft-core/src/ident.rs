// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifier types for records and stored fields.
use std::fmt;
use std::sync::Arc;

use crate::constants::{CLIENT_ID_PREFIX, ROOT_ID, VIEWER_ID};

/// Strongly typed identifier for a record in the normalized graph.
///
/// `DataId` is an opaque string identifier. Server-assigned ids come straight
/// from the payload's identity field; client-generated ids are derived from
/// the parent record and storage key via [`DataId::client_child`] and carry
/// the reserved `client:` prefix.
///
/// Ids are reference-counted strings, so cloning is cheap and ids can be used
/// freely as map keys in hot sets.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataId(Arc<str>);

impl DataId {
    /// Creates an id from a raw string.
    #[must_use]
    pub fn new(raw: impl Into<Arc<str>>) -> Self {
        Self(raw.into())
    }

    /// Returns the reserved root record id.
    ///
    /// Every operation's selection tree is rooted at this record; root fields
    /// (`me`, `node(id: ...)`) are stored as fields of the root record.
    #[must_use]
    pub fn root() -> Self {
        Self::new(ROOT_ID)
    }

    /// Returns the reserved viewer singleton id.
    #[must_use]
    pub fn viewer() -> Self {
        Self::new(VIEWER_ID)
    }

    /// Derives a stable client-generated id for a singular child object that
    /// carries no server identity.
    #[must_use]
    pub fn client_child(&self, key: &StorageKey) -> Self {
        Self::new(format!("{}:{}", self.0, key.as_str()))
    }

    /// Derives a stable client-generated id for a plural child object at
    /// `index` that carries no server identity.
    #[must_use]
    pub fn client_child_at(&self, key: &StorageKey, index: usize) -> Self {
        Self::new(format!("{}:{}:{index}", self.0, key.as_str()))
    }

    /// Returns the raw string form of this id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this id was generated client-side rather than taken
    /// from a payload identity field.
    #[must_use]
    pub fn is_client_generated(&self) -> bool {
        self.0.starts_with(CLIENT_ID_PREFIX)
    }
}

impl fmt::Debug for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataId({})", self.0)
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DataId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for DataId {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

/// Storage key for one field of a record: the field name combined with a
/// canonical encoding of its arguments.
///
/// Keys are produced by [`crate::args::storage_key`]; the encoding is stable
/// regardless of argument order, so overlapping queries address the same
/// stored field. Argument-free fields use the bare field name.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StorageKey(Arc<str>);

impl StorageKey {
    /// Creates a storage key from an already-canonical string.
    #[must_use]
    pub fn new(raw: impl Into<Arc<str>>) -> Self {
        Self(raw.into())
    }

    /// Returns the raw string form of this key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageKey({})", self.0)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StorageKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Composite key addressing one field of one record.
///
/// Field-granular change tracking intersects sets of these keys to decide
/// whether a subscription needs a re-read, instead of the coarser
/// record-level test.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldKey {
    /// Record that owns the field.
    pub id: DataId,
    /// Storage key of the field within the record.
    pub key: StorageKey,
}

impl FieldKey {
    /// Creates a composite key for `key` on record `id`.
    #[must_use]
    pub fn new(id: DataId, key: StorageKey) -> Self {
        Self { id, key }
    }
}
