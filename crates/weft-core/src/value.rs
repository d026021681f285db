// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Stored field values.
use serde_json::Value as Json;

use crate::ident::DataId;

/// Value stored under one storage key of a record.
///
/// The normalized graph is flat: nested server objects are broken out into
/// their own records and referenced by id. The only nested payloads that stay
/// inline are client-synthetic plain objects, which the store treats as
/// opaque.
///
/// Invariants
/// - `Ref`/`RefList` targets are ids in the owning record source. A target
///   may be present, tombstoned, or unfetched; the reader distinguishes all
///   three.
/// - `RefList` preserves payload order and explicit null entries.
/// - An explicit server `null` for any field kind is stored as
///   `Scalar(Json::Null)`; absence of the storage key means unfetched.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// Scalar leaf (string, number, boolean, scalar list, or explicit null).
    Scalar(Json),
    /// Client-synthetic plain object stored inline, opaque to normalization.
    Object(serde_json::Map<String, Json>),
    /// Reference to a single record.
    Ref(DataId),
    /// Ordered references to records, with nulls preserved positionally.
    RefList(Vec<Option<DataId>>),
}

impl Value {
    /// Returns `true` for an explicit stored null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Scalar(Json::Null))
    }

    /// Returns the target id when this value is a singular reference.
    #[must_use]
    pub fn as_ref_id(&self) -> Option<&DataId> {
        match self {
            Self::Ref(id) => Some(id),
            _ => None,
        }
    }

    /// Returns the reference list when this value is plural.
    #[must_use]
    pub fn as_ref_list(&self) -> Option<&[Option<DataId>]> {
        match self {
            Self::RefList(ids) => Some(ids),
            _ => None,
        }
    }

    /// Short human-readable tag for error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Scalar(Json::Null) => "null",
            Self::Scalar(_) => "scalar",
            Self::Object(_) => "object",
            Self::Ref(_) => "reference",
            Self::RefList(_) => "reference list",
        }
    }
}
