// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reserved identifiers and storage-key prefixes.
//!
//! The store reserves a `client:`-prefixed id namespace and a
//! double-underscore storage-key namespace. Server schemas must not define
//! fields that collide with these prefixes; the normalizer writes them and
//! the reader interprets them without consulting the selection tree.

/// Id of the root record all operation selections hang off.
pub const ROOT_ID: &str = "client:root";

/// Type name recorded on the root record.
pub const ROOT_TYPE: &str = "__Root";

/// Id of the viewer singleton record.
///
/// The default identity policy falls back to this id for objects of
/// [`VIEWER_TYPE`] that carry no identity field, so every query's viewer
/// lands on one record.
pub const VIEWER_ID: &str = "client:root:viewer";

/// Distinguished type name for the viewer singleton.
pub const VIEWER_TYPE: &str = "Viewer";

/// Prefix shared by all client-generated record ids.
pub const CLIENT_ID_PREFIX: &str = "client:";

/// Payload field consulted by the default identity policy.
pub const ID_FIELD: &str = "id";

/// Payload field carrying an object's concrete type name.
pub const TYPENAME_FIELD: &str = "__typename";

/// Storage-key prefix for abstract-type membership markers.
///
/// A record that implements interface `Foo` carries `__isFoo` so the reader
/// can test membership without re-deriving the type hierarchy.
pub const ABSTRACT_MARKER_PREFIX: &str = "__is";

/// Storage-key prefix for deferred-payload presence markers.
///
/// The marker for a deferred fragment labelled `L` is `__part_L`; it is
/// written when the incremental part is normalized, and its absence tells the
/// reader the contained fields are not yet fetched.
pub const PART_MARKER_PREFIX: &str = "__part_";

/// Storage-key prefix for dynamic module component references.
pub const MODULE_COMPONENT_PREFIX: &str = "__module_component_";

/// Storage-key prefix for dynamic module operation references.
pub const MODULE_OPERATION_PREFIX: &str = "__module_operation_";
