// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! weft-core: normalized client-side graph store.
//!
//! Tree-shaped query responses are flattened into an id-addressed record
//! graph by the normalizer, read back into data trees by the reader, and
//! kept consistent across overlapping queries by the store's
//! publish → notify cycle: merge an overlay, compute the touched-key set,
//! re-read only the subscriptions that could have seen a change, and invoke
//! callbacks only when their data actually changed.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod args;
mod constants;
mod data;
mod ident;
mod marker;
mod normalizer;
mod reader;
mod record;
mod selection;
mod selector;
mod snapshot;
mod source;
mod store_impl;
mod telemetry;
mod value;

// Re-exports for stable public API
/// Canonical argument encoding, variables, and storage-key construction.
pub use args::{storage_key, Argument, ArgumentValue, UnboundVariable, Variables};
/// Reserved ids and storage-key prefixes.
pub use constants::{ROOT_ID, ROOT_TYPE, VIEWER_ID, VIEWER_TYPE};
/// Snapshot data trees and reference recycling.
pub use data::{recycle, DataObject, DataValue};
/// Identifier types for records and stored fields.
pub use ident::{DataId, FieldKey, StorageKey};
/// Reachability marking for retain-based GC.
pub use marker::mark_reachable;
/// Payload flattening into record overlays.
pub use normalizer::{
    default_id_policy, normalize_deferred, normalize_response, normalize_stream_item,
    DeferPlaceholder, IdPolicy, IncrementalPlaceholder, ModulePointer, NormalizeError,
    NormalizeOptions, NormalizedPart, PathSegment, PayloadError, StreamPlaceholder,
};
/// Selection-tree reads producing snapshots.
pub use reader::{read, ChangeGranularity, ReadError};
/// Flat record representation and per-field errors.
pub use record::{FieldError, MergeOutcome, Record};
/// Selection-tree variants consumed from compile-time tooling.
pub use selection::{
    Condition, DeferFragment, InlineFragment, LinkedField, ModuleImport, RequiredAction,
    RequiredField, ScalarField, Selection, StreamField, TypeCondition,
};
/// Selector tuple identifying one read.
pub use selector::{Selector, SelectorRoot};
/// Snapshot and its seen-key / error metadata.
pub use snapshot::{DataError, SeenKeys, Snapshot};
/// Record storage substrate: tri-state lookup, overlays, touched keys.
pub use source::{Lookup, OverlaySource, RecordSource, TouchedKeys};
/// The store and its publish/notify engine.
pub use store_impl::{PublishReceipt, RetainToken, Store, StoreConfig, SubscriptionToken};
/// Stored field values.
pub use value::Value;
