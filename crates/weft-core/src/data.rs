// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Snapshot data trees and reference recycling.
//!
//! Read results are trees of [`DataValue`]s with shared-ownership interior
//! nodes. When a re-read produces a subtree deep-equal to the previous
//! snapshot's subtree, [`recycle`] reuses the previous node (same `Arc`), so
//! consumers can short-circuit on identity instead of re-comparing deeply.
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as Json;

/// Tree node keyed by response key.
pub type DataObject = BTreeMap<Box<str>, DataValue>;

/// One value in a snapshot's data tree.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataValue {
    /// Explicit null (deleted record, null field, or bubbled required
    /// failure). Missing data also reads as null, flagged on the snapshot.
    Null,
    /// Scalar leaf copied out of a record.
    Scalar(Json),
    /// Nested object for a linked record or inline payload.
    Object(Arc<DataObject>),
    /// Ordered list for a plural field, nulls preserved.
    List(Arc<Vec<DataValue>>),
}

impl DataValue {
    /// Wraps an object node.
    #[must_use]
    pub fn object(object: DataObject) -> Self {
        Self::Object(Arc::new(object))
    }

    /// Wraps a list node.
    #[must_use]
    pub fn list(items: Vec<DataValue>) -> Self {
        Self::List(Arc::new(items))
    }

    /// Returns `true` if `self` and `other` are the same interior node
    /// (pointer identity), or equal leaves.
    ///
    /// Used by tests to assert recycling; `false` for equal-but-distinct
    /// interior nodes.
    #[must_use]
    pub fn same_node(&self, other: &DataValue) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Scalar(a), Self::Scalar(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            (Self::List(a), Self::List(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Recycles `next` against `prev`, reusing unchanged subtrees.
///
/// Returns the resulting value and `true` when the result differs from
/// `prev`. Children are recycled individually, so an unchanged subtree keeps
/// its identity even when a sibling changed.
#[must_use]
pub fn recycle(prev: &DataValue, next: DataValue) -> (DataValue, bool) {
    match (prev, next) {
        (DataValue::Null, DataValue::Null) => (DataValue::Null, false),
        (DataValue::Scalar(a), DataValue::Scalar(b)) => {
            if *a == b {
                (DataValue::Scalar(b), false)
            } else {
                (DataValue::Scalar(b), true)
            }
        }
        (DataValue::Object(a), DataValue::Object(b)) => {
            let (object, changed) = recycle_object(a, &b);
            (DataValue::Object(object), changed)
        }
        (DataValue::List(a), DataValue::List(b)) => {
            let mut changed = b.len() != a.len();
            let mut items = Vec::with_capacity(b.len());
            let next_items = Arc::try_unwrap(b).unwrap_or_else(|arc| (*arc).clone());
            for (index, item) in next_items.into_iter().enumerate() {
                match a.get(index) {
                    Some(prev_item) => {
                        let (item, item_changed) = recycle(prev_item, item);
                        changed |= item_changed;
                        items.push(item);
                    }
                    None => {
                        changed = true;
                        items.push(item);
                    }
                }
            }
            if changed {
                (DataValue::list(items), true)
            } else {
                (DataValue::List(Arc::clone(a)), false)
            }
        }
        (_, next) => (next, true),
    }
}

fn recycle_object(prev: &Arc<DataObject>, next: &Arc<DataObject>) -> (Arc<DataObject>, bool) {
    let mut changed = prev.len() != next.len();
    let mut object = DataObject::new();
    for (key, value) in next.iter() {
        match prev.get(key) {
            Some(prev_value) => {
                let (value, value_changed) = recycle(prev_value, value.clone());
                changed |= value_changed;
                object.insert(key.clone(), value);
            }
            None => {
                changed = true;
                object.insert(key.clone(), value.clone());
            }
        }
    }
    if changed {
        (Arc::new(object), true)
    } else {
        (Arc::clone(prev), false)
    }
}
