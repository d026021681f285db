// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reference marker: computes record liveness for garbage collection.
//!
//! The marker walks the same selection trees as the reader, but over
//! possibly-incomplete data: unreachable branches are simply not visited,
//! and nothing is ever an error here. Marking must never under-retain, so
//! ambiguity (absent membership markers, unbound condition variables)
//! resolves toward traversal.
//!
//! Cycles are bounded by visited-set membership, not by traversal depth:
//! revisiting a record with the same selections is a no-op.
use rustc_hash::FxHashSet;

use crate::args::{storage_key, Variables};
use crate::ident::DataId;
use crate::record::Record;
use crate::selection::{LinkedField, Selection, TypeCondition};
use crate::selector::{Selector, SelectorRoot};
use crate::source::{Lookup, RecordSource};
use crate::value::Value;

/// Computes the transitive closure of record ids reachable from the given
/// selectors.
pub fn mark_reachable<'a>(
    source: &RecordSource,
    selectors: impl IntoIterator<Item = &'a Selector>,
) -> FxHashSet<DataId> {
    let mut reachable = FxHashSet::default();
    for selector in selectors {
        let mut pass = MarkPass {
            source,
            variables: &selector.variables,
            reachable: &mut reachable,
            visited: FxHashSet::default(),
        };
        let roots: &[DataId] = match &selector.root {
            SelectorRoot::Singular(id) => std::slice::from_ref(id),
            SelectorRoot::Plural(ids) => ids,
        };
        for root in roots {
            pass.mark_record(root, &selector.selections);
        }
    }
    reachable
}

struct MarkPass<'a> {
    source: &'a RecordSource,
    variables: &'a Variables,
    reachable: &'a mut FxHashSet<DataId>,
    /// `(record, selection-set identity)` pairs already walked. Keying by
    /// selection set keeps cyclic graphs from re-walking the same work while
    /// still allowing a record to be visited again under a different
    /// selection set.
    visited: FxHashSet<(DataId, usize)>,
}

impl MarkPass<'_> {
    fn mark_record(&mut self, id: &DataId, selections: &[Selection]) {
        // Tombstones stay reachable so a retained deletion is not forgotten.
        self.reachable.insert(id.clone());
        if !self
            .visited
            .insert((id.clone(), selections.as_ptr() as usize))
        {
            return;
        }
        let Lookup::Present(record) = self.source.get(id) else {
            return;
        };
        self.mark_selections(record, selections);
    }

    fn mark_selections(&mut self, record: &Record, selections: &[Selection]) {
        for selection in selections {
            match selection {
                Selection::Scalar(_) | Selection::ModuleImport(_) => {}
                Selection::Linked(field) => self.mark_linked(record, field),
                Selection::Stream(stream) => self.mark_linked(record, &stream.field),
                Selection::InlineFragment(fragment) => {
                    let descend = match &fragment.type_condition {
                        TypeCondition::Concrete(name) => record.typename() == name.as_ref(),
                        // Membership unknown or asserted: walk it. Only an
                        // explicit negative marker prunes the branch.
                        TypeCondition::Abstract(_) => {
                            fragment.type_condition.marker_key().map_or(true, |marker| {
                                !matches!(
                                    record.get(&marker),
                                    Some(Value::Scalar(serde_json::Value::Bool(false)))
                                )
                            })
                        }
                    };
                    if descend {
                        self.mark_selections(record, &fragment.selections);
                    }
                }
                Selection::Condition(condition) => {
                    // An unbound or non-boolean variable retains
                    // conservatively.
                    let passes = match self.variables.get(&condition.variable) {
                        Some(serde_json::Value::Bool(value)) => *value == condition.passing_value,
                        _ => true,
                    };
                    if passes {
                        self.mark_selections(record, &condition.selections);
                    }
                }
                // Deferred data that has landed must survive GC whether or
                // not the marker arrived with it.
                Selection::Defer(fragment) => {
                    self.mark_selections(record, &fragment.selections);
                }
                Selection::Required(required) => {
                    self.mark_selections(record, std::slice::from_ref(&required.field));
                }
            }
        }
    }

    fn mark_linked(&mut self, record: &Record, field: &LinkedField) {
        let Ok(key) = storage_key(&field.name, &field.args, self.variables) else {
            // Unbound variables cannot name a stored field; nothing to walk.
            return;
        };
        match record.get(&key) {
            Some(Value::Ref(child)) => {
                let child = child.clone();
                self.mark_record(&child, &field.selections);
            }
            Some(Value::RefList(children)) => {
                let children: Vec<DataId> = children.iter().flatten().cloned().collect();
                for child in &children {
                    self.mark_record(child, &field.selections);
                }
            }
            _ => {}
        }
    }
}
