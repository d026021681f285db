// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reader: walks a selection tree over the record source and produces a
//! snapshot.
//!
//! The walk is synchronous and never preempted; traversal depth is bounded
//! by the selection tree, so cyclic record graphs need no cycle detection
//! here. Missing data is a normal tri-state outcome, not an error: absent
//! records and fields read as null and set the snapshot's missing flag.
use serde_json::Value as Json;
use thiserror::Error;

use crate::args::{storage_key, UnboundVariable, Variables};
use crate::constants::{MODULE_COMPONENT_PREFIX, MODULE_OPERATION_PREFIX};
use crate::data::{DataObject, DataValue};
use crate::ident::{DataId, FieldKey, StorageKey};
use crate::record::Record;
use crate::selection::{
    Condition, DeferFragment, InlineFragment, LinkedField, ModuleImport, RequiredAction,
    ScalarField, Selection, TypeCondition,
};
use crate::selector::{Selector, SelectorRoot};
use crate::snapshot::{DataError, SeenKeys, Snapshot};
use crate::source::{Lookup, RecordSource};
use crate::value::Value;

/// Change-tracking granularity for reads and notification.
///
/// Field-granular mode is the stricter, preferred semantics: seen and
/// touched sets carry exact `(record, field)` keys, so unrelated updates to
/// a shared record trigger no re-read at all. Coarse mode intersects
/// record ids only: a conservative superset that re-reads more but never
/// under-notifies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChangeGranularity {
    /// Track and intersect exact field keys (default).
    #[default]
    FieldGranular,
    /// Track and intersect record ids only.
    RecordCoarse,
}

/// Errors aborting a read.
///
/// These are invariant violations: a selector that disagrees with the
/// stored shape, or a required field failing with the `Throw` action. Plain
/// missing data never produces an error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReadError {
    /// A storage key or condition referenced an unbound variable.
    #[error(transparent)]
    UnboundVariable(#[from] UnboundVariable),
    /// A condition variable resolved to a non-boolean value.
    #[error("condition variable ${name} is not a boolean")]
    ConditionNotBoolean {
        /// Variable name.
        name: Box<str>,
    },
    /// A scalar selection hit a stored link.
    #[error("field {key} on {id} stores a {found}, expected a scalar")]
    ScalarExpected {
        /// Record owning the field.
        id: DataId,
        /// Storage key of the field.
        key: StorageKey,
        /// Stored value kind.
        found: &'static str,
    },
    /// A singular linked selection hit a non-link or a plural link.
    #[error("field {key} on {id} stores a {found}, expected a singular link")]
    SingularLinkExpected {
        /// Record owning the field.
        id: DataId,
        /// Storage key of the field.
        key: StorageKey,
        /// Stored value kind.
        found: &'static str,
    },
    /// A plural linked selection hit a non-link or a singular link.
    #[error("field {key} on {id} stores a {found}, expected a plural link")]
    PluralLinkExpected {
        /// Record owning the field.
        id: DataId,
        /// Storage key of the field.
        key: StorageKey,
        /// Stored value kind.
        found: &'static str,
    },
    /// A required field with the `Throw` action was null or missing, and no
    /// nullable ancestor absorbed the bubbled null before the root.
    #[error("required field {key} on {id} was null or missing")]
    RequiredField {
        /// Record owning the field.
        id: DataId,
        /// Storage key of the field.
        key: StorageKey,
    },
}

/// Reads `selector` against `source`, producing a snapshot stamped with
/// epoch zero (the owning store re-stamps).
pub fn read(
    source: &RecordSource,
    selector: &Selector,
    granularity: ChangeGranularity,
) -> Result<Snapshot, ReadError> {
    let mut pass = ReadPass {
        source,
        variables: &selector.variables,
        granularity,
        seen: SeenKeys::new(),
        errors: Vec::new(),
        is_missing_data: false,
    };

    let data = match &selector.root {
        SelectorRoot::Singular(id) => match pass.read_record(id, &selector.selections)? {
            RecordValue::Value(value) => value,
            RecordValue::Thrown => return Err(pass.thrown_error()),
        },
        SelectorRoot::Plural(ids) => {
            let mut items = Vec::with_capacity(ids.len());
            for id in ids {
                match pass.read_record(id, &selector.selections)? {
                    RecordValue::Value(value) => items.push(value),
                    RecordValue::Thrown => return Err(pass.thrown_error()),
                }
            }
            DataValue::list(items)
        }
    };

    Ok(Snapshot {
        selector: selector.clone(),
        data,
        is_missing_data: pass.is_missing_data,
        seen: pass.seen,
        errors: pass.errors,
        epoch: 0,
    })
}

/// Value produced for one record's selection set.
enum RecordValue {
    Value(DataValue),
    /// A required-throw failure bubbled past this record.
    Thrown,
}

/// Flow control for a selection-set walk.
enum Control {
    Continue,
    /// Null out the current object and keep bubbling through non-nullable
    /// parents.
    Thrown,
}

/// Outcome of reading one linked field.
enum LinkedOutcome {
    Present,
    Null,
    /// The field is non-nullable and its child was nulled by a
    /// required-throw failure; the enclosing object must null out too.
    Thrown,
}

struct ReadPass<'a> {
    source: &'a RecordSource,
    variables: &'a Variables,
    granularity: ChangeGranularity,
    seen: SeenKeys,
    errors: Vec<DataError>,
    is_missing_data: bool,
}

impl ReadPass<'_> {
    fn read_record(
        &mut self,
        id: &DataId,
        selections: &[Selection],
    ) -> Result<RecordValue, ReadError> {
        self.seen.records.insert(id.clone());
        match self.source.get(id) {
            Lookup::Unfetched => {
                self.is_missing_data = true;
                Ok(RecordValue::Value(DataValue::Null))
            }
            Lookup::Deleted => Ok(RecordValue::Value(DataValue::Null)),
            Lookup::Present(record) => {
                let mut object = DataObject::new();
                match self.read_selections(record, selections, &mut object)? {
                    Control::Continue => Ok(RecordValue::Value(DataValue::object(object))),
                    Control::Thrown => Ok(RecordValue::Thrown),
                }
            }
        }
    }

    fn read_selections(
        &mut self,
        record: &Record,
        selections: &[Selection],
        acc: &mut DataObject,
    ) -> Result<Control, ReadError> {
        for selection in selections {
            let control = match selection {
                Selection::Scalar(field) => {
                    self.read_scalar(record, field, acc)?;
                    Control::Continue
                }
                Selection::Linked(field) => match self.read_linked(record, field, acc)? {
                    LinkedOutcome::Thrown => Control::Thrown,
                    LinkedOutcome::Present | LinkedOutcome::Null => Control::Continue,
                },
                Selection::InlineFragment(fragment) => {
                    self.read_inline_fragment(record, fragment, acc)?
                }
                Selection::Condition(condition) => self.read_condition(record, condition, acc)?,
                Selection::Defer(fragment) => self.read_defer(record, fragment, acc)?,
                Selection::Stream(stream) => match self.read_linked(record, &stream.field, acc)? {
                    LinkedOutcome::Thrown => Control::Thrown,
                    LinkedOutcome::Present | LinkedOutcome::Null => Control::Continue,
                },
                Selection::ModuleImport(module) => {
                    self.read_module(record, module, acc);
                    Control::Continue
                }
                Selection::Required(required) => {
                    self.read_required(record, required.action, &required.field, acc)?
                }
            };
            if matches!(control, Control::Thrown) {
                return Ok(Control::Thrown);
            }
        }
        Ok(Control::Continue)
    }

    /// Returns `true` when the resulting value was null or missing.
    fn read_scalar(
        &mut self,
        record: &Record,
        field: &ScalarField,
        acc: &mut DataObject,
    ) -> Result<bool, ReadError> {
        let key = storage_key(&field.name, &field.args, self.variables)?;
        self.track(record, &key);
        let response_key: Box<str> = field.response_key().into();
        match record.get(&key) {
            None => {
                self.is_missing_data = true;
                acc.insert(response_key, DataValue::Null);
                Ok(true)
            }
            Some(Value::Scalar(Json::Null)) => {
                acc.insert(response_key, DataValue::Null);
                Ok(true)
            }
            Some(Value::Scalar(value)) => {
                acc.insert(response_key, DataValue::Scalar(value.clone()));
                Ok(false)
            }
            Some(Value::Object(map)) => {
                acc.insert(response_key, DataValue::Scalar(Json::Object(map.clone())));
                Ok(false)
            }
            Some(other) => Err(ReadError::ScalarExpected {
                id: record.id().clone(),
                key,
                found: other.kind(),
            }),
        }
    }

    fn read_linked(
        &mut self,
        record: &Record,
        field: &LinkedField,
        acc: &mut DataObject,
    ) -> Result<LinkedOutcome, ReadError> {
        let key = storage_key(&field.name, &field.args, self.variables)?;
        self.track(record, &key);
        let response_key: Box<str> = field.response_key().into();
        let stored = record.get(&key);
        if field.plural {
            match stored {
                None => {
                    self.is_missing_data = true;
                    acc.insert(response_key, DataValue::Null);
                    Ok(LinkedOutcome::Null)
                }
                Some(Value::Scalar(Json::Null)) => {
                    acc.insert(response_key, DataValue::Null);
                    Ok(LinkedOutcome::Null)
                }
                Some(Value::RefList(ids)) => {
                    let mut items = Vec::with_capacity(ids.len());
                    for entry in ids {
                        match entry {
                            None => items.push(DataValue::Null),
                            Some(child) => match self.read_record(child, &field.selections)? {
                                RecordValue::Value(value) => items.push(value),
                                RecordValue::Thrown => {
                                    if field.nullable {
                                        items.push(DataValue::Null);
                                    } else {
                                        return Ok(LinkedOutcome::Thrown);
                                    }
                                }
                            },
                        }
                    }
                    acc.insert(response_key, DataValue::list(items));
                    Ok(LinkedOutcome::Present)
                }
                Some(other) => Err(ReadError::PluralLinkExpected {
                    id: record.id().clone(),
                    key,
                    found: other.kind(),
                }),
            }
        } else {
            match stored {
                None => {
                    self.is_missing_data = true;
                    acc.insert(response_key, DataValue::Null);
                    Ok(LinkedOutcome::Null)
                }
                Some(Value::Scalar(Json::Null)) => {
                    acc.insert(response_key, DataValue::Null);
                    Ok(LinkedOutcome::Null)
                }
                Some(Value::Ref(child)) => {
                    let child = child.clone();
                    match self.read_record(&child, &field.selections)? {
                        RecordValue::Value(DataValue::Null) => {
                            acc.insert(response_key, DataValue::Null);
                            Ok(LinkedOutcome::Null)
                        }
                        RecordValue::Value(value) => {
                            acc.insert(response_key, value);
                            Ok(LinkedOutcome::Present)
                        }
                        RecordValue::Thrown => {
                            if field.nullable {
                                acc.insert(response_key, DataValue::Null);
                                Ok(LinkedOutcome::Null)
                            } else {
                                Ok(LinkedOutcome::Thrown)
                            }
                        }
                    }
                }
                Some(other) => Err(ReadError::SingularLinkExpected {
                    id: record.id().clone(),
                    key,
                    found: other.kind(),
                }),
            }
        }
    }

    fn read_inline_fragment(
        &mut self,
        record: &Record,
        fragment: &InlineFragment,
        acc: &mut DataObject,
    ) -> Result<Control, ReadError> {
        let matches = match (&fragment.type_condition, fragment.type_condition.marker_key()) {
            (TypeCondition::Concrete(name), _) => record.typename() == name.as_ref(),
            // Membership markers are synthesized at normalization time; an
            // absent marker means we cannot know yet.
            (TypeCondition::Abstract(_), Some(marker)) => {
                self.track(record, &marker);
                match record.get(&marker) {
                    None => {
                        self.is_missing_data = true;
                        false
                    }
                    Some(Value::Scalar(value)) => {
                        !matches!(value, Json::Null | Json::Bool(false))
                    }
                    Some(_) => false,
                }
            }
            (TypeCondition::Abstract(_), None) => false,
        };
        if matches {
            self.read_selections(record, &fragment.selections, acc)
        } else {
            Ok(Control::Continue)
        }
    }

    fn read_condition(
        &mut self,
        record: &Record,
        condition: &Condition,
        acc: &mut DataObject,
    ) -> Result<Control, ReadError> {
        let value = self.variables.resolve(&condition.variable)?;
        let Json::Bool(value) = value else {
            return Err(ReadError::ConditionNotBoolean {
                name: condition.variable.clone(),
            });
        };
        if *value == condition.passing_value {
            self.read_selections(record, &condition.selections, acc)
        } else {
            Ok(Control::Continue)
        }
    }

    fn read_defer(
        &mut self,
        record: &Record,
        fragment: &DeferFragment,
        acc: &mut DataObject,
    ) -> Result<Control, ReadError> {
        let marker = fragment.marker_key();
        self.track(record, &marker);
        let present = matches!(
            record.get(&marker),
            Some(Value::Scalar(value)) if !matches!(value, Json::Null | Json::Bool(false))
        );
        if present {
            self.read_selections(record, &fragment.selections, acc)
        } else {
            // The deferred part has not arrived; its fields are not yet
            // fetched, which is missing data rather than an error.
            self.is_missing_data = true;
            Ok(Control::Continue)
        }
    }

    fn read_module(&mut self, record: &Record, module: &ModuleImport, acc: &mut DataObject) {
        let component = StorageKey::new(format!(
            "{MODULE_COMPONENT_PREFIX}{}",
            module.document_name
        ));
        let operation = StorageKey::new(format!(
            "{MODULE_OPERATION_PREFIX}{}",
            module.document_name
        ));
        self.track(record, &component);
        self.track(record, &operation);
        // Absence means the server chose a different branch; that is not
        // missing data.
        for key in [component, operation] {
            if let Some(Value::Scalar(value)) = record.get(&key) {
                acc.insert(key.as_str().into(), DataValue::Scalar(value.clone()));
            }
        }
    }

    fn read_required(
        &mut self,
        record: &Record,
        action: RequiredAction,
        inner: &Selection,
        acc: &mut DataObject,
    ) -> Result<Control, ReadError> {
        let (was_null, key) = match inner {
            Selection::Scalar(field) => {
                let key = storage_key(&field.name, &field.args, self.variables)?;
                (self.read_scalar(record, field, acc)?, key)
            }
            Selection::Linked(field) => {
                let key = storage_key(&field.name, &field.args, self.variables)?;
                match self.read_linked(record, field, acc)? {
                    LinkedOutcome::Thrown => return Ok(Control::Thrown),
                    LinkedOutcome::Null => (true, key),
                    LinkedOutcome::Present => (false, key),
                }
            }
            // Required wraps field selections; anything else reads plainly.
            other => {
                return self.read_selections(record, std::slice::from_ref(other), acc);
            }
        };
        if !was_null {
            return Ok(Control::Continue);
        }
        self.errors.push(DataError::MissingRequired {
            owner: record.id().clone(),
            key,
            action,
        });
        match action {
            RequiredAction::Log => Ok(Control::Continue),
            RequiredAction::Throw => Ok(Control::Thrown),
        }
    }

    fn track(&mut self, record: &Record, key: &StorageKey) {
        if matches!(self.granularity, ChangeGranularity::FieldGranular) {
            self.seen
                .fields
                .insert(FieldKey::new(record.id().clone(), key.clone()));
        }
        for error in record.field_errors(key) {
            let entry = DataError::Field {
                owner: record.id().clone(),
                key: key.clone(),
                message: error.message.clone(),
            };
            if !self.errors.contains(&entry) {
                self.errors.push(entry);
            }
        }
    }

    /// Builds the error reported when a required-throw failure escapes the
    /// selector root.
    fn thrown_error(&self) -> ReadError {
        for error in self.errors.iter().rev() {
            if let DataError::MissingRequired {
                owner,
                key,
                action: RequiredAction::Throw,
            } = error
            {
                return ReadError::RequiredField {
                    id: owner.clone(),
                    key: key.clone(),
                };
            }
        }
        ReadError::RequiredField {
            id: DataId::root(),
            key: StorageKey::from(""),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldError;
    use serde_json::json;
    use std::sync::Arc;

    fn source_with_user() -> RecordSource {
        let mut root = Record::new(DataId::root(), crate::constants::ROOT_TYPE);
        root.set(StorageKey::from("me"), Value::Ref(DataId::from("4")));
        let mut user = Record::new(DataId::from("4"), "User");
        user.set(StorageKey::from("name"), Value::Scalar(json!("Zuck")));
        let mut source = RecordSource::new();
        source.set(root);
        source.set(user);
        source
    }

    fn me_name_selector() -> Selector {
        Selector::operation(
            Arc::from([Selection::Linked(LinkedField::singular(
                "me",
                [Selection::Scalar(ScalarField::plain("name"))],
            ))]),
            Variables::new(),
        )
    }

    #[test]
    fn reads_linked_scalars() {
        let source = source_with_user();
        let snapshot = read(&source, &me_name_selector(), ChangeGranularity::FieldGranular)
            .expect("read succeeds");
        assert!(!snapshot.is_missing_data);
        let DataValue::Object(root) = &snapshot.data else {
            panic!("expected object data");
        };
        let DataValue::Object(me) = &root["me"] else {
            panic!("expected me object");
        };
        assert_eq!(me["name"], DataValue::Scalar(json!("Zuck")));
    }

    #[test]
    fn tracks_seen_records_and_fields() {
        let source = source_with_user();
        let snapshot = read(&source, &me_name_selector(), ChangeGranularity::FieldGranular)
            .expect("read succeeds");
        assert!(snapshot.seen.records.contains(&DataId::root()));
        assert!(snapshot.seen.records.contains(&DataId::from("4")));
        assert!(snapshot.seen.fields.contains(&FieldKey::new(
            DataId::root(),
            StorageKey::from("me")
        )));
        assert!(snapshot.seen.fields.contains(&FieldKey::new(
            DataId::from("4"),
            StorageKey::from("name")
        )));
    }

    #[test]
    fn coarse_mode_skips_field_keys() {
        let source = source_with_user();
        let snapshot = read(&source, &me_name_selector(), ChangeGranularity::RecordCoarse)
            .expect("read succeeds");
        assert!(snapshot.seen.fields.is_empty());
        assert!(!snapshot.seen.records.is_empty());
    }

    #[test]
    fn unfetched_record_reads_null_and_missing() {
        let mut root = Record::new(DataId::root(), crate::constants::ROOT_TYPE);
        root.set(StorageKey::from("me"), Value::Ref(DataId::from("4")));
        let mut source = RecordSource::new();
        source.set(root);

        let snapshot = read(&source, &me_name_selector(), ChangeGranularity::FieldGranular)
            .expect("read succeeds");
        assert!(snapshot.is_missing_data);
        let DataValue::Object(data) = &snapshot.data else {
            panic!("expected object data");
        };
        assert_eq!(data["me"], DataValue::Null);
        assert!(snapshot.seen.records.contains(&DataId::from("4")));
    }

    #[test]
    fn tombstoned_record_reads_null_without_missing() {
        let mut root = Record::new(DataId::root(), crate::constants::ROOT_TYPE);
        root.set(StorageKey::from("me"), Value::Ref(DataId::from("4")));
        let mut source = RecordSource::new();
        source.set(root);
        source.delete(DataId::from("4"));

        let snapshot = read(&source, &me_name_selector(), ChangeGranularity::FieldGranular)
            .expect("read succeeds");
        assert!(!snapshot.is_missing_data);
        let DataValue::Object(data) = &snapshot.data else {
            panic!("expected object data");
        };
        assert_eq!(data["me"], DataValue::Null);
    }

    #[test]
    fn plural_links_preserve_position_and_nulls() {
        let mut root = Record::new(DataId::root(), crate::constants::ROOT_TYPE);
        root.set(
            StorageKey::from("nodes"),
            Value::RefList(vec![Some(DataId::from("1")), None, Some(DataId::from("2"))]),
        );
        let mut a = Record::new(DataId::from("1"), "User");
        a.set(StorageKey::from("name"), Value::Scalar(json!("Alice")));
        let mut b = Record::new(DataId::from("2"), "User");
        b.set(StorageKey::from("name"), Value::Scalar(json!("Bob")));
        let mut source = RecordSource::new();
        source.set(root);
        source.set(a);
        source.set(b);

        let selector = Selector::operation(
            Arc::from([Selection::Linked(LinkedField::plural(
                "nodes",
                [Selection::Scalar(ScalarField::plain("name"))],
            ))]),
            Variables::new(),
        );
        let snapshot =
            read(&source, &selector, ChangeGranularity::FieldGranular).expect("read succeeds");
        let DataValue::Object(data) = &snapshot.data else {
            panic!("expected object data");
        };
        let DataValue::List(items) = &data["nodes"] else {
            panic!("expected list");
        };
        assert_eq!(items.len(), 3);
        assert_eq!(items[1], DataValue::Null);
    }

    #[test]
    fn singular_selection_on_plural_storage_is_fatal() {
        let mut root = Record::new(DataId::root(), crate::constants::ROOT_TYPE);
        root.set(
            StorageKey::from("me"),
            Value::RefList(vec![Some(DataId::from("4"))]),
        );
        let mut source = RecordSource::new();
        source.set(root);

        let result = read(&source, &me_name_selector(), ChangeGranularity::FieldGranular);
        assert!(matches!(
            result,
            Err(ReadError::SingularLinkExpected { .. })
        ));
    }

    #[test]
    fn concrete_fragment_mismatch_skips_without_missing() {
        let mut root = Record::new(DataId::root(), crate::constants::ROOT_TYPE);
        root.set(StorageKey::from("me"), Value::Ref(DataId::from("4")));
        let mut user = Record::new(DataId::from("4"), "User");
        user.set(StorageKey::from("name"), Value::Scalar(json!("Zuck")));
        let mut source = RecordSource::new();
        source.set(root);
        source.set(user);

        let selector = Selector::operation(
            Arc::from([Selection::Linked(LinkedField::singular(
                "me",
                [Selection::InlineFragment(InlineFragment {
                    type_condition: TypeCondition::Concrete("Page".into()),
                    selections: Arc::from([Selection::Scalar(ScalarField::plain("likers"))]),
                })]),
            )]),
            Variables::new(),
        );
        let snapshot =
            read(&source, &selector, ChangeGranularity::FieldGranular).expect("read succeeds");
        assert!(!snapshot.is_missing_data);
        let DataValue::Object(data) = &snapshot.data else {
            panic!("expected object data");
        };
        let DataValue::Object(me) = &data["me"] else {
            panic!("expected me object");
        };
        assert!(me.is_empty());
    }

    #[test]
    fn absent_abstract_marker_is_missing_data() {
        let mut root = Record::new(DataId::root(), crate::constants::ROOT_TYPE);
        root.set(StorageKey::from("me"), Value::Ref(DataId::from("4")));
        let user = Record::new(DataId::from("4"), "User");
        let mut source = RecordSource::new();
        source.set(root);
        source.set(user);

        let selector = Selector::operation(
            Arc::from([Selection::Linked(LinkedField::singular(
                "me",
                [Selection::InlineFragment(InlineFragment {
                    type_condition: TypeCondition::Abstract("Actor".into()),
                    selections: Arc::from([Selection::Scalar(ScalarField::plain("name"))]),
                })]),
            )]),
            Variables::new(),
        );
        let snapshot =
            read(&source, &selector, ChangeGranularity::FieldGranular).expect("read succeeds");
        assert!(snapshot.is_missing_data);
    }

    #[test]
    fn field_errors_surface_on_the_snapshot() {
        let mut root = Record::new(DataId::root(), crate::constants::ROOT_TYPE);
        root.set(StorageKey::from("me"), Value::Scalar(Json::Null));
        root.set_field_errors(
            StorageKey::from("me"),
            vec![FieldError::new("Could not fetch me")],
        );
        let mut source = RecordSource::new();
        source.set(root);

        let snapshot = read(&source, &me_name_selector(), ChangeGranularity::FieldGranular)
            .expect("read succeeds");
        assert_eq!(
            snapshot.errors,
            vec![DataError::Field {
                owner: DataId::root(),
                key: StorageKey::from("me"),
                message: "Could not fetch me".into(),
            }]
        );
    }

    #[test]
    fn required_throw_bubbles_to_nullable_ancestor() {
        // me (nullable) -> bestFriend (non-null) -> name @required(THROW)
        let mut root = Record::new(DataId::root(), crate::constants::ROOT_TYPE);
        root.set(StorageKey::from("me"), Value::Ref(DataId::from("4")));
        let mut user = Record::new(DataId::from("4"), "User");
        user.set(StorageKey::from("bestFriend"), Value::Ref(DataId::from("5")));
        let mut friend = Record::new(DataId::from("5"), "User");
        friend.set(StorageKey::from("name"), Value::Scalar(Json::Null));
        let mut source = RecordSource::new();
        source.set(root);
        source.set(user);
        source.set(friend);

        let selector = Selector::operation(
            Arc::from([Selection::Linked(LinkedField::singular(
                "me",
                [Selection::Linked(
                    LinkedField::singular(
                        "bestFriend",
                        [Selection::Required(crate::selection::RequiredField {
                            field: Box::new(Selection::Scalar(ScalarField::plain("name"))),
                            action: RequiredAction::Throw,
                        })],
                    )
                    .non_null(),
                )],
            ))]),
            Variables::new(),
        );
        let snapshot =
            read(&source, &selector, ChangeGranularity::FieldGranular).expect("read succeeds");
        // bestFriend is non-nullable, so the null bubbles past it and the
        // nullable `me` absorbs it.
        let DataValue::Object(data) = &snapshot.data else {
            panic!("expected object data");
        };
        assert_eq!(data["me"], DataValue::Null);
        assert!(snapshot
            .errors
            .iter()
            .any(|e| matches!(e, DataError::MissingRequired { .. })));
    }

    #[test]
    fn required_throw_at_root_fails_the_read() {
        let mut root = Record::new(DataId::root(), crate::constants::ROOT_TYPE);
        root.set(StorageKey::from("viewer"), Value::Scalar(Json::Null));
        let mut source = RecordSource::new();
        source.set(root);

        let selector = Selector::operation(
            Arc::from([Selection::Required(crate::selection::RequiredField {
                field: Box::new(Selection::Linked(LinkedField::singular(
                    "viewer",
                    [Selection::Scalar(ScalarField::plain("name"))],
                ))),
                action: RequiredAction::Throw,
            })]),
            Variables::new(),
        );
        let result = read(&source, &selector, ChangeGranularity::FieldGranular);
        assert!(matches!(result, Err(ReadError::RequiredField { .. })));
    }

    #[test]
    fn required_log_keeps_data_and_records_the_failure() {
        let mut root = Record::new(DataId::root(), crate::constants::ROOT_TYPE);
        root.set(StorageKey::from("me"), Value::Ref(DataId::from("4")));
        let mut user = Record::new(DataId::from("4"), "User");
        user.set(StorageKey::from("name"), Value::Scalar(Json::Null));
        let mut source = RecordSource::new();
        source.set(root);
        source.set(user);

        let selector = Selector::operation(
            Arc::from([Selection::Linked(LinkedField::singular(
                "me",
                [Selection::Required(crate::selection::RequiredField {
                    field: Box::new(Selection::Scalar(ScalarField::plain("name"))),
                    action: RequiredAction::Log,
                })],
            ))]),
            Variables::new(),
        );
        let snapshot =
            read(&source, &selector, ChangeGranularity::FieldGranular).expect("read succeeds");
        let DataValue::Object(data) = &snapshot.data else {
            panic!("expected object data");
        };
        let DataValue::Object(me) = &data["me"] else {
            panic!("expected me object");
        };
        assert_eq!(me["name"], DataValue::Null);
        assert_eq!(
            snapshot.errors,
            vec![DataError::MissingRequired {
                owner: DataId::from("4"),
                key: StorageKey::from("name"),
                action: RequiredAction::Log,
            }]
        );
    }

    #[test]
    fn condition_gates_on_boolean_variables() {
        let source = source_with_user();
        let selections: Arc<[Selection]> = Arc::from([Selection::Condition(Condition {
            variable: "withMe".into(),
            passing_value: true,
            selections: Arc::from([Selection::Linked(LinkedField::singular(
                "me",
                [Selection::Scalar(ScalarField::plain("name"))],
            ))]),
        })]);

        let on = Selector::operation(
            Arc::clone(&selections),
            Variables::new().with("withMe", true),
        );
        let snapshot =
            read(&source, &on, ChangeGranularity::FieldGranular).expect("read succeeds");
        let DataValue::Object(data) = &snapshot.data else {
            panic!("expected object data");
        };
        assert!(data.contains_key("me"));

        let off = Selector::operation(
            Arc::clone(&selections),
            Variables::new().with("withMe", false),
        );
        let snapshot =
            read(&source, &off, ChangeGranularity::FieldGranular).expect("read succeeds");
        let DataValue::Object(data) = &snapshot.data else {
            panic!("expected object data");
        };
        assert!(data.is_empty());
        assert!(!snapshot.is_missing_data);

        let unbound = Selector::operation(selections, Variables::new());
        assert!(matches!(
            read(&source, &unbound, ChangeGranularity::FieldGranular),
            Err(ReadError::UnboundVariable(_))
        ));
    }

    #[test]
    fn defer_without_marker_is_missing_not_error() {
        let source = source_with_user();
        let selector = Selector::operation(
            Arc::from([Selection::Linked(LinkedField::singular(
                "me",
                [Selection::Defer(DeferFragment {
                    label: "extra".into(),
                    selections: Arc::from([Selection::Scalar(ScalarField::plain("bio"))]),
                })]),
            )]),
            Variables::new(),
        );
        let snapshot =
            read(&source, &selector, ChangeGranularity::FieldGranular).expect("read succeeds");
        assert!(snapshot.is_missing_data);
        let DataValue::Object(data) = &snapshot.data else {
            panic!("expected object data");
        };
        let DataValue::Object(me) = &data["me"] else {
            panic!("expected me object");
        };
        assert!(!me.contains_key("bio"));
    }
}
