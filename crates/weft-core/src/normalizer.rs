// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Normalizer: flattens tree-shaped response payloads into record overlays.
//!
//! Payload and selection tree are walked in lockstep. Every object is
//! assigned an id (server identity via the configurable policy, or a stable
//! path-derived client id) and written as a flat record into an overlay
//! sink. The sink is all-or-nothing per payload part: a failing part is
//! discarded without touching committed state.
//!
//! Deferred and streamed selections are not descended on the initial pass;
//! they produce placeholders the transport layer hands back together with
//! each incremental part.
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::{Map as JsonMap, Value as Json};
use thiserror::Error;

use crate::args::{storage_key, UnboundVariable, Variables};
use crate::constants::{
    ID_FIELD, MODULE_COMPONENT_PREFIX, MODULE_OPERATION_PREFIX, PART_MARKER_PREFIX, ROOT_TYPE,
    TYPENAME_FIELD, VIEWER_TYPE,
};
use crate::ident::{DataId, StorageKey};
use crate::record::{FieldError, Record};
use crate::selection::{
    Condition, DeferFragment, InlineFragment, LinkedField, ModuleImport, ScalarField, Selection,
    StreamField, TypeCondition,
};
use crate::selector::{Selector, SelectorRoot};
use crate::source::{Lookup, OverlaySource, RecordSource};
use crate::value::Value;

/// Identity-extraction policy: derives a record id from a payload object and
/// its type name. Returning `None` falls back to a path-derived client id.
pub type IdPolicy = fn(&JsonMap<String, Json>, &str) -> Option<DataId>;

/// Default identity policy: the payload's `id` field, with the viewer
/// singleton falling back to its reserved id when no `id` is present.
#[must_use]
pub fn default_id_policy(object: &JsonMap<String, Json>, typename: &str) -> Option<DataId> {
    match object.get(ID_FIELD) {
        Some(Json::String(id)) => Some(DataId::from(id.as_str())),
        Some(Json::Number(id)) => Some(DataId::from(id.to_string())),
        _ if typename == VIEWER_TYPE => Some(DataId::viewer()),
        _ => None,
    }
}

/// Options controlling a normalization pass.
#[derive(Clone, Copy, Debug)]
pub struct NormalizeOptions {
    /// Identity-extraction policy.
    pub id_policy: IdPolicy,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            id_policy: default_id_policy,
        }
    }
}

/// One step of a response path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Object member by response key.
    Key(Box<str>),
    /// List entry by position.
    Index(usize),
}

impl PathSegment {
    /// Object-member segment.
    #[must_use]
    pub fn key(key: impl Into<Box<str>>) -> Self {
        Self::Key(key.into())
    }

    /// List-entry segment.
    #[must_use]
    pub fn index(index: usize) -> Self {
        Self::Index(index)
    }
}

/// Server-reported error scoped to a response path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayloadError {
    /// Error message.
    pub message: Box<str>,
    /// Response path of the errored field.
    pub path: Vec<PathSegment>,
}

impl PayloadError {
    /// Creates an error at the given path.
    #[must_use]
    pub fn new(message: impl Into<Box<str>>, path: Vec<PathSegment>) -> Self {
        Self {
            message: message.into(),
            path,
        }
    }
}

/// Placeholder for a deferred fragment's pending incremental part.
#[derive(Clone, Debug)]
pub struct DeferPlaceholder {
    /// Wire label of the part.
    pub label: Box<str>,
    /// Record the part's fields merge into.
    pub id: DataId,
    /// Selections the part delivers.
    pub selections: Arc<[Selection]>,
}

/// Placeholder for a streamed field's pending incremental items.
#[derive(Clone, Debug)]
pub struct StreamPlaceholder {
    /// Wire label of the part.
    pub label: Box<str>,
    /// Record owning the streamed list.
    pub id: DataId,
    /// Storage key of the streamed list field.
    pub key: StorageKey,
    /// The underlying plural field items normalize through.
    pub field: LinkedField,
}

/// Pending incremental work discovered during normalization.
#[derive(Clone, Debug)]
pub enum IncrementalPlaceholder {
    /// A deferred fragment awaits its part.
    Defer(DeferPlaceholder),
    /// A streamed list awaits items.
    Stream(StreamPlaceholder),
}

/// Dynamic module reference discovered during normalization, requiring a
/// follow-up artifact fetch by the boundary layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModulePointer {
    /// Record the module keys were written on.
    pub id: DataId,
    /// Document name scoping the reserved keys.
    pub document_name: Box<str>,
    /// Fragment the module renders.
    pub fragment_name: Box<str>,
}

/// Output of one normalization pass: the overlay sink to publish plus any
/// discovered follow-up pointers.
#[derive(Debug, Default)]
pub struct NormalizedPart {
    /// Flattened records, ready for an atomic publish.
    pub sink: RecordSource,
    /// Deferred/streamed selections awaiting incremental parts.
    pub placeholders: Vec<IncrementalPlaceholder>,
    /// Module imports needing follow-up fetches.
    pub module_imports: Vec<ModulePointer>,
}

/// Errors failing a normalization pass.
///
/// Any of these rejects the entire payload part; nothing from a failing part
/// reaches the canonical source.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizeError {
    /// A storage key or condition referenced an unbound variable.
    #[error(transparent)]
    UnboundVariable(#[from] UnboundVariable),
    /// A condition variable resolved to a non-boolean value.
    #[error("condition variable ${name} is not a boolean")]
    ConditionNotBoolean {
        /// Variable name.
        name: Box<str>,
    },
    /// A linked field's payload was neither null nor an object.
    #[error("payload for {key} on {id} must be an object or null")]
    ObjectExpected {
        /// Record owning the field.
        id: DataId,
        /// Storage key of the field.
        key: StorageKey,
    },
    /// A plural linked field's payload was neither null nor an array.
    #[error("payload for {key} on {id} must be an array or null")]
    ArrayExpected {
        /// Record owning the field.
        id: DataId,
        /// Storage key of the field.
        key: StorageKey,
    },
    /// A linked payload object had no usable type name.
    #[error("payload object for {key} on {id} carries no __typename")]
    MissingTypename {
        /// Record owning the field.
        id: DataId,
        /// Storage key of the field.
        key: StorageKey,
    },
    /// The identity field of an existing record was contradicted.
    #[error("conflicting identity for record {id}: {existing} vs {incoming}")]
    ConflictingIds {
        /// Record id under merge.
        id: DataId,
        /// Stored identity value.
        existing: Json,
        /// Incoming identity value.
        incoming: Json,
    },
    /// An incremental part addressed a record that no longer exists.
    #[error("incremental part references missing record {id}")]
    MissingParent {
        /// The missing record.
        id: DataId,
    },
    /// Normalization requires a singular selector root.
    #[error("cannot normalize into a plural selector root")]
    PluralRoot,
    /// The top-level payload was not an object.
    #[error("response payload must be an object")]
    PayloadShape,
}

/// Normalizes a complete (non-incremental) response payload for `selector`
/// into an overlay sink over `base`.
pub fn normalize_response(
    base: &RecordSource,
    selector: &Selector,
    payload: &Json,
    errors: &[PayloadError],
    options: &NormalizeOptions,
) -> Result<NormalizedPart, NormalizeError> {
    let SelectorRoot::Singular(root_id) = &selector.root else {
        return Err(NormalizeError::PluralRoot);
    };
    let Json::Object(object) = payload else {
        return Err(NormalizeError::PayloadShape);
    };

    let mut pass = NormalizePass::new(base, &selector.variables, options, errors);
    let root_typename = match base.get(root_id) {
        Lookup::Present(record) => record.typename().to_owned(),
        Lookup::Deleted | Lookup::Unfetched => ROOT_TYPE.to_owned(),
    };
    pass.ensure_record(root_id, &root_typename);
    pass.normalize_selections(root_id, &root_typename, object, &selector.selections)?;
    Ok(pass.finish())
}

/// Normalizes a deferred part into its parent record and writes the presence
/// marker that lets the reader see the fragment as fetched.
pub fn normalize_deferred(
    base: &RecordSource,
    placeholder: &DeferPlaceholder,
    payload: &Json,
    errors: &[PayloadError],
    variables: &Variables,
    options: &NormalizeOptions,
) -> Result<NormalizedPart, NormalizeError> {
    let Json::Object(object) = payload else {
        return Err(NormalizeError::PayloadShape);
    };
    let Lookup::Present(parent) = base.get(&placeholder.id) else {
        return Err(NormalizeError::MissingParent {
            id: placeholder.id.clone(),
        });
    };
    let typename = parent.typename().to_owned();

    let mut pass = NormalizePass::new(base, variables, options, errors);
    pass.ensure_record(&placeholder.id, &typename);
    pass.normalize_selections(&placeholder.id, &typename, object, &placeholder.selections)?;
    let marker = StorageKey::new(format!("{PART_MARKER_PREFIX}{}", placeholder.label));
    pass.set_field(&placeholder.id, marker, Value::Scalar(Json::Bool(true)))?;
    Ok(pass.finish())
}

/// Normalizes one streamed list item at `index`, extending the parent's
/// stored reference list positionally rather than overwriting it.
pub fn normalize_stream_item(
    base: &RecordSource,
    placeholder: &StreamPlaceholder,
    index: usize,
    payload: &Json,
    errors: &[PayloadError],
    variables: &Variables,
    options: &NormalizeOptions,
) -> Result<NormalizedPart, NormalizeError> {
    if base.get(&placeholder.id).record().is_none() {
        return Err(NormalizeError::MissingParent {
            id: placeholder.id.clone(),
        });
    }

    let mut pass = NormalizePass::new(base, variables, options, errors);
    let entry = match payload {
        Json::Null => None,
        Json::Object(object) => {
            let child = pass.normalize_linked_object(
                &placeholder.id,
                &placeholder.key,
                &placeholder.field,
                object,
                Some(index),
            )?;
            Some(child)
        }
        _ => {
            return Err(NormalizeError::ObjectExpected {
                id: placeholder.id.clone(),
                key: placeholder.key.clone(),
            })
        }
    };

    let mut refs = match pass.overlay.get(&placeholder.id) {
        Lookup::Present(record) => match record.get(&placeholder.key) {
            Some(Value::RefList(ids)) => ids.clone(),
            _ => Vec::new(),
        },
        Lookup::Deleted | Lookup::Unfetched => {
            return Err(NormalizeError::MissingParent {
                id: placeholder.id.clone(),
            })
        }
    };
    while refs.len() <= index {
        refs.push(None);
    }
    refs[index] = entry;
    pass.set_field(&placeholder.id, placeholder.key.clone(), Value::RefList(refs))?;
    Ok(pass.finish())
}

struct NormalizePass<'a> {
    overlay: OverlaySource<'a>,
    variables: &'a Variables,
    options: &'a NormalizeOptions,
    errors: FxHashMap<Vec<PathSegment>, Vec<FieldError>>,
    path: Vec<PathSegment>,
    placeholders: Vec<IncrementalPlaceholder>,
    module_imports: Vec<ModulePointer>,
}

impl<'a> NormalizePass<'a> {
    fn new(
        base: &'a RecordSource,
        variables: &'a Variables,
        options: &'a NormalizeOptions,
        errors: &[PayloadError],
    ) -> Self {
        let mut by_path: FxHashMap<Vec<PathSegment>, Vec<FieldError>> = FxHashMap::default();
        for error in errors {
            by_path
                .entry(error.path.clone())
                .or_default()
                .push(FieldError::new(error.message.clone()));
        }
        Self {
            overlay: OverlaySource::new(base),
            variables,
            options,
            errors: by_path,
            path: Vec::new(),
            placeholders: Vec::new(),
            module_imports: Vec::new(),
        }
    }

    fn finish(self) -> NormalizedPart {
        NormalizedPart {
            sink: self.overlay.into_sink(),
            placeholders: self.placeholders,
            module_imports: self.module_imports,
        }
    }

    /// Makes sure a record for `id` exists in the sink, creating or
    /// copy-on-writing as needed, and reconciling the stored type name.
    fn ensure_record(&mut self, id: &DataId, typename: &str) {
        match self.overlay.get(id) {
            Lookup::Present(record) => {
                if record.typename() != typename {
                    if let Some(record) = self.overlay.get_mut(id) {
                        record.set_typename(typename);
                    }
                }
            }
            Lookup::Deleted | Lookup::Unfetched => {
                self.overlay.set(Record::new(id.clone(), typename));
            }
        }
    }

    fn normalize_selections(
        &mut self,
        id: &DataId,
        typename: &str,
        payload: &JsonMap<String, Json>,
        selections: &[Selection],
    ) -> Result<(), NormalizeError> {
        for selection in selections {
            match selection {
                Selection::Scalar(field) => self.normalize_scalar(id, field, payload)?,
                Selection::Linked(field) => self.normalize_linked(id, field, payload)?,
                Selection::InlineFragment(fragment) => {
                    self.normalize_inline_fragment(id, typename, fragment, payload)?;
                }
                Selection::Condition(condition) => {
                    self.normalize_condition(id, typename, condition, payload)?;
                }
                Selection::Defer(fragment) => self.defer_placeholder(id, fragment),
                Selection::Stream(stream) => self.normalize_stream(id, stream, payload)?,
                Selection::ModuleImport(module) => self.normalize_module(id, module, payload)?,
                Selection::Required(required) => {
                    // Required-ness is a read-time policy; normalize the
                    // wrapped field plainly.
                    self.normalize_selections(
                        id,
                        typename,
                        payload,
                        std::slice::from_ref(&required.field),
                    )?;
                }
            }
        }
        Ok(())
    }

    fn normalize_scalar(
        &mut self,
        id: &DataId,
        field: &ScalarField,
        payload: &JsonMap<String, Json>,
    ) -> Result<(), NormalizeError> {
        let response_key = field.response_key();
        let Some(value) = payload.get(response_key) else {
            return Ok(());
        };
        let key = storage_key(&field.name, &field.args, self.variables)?;
        let stored = match value {
            Json::Object(map) => Value::Object(map.clone()),
            other => Value::Scalar(other.clone()),
        };
        self.set_field(id, key.clone(), stored)?;
        self.attach_errors(id, &key, response_key);
        Ok(())
    }

    fn normalize_linked(
        &mut self,
        id: &DataId,
        field: &LinkedField,
        payload: &JsonMap<String, Json>,
    ) -> Result<(), NormalizeError> {
        let response_key = field.response_key();
        let Some(value) = payload.get(response_key) else {
            return Ok(());
        };
        let key = storage_key(&field.name, &field.args, self.variables)?;
        if field.plural {
            match value {
                Json::Null => {
                    self.set_field(id, key.clone(), Value::Scalar(Json::Null))?;
                }
                Json::Array(items) => {
                    let mut refs = Vec::with_capacity(items.len());
                    self.path.push(PathSegment::key(response_key));
                    for (index, item) in items.iter().enumerate() {
                        match item {
                            Json::Null => refs.push(None),
                            Json::Object(object) => {
                                self.path.push(PathSegment::index(index));
                                let child = self.normalize_linked_object(
                                    id,
                                    &key,
                                    field,
                                    object,
                                    Some(index),
                                )?;
                                self.path.pop();
                                refs.push(Some(child));
                            }
                            _ => {
                                self.path.pop();
                                return Err(NormalizeError::ObjectExpected {
                                    id: id.clone(),
                                    key,
                                });
                            }
                        }
                    }
                    self.path.pop();
                    self.set_field(id, key.clone(), Value::RefList(refs))?;
                }
                _ => {
                    return Err(NormalizeError::ArrayExpected {
                        id: id.clone(),
                        key,
                    })
                }
            }
        } else {
            match value {
                Json::Null => {
                    self.set_field(id, key.clone(), Value::Scalar(Json::Null))?;
                }
                Json::Object(object) => {
                    self.path.push(PathSegment::key(response_key));
                    let child = self.normalize_linked_object(id, &key, field, object, None)?;
                    self.path.pop();
                    self.set_field(id, key.clone(), Value::Ref(child))?;
                }
                _ => {
                    return Err(NormalizeError::ObjectExpected {
                        id: id.clone(),
                        key,
                    })
                }
            }
        }
        self.attach_errors(id, &key, response_key);
        Ok(())
    }

    /// Normalizes one linked payload object, returning its record id.
    fn normalize_linked_object(
        &mut self,
        parent: &DataId,
        key: &StorageKey,
        field: &LinkedField,
        object: &JsonMap<String, Json>,
        index: Option<usize>,
    ) -> Result<DataId, NormalizeError> {
        let typename = match object.get(TYPENAME_FIELD) {
            Some(Json::String(name)) => name.clone(),
            _ => match &field.concrete_type {
                Some(name) => name.to_string(),
                None => {
                    return Err(NormalizeError::MissingTypename {
                        id: parent.clone(),
                        key: key.clone(),
                    })
                }
            },
        };
        let child = (self.options.id_policy)(object, &typename).unwrap_or_else(|| match index {
            Some(index) => parent.client_child_at(key, index),
            None => parent.client_child(key),
        });
        self.ensure_record(&child, &typename);
        self.normalize_selections(&child, &typename, object, &field.selections)?;
        Ok(child)
    }

    fn normalize_inline_fragment(
        &mut self,
        id: &DataId,
        typename: &str,
        fragment: &InlineFragment,
        payload: &JsonMap<String, Json>,
    ) -> Result<(), NormalizeError> {
        match &fragment.type_condition {
            TypeCondition::Concrete(name) => {
                if typename == name.as_ref() {
                    self.normalize_selections(id, typename, payload, &fragment.selections)?;
                }
            }
            TypeCondition::Abstract(_) => {
                // Membership is server-asserted: generated queries select the
                // marker key alongside the fragment, so the payload carries
                // it whenever the object implements the interface.
                let Some(marker) = fragment.type_condition.marker_key() else {
                    return Ok(());
                };
                match payload.get(marker.as_str()) {
                    Some(Json::Null | Json::Bool(false)) => {
                        self.set_field(id, marker, Value::Scalar(Json::Bool(false)))?;
                    }
                    Some(_) => {
                        self.set_field(id, marker, Value::Scalar(Json::Bool(true)))?;
                        self.normalize_selections(id, typename, payload, &fragment.selections)?;
                    }
                    None => {}
                }
            }
        }
        Ok(())
    }

    fn normalize_condition(
        &mut self,
        id: &DataId,
        typename: &str,
        condition: &Condition,
        payload: &JsonMap<String, Json>,
    ) -> Result<(), NormalizeError> {
        let value = self.variables.resolve(&condition.variable)?;
        let Json::Bool(value) = value else {
            return Err(NormalizeError::ConditionNotBoolean {
                name: condition.variable.clone(),
            });
        };
        if *value == condition.passing_value {
            self.normalize_selections(id, typename, payload, &condition.selections)?;
        }
        Ok(())
    }

    fn defer_placeholder(&mut self, id: &DataId, fragment: &DeferFragment) {
        self.placeholders
            .push(IncrementalPlaceholder::Defer(DeferPlaceholder {
                label: fragment.label.clone(),
                id: id.clone(),
                selections: Arc::clone(&fragment.selections),
            }));
    }

    fn normalize_stream(
        &mut self,
        id: &DataId,
        stream: &StreamField,
        payload: &JsonMap<String, Json>,
    ) -> Result<(), NormalizeError> {
        // Items present in the initial payload normalize like any plural
        // field; later items arrive through the placeholder.
        self.normalize_linked(id, &stream.field, payload)?;
        let key = storage_key(&stream.field.name, &stream.field.args, self.variables)?;
        self.placeholders
            .push(IncrementalPlaceholder::Stream(StreamPlaceholder {
                label: stream.label.clone(),
                id: id.clone(),
                key,
                field: stream.field.clone(),
            }));
        Ok(())
    }

    fn normalize_module(
        &mut self,
        id: &DataId,
        module: &ModuleImport,
        payload: &JsonMap<String, Json>,
    ) -> Result<(), NormalizeError> {
        let component = format!("{MODULE_COMPONENT_PREFIX}{}", module.document_name);
        let operation = format!("{MODULE_OPERATION_PREFIX}{}", module.document_name);
        let mut any = false;
        for raw in [component, operation] {
            if let Some(value) = payload.get(&raw) {
                self.set_field(id, StorageKey::new(raw), Value::Scalar(value.clone()))?;
                any = true;
            }
        }
        if any {
            self.module_imports.push(ModulePointer {
                id: id.clone(),
                document_name: module.document_name.clone(),
                fragment_name: module.fragment_name.clone(),
            });
        }
        Ok(())
    }

    /// Writes one field, enforcing identity consistency for the reserved
    /// `id` field of an existing record.
    fn set_field(
        &mut self,
        id: &DataId,
        key: StorageKey,
        value: Value,
    ) -> Result<(), NormalizeError> {
        if key.as_str() == ID_FIELD {
            if let Lookup::Present(record) = self.overlay.get(id) {
                if let Some(Value::Scalar(existing)) = record.get(&key) {
                    if let Value::Scalar(incoming) = &value {
                        if existing != incoming && !existing.is_null() {
                            return Err(NormalizeError::ConflictingIds {
                                id: id.clone(),
                                existing: existing.clone(),
                                incoming: incoming.clone(),
                            });
                        }
                    }
                }
            }
        }
        let Some(record) = self.overlay.get_mut(id) else {
            // ensure_record precedes field writes for every normalized
            // object; a miss here means an incremental parent vanished.
            return Err(NormalizeError::MissingParent { id: id.clone() });
        };
        record.set(key, value);
        Ok(())
    }

    /// Attaches payload errors recorded for the current path + response key.
    fn attach_errors(&mut self, id: &DataId, key: &StorageKey, response_key: &str) {
        let mut path = self.path.clone();
        path.push(PathSegment::key(response_key));
        if let Some(errors) = self.errors.get(&path).cloned() {
            if let Some(record) = self.overlay.get_mut(id) {
                record.set_field_errors(key.clone(), errors);
            }
        }
    }
}
