// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Selection trees: the immutable field-selection structure walked by the
//! reader, normalizer, and reference marker.
//!
//! Selection trees are produced by out-of-scope compile-time tooling and
//! consumed here as opaque, structurally shared values (`Arc` slices). Field
//! resolution is structural dispatch over these tagged variants; the store
//! never probes dynamic properties.
use std::sync::Arc;

use crate::args::Argument;
use crate::constants::{ABSTRACT_MARKER_PREFIX, PART_MARKER_PREFIX};
use crate::ident::StorageKey;

/// One selection in a selection set.
#[derive(Clone, Debug, PartialEq)]
pub enum Selection {
    /// Leaf field holding a scalar or client-synthetic object.
    Scalar(ScalarField),
    /// Field referencing one record or an ordered list of records.
    Linked(LinkedField),
    /// Type-conditional fragment spread flattened inline.
    InlineFragment(InlineFragment),
    /// Selections gated on a boolean variable (include/skip).
    Condition(Condition),
    /// Fragment whose payload arrives in a separate deferred part.
    Defer(DeferFragment),
    /// Plural linked field whose items arrive incrementally.
    Stream(StreamField),
    /// Dynamic module/component reference resolved at render time.
    ModuleImport(ModuleImport),
    /// Field that must be non-null, with a declared failure action.
    Required(RequiredField),
}

/// Leaf field selection.
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarField {
    /// Schema field name.
    pub name: Box<str>,
    /// Response-key alias, when the query renamed the field.
    pub alias: Option<Box<str>>,
    /// Field arguments (literal or variable).
    pub args: Vec<Argument>,
}

/// Linked (record-valued) field selection.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkedField {
    /// Schema field name.
    pub name: Box<str>,
    /// Response-key alias, when the query renamed the field.
    pub alias: Option<Box<str>>,
    /// Field arguments (literal or variable).
    pub args: Vec<Argument>,
    /// `true` when the field yields an ordered list of records.
    pub plural: bool,
    /// `false` when the schema guarantees a non-null value; required-field
    /// null bubbling stops at the nearest `true` ancestor.
    pub nullable: bool,
    /// Concrete type of the linked records, when the schema names one.
    /// Used as the type-name fallback for payloads without `__typename`.
    pub concrete_type: Option<Box<str>>,
    /// Child selections applied to each linked record.
    pub selections: Arc<[Selection]>,
}

/// Type condition on an inline fragment.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeCondition {
    /// Matches records whose `__typename` equals the named concrete type.
    Concrete(Box<str>),
    /// Matches records carrying the synthesized membership marker for the
    /// named interface or union.
    Abstract(Box<str>),
}

impl TypeCondition {
    /// Storage key of the membership marker consulted for abstract
    /// conditions.
    #[must_use]
    pub fn marker_key(&self) -> Option<StorageKey> {
        match self {
            Self::Concrete(_) => None,
            Self::Abstract(name) => {
                Some(StorageKey::new(format!("{ABSTRACT_MARKER_PREFIX}{name}")))
            }
        }
    }
}

/// Inline fragment gated on a type condition.
#[derive(Clone, Debug, PartialEq)]
pub struct InlineFragment {
    /// Condition deciding whether the fragment's fields apply.
    pub type_condition: TypeCondition,
    /// Selections read when the condition holds.
    pub selections: Arc<[Selection]>,
}

/// Selections gated on a boolean variable.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    /// Variable whose value gates the selections.
    pub variable: Box<str>,
    /// Value of the variable for which the selections apply.
    pub passing_value: bool,
    /// Gated selections.
    pub selections: Arc<[Selection]>,
}

/// Deferred fragment: contents arrive as a separate incremental part.
#[derive(Clone, Debug, PartialEq)]
pub struct DeferFragment {
    /// Label identifying the incremental part on the wire.
    pub label: Box<str>,
    /// Selections delivered by the deferred part.
    pub selections: Arc<[Selection]>,
}

impl DeferFragment {
    /// Storage key of the presence marker for this fragment's payload.
    ///
    /// The reader treats the fragment's fields as not yet fetched until the
    /// marker is written by the incremental part's normalization.
    #[must_use]
    pub fn marker_key(&self) -> StorageKey {
        StorageKey::new(format!("{PART_MARKER_PREFIX}{}", self.label))
    }
}

/// Streamed plural field: list items arrive as separate incremental parts.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamField {
    /// Label identifying the incremental parts on the wire.
    pub label: Box<str>,
    /// Underlying plural linked field the items extend.
    pub field: LinkedField,
}

/// Dynamic module/component reference.
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleImport {
    /// Document name scoping the reserved module keys.
    pub document_name: Box<str>,
    /// Fragment the module renders.
    pub fragment_name: Box<str>,
}

/// Action taken when a required field reads null or missing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RequiredAction {
    /// Record the failure and keep the null in the data.
    Log,
    /// Abort the enclosing read, propagating null to the nearest nullable
    /// ancestor or failing the read at the root.
    Throw,
}

/// Field wrapper enforcing non-null with a declared action.
#[derive(Clone, Debug, PartialEq)]
pub struct RequiredField {
    /// The wrapped scalar or linked selection.
    pub field: Box<Selection>,
    /// What to do when the field is null or missing.
    pub action: RequiredAction,
}

impl ScalarField {
    /// Argument-free scalar selection.
    #[must_use]
    pub fn plain(name: impl Into<Box<str>>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            args: Vec::new(),
        }
    }

    /// Response key this field contributes to the data tree.
    #[must_use]
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

impl LinkedField {
    /// Argument-free singular linked field.
    #[must_use]
    pub fn singular(name: impl Into<Box<str>>, selections: impl Into<Arc<[Selection]>>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            args: Vec::new(),
            plural: false,
            nullable: true,
            concrete_type: None,
            selections: selections.into(),
        }
    }

    /// Argument-free plural linked field.
    #[must_use]
    pub fn plural(name: impl Into<Box<str>>, selections: impl Into<Arc<[Selection]>>) -> Self {
        Self {
            plural: true,
            ..Self::singular(name, selections)
        }
    }

    /// Returns a copy carrying the given arguments.
    #[must_use]
    pub fn with_args(mut self, args: Vec<Argument>) -> Self {
        self.args = args;
        self
    }

    /// Returns a copy marked non-nullable.
    #[must_use]
    pub fn non_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Returns a copy with a concrete linked type.
    #[must_use]
    pub fn of_type(mut self, typename: impl Into<Box<str>>) -> Self {
        self.concrete_type = Some(typename.into());
        self
    }

    /// Response key this field contributes to the data tree.
    #[must_use]
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}
