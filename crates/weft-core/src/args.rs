// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Canonical argument encoding for storage keys.
//!
//! Two queries selecting the same field with the same argument values must
//! address the same stored field, no matter how the arguments were spelled.
//! The canonical form is `name(arg:value,...)` with arguments sorted by name
//! and JSON values printed with object keys sorted recursively. Fields
//! without arguments use the bare field name.
use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde_json::Value as Json;
use thiserror::Error;

use crate::ident::StorageKey;

/// Error produced when a storage key or condition references a variable the
/// selector did not bind.
///
/// This is an invariant violation on the caller constructing the selector
/// and is surfaced immediately rather than coerced to null.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unbound variable: ${name}")]
pub struct UnboundVariable {
    /// Name of the missing variable.
    pub name: Box<str>,
}

/// Variable bindings attached to a selector.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Variables(BTreeMap<Box<str>, Json>);

impl Variables {
    /// Creates an empty binding set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to `value`, replacing any previous binding.
    #[must_use]
    pub fn with(mut self, name: impl Into<Box<str>>, value: impl Into<Json>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Returns the value bound to `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Json> {
        self.0.get(name)
    }

    /// Resolves `name`, failing if it is unbound.
    pub fn resolve(&self, name: &str) -> Result<&Json, UnboundVariable> {
        self.get(name).ok_or_else(|| UnboundVariable {
            name: name.into(),
        })
    }
}

/// One field argument: a literal value or a variable reference.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ArgumentValue {
    /// Literal JSON value baked into the selection tree.
    Literal(Json),
    /// Reference to a selector variable by name.
    Variable(Box<str>),
}

/// Named argument on a field selection.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Argument {
    /// Argument name as declared in the schema.
    pub name: Box<str>,
    /// Literal or variable value.
    pub value: ArgumentValue,
}

impl Argument {
    /// Creates a literal argument.
    #[must_use]
    pub fn literal(name: impl Into<Box<str>>, value: impl Into<Json>) -> Self {
        Self {
            name: name.into(),
            value: ArgumentValue::Literal(value.into()),
        }
    }

    /// Creates a variable-referencing argument.
    #[must_use]
    pub fn variable(name: impl Into<Box<str>>, variable: impl Into<Box<str>>) -> Self {
        Self {
            name: name.into(),
            value: ArgumentValue::Variable(variable.into()),
        }
    }
}

/// Computes the canonical storage key for `name` with `args` under
/// `variables`.
pub fn storage_key(
    name: &str,
    args: &[Argument],
    variables: &Variables,
) -> Result<StorageKey, UnboundVariable> {
    if args.is_empty() {
        return Ok(StorageKey::from(name));
    }
    let mut resolved: Vec<(&str, &Json)> = Vec::with_capacity(args.len());
    for arg in args {
        let value = match &arg.value {
            ArgumentValue::Literal(value) => value,
            ArgumentValue::Variable(variable) => variables.resolve(variable)?,
        };
        resolved.push((&arg.name, value));
    }
    resolved.sort_by_key(|(name, _)| *name);

    let mut out = String::with_capacity(name.len() + 16);
    out.push_str(name);
    out.push('(');
    for (index, (arg_name, value)) in resolved.iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        out.push_str(arg_name);
        out.push(':');
        write_canonical(&mut out, value);
    }
    out.push(')');
    Ok(StorageKey::new(out))
}

/// Writes `value` in canonical JSON form: no whitespace, object keys sorted
/// recursively. Sorting is explicit rather than relying on the map type's
/// iteration order, so the encoding is stable under any serde_json feature
/// set.
fn write_canonical(out: &mut String, value: &Json) {
    match value {
        Json::Null => out.push_str("null"),
        Json::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        Json::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Json::String(s) => {
            // serde_json's string encoder handles escaping.
            if let Ok(encoded) = serde_json::to_string(s) {
                out.push_str(&encoded);
            }
        }
        Json::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        Json::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (index, key) in keys.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                if let Ok(encoded) = serde_json::to_string(key) {
                    out.push_str(&encoded);
                }
                out.push(':');
                if let Some(item) = map.get(*key) {
                    write_canonical(out, item);
                }
            }
            out.push('}');
        }
    }
}
