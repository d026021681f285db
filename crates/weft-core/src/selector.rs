// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Selectors: what to read, from where, with which variables.
use std::sync::Arc;

use crate::args::Variables;
use crate::ident::DataId;
use crate::selection::Selection;

/// Root id(s) a selector reads from.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectorRoot {
    /// One root record.
    Singular(DataId),
    /// An ordered list of root records, read positionally.
    Plural(Vec<DataId>),
}

/// A (selection tree, root id(s), variables) tuple identifying one read.
///
/// Selectors are immutable once constructed; equality is structural (same
/// selection tree content, same root, same variable values). The selection
/// tree is shared by reference, so cloning a selector never copies the tree.
#[derive(Clone, Debug, PartialEq)]
pub struct Selector {
    /// Selections to read at the root.
    pub selections: Arc<[Selection]>,
    /// Root record id(s).
    pub root: SelectorRoot,
    /// Variable bindings used to resolve storage keys and conditions.
    pub variables: Variables,
}

impl Selector {
    /// Selector rooted at the reserved root record, as produced for an
    /// operation's outermost selection set.
    #[must_use]
    pub fn operation(selections: impl Into<Arc<[Selection]>>, variables: Variables) -> Self {
        Self {
            selections: selections.into(),
            root: SelectorRoot::Singular(DataId::root()),
            variables,
        }
    }

    /// Selector rooted at an arbitrary record, as produced for a fragment
    /// spread on that record.
    #[must_use]
    pub fn fragment(
        selections: impl Into<Arc<[Selection]>>,
        root: DataId,
        variables: Variables,
    ) -> Self {
        Self {
            selections: selections.into(),
            root: SelectorRoot::Singular(root),
            variables,
        }
    }

    /// Selector over an ordered list of root records (plural fragment).
    #[must_use]
    pub fn plural(
        selections: impl Into<Arc<[Selection]>>,
        roots: Vec<DataId>,
        variables: Variables,
    ) -> Self {
        Self {
            selections: selections.into(),
            root: SelectorRoot::Plural(roots),
            variables,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::ScalarField;

    fn selections() -> Arc<[Selection]> {
        Arc::from([Selection::Scalar(ScalarField::plain("name"))])
    }

    #[test]
    fn equality_is_structural() {
        let a = Selector::operation(selections(), Variables::new().with("size", 32));
        let b = Selector::operation(selections(), Variables::new().with("size", 32));
        let c = Selector::operation(selections(), Variables::new().with("size", 64));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn clones_share_the_selection_tree() {
        let a = Selector::operation(selections(), Variables::new());
        let b = a.clone();
        assert!(Arc::ptr_eq(&a.selections, &b.selections));
    }
}
