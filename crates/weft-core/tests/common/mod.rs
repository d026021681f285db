// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use serde_json::{json, Value as Json};
use weft_core::{
    normalize_response, Argument, IncrementalPlaceholder, InlineFragment, LinkedField,
    NormalizeOptions, PayloadError, PublishReceipt, ScalarField, Selection, Selector, Snapshot,
    Store, TypeCondition, Variables,
};

// =============================================================================
// SELECTION-TREE FIXTURES
//
// Compile-time tooling produces these trees in production; tests build the
// same shapes by hand.
// =============================================================================

/// `{ me { name profilePicture(size: $size) { uri } emailAddresses } }`
pub fn me_query() -> Arc<[Selection]> {
    Arc::from([Selection::Linked(LinkedField::singular(
        "me",
        [
            Selection::Scalar(ScalarField::plain("name")),
            Selection::Linked(
                LinkedField::singular(
                    "profilePicture",
                    [Selection::Scalar(ScalarField::plain("uri"))],
                )
                .with_args(vec![Argument::variable("size", "size")])
                .of_type("Image"),
            ),
            Selection::Scalar(ScalarField::plain("emailAddresses")),
        ],
    ))])
}

/// The `me` query with `$size: 32`.
pub fn me_selector() -> Selector {
    Selector::operation(me_query(), Variables::new().with("size", 32))
}

/// The canonical `me` payload.
pub fn me_payload() -> Json {
    json!({
        "me": {
            "__typename": "User",
            "id": "4",
            "name": "Zuck",
            "profilePicture": {"uri": "https://photo1.jpg"},
            "emailAddresses": ["a@b.com"],
        }
    })
}

/// `{ node(id: $id) { id __typename ... on User { name } } }`
pub fn node_query() -> Arc<[Selection]> {
    Arc::from([Selection::Linked(
        LinkedField::singular(
            "node",
            [
                Selection::Scalar(ScalarField::plain("id")),
                Selection::Scalar(ScalarField::plain("__typename")),
                Selection::InlineFragment(InlineFragment {
                    type_condition: TypeCondition::Concrete("User".into()),
                    selections: Arc::from([Selection::Scalar(ScalarField::plain("name"))]),
                }),
            ],
        )
        .with_args(vec![Argument::variable("id", "id")]),
    )])
}

/// The `node` query bound to one id.
pub fn node_selector(id: &str) -> Selector {
    Selector::operation(node_query(), Variables::new().with("id", id))
}

/// A `node` payload for a `User`.
pub fn node_payload(id: &str, name: &str) -> Json {
    json!({"node": {"__typename": "User", "id": id, "name": name}})
}

/// `{ nodes(ids: $ids) { id __typename ... on User { name } } }`
pub fn nodes_query() -> Arc<[Selection]> {
    Arc::from([Selection::Linked(
        LinkedField::plural(
            "nodes",
            [
                Selection::Scalar(ScalarField::plain("id")),
                Selection::Scalar(ScalarField::plain("__typename")),
                Selection::InlineFragment(InlineFragment {
                    type_condition: TypeCondition::Concrete("User".into()),
                    selections: Arc::from([Selection::Scalar(ScalarField::plain("name"))]),
                }),
            ],
        )
        .with_args(vec![Argument::variable("ids", "ids")]),
    )])
}

/// The `nodes` query bound to a list of ids.
pub fn nodes_selector(ids: &[&str]) -> Selector {
    Selector::operation(nodes_query(), Variables::new().with("ids", json!(ids)))
}

/// A `nodes` payload from `(id, name)` pairs.
pub fn nodes_payload(users: &[(&str, &str)]) -> Json {
    let nodes: Vec<Json> = users
        .iter()
        .map(|(id, name)| json!({"__typename": "User", "id": id, "name": name}))
        .collect();
    json!({ "nodes": nodes })
}

// =============================================================================
// STORE DRIVERS
// =============================================================================

/// Normalizes `payload` for `selector` and publishes the sink.
pub fn commit(store: &mut Store, selector: &Selector, payload: &Json) -> PublishReceipt {
    commit_with_errors(store, selector, payload, &[])
}

/// Like [`commit`], with server field errors attached to the payload part.
pub fn commit_with_errors(
    store: &mut Store,
    selector: &Selector,
    payload: &Json,
    errors: &[PayloadError],
) -> PublishReceipt {
    let part = normalize_response(
        store.source(),
        selector,
        payload,
        errors,
        &NormalizeOptions::default(),
    )
    .expect("normalization should succeed");
    store.publish(part.sink)
}

/// Like [`commit`], additionally returning discovered incremental
/// placeholders for defer/stream follow-up parts.
pub fn commit_tracking(
    store: &mut Store,
    selector: &Selector,
    payload: &Json,
) -> (PublishReceipt, Vec<IncrementalPlaceholder>) {
    let part = normalize_response(
        store.source(),
        selector,
        payload,
        &[],
        &NormalizeOptions::default(),
    )
    .expect("normalization should succeed");
    let placeholders = part.placeholders;
    (store.publish(part.sink), placeholders)
}

/// Records every delivered snapshot for later assertions.
pub fn spy() -> (Rc<RefCell<Vec<Snapshot>>>, impl FnMut(&Snapshot) + 'static) {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&calls);
    let callback = move |snapshot: &Snapshot| sink.borrow_mut().push(snapshot.clone());
    (calls, callback)
}
