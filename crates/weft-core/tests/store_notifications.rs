// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Notification-engine behavior: key-overlap gating, reference recycling,
//! error-only changes, and per-subscription failure containment.
mod common;

use common::{
    commit, commit_with_errors, me_payload, me_selector, node_payload, node_selector,
    nodes_payload, nodes_selector, spy,
};
use serde_json::json;
use std::sync::Arc;
use weft_core::{
    ChangeGranularity, DataError, DataValue, LinkedField, PathSegment, PayloadError,
    RequiredAction, RequiredField, ScalarField, Selection, Selector, Store, StoreConfig, Variables,
};

#[test]
fn unrelated_singular_publish_triggers_no_reread_in_field_granular_mode() {
    let mut store = Store::default();
    commit(&mut store, &me_selector(), &me_payload());

    let snapshot = store.lookup(&me_selector()).expect("lookup succeeds");
    let (calls, callback) = spy();
    let _token = store.subscribe(snapshot, callback);

    // A different root field on the shared root record: node(id:"5").
    let receipt = commit(&mut store, &node_selector("5"), &node_payload("5", "Other"));

    assert_eq!(receipt.subscriptions_reread, 0);
    assert_eq!(receipt.subscriptions_notified, 0);
    assert!(calls.borrow().is_empty());
}

#[test]
fn unrelated_singular_publish_rereads_but_never_notifies_in_coarse_mode() {
    let mut store = Store::new(StoreConfig {
        granularity: ChangeGranularity::RecordCoarse,
        ..StoreConfig::default()
    });
    commit(&mut store, &me_selector(), &me_payload());

    let snapshot = store.lookup(&me_selector()).expect("lookup succeeds");
    let (calls, callback) = spy();
    let _token = store.subscribe(snapshot, callback);

    let receipt = commit(&mut store, &node_selector("5"), &node_payload("5", "Other"));

    // The shared root record makes the coarse overlap a false positive: the
    // store must re-read, but recycling proves nothing changed and the
    // callback never runs.
    assert_eq!(receipt.subscriptions_reread, 1);
    assert_eq!(receipt.subscriptions_notified, 0);
    assert!(calls.borrow().is_empty());
}

#[test]
fn unrelated_plural_publish_triggers_no_reread_in_field_granular_mode() {
    let mut store = Store::default();
    commit(&mut store, &me_selector(), &me_payload());

    let snapshot = store.lookup(&me_selector()).expect("lookup succeeds");
    let (calls, callback) = spy();
    let _token = store.subscribe(snapshot, callback);

    let receipt = commit(
        &mut store,
        &nodes_selector(&["1", "2"]),
        &nodes_payload(&[("1", "Alice"), ("2", "Bob")]),
    );

    assert_eq!(receipt.subscriptions_reread, 0);
    assert!(calls.borrow().is_empty());
}

#[test]
fn error_on_unchanged_null_field_rereads_and_notifies() {
    let mut store = Store::default();
    commit(&mut store, &me_selector(), &json!({"me": null}));

    let snapshot = store.lookup(&me_selector()).expect("lookup succeeds");
    let (calls, callback) = spy();
    let _token = store.subscribe(snapshot, callback);

    // The value stays null, but an error appears on the me field.
    let receipt = commit_with_errors(
        &mut store,
        &me_selector(),
        &json!({"me": null}),
        &[PayloadError::new(
            "Could not fetch me",
            vec![PathSegment::key("me")],
        )],
    );

    assert_eq!(receipt.subscriptions_reread, 1);
    assert_eq!(receipt.subscriptions_notified, 1);
    let calls = calls.borrow();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].errors.iter().any(|error| matches!(
        error,
        DataError::Field { message, .. } if message.as_ref() == "Could not fetch me"
    )));
}

#[test]
fn error_only_change_also_rereads_in_coarse_mode() {
    let mut store = Store::new(StoreConfig {
        granularity: ChangeGranularity::RecordCoarse,
        ..StoreConfig::default()
    });
    commit(&mut store, &me_selector(), &json!({"me": null}));

    let snapshot = store.lookup(&me_selector()).expect("lookup succeeds");
    let (calls, callback) = spy();
    let _token = store.subscribe(snapshot, callback);

    let receipt = commit_with_errors(
        &mut store,
        &me_selector(),
        &json!({"me": null}),
        &[PayloadError::new(
            "Could not fetch me",
            vec![PathSegment::key("me")],
        )],
    );

    assert_eq!(receipt.subscriptions_reread, 1);
    assert_eq!(calls.borrow().len(), 1);
}

#[test]
fn plural_membership_change_notifies_with_new_list() {
    let mut store = Store::default();
    let selector = nodes_selector(&["1", "2"]);
    commit(
        &mut store,
        &selector,
        &nodes_payload(&[("1", "Alice"), ("2", "Bob")]),
    );

    let snapshot = store.lookup(&selector).expect("lookup succeeds");
    let (calls, callback) = spy();
    let _token = store.subscribe(snapshot, callback);

    // Same query, new membership: [1, 2] becomes [1, 3].
    let receipt = commit(
        &mut store,
        &selector,
        &nodes_payload(&[("1", "Alice"), ("3", "Charlie")]),
    );

    assert_eq!(receipt.subscriptions_notified, 1);
    let calls = calls.borrow();
    assert_eq!(calls.len(), 1);
    let DataValue::Object(root) = &calls[0].data else {
        panic!("expected object data");
    };
    let DataValue::List(nodes) = &root["nodes"] else {
        panic!("expected nodes list");
    };
    let names: Vec<&DataValue> = nodes
        .iter()
        .filter_map(|node| match node {
            DataValue::Object(user) => user.get("name"),
            _ => None,
        })
        .collect();
    assert_eq!(
        names,
        [
            &DataValue::Scalar(json!("Alice")),
            &DataValue::Scalar(json!("Charlie")),
        ]
    );
}

#[test]
fn at_most_one_callback_per_publish() {
    let mut store = Store::default();
    commit(&mut store, &me_selector(), &me_payload());

    let snapshot = store.lookup(&me_selector()).expect("lookup succeeds");
    let (calls, callback) = spy();
    let _token = store.subscribe(snapshot, callback);

    // One publish changing two fields the subscription sees.
    let receipt = commit(
        &mut store,
        &me_selector(),
        &json!({
            "me": {
                "__typename": "User",
                "id": "4",
                "name": "Mark",
                "profilePicture": {"uri": "https://photo2.jpg"},
                "emailAddresses": ["a@b.com", "c@d.com"],
            }
        }),
    );

    assert_eq!(receipt.subscriptions_reread, 1);
    assert_eq!(receipt.subscriptions_notified, 1);
    assert_eq!(calls.borrow().len(), 1);
}

#[test]
fn disposed_subscription_sees_nothing_further() {
    let mut store = Store::default();
    commit(&mut store, &me_selector(), &me_payload());

    let snapshot = store.lookup(&me_selector()).expect("lookup succeeds");
    let (calls, callback) = spy();
    let token = store.subscribe(snapshot, callback);

    commit(
        &mut store,
        &me_selector(),
        &json!({"me": {"__typename": "User", "id": "4", "name": "Mark"}}),
    );
    assert_eq!(calls.borrow().len(), 1);

    store.unsubscribe(token);
    commit(
        &mut store,
        &me_selector(),
        &json!({"me": {"__typename": "User", "id": "4", "name": "Again"}}),
    );
    assert_eq!(calls.borrow().len(), 1);
}

#[test]
fn failing_reread_is_contained_to_its_subscription() {
    let mut store = Store::default();
    let viewer_payload = json!({"viewer": {"__typename": "User", "id": "7", "name": "Ada"}});

    let throwing = Selector::operation(
        Arc::from([Selection::Required(RequiredField {
            field: Box::new(Selection::Linked(LinkedField::singular(
                "viewer",
                [Selection::Scalar(ScalarField::plain("name"))],
            ))),
            action: RequiredAction::Throw,
        })]),
        Variables::new(),
    );
    let plain = Selector::operation(
        Arc::from([Selection::Linked(LinkedField::singular(
            "viewer",
            [Selection::Scalar(ScalarField::plain("name"))],
        ))]),
        Variables::new(),
    );
    commit(&mut store, &plain, &viewer_payload);

    let (throw_calls, throw_callback) = spy();
    let snapshot = store.lookup(&throwing).expect("initial read succeeds");
    let _throwing_token = store.subscribe(snapshot, throw_callback);

    let (plain_calls, plain_callback) = spy();
    let snapshot = store.lookup(&plain).expect("lookup succeeds");
    let _plain_token = store.subscribe(snapshot, plain_callback);

    // viewer goes null: the throwing subscription's re-read fails, the
    // plain one must still be delivered.
    let receipt = commit(&mut store, &plain, &json!({"viewer": null}));

    assert_eq!(receipt.subscriptions_failed, 1);
    assert_eq!(receipt.subscriptions_notified, 1);
    assert!(throw_calls.borrow().is_empty());
    assert_eq!(plain_calls.borrow().len(), 1);
}
