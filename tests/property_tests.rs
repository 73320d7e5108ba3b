//! Property tests for diffing, label patterns and redaction.
//!
//! These validate invariants that must hold for any input, not just the
//! scenarios covered by the integration tests.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::{json, Value};
use trails_core::audit::MemoryTrailStore;
use trails_core::hooks::Hook;
use trails_core::pattern::LabelPattern;
use trails_core::snapshot::{FieldDiff, Snapshot};
use trails_core::{Credentials, ThreadLocalIdentity, TrailsConfig, CLEANSED_SUBSTITUTE};

use common::*;

const FIELDS: [&str; 4] = ["name", "size", "owner", "motto"];

// Strategy: a field value, including null and empty text
fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        Just(json!("")),
        any::<i32>().prop_map(|n| json!(n)),
        "[a-z]{1,6}".prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
    ]
}

// Strategy: values for a subset of the known fields
fn arb_row_values() -> impl Strategy<Value = BTreeMap<String, Value>> {
    prop::collection::btree_map(prop::sample::select(FIELDS.to_vec()).prop_map(String::from), arb_value(), 0..=4)
}

fn row(values: &BTreeMap<String, Value>) -> Row {
    values
        .iter()
        .fold(Row::new(TEAM, "team"), |row, (field, value)| row.set(field, value.clone()))
}

fn fields() -> Vec<String> {
    FIELDS.iter().map(|f| f.to_string()).collect()
}

proptest! {
    /// Property: a diff only lists tracked fields whose values differ
    #[test]
    fn proptest_diff_lists_exactly_the_differing_fields(
        before in arb_row_values(),
        after in arb_row_values(),
    ) {
        let mut old = row(&before);
        let mut new = row(&after);
        old.id = Some(1);
        new.id = Some(1);
        let fields = fields();

        let diff = FieldDiff::between(
            &Snapshot::capture(&old, &fields),
            &Snapshot::capture(&new, &fields),
            &fields,
        );

        for field in &fields {
            let differs = before.get(field) != after.get(field);
            prop_assert_eq!(diff.get(field).is_some(), differs, "field {}", field);
        }
        for (field, change) in diff.iter() {
            prop_assert!(fields.contains(field));
            prop_assert_ne!(&change.before, &change.after);
        }
    }

    /// Property: swapping the snapshots swaps every change
    #[test]
    fn proptest_diff_is_symmetric(
        before in arb_row_values(),
        after in arb_row_values(),
    ) {
        let mut old = row(&before);
        let mut new = row(&after);
        old.id = Some(1);
        new.id = Some(1);
        let fields = fields();
        let (a, b) = (Snapshot::capture(&old, &fields), Snapshot::capture(&new, &fields));

        let forward = FieldDiff::between(&a, &b, &fields);
        let backward = FieldDiff::between(&b, &a, &fields);

        prop_assert_eq!(forward.len(), backward.len());
        for (field, change) in forward.iter() {
            let reverse = backward.get(field);
            prop_assert!(reverse.is_some());
            let reverse = reverse.unwrap();
            prop_assert_eq!(&change.before, &reverse.after);
            prop_assert_eq!(&change.after, &reverse.before);
        }
    }

    /// Property: label patterns ignore case on both sides
    #[test]
    fn proptest_patterns_match_case_insensitively(
        namespace in "[a-z]{1,8}",
        name in "[A-Z][a-z]{0,8}",
        upper in any::<bool>(),
    ) {
        let label = format!("{}.{}", namespace, name);
        let pattern = if upper { label.to_uppercase() } else { label.to_lowercase() };

        let exact = LabelPattern::new(&pattern).unwrap();
        let wildcard = LabelPattern::new(&format!("{}.*", namespace.to_uppercase())).unwrap();

        prop_assert!(exact.is_match(&label));
        prop_assert!(wildcard.is_match(&label));
        let other_pattern = format!("{}x.*", namespace);
        prop_assert!(!LabelPattern::new(&other_pattern).unwrap().is_match(&label));
    }

    /// Property: a sensitive value is never persisted in plaintext, whether
    /// it is set on creation or changed later
    #[test]
    fn proptest_sensitive_values_never_persisted(
        first in "pw-[A-Za-z0-9]{8,16}",
        second in "pw-[A-Za-z0-9]{8,16}",
    ) {
        let db = Db::new();
        let store = Arc::new(MemoryTrailStore::new());
        let trails = trails_with(&db, &store, quiet_config());
        let _acting = ThreadLocalIdentity::impersonate(Some(admin()));

        let alice = db.insert(&trails, user("alice", &first));
        db.update(&trails, &alice.clone().set("password", json!(second)));

        let dump = format!("{:?}{:?}", store.trails(), store.markers());
        prop_assert!(!dump.contains(&first));
        prop_assert!(!dump.contains(&second));
    }

    /// Property: failed logins never carry the submitted password
    #[test]
    fn proptest_failed_login_credentials_are_cleansed(
        username in "[a-z]{3,10}",
        password in "secret-[A-Za-z0-9]{6,12}",
    ) {
        let db = Db::new();
        let store = Arc::new(MemoryTrailStore::new());
        let trails = trails_with(&db, &store, TrailsConfig {
            track_no_user: true,
            ..quiet_config()
        });
        let credentials = Credentials::new()
            .with("username", username.clone())
            .with("password", password.clone());

        trails.dispatch(&Hook::LoginFailed { credentials: &credentials, request: None });

        let (trail, _) = last_trail(&store);
        prop_assert_eq!(&trail.data()["username"], &json!(username));
        prop_assert_eq!(&trail.data()["password"], &json!(CLEANSED_SUBSTITUTE));
        let trails_debug = format!("{:?}", store.trails());
        prop_assert!(!trails_debug.contains(&password));
    }
}
