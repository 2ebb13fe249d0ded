//! Property tests for wire normalization.
//!
//! Uses proptest to verify:
//! 1. Arbitrary JSON never makes `normalize_messages` panic.
//! 2. Every record that carries text and a valid timestamp survives
//!    normalization, whatever casing its timestamp field uses.
//! 3. Malformed records are dropped individually, never the whole batch.

use proptest::prelude::*;
use serde_json::{Value, json};
use vidchat_proto::message::{Origin, Timestamp};
use vidchat_proto::wire::{normalize_message, normalize_messages};

/// Strategy for arbitrary JSON values, a few levels deep.
fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        ".{0,24}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::hash_map("[a-zA-Z_]{1,10}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// Strategy for the timestamp key casings the backend has used.
fn arb_timestamp_key() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("TIMESTAMP"),
        Just("timestamp"),
        Just("created_at"),
        Just("createdAt"),
    ]
}

/// Strategy for the role values the backend has used.
fn arb_role() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("user"), Just("bot"), Just("assistant"), Just("text")]
}

proptest! {
    #[test]
    fn arbitrary_json_never_panics(value in arb_json()) {
        let _ = normalize_messages(&value);
        let _ = normalize_message(&value);
    }

    #[test]
    fn arbitrary_records_inside_envelope_never_panic(
        records in prop::collection::vec(arb_json(), 0..8)
    ) {
        let out = normalize_messages(&json!({ "messages": records }));
        prop_assert!(out.len() <= 8);
        for msg in &out {
            prop_assert_eq!(msg.origin, Origin::ServerConfirmed);
        }
    }

    #[test]
    fn well_formed_records_survive_any_casing(
        key in arb_timestamp_key(),
        role in arb_role(),
        text in "[^\x00]{0,64}",
        millis in 0i64..4_102_444_800_000,
    ) {
        let ts = Timestamp::from_millis(millis);
        let mut record = serde_json::Map::new();
        record.insert("chat_type".into(), json!(role));
        record.insert("message".into(), json!(text.clone()));
        record.insert(key.into(), json!(ts.to_string()));

        let msg = normalize_message(&Value::Object(record)).unwrap();
        prop_assert_eq!(msg.text, text);
        prop_assert_eq!(msg.created_at, ts);
    }

    #[test]
    fn one_bad_record_only_drops_itself(
        good in 1usize..6,
        bad_index in 0usize..6,
    ) {
        let mut records: Vec<Value> = (0..good)
            .map(|i| json!({
                "message": format!("m{i}"),
                "TIMESTAMP": Timestamp::from_millis(1_000 * i64::try_from(i).unwrap()).to_string(),
            }))
            .collect();
        let at = bad_index.min(records.len());
        records.insert(at, json!({"message": "broken", "TIMESTAMP": "??"}));

        let out = normalize_messages(&json!({ "messages": records }));
        prop_assert_eq!(out.len(), good);
        prop_assert!(out.iter().all(|m| m.text != "broken"));
    }
}
