//! Property tests for `MessageStore`.
//!
//! Uses proptest to verify:
//! 1. The view is always ascending by `created_at`, whatever order
//!    batches arrive in.
//! 2. No two server-confirmed entries are the same logical message.
//! 3. Merging a batch that is already present changes nothing.
//! 4. Every optimistic entry is confirmed exactly once by its server copy,
//!    leaving no duplicates and nothing pending.

use proptest::prelude::*;
use vidchat::chat::store::MessageStore;
use vidchat_proto::message::{Message, MessageId, Role, Timestamp};

fn arb_role() -> impl Strategy<Value = Role> {
    prop_oneof![Just(Role::User), Just(Role::Bot), Just(Role::Error)]
}

/// Server messages drawn from a small space so collisions are common.
fn arb_confirmed() -> impl Strategy<Value = Message> {
    (
        prop::option::of(0u32..6),
        arb_role(),
        prop::sample::select(vec!["hi", "hello", "done", "again"]),
        0i64..8,
    )
        .prop_map(|(id, role, text, ts)| {
            Message::confirmed(
                id.map(|n| MessageId::new(n.to_string())),
                role,
                text,
                Timestamp::from_millis(1_000 + ts * 250),
            )
        })
}

fn arb_batches() -> impl Strategy<Value = Vec<Vec<Message>>> {
    prop::collection::vec(prop::collection::vec(arb_confirmed(), 0..8), 1..6)
}

fn is_sorted(view: &[Message]) -> bool {
    view.windows(2).all(|w| w[0].created_at <= w[1].created_at)
}

proptest! {
    #[test]
    fn view_is_sorted_and_free_of_duplicates(batches in arb_batches()) {
        let mut store = MessageStore::new();
        for batch in batches {
            store.merge(batch);
            let view = store.sorted_view();
            prop_assert!(is_sorted(&view));
            for (i, a) in view.iter().enumerate() {
                for b in &view[i + 1..] {
                    prop_assert!(!a.same_logical(b), "duplicate {a:?} / {b:?}");
                }
            }
        }
    }

    #[test]
    fn remerging_a_present_batch_is_a_no_op(batches in arb_batches()) {
        let mut store = MessageStore::new();
        for batch in &batches {
            store.merge(batch.iter().cloned());
        }
        let before = store.sorted_view();
        for batch in &batches {
            let report = store.merge_report(batch.iter().cloned());
            prop_assert!(!report.changed());
        }
        prop_assert_eq!(store.sorted_view(), before);
    }

    #[test]
    fn server_copies_confirm_every_optimistic_entry(
        texts in prop::collection::hash_set("[a-z]{1,8}", 1..8),
        server_offset in 1i64..5_000,
        noise in prop::collection::vec(arb_confirmed(), 0..6),
    ) {
        let texts: Vec<String> = texts.into_iter().collect();
        let mut store = MessageStore::new();
        for (i, text) in texts.iter().enumerate() {
            let local = Message::local(Role::User, text.clone(), Timestamp::from_millis(10_000 + i as i64));
            prop_assert!(store.append(local));
        }
        prop_assert_eq!(store.pending_count(), texts.len());

        // The server stamps its own times; noise uses texts the locals never do.
        let mut echo: Vec<Message> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                Message::confirmed(
                    Some(MessageId::new(format!("srv-{i}"))),
                    Role::User,
                    text.clone(),
                    Timestamp::from_millis(10_000 + server_offset + i as i64),
                )
            })
            .collect();
        echo.extend(noise.iter().filter(|m| m.role != Role::User).cloned());

        let report = store.merge_report(echo.clone());
        prop_assert_eq!(report.promoted.len(), texts.len());
        prop_assert_eq!(store.pending_count(), 0);

        // A second delivery of the same poll result changes nothing.
        prop_assert!(!store.merge_report(echo).changed());
        let users = store.sorted_view().into_iter().filter(|m| m.role == Role::User).count();
        prop_assert_eq!(users, texts.len());
        prop_assert!(is_sorted(&store.sorted_view()));
    }
}
