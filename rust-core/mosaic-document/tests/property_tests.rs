// SPDX-License-Identifier: PMPL-1.0-or-later
//! Property-based tests for the document adapter

use proptest::prelude::*;
use serde_json::{json, Value};

use mosaic_document::{Document, DocumentStore, Filter, InMemoryDocumentStore, PROFILES};

fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => panic!("test documents must be objects"),
    }
}

/// Generate client keys
fn arb_key() -> impl Strategy<Value = String> {
    "[a-f0-9]{4}-[a-f0-9]{4}"
}

proptest! {
    #[test]
    fn test_upsert_keeps_one_document_per_key(
        key in arb_key(),
        ages in prop::collection::vec(0u32..120, 1..10)
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let store = InMemoryDocumentStore::new();
            let filter = Filter::eq("client_id", key.as_str());
            for age in &ages {
                store.upsert(PROFILES, &filter, doc(json!({"age": age}))).await.unwrap();
            }

            prop_assert_eq!(store.count(PROFILES).await, 1);
            let found = store.find_one(PROFILES, &filter).await.unwrap().unwrap();
            prop_assert_eq!(&found["client_id"], &json!(key));
            prop_assert_eq!(&found["age"], &json!(ages[ages.len() - 1]));
            Ok(())
        })?;
    }

    #[test]
    fn test_delete_many_removes_exactly_matches(
        groups in prop::collection::vec(0u8..5, 0..30),
        target in 0u8..5
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let store = InMemoryDocumentStore::new();
            for (i, group) in groups.iter().enumerate() {
                store
                    .upsert(PROFILES, &Filter::eq("client_id", i as i64), doc(json!({"group": group})))
                    .await
                    .unwrap();
            }

            let expected = groups.iter().filter(|&&g| g == target).count();
            let filter = Filter::eq("group", target);
            prop_assert_eq!(store.find_many(PROFILES, &filter).await.unwrap().len(), expected);
            prop_assert_eq!(store.delete_many(PROFILES, &filter).await.unwrap(), expected);
            prop_assert_eq!(store.count(PROFILES).await, groups.len() - expected);
            prop_assert!(store.find_one(PROFILES, &filter).await.unwrap().is_none());
            Ok(())
        })?;
    }
}
