// SPDX-License-Identifier: PMPL-1.0-or-later
//! Property-based tests for the relational adapter

use proptest::prelude::*;
use serde_json::{json, Value};

use mosaic_relational::{
    ClientKey, InMemoryRelationalStore, RelationalCommand, RelationalQuery, RelationalStore, Row,
    Table,
};

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => panic!("test rows must be objects"),
    }
}

/// Generate client names
fn arb_name() -> impl Strategy<Value = String> {
    "[A-Za-z]{1,20}"
}

proptest! {
    #[test]
    fn test_generated_ids_are_unique_and_ordered(names in prop::collection::vec(arb_name(), 1..30)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let store = InMemoryRelationalStore::new();
            let mut ids = Vec::new();
            for name in &names {
                let inserted = store
                    .execute(&RelationalCommand::InsertClient(row(json!({"name": name}))), true)
                    .await
                    .unwrap()
                    .unwrap();
                ids.push(inserted["id"].as_i64().unwrap());
            }

            for pair in ids.windows(2) {
                prop_assert!(pair[0] < pair[1]);
            }
            let listed: Vec<i64> = store
                .query(&RelationalQuery::AllClients)
                .await
                .unwrap()
                .iter()
                .map(|r| r["id"].as_i64().unwrap())
                .collect();
            prop_assert_eq!(listed, ids);
            Ok(())
        })?;
    }

    #[test]
    fn test_client_delete_cascades_only_its_purchases(
        owners in prop::collection::vec(0usize..4, 0..40),
        victim in 0usize..4
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let store = InMemoryRelationalStore::new();
            for i in 0..4 {
                store
                    .execute(&RelationalCommand::InsertClient(row(json!({"name": format!("c{}", i)}))), false)
                    .await
                    .unwrap();
            }
            store
                .execute(&RelationalCommand::InsertProduct(row(json!({"name": "p", "price": 1.0}))), false)
                .await
                .unwrap();
            for owner in &owners {
                store
                    .execute(
                        &RelationalCommand::InsertPurchase(row(json!({
                            "client_id": *owner as i64 + 1,
                            "product_id": 1,
                            "purchase_date": "2024-01-01"
                        }))),
                        false,
                    )
                    .await
                    .unwrap();
            }

            let victim_id = victim as i64 + 1;
            store
                .execute(&RelationalCommand::DeleteClient(ClientKey::Id(victim_id)), false)
                .await
                .unwrap();

            let survivors = owners.iter().filter(|&&o| o != victim).count();
            prop_assert_eq!(store.count(Table::Purchases).await, survivors);
            prop_assert_eq!(store.count(Table::Clients).await, 3);
            let orphaned = store
                .query(&RelationalQuery::PurchasesByClient(victim_id))
                .await
                .unwrap();
            prop_assert!(orphaned.is_empty());
            Ok(())
        })?;
    }
}
