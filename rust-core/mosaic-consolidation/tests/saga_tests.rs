// SPDX-License-Identifier: PMPL-1.0-or-later
//! Multi-store writes under store outages: compensation, journaling and
//! repair.

mod common;

use common::{harness, harness_with};
use serde_json::json;

use mosaic_consolidation::{
    ClientInput, ClientRef, ConsolidationConfig, ConsolidationError, StoreKind,
};
use mosaic_document::{DocumentStore, Filter, CLIENTS};
use mosaic_graph::{GraphStore, PersonNode};
use mosaic_kv::KeyValueStore;
use mosaic_relational::Table;

#[tokio::test]
async fn test_create_compensates_when_graph_is_down() {
    let h = harness();
    h.ctx.graph.set_available(false);

    let err = h
        .service
        .create_client(ClientInput::named("Ana", "1"))
        .await
        .unwrap_err();
    match err {
        ConsolidationError::PartialWriteFailure {
            saga,
            failed_step,
            completed,
            compensated,
            ..
        } => {
            assert_eq!(saga, "create_client");
            assert_eq!(failed_step, "merge_person");
            assert_eq!(completed, vec!["insert_client_row", "mirror_identity"]);
            assert!(compensated);
        }
        other => panic!("expected PartialWriteFailure, got {:?}", other),
    }

    assert_eq!(h.ctx.relational.count(Table::Clients).await, 0);
    assert_eq!(h.ctx.document.count(CLIENTS).await, 0);
    assert!(h.service.journal().is_empty().await);
}

#[tokio::test]
async fn test_create_fails_cleanly_when_first_store_is_down() {
    let h = harness();
    h.ctx.relational.set_available(false);

    let err = h
        .service
        .create_client(ClientInput::named("Ana", "1"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConsolidationError::StoreUnavailable {
            store: StoreKind::Relational,
            ..
        }
    ));
    assert_eq!(h.ctx.document.count(CLIENTS).await, 0);
    assert!(h.ctx.graph.list_persons().await.unwrap().is_empty());
    assert!(h.service.journal().is_empty().await);
}

#[tokio::test]
async fn test_disabled_compensation_journals_and_repairs() {
    let h = harness_with(ConsolidationConfig {
        compensate_on_failure: false,
        ..ConsolidationConfig::default()
    });
    h.ctx.graph.set_available(false);

    let err = h
        .service
        .create_client(ClientInput::named("Ana", "1"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConsolidationError::PartialWriteFailure {
            compensated: false,
            ..
        }
    ));

    // The row and mirror stay behind.
    assert_eq!(h.ctx.relational.count(Table::Clients).await, 1);
    assert_eq!(h.ctx.document.count(CLIENTS).await, 1);

    let pending = h.service.journal().pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].saga, "create_client");
    assert_eq!(pending[0].uncompensated.len(), 2);
    let key = pending[0].client_key.clone().unwrap();

    h.ctx.graph.set_available(true);
    let report = h.service.repair_pending().await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.replicated, 1);
    assert!(report.failures.is_empty());
    assert!(h.service.journal().is_empty().await);

    let cached = h.service.cache().fetch(&key).await.unwrap().unwrap();
    assert_eq!(cached.client.name, "Ana");
}

#[tokio::test]
async fn test_partial_delete_is_repaired_by_eviction() {
    let h = harness();
    let ana = h.client("Ana").await;
    let key = ana.canonical_key();
    let cache_key = format!("client:{}", key);
    assert!(h.ctx.kv.exists(&cache_key).await.unwrap());

    h.ctx.graph.set_available(false);
    let err = h
        .service
        .delete_client(&ana.client.reference())
        .await
        .unwrap_err();
    match err {
        ConsolidationError::PartialWriteFailure {
            failed_step,
            completed,
            compensated,
            ..
        } => {
            assert_eq!(failed_step, "delete_person");
            assert_eq!(
                completed,
                vec!["delete_client_row", "delete_profile", "delete_identity_mirror"]
            );
            assert!(!compensated);
        }
        other => panic!("expected PartialWriteFailure, got {:?}", other),
    }

    // Deletes are forward-only: the row is gone but the cache is stale.
    assert_eq!(h.ctx.relational.count(Table::Clients).await, 0);
    assert!(h.ctx.kv.exists(&cache_key).await.unwrap());
    assert!(h.service.pending_keys().await.contains(&key));

    h.ctx.graph.set_available(true);
    let report = h.service.repair_pending().await.unwrap();
    assert_eq!(report.replicated, 1);
    assert!(!h.ctx.kv.exists(&cache_key).await.unwrap());
    assert!(h.service.pending_keys().await.is_empty());
}

#[tokio::test]
async fn test_failed_repair_keeps_journal_entry() {
    let h = harness();
    let ana = h.client("Ana").await;

    h.ctx.graph.set_available(false);
    h.service
        .delete_client(&ana.client.reference())
        .await
        .unwrap_err();
    h.ctx.graph.set_available(true);

    h.ctx.kv.set_available(false);
    let report = h.service.repair_pending().await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.replicated, 0);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].key, ana.canonical_key().as_str());
    assert_eq!(h.service.journal().len().await, 1);

    h.ctx.kv.set_available(true);
    let report = h.service.repair_pending().await.unwrap();
    assert_eq!(report.replicated, 1);
    assert!(h.service.journal().is_empty().await);
}

#[tokio::test]
async fn test_promotion_rolls_back_when_mirror_fails() {
    let h = harness();
    let book = h.product("Book", 12.0).await;
    let ext = "3d3f1c8e-8f0a-4b8e-9a55-2f1d4c7b6e01";
    h.ctx
        .graph
        .merge_person(&PersonNode::new(ext).with_name("Zed"))
        .await
        .unwrap();
    h.ctx.document.set_available(false);

    let err = h
        .service
        .record_purchase(&ClientRef::external(ext), book, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConsolidationError::PartialWriteFailure {
            compensated: true,
            ..
        }
    ));
    assert_eq!(h.ctx.relational.count(Table::Clients).await, 0);
    assert_eq!(h.ctx.relational.count(Table::Purchases).await, 0);
    assert!(h.ctx.graph.get_person(ext).await.unwrap().is_some());
}

#[tokio::test]
async fn test_update_fails_fast_when_graph_is_down() {
    let h = harness();
    let ana = h.client("Ana").await;
    h.ctx.graph.set_available(false);

    let err = h
        .service
        .update_client(&ana.client.reference(), ClientInput::named("Other", "2"))
        .await
        .unwrap_err();
    assert!(err.is_unavailable());

    h.ctx.graph.set_available(true);
    let record = h.build(&ana.client.reference()).await;
    assert_eq!(record.client.name, "Ana");
    let mirror = h
        .ctx
        .document
        .find_one(CLIENTS, &Filter::eq("client_id", ana.canonical_key().as_str()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mirror["name"], "Ana");
}

#[tokio::test]
async fn test_create_succeeds_while_cache_is_down() {
    let h = harness();
    h.ctx.kv.set_available(false);

    let ana = h.client("Ana").await;
    assert_eq!(ana.client.name, "Ana");

    h.ctx.kv.set_available(true);
    assert!(!h.ctx.kv.exists(&format!("client:{}", ana.canonical_key())).await.unwrap());
    let record = h.service.get_client(&ana.client.reference()).await.unwrap();
    assert_eq!(record, ana);
}

#[tokio::test]
async fn test_purge_drops_journal() {
    let h = harness();
    h.raw_client(json!({"id": 1, "name": "Ana"})).await;
    let ana = h.build(&ClientRef::internal(1)).await;
    h.ctx.graph.merge_person(&ana.client.person_node()).await.unwrap();
    h.ctx.graph.set_available(false);
    h.service.delete_client(&ClientRef::internal(1)).await.unwrap_err();
    assert_eq!(h.service.journal().len().await, 1);

    h.ctx.graph.set_available(true);
    h.service.purge_all().await.unwrap();
    assert!(h.service.journal().is_empty().await);
}
