// SPDX-License-Identifier: PMPL-1.0-or-later
//! Shared fixtures for the consolidation integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};

use mosaic_consolidation::{
    ClientInput, ClientRef, ClientService, ConsolidatedClient, ConsolidationConfig, InMemoryContext,
    StoreContext,
};
use mosaic_document::InMemoryDocumentStore;
use mosaic_graph::SimpleGraphStore;
use mosaic_kv::InMemoryKeyValueStore;
use mosaic_relational::{InMemoryRelationalStore, RelationalCommand, RelationalStore, Row};

pub type TestService = ClientService<
    InMemoryRelationalStore,
    InMemoryDocumentStore,
    SimpleGraphStore,
    InMemoryKeyValueStore,
>;

pub struct Harness {
    pub ctx: InMemoryContext,
    pub service: TestService,
}

/// Route engine logs to the test writer. `RUST_LOG=debug` shows them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn harness() -> Harness {
    harness_with(ConsolidationConfig::default())
}

pub fn harness_with(config: ConsolidationConfig) -> Harness {
    init_tracing();
    let ctx = StoreContext::in_memory();
    let service = ClientService::new(ctx.clone(), config);
    Harness { ctx, service }
}

pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("rows must be objects, got {}", other),
    }
}

impl Harness {
    pub async fn product(&self, name: &str, price: f64) -> i64 {
        let inserted = self
            .ctx
            .relational
            .execute(
                &RelationalCommand::InsertProduct(row(json!({
                    "name": name, "price": price, "quantity": 10, "kind": "general"
                }))),
                true,
            )
            .await
            .unwrap()
            .unwrap();
        inserted["id"].as_i64().unwrap()
    }

    pub async fn client(&self, name: &str) -> ConsolidatedClient {
        let record = self
            .service
            .create_client(ClientInput::named(name, format!("{}-cpf", name)))
            .await
            .unwrap();
        self.service.flush_background().await;
        record
    }

    pub async fn buy(&self, record: &ConsolidatedClient, product_id: i64) {
        self.service
            .record_purchase(&record.client.reference(), product_id, None)
            .await
            .unwrap();
    }

    pub async fn befriend(&self, a: &ConsolidatedClient, b: &ConsolidatedClient) {
        self.service
            .befriend(a.canonical_key().as_str(), b.canonical_key().as_str())
            .await
            .unwrap();
    }

    /// Insert a client row directly, bypassing the service.
    pub async fn raw_client(&self, value: Value) {
        self.ctx
            .relational
            .execute(&RelationalCommand::InsertClient(row(value)), false)
            .await
            .unwrap();
    }

    /// Insert a product row directly, bypassing column checks.
    pub async fn raw_product(&self, value: Value) {
        self.ctx
            .relational
            .execute(&RelationalCommand::InsertProduct(row(value)), false)
            .await
            .unwrap();
    }

    /// Insert a purchase row directly, bypassing the service.
    pub async fn raw_purchase(&self, value: Value) {
        self.ctx
            .relational
            .execute(&RelationalCommand::InsertPurchase(row(value)), false)
            .await
            .unwrap();
    }

    pub async fn build(&self, reference: &ClientRef) -> ConsolidatedClient {
        self.service.build_consolidated(reference).await.unwrap()
    }
}
