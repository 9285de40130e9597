// SPDX-License-Identifier: PMPL-1.0-or-later
//! Cache replicator.
//!
//! Consolidated records live in a hash under `<client prefix>:<key>`, one
//! field holding the JSON record. Recommendation lists live in a list
//! under `<recommendation prefix>:<key>`. The cache holds nothing that a
//! rebuild cannot reproduce, apart from the embedded recommendations.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use mosaic_document::DocumentStore;
use mosaic_graph::GraphStore;
use mosaic_kv::{KeyValueStore, KvError, TypedStore};
use mosaic_relational::RelationalStore;

use crate::builder::ConsolidationBuilder;
use crate::config::ConsolidationConfig;
use crate::identity::{CanonicalKey, ClientRef};
use crate::model::{Client, ConsolidatedClient, Recommendation};
use crate::ConsolidationError;

/// One client a rebuild could not replicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildFailure {
    /// Canonical key, or the table/row id when the row did not parse
    pub key: String,
    pub error: String,
}

/// Outcome of a full or partial cache rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReport {
    pub processed: usize,
    pub replicated: usize,
    pub failures: Vec<RebuildFailure>,
}

impl RebuildReport {
    fn fail(&mut self, key: impl Into<String>, err: &ConsolidationError) {
        self.failures.push(RebuildFailure {
            key: key.into(),
            error: err.to_string(),
        });
    }
}

/// Writes consolidated records and recommendation lists to the cache.
pub struct CacheReplicator<K: KeyValueStore + ?Sized> {
    records: TypedStore<K>,
    recommendations: TypedStore<K>,
    record_field: String,
    scan_limit: usize,
}

impl<K: KeyValueStore + ?Sized> Clone for CacheReplicator<K> {
    fn clone(&self) -> Self {
        Self {
            records: self.records.clone(),
            recommendations: self.recommendations.clone(),
            record_field: self.record_field.clone(),
            scan_limit: self.scan_limit,
        }
    }
}

impl<K: KeyValueStore + ?Sized> CacheReplicator<K> {
    pub fn new(kv: Arc<K>, config: &ConsolidationConfig) -> Self {
        Self {
            records: TypedStore::new(Arc::clone(&kv), &config.client_key_prefix),
            recommendations: TypedStore::new(kv, &config.recommendation_key_prefix),
            record_field: config.record_field.clone(),
            scan_limit: config.rebuild_scan_limit,
        }
    }

    /// Physical cache key of a record
    pub fn record_key(&self, key: &CanonicalKey) -> String {
        self.records.key(key.as_str())
    }

    /// Physical cache key of a recommendation list
    pub fn recommendation_key(&self, key: &CanonicalKey) -> String {
        self.recommendations.key(key.as_str())
    }

    /// Store `record` under its canonical key, replacing any prior value.
    pub async fn replicate(&self, record: &ConsolidatedClient) -> Result<(), ConsolidationError> {
        let key = record.canonical_key();
        self.records
            .put_field(key.as_str(), &self.record_field, record)
            .await?;
        debug!(key = %key, "Replicated consolidated record");
        Ok(())
    }

    /// The cached record, or `None` on a miss. A payload that no longer
    /// decodes counts as a miss.
    pub async fn fetch(&self, key: &CanonicalKey) -> Result<Option<ConsolidatedClient>, ConsolidationError> {
        match self
            .records
            .get_field::<ConsolidatedClient>(key.as_str(), &self.record_field)
            .await
        {
            Ok(found) => Ok(found),
            Err(KvError::SerializationError(msg)) => {
                warn!(key = %key, error = %msg, "Discarding undecodable cached record");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove both the record and the recommendation list.
    pub async fn evict(&self, key: &CanonicalKey) -> Result<(), ConsolidationError> {
        self.records.delete(key.as_str()).await?;
        self.recommendations.delete(key.as_str()).await?;
        debug!(key = %key, "Evicted cache entries");
        Ok(())
    }

    pub async fn store_recommendations(
        &self,
        key: &CanonicalKey,
        recommendations: &[Recommendation],
    ) -> Result<(), ConsolidationError> {
        self.recommendations
            .replace_list(key.as_str(), recommendations)
            .await?;
        Ok(())
    }

    /// The standalone recommendation list, empty when none was stored.
    pub async fn cached_recommendations(
        &self,
        key: &CanonicalKey,
    ) -> Result<Vec<Recommendation>, ConsolidationError> {
        Ok(self.recommendations.list(key.as_str()).await?)
    }

    /// Canonical keys of every cached record
    pub async fn cached_keys(&self) -> Result<Vec<CanonicalKey>, ConsolidationError> {
        Ok(self
            .records
            .logical_keys(self.scan_limit)
            .await?
            .into_iter()
            .map(CanonicalKey::from_stored)
            .collect())
    }

    /// Every decodable cached record, in key order
    pub async fn cached_records(&self) -> Result<Vec<ConsolidatedClient>, ConsolidationError> {
        let mut records = Vec::new();
        for key in self.cached_keys().await? {
            if let Some(record) = self.fetch(&key).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Drop every record and recommendation list. Other keys survive.
    pub async fn clear(&self) -> Result<usize, ConsolidationError> {
        let records = self.records.clear(self.scan_limit).await?;
        let lists = self.recommendations.clear(self.scan_limit).await?;
        Ok(records + lists)
    }

    /// Clear the cache, then build and replicate every relational client.
    ///
    /// A client that fails to parse, build or replicate is logged and
    /// reported; the rest still go through. Only a failure to list the
    /// clients or the catalog aborts the rebuild.
    #[instrument(skip(self, builder))]
    pub async fn rebuild_all<R, D, G>(
        &self,
        builder: &ConsolidationBuilder<R, D, G>,
    ) -> Result<RebuildReport, ConsolidationError>
    where
        R: RelationalStore + ?Sized,
        D: DocumentStore + ?Sized,
        G: GraphStore + ?Sized,
    {
        let cleared = self.clear().await?;
        let rows = builder.resolver().all_rows().await?;
        let products = builder.load_products().await?;
        debug!(cleared, clients = rows.len(), products = products.len(), "Rebuilding cache");

        let mut report = RebuildReport::default();
        for row in &rows {
            report.processed += 1;

            let client = match Client::from_row(row) {
                Ok(client) => client,
                Err(e) => {
                    let key = match &e {
                        ConsolidationError::MalformedRecord { key, .. } => key.clone(),
                        _ => "clients/?".to_string(),
                    };
                    warn!(key = %key, error = %e, "Skipping malformed client row");
                    report.fail(key, &e);
                    continue;
                }
            };

            let key = client.canonical_key();
            let replicated = match builder.build_for(client, &products).await {
                Ok(outcome) => self.replicate(&outcome.record).await,
                Err(e) => Err(e),
            };
            match replicated {
                Ok(()) => report.replicated += 1,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to rebuild client");
                    report.fail(key.into_string(), &e);
                }
            }
        }

        info!(
            processed = report.processed,
            replicated = report.replicated,
            failed = report.failures.len(),
            "Cache rebuild finished"
        );
        Ok(report)
    }
}

impl<K: KeyValueStore + ?Sized + 'static> CacheReplicator<K> {
    /// Build and replicate `reference` on a background task. The record is
    /// built when the task runs, so it reflects the stores at that moment
    /// rather than at spawn time. Failures are logged only.
    pub fn refresh_in_background<R, D, G>(
        &self,
        builder: ConsolidationBuilder<R, D, G>,
        reference: ClientRef,
    ) -> JoinHandle<()>
    where
        R: RelationalStore + ?Sized + 'static,
        D: DocumentStore + ?Sized + 'static,
        G: GraphStore + ?Sized + 'static,
    {
        let cache = self.clone();
        tokio::spawn(async move {
            let replicated = match builder.build(&reference).await {
                Ok(record) => cache.replicate(&record).await,
                Err(e) => Err(e),
            };
            if let Err(e) = replicated {
                error!(reference = %reference, error = %e, "Background replication failed");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Product;
    use mosaic_kv::InMemoryKeyValueStore;
    use serde_json::json;

    fn record(id: i64, external: Option<&str>) -> ConsolidatedClient {
        serde_json::from_value(json!({
            "cliente": {"id": id, "external_id": external, "name": format!("c{}", id)},
            "perfil": null,
            "amigos": [],
            "compras": [],
        }))
        .unwrap()
    }

    fn replicator() -> (Arc<InMemoryKeyValueStore>, CacheReplicator<InMemoryKeyValueStore>) {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let cache = CacheReplicator::new(Arc::clone(&kv), &ConsolidationConfig::default());
        (kv, cache)
    }

    #[tokio::test]
    async fn test_replicate_uses_client_key_and_data_field() {
        let (kv, cache) = replicator();
        let rec = record(1, Some("e-1"));
        cache.replicate(&rec).await.unwrap();

        let raw = kv.hget("client:e-1", "data").await.unwrap().unwrap();
        assert!(raw.contains("\"cliente\""));
        assert_eq!(cache.fetch(&rec.canonical_key()).await.unwrap(), Some(rec));
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_a_miss() {
        let (kv, cache) = replicator();
        kv.hset("client:7", "data", "{broken").await.unwrap();
        let key = CanonicalKey::from_stored("7");
        assert!(cache.fetch(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_evict_removes_both_keys() {
        let (kv, cache) = replicator();
        let rec = record(3, None);
        let key = rec.canonical_key();
        cache.replicate(&rec).await.unwrap();
        cache
            .store_recommendations(
                &key,
                &[Recommendation {
                    product: Product {
                        id: 1,
                        name: "Book".into(),
                        price: 1.0,
                        quantity: 0,
                        kind: None,
                    },
                    score: 1,
                }],
            )
            .await
            .unwrap();
        assert_eq!(cache.cached_recommendations(&key).await.unwrap().len(), 1);

        cache.evict(&key).await.unwrap();
        assert!(cache.fetch(&key).await.unwrap().is_none());
        assert!(cache.cached_recommendations(&key).await.unwrap().is_empty());
        assert!(kv.is_empty().await);
    }

    #[tokio::test]
    async fn test_cached_records_and_clear() {
        let (kv, cache) = replicator();
        cache.replicate(&record(1, None)).await.unwrap();
        cache.replicate(&record(2, Some("x-2"))).await.unwrap();
        kv.set("unrelated", "keep").await.unwrap();

        let keys: Vec<_> = cache
            .cached_keys()
            .await
            .unwrap()
            .into_iter()
            .map(CanonicalKey::into_string)
            .collect();
        assert_eq!(keys, vec!["1", "x-2"]);
        assert_eq!(cache.cached_records().await.unwrap().len(), 2);

        assert_eq!(cache.clear().await.unwrap(), 2);
        assert!(cache.cached_records().await.unwrap().is_empty());
        assert!(kv.exists("unrelated").await.unwrap());
    }

    #[tokio::test]
    async fn test_background_refresh() {
        use mosaic_document::InMemoryDocumentStore;
        use mosaic_graph::SimpleGraphStore;
        use mosaic_relational::{InMemoryRelationalStore, RelationalCommand};

        let (kv, cache) = replicator();
        let relational = Arc::new(InMemoryRelationalStore::new());
        let client = match json!({"name": "Ana"}) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        relational
            .execute(&RelationalCommand::InsertClient(client), false)
            .await
            .unwrap();
        let builder = ConsolidationBuilder::new(
            relational,
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(SimpleGraphStore::new()),
        );

        cache
            .refresh_in_background(builder.clone(), ClientRef::internal(1))
            .await
            .unwrap();
        assert!(kv.exists("client:1").await.unwrap());

        // Unknown clients and cache outages are only logged.
        cache
            .refresh_in_background(builder.clone(), ClientRef::internal(9))
            .await
            .unwrap();
        kv.set_available(false);
        cache
            .refresh_in_background(builder, ClientRef::internal(1))
            .await
            .unwrap();
    }
}
