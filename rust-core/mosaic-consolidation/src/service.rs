// SPDX-License-Identifier: PMPL-1.0-or-later
//! Client write path and cached reads.
//!
//! Every mutation touching more than one store runs as a [`Saga`]. After
//! the stores agree again the affected clients are rebuilt and their cache
//! entries replaced, so the cache only ever holds a view derivable from the
//! stores (plus embedded recommendations, which the next rebuild drops).

use chrono::{NaiveDate, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use mosaic_document::{DocumentStore, Filter, CLIENTS, PROFILES};
use mosaic_graph::{GraphEdge, GraphStore, PersonNode};
use mosaic_kv::KeyValueStore;
use mosaic_relational::{ClientKey, RelationalCommand, RelationalQuery, RelationalStore, Row};

use crate::builder::ConsolidationBuilder;
use crate::cache::{CacheReplicator, RebuildFailure, RebuildReport};
use crate::config::ConsolidationConfig;
use crate::context::StoreContext;
use crate::identity::{CanonicalKey, ClientRef};
use crate::model::{Client, ClientInput, ConsolidatedClient, Profile, PurchaseDetail, Recommendation};
use crate::recommend::RecommendationEngine;
use crate::saga::{compensation, Compensation, Saga, SagaJournal};
use crate::{ConsolidationError, StoreKind};

fn client_filter(key: &CanonicalKey) -> Filter {
    Filter::eq("client_id", key.as_str())
}

/// Entry point for callers: writes, reads, rebuilds and recommendations.
pub struct ClientService<R, D, G, K>
where
    R: RelationalStore + ?Sized,
    D: DocumentStore + ?Sized,
    G: GraphStore + ?Sized,
    K: KeyValueStore + ?Sized,
{
    ctx: StoreContext<R, D, G, K>,
    config: ConsolidationConfig,
    builder: ConsolidationBuilder<R, D, G>,
    cache: CacheReplicator<K>,
    recommender: RecommendationEngine<R, D, G, K>,
    journal: SagaJournal,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl<R, D, G, K> ClientService<R, D, G, K>
where
    R: RelationalStore + ?Sized + 'static,
    D: DocumentStore + ?Sized + 'static,
    G: GraphStore + ?Sized + 'static,
    K: KeyValueStore + ?Sized + 'static,
{
    pub fn new(ctx: StoreContext<R, D, G, K>, config: ConsolidationConfig) -> Self {
        let builder = ConsolidationBuilder::new(
            Arc::clone(&ctx.relational),
            Arc::clone(&ctx.document),
            Arc::clone(&ctx.graph),
        );
        let cache = CacheReplicator::new(Arc::clone(&ctx.kv), &config);
        let recommender = RecommendationEngine::new(builder.clone(), cache.clone(), &config);
        Self {
            ctx,
            config,
            builder,
            cache,
            recommender,
            journal: SagaJournal::new(),
            background: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &StoreContext<R, D, G, K> {
        &self.ctx
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    pub fn builder(&self) -> &ConsolidationBuilder<R, D, G> {
        &self.builder
    }

    pub fn cache(&self) -> &CacheReplicator<K> {
        &self.cache
    }

    pub fn recommender(&self) -> &RecommendationEngine<R, D, G, K> {
        &self.recommender
    }

    pub fn journal(&self) -> &SagaJournal {
        &self.journal
    }

    fn saga(&self, name: &str, key: &CanonicalKey) -> Saga {
        Saga::new(name, self.config.compensate_on_failure, self.journal.clone()).for_client(key)
    }

    // -----------------------------------------------------------------------
    // Core operations
    // -----------------------------------------------------------------------

    /// Resolve a reference to its relational row id.
    pub async fn resolve_client(&self, reference: &ClientRef) -> Result<i64, ConsolidationError> {
        Ok(self.builder.resolver().resolve(reference).await?.id)
    }

    pub async fn build_consolidated(
        &self,
        reference: &ClientRef,
    ) -> Result<ConsolidatedClient, ConsolidationError> {
        self.builder.build(reference).await
    }

    pub async fn replicate(&self, record: &ConsolidatedClient) -> Result<(), ConsolidationError> {
        self.cache.replicate(record).await
    }

    pub async fn rebuild_all_caches(&self) -> Result<RebuildReport, ConsolidationError> {
        self.cache.rebuild_all(&self.builder).await
    }

    pub async fn compute_recommendations(
        &self,
        reference: &ClientRef,
    ) -> Result<Vec<Recommendation>, ConsolidationError> {
        self.recommender.compute(reference).await
    }

    /// Build and replicate synchronously.
    async fn refresh(&self, reference: &ClientRef) -> Result<ConsolidatedClient, ConsolidationError> {
        let record = self.builder.build(reference).await?;
        self.cache.replicate(&record).await?;
        Ok(record)
    }

    /// Bring the cache entry for `key` in line with the stores: rebuilt when
    /// a client row exists, evicted when it does not.
    async fn resync(&self, key: &CanonicalKey) -> Result<Option<ConsolidatedClient>, ConsolidationError> {
        let Ok(reference) = key.to_ref() else {
            debug!(key = %key, "Key names no client, nothing to resync");
            return Ok(None);
        };
        match self.refresh(&reference).await {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.is_not_found() => {
                self.cache.evict(key).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    // -----------------------------------------------------------------------
    // Write path
    // -----------------------------------------------------------------------

    async fn insert_client_row(&self, row: Row) -> Result<Client, ConsolidationError> {
        let inserted = self
            .ctx
            .relational
            .execute(&RelationalCommand::InsertClient(row), true)
            .await?
            .ok_or_else(|| ConsolidationError::Store {
                store: StoreKind::Relational,
                message: "insert returned no row".to_string(),
            })?;
        Client::from_row(&inserted)
    }

    async fn write_mirror(&self, client: &Client) -> Result<(), ConsolidationError> {
        let doc = client.mirror_document()?;
        self.ctx
            .document
            .upsert(CLIENTS, &client_filter(&client.canonical_key()), doc)
            .await?;
        Ok(())
    }

    fn undo_insert_client(&self, key: ClientKey) -> Compensation {
        let relational = Arc::clone(&self.ctx.relational);
        compensation(move || async move {
            relational
                .execute(&RelationalCommand::DeleteClient(key), false)
                .await?;
            Ok::<(), ConsolidationError>(())
        })
    }

    /// Restore the mirror document that existed before, or remove the new one.
    fn undo_mirror(&self, key: &CanonicalKey, previous: Option<mosaic_document::Document>) -> Compensation {
        let document = Arc::clone(&self.ctx.document);
        let filter = client_filter(key);
        compensation(move || async move {
            match previous {
                Some(doc) => {
                    document.upsert(CLIENTS, &filter, doc).await?;
                }
                None => {
                    document.delete_one(CLIENTS, &filter).await?;
                }
            }
            Ok::<(), ConsolidationError>(())
        })
    }

    /// Restore the person node that existed before, or remove the new one.
    fn undo_person(&self, key: &CanonicalKey, previous: Option<PersonNode>) -> Compensation {
        let graph = Arc::clone(&self.ctx.graph);
        let id = key.as_str().to_string();
        compensation(move || async move {
            match previous {
                Some(node) => {
                    graph.merge_person(&node).await?;
                }
                None => {
                    graph.delete_person(&id).await?;
                }
            }
            Ok::<(), ConsolidationError>(())
        })
    }

    /// Create a client in every store and replicate it in the background.
    ///
    /// The external id is generated unless the input carries one, which must
    /// then be a UUID.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_client(&self, input: ClientInput) -> Result<ConsolidatedClient, ConsolidationError> {
        let (external_id, supplied) = match input.external_id.as_deref() {
            Some(raw) => {
                let parsed = Uuid::parse_str(raw).map_err(|e| {
                    ConsolidationError::InvalidReference(format!("external id '{}': {}", raw, e))
                })?;
                (parsed.hyphenated().to_string(), true)
            }
            None => (Uuid::new_v4().to_string(), false),
        };
        let key = CanonicalKey::from_stored(external_id.clone());

        // A supplied id may already name a graph-only person.
        let previous_person = if supplied {
            self.ctx.graph.get_person(key.as_str()).await?
        } else {
            None
        };

        let mut row = input.to_row()?;
        row.insert("external_id".to_string(), Value::from(external_id.clone()));

        let mut saga = self.saga("create_client", &key);
        let client = saga
            .step("insert_client_row", StoreKind::Relational, self.insert_client_row(row), |_| {
                Some(self.undo_insert_client(ClientKey::ExternalId(external_id.clone())))
            })
            .await?;
        saga.step("mirror_identity", StoreKind::Document, self.write_mirror(&client), |_| {
            Some(self.undo_mirror(&key, None))
        })
        .await?;
        saga.step(
            "merge_person",
            StoreKind::Graph,
            self.ctx.graph.merge_person(&client.person_node()),
            |_| Some(self.undo_person(&key, previous_person.clone())),
        )
        .await?;
        saga.complete();

        let record = self.builder.build(&client.reference()).await?;
        let handle = self
            .cache
            .refresh_in_background(self.builder.clone(), client.reference());
        let mut background = self.background.lock().await;
        background.retain(|h| !h.is_finished());
        background.push(handle);
        drop(background);

        info!(key = %key, internal_id = client.id, "Created client");
        Ok(record)
    }

    /// Update identity fields everywhere, then rebuild and replicate.
    /// The external id never changes.
    #[instrument(skip(self, input), fields(reference = %reference))]
    pub async fn update_client(
        &self,
        reference: &ClientRef,
        input: ClientInput,
    ) -> Result<ConsolidatedClient, ConsolidationError> {
        let current = self.builder.resolver().resolve(reference).await?;
        let key = current.canonical_key();
        let previous_mirror = self.ctx.document.find_one(CLIENTS, &client_filter(&key)).await?;
        let previous_person = self.ctx.graph.get_person(key.as_str()).await?;
        let previous_row = current.to_row()?;
        let changes = input.to_row()?;

        let mut saga = self.saga("update_client", &key);
        let relational = Arc::clone(&self.ctx.relational);
        let updated = saga
            .step(
                "update_client_row",
                StoreKind::Relational,
                async {
                    let row = self
                        .ctx
                        .relational
                        .execute(
                            &RelationalCommand::UpdateClient {
                                key: ClientKey::Id(current.id),
                                changes,
                            },
                            true,
                        )
                        .await?
                        .ok_or_else(|| ConsolidationError::NotFound(format!("client {}", reference)))?;
                    Client::from_row(&row)
                },
                |_| {
                    let id = current.id;
                    Some(compensation(move || async move {
                        relational
                            .execute(
                                &RelationalCommand::UpdateClient {
                                    key: ClientKey::Id(id),
                                    changes: previous_row,
                                },
                                false,
                            )
                            .await?;
                        Ok::<(), ConsolidationError>(())
                    }))
                },
            )
            .await?;
        saga.step("mirror_identity", StoreKind::Document, self.write_mirror(&updated), |_| {
            Some(self.undo_mirror(&key, previous_mirror.clone()))
        })
        .await?;
        saga.step(
            "merge_person",
            StoreKind::Graph,
            self.ctx.graph.merge_person(&updated.person_node()),
            |_| Some(self.undo_person(&key, previous_person.clone())),
        )
        .await?;
        saga.complete();

        let record = self.refresh(&updated.reference()).await?;
        info!(key = %key, "Updated client");
        Ok(record)
    }

    /// Remove a client from every store and the cache. Returns the record as
    /// it was just before deletion.
    ///
    /// Deletes cannot be undone, so a failure part-way leaves a journal entry
    /// for [`repair_pending`](Self::repair_pending).
    #[instrument(skip(self), fields(reference = %reference))]
    pub async fn delete_client(&self, reference: &ClientRef) -> Result<ConsolidatedClient, ConsolidationError> {
        let record = self.builder.build(reference).await?;
        let key = record.canonical_key();
        let filter = client_filter(&key);

        let mut saga = self.saga("delete_client", &key);
        saga.step(
            "delete_client_row",
            StoreKind::Relational,
            self.ctx
                .relational
                .execute(&RelationalCommand::DeleteClient(ClientKey::Id(record.client.id)), false),
            |_| None,
        )
        .await?;
        saga.step(
            "delete_profile",
            StoreKind::Document,
            self.ctx.document.delete_many(PROFILES, &filter),
            |_| None,
        )
        .await?;
        saga.step(
            "delete_identity_mirror",
            StoreKind::Document,
            self.ctx.document.delete_many(CLIENTS, &filter),
            |_| None,
        )
        .await?;
        saga.step(
            "delete_person",
            StoreKind::Graph,
            self.ctx.graph.delete_person(key.as_str()),
            |_| None,
        )
        .await?;
        saga.step("evict_cache", StoreKind::Kv, self.cache.evict(&key), |_| None)
            .await?;
        saga.complete();

        // Former friends still list the deleted person in their cached view.
        for friend in &record.friends {
            let friend_key = CanonicalKey::from_stored(friend.id.as_str());
            if let Err(e) = self.resync(&friend_key).await {
                warn!(key = %key, friend = %friend_key, error = %e, "Failed to refresh former friend");
            }
        }

        info!(key = %key, "Deleted client");
        Ok(record)
    }

    /// Record a purchase and refresh the buyer's cached view.
    ///
    /// An external id with no client row but an existing person node is
    /// promoted to a client first. `date` defaults to today (UTC).
    #[instrument(skip(self), fields(reference = %reference))]
    pub async fn record_purchase(
        &self,
        reference: &ClientRef,
        product_id: i64,
        date: Option<NaiveDate>,
    ) -> Result<ConsolidatedClient, ConsolidationError> {
        let date = date.unwrap_or_else(|| Utc::now().date_naive());

        let product = self
            .ctx
            .relational
            .query(&RelationalQuery::ProductById(product_id))
            .await?;
        if product.is_empty() {
            return Err(ConsolidationError::NotFound(format!("product {}", product_id)));
        }

        let existing = self.builder.resolver().find(reference).await?;
        let (client, mut saga) = match existing {
            Some(client) => {
                let saga = self.saga("record_purchase", &client.canonical_key());
                (client, saga)
            }
            None => {
                let ClientRef::ByExternalId(external_id) = reference else {
                    return Err(ConsolidationError::NotFound(format!("client {}", reference)));
                };
                let Some(person) = self.ctx.graph.get_person(external_id).await? else {
                    return Err(ConsolidationError::NotFound(format!("client {}", reference)));
                };
                let key = CanonicalKey::from_stored(external_id.clone());
                let mut saga = self.saga("record_purchase", &key);
                let client = self.promote_person(&mut saga, external_id, person).await?;
                (client, saga)
            }
        };

        let relational = Arc::clone(&self.ctx.relational);
        let mut purchase = Row::new();
        purchase.insert("client_id".to_string(), Value::from(client.id));
        purchase.insert("product_id".to_string(), Value::from(product_id));
        purchase.insert("purchase_date".to_string(), Value::from(date.to_string()));

        saga.step(
            "insert_purchase",
            StoreKind::Relational,
            self.ctx
                .relational
                .execute(&RelationalCommand::InsertPurchase(purchase), true),
            |inserted| {
                let id = inserted.as_ref().and_then(|row| row.get("id")).and_then(Value::as_i64)?;
                Some(compensation(move || async move {
                    relational
                        .execute(&RelationalCommand::DeletePurchase(id), false)
                        .await?;
                    Ok::<(), ConsolidationError>(())
                }))
            },
        )
        .await?;
        saga.complete();

        debug!(client_id = client.id, product_id, %date, "Purchase recorded");
        self.refresh(&client.reference()).await
    }

    /// Turn a graph-only person into a client row plus identity mirror.
    async fn promote_person(
        &self,
        saga: &mut Saga,
        external_id: &str,
        person: PersonNode,
    ) -> Result<Client, ConsolidationError> {
        let mut row = Row::new();
        row.insert("external_id".to_string(), Value::from(external_id));
        row.insert(
            "name".to_string(),
            Value::from(person.name.clone().unwrap_or_default()),
        );
        row.insert(
            "cpf".to_string(),
            person.cpf.clone().map(Value::from).unwrap_or(Value::Null),
        );

        let client = saga
            .step("promote_person", StoreKind::Relational, self.insert_client_row(row), |_| {
                Some(self.undo_insert_client(ClientKey::ExternalId(external_id.to_string())))
            })
            .await?;
        let key = client.canonical_key();
        saga.step("mirror_identity", StoreKind::Document, self.write_mirror(&client), |_| {
            Some(self.undo_mirror(&key, None))
        })
        .await?;

        info!(key = %key, internal_id = client.id, "Promoted person to client");
        Ok(client)
    }

    /// Make two people friends in both directions.
    #[instrument(skip(self))]
    pub async fn befriend(&self, a: &str, b: &str) -> Result<(), ConsolidationError> {
        if a == b {
            return Err(ConsolidationError::InvalidReference(format!(
                "{} cannot befriend itself",
                a
            )));
        }
        for id in [a, b] {
            if self.ctx.graph.get_person(id).await?.is_none() {
                return Err(ConsolidationError::NotFound(format!("person {}", id)));
            }
        }

        let key_a = CanonicalKey::from_stored(a);
        let mut saga = self.saga("befriend", &key_a);
        for edge in [GraphEdge::friend(a, b), GraphEdge::friend(b, a)] {
            let existed = self.ctx.graph.exists(&edge).await?;
            let graph = Arc::clone(&self.ctx.graph);
            let undo_edge = edge.clone();
            saga.step("insert_friend_edge", StoreKind::Graph, self.ctx.graph.insert(&edge), |_| {
                if existed {
                    return None;
                }
                Some(compensation(move || async move {
                    graph.delete(&undo_edge).await?;
                    Ok::<(), ConsolidationError>(())
                }))
            })
            .await?;
        }
        saga.complete();

        self.resync(&key_a).await?;
        self.resync(&CanonicalKey::from_stored(b)).await?;
        info!(a, b, "Friendship created");
        Ok(())
    }

    /// Remove a friendship in both directions. Returns whether any edge
    /// existed.
    #[instrument(skip(self))]
    pub async fn unfriend(&self, a: &str, b: &str) -> Result<bool, ConsolidationError> {
        let key_a = CanonicalKey::from_stored(a);
        let mut saga = self.saga("unfriend", &key_a);
        let mut removed_any = false;

        for edge in [GraphEdge::friend(a, b), GraphEdge::friend(b, a)] {
            let graph = Arc::clone(&self.ctx.graph);
            let redo_edge = edge.clone();
            let removed = saga
                .step("delete_friend_edge", StoreKind::Graph, self.ctx.graph.delete(&edge), |removed| {
                    if !*removed {
                        return None;
                    }
                    Some(compensation(move || async move {
                        graph.insert(&redo_edge).await?;
                        Ok::<(), ConsolidationError>(())
                    }))
                })
                .await?;
            removed_any |= removed;
        }
        saga.complete();

        self.resync(&key_a).await?;
        self.resync(&CanonicalKey::from_stored(b)).await?;
        Ok(removed_any)
    }

    /// Create or replace a profile. Returns the refreshed record when the
    /// profile belongs to an existing client.
    #[instrument(skip(self, profile), fields(key = %profile.client_id))]
    pub async fn upsert_profile(
        &self,
        profile: Profile,
    ) -> Result<Option<ConsolidatedClient>, ConsolidationError> {
        let key = CanonicalKey::from_stored(profile.client_id.clone());
        self.ctx
            .document
            .upsert(PROFILES, &client_filter(&key), profile.to_document()?)
            .await?;
        self.resync(&key).await
    }

    /// Remove a profile. Returns whether one existed.
    #[instrument(skip(self))]
    pub async fn delete_profile(&self, key: &CanonicalKey) -> Result<bool, ConsolidationError> {
        let removed = self
            .ctx
            .document
            .delete_many(PROFILES, &client_filter(key))
            .await?;
        self.resync(key).await?;
        Ok(removed > 0)
    }

    // -----------------------------------------------------------------------
    // Read path
    // -----------------------------------------------------------------------

    async fn key_for(&self, reference: &ClientRef) -> Result<CanonicalKey, ConsolidationError> {
        match reference.known_key() {
            Some(key) => Ok(key),
            None => Ok(self.builder.resolver().resolve(reference).await?.canonical_key()),
        }
    }

    /// Cached record, or build, replicate and return on a miss.
    ///
    /// A record built while the document or graph store was unreachable is
    /// returned but only cached when `cache_degraded_records` is set.
    #[instrument(skip(self), fields(reference = %reference))]
    pub async fn get_client(&self, reference: &ClientRef) -> Result<ConsolidatedClient, ConsolidationError> {
        let key = self.key_for(reference).await?;

        match self.cache.fetch(&key).await {
            Ok(Some(record)) => {
                debug!(key = %key, "Cache hit");
                return Ok(record);
            }
            Ok(None) => debug!(key = %key, "Cache miss"),
            Err(e) if e.is_unavailable() => {
                warn!(key = %key, error = %e, "Cache unavailable, reading through");
            }
            Err(e) => return Err(e),
        }

        let outcome = self.builder.build_with_diagnostics(reference).await?;
        if outcome.is_degraded() && !self.config.cache_degraded_records {
            warn!(key = %key, degraded = ?outcome.degraded, "Not caching degraded record");
            return Ok(outcome.record);
        }

        match self.cache.replicate(&outcome.record).await {
            Ok(()) => {}
            Err(e) if e.is_unavailable() => {
                warn!(key = %key, error = %e, "Cache unavailable, record not replicated");
            }
            Err(e) => return Err(e),
        }
        Ok(outcome.record)
    }

    /// Every record currently in the cache.
    pub async fn list_cached_clients(&self) -> Result<Vec<ConsolidatedClient>, ConsolidationError> {
        self.cache.cached_records().await
    }

    /// Friends of every cached client, keyed by canonical key.
    pub async fn cached_friends(&self) -> Result<BTreeMap<String, Vec<PersonNode>>, ConsolidationError> {
        Ok(self
            .cache
            .cached_records()
            .await?
            .into_iter()
            .map(|r| (r.canonical_key().into_string(), r.friends))
            .collect())
    }

    /// Purchases of every cached client, keyed by canonical key.
    pub async fn cached_purchases(
        &self,
    ) -> Result<BTreeMap<String, Vec<PurchaseDetail>>, ConsolidationError> {
        Ok(self
            .cache
            .cached_records()
            .await?
            .into_iter()
            .map(|r| (r.canonical_key().into_string(), r.purchases))
            .collect())
    }

    /// The standalone recommendation list last stored for a client.
    pub async fn cached_recommendations(
        &self,
        reference: &ClientRef,
    ) -> Result<Vec<Recommendation>, ConsolidationError> {
        let key = self.key_for(reference).await?;
        self.cache.cached_recommendations(&key).await
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Resync the cache for every client named in the saga journal.
    ///
    /// Keys that still fail are journaled again.
    #[instrument(skip(self))]
    pub async fn repair_pending(&self) -> Result<RebuildReport, ConsolidationError> {
        let entries = self.journal.take_pending().await;
        let mut by_key = BTreeMap::new();
        for entry in entries {
            match entry.client_key.clone() {
                Some(key) => {
                    by_key.entry(key).or_insert_with(Vec::new).push(entry);
                }
                None => warn!(saga = %entry.saga, "Journal entry without client key, dropping"),
            }
        }

        let mut report = RebuildReport::default();
        for (key, entries) in by_key {
            report.processed += 1;
            match self.resync(&key).await {
                Ok(_) => report.replicated += 1,
                Err(e) => {
                    warn!(key = %key, error = %e, "Repair failed, keeping journal entry");
                    report.failures.push(RebuildFailure {
                        key: key.into_string(),
                        error: e.to_string(),
                    });
                    for entry in entries {
                        self.journal.record(entry).await;
                    }
                }
            }
        }

        info!(
            processed = report.processed,
            repaired = report.replicated,
            "Journal repair finished"
        );
        Ok(report)
    }

    /// Wait for every background replication spawned so far.
    pub async fn flush_background(&self) {
        let handles = std::mem::take(&mut *self.background.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background replication task did not finish");
            }
        }
    }

    /// Wipe every store and the journal.
    #[instrument(skip(self))]
    pub async fn purge_all(&self) -> Result<(), ConsolidationError> {
        self.ctx
            .relational
            .execute(&RelationalCommand::Truncate, false)
            .await?;
        let all = Filter::all();
        let profiles = self.ctx.document.delete_many(PROFILES, &all).await?;
        let mirrors = self.ctx.document.delete_many(CLIENTS, &all).await?;
        self.ctx.graph.clear().await?;
        self.ctx.kv.flush_all().await?;
        let dropped = self.journal.take_pending().await.len();

        info!(profiles, mirrors, dropped_journal = dropped, "Purged all stores");
        Ok(())
    }

    /// Clients named by the journal, deduplicated
    pub async fn pending_keys(&self) -> BTreeSet<CanonicalKey> {
        self.journal
            .pending()
            .await
            .into_iter()
            .filter_map(|e| e.client_key)
            .collect()
    }
}
