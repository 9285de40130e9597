// SPDX-License-Identifier: PMPL-1.0-or-later
//! Co-purchase recommendations from friends.
//!
//! Every purchase a friend made of a product the client does not own is
//! one vote for that product. Candidates are ranked by votes, ties keep
//! the order in which products were first seen (friends by id, then their
//! purchases by id), and the top N that still exist in the catalog are
//! returned.

use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument, warn};

use mosaic_document::DocumentStore;
use mosaic_graph::GraphStore;
use mosaic_kv::KeyValueStore;
use mosaic_relational::RelationalStore;

use crate::builder::{ConsolidationBuilder, ProductIndex};
use crate::cache::CacheReplicator;
use crate::config::ConsolidationConfig;
use crate::identity::{CanonicalKey, ClientRef};
use crate::model::{ConsolidatedClient, Recommendation};
use crate::ConsolidationError;

/// Rank candidate product ids by vote count. `purchases` is every friend
/// purchase in encounter order; owned products never appear.
pub fn rank_candidates<I>(owned: &HashSet<i64>, purchases: I) -> Vec<(i64, u32)>
where
    I: IntoIterator<Item = i64>,
{
    let mut order: Vec<i64> = Vec::new();
    let mut votes: HashMap<i64, u32> = HashMap::new();

    for product_id in purchases {
        if owned.contains(&product_id) {
            continue;
        }
        let count = votes.entry(product_id).or_insert_with(|| {
            order.push(product_id);
            0
        });
        *count += 1;
    }

    let mut ranked: Vec<(i64, u32)> = order
        .into_iter()
        .map(|id| (id, votes.get(&id).copied().unwrap_or(0)))
        .collect();
    // Stable: equal scores keep first-encounter order.
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
}

/// Computes and persists recommendations.
pub struct RecommendationEngine<R, D, G, K>
where
    R: RelationalStore + ?Sized,
    D: DocumentStore + ?Sized,
    G: GraphStore + ?Sized,
    K: KeyValueStore + ?Sized,
{
    builder: ConsolidationBuilder<R, D, G>,
    cache: CacheReplicator<K>,
    top_n: usize,
    persist_degraded: bool,
}

impl<R, D, G, K> RecommendationEngine<R, D, G, K>
where
    R: RelationalStore + ?Sized,
    D: DocumentStore + ?Sized,
    G: GraphStore + ?Sized,
    K: KeyValueStore + ?Sized,
{
    pub fn new(
        builder: ConsolidationBuilder<R, D, G>,
        cache: CacheReplicator<K>,
        config: &ConsolidationConfig,
    ) -> Self {
        Self {
            builder,
            cache,
            top_n: config.recommendation_top_n,
            persist_degraded: config.cache_degraded_records,
        }
    }

    pub fn top_n(&self) -> usize {
        self.top_n
    }

    /// Recommendations for `reference`, persisted as a standalone list and
    /// embedded in the cached record. An unknown client yields an empty
    /// list and nothing is written.
    ///
    /// When the client's own build was degraded (friends or profile store
    /// unreachable) the list is returned but only persisted if degraded
    /// records may be cached.
    #[instrument(skip(self), fields(reference = %reference))]
    pub async fn compute(&self, reference: &ClientRef) -> Result<Vec<Recommendation>, ConsolidationError> {
        let outcome = match self.builder.build_with_diagnostics(reference).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_not_found() => {
                debug!("No such client, nothing to recommend");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let catalog = self.builder.load_products().await?;
        let recommendations = self.rank(&outcome.record, &catalog).await?;

        let key = outcome.record.canonical_key();
        if outcome.is_degraded() && !self.persist_degraded {
            warn!(
                key = %key,
                degraded = ?outcome.degraded,
                "Not persisting recommendations from a degraded build"
            );
            return Ok(recommendations);
        }

        let mut record = outcome.record;
        self.cache.store_recommendations(&key, &recommendations).await?;
        record.recommendations = Some(recommendations.clone());
        self.cache.replicate(&record).await?;

        info!(key = %key, count = recommendations.len(), "Recommendations stored");
        Ok(recommendations)
    }

    /// Rank without persisting anything.
    pub async fn preview(&self, reference: &ClientRef) -> Result<Vec<Recommendation>, ConsolidationError> {
        let record = self.builder.build(reference).await?;
        let catalog = self.builder.load_products().await?;
        self.rank(&record, &catalog).await
    }

    /// Purchases of one friend in id order. `None` when the friend has no
    /// usable client data; store outages still propagate.
    async fn friend_purchases(
        &self,
        friend_key: &CanonicalKey,
        catalog: &ProductIndex,
    ) -> Result<Option<Vec<i64>>, ConsolidationError> {
        let Ok(friend_ref) = friend_key.to_ref() else {
            debug!(friend = %friend_key, "Friend key is not a client reference, skipping");
            return Ok(None);
        };
        let client = match self.builder.resolver().find(&friend_ref).await {
            Ok(Some(client)) => client,
            Ok(None) => {
                debug!(friend = %friend_key, "Friend has no client row, skipping");
                return Ok(None);
            }
            Err(e) if e.is_unavailable() => return Err(e),
            Err(e) => {
                warn!(friend = %friend_key, error = %e, "Skipping friend with unreadable client row");
                return Ok(None);
            }
        };
        match self.builder.build_for(client, catalog).await {
            Ok(outcome) => Ok(Some(
                outcome
                    .record
                    .purchases
                    .iter()
                    .map(|p| p.purchase.product_id)
                    .collect(),
            )),
            Err(e) if e.is_unavailable() => Err(e),
            Err(e) => {
                warn!(friend = %friend_key, error = %e, "Skipping friend whose record does not build");
                Ok(None)
            }
        }
    }

    async fn rank(
        &self,
        record: &ConsolidatedClient,
        catalog: &ProductIndex,
    ) -> Result<Vec<Recommendation>, ConsolidationError> {
        let owned = record.owned_product_ids();
        let mut friend_purchases = Vec::new();

        for friend in &record.friends {
            let friend_key = CanonicalKey::from_stored(friend.id.as_str());
            if let Some(purchases) = self.friend_purchases(&friend_key, catalog).await? {
                friend_purchases.extend(purchases);
            }
        }

        let ranked = rank_candidates(&owned, friend_purchases);
        let recommendations = ranked
            .into_iter()
            .take(self.top_n)
            .filter_map(|(product_id, score)| match catalog.get(&product_id) {
                Some(product) => Some(Recommendation {
                    product: product.clone(),
                    score,
                }),
                None => {
                    warn!(product_id, "Recommended product left the catalog, dropping");
                    None
                }
            })
            .collect();
        Ok(recommendations)
    }
}
