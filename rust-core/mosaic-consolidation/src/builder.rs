// SPDX-License-Identifier: PMPL-1.0-or-later
//! Consolidation builder: the single read-only join across stores.
//!
//! The relational store is authoritative. If it cannot answer, the build
//! fails. The document and graph stores only contribute optional fields,
//! so when either is unreachable the field degrades (no profile, no
//! friends) and the outcome records which stores were skipped.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use mosaic_document::{DocumentStore, Filter, PROFILES};
use mosaic_graph::{GraphStore, PersonNode, FRIEND};
use mosaic_relational::{RelationalQuery, RelationalStore};

use crate::identity::{CanonicalKey, ClientRef, IdentityResolver};
use crate::model::{Client, ConsolidatedClient, Product, Profile, Purchase, PurchaseDetail};
use crate::{ConsolidationError, StoreKind};

/// Product catalog indexed by id, loaded once per build or rebuild.
pub type ProductIndex = HashMap<i64, Product>;

/// A built record plus the stores that could not contribute to it.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOutcome {
    pub record: ConsolidatedClient,
    pub degraded: Vec<StoreKind>,
}

impl BuildOutcome {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

/// Joins relational, document and graph data into a [`ConsolidatedClient`].
pub struct ConsolidationBuilder<R, D, G>
where
    R: RelationalStore + ?Sized,
    D: DocumentStore + ?Sized,
    G: GraphStore + ?Sized,
{
    resolver: IdentityResolver<R>,
    document: Arc<D>,
    graph: Arc<G>,
}

impl<R, D, G> Clone for ConsolidationBuilder<R, D, G>
where
    R: RelationalStore + ?Sized,
    D: DocumentStore + ?Sized,
    G: GraphStore + ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            document: Arc::clone(&self.document),
            graph: Arc::clone(&self.graph),
        }
    }
}

impl<R, D, G> ConsolidationBuilder<R, D, G>
where
    R: RelationalStore + ?Sized,
    D: DocumentStore + ?Sized,
    G: GraphStore + ?Sized,
{
    pub fn new(relational: Arc<R>, document: Arc<D>, graph: Arc<G>) -> Self {
        Self {
            resolver: IdentityResolver::new(relational),
            document,
            graph,
        }
    }

    pub fn resolver(&self) -> &IdentityResolver<R> {
        &self.resolver
    }

    /// Load and index the whole product catalog. Malformed product rows are
    /// skipped, so purchases of them embed no product.
    pub async fn load_products(&self) -> Result<ProductIndex, ConsolidationError> {
        let rows = self
            .resolver
            .relational()
            .query(&RelationalQuery::AllProducts)
            .await?;

        let mut index = ProductIndex::with_capacity(rows.len());
        for row in &rows {
            match Product::from_row(row) {
                Ok(product) => {
                    index.insert(product.id, product);
                }
                Err(ConsolidationError::MalformedRecord { key, message }) => {
                    warn!(key = %key, error = %message, "Skipping malformed product row");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(index)
    }

    /// Build the record for `reference`. `NotFound` if no relational row.
    #[instrument(skip(self), fields(reference = %reference))]
    pub async fn build(&self, reference: &ClientRef) -> Result<ConsolidatedClient, ConsolidationError> {
        Ok(self.build_with_diagnostics(reference).await?.record)
    }

    /// Like [`build`](Self::build), also reporting degraded stores.
    pub async fn build_with_diagnostics(
        &self,
        reference: &ClientRef,
    ) -> Result<BuildOutcome, ConsolidationError> {
        let client = self.resolver.resolve(reference).await?;
        let products = self.load_products().await?;
        self.build_for(client, &products).await
    }

    /// Build for an already resolved client against a preloaded catalog.
    pub async fn build_for(
        &self,
        client: Client,
        products: &ProductIndex,
    ) -> Result<BuildOutcome, ConsolidationError> {
        let key = client.canonical_key();
        let mut degraded = Vec::new();

        let mut purchases = self
            .resolver
            .relational()
            .query(&RelationalQuery::PurchasesByClient(client.id))
            .await?
            .iter()
            .map(Purchase::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        purchases.sort_by_key(|p| p.id);

        let purchases: Vec<PurchaseDetail> = purchases
            .into_iter()
            .map(|purchase| {
                let product = products.get(&purchase.product_id).cloned();
                if product.is_none() {
                    debug!(key = %key, product_id = purchase.product_id, "Purchase references missing product");
                }
                PurchaseDetail { purchase, product }
            })
            .collect();

        let profile = self.fetch_profile(&key, &mut degraded).await?;
        let friends = self.fetch_friends(&key, &mut degraded).await?;

        debug!(
            key = %key,
            purchases = purchases.len(),
            friends = friends.len(),
            has_profile = profile.is_some(),
            "Built consolidated record"
        );

        Ok(BuildOutcome {
            record: ConsolidatedClient {
                client,
                profile,
                friends,
                purchases,
                recommendations: None,
            },
            degraded,
        })
    }

    async fn fetch_profile(
        &self,
        key: &CanonicalKey,
        degraded: &mut Vec<StoreKind>,
    ) -> Result<Option<Profile>, ConsolidationError> {
        let filter = Filter::eq("client_id", key.as_str());
        match self.document.find_one(PROFILES, &filter).await {
            Ok(Some(doc)) => match Profile::from_document(&doc) {
                Ok(profile) => Ok(Some(profile)),
                Err(e) => {
                    warn!(key = %key, error = %e, "Ignoring malformed profile");
                    degraded.push(StoreKind::Document);
                    Ok(None)
                }
            },
            Ok(None) => Ok(None),
            Err(e) if e.is_unavailable() => {
                warn!(key = %key, store = %StoreKind::Document, error = %e, "Profile unavailable, building without it");
                degraded.push(StoreKind::Document);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_friends(
        &self,
        key: &CanonicalKey,
        degraded: &mut Vec<StoreKind>,
    ) -> Result<Vec<PersonNode>, ConsolidationError> {
        match self.graph.neighbours(key.as_str(), FRIEND).await {
            Ok(friends) => Ok(friends),
            Err(e) if e.is_unavailable() => {
                warn!(key = %key, store = %StoreKind::Graph, error = %e, "Friends unavailable, building without them");
                degraded.push(StoreKind::Graph);
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }
}
