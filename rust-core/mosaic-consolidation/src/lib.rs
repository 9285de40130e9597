// SPDX-License-Identifier: PMPL-1.0-or-later
//! Mosaic Consolidation Engine
//!
//! One client, four stores. The relational store owns identity, purchases
//! and the product catalog; the document store owns profiles; the graph
//! store owns friendships; the key-value store caches the joined view.
//!
//! This crate joins them into a [`ConsolidatedClient`], replicates the
//! result to the cache, derives co-purchase recommendations from friends,
//! and runs multi-store writes as compensating sagas.
//!
//! ```rust
//! use mosaic_consolidation::{ClientInput, ClientService, ConsolidationConfig, StoreContext};
//!
//! # tokio_test::block_on(async {
//! let service = ClientService::new(StoreContext::in_memory(), ConsolidationConfig::default());
//! let created = service
//!     .create_client(ClientInput::named("Ana", "123.456.789-00"))
//!     .await
//!     .unwrap();
//! assert!(created.purchases.is_empty());
//! assert!(created.profile.is_none());
//! # });
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use mosaic_document::DocumentError;
use mosaic_graph::GraphError;
use mosaic_kv::KvError;
use mosaic_relational::RelationalError;

mod builder;
mod cache;
mod config;
mod context;
mod identity;
mod model;
mod recommend;
mod saga;
mod service;

pub use builder::{BuildOutcome, ConsolidationBuilder, ProductIndex};
pub use cache::{CacheReplicator, RebuildFailure, RebuildReport};
pub use config::ConsolidationConfig;
pub use context::{InMemoryContext, StoreContext};
pub use identity::{CanonicalKey, ClientRef, IdentityResolver};
pub use model::{
    Client, ClientInput, ConsolidatedClient, Product, Profile, Purchase, PurchaseDetail,
    Recommendation,
};
pub use recommend::{rank_candidates, RecommendationEngine};
pub use saga::{compensation, Compensation, JournalEntry, Saga, SagaJournal, SagaState};
pub use service::ClientService;

pub use mosaic_graph::PersonNode;

/// The four backing stores, for error attribution and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Relational,
    Document,
    Graph,
    Kv,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreKind::Relational => "relational",
            StoreKind::Document => "document",
            StoreKind::Graph => "graph",
            StoreKind::Kv => "kv",
        })
    }
}

/// Consolidation errors
#[derive(Error, Debug)]
pub enum ConsolidationError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{store} store unavailable: {message}")]
    StoreUnavailable { store: StoreKind, message: String },

    #[error(
        "Saga {saga} failed at step '{failed_step}' after {completed:?} (compensated: {compensated}): {cause}"
    )]
    PartialWriteFailure {
        saga: String,
        failed_step: String,
        completed: Vec<String>,
        compensated: bool,
        cause: String,
    },

    #[error("Malformed record {key}: {message}")]
    MalformedRecord { key: String, message: String },

    #[error("Invalid client reference: {0}")]
    InvalidReference(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("{store} store error: {message}")]
    Store { store: StoreKind, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ConsolidationError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConsolidationError::NotFound(_))
    }

    /// True when a store could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ConsolidationError::StoreUnavailable { .. })
    }

    fn from_store(store: StoreKind, unavailable: bool, message: String) -> Self {
        if unavailable {
            ConsolidationError::StoreUnavailable { store, message }
        } else {
            ConsolidationError::Store { store, message }
        }
    }
}

impl From<RelationalError> for ConsolidationError {
    fn from(e: RelationalError) -> Self {
        Self::from_store(StoreKind::Relational, e.is_unavailable(), e.to_string())
    }
}

impl From<DocumentError> for ConsolidationError {
    fn from(e: DocumentError) -> Self {
        Self::from_store(StoreKind::Document, e.is_unavailable(), e.to_string())
    }
}

impl From<GraphError> for ConsolidationError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::NotFound(id) => ConsolidationError::NotFound(format!("person {}", id)),
            other => Self::from_store(StoreKind::Graph, other.is_unavailable(), other.to_string()),
        }
    }
}

impl From<KvError> for ConsolidationError {
    fn from(e: KvError) -> Self {
        match e {
            KvError::SerializationError(msg) => ConsolidationError::Serialization(msg),
            other => Self::from_store(StoreKind::Kv, other.is_unavailable(), other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConsolidationError {
    fn from(e: serde_json::Error) -> Self {
        ConsolidationError::Serialization(e.to_string())
    }
}
