// SPDX-License-Identifier: PMPL-1.0-or-later
//! Mosaic Document Adapter
//!
//! Schemaless JSON documents grouped into named collections, addressed by
//! equality filters. Holds client profiles (age, interest tags) and the
//! identity mirror written on client creation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Collection holding client profiles.
pub const PROFILES: &str = "profiles";

/// Collection holding the identity mirror of relational clients.
pub const CLIENTS: &str = "clients";

/// A stored document: a JSON object.
pub type Document = Map<String, Value>;

/// Document adapter errors
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Document store unavailable: {0}")]
    Unavailable(String),

    #[error("Document operation timed out: {0}")]
    Timeout(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DocumentError {
    /// True for failures caused by the store being unreachable or slow.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, DocumentError::Unavailable(_) | DocumentError::Timeout(_))
    }
}

/// A conjunction of field equalities. The empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    /// Match every document
    pub fn all() -> Self {
        Self::default()
    }

    /// Match documents whose `field` equals `value`
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and(field, value)
    }

    /// Add another equality clause
    pub fn and(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((field.into(), value.into()));
        self
    }

    /// Check a document against every clause
    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses
            .iter()
            .all(|(field, value)| doc.get(field) == Some(value))
    }

    /// Copy the filter's fields into `doc` where absent, as an upsert does
    /// when it inserts.
    fn seed(&self, doc: &mut Document) {
        for (field, value) in &self.clauses {
            doc.entry(field.clone()).or_insert_with(|| value.clone());
        }
    }
}

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

/// Serialize any value into a [`Document`].
pub fn to_document<T: Serialize>(value: &T) -> Result<Document, DocumentError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(DocumentError::InvalidDocument(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

/// Document store trait
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// First document in `collection` matching `filter`
    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>, DocumentError>;

    /// Every document in `collection` matching `filter`, in insertion order
    async fn find_many(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, DocumentError>;

    /// Replace the first match of `filter` with `doc`, or insert `doc`
    /// (seeded with the filter's fields) when nothing matches
    async fn upsert(&self, collection: &str, filter: &Filter, doc: Document) -> Result<UpsertOutcome, DocumentError>;

    /// Delete the first match. Returns whether a document was removed.
    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool, DocumentError>;

    /// Delete every match, returning how many were removed
    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<usize, DocumentError>;
}

/// In-memory document store
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    online: AtomicBool,
}

impl InMemoryDocumentStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            online: AtomicBool::new(true),
        }
    }

    /// Toggle availability. While offline every operation fails with
    /// [`DocumentError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.online.store(available, Ordering::SeqCst);
    }

    /// Number of documents in a collection
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }

    fn check(&self, op: &str) -> Result<(), DocumentError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DocumentError::Unavailable(format!("{op}: document server unreachable")))
        }
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>, DocumentError> {
        self.check("find_one")?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| filter.matches(d)).cloned()))
    }

    async fn find_many(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, DocumentError> {
        self.check("find_many")?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert(&self, collection: &str, filter: &Filter, mut doc: Document) -> Result<UpsertOutcome, DocumentError> {
        self.check("upsert")?;
        filter.seed(&mut doc);

        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        let outcome = match docs.iter_mut().find(|d| filter.matches(d)) {
            Some(existing) => {
                *existing = doc;
                UpsertOutcome::Replaced
            }
            None => {
                docs.push(doc);
                UpsertOutcome::Inserted
            }
        };

        debug!(collection, ?outcome, "Document upserted");
        Ok(outcome)
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool, DocumentError> {
        self.check("delete_one")?;
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        match docs.iter().position(|d| filter.matches(d)) {
            Some(pos) => {
                docs.remove(pos);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<usize, DocumentError> {
        self.check("delete_many")?;
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|d| !filter.matches(d));
        Ok(before - docs.len())
    }
}
