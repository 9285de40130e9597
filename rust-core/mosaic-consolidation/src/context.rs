// SPDX-License-Identifier: PMPL-1.0-or-later
//! Explicit store handles passed to every component.

use std::sync::Arc;

use mosaic_document::{DocumentStore, InMemoryDocumentStore};
use mosaic_graph::{GraphStore, SimpleGraphStore};
use mosaic_kv::{InMemoryKeyValueStore, KeyValueStore};
use mosaic_relational::{InMemoryRelationalStore, RelationalStore};

/// The four stores a client spans.
pub struct StoreContext<R, D, G, K>
where
    R: RelationalStore + ?Sized,
    D: DocumentStore + ?Sized,
    G: GraphStore + ?Sized,
    K: KeyValueStore + ?Sized,
{
    pub relational: Arc<R>,
    pub document: Arc<D>,
    pub graph: Arc<G>,
    pub kv: Arc<K>,
}

impl<R, D, G, K> StoreContext<R, D, G, K>
where
    R: RelationalStore + ?Sized,
    D: DocumentStore + ?Sized,
    G: GraphStore + ?Sized,
    K: KeyValueStore + ?Sized,
{
    pub fn new(relational: Arc<R>, document: Arc<D>, graph: Arc<G>, kv: Arc<K>) -> Self {
        Self {
            relational,
            document,
            graph,
            kv,
        }
    }
}

impl<R, D, G, K> Clone for StoreContext<R, D, G, K>
where
    R: RelationalStore + ?Sized,
    D: DocumentStore + ?Sized,
    G: GraphStore + ?Sized,
    K: KeyValueStore + ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            relational: Arc::clone(&self.relational),
            document: Arc::clone(&self.document),
            graph: Arc::clone(&self.graph),
            kv: Arc::clone(&self.kv),
        }
    }
}

/// A context over the in-memory adapters
pub type InMemoryContext = StoreContext<
    InMemoryRelationalStore,
    InMemoryDocumentStore,
    SimpleGraphStore,
    InMemoryKeyValueStore,
>;

impl InMemoryContext {
    /// Fresh, empty in-memory stores
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryRelationalStore::new()),
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(SimpleGraphStore::new()),
            Arc::new(InMemoryKeyValueStore::new()),
        )
    }
}
