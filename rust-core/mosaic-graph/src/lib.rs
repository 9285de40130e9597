// SPDX-License-Identifier: PMPL-1.0-or-later
//! Mosaic Graph Adapter
//!
//! Property-graph storage for people and the relationships between them.
//! Person nodes are keyed by a client's canonical join key and may exist
//! before (or without) a relational client row. Relationships are directed,
//! labelled edges; friendship uses the [`FRIEND`] label.
//!
//! - **`SimpleGraphStore`**: pure Rust, in-memory HashMap store with subject
//!   and object indices. Zero external services, builds on any platform.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use thiserror::Error;
use tracing::debug;

/// Edge label for friendship.
pub const FRIEND: &str = "FRIEND";

/// Graph adapter errors
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Graph store unavailable: {0}")]
    Unavailable(String),

    #[error("Graph operation timed out: {0}")]
    Timeout(String),

    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Invalid node id: {0}")]
    InvalidId(String),

    #[error("Lock poisoned")]
    LockPoisoned,
}

impl GraphError {
    /// True for failures caused by the store being unreachable or slow.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, GraphError::Unavailable(_) | GraphError::Timeout(_))
    }
}

/// A person node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PersonNode {
    /// Canonical join key of the person
    pub id: String,
    /// Display name
    pub name: Option<String>,
    /// Tax id, when known
    pub cpf: Option<String>,
}

impl PersonNode {
    /// Create a node with only an id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            cpf: None,
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the tax id
    pub fn with_cpf(mut self, cpf: impl Into<String>) -> Self {
        self.cpf = Some(cpf.into());
        self
    }
}

/// A directed, labelled edge between two person nodes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphEdge {
    /// Source node id
    pub subject: String,
    /// Relationship label
    pub predicate: String,
    /// Target node id
    pub object: String,
}

impl GraphEdge {
    /// Create an edge
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }

    /// A `FRIEND` edge from `subject` to `object`
    pub fn friend(subject: impl Into<String>, object: impl Into<String>) -> Self {
        Self::new(subject, FRIEND, object)
    }

    /// The same relationship in the opposite direction
    pub fn reversed(&self) -> Self {
        Self {
            subject: self.object.clone(),
            predicate: self.predicate.clone(),
            object: self.subject.clone(),
        }
    }
}

/// Graph store trait.
///
/// All graph backends implement this trait, allowing the consolidation
/// engine to be generic over the concrete backend.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create the node, or overwrite the properties of an existing one
    async fn merge_person(&self, node: &PersonNode) -> Result<PersonNode, GraphError>;

    /// Get a node by id
    async fn get_person(&self, id: &str) -> Result<Option<PersonNode>, GraphError>;

    /// All nodes, ordered by id
    async fn list_persons(&self) -> Result<Vec<PersonNode>, GraphError>;

    /// Delete a node and every edge touching it. Returns whether it existed.
    async fn delete_person(&self, id: &str) -> Result<bool, GraphError>;

    /// Insert an edge (both endpoints must exist)
    async fn insert(&self, edge: &GraphEdge) -> Result<(), GraphError>;

    /// Delete an edge. Returns whether it existed.
    async fn delete(&self, edge: &GraphEdge) -> Result<bool, GraphError>;

    /// Check if an edge exists
    async fn exists(&self, edge: &GraphEdge) -> Result<bool, GraphError>;

    /// Outgoing edges from a node, ordered by (predicate, object)
    async fn outgoing(&self, id: &str) -> Result<Vec<GraphEdge>, GraphError>;

    /// Incoming edges to a node, ordered by (predicate, subject)
    async fn incoming(&self, id: &str) -> Result<Vec<GraphEdge>, GraphError>;

    /// Target nodes of outgoing `predicate` edges, ordered by id.
    ///
    /// A missing source node yields an empty list.
    async fn neighbours(&self, id: &str, predicate: &str) -> Result<Vec<PersonNode>, GraphError>;

    /// Remove every node and edge
    async fn clear(&self) -> Result<(), GraphError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// SimpleGraphStore: pure Rust in-memory graph store
// ═══════════════════════════════════════════════════════════════════════════

/// Pure Rust in-memory graph store.
///
/// Uses HashMap indices for O(1) subject/object lookups and a HashSet for
/// edge deduplication.
///
/// Thread-safe via `RwLock`: concurrent reads, exclusive writes.
pub struct SimpleGraphStore {
    /// Nodes by id
    nodes: RwLock<HashMap<String, PersonNode>>,
    /// All edges
    edges: RwLock<HashSet<GraphEdge>>,
    /// Subject index: subject id → edges leaving it
    subject_idx: RwLock<HashMap<String, HashSet<GraphEdge>>>,
    /// Object index: object id → edges entering it
    object_idx: RwLock<HashMap<String, HashSet<GraphEdge>>>,
    /// Availability switch for fault injection
    online: AtomicBool,
}

impl SimpleGraphStore {
    /// Create a new empty in-memory graph store.
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            edges: RwLock::new(HashSet::new()),
            subject_idx: RwLock::new(HashMap::new()),
            object_idx: RwLock::new(HashMap::new()),
            online: AtomicBool::new(true),
        }
    }

    /// Toggle availability. While offline every operation fails with
    /// [`GraphError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.online.store(available, Ordering::SeqCst);
    }

    fn check(&self, op: &str) -> Result<(), GraphError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GraphError::Unavailable(format!("{op}: graph server unreachable")))
        }
    }

    fn unlink(&self, edge: &GraphEdge) -> Result<bool, GraphError> {
        let removed = self
            .edges
            .write()
            .map_err(|_| GraphError::LockPoisoned)?
            .remove(edge);

        let mut subject_idx = self.subject_idx.write().map_err(|_| GraphError::LockPoisoned)?;
        if let Some(keys) = subject_idx.get_mut(&edge.subject) {
            keys.remove(edge);
            if keys.is_empty() {
                subject_idx.remove(&edge.subject);
            }
        }
        drop(subject_idx);

        let mut object_idx = self.object_idx.write().map_err(|_| GraphError::LockPoisoned)?;
        if let Some(keys) = object_idx.get_mut(&edge.object) {
            keys.remove(edge);
            if keys.is_empty() {
                object_idx.remove(&edge.object);
            }
        }

        Ok(removed)
    }

    fn indexed(
        index: &RwLock<HashMap<String, HashSet<GraphEdge>>>,
        id: &str,
    ) -> Result<Vec<GraphEdge>, GraphError> {
        let idx = index.read().map_err(|_| GraphError::LockPoisoned)?;
        let mut result: Vec<GraphEdge> = idx
            .get(id)
            .map(|edges| edges.iter().cloned().collect())
            .unwrap_or_default();
        result.sort();
        Ok(result)
    }
}

impl Default for SimpleGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for SimpleGraphStore {
    async fn merge_person(&self, node: &PersonNode) -> Result<PersonNode, GraphError> {
        self.check("merge_person")?;
        if node.id.is_empty() {
            return Err(GraphError::InvalidId("empty node id".to_string()));
        }
        self.nodes
            .write()
            .map_err(|_| GraphError::LockPoisoned)?
            .insert(node.id.clone(), node.clone());
        Ok(node.clone())
    }

    async fn get_person(&self, id: &str) -> Result<Option<PersonNode>, GraphError> {
        self.check("get_person")?;
        let nodes = self.nodes.read().map_err(|_| GraphError::LockPoisoned)?;
        Ok(nodes.get(id).cloned())
    }

    async fn list_persons(&self) -> Result<Vec<PersonNode>, GraphError> {
        self.check("list_persons")?;
        let nodes = self.nodes.read().map_err(|_| GraphError::LockPoisoned)?;
        let mut all: Vec<PersonNode> = nodes.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn delete_person(&self, id: &str) -> Result<bool, GraphError> {
        self.check("delete_person")?;
        let mut touching = Self::indexed(&self.subject_idx, id)?;
        touching.extend(Self::indexed(&self.object_idx, id)?);
        for edge in &touching {
            self.unlink(edge)?;
        }

        let existed = self
            .nodes
            .write()
            .map_err(|_| GraphError::LockPoisoned)?
            .remove(id)
            .is_some();

        debug!(id, detached = touching.len(), existed, "Person node deleted");
        Ok(existed)
    }

    async fn insert(&self, edge: &GraphEdge) -> Result<(), GraphError> {
        self.check("insert")?;
        {
            let nodes = self.nodes.read().map_err(|_| GraphError::LockPoisoned)?;
            for endpoint in [&edge.subject, &edge.object] {
                if !nodes.contains_key(endpoint) {
                    return Err(GraphError::NotFound(endpoint.clone()));
                }
            }
        }

        self.subject_idx
            .write()
            .map_err(|_| GraphError::LockPoisoned)?
            .entry(edge.subject.clone())
            .or_default()
            .insert(edge.clone());

        self.object_idx
            .write()
            .map_err(|_| GraphError::LockPoisoned)?
            .entry(edge.object.clone())
            .or_default()
            .insert(edge.clone());

        self.edges
            .write()
            .map_err(|_| GraphError::LockPoisoned)?
            .insert(edge.clone());

        Ok(())
    }

    async fn delete(&self, edge: &GraphEdge) -> Result<bool, GraphError> {
        self.check("delete")?;
        self.unlink(edge)
    }

    async fn exists(&self, edge: &GraphEdge) -> Result<bool, GraphError> {
        self.check("exists")?;
        let edges = self.edges.read().map_err(|_| GraphError::LockPoisoned)?;
        Ok(edges.contains(edge))
    }

    async fn outgoing(&self, id: &str) -> Result<Vec<GraphEdge>, GraphError> {
        self.check("outgoing")?;
        Self::indexed(&self.subject_idx, id)
    }

    async fn incoming(&self, id: &str) -> Result<Vec<GraphEdge>, GraphError> {
        self.check("incoming")?;
        Self::indexed(&self.object_idx, id)
    }

    async fn neighbours(&self, id: &str, predicate: &str) -> Result<Vec<PersonNode>, GraphError> {
        self.check("neighbours")?;
        let edges = Self::indexed(&self.subject_idx, id)?;
        let nodes = self.nodes.read().map_err(|_| GraphError::LockPoisoned)?;

        let mut result: Vec<PersonNode> = edges
            .iter()
            .filter(|e| e.predicate == predicate)
            .filter_map(|e| nodes.get(&e.object).cloned())
            .collect();
        result.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(result)
    }

    async fn clear(&self) -> Result<(), GraphError> {
        self.check("clear")?;
        self.nodes.write().map_err(|_| GraphError::LockPoisoned)?.clear();
        self.edges.write().map_err(|_| GraphError::LockPoisoned)?.clear();
        self.subject_idx.write().map_err(|_| GraphError::LockPoisoned)?.clear();
        self.object_idx.write().map_err(|_| GraphError::LockPoisoned)?.clear();
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with(ids: &[&str]) -> SimpleGraphStore {
        let store = SimpleGraphStore::new();
        for id in ids {
            store
                .merge_person(&PersonNode::new(*id).with_name(id.to_uppercase()))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_merge_overwrites_properties() {
        let store = SimpleGraphStore::new();
        store
            .merge_person(&PersonNode::new("a").with_name("Ana"))
            .await
            .unwrap();
        store
            .merge_person(&PersonNode::new("a").with_name("Ana Maria").with_cpf("111"))
            .await
            .unwrap();

        let node = store.get_person("a").await.unwrap().unwrap();
        assert_eq!(node.name.as_deref(), Some("Ana Maria"));
        assert_eq!(node.cpf.as_deref(), Some("111"));
        assert_eq!(store.list_persons().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_and_query() {
        let store = store_with(&["alice", "bob"]).await;
        let edge = GraphEdge::friend("alice", "bob");

        store.insert(&edge).await.unwrap();
        assert!(store.exists(&edge).await.unwrap());
        assert!(!store.exists(&edge.reversed()).await.unwrap());

        assert_eq!(store.outgoing("alice").await.unwrap().len(), 1);
        assert_eq!(store.incoming("bob").await.unwrap().len(), 1);
        assert!(store.outgoing("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_requires_endpoints() {
        let store = store_with(&["alice"]).await;
        let err = store
            .insert(&GraphEdge::friend("alice", "ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::NotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_neighbours_filters_label_and_orders() {
        let store = store_with(&["a", "c", "b", "d"]).await;
        store.insert(&GraphEdge::friend("a", "c")).await.unwrap();
        store.insert(&GraphEdge::friend("a", "b")).await.unwrap();
        store.insert(&GraphEdge::new("a", "BLOCKED", "d")).await.unwrap();

        let friends = store.neighbours("a", FRIEND).await.unwrap();
        let ids: Vec<&str> = friends.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);

        assert!(store.neighbours("nobody", FRIEND).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_edge() {
        let store = store_with(&["a", "b"]).await;
        let edge = GraphEdge::friend("a", "b");

        store.insert(&edge).await.unwrap();
        assert!(store.delete(&edge).await.unwrap());
        assert!(!store.exists(&edge).await.unwrap());
        assert!(!store.delete(&edge).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_person_detaches() {
        let store = store_with(&["a", "b", "c"]).await;
        store.insert(&GraphEdge::friend("a", "b")).await.unwrap();
        store.insert(&GraphEdge::friend("b", "a")).await.unwrap();
        store.insert(&GraphEdge::friend("c", "b")).await.unwrap();

        assert!(store.delete_person("b").await.unwrap());
        assert!(store.get_person("b").await.unwrap().is_none());
        assert!(store.outgoing("a").await.unwrap().is_empty());
        assert!(store.outgoing("c").await.unwrap().is_empty());
        assert!(store.incoming("a").await.unwrap().is_empty());

        assert!(!store.delete_person("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_deduplication() {
        let store = store_with(&["a", "b"]).await;
        let edge = GraphEdge::friend("a", "b");

        store.insert(&edge).await.unwrap();
        store.insert(&edge).await.unwrap();

        assert_eq!(store.outgoing("a").await.unwrap().len(), 1, "Duplicate edges should be deduplicated");
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = store_with(&["a"]).await;
        store.set_available(false);
        let err = store.neighbours("a", FRIEND).await.unwrap_err();
        assert!(err.is_unavailable());
        store.set_available(true);
        assert!(store.get_person("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear() {
        let store = store_with(&["a", "b"]).await;
        store.insert(&GraphEdge::friend("a", "b")).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.list_persons().await.unwrap().is_empty());
        assert!(store.incoming("b").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_insert_racing_delete_leaves_no_dangling_edge() {
        let store = std::sync::Arc::new(SimpleGraphStore::new());
        for round in 0..200 {
            let a = format!("a{}", round);
            let b = format!("b{}", round);
            store.merge_person(&PersonNode::new(a.as_str())).await.unwrap();
            store.merge_person(&PersonNode::new(b.as_str())).await.unwrap();

            let inserter = {
                let store = std::sync::Arc::clone(&store);
                let edge = GraphEdge::friend(a.as_str(), b.as_str());
                tokio::spawn(async move { store.insert(&edge).await })
            };
            let deleter = {
                let store = std::sync::Arc::clone(&store);
                let b = b.clone();
                tokio::spawn(async move { store.delete_person(&b).await })
            };
            // The insert may lose the race and see `b` gone.
            let _ = inserter.await.unwrap();
            assert!(deleter.await.unwrap().unwrap());

            assert!(store.outgoing(&a).await.unwrap().is_empty());
            assert!(store.incoming(&b).await.unwrap().is_empty());
            assert!(!store.exists(&GraphEdge::friend(a.as_str(), b.as_str())).await.unwrap());
        }
    }
}
