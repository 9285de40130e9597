// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory key-value backend for Mosaic.
//
// Uses a `BTreeMap` wrapped in a tokio `RwLock` for thread-safe, ordered
// storage. The ordering makes prefix scans a single range walk. An
// availability switch lets tests simulate the cache server going away.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::backend::KeyValueStore;
use crate::error::KvError;

/// The value held under one key.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Str(String),
    Hash(BTreeMap<String, String>),
    List(Vec<String>),
}

impl Entry {
    fn kind(&self) -> &'static str {
        match self {
            Entry::Str(_) => "string",
            Entry::Hash(_) => "hash",
            Entry::List(_) => "list",
        }
    }
}

/// An in-memory cache backend backed by a sorted `BTreeMap`.
///
/// All data lives in process memory and is lost on drop. Cloning shares the
/// underlying map, so a clone handed to a background task sees the same data.
///
/// # Example
///
/// ```rust
/// use mosaic_kv::memory::InMemoryKeyValueStore;
/// use mosaic_kv::backend::KeyValueStore;
///
/// # tokio_test::block_on(async {
/// let store = InMemoryKeyValueStore::new();
/// store.hset("client:1", "data", "{}").await.unwrap();
/// let val = store.hget("client:1", "data").await.unwrap();
/// assert_eq!(val, Some("{}".to_string()));
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryKeyValueStore {
    data: Arc<RwLock<BTreeMap<String, Entry>>>,
    online: Arc<AtomicBool>,
}

impl InMemoryKeyValueStore {
    /// Create a new, empty in-memory backend.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Toggle availability. While offline every operation fails with
    /// [`KvError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.online.store(available, Ordering::SeqCst);
    }

    /// Return the number of keys currently stored.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Return true if the store contains no keys.
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    fn check(&self, op: &str) -> Result<(), KvError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(KvError::Unavailable(format!("{op}: cache server unreachable")))
        }
    }
}

impl Default for InMemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        self.check("get")?;
        let map = self.data.read().await;
        match map.get(key) {
            None => Ok(None),
            Some(Entry::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(KvError::WrongType {
                key: key.to_string(),
                expected: "string",
            }),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.check("set")?;
        let mut map = self.data.write().await;
        map.insert(key.to_string(), Entry::Str(value.to_string()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        self.check("delete")?;
        let mut map = self.data.write().await;
        Ok(map.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        self.check("exists")?;
        let map = self.data.read().await;
        Ok(map.contains_key(key))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvError> {
        self.check("hset")?;
        let mut map = self.data.write().await;
        let entry = map
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(BTreeMap::new()));
        match entry {
            Entry::Hash(fields) => {
                fields.insert(field.to_string(), value.to_string());
                Ok(())
            }
            _ => Err(KvError::WrongType {
                key: key.to_string(),
                expected: "hash",
            }),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
        self.check("hget")?;
        let map = self.data.read().await;
        match map.get(key) {
            None => Ok(None),
            Some(Entry::Hash(fields)) => Ok(fields.get(field).cloned()),
            Some(_) => Err(KvError::WrongType {
                key: key.to_string(),
                expected: "hash",
            }),
        }
    }

    async fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>, KvError> {
        self.check("hgetall")?;
        let map = self.data.read().await;
        match map.get(key) {
            None => Ok(BTreeMap::new()),
            Some(Entry::Hash(fields)) => Ok(fields.clone()),
            Some(_) => Err(KvError::WrongType {
                key: key.to_string(),
                expected: "hash",
            }),
        }
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<usize, KvError> {
        self.check("rpush")?;
        let mut map = self.data.write().await;
        let entry = map
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(Vec::new()));
        match entry {
            Entry::List(items) => {
                items.push(value.to_string());
                Ok(items.len())
            }
            _ => Err(KvError::WrongType {
                key: key.to_string(),
                expected: "list",
            }),
        }
    }

    async fn lrange(&self, key: &str) -> Result<Vec<String>, KvError> {
        self.check("lrange")?;
        let map = self.data.read().await;
        match map.get(key) {
            None => Ok(Vec::new()),
            Some(Entry::List(items)) => Ok(items.clone()),
            Some(other) => {
                debug!(key, kind = other.kind(), "lrange on non-list key");
                Err(KvError::WrongType {
                    key: key.to_string(),
                    expected: "list",
                })
            }
        }
    }

    async fn keys(&self, prefix: &str, limit: usize) -> Result<Vec<String>, KvError> {
        self.check("keys")?;
        let map = self.data.read().await;
        let results = map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, _)| k.clone())
            .collect();
        Ok(results)
    }

    async fn flush_all(&self) -> Result<(), KvError> {
        self.check("flush_all")?;
        let mut map = self.data.write().await;
        let removed = map.len();
        map.clear();
        debug!(removed, "Flushed in-memory cache");
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}
