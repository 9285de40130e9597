// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Typed cache wrapper for Mosaic.
//
// Provides a serde-based interface on top of any `KeyValueStore`. Values are
// serialized as JSON and every key is prefixed with a namespace, so several
// logical caches (consolidated records, recommendation lists) can share one
// physical backend without key collisions.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::KeyValueStore;
use crate::error::KvError;

/// A typed wrapper around a [`KeyValueStore`] that handles serialization
/// and namespace prefixing automatically.
///
/// Keys are prefixed with `"{namespace}:"` before being passed to the
/// underlying backend.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use mosaic_kv::memory::InMemoryKeyValueStore;
/// use mosaic_kv::typed::TypedStore;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Serialize, Deserialize, PartialEq)]
/// struct Rec { product: i64, score: u32 }
///
/// # tokio_test::block_on(async {
/// let store = TypedStore::new(Arc::new(InMemoryKeyValueStore::new()), "recomendacoes");
///
/// store.replace_list("42", &[Rec { product: 2, score: 2 }]).await.unwrap();
/// let recs: Vec<Rec> = store.list("42").await.unwrap();
/// assert_eq!(recs, vec![Rec { product: 2, score: 2 }]);
/// # });
/// ```
pub struct TypedStore<B: KeyValueStore + ?Sized> {
    backend: Arc<B>,
    namespace: String,
}

impl<B: KeyValueStore + ?Sized> Clone for TypedStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            namespace: self.namespace.clone(),
        }
    }
}

impl<B: KeyValueStore + ?Sized> TypedStore<B> {
    /// Create a new typed store wrapping `backend` with the given namespace.
    pub fn new(backend: Arc<B>, namespace: &str) -> Self {
        Self {
            backend,
            namespace: namespace.to_string(),
        }
    }

    /// Return a reference to the underlying backend.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Return the namespace prefix used by this store.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Build the full physical key for a logical key.
    pub fn key(&self, logical: &str) -> String {
        format!("{}:{}", self.namespace, logical)
    }

    fn prefix(&self) -> String {
        format!("{}:", self.namespace)
    }

    /// Read and deserialize one hash field.
    ///
    /// Returns `Ok(None)` if the key or field does not exist.
    pub async fn get_field<T: DeserializeOwned>(
        &self,
        logical: &str,
        field: &str,
    ) -> Result<Option<T>, KvError> {
        let full_key = self.key(logical);
        match self.backend.hget(&full_key, field).await? {
            Some(raw) => {
                let value = serde_json::from_str(&raw).map_err(|err| {
                    KvError::SerializationError(format!(
                        "failed to deserialize field '{}' of '{}': {}",
                        field, full_key, err
                    ))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Serialize `value` and store it in one hash field.
    pub async fn put_field<T: Serialize + ?Sized>(
        &self,
        logical: &str,
        field: &str,
        value: &T,
    ) -> Result<(), KvError> {
        let full_key = self.key(logical);
        let raw = serde_json::to_string(value).map_err(|err| {
            KvError::SerializationError(format!(
                "failed to serialize field '{}' of '{}': {}",
                field, full_key, err
            ))
        })?;
        self.backend.hset(&full_key, field, &raw).await
    }

    /// Replace the list stored under `logical` with `items`.
    ///
    /// Delete-then-push: readers may briefly observe a shorter list.
    pub async fn replace_list<T: Serialize>(
        &self,
        logical: &str,
        items: &[T],
    ) -> Result<(), KvError> {
        let full_key = self.key(logical);
        let encoded = items
            .iter()
            .map(|item| {
                serde_json::to_string(item).map_err(|err| {
                    KvError::SerializationError(format!(
                        "failed to serialize list item for '{}': {}",
                        full_key, err
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.backend.delete(&full_key).await?;
        for raw in &encoded {
            self.backend.rpush(&full_key, raw).await?;
        }
        Ok(())
    }

    /// Read and deserialize the list stored under `logical`.
    pub async fn list<T: DeserializeOwned>(&self, logical: &str) -> Result<Vec<T>, KvError> {
        let full_key = self.key(logical);
        self.backend
            .lrange(&full_key)
            .await?
            .iter()
            .map(|raw| {
                serde_json::from_str(raw).map_err(|err| {
                    KvError::SerializationError(format!(
                        "failed to deserialize list item of '{}': {}",
                        full_key, err
                    ))
                })
            })
            .collect()
    }

    /// Delete the value under `logical`.
    ///
    /// Returns `Ok(true)` if the key existed and was removed.
    pub async fn delete(&self, logical: &str) -> Result<bool, KvError> {
        self.backend.delete(&self.key(logical)).await
    }

    /// List up to `limit` logical keys in this namespace, namespace stripped.
    pub async fn logical_keys(&self, limit: usize) -> Result<Vec<String>, KvError> {
        let prefix = self.prefix();
        let raw = self.backend.keys(&prefix, limit).await?;
        Ok(raw
            .into_iter()
            .map(|k| k[prefix.len()..].to_string())
            .collect())
    }

    /// Delete every key in this namespace (up to `limit`), returning how many
    /// were removed. Other namespaces are untouched.
    pub async fn clear(&self, limit: usize) -> Result<usize, KvError> {
        let prefix = self.prefix();
        let mut removed = 0;
        for key in self.backend.keys(&prefix, limit).await? {
            if self.backend.delete(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
