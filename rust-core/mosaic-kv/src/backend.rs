// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core key-value trait for the Mosaic cache tier.
//
// Each key holds exactly one kind of value: a string, a hash of fields, or a
// list. Operations on a key holding a different kind fail with
// `KvError::WrongType`. Every single-key write is atomic; there is no
// multi-key transaction.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::KvError;

/// A pluggable key-value cache backend.
///
/// Values are UTF-8 strings; structured access is provided by
/// [`crate::typed::TypedStore`], which layers JSON serialization and
/// namespace prefixing on top.
///
/// Implementations must be safe to share across threads and tokio tasks.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a string value. Returns `Ok(None)` if the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Store a string value, overwriting whatever `key` held before.
    async fn set(&self, key: &str, value: &str) -> Result<(), KvError>;

    /// Delete `key` regardless of its kind.
    ///
    /// Returns `Ok(true)` if the key existed and was removed.
    async fn delete(&self, key: &str) -> Result<bool, KvError>;

    /// Check whether `key` exists.
    async fn exists(&self, key: &str) -> Result<bool, KvError>;

    /// Set one field of the hash stored at `key`, creating the hash if needed.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvError>;

    /// Read one field of the hash stored at `key`.
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError>;

    /// Read every field of the hash stored at `key` (empty if absent).
    async fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>, KvError>;

    /// Append `value` to the list stored at `key`, returning the new length.
    async fn rpush(&self, key: &str, value: &str) -> Result<usize, KvError>;

    /// Read the whole list stored at `key` (empty if absent).
    async fn lrange(&self, key: &str) -> Result<Vec<String>, KvError>;

    /// List up to `limit` keys starting with `prefix`, in lexicographic order.
    async fn keys(&self, prefix: &str, limit: usize) -> Result<Vec<String>, KvError>;

    /// Remove every key in the store.
    async fn flush_all(&self) -> Result<(), KvError>;

    /// A human-readable name for this backend, used in logging.
    fn name(&self) -> &str;
}
