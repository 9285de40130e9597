// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Mosaic Key-Value Cache Adapter
//
// This crate provides the key-value interface the consolidation engine uses
// as its cache tier. The `KeyValueStore` trait mirrors the primitives of a
// Redis-style server (strings, hashes, lists, prefix scans, flush) so the
// engine can swap a real client for the in-memory backend without changing
// application logic.
//
// # Modules
//
// - [`backend`] -- The `KeyValueStore` trait defining the cache interface.
// - [`error`] -- The `KvError` enum covering all backend failure modes.
// - [`memory`] -- An in-memory `BTreeMap`-based backend for tests and
//   single-process deployments.
// - [`typed`] -- A serde-based typed wrapper with namespace prefixing.
//
// # Example
//
// ```rust
// use std::sync::Arc;
// use mosaic_kv::memory::InMemoryKeyValueStore;
// use mosaic_kv::typed::TypedStore;
//
// # tokio_test::block_on(async {
// let raw = Arc::new(InMemoryKeyValueStore::new());
// let store = TypedStore::new(raw, "client");
// store.put_field("42", "data", &serde_json::json!({"name": "Ana"})).await.unwrap();
//
// let val: serde_json::Value = store.get_field("42", "data").await.unwrap().unwrap();
// assert_eq!(val["name"], "Ana");
// # });
// ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod typed;

pub use backend::KeyValueStore;
pub use error::KvError;
pub use memory::InMemoryKeyValueStore;
pub use typed::TypedStore;
