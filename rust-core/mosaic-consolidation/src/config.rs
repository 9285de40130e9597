// SPDX-License-Identifier: PMPL-1.0-or-later
//! Engine configuration.
//!
//! Defaults match the cache layout existing consumers read:
//! - records under `client:<key>`, hash field `data`
//! - recommendation lists under `recomendacoes:<key>`, top 5

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::ConsolidationError;

/// Configuration for the consolidation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Maximum recommendations kept per client.
    pub recommendation_top_n: usize,
    /// Cache namespace for consolidated records.
    pub client_key_prefix: String,
    /// Cache namespace for standalone recommendation lists.
    pub recommendation_key_prefix: String,
    /// Hash field holding the serialized record.
    pub record_field: String,
    /// Undo completed saga steps when a later step fails.
    pub compensate_on_failure: bool,
    /// Let read-through caching store records built while the document or
    /// graph store was unreachable.
    pub cache_degraded_records: bool,
    /// Upper bound on keys scanned when clearing a cache namespace.
    pub rebuild_scan_limit: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            recommendation_top_n: 5,
            client_key_prefix: "client".to_string(),
            recommendation_key_prefix: "recomendacoes".to_string(),
            record_field: "data".to_string(),
            compensate_on_failure: true,
            cache_degraded_records: false,
            rebuild_scan_limit: 100_000,
        }
    }
}

impl ConsolidationConfig {
    /// Defaults overlaid with `MOSAIC_*` environment variables.
    pub fn from_env() -> Result<Self, ConsolidationError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each
    /// `MOSAIC_*` variable name.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConsolidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("MOSAIC_RECOMMENDATION_TOP_N") {
            config.recommendation_top_n = parse_var("MOSAIC_RECOMMENDATION_TOP_N", &v)?;
        }
        if let Some(v) = lookup("MOSAIC_CLIENT_KEY_PREFIX") {
            config.client_key_prefix = non_empty("MOSAIC_CLIENT_KEY_PREFIX", v)?;
        }
        if let Some(v) = lookup("MOSAIC_RECOMMENDATION_KEY_PREFIX") {
            config.recommendation_key_prefix = non_empty("MOSAIC_RECOMMENDATION_KEY_PREFIX", v)?;
        }
        if let Some(v) = lookup("MOSAIC_RECORD_FIELD") {
            config.record_field = non_empty("MOSAIC_RECORD_FIELD", v)?;
        }
        if let Some(v) = lookup("MOSAIC_COMPENSATE_ON_FAILURE") {
            config.compensate_on_failure = parse_var("MOSAIC_COMPENSATE_ON_FAILURE", &v)?;
        }
        if let Some(v) = lookup("MOSAIC_CACHE_DEGRADED_RECORDS") {
            config.cache_degraded_records = parse_var("MOSAIC_CACHE_DEGRADED_RECORDS", &v)?;
        }
        if let Some(v) = lookup("MOSAIC_REBUILD_SCAN_LIMIT") {
            config.rebuild_scan_limit = parse_var("MOSAIC_REBUILD_SCAN_LIMIT", &v)?;
        }

        if config.client_key_prefix == config.recommendation_key_prefix {
            return Err(ConsolidationError::Config(
                "record and recommendation prefixes must differ".to_string(),
            ));
        }
        Ok(config)
    }
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> Result<T, ConsolidationError> {
    raw.trim()
        .parse()
        .map_err(|_| ConsolidationError::Config(format!("{} has invalid value '{}'", name, raw)))
}

fn non_empty(name: &str, raw: String) -> Result<String, ConsolidationError> {
    if raw.trim().is_empty() {
        Err(ConsolidationError::Config(format!("{} must not be empty", name)))
    } else {
        Ok(raw)
    }
}
