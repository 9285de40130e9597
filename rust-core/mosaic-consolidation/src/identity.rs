// SPDX-License-Identifier: PMPL-1.0-or-later
//! Client references and their resolution against the relational store.
//!
//! Clients created before external identifiers existed only have an
//! internal row id. [`ClientRef`] makes the two lookup paths explicit;
//! [`ClientRef::parse`] is the single place a raw string is classified.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument};

use mosaic_relational::{RelationalQuery, RelationalStore, Row};

use crate::model::Client;
use crate::ConsolidationError;

/// Separator that marks a raw reference as an external identifier.
const EXTERNAL_ID_SEPARATOR: char = '-';

/// A reference to a client by one of its two keys
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientRef {
    ByExternalId(String),
    ByInternalId(i64),
}

impl ClientRef {
    /// Classify a raw reference: anything containing `-` is an external id,
    /// anything else must be an integer row id.
    pub fn parse(raw: &str) -> Result<Self, ConsolidationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ConsolidationError::InvalidReference(
                "empty reference".to_string(),
            ));
        }
        if raw.contains(EXTERNAL_ID_SEPARATOR) {
            return Ok(ClientRef::ByExternalId(raw.to_string()));
        }
        raw.parse::<i64>()
            .map(ClientRef::ByInternalId)
            .map_err(|_| ConsolidationError::InvalidReference(raw.to_string()))
    }

    pub fn external(id: impl Into<String>) -> Self {
        ClientRef::ByExternalId(id.into())
    }

    pub fn internal(id: i64) -> Self {
        ClientRef::ByInternalId(id)
    }

    /// The canonical key this reference yields without a lookup, which is
    /// only possible for external ids.
    pub fn known_key(&self) -> Option<CanonicalKey> {
        match self {
            ClientRef::ByExternalId(ext) => Some(CanonicalKey(ext.clone())),
            ClientRef::ByInternalId(_) => None,
        }
    }
}

impl FromStr for ClientRef {
    type Err = ConsolidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<i64> for ClientRef {
    fn from(id: i64) -> Self {
        ClientRef::ByInternalId(id)
    }
}

impl fmt::Display for ClientRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientRef::ByExternalId(ext) => write!(f, "{}", ext),
            ClientRef::ByInternalId(id) => write!(f, "{}", id),
        }
    }
}

/// The key a client is stored under in the document, graph and cache stores
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    pub fn for_client(internal_id: i64, external_id: Option<&str>) -> Self {
        match external_id.filter(|e| !e.is_empty()) {
            Some(ext) => Self(ext.to_string()),
            None => Self(internal_id.to_string()),
        }
    }

    /// Wrap a key read back from a store
    pub fn from_stored(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// A reference that resolves back to the client holding this key
    pub fn to_ref(&self) -> Result<ClientRef, ConsolidationError> {
        ClientRef::parse(&self.0)
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves client references to relational rows
pub struct IdentityResolver<R: RelationalStore + ?Sized> {
    relational: Arc<R>,
}

impl<R: RelationalStore + ?Sized> Clone for IdentityResolver<R> {
    fn clone(&self) -> Self {
        Self {
            relational: Arc::clone(&self.relational),
        }
    }
}

impl<R: RelationalStore + ?Sized> IdentityResolver<R> {
    pub fn new(relational: Arc<R>) -> Self {
        Self { relational }
    }

    pub fn relational(&self) -> &Arc<R> {
        &self.relational
    }

    /// Look a client up, `None` when no row matches.
    pub async fn find(&self, reference: &ClientRef) -> Result<Option<Client>, ConsolidationError> {
        let query = match reference {
            ClientRef::ByExternalId(ext) => RelationalQuery::ClientByExternalId(ext.clone()),
            ClientRef::ByInternalId(id) => RelationalQuery::ClientById(*id),
        };
        let rows = self.relational.query(&query).await?;
        rows.first().map(Client::from_row).transpose()
    }

    /// Look a client up, failing with `NotFound` when no row matches.
    #[instrument(skip(self), fields(reference = %reference))]
    pub async fn resolve(&self, reference: &ClientRef) -> Result<Client, ConsolidationError> {
        match self.find(reference).await? {
            Some(client) => {
                debug!(internal_id = client.id, "Resolved client");
                Ok(client)
            }
            None => Err(ConsolidationError::NotFound(format!("client {}", reference))),
        }
    }

    /// Every client row, unparsed, in id order
    pub async fn all_rows(&self) -> Result<Vec<Row>, ConsolidationError> {
        Ok(self.relational.query(&RelationalQuery::AllClients).await?)
    }
}
