// SPDX-License-Identifier: PMPL-1.0-or-later
//! Domain records and their row/document codecs.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use mosaic_document::Document;
use mosaic_graph::PersonNode;
use mosaic_relational::Row;

use crate::identity::{CanonicalKey, ClientRef};
use crate::ConsolidationError;

/// Decode a loosely typed row, reporting the table and row id on failure.
fn decode_row<T: DeserializeOwned>(table: &str, row: &Row) -> Result<T, ConsolidationError> {
    serde_json::from_value(Value::Object(row.clone())).map_err(|e| {
        let id = row
            .get("id")
            .map(Value::to_string)
            .unwrap_or_else(|| "?".to_string());
        ConsolidationError::MalformedRecord {
            key: format!("{}/{}", table, id),
            message: e.to_string(),
        }
    })
}

fn encode<T: Serialize>(value: &T) -> Result<Row, ConsolidationError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(ConsolidationError::Serialization(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// A client row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: i64,
    #[serde(default)]
    pub external_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub cpf: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Client {
    pub fn from_row(row: &Row) -> Result<Self, ConsolidationError> {
        decode_row("clients", row)
    }

    pub fn to_row(&self) -> Result<Row, ConsolidationError> {
        encode(self)
    }

    /// External id when present and non-empty, else the internal id.
    pub fn canonical_key(&self) -> CanonicalKey {
        CanonicalKey::for_client(self.id, self.external_id.as_deref())
    }

    /// The most specific reference to this client
    pub fn reference(&self) -> ClientRef {
        match self.external_id.as_deref().filter(|e| !e.is_empty()) {
            Some(ext) => ClientRef::ByExternalId(ext.to_string()),
            None => ClientRef::ByInternalId(self.id),
        }
    }

    /// Graph node mirroring this client
    pub fn person_node(&self) -> PersonNode {
        PersonNode {
            id: self.canonical_key().into_string(),
            name: Some(self.name.clone()),
            cpf: self.cpf.clone(),
        }
    }

    /// Identity mirror written to the document `clients` collection
    pub fn mirror_document(&self) -> Result<Document, ConsolidationError> {
        let mut doc = encode(self)?;
        doc.remove("id");
        doc.insert(
            "client_id".to_string(),
            Value::from(self.canonical_key().into_string()),
        );
        Ok(doc)
    }
}

/// Caller-facing input for creating or updating a client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientInput {
    /// Caller-supplied external id. Must be a UUID; generated when absent.
    #[serde(default)]
    pub external_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub cpf: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl ClientInput {
    pub fn named(name: impl Into<String>, cpf: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cpf: Some(cpf.into()),
            ..Self::default()
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_city(mut self, city: impl Into<String>, state: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self.state = Some(state.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Columns to write. `external_id` is left to the caller.
    pub(crate) fn to_row(&self) -> Result<Row, ConsolidationError> {
        let mut row = encode(self)?;
        row.remove("external_id");
        Ok(row)
    }
}

/// A product row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub kind: Option<String>,
}

impl Product {
    pub fn from_row(row: &Row) -> Result<Self, ConsolidationError> {
        decode_row("products", row)
    }

    pub fn to_row(&self) -> Result<Row, ConsolidationError> {
        encode(self)
    }
}

/// A purchase row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: i64,
    pub product_id: i64,
    pub client_id: i64,
    pub purchase_date: NaiveDate,
}

impl Purchase {
    pub fn from_row(row: &Row) -> Result<Self, ConsolidationError> {
        decode_row("purchases", row)
    }
}

/// A purchase with the product it refers to embedded. `product` is `None`
/// when the catalog no longer holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseDetail {
    #[serde(flatten)]
    pub purchase: Purchase,
    pub product: Option<Product>,
}

/// A client profile document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Canonical join key of the owning client
    pub client_id: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub interests: Vec<String>,
}

impl Profile {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            age: None,
            interests: Vec::new(),
        }
    }

    pub fn with_age(mut self, age: u32) -> Self {
        self.age = Some(age);
        self
    }

    pub fn with_interests<I, S>(mut self, interests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interests = interests.into_iter().map(Into::into).collect();
        self
    }

    pub fn from_document(doc: &Document) -> Result<Self, ConsolidationError> {
        serde_json::from_value(Value::Object(doc.clone())).map_err(|e| {
            ConsolidationError::MalformedRecord {
                key: format!(
                    "profiles/{}",
                    doc.get("client_id").map(Value::to_string).unwrap_or_default()
                ),
                message: e.to_string(),
            }
        })
    }

    pub fn to_document(&self) -> Result<Document, ConsolidationError> {
        encode(self)
    }
}

/// A recommended product with its popularity among friends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(flatten)]
    pub product: Product,
    pub score: u32,
}

/// The denormalized view of one client across every store.
///
/// Field names on the wire follow the cache format consumers already read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedClient {
    #[serde(rename = "cliente")]
    pub client: Client,
    #[serde(rename = "perfil")]
    pub profile: Option<Profile>,
    #[serde(rename = "amigos")]
    pub friends: Vec<PersonNode>,
    #[serde(rename = "compras")]
    pub purchases: Vec<PurchaseDetail>,
    #[serde(rename = "recomendacoes", default)]
    pub recommendations: Option<Vec<Recommendation>>,
}

impl ConsolidatedClient {
    pub fn canonical_key(&self) -> CanonicalKey {
        self.client.canonical_key()
    }

    /// Ids of every product this client has bought
    pub fn owned_product_ids(&self) -> HashSet<i64> {
        self.purchases.iter().map(|p| p.purchase.product_id).collect()
    }
}
