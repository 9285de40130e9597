// SPDX-License-Identifier: PMPL-1.0-or-later
//! Mosaic Relational Adapter
//!
//! The authoritative store for clients, products and purchases. Queries and
//! commands are typed enums rather than SQL text, but rows stay loosely
//! typed column maps: parsing them into domain types is the caller's job,
//! so a bad row surfaces where it is consumed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// One result row: column name to value.
pub type Row = Map<String, Value>;

/// Relational adapter errors
#[derive(Error, Debug)]
pub enum RelationalError {
    #[error("Relational store unavailable: {0}")]
    Unavailable(String),

    #[error("Relational operation timed out: {0}")]
    Timeout(String),

    #[error("Constraint violation on {table}: {message}")]
    ConstraintViolation { table: &'static str, message: String },

    #[error("Invalid row for {table}: {message}")]
    InvalidRow { table: &'static str, message: String },
}

impl RelationalError {
    /// True for failures caused by the store being unreachable or slow.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            RelationalError::Unavailable(_) | RelationalError::Timeout(_)
        )
    }
}

/// The three tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Table {
    Clients,
    Products,
    Purchases,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Clients => "clients",
            Table::Products => "products",
            Table::Purchases => "purchases",
        }
    }
}

/// Addresses a client row by either of its keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientKey {
    Id(i64),
    ExternalId(String),
}

/// Read statements. Multi-row results are ordered by primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelationalQuery {
    AllClients,
    ClientByExternalId(String),
    ClientById(i64),
    AllProducts,
    ProductById(i64),
    PurchasesByClient(i64),
    AllPurchases,
}

/// Write statements.
///
/// Inserts take a row without `id` (one is generated) or with an explicit
/// integer `id`. Updates merge the given columns into the existing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelationalCommand {
    InsertClient(Row),
    UpdateClient { key: ClientKey, changes: Row },
    DeleteClient(ClientKey),
    InsertProduct(Row),
    UpdateProduct { id: i64, changes: Row },
    DeleteProduct(i64),
    InsertPurchase(Row),
    DeletePurchase(i64),
    /// Empty every table and reset id sequences
    Truncate,
}

/// Relational store trait
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Run a read statement
    async fn query(&self, query: &RelationalQuery) -> Result<Vec<Row>, RelationalError>;

    /// Run a write statement. With `returning`, the affected row is handed
    /// back (the inserted row carries its generated id). `None` when nothing
    /// matched or `returning` is false.
    async fn execute(
        &self,
        command: &RelationalCommand,
        returning: bool,
    ) -> Result<Option<Row>, RelationalError>;
}

#[derive(Debug, Default)]
struct TableData {
    rows: BTreeMap<i64, Row>,
    next_id: i64,
}

impl TableData {
    fn insert(&mut self, table: Table, mut row: Row) -> Result<Row, RelationalError> {
        let id = match row.get("id") {
            None | Some(Value::Null) => {
                self.next_id += 1;
                self.next_id
            }
            Some(value) => value.as_i64().ok_or_else(|| RelationalError::InvalidRow {
                table: table.name(),
                message: format!("id must be an integer, got {}", value),
            })?,
        };
        if self.rows.contains_key(&id) {
            return Err(RelationalError::ConstraintViolation {
                table: table.name(),
                message: format!("duplicate primary key {}", id),
            });
        }
        self.next_id = self.next_id.max(id);
        row.insert("id".to_string(), Value::from(id));
        self.rows.insert(id, row.clone());
        Ok(row)
    }

    fn update(&mut self, id: i64, changes: &Row) -> Option<Row> {
        let row = self.rows.get_mut(&id)?;
        for (column, value) in changes {
            if column != "id" {
                row.insert(column.clone(), value.clone());
            }
        }
        Some(row.clone())
    }

    fn find_by(&self, column: &str, value: &Value) -> Option<i64> {
        self.rows
            .iter()
            .find(|(_, row)| row.get(column) == Some(value))
            .map(|(id, _)| *id)
    }
}

#[derive(Debug, Default)]
struct Tables {
    clients: TableData,
    products: TableData,
    purchases: TableData,
}

impl Tables {
    fn client_id(&self, key: &ClientKey) -> Option<i64> {
        match key {
            ClientKey::Id(id) => self.clients.rows.contains_key(id).then_some(*id),
            ClientKey::ExternalId(ext) => {
                self.clients.find_by("external_id", &Value::from(ext.as_str()))
            }
        }
    }

    fn check_unique_external_id(&self, row: &Row, except: Option<i64>) -> Result<(), RelationalError> {
        let Some(ext) = row.get("external_id").filter(|v| !v.is_null()) else {
            return Ok(());
        };
        match self.clients.find_by("external_id", ext) {
            Some(existing) if Some(existing) != except => Err(RelationalError::ConstraintViolation {
                table: Table::Clients.name(),
                message: format!("external_id {} already in use", ext),
            }),
            _ => Ok(()),
        }
    }

    fn check_purchase_refs(&self, row: &Row) -> Result<(), RelationalError> {
        let reference = |column: &str, target: &TableData| -> Result<(), RelationalError> {
            let id = row.get(column).and_then(Value::as_i64).ok_or_else(|| {
                RelationalError::InvalidRow {
                    table: Table::Purchases.name(),
                    message: format!("{} must be an integer", column),
                }
            })?;
            if target.rows.contains_key(&id) {
                Ok(())
            } else {
                Err(RelationalError::ConstraintViolation {
                    table: Table::Purchases.name(),
                    message: format!("{} {} does not reference an existing row", column, id),
                })
            }
        };
        reference("client_id", &self.clients)?;
        reference("product_id", &self.products)
    }
}

/// In-memory relational store with foreign-key checks and cascading
/// client deletes.
pub struct InMemoryRelationalStore {
    tables: RwLock<Tables>,
    online: AtomicBool,
}

impl InMemoryRelationalStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            online: AtomicBool::new(true),
        }
    }

    /// Toggle availability. While offline every statement fails with
    /// [`RelationalError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.online.store(available, Ordering::SeqCst);
    }

    /// Row count of a table
    pub async fn count(&self, table: Table) -> usize {
        let tables = self.tables.read().await;
        match table {
            Table::Clients => tables.clients.rows.len(),
            Table::Products => tables.products.rows.len(),
            Table::Purchases => tables.purchases.rows.len(),
        }
    }

    fn check(&self, op: &str) -> Result<(), RelationalError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RelationalError::Unavailable(format!("{op}: database unreachable")))
        }
    }
}

impl Default for InMemoryRelationalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelationalStore for InMemoryRelationalStore {
    async fn query(&self, query: &RelationalQuery) -> Result<Vec<Row>, RelationalError> {
        self.check("query")?;
        let tables = self.tables.read().await;

        let rows: Vec<Row> = match query {
            RelationalQuery::AllClients => tables.clients.rows.values().cloned().collect(),
            RelationalQuery::ClientByExternalId(ext) => tables
                .client_id(&ClientKey::ExternalId(ext.clone()))
                .and_then(|id| tables.clients.rows.get(&id).cloned())
                .into_iter()
                .collect(),
            RelationalQuery::ClientById(id) => {
                tables.clients.rows.get(id).cloned().into_iter().collect()
            }
            RelationalQuery::AllProducts => tables.products.rows.values().cloned().collect(),
            RelationalQuery::ProductById(id) => {
                tables.products.rows.get(id).cloned().into_iter().collect()
            }
            RelationalQuery::PurchasesByClient(client_id) => tables
                .purchases
                .rows
                .values()
                .filter(|row| row.get("client_id").and_then(Value::as_i64) == Some(*client_id))
                .cloned()
                .collect(),
            RelationalQuery::AllPurchases => tables.purchases.rows.values().cloned().collect(),
        };

        debug!(?query, rows = rows.len(), "Relational query");
        Ok(rows)
    }

    async fn execute(
        &self,
        command: &RelationalCommand,
        returning: bool,
    ) -> Result<Option<Row>, RelationalError> {
        self.check("execute")?;
        let mut tables = self.tables.write().await;

        let affected = match command {
            RelationalCommand::InsertClient(row) => {
                tables.check_unique_external_id(row, None)?;
                Some(tables.clients.insert(Table::Clients, row.clone())?)
            }
            RelationalCommand::UpdateClient { key, changes } => match tables.client_id(key) {
                Some(id) => {
                    tables.check_unique_external_id(changes, Some(id))?;
                    tables.clients.update(id, changes)
                }
                None => None,
            },
            RelationalCommand::DeleteClient(key) => match tables.client_id(key) {
                Some(id) => {
                    let before = tables.purchases.rows.len();
                    tables
                        .purchases
                        .rows
                        .retain(|_, row| row.get("client_id").and_then(Value::as_i64) != Some(id));
                    let cascaded = before - tables.purchases.rows.len();
                    debug!(client_id = id, cascaded, "Cascaded purchase delete");
                    tables.clients.rows.remove(&id)
                }
                None => None,
            },
            RelationalCommand::InsertProduct(row) => {
                Some(tables.products.insert(Table::Products, row.clone())?)
            }
            RelationalCommand::UpdateProduct { id, changes } => tables.products.update(*id, changes),
            RelationalCommand::DeleteProduct(id) => {
                let referenced = tables
                    .purchases
                    .rows
                    .values()
                    .any(|row| row.get("product_id").and_then(Value::as_i64) == Some(*id));
                if referenced {
                    return Err(RelationalError::ConstraintViolation {
                        table: Table::Products.name(),
                        message: format!("product {} is referenced by purchases", id),
                    });
                }
                tables.products.rows.remove(id)
            }
            RelationalCommand::InsertPurchase(row) => {
                tables.check_purchase_refs(row)?;
                Some(tables.purchases.insert(Table::Purchases, row.clone())?)
            }
            RelationalCommand::DeletePurchase(id) => tables.purchases.rows.remove(id),
            RelationalCommand::Truncate => {
                *tables = Tables::default();
                info!("Truncated all relational tables");
                None
            }
        };

        Ok(if returning { affected } else { None })
    }
}
