//! Schemaless document storage keyed by `(collection, document_id)`.
//!
//! [`DocumentStore`] is the seam the rest of the workspace programs against;
//! [`PgDocumentStore`] backs it with a JSONB table and [`MemoryDocumentStore`]
//! keeps everything in process for local runs and tests.

use async_trait::async_trait;
use serde_json::Value;

mod memory;
mod postgres;

pub use memory::MemoryDocumentStore;
pub use postgres::{PgDocumentStore, migrate};

pub type Fields = serde_json::Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store operation timed out")]
    Timeout,
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },
    #[error("stored document is malformed: {0}")]
    Malformed(String),
    #[error("store sql error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("store migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<FieldFilter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
            offset: 0,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(FieldFilter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Creates a document and returns the identifier the store assigned to it.
    async fn add(&self, collection: &str, fields: Fields) -> Result<String, StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Merges `fields` into the top level of an existing document.
    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError>;

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Counts every document matching `filters`, ignoring any pagination.
    async fn count(&self, collection: &str, filters: &[FieldFilter]) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
