use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::Row;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use ulid::Ulid;

use crate::{Direction, Document, DocumentStore, FieldFilter, Fields, Query, StoreError};

#[derive(Clone)]
pub struct PgDocumentStore {
    pool: sqlx::PgPool,
    op_timeout: Duration,
}

impl PgDocumentStore {
    /// `database`, when given, replaces the database name carried by `db_url`.
    pub async fn connect(
        db_url: &str,
        database: Option<&str>,
        op_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let mut options = PgConnectOptions::from_str(db_url)?;
        if let Some(database) = database {
            options = options.database(database);
        }

        let pool = tokio::time::timeout(
            Duration::from_secs(5),
            PgPoolOptions::new().max_connections(8).connect_with(options),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(Self { pool, op_timeout })
    }

    pub async fn connect_and_migrate(
        db_url: &str,
        database: Option<&str>,
        op_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let store = Self::connect(db_url, database, op_timeout).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        tokio::time::timeout(Duration::from_secs(10), migrate(&self.pool))
            .await
            .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        Ok(tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout)??)
    }
}

pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Appends `AND data -> $n = $n+1` for each filter, starting at placeholder `first`.
fn push_filters(sql: &mut String, filters: &[FieldFilter], first: usize) -> usize {
    let mut next = first;
    for _ in filters {
        sql.push_str(&format!(" AND data -> ${} = ${}", next, next + 1));
        next += 2;
    }
    next
}

fn row_to_document(row: &PgRow) -> Result<Document, StoreError> {
    let id: String = row.try_get("document_id")?;
    let data: Value = row.try_get("data")?;

    match data {
        Value::Object(fields) => Ok(Document { id, fields }),
        _ => Err(StoreError::Malformed(format!(
            "document {} is not a JSON object",
            id
        ))),
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn add(&self, collection: &str, fields: Fields) -> Result<String, StoreError> {
        let id = Ulid::new().to_string();

        self.bounded(
            sqlx::query(
                "INSERT INTO kai_documents (collection, document_id, data) VALUES ($1, $2, $3)",
            )
            .bind(collection)
            .bind(&id)
            .bind(Value::Object(fields))
            .execute(&self.pool),
        )
        .await?;

        Ok(id)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let row = self
            .bounded(
                sqlx::query(
                    "SELECT document_id, data FROM kai_documents WHERE collection = $1 AND document_id = $2",
                )
                .bind(collection)
                .bind(id)
                .fetch_optional(&self.pool),
            )
            .await?;

        row.as_ref().map(row_to_document).transpose()
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError> {
        let result = self
            .bounded(
                sqlx::query(
                    "UPDATE kai_documents SET data = data || $3 WHERE collection = $1 AND document_id = $2",
                )
                .bind(collection)
                .bind(id)
                .bind(Value::Object(fields))
                .execute(&self.pool),
            )
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }

        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let mut sql =
            "SELECT document_id, data FROM kai_documents WHERE collection = $1".to_string();
        let mut next = push_filters(&mut sql, &query.filters, 2);

        if let Some(order_by) = query.order_by.as_ref() {
            let direction = match order_by.direction {
                Direction::Ascending => "ASC",
                Direction::Descending => "DESC",
            };
            sql.push_str(&format!(
                " ORDER BY (data ->> ${}) COLLATE \"C\" {} NULLS LAST, document_id {}",
                next, direction, direction
            ));
            next += 1;
        } else {
            sql.push_str(" ORDER BY document_id ASC");
        }

        if query.limit.is_some() {
            sql.push_str(&format!(" LIMIT ${}", next));
            next += 1;
        }
        sql.push_str(&format!(" OFFSET ${}", next));

        let mut q = sqlx::query(&sql).bind(&query.collection);
        for filter in &query.filters {
            q = q.bind(&filter.field).bind(&filter.value);
        }
        if let Some(order_by) = query.order_by.as_ref() {
            q = q.bind(&order_by.field);
        }
        if let Some(limit) = query.limit {
            q = q.bind(i64::from(limit));
        }
        q = q.bind(i64::from(query.offset));

        let rows = self.bounded(q.fetch_all(&self.pool)).await?;
        rows.iter().map(row_to_document).collect()
    }

    async fn count(&self, collection: &str, filters: &[FieldFilter]) -> Result<u64, StoreError> {
        let mut sql =
            "SELECT COUNT(*) AS total FROM kai_documents WHERE collection = $1".to_string();
        push_filters(&mut sql, filters, 2);

        let mut q = sqlx::query(&sql).bind(collection);
        for filter in filters {
            q = q.bind(&filter.field).bind(&filter.value);
        }

        let row = self.bounded(q.fetch_one(&self.pool)).await?;
        let total: i64 = row.try_get("total")?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.bounded(sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map(|_| ())
    }
}
