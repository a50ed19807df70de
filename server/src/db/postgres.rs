//! PostgreSQL document store.
//!
//! Documents live in the `documents` table as JSONB, keyed by collection and
//! the JSON form of their key.
//!
//! Top-level scalar equality clauses of a native query become a JSONB
//! containment test (`record @> $2`, served by a GIN index), so PostgreSQL
//! only returns candidate rows. The full query is then evaluated on those
//! rows, so the store accepts exactly the operators the in-memory backend
//! does. Range, membership and regex clauses are not pushed down.

use super::{page, DocumentStore, Pool};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use rtdb_engine::{matches_document_query, FindOptions, Key};
use serde_json::{Map, Value};
use sqlx::Row;

/// A stored document row.
#[derive(Debug)]
pub struct StoredDocument {
    pub collection: String,
    pub key: Value,
    pub record: Value,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredDocument {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredDocument {
            collection: row.try_get("collection")?,
            key: row.try_get("key")?,
            record: row.try_get("record")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: Pool,
}

impl PgDocumentStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Rows of `collection` whose record contains `containment`.
    async fn load(&self, collection: &str, containment: Option<&Value>) -> Result<Vec<StoredDocument>> {
        let rows = sqlx::query_as::<_, StoredDocument>(
            r#"
            SELECT collection, key, record, updated_at
            FROM documents
            WHERE collection = $1
              AND ($2::jsonb IS NULL OR record @> $2::jsonb)
            ORDER BY key
            "#,
        )
        .bind(collection)
        .bind(containment)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn matching(&self, collection: &str, query: &Value) -> Result<Vec<Value>> {
        let containment = containment_filter(query);
        tracing::trace!(collection, pushed_down = containment.is_some(), "Loading documents");
        Ok(self
            .load(collection, containment.as_ref())
            .await?
            .into_iter()
            .map(|row| row.record)
            .filter(|record| matches_document_query(record, query))
            .collect())
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn insert(&self, collection: &str, key: &Key, document: Value) -> Result<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO documents (collection, key, record)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection, key) DO NOTHING
            "#,
        )
        .bind(collection)
        .bind(key.to_value())
        .bind(&document)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(AppError::Conflict(format!("{collection}/{key}")));
        }
        Ok(())
    }

    async fn update(&self, collection: &str, key: &Key, document: Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (collection, key, record)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection, key) DO UPDATE SET
                record = EXCLUDED.record,
                updated_at = NOW()
            "#,
        )
        .bind(collection)
        .bind(key.to_value())
        .bind(&document)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &Key) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM documents WHERE collection = $1 AND key = $2")
            .bind(collection)
            .bind(key.to_value())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    async fn find(&self, collection: &str, options: &FindOptions) -> Result<Vec<Value>> {
        let documents = self.matching(collection, &options.query).await?;
        Ok(page(documents, options))
    }

    async fn count(&self, collection: &str, query: &Value) -> Result<usize> {
        Ok(self.matching(collection, query).await?.len())
    }
}

/// JSONB object every matching record must contain, if the query has any
/// top-level scalar equality clauses.
///
/// Only plain fields are used: dotted paths may index into arrays, which
/// containment does not model. Clauses nested in `$and` are included; `$or`
/// and `$nor` branches are not.
pub fn containment_filter(query: &Value) -> Option<Value> {
    let mut fields = Map::new();
    collect_equalities(query, &mut fields);
    (!fields.is_empty()).then_some(Value::Object(fields))
}

fn collect_equalities(query: &Value, fields: &mut Map<String, Value>) {
    let Value::Object(clauses) = query else {
        return;
    };
    for (field, condition) in clauses {
        if field == "$and" {
            for operand in condition.as_array().into_iter().flatten() {
                collect_equalities(operand, fields);
            }
            continue;
        }
        if field.starts_with('$') || field.contains('.') || fields.contains_key(field) {
            continue;
        }
        let expected = match condition {
            Value::Object(ops) if ops.len() == 1 => ops.get("$eq"),
            other => Some(other),
        };
        if let Some(value @ (Value::String(_) | Value::Number(_) | Value::Bool(_))) = expected {
            fields.insert(field.clone(), value.clone());
        }
    }
}
