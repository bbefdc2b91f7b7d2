//!
//! src/persistent.rs  Oct 18th, 2026
//!
//! Local document store backed by sqlite. Emulates the collection/document
//! api of the remote store (create-by-id, update-by-id, equality query) so
//! the pipeline can run without cloud credentials.
//!

use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions, Pool, Row, Sqlite};

use crate::errors::IngestError;
use crate::store::{validate_field, DocumentStore};

pub struct Persistent {
    pool: Pool<Sqlite>
}

impl Persistent {

    async fn ensure_schema(pool: &Pool<Sqlite>) -> Result<(), IngestError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS documents (
              collection  TEXT NOT NULL,
              id          TEXT NOT NULL,
              body        TEXT NOT NULL,
              created_at  INTEGER NOT NULL,
              updated_at  INTEGER NOT NULL,
              PRIMARY KEY (collection, id)
            );
            "
        ).execute(pool).await?;

        // dedup lookups hit this on every candidate; find_by_field must spell
        // the expression the same way for sqlite to use it
        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_documents_fingerprint
                ON documents(collection, json_extract(body, '$.fingerprint'));
            "
        ).execute(pool).await?;

        Ok(())
    }

    pub async fn init(database_url: &str) -> Result<Self, IngestError> {
        let is_memory = database_url == "sqlite::memory:";

        let mut opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true);

        // WAL is file-only; don't set it for in-memory
        if !is_memory {
            let filename = opts.clone().get_filename();
            if let Some(parent) = filename.parent() {
                std::fs::create_dir_all(parent)?;
            }
            opts = opts.journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                       .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        }

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(if is_memory {1} else {8})
            .connect_with(opts)
            .await?;

        Self::ensure_schema(&pool).await?;

        Ok(Self { pool })
    }

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub async fn count(&self, collection: &str) -> Result<i64, IngestError> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1;"
        )
        .bind(collection)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    #[cfg(test)]
    pub async fn get(&self, collection: &str, id: &str) ->
        Result<Option<Value>, IngestError> {
        let row = sqlx::query(
            "SELECT body FROM documents WHERE collection = ?1 AND id = ?2;"
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| serde_json::from_str(&r.get::<String, _>("body")))
            .transpose()
            .map_err(IngestError::from)
    }
}

#[async_trait]
impl DocumentStore for Persistent {
    /// Same semantics as a remote set: an existing document is replaced
    async fn try_create(&self, collection: &str, id: &str, doc: &Value) ->
        Result<(), IngestError> {
        if !doc.is_object() {
            return Err(IngestError::Validation("document must be an object".into()));
        }

        sqlx::query(
            r"
            INSERT INTO documents (collection, id, body, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(collection, id) DO UPDATE SET
                body = excluded.body, updated_at = excluded.updated_at;
            "
        )
        .bind(collection)
        .bind(id)
        .bind(serde_json::to_string(doc)?)
        .bind(Self::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Merges top level fields into an existing document
    async fn try_update(&self, collection: &str, id: &str, fields: &Value) ->
        Result<(), IngestError> {
        let Some(patch) = fields.as_object() else {
            return Err(IngestError::Validation("update fields must be an object".into()));
        };

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT body FROM documents WHERE collection = ?1 AND id = ?2;"
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(IngestError::Db(format!("no document {collection}/{id}")));
        };

        let mut body: Value = serde_json::from_str(&row.get::<String, _>("body"))?;
        if let Some(object) = body.as_object_mut() {
            for (k, v) in patch {
                object.insert(k.clone(), v.clone());
            }
        }

        sqlx::query(
            "UPDATE documents SET body = ?1, updated_at = ?2 WHERE collection = ?3 AND id = ?4;"
        )
        .bind(serde_json::to_string(&body)?)
        .bind(Self::now())
        .bind(collection)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_field(&self, collection: &str, field: &str, value: &str) ->
        Result<Vec<Value>, IngestError> {
        validate_field(field)?;

        // field is [A-Za-z0-9_]+ here, safe to inline
        let sql = format!(
            "SELECT body FROM documents \
              WHERE collection = ?1 AND json_extract(body, '$.{field}') = ?2 \
              ORDER BY created_at ASC;"
        );
        let rows = sqlx::query(&sql)
            .bind(collection)
            .bind(value)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| serde_json::from_str(&r.get::<String, _>("body")).map_err(IngestError::from))
            .collect()
    }
}
