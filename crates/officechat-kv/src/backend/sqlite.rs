use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

use super::{prefix_upper_bound, KvBackend};
use crate::KvError;

/// Relational substitute for the byte-string store: a single two-column table.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Opens (creating when missing) the database at `url` and ensures the
    /// `kv_store` table exists. `sqlite::memory:` gives a private in-memory db.
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let in_memory = url.contains(":memory:");

        // An in-memory database lives and dies with its connection, so pin it to one.
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(4)
                .connect_with(options)
                .await?
        };

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS kv_store (
                   k BLOB PRIMARY KEY,
                   v BLOB NOT NULL
               )"#,
        )
        .execute(&pool)
        .await?;

        info!("SQLite kv store ready at {}", url);
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl KvBackend for SqliteBackend {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        let row = sqlx::query("SELECT v FROM kv_store WHERE k = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get::<Vec<u8>, _>("v")?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        sqlx::query(
            r#"INSERT INTO kv_store (k, v) VALUES (?1, ?2)
               ON CONFLICT (k) DO UPDATE SET v = excluded.v"#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        let result = sqlx::query("DELETE FROM kv_store WHERE k = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        debug!("Deleted {} row(s)", result.rows_affected());
        Ok(())
    }

    async fn has(&self, key: &[u8]) -> Result<bool, KvError> {
        let row = sqlx::query("SELECT 1 FROM kv_store WHERE k = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let rows = match prefix_upper_bound(prefix) {
            Some(end) => {
                sqlx::query("SELECT k, v FROM kv_store WHERE k >= ?1 AND k < ?2 ORDER BY k")
                    .bind(prefix)
                    .bind(end)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT k, v FROM kv_store WHERE k >= ?1 ORDER BY k")
                    .bind(prefix)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter()
            .map(|row| -> Result<(Vec<u8>, Vec<u8>), KvError> {
                Ok((row.try_get("k")?, row.try_get("v")?))
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_and_scan() {
        let kv = SqliteBackend::connect("sqlite::memory:").await.unwrap();
        kv.put(b"ai:1", b"one").await.unwrap();
        kv.put(b"ai:1", b"uno").await.unwrap();
        kv.put(b"ai:2", b"two").await.unwrap();
        kv.put(b"other", b"x").await.unwrap();

        assert_eq!(kv.get(b"ai:1").await.unwrap(), Some(b"uno".to_vec()));
        let rows = kv.scan_prefix(b"ai:").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], (b"ai:2".to_vec(), b"two".to_vec()));
    }

    #[tokio::test]
    async fn persists_across_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("kv.db").display());

        let kv = SqliteBackend::connect(&url).await.unwrap();
        kv.put(b"k", b"v").await.unwrap();
        kv.close().await;

        let kv = SqliteBackend::connect(&url).await.unwrap();
        assert!(kv.has(b"k").await.unwrap());
        kv.delete(b"k").await.unwrap();
        kv.delete(b"k").await.unwrap();
        assert_eq!(kv.get(b"k").await.unwrap(), None);
    }
}
