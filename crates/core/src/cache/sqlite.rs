//! # SQLite Cache Storage
//!
//! Persistent cache storage using the shared `HarborDb` connection.
//! Batches are written inside a single transaction.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

use super::names::CacheName;
use super::request::CachedResponse;
use super::storage::CacheStorage;
use crate::db::HarborDb;
use crate::error::CacheError;

/// SQLite-backed cache storage using shared HarborDb connection
pub struct SqliteCacheStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCacheStorage {
    /// Create from shared HarborDb connection
    pub fn new(db: &HarborDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn
            .lock()
            .map_err(|e| CacheError::storage(format!("Lock error: {}", e)))
    }

    fn ensure_cache(conn: &Connection, name: &CacheName) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO caches (name, created_at) VALUES (?1, ?2)",
            params![name.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn insert_entry(
        conn: &Connection,
        name: &CacheName,
        key: &str,
        response: &CachedResponse,
        stored_at: &str,
    ) -> Result<(), CacheError> {
        let headers_json = serde_json::to_string(&response.headers).map_err(CacheError::storage)?;
        conn.execute(
            r#"
            INSERT INTO cache_entries (cache_name, request_key, status, headers_json, body, stored_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(cache_name, request_key) DO UPDATE SET
                status = ?3,
                headers_json = ?4,
                body = ?5,
                stored_at = ?6
            "#,
            params![
                name.as_str(),
                key,
                response.status as i64,
                headers_json,
                response.body,
                stored_at,
            ],
        )
        .map_err(CacheError::storage)?;
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for SqliteCacheStorage {
    async fn open(&self, name: &CacheName) -> Result<(), CacheError> {
        let conn = self.lock()?;
        Self::ensure_cache(&conn, name).map_err(CacheError::storage)
    }

    async fn has(&self, name: &CacheName) -> Result<bool, CacheError> {
        let conn = self.lock()?;
        let found: Option<String> = conn
            .query_row(
                "SELECT name FROM caches WHERE name = ?1",
                params![name.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(CacheError::storage)?;
        Ok(found.is_some())
    }

    async fn keys(&self) -> Result<Vec<CacheName>, CacheError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT name FROM caches ORDER BY created_at, rowid")
            .map_err(CacheError::storage)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(CacheError::storage)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(CacheError::storage)?;
        Ok(names.into_iter().map(CacheName::from).collect())
    }

    async fn delete(&self, name: &CacheName) -> Result<bool, CacheError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(CacheError::storage)?;
        tx.execute(
            "DELETE FROM cache_entries WHERE cache_name = ?1",
            params![name.as_str()],
        )
        .map_err(CacheError::storage)?;
        let removed = tx
            .execute("DELETE FROM caches WHERE name = ?1", params![name.as_str()])
            .map_err(CacheError::storage)?;
        tx.commit().map_err(CacheError::storage)?;
        Ok(removed > 0)
    }

    async fn match_request(
        &self,
        name: &CacheName,
        key: &str,
    ) -> Result<Option<CachedResponse>, CacheError> {
        let conn = self.lock()?;
        let row: Option<(i64, String, Vec<u8>)> = conn
            .query_row(
                r#"
                SELECT status, headers_json, body FROM cache_entries
                WHERE cache_name = ?1 AND request_key = ?2
                "#,
                params![name.as_str(), key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(CacheError::storage)?;

        match row {
            Some((status, headers_json, body)) => Ok(Some(CachedResponse {
                status: status as u16,
                headers: serde_json::from_str(&headers_json).map_err(CacheError::storage)?,
                body,
            })),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        name: &CacheName,
        key: &str,
        response: CachedResponse,
    ) -> Result<(), CacheError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(CacheError::storage)?;
        Self::ensure_cache(&tx, name).map_err(CacheError::storage)?;
        Self::insert_entry(&tx, name, key, &response, &Utc::now().to_rfc3339())?;
        tx.commit().map_err(CacheError::storage)
    }

    async fn put_all(
        &self,
        name: &CacheName,
        entries: Vec<(String, CachedResponse)>,
    ) -> Result<(), CacheError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(CacheError::storage)?;
        Self::ensure_cache(&tx, name).map_err(CacheError::storage)?;

        let stored_at = Utc::now().to_rfc3339();
        for (key, response) in &entries {
            // Dropping `tx` on error rolls the whole batch back
            Self::insert_entry(&tx, name, key, response, &stored_at)?;
        }

        tx.commit().map_err(CacheError::storage)?;
        tracing::debug!(cache = %name, entries = entries.len(), "Cache batch committed");
        Ok(())
    }
}
