//! # Harbor Database
//!
//! Single SQLite database backing the persistent cache storage and the shared
//! key-value storage area. Lives at `.harbor/harbor.db` by default.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Default database location
pub const DEFAULT_DB_PATH: &str = ".harbor/harbor.db";

/// Unified database manager for Harbor state
#[derive(Clone)]
pub struct HarborDb {
    conn: Arc<Mutex<Connection>>,
}

impl HarborDb {
    /// Open database at a specific path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("Failed to open harbor database: {:?}", path.as_ref()))?;

        Self::from_connection(conn)
    }

    /// Open a private in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Get a shared connection for use by other modules
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Run schema migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [1],
            )?;
        }

        Ok(())
    }

    /// Migration to version 1 - caches and storage
    fn migrate_v1(conn: &Connection) -> Result<()> {
        // Named caches (primary per deployment + font cache)
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS caches (
                name TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        // Cached responses keyed by absolute request URL
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                cache_name TEXT NOT NULL,
                request_key TEXT NOT NULL,
                status INTEGER NOT NULL,
                headers_json TEXT NOT NULL DEFAULT '[]',
                body BLOB NOT NULL,
                stored_at TEXT NOT NULL,
                PRIMARY KEY (cache_name, request_key)
            )
            "#,
            [],
        )?;

        // Shared key-value storage area
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS local_storage (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
            [],
        )?;

        tracing::info!(
            "HarborDb initialized with schema version {}",
            SCHEMA_VERSION
        );

        Ok(())
    }
}
