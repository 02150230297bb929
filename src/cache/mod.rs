//! Content-addressed cache over pooled SQLite
//!
//! One key-value table serves both cache kinds: embedding vectors (never
//! expire) and generated answers (expire after a configured TTL). Keys are
//! blake3 hashes of the exact input text, namespaced by kind. The cache is
//! an accelerator only; callers treat an unreachable backend as a degraded
//! mode, never a failure.

use std::path::{Path, PathBuf};
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use thiserror::Error;

/// Cache connection pool
pub type CachePool = Pool<SqliteConnectionManager>;

/// Errors raised by the cache store
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to open cache at {path}: {message}")]
    Open { path: PathBuf, message: String },

    #[error("Cache pool error: {0}")]
    Pool(String),

    #[error("Cache database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Cache key namespace, one per payload kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Text-content hash → embedding vector; permanent
    Embedding,
    /// Question hash → generated answer; expires after the answer TTL
    Answer,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Embedding => "embedding",
            Namespace::Answer => "answer",
        }
    }
}

const MIGRATIONS: &[&str] = &["
    CREATE TABLE IF NOT EXISTS cache_entries (
        namespace TEXT NOT NULL,
        key TEXT NOT NULL,
        value BLOB NOT NULL,
        created_at INTEGER NOT NULL,
        expires_at INTEGER,
        PRIMARY KEY (namespace, key)
    );
    CREATE INDEX IF NOT EXISTS idx_cache_expiry ON cache_entries(expires_at)
        WHERE expires_at IS NOT NULL;
"];

/// Key-value store with per-key expiry and last-write-wins semantics
pub struct CacheStore {
    pool: CachePool,
}

impl CacheStore {
    /// Open (or create) the cache database at the given path
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| CacheError::Open {
                    path: path.to_path_buf(),
                    message: format!("cannot create parent directory: {}", e),
                })?;
            }
        }

        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| CacheError::Open {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        {
            let conn = pool.get().map_err(|e| CacheError::Pool(e.to_string()))?;
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
        }

        let store = Self { pool };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>, CacheError> {
        self.pool.get().map_err(|e| CacheError::Pool(e.to_string()))
    }

    fn migrate(&self) -> Result<(), CacheError> {
        let conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::debug!("Applying cache migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Content-addressed key for a text input (blake3, truncated hex)
    pub fn content_key(text: &str) -> String {
        let hash = blake3::hash(text.as_bytes());
        format!("{:.32}", hash.to_hex())
    }

    /// Look up a live entry. Expired entries are removed and reported as
    /// misses.
    pub fn get(&self, namespace: Namespace, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let conn = self.conn()?;
        let row: Option<(Vec<u8>, Option<i64>)> = conn
            .query_row(
                "SELECT value, expires_at FROM cache_entries
                 WHERE namespace = ?1 AND key = ?2",
                params![namespace.as_str(), key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((value, expires_at)) => {
                if let Some(expiry) = expires_at {
                    if chrono::Utc::now().timestamp() >= expiry {
                        conn.execute(
                            "DELETE FROM cache_entries WHERE namespace = ?1 AND key = ?2",
                            params![namespace.as_str(), key],
                        )?;
                        return Ok(None);
                    }
                }
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Insert or overwrite an entry. `ttl = None` means the entry never
    /// expires.
    pub fn put(
        &self,
        namespace: Namespace,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let now = chrono::Utc::now().timestamp();
        let expires_at = ttl.map(|d| now + d.as_secs() as i64);

        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO cache_entries (namespace, key, value, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![namespace.as_str(), key, value, now, expires_at],
        )?;
        Ok(())
    }

    /// Remove every entry in a namespace; returns the removed count
    pub fn clear(&self, namespace: Namespace) -> Result<usize, CacheError> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM cache_entries WHERE namespace = ?1",
            params![namespace.as_str()],
        )?;
        Ok(removed)
    }

    /// Remove everything in all namespaces; returns the removed count
    pub fn clear_all(&self) -> Result<usize, CacheError> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM cache_entries", [])?;
        Ok(removed)
    }

    /// Live entry count for a namespace (expired entries excluded)
    pub fn count(&self, namespace: Namespace) -> Result<usize, CacheError> {
        let now = chrono::Utc::now().timestamp();
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries
             WHERE namespace = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
            params![namespace.as_str(), now],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
