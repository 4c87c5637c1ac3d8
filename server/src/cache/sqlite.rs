//! SQLite implementation of the CacheStorage trait

use crate::cache::{AssetError, AssetRequest, AssetResponse, CacheStorage};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// SQLite-backed blob store that survives restarts
pub struct SqliteCacheStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCacheStorage {
    /// Create a new SQLite cache storage
    ///
    /// If the database doesn't exist, it will be created with the required schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, AssetError> {
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    /// In-memory database, mostly useful for tests
    pub fn open_in_memory() -> Result<Self, AssetError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, AssetError> {
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, AssetError> {
        self.conn
            .lock()
            .map_err(|_| AssetError::LockPoisoned("sqlite cache storage"))
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<(), AssetError> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS namespaces (
                name TEXT PRIMARY KEY,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            [],
        )?;

        // One row per cached request; headers are a JSON array of pairs
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                namespace TEXT NOT NULL,
                method TEXT NOT NULL,
                url TEXT NOT NULL,
                response_url TEXT NOT NULL,
                status INTEGER NOT NULL,
                status_text TEXT NOT NULL,
                headers TEXT NOT NULL,
                body BLOB NOT NULL,
                redirected INTEGER NOT NULL,
                stored_at TEXT NOT NULL,
                PRIMARY KEY (namespace, method, url)
            )
            "#,
            [],
        )?;

        info!("Cache storage schema initialized");
        Ok(())
    }
}

#[async_trait::async_trait]
impl CacheStorage for SqliteCacheStorage {
    async fn open(&self, namespace: &str) -> Result<(), AssetError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO namespaces (name) VALUES (?1)",
            params![namespace],
        )?;
        Ok(())
    }

    async fn match_request(
        &self,
        namespace: &str,
        request: &AssetRequest,
    ) -> Result<Option<AssetResponse>, AssetError> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                r#"
                SELECT response_url, status, status_text, headers, body, redirected
                FROM entries
                WHERE namespace = ?1 AND method = ?2 AND url = ?3
                "#,
                params![namespace, request.method, request.url],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Vec<u8>>(4)?,
                        row.get::<_, bool>(5)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((url, status, status_text, headers, body, redirected)) => {
                let headers: Vec<(String, String)> = serde_json::from_str(&headers)?;
                Ok(Some(AssetResponse {
                    url,
                    status: status as u16,
                    status_text,
                    headers,
                    body: body.into(),
                    redirected,
                }))
            }
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        namespace: &str,
        request: &AssetRequest,
        response: &AssetResponse,
    ) -> Result<(), AssetError> {
        let headers = serde_json::to_string(&response.headers)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT OR IGNORE INTO namespaces (name) VALUES (?1)",
            params![namespace],
        )?;
        tx.execute(
            r#"
            INSERT OR REPLACE INTO entries
                (namespace, method, url, response_url, status, status_text, headers, body, redirected, stored_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                namespace,
                request.method,
                request.url,
                response.url,
                response.status as i64,
                response.status_text,
                headers,
                response.body.as_ref(),
                response.redirected,
                Utc::now().to_rfc3339()
            ],
        )?;
        tx.commit()?;

        debug!(
            "Stored {} in {} ({} bytes)",
            request,
            namespace,
            response.body.len()
        );
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, AssetError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT name FROM namespaces ORDER BY rowid")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    async fn delete(&self, namespace: &str) -> Result<bool, AssetError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM entries WHERE namespace = ?1", params![namespace])?;
        let removed = tx.execute("DELETE FROM namespaces WHERE name = ?1", params![namespace])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    async fn requests(&self, namespace: &str) -> Result<Vec<AssetRequest>, AssetError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT method, url FROM entries WHERE namespace = ?1 ORDER BY rowid")?;
        let requests = stmt
            .query_map(params![namespace], |row| {
                Ok(AssetRequest {
                    method: row.get(0)?,
                    url: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(requests)
    }

    fn storage_type(&self) -> &str {
        "sqlite"
    }
}
