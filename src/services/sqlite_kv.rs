// src/services/sqlite_kv.rs
//
// SQLite-backed key-value store with a composite (pk, sk) key and a TTL
// column. Writes are last-writer-wins per key; the single connection behind
// a mutex serializes them, which is all the atomicity the trackers and the
// cache rely on.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;
use tracing::{debug, info};

use super::{KeyValueStore, KvItem, StoreError};

pub struct SqliteKvStore {
    conn: Mutex<Connection>,
    table: String,
}

impl SqliteKvStore {
    pub fn open<P: AsRef<Path>>(path: P, table: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(backend)?;
        Self::init(conn, table)
    }

    pub fn open_in_memory(table: &str) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::init(conn, table)
    }

    fn init(conn: Connection, table: &str) -> Result<Self, StoreError> {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    pk TEXT NOT NULL,
                    sk TEXT NOT NULL,
                    body TEXT NOT NULL,
                    expires_at INTEGER,
                    PRIMARY KEY (pk, sk)
                )",
                table
            ),
            [],
        )
        .map_err(backend)?;

        info!(table = %table, "Initialized sqlite key-value table");

        Ok(Self {
            conn: Mutex::new(conn),
            table: table.to_string(),
        })
    }

    /// Remove rows whose TTL deadline has passed. Housekeeping only; reads
    /// never depend on it having run.
    pub fn purge_expired(&self, now: i64) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let purged = conn
            .execute(
                &format!(
                    "DELETE FROM {} WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                    self.table
                ),
                params![now],
            )
            .map_err(backend)?;
        if purged > 0 {
            debug!(purged, table = %self.table, "Purged expired rows");
        }
        Ok(purged)
    }
}

#[async_trait]
impl KeyValueStore for SqliteKvStore {
    async fn get_item(&self, pk: &str, sk: &str) -> Result<Option<KvItem>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT body, expires_at FROM {} WHERE pk = ?1 AND sk = ?2",
                self.table
            ))
            .map_err(backend)?;

        let mut rows = stmt
            .query_map(params![pk, sk], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(1)?))
            })
            .map_err(backend)?;

        match rows.next() {
            Some(row) => {
                let (body, expires_at) = row.map_err(backend)?;
                Ok(Some(KvItem {
                    pk: pk.to_string(),
                    sk: sk.to_string(),
                    body: serde_json::from_str(&body)?,
                    expires_at,
                }))
            }
            None => Ok(None),
        }
    }

    async fn put_item(&self, item: KvItem) -> Result<(), StoreError> {
        let body = serde_json::to_string(&item.body)?;
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (pk, sk, body, expires_at) VALUES (?1, ?2, ?3, ?4)",
                self.table
            ),
            params![item.pk, item.sk, body, item.expires_at],
        )
        .map_err(backend)?;
        Ok(())
    }

    async fn delete_item(&self, pk: &str, sk: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            &format!("DELETE FROM {} WHERE pk = ?1 AND sk = ?2", self.table),
            params![pk, sk],
        )
        .map_err(backend)?;
        Ok(())
    }

    async fn query(&self, pk: &str) -> Result<Vec<KvItem>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT sk, body, expires_at FROM {} WHERE pk = ?1 ORDER BY sk DESC",
                self.table
            ))
            .map_err(backend)?;

        let rows = stmt
            .query_map(params![pk], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                ))
            })
            .map_err(backend)?;

        let mut items = Vec::new();
        for row in rows {
            let (sk, body, expires_at) = row.map_err(backend)?;
            items.push(KvItem {
                pk: pk.to_string(),
                sk,
                body: serde_json::from_str(&body)?,
                expires_at,
            });
        }
        Ok(items)
    }
}

fn backend(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}
