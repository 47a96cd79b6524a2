//! SQLite-backed message persistence behind the `MessageStore` seam.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::ConversationId;

type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

/// A persisted chat message, newest-first in every fetch.
#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: ConversationId,
    pub user_id: i64,
    pub text: String,
    /// Unix milliseconds.
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub user_id: i64,
    pub text: String,
}

/// Persistence collaborator for the engine. The engine only reads; the
/// API layer writes. All methods can fail with a transport/storage
/// error, which the engine maps to `StoreUnavailable`.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, msg: NewMessage) -> Result<StoredMessage, StoreError>;

    /// Messages for a conversation, newest first, with limit/offset
    /// paging.
    async fn fetch_by_conversation(
        &self,
        id: ConversationId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredMessage>, StoreError>;

    async fn count_by_conversation(&self, id: ConversationId) -> Result<usize, StoreError>;

    /// Every conversation id with at least one stored message.
    async fn list_conversation_ids(&self) -> Result<Vec<ConversationId>, StoreError>;

    /// Wipe a conversation's history. Returns how many rows went.
    async fn delete_by_conversation(&self, id: ConversationId) -> Result<usize, StoreError>;
}

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as i64
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    text TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversation_created
    ON messages(conversation_id, created_at DESC);
";

// Distinguishes concurrently open in-memory stores (tests run in one
// process; a plain ":memory:" shared cache would alias them).
static MEMORY_DB_SEQ: AtomicU64 = AtomicU64::new(0);

/// rusqlite store with an r2d2 pool, WAL mode on disk.
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Open (or create) a database at `path`. `:memory:` opens a
    /// uniquely named shared-cache in-memory database so every pooled
    /// connection sees the same store.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let pool_size = if path == ":memory:" { 2 } else { 8 };
        let manager = if path == ":memory:" {
            let seq = MEMORY_DB_SEQ.fetch_add(1, Ordering::Relaxed);
            SqliteConnectionManager::file(format!("file:parrot-mem-{seq}?mode=memory&cache=shared"))
        } else {
            SqliteConnectionManager::file(path)
        };
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        let conn = pool.get().map_err(|e| StoreError::Pool(e.to_string()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        drop(conn);

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConn, StoreError> {
        self.pool.get().map_err(|e| StoreError::Pool(e.to_string()))
    }

    /// Run a store operation on the blocking pool; rusqlite calls must
    /// not starve tokio worker threads.
    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| StoreError::Pool(e.to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        id: row.get("id")?,
        conversation_id: row.get("conversation_id")?,
        user_id: row.get("user_id")?,
        text: row.get("text")?,
        created_at: row.get("created_at")?,
    })
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append(&self, msg: NewMessage) -> Result<StoredMessage, StoreError> {
        self.blocking(move |conn| {
            let created_at = now_ms();
            conn.execute(
                "INSERT INTO messages (conversation_id, user_id, text, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![msg.conversation_id, msg.user_id, msg.text, created_at],
            )?;
            Ok(StoredMessage {
                id: conn.last_insert_rowid(),
                conversation_id: msg.conversation_id,
                user_id: msg.user_id,
                text: msg.text,
                created_at,
            })
        })
        .await
    }

    async fn fetch_by_conversation(
        &self,
        id: ConversationId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, user_id, text, created_at \
                 FROM messages WHERE conversation_id = ?1 \
                 ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(params![id, limit as i64, offset as i64], row_to_message)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn count_by_conversation(&self, id: ConversationId) -> Result<usize, StoreError> {
        self.blocking(move |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
        .await
    }

    async fn list_conversation_ids(&self) -> Result<Vec<ConversationId>, StoreError> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT conversation_id FROM messages ORDER BY conversation_id",
            )?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
        .await
    }

    async fn delete_by_conversation(&self, id: ConversationId) -> Result<usize, StoreError> {
        self.blocking(move |conn| {
            let n = conn.execute(
                "DELETE FROM messages WHERE conversation_id = ?1",
                params![id],
            )?;
            Ok(n)
        })
        .await
    }
}
