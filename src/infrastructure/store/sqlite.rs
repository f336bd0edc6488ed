//! SQLite 人设存储
//!
//! 一张键值表，键沿用 `shape-text:{chat}` 与 `operator_msg:{chat}` 的格式，
//! 重启后绑定关系仍然保留

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};

use crate::core::persona::{operator_key, shape_key, PersonaStore};
use crate::errors::{BridgeError, Result};

/// SQLite 存储
pub struct SqlitePersonaStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePersonaStore {
    /// 打开（或创建）数据库文件
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// 创建内存数据库（用于测试）
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| BridgeError::Storage(format!("Failed to acquire database lock: {}", e)))?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// 在阻塞线程池中执行数据库操作
    async fn execute<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                BridgeError::Storage(format!("Failed to acquire database lock: {}", e))
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| BridgeError::Storage(format!("Task failed: {}", e)))?
    }

    async fn get(&self, key: String) -> Result<Option<String>> {
        self.execute(move |conn| {
            let value = conn
                .query_row("SELECT value FROM kv WHERE key = ?1", [&key], |row| row.get(0))
                .optional()?;
            Ok(value)
        })
        .await
    }

    async fn set(&self, key: String, value: String) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                rusqlite::params![key, value, chrono::Utc::now().timestamp()],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl PersonaStore for SqlitePersonaStore {
    async fn shape_for(&self, chat_id: &str) -> Result<Option<String>> {
        self.get(shape_key(chat_id)).await
    }

    async fn bind(&self, chat_id: &str, shape: &str) -> Result<()> {
        self.set(shape_key(chat_id), shape.to_string()).await
    }

    async fn operator_prompted(&self, chat_id: &str) -> Result<Option<bool>> {
        Ok(self
            .get(operator_key(chat_id))
            .await?
            .map(|v| v == "true"))
    }

    async fn set_operator_prompted(&self, chat_id: &str, sent: bool) -> Result<()> {
        self.set(operator_key(chat_id), sent.to_string()).await
    }
}
