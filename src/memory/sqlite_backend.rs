//! SQLite 记录存储（逐条持久化）
//!
//! 两张表：long_term_memory（id 主键，type / timestamp 索引）与 task_history（task_id 主键，start_time 索引）。
//! 每条记录的完整 JSON 存在 payload 列；rusqlite 为同步 API，统一放到 spawn_blocking 中执行。

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::core::AgentError;
use crate::memory::{BackendKind, MemoryBackend, MemoryDelta, MemoryItem, PersistedMemory, TaskHistory};

/// 记录集合
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Collection {
    LongTerm,
    TaskHistory,
}

impl Collection {
    fn table(&self) -> &'static str {
        match self {
            Collection::LongTerm => "long_term_memory",
            Collection::TaskHistory => "task_history",
        }
    }

    fn key_column(&self) -> &'static str {
        match self {
            Collection::LongTerm => "id",
            Collection::TaskHistory => "task_id",
        }
    }

    fn order_column(&self) -> &'static str {
        match self {
            Collection::LongTerm => "timestamp",
            Collection::TaskHistory => "start_time",
        }
    }
}

pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// 打开（或创建）数据库文件并建表
    pub async fn open(path: PathBuf) -> Result<Self, AgentError> {
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, AgentError> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let conn = Connection::open(&path)?;
            init_tables(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| AgentError::Persistence(e.to_string()))??;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, AgentError> {
        let conn = Connection::open_in_memory()?;
        init_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, AgentError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, AgentError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        })
        .await
        .map_err(|e| AgentError::Persistence(e.to_string()))?
    }

    /// 按 id 读取单条原始记录（JSON）
    pub async fn get(&self, collection: Collection, id: &str) -> Result<Option<String>, AgentError> {
        let id = id.to_string();
        self.with_conn(move |conn| get_record(conn, collection, &id)).await
    }

    /// 读取集合内全部原始记录，按时间正序
    pub async fn get_all(&self, collection: Collection) -> Result<Vec<String>, AgentError> {
        self.with_conn(move |conn| get_all_records(conn, collection)).await
    }

    pub async fn put_memory(&self, item: &MemoryItem) -> Result<(), AgentError> {
        let item = item.clone();
        self.with_conn(move |conn| put_memory(conn, &item)).await
    }

    pub async fn put_task(&self, task: &TaskHistory) -> Result<(), AgentError> {
        let task = task.clone();
        self.with_conn(move |conn| put_task(conn, &task)).await
    }

    pub async fn delete(&self, collection: Collection, id: &str) -> Result<bool, AgentError> {
        let id = id.to_string();
        self.with_conn(move |conn| delete_record(conn, collection, &id)).await
    }
}

fn init_tables(conn: &Connection) -> Result<(), AgentError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS long_term_memory (
            id TEXT PRIMARY KEY,
            type TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            payload TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_memory_type ON long_term_memory(type);
        CREATE INDEX IF NOT EXISTS idx_memory_timestamp ON long_term_memory(timestamp);
        CREATE TABLE IF NOT EXISTS task_history (
            task_id TEXT PRIMARY KEY,
            start_time INTEGER NOT NULL,
            success INTEGER NOT NULL,
            payload TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_task_start ON task_history(start_time);",
    )?;
    Ok(())
}

fn get_record(conn: &Connection, collection: Collection, id: &str) -> Result<Option<String>, AgentError> {
    let sql = format!(
        "SELECT payload FROM {} WHERE {} = ?1",
        collection.table(),
        collection.key_column()
    );
    Ok(conn
        .query_row(&sql, params![id], |row| row.get::<_, String>(0))
        .optional()?)
}

fn get_all_records(conn: &Connection, collection: Collection) -> Result<Vec<String>, AgentError> {
    // rowid 作为同一时间戳内的插入顺序
    let sql = format!(
        "SELECT payload FROM {} ORDER BY {} ASC, rowid ASC",
        collection.table(),
        collection.order_column()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn put_memory(conn: &Connection, item: &MemoryItem) -> Result<(), AgentError> {
    let payload = serde_json::to_string(item).map_err(|e| AgentError::Persistence(e.to_string()))?;
    conn.execute(
        "INSERT INTO long_term_memory (id, type, timestamp, payload) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET type = excluded.type, timestamp = excluded.timestamp, payload = excluded.payload",
        params![item.id, item.kind.as_str(), item.timestamp, payload],
    )?;
    Ok(())
}

fn put_task(conn: &Connection, task: &TaskHistory) -> Result<(), AgentError> {
    let payload = serde_json::to_string(task).map_err(|e| AgentError::Persistence(e.to_string()))?;
    conn.execute(
        "INSERT INTO task_history (task_id, start_time, success, payload) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(task_id) DO UPDATE SET start_time = excluded.start_time, success = excluded.success, payload = excluded.payload",
        params![task.task_id, task.start_time, task.success, payload],
    )?;
    Ok(())
}

fn delete_record(conn: &Connection, collection: Collection, id: &str) -> Result<bool, AgentError> {
    let sql = format!(
        "DELETE FROM {} WHERE {} = ?1",
        collection.table(),
        collection.key_column()
    );
    Ok(conn.execute(&sql, params![id])? > 0)
}

fn existing_ids(conn: &Connection, collection: Collection) -> Result<Vec<String>, AgentError> {
    let sql = format!("SELECT {} FROM {}", collection.key_column(), collection.table());
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn decode_all<T: serde::de::DeserializeOwned>(payloads: Vec<String>, collection: Collection) -> Vec<T> {
    payloads
        .into_iter()
        .filter_map(|p| match serde_json::from_str(&p) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(table = collection.table(), error = %e, "Skipping unreadable record");
                None
            }
        })
        .collect()
}

#[async_trait]
impl MemoryBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn load(&self) -> Result<PersistedMemory, AgentError> {
        let memories = self.get_all(Collection::LongTerm).await?;
        let tasks = self.get_all(Collection::TaskHistory).await?;
        Ok(PersistedMemory {
            long_term_memory: decode_all(memories, Collection::LongTerm),
            task_history: decode_all(tasks, Collection::TaskHistory),
        })
    }

    async fn save(&self, snapshot: &PersistedMemory) -> Result<(), AgentError> {
        let snapshot = snapshot.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let keep_memories: std::collections::HashSet<&str> =
                snapshot.long_term_memory.iter().map(|i| i.id.as_str()).collect();
            for id in existing_ids(&tx, Collection::LongTerm)? {
                if !keep_memories.contains(id.as_str()) {
                    delete_record(&tx, Collection::LongTerm, &id)?;
                }
            }
            let keep_tasks: std::collections::HashSet<&str> =
                snapshot.task_history.iter().map(|t| t.task_id.as_str()).collect();
            for id in existing_ids(&tx, Collection::TaskHistory)? {
                if !keep_tasks.contains(id.as_str()) {
                    delete_record(&tx, Collection::TaskHistory, &id)?;
                }
            }
            for item in &snapshot.long_term_memory {
                put_memory(&tx, item)?;
            }
            for task in &snapshot.task_history {
                put_task(&tx, task)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// 单个事务内逐条写入变化的记录
    async fn apply(&self, delta: &MemoryDelta, _snapshot: &PersistedMemory) -> Result<(), AgentError> {
        if delta.is_empty() {
            return Ok(());
        }
        let delta = delta.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for id in &delta.delete_memories {
                delete_record(&tx, Collection::LongTerm, id)?;
            }
            for id in &delta.delete_tasks {
                delete_record(&tx, Collection::TaskHistory, id)?;
            }
            for item in &delta.upsert_memories {
                put_memory(&tx, item)?;
            }
            for task in &delta.upsert_tasks {
                put_task(&tx, task)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}
