//! 记忆持久化：统一后端接口与启动时的一次性后端选择
//!
//! 优先使用逐条存储的 SQLite（按 id 索引，type / timestamp 二级索引）；
//! 打不开时降级为平面键值文件里的单个 JSON blob。选择只在初始化时做一次，之后不再切换。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::memory::{FlatFileBackend, MemoryItem, SqliteBackend, TaskHistory};

/// 当前使用的后端
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Sqlite,
    FlatFile,
    /// 未配置持久化（仅内存）
    Volatile,
}

/// 需要持久化的部分：长期记忆与任务历史
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedMemory {
    #[serde(default)]
    pub long_term_memory: Vec<MemoryItem>,
    #[serde(default)]
    pub task_history: Vec<TaskHistory>,
}

/// 两次快照之间的差异：新增或内容变化的记录，以及被移除的 id
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemoryDelta {
    pub upsert_memories: Vec<MemoryItem>,
    pub delete_memories: Vec<String>,
    pub upsert_tasks: Vec<TaskHistory>,
    pub delete_tasks: Vec<String>,
}

impl MemoryDelta {
    pub fn between(previous: &PersistedMemory, current: &PersistedMemory) -> Self {
        let old_items: HashMap<&str, &MemoryItem> =
            previous.long_term_memory.iter().map(|i| (i.id.as_str(), i)).collect();
        let new_items: HashMap<&str, &MemoryItem> =
            current.long_term_memory.iter().map(|i| (i.id.as_str(), i)).collect();
        let old_tasks: HashMap<&str, &TaskHistory> =
            previous.task_history.iter().map(|t| (t.task_id.as_str(), t)).collect();
        let new_tasks: HashMap<&str, &TaskHistory> =
            current.task_history.iter().map(|t| (t.task_id.as_str(), t)).collect();

        Self {
            upsert_memories: current
                .long_term_memory
                .iter()
                .filter(|i| old_items.get(i.id.as_str()).copied() != Some(*i))
                .cloned()
                .collect(),
            delete_memories: previous
                .long_term_memory
                .iter()
                .filter(|i| !new_items.contains_key(i.id.as_str()))
                .map(|i| i.id.clone())
                .collect(),
            upsert_tasks: current
                .task_history
                .iter()
                .filter(|t| old_tasks.get(t.task_id.as_str()).copied() != Some(*t))
                .cloned()
                .collect(),
            delete_tasks: previous
                .task_history
                .iter()
                .filter(|t| !new_tasks.contains_key(t.task_id.as_str()))
                .map(|t| t.task_id.clone())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.upsert_memories.is_empty()
            && self.delete_memories.is_empty()
            && self.upsert_tasks.is_empty()
            && self.delete_tasks.is_empty()
    }
}

/// 持久化后端接口
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// 读取全部已持久化的记录
    async fn load(&self) -> Result<PersistedMemory, AgentError>;

    /// 写入完整快照（后端负责删除快照中已不存在的记录）
    async fn save(&self, snapshot: &PersistedMemory) -> Result<(), AgentError>;

    /// 只写入变化的记录；不支持逐条写入的后端退化为整快照写入
    async fn apply(&self, delta: &MemoryDelta, snapshot: &PersistedMemory) -> Result<(), AgentError> {
        let _ = delta;
        self.save(snapshot).await
    }
}

/// 选择后端：SQLite 可用则用 SQLite，否则降级为平面文件
pub async fn select_backend(db_path: &Path, fallback_path: &Path) -> Arc<dyn MemoryBackend> {
    match SqliteBackend::open(db_path.to_path_buf()).await {
        Ok(backend) => {
            tracing::info!(path = %db_path.display(), "Memory backend: sqlite");
            Arc::new(backend)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                fallback = %fallback_path.display(),
                "SQLite unavailable, degrading to flat-file memory backend"
            );
            Arc::new(FlatFileBackend::new(fallback_path))
        }
    }
}
