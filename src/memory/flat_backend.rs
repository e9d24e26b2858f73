//! 平面键值存储降级后端
//!
//! 整个键值空间是一个 JSON 对象文件（key → string），记忆以单个序列化 blob 存在 `agent_memory` 键下。
//! 写入先写临时文件再 rename，避免半写入。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::core::AgentError;
use crate::memory::{BackendKind, MemoryBackend, PersistedMemory};

/// 记忆 blob 在键值空间中的键
pub const MEMORY_BLOB_KEY: &str = "agent_memory";

/// 简单的字符串键值文件
#[derive(Debug, Clone)]
pub struct FlatKvStore {
    path: PathBuf,
}

impl FlatKvStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    async fn read_all(&self) -> Result<BTreeMap<String, String>, AgentError> {
        match fs::read_to_string(&self.path).await {
            Ok(data) if data.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(data) => serde_json::from_str(&data)
                .map_err(|e| AgentError::Persistence(format!("corrupt kv file: {}", e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, map: &BTreeMap<String, String>) -> Result<(), AgentError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_string(map).map_err(|e| AgentError::Persistence(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    pub async fn get_item(&self, key: &str) -> Result<Option<String>, AgentError> {
        Ok(self.read_all().await?.remove(key))
    }

    pub async fn set_item(&self, key: &str, value: String) -> Result<(), AgentError> {
        let mut map = self.read_all().await?;
        map.insert(key.to_string(), value);
        self.write_all(&map).await
    }

    pub async fn remove_item(&self, key: &str) -> Result<(), AgentError> {
        let mut map = self.read_all().await?;
        if map.remove(key).is_some() {
            self.write_all(&map).await?;
        }
        Ok(())
    }
}

/// 单 blob 降级后端
pub struct FlatFileBackend {
    store: FlatKvStore,
}

impl FlatFileBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            store: FlatKvStore::new(path),
        }
    }
}

#[async_trait]
impl MemoryBackend for FlatFileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::FlatFile
    }

    async fn load(&self) -> Result<PersistedMemory, AgentError> {
        match self.store.get_item(MEMORY_BLOB_KEY).await? {
            Some(blob) => serde_json::from_str(&blob)
                .map_err(|e| AgentError::Persistence(format!("corrupt memory blob: {}", e))),
            None => Ok(PersistedMemory::default()),
        }
    }

    async fn save(&self, snapshot: &PersistedMemory) -> Result<(), AgentError> {
        let blob = serde_json::to_string(snapshot).map_err(|e| AgentError::Persistence(e.to_string()))?;
        self.store.set_item(MEMORY_BLOB_KEY, blob).await
    }
}
