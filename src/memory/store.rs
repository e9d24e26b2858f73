//! MemoryStore：三层记忆 + 任务历史 + 持久化
//!
//! 所有变更先同步作用于内存（内存状态始终权威），再异步写入后端；后端写失败只记录日志。
//! 对外返回的一律是拷贝。后端在初始化时选定一次，之后不再改变。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tokio::sync::{watch, Mutex};

use crate::core::result::now_millis;
use crate::core::AgentError;
use crate::memory::{
    select_backend, BackendKind, HistoryQuery, LongTermMemory, MemoryBackend, MemoryDelta, MemoryExport,
    MemoryItem, MemoryStats, MemoryType, PersistedMemory, SearchOptions, ShortTermMemory,
    TaskHistory, TaskLedger, WorkingMemory, EXPORT_VERSION,
};

const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// 各层容量上限
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryCapacities {
    pub short_term: usize,
    pub long_term: usize,
    pub task_history: usize,
}

impl Default for MemoryCapacities {
    fn default() -> Self {
        Self {
            short_term: 50,
            long_term: 1000,
            task_history: 100,
        }
    }
}

struct MemoryState {
    short_term: ShortTermMemory,
    long_term: LongTermMemory,
    history: TaskLedger,
    working: WorkingMemory,
}

/// 已写入后端的版本与内容
#[derive(Default)]
struct Persisted {
    version: u64,
    baseline: PersistedMemory,
}

/// 串行化后端写入：只接受比已写入版本更新的快照，且只写入相对上次成功写入的差异
struct PersistQueue {
    version: AtomicU64,
    last_saved: Mutex<Persisted>,
}

impl PersistQueue {
    async fn write(&self, backend: &dyn MemoryBackend, snapshot: PersistedMemory, version: u64) {
        let mut last = self.last_saved.lock().await;
        if version <= last.version {
            return;
        }
        let delta = MemoryDelta::between(&last.baseline, &snapshot);
        if delta.is_empty() {
            last.version = version;
            return;
        }
        match backend.apply(&delta, &snapshot).await {
            Ok(()) => {
                last.version = version;
                last.baseline = snapshot;
            }
            Err(e) => tracing::warn!(error = %e, backend = ?backend.kind(), "Memory persistence failed"),
        }
    }

    /// 初始加载后记录后端已有的内容
    async fn set_baseline(&self, baseline: PersistedMemory) {
        self.last_saved.lock().await.baseline = baseline;
    }
}

pub struct MemoryStore {
    state: RwLock<MemoryState>,
    backend: OnceLock<Arc<dyn MemoryBackend>>,
    ready: watch::Sender<bool>,
    persist: Arc<PersistQueue>,
    /// 初始化完成前发生过需要持久化的变更
    dirty_before_init: AtomicBool,
}

impl MemoryStore {
    /// 纯内存存储（无持久化），立即可用
    pub fn new(capacities: MemoryCapacities) -> Self {
        let store = Self::uninitialized(capacities);
        store.ready.send_replace(true);
        store
    }

    fn uninitialized(capacities: MemoryCapacities) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            state: RwLock::new(MemoryState {
                short_term: ShortTermMemory::new(capacities.short_term),
                long_term: LongTermMemory::new(capacities.long_term),
                history: TaskLedger::new(capacities.task_history),
                working: WorkingMemory::new(),
            }),
            backend: OnceLock::new(),
            ready,
            persist: Arc::new(PersistQueue {
                version: AtomicU64::new(0),
                last_saved: Mutex::new(Persisted::default()),
            }),
            dirty_before_init: AtomicBool::new(false),
        }
    }

    /// 创建存储并在后台选择后端、加载数据；可立即使用，需等待时调用 wait_for_initialization
    pub fn spawn(capacities: MemoryCapacities, db_path: PathBuf, fallback_path: PathBuf) -> Arc<Self> {
        let store = Arc::new(Self::uninitialized(capacities));
        let init = Arc::clone(&store);
        tokio::spawn(async move {
            let backend = select_backend(&db_path, &fallback_path).await;
            init.initialize(backend).await;
        });
        store
    }

    /// 创建存储并等待后端选择与初始加载完成
    pub async fn open(capacities: MemoryCapacities, db_path: PathBuf, fallback_path: PathBuf) -> Arc<Self> {
        let store = Self::spawn(capacities, db_path, fallback_path);
        store.wait_for_initialization().await;
        store
    }

    /// 使用指定后端创建并完成初始加载
    pub async fn with_backend(capacities: MemoryCapacities, backend: Arc<dyn MemoryBackend>) -> Arc<Self> {
        let store = Arc::new(Self::uninitialized(capacities));
        store.initialize(backend).await;
        store
    }

    async fn initialize(&self, backend: Arc<dyn MemoryBackend>) {
        let loaded = match backend.load().await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load persisted memory, starting empty");
                PersistedMemory::default()
            }
        };
        self.persist.set_baseline(loaded.clone()).await;
        {
            let mut state = self.write();
            let current_items = state.long_term.items();
            state.long_term.replace_all(loaded.long_term_memory);
            state.long_term.merge(current_items);
            let current_tasks = state.history.entries();
            state.history.replace_all(loaded.task_history);
            state.history.merge(current_tasks);
            tracing::info!(
                backend = ?backend.kind(),
                long_term = state.long_term.len(),
                task_history = state.history.len(),
                "Memory store initialized"
            );
        }
        if self.backend.set(backend).is_err() {
            tracing::warn!("Memory backend already selected, ignoring re-initialization");
        }
        self.ready.send_replace(true);
        if self.dirty_before_init.swap(false, Ordering::SeqCst) {
            self.schedule_persist();
        }
    }

    /// 等待后端选择与初始加载完成
    pub async fn wait_for_initialization(&self) {
        let mut rx = self.ready.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }

    pub fn is_initialized(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.get().map_or(BackendKind::Volatile, |b| b.kind())
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn persisted_snapshot(&self) -> PersistedMemory {
        let state = self.read();
        PersistedMemory {
            long_term_memory: state.long_term.items(),
            task_history: state.history.entries(),
        }
    }

    /// 异步写入当前快照；没有运行时或后端未就绪时跳过
    fn schedule_persist(&self) {
        let Some(backend) = self.backend.get().cloned() else {
            self.dirty_before_init.store(true, Ordering::SeqCst);
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No tokio runtime, skipping memory persistence");
            return;
        };
        let snapshot = self.persisted_snapshot();
        let version = self.persist.version.fetch_add(1, Ordering::SeqCst) + 1;
        let queue = Arc::clone(&self.persist);
        handle.spawn(async move {
            queue.write(backend.as_ref(), snapshot, version).await;
        });
    }

    /// 立即写入当前快照并等待完成
    pub async fn flush(&self) {
        let Some(backend) = self.backend.get().cloned() else {
            return;
        };
        let snapshot = self.persisted_snapshot();
        let version = self.persist.version.fetch_add(1, Ordering::SeqCst) + 1;
        self.persist.write(backend.as_ref(), snapshot, version).await;
    }

    // ---- 短期记忆 ----

    /// 写入短期记忆；被挤出的重要条目先晋升到长期记忆再丢弃
    pub fn add_to_short_term(&self, item: MemoryItem) -> MemoryItem {
        let promoted = {
            let mut state = self.write();
            let evicted = state.short_term.push(item.clone());
            let mut promoted = 0;
            for old in evicted {
                if old.is_important() {
                    state.long_term.insert(old);
                    promoted += 1;
                }
            }
            promoted
        };
        if promoted > 0 {
            tracing::debug!(promoted, "Promoted short-term memories to long-term");
            self.schedule_persist();
        }
        item
    }

    /// 最近 limit 条短期记忆（时间正序）
    pub fn get_short_term_context(&self, limit: usize, filter: Option<MemoryType>) -> Vec<MemoryItem> {
        self.read().short_term.recent(limit, filter)
    }

    pub fn clear_short_term(&self) {
        self.write().short_term.clear();
    }

    // ---- 长期记忆 ----

    pub fn add_to_long_term(&self, item: MemoryItem) -> MemoryItem {
        self.write().long_term.insert(item.clone());
        self.schedule_persist();
        item
    }

    pub fn search_long_term(&self, query: &str, options: SearchOptions) -> Vec<MemoryItem> {
        self.read().long_term.search(query, options)
    }

    /// 压缩早于 older_than_days 天的长期记忆，返回减少的条目数
    pub fn compress_old_memories(&self, older_than_days: u32) -> usize {
        let cutoff = now_millis() - i64::from(older_than_days) * DAY_MILLIS;
        let removed = self.write().long_term.compress(cutoff);
        if removed > 0 {
            tracing::info!(removed, older_than_days, "Compressed old memories");
            self.schedule_persist();
        }
        removed
    }

    // ---- 工作记忆 ----

    pub fn init_working_memory(&self, task_id: &str, goal: &str) {
        self.write().working.start(task_id, goal);
    }

    /// 工作记忆的拷贝
    pub fn get_working_memory(&self) -> WorkingMemory {
        self.read().working.clone()
    }

    pub fn clear_working_memory(&self) {
        self.write().working.clear();
    }

    pub fn increment_iteration(&self) -> usize {
        self.write().working.increment_iteration()
    }

    pub fn set_variable(&self, key: &str, value: Value) {
        self.write().working.set_variable(key, value);
    }

    pub fn get_variable(&self, key: &str) -> Option<Value> {
        self.read().working.variable(key).cloned()
    }

    pub fn push_pending_action(&self, action: Value) {
        self.write().working.push_pending_action(action);
    }

    pub fn pop_pending_action(&self) -> Option<Value> {
        self.write().working.pop_pending_action()
    }

    // ---- 任务历史 ----

    pub fn add_task_history(&self, task: TaskHistory) -> TaskHistory {
        self.write().history.push(task.clone());
        self.schedule_persist();
        task
    }

    pub fn get_task_history(&self, query: &HistoryQuery) -> Vec<TaskHistory> {
        self.read().history.list(query)
    }

    pub fn search_similar_tasks(&self, goal: &str, limit: usize) -> Vec<TaskHistory> {
        self.read().history.similar(goal, limit)
    }

    // ---- 维护 / 导入导出 ----

    /// 清空全部记忆（含已持久化的长期记忆与任务历史）
    pub fn clear_all(&self) {
        {
            let mut state = self.write();
            state.short_term.clear();
            state.long_term.clear();
            state.history.clear();
            state.working.clear();
        }
        self.schedule_persist();
    }

    pub fn get_stats(&self) -> MemoryStats {
        let backend = self.backend_kind();
        let state = self.read();
        MemoryStats {
            short_term_count: state.short_term.len(),
            long_term_count: state.long_term.len(),
            task_history_count: state.history.len(),
            working_memory_active: state.working.is_active(),
            successful_tasks: state.history.successful(),
            backend,
        }
    }

    pub fn export_memory(&self) -> MemoryExport {
        let stats = self.get_stats();
        let state = self.read();
        MemoryExport {
            version: EXPORT_VERSION.to_string(),
            exported_at: now_millis(),
            long_term_memory: state.long_term.items(),
            task_history: state.history.entries(),
            stats: Some(stats),
        }
    }

    /// 导入 JSON 文本；格式错误返回 false
    pub fn import_memory(&self, json: &str, merge: bool) -> bool {
        match serde_json::from_str::<Value>(json) {
            Ok(value) => self.import_value(value, merge),
            Err(e) => {
                let err = AgentError::ImportValidation(e.to_string());
                tracing::warn!(error = %err, "Memory import rejected");
                false
            }
        }
    }

    /// 导入导出格式的数据；merge 为 true 时跳过已存在的 id，否则整体替换
    pub fn import_value(&self, value: Value, merge: bool) -> bool {
        let data: MemoryExport = match serde_json::from_value(value) {
            Ok(d) => d,
            Err(e) => {
                let err = AgentError::ImportValidation(e.to_string());
                tracing::warn!(error = %err, "Memory import rejected");
                return false;
            }
        };
        {
            let mut state = self.write();
            if merge {
                let memories = state.long_term.merge(data.long_term_memory);
                let tasks = state.history.merge(data.task_history);
                tracing::info!(memories, tasks, "Merged imported memory");
            } else {
                state.long_term.replace_all(data.long_term_memory);
                state.history.replace_all(data.task_history);
                tracing::info!(
                    memories = state.long_term.len(),
                    tasks = state.history.len(),
                    "Replaced memory from import"
                );
            }
        }
        self.schedule_persist();
        true
    }

    /// 将导出写入 dir/agent-memory-YYYY-MM-DD.json，返回文件路径
    pub async fn download_memory(&self, dir: &Path) -> Result<PathBuf, AgentError> {
        let export = self.export_memory();
        let data = serde_json::to_string_pretty(&export)
            .map_err(|e| AgentError::Persistence(e.to_string()))?;
        tokio::fs::create_dir_all(dir).await?;
        let file = dir.join(format!(
            "agent-memory-{}.json",
            chrono::Local::now().format("%Y-%m-%d")
        ));
        tokio::fs::write(&file, data).await?;
        Ok(file)
    }
}
