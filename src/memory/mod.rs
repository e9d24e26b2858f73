//! 记忆层：工作记忆（当前任务）、短期（有界 FIFO）、长期（持久化 + 检索）、任务历史

pub mod flat_backend;
pub mod history;
pub mod long_term;
pub mod persistence;
pub mod short_term;
pub mod sqlite_backend;
pub mod store;
pub mod types;
pub mod working;

pub use flat_backend::{FlatFileBackend, FlatKvStore, MEMORY_BLOB_KEY};
pub use history::TaskLedger;
pub use long_term::LongTermMemory;
pub use persistence::{select_backend, BackendKind, MemoryBackend, MemoryDelta, PersistedMemory};
pub use short_term::ShortTermMemory;
pub use sqlite_backend::{Collection, SqliteBackend};
pub use store::{MemoryCapacities, MemoryStore};
pub use types::{
    HistoryQuery, MemoryExport, MemoryItem, MemoryStats, MemoryType, SearchOptions, TaskHistory,
    EXPORT_VERSION,
};
pub use working::WorkingMemory;
