//! 记忆数据模型：MemoryItem、TaskHistory、统计与导出格式

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::result::now_millis;
use crate::memory::BackendKind;

/// 记忆条目类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Observation,
    Thought,
    Action,
    Result,
    Context,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Observation => "observation",
            MemoryType::Thought => "thought",
            MemoryType::Action => "action",
            MemoryType::Result => "result",
            MemoryType::Context => "context",
        }
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "observation" => Ok(MemoryType::Observation),
            "thought" => Ok(MemoryType::Thought),
            "action" => Ok(MemoryType::Action),
            "result" => Ok(MemoryType::Result),
            "context" => Ok(MemoryType::Context),
            other => Err(format!("Unknown memory type: {}", other)),
        }
    }
}

/// 单条记忆
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MemoryType,
    pub content: Value,
    /// 毫秒时间戳
    pub timestamp: i64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl MemoryItem {
    pub fn new(kind: MemoryType, content: impl Into<Value>) -> Self {
        Self {
            id: format!("mem_{}", uuid::Uuid::new_v4().simple()),
            kind,
            content: content.into(),
            timestamp: now_millis(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// 重要性判断：result 类型，或 metadata.important == true
    pub fn is_important(&self) -> bool {
        self.kind == MemoryType::Result
            || self.metadata.get("important").and_then(Value::as_bool) == Some(true)
    }

    /// 用于检索的文本形式：字符串原样返回，其余 JSON 序列化
    pub fn content_text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// 任务历史记录（只追加）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskHistory {
    pub task_id: String,
    pub goal: String,
    pub start_time: i64,
    pub end_time: i64,
    pub success: bool,
    pub iterations: usize,
    pub summary: String,
}

/// get_task_history 的过滤条件；结果按时间从新到旧
#[derive(Clone, Debug, Default)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub success: Option<bool>,
}

/// search_long_term 的选项
#[derive(Clone, Copy, Debug)]
pub struct SearchOptions {
    pub kind: Option<MemoryType>,
    pub limit: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { kind: None, limit: 10 }
    }
}

/// 记忆统计
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub short_term_count: usize,
    pub long_term_count: usize,
    pub task_history_count: usize,
    pub working_memory_active: bool,
    pub successful_tasks: usize,
    pub backend: BackendKind,
}

/// 导出格式：{version, exportedAt, longTermMemory[], taskHistory[], stats}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryExport {
    pub version: String,
    pub exported_at: i64,
    pub long_term_memory: Vec<MemoryItem>,
    pub task_history: Vec<TaskHistory>,
    #[serde(default)]
    pub stats: Option<MemoryStats>,
}

pub const EXPORT_VERSION: &str = "1.0";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_importance_predicate() {
        assert!(MemoryItem::new(MemoryType::Result, "r").is_important());
        assert!(!MemoryItem::new(MemoryType::Thought, "t").is_important());
        assert!(MemoryItem::new(MemoryType::Thought, "t")
            .with_metadata("important", true)
            .is_important());
        assert!(!MemoryItem::new(MemoryType::Thought, "t")
            .with_metadata("important", "yes")
            .is_important());
    }

    #[test]
    fn test_item_wire_format() {
        let item = MemoryItem::new(MemoryType::Observation, json!({"url": "x"}));
        let v = serde_json::to_value(&item).unwrap();
        assert_eq!(v["type"], "observation");
        assert!(v["id"].as_str().unwrap().starts_with("mem_"));
        assert_eq!(item.content_text(), r#"{"url":"x"}"#);
    }

    #[test]
    fn test_history_camel_case() {
        let h = TaskHistory {
            task_id: "t1".into(),
            goal: "g".into(),
            start_time: 1,
            end_time: 2,
            success: true,
            iterations: 3,
            summary: "s".into(),
        };
        let v = serde_json::to_value(&h).unwrap();
        assert_eq!(v["taskId"], "t1");
        assert_eq!(v["endTime"], 2);
    }
}
