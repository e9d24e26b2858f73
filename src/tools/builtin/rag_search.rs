//! rag_search：在长期记忆与任务历史中检索

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::memory::{MemoryStore, MemoryType, SearchOptions};
use crate::tools::{params_schema, Tool};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RagSearchArgs {
    /// 检索词（大小写不敏感子串）
    pub query: String,
    /// 最多返回条数，默认 5
    #[serde(default)]
    pub limit: Option<usize>,
    /// 只检索某一类型：observation / thought / action / result / context
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

pub struct RagSearchTool {
    memory: Arc<MemoryStore>,
}

impl RagSearchTool {
    pub fn new(memory: Arc<MemoryStore>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for RagSearchTool {
    fn name(&self) -> &str {
        "rag_search"
    }

    fn description(&self) -> &str {
        "Search the agent's long-term memory and similar past tasks. Args: {\"query\": \"...\", \"limit\": 5}."
    }

    fn parameters_schema(&self) -> Value {
        params_schema::<RagSearchArgs>()
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let args: RagSearchArgs = serde_json::from_value(args).context("Invalid rag_search args")?;
        let kind = args
            .kind
            .as_deref()
            .map(str::parse::<MemoryType>)
            .transpose()
            .map_err(anyhow::Error::msg)?;
        let limit = args.limit.unwrap_or(5);
        let memories = self
            .memory
            .search_long_term(&args.query, SearchOptions { kind, limit });
        let tasks = self.memory.search_similar_tasks(&args.query, limit);
        Ok(json!({
            "query": args.query,
            "memories": memories,
            "similarTasks": tasks,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCapacities, MemoryItem, TaskHistory};

    #[tokio::test]
    async fn test_searches_memory_and_history() {
        let memory = Arc::new(MemoryStore::new(MemoryCapacities::default()));
        memory.add_to_long_term(MemoryItem::new(MemoryType::Result, "Tokyo weather is sunny"));
        memory.add_to_long_term(MemoryItem::new(MemoryType::Thought, "check Tokyo forecast"));
        memory.add_task_history(TaskHistory {
            task_id: "t1".into(),
            goal: "Tokyo weather report".into(),
            start_time: 0,
            end_time: 1,
            success: true,
            iterations: 2,
            summary: "ok".into(),
        });

        let tool = RagSearchTool::new(Arc::clone(&memory));
        let out = tool.execute(json!({"query": "tokyo"})).await.unwrap();
        assert_eq!(out["memories"].as_array().unwrap().len(), 2);
        assert_eq!(out["similarTasks"][0]["taskId"], "t1");

        let filtered = tool
            .execute(json!({"query": "tokyo", "type": "result"}))
            .await
            .unwrap();
        assert_eq!(filtered["memories"].as_array().unwrap().len(), 1);

        assert!(tool.execute(json!({"query": "x", "type": "bogus"})).await.is_err());
    }
}
