//! 运行结果与迭代记录

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::AgentError;

/// 单条迭代记录：追加到 AgentResult.iterations，追加后不再修改
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationRecord {
    pub index: usize,
    pub action: Value,
    pub result: Value,
    /// 毫秒时间戳
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_complete: Option<bool>,
}

impl IterationRecord {
    pub fn new(index: usize, action: Value, result: Value) -> Self {
        Self {
            index,
            action,
            result,
            timestamp: now_millis(),
            is_complete: None,
        }
    }

    /// 模型直接给出最终回复
    pub fn completion(index: usize, response: &str) -> Self {
        Self {
            is_complete: Some(true),
            ..Self::new(index, json!({ "type": "response" }), json!({ "response": response }))
        }
    }

    /// 一次工具调用
    pub fn tool_call(index: usize, tool: &str, args: Value, outcome: Value) -> Self {
        Self::new(index, json!({ "type": "tool_call", "tool": tool, "args": args }), outcome)
    }

    /// 迭代内发生错误（记录后循环继续）
    pub fn error(index: usize, error: &AgentError) -> Self {
        Self::new(
            index,
            json!({ "type": "error" }),
            json!({ "success": false, "error": error.to_string() }),
        )
    }

    pub fn is_error(&self) -> bool {
        self.action.get("type").and_then(Value::as_str) == Some("error")
    }
}

/// run_agent 的返回值（不由核心持久化）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult {
    pub success: bool,
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub iterations: Vec<IterationRecord>,
    pub summary: String,
}

impl AgentResult {
    /// 成功完成：result 为 {"response": ...}
    pub fn completed(response: &str, iterations: Vec<IterationRecord>, goal: &str) -> Self {
        let summary = format!(
            "Completed \"{}\" in {} iteration(s)",
            goal_preview(goal),
            distinct_iterations(&iterations)
        );
        Self {
            success: true,
            result: json!({ "response": response }),
            error: None,
            iterations,
            summary,
        }
    }

    /// 达到最大迭代次数仍未完成
    pub fn exhausted(max_iterations: usize, iterations: Vec<IterationRecord>, goal: &str) -> Self {
        let error = format!("Reached maximum iterations ({})", max_iterations);
        Self {
            success: false,
            result: Value::Null,
            summary: format!(
                "Reached the iteration limit ({}) without completing \"{}\"",
                max_iterations,
                goal_preview(goal)
            ),
            error: Some(error),
            iterations,
        }
    }

    /// 用户停止
    pub fn aborted(iterations: Vec<IterationRecord>) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(AgentError::Cancelled.to_string()),
            summary: format!(
                "Stopped by user after {} iteration(s)",
                distinct_iterations(&iterations)
            ),
            iterations,
        }
    }

    /// 模型轮次数（同一轮的多次工具调用只算一次）
    pub fn turns(&self) -> usize {
        distinct_iterations(&self.iterations)
    }

    /// 最终回复文本（若有）
    pub fn response(&self) -> Option<&str> {
        self.result.get("response").and_then(Value::as_str)
    }
}

/// 同一轮多次工具调用共享 index，统计时去重
fn distinct_iterations(iterations: &[IterationRecord]) -> usize {
    let mut indexes: Vec<usize> = iterations.iter().map(|i| i.index).collect();
    indexes.dedup();
    indexes.len()
}

fn goal_preview(goal: &str) -> String {
    const MAX_CHARS: usize = 60;
    if goal.chars().count() > MAX_CHARS {
        format!("{}...", goal.chars().take(MAX_CHARS).collect::<String>())
    } else {
        goal.to_string()
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_result_shape() {
        let r = AgentResult::completed("done", vec![IterationRecord::completion(1, "done")], "goal");
        assert!(r.success);
        assert_eq!(r.response(), Some("done"));
        assert_eq!(r.iterations[0].is_complete, Some(true));
        assert!(r.summary.contains("1 iteration"));
    }

    #[test]
    fn test_summary_counts_turns_not_tool_calls() {
        let its = vec![
            IterationRecord::tool_call(1, "a", json!({}), json!({"success": true})),
            IterationRecord::tool_call(1, "b", json!({}), json!({"success": true})),
            IterationRecord::tool_call(2, "a", json!({}), json!({"success": true})),
        ];
        let r = AgentResult::exhausted(2, its, "research X");
        assert!(!r.success);
        assert_eq!(r.iterations.len(), 3);
        assert!(r.summary.contains("(2)"));
    }

    #[test]
    fn test_error_record() {
        let rec = IterationRecord::error(3, &AgentError::ModelInvocation("boom".into()));
        assert!(rec.is_error());
        assert_eq!(rec.result["success"], false);
        let json = serde_json::to_value(&rec).unwrap();
        assert!(json.get("isComplete").is_none());
    }
}
