//! 工作记忆：当前运行的任务目标、迭代计数、变量与待执行动作
//!
//! 每次运行开始与显式 clear 时重置；对外只提供拷贝，用于拼入 system prompt。

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingMemory {
    pub task_id: Option<String>,
    pub goal: Option<String>,
    pub iteration: usize,
    pub variables: HashMap<String, Value>,
    pub pending_actions: VecDeque<Value>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始新任务：清空上一次的状态
    pub fn start(&mut self, task_id: impl Into<String>, goal: impl Into<String>) {
        self.clear();
        self.task_id = Some(task_id.into());
        self.goal = Some(goal.into());
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_active(&self) -> bool {
        self.task_id.is_some()
    }

    pub fn increment_iteration(&mut self) -> usize {
        self.iteration += 1;
        self.iteration
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    pub fn variable(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    pub fn push_pending_action(&mut self, action: Value) {
        self.pending_actions.push_back(action);
    }

    pub fn pop_pending_action(&mut self) -> Option<Value> {
        self.pending_actions.pop_front()
    }

    /// 构建供模型使用的 Prompt 片段（Current Goal / Iteration / Variables / Pending actions）
    pub fn to_prompt_section(&self) -> String {
        let mut s = String::new();
        if let Some(goal) = &self.goal {
            s.push_str(&format!("## Current Goal\n{}\n\n", goal));
        }
        if self.iteration > 0 {
            s.push_str(&format!("## Iteration\n{}\n\n", self.iteration));
        }
        if !self.variables.is_empty() {
            s.push_str("## Variables\n");
            let mut keys: Vec<&String> = self.variables.keys().collect();
            keys.sort();
            for k in keys {
                s.push_str(&format!("- {}: {}\n", k, self.variables[k]));
            }
            s.push('\n');
        }
        if !self.pending_actions.is_empty() {
            s.push_str("## Pending actions\n");
            for a in &self.pending_actions {
                s.push_str(&format!("- {}\n", a));
            }
            s.push('\n');
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_resets_state() {
        let mut wm = WorkingMemory::new();
        wm.start("t1", "first");
        wm.increment_iteration();
        wm.set_variable("city", json!("Tokyo"));
        wm.push_pending_action(json!({"tool": "web_search"}));

        wm.start("t2", "second");
        assert_eq!(wm.task_id.as_deref(), Some("t2"));
        assert_eq!(wm.iteration, 0);
        assert!(wm.variables.is_empty());
        assert!(wm.pending_actions.is_empty());
    }

    #[test]
    fn test_pending_actions_fifo() {
        let mut wm = WorkingMemory::new();
        wm.push_pending_action(json!(1));
        wm.push_pending_action(json!(2));
        assert_eq!(wm.pop_pending_action(), Some(json!(1)));
        assert_eq!(wm.pop_pending_action(), Some(json!(2)));
        assert_eq!(wm.pop_pending_action(), None);
    }

    #[test]
    fn test_prompt_section() {
        let mut wm = WorkingMemory::new();
        assert!(wm.to_prompt_section().is_empty());
        wm.start("t", "find the weather");
        wm.increment_iteration();
        wm.set_variable("city", json!("Osaka"));
        let s = wm.to_prompt_section();
        assert!(s.contains("## Current Goal\nfind the weather"));
        assert!(s.contains("- city: \"Osaka\""));
        assert!(s.contains("## Iteration\n1"));
        assert!(wm.is_active());
    }
}
