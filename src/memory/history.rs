//! 任务历史：只追加的有界账本与近似相似任务检索

use std::collections::{HashSet, VecDeque};

use crate::memory::{HistoryQuery, TaskHistory};

/// 相似检索时截取的目标前缀长度（字符）
const GOAL_PREFIX_CHARS: usize = 20;

#[derive(Clone, Debug)]
pub struct TaskLedger {
    entries: VecDeque<TaskHistory>,
    capacity: usize,
}

impl TaskLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, task: TaskHistory) {
        self.entries.push_back(task);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// 从新到旧，可按成功与否过滤
    pub fn list(&self, query: &HistoryQuery) -> Vec<TaskHistory> {
        self.entries
            .iter()
            .rev()
            .filter(|t| query.success.map_or(true, |s| t.success == s))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// 近似相似检索：历史目标包含查询，或查询包含历史目标的前缀（均不区分大小写）
    pub fn similar(&self, goal: &str, limit: usize) -> Vec<TaskHistory> {
        let query = goal.to_lowercase();
        self.entries
            .iter()
            .rev()
            .filter(|t| {
                let past = t.goal.to_lowercase();
                let prefix: String = past.chars().take(GOAL_PREFIX_CHARS).collect();
                past.contains(&query) || (!prefix.is_empty() && query.contains(&prefix))
            })
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.entries.iter().any(|t| t.task_id == task_id)
    }

    pub fn replace_all(&mut self, tasks: Vec<TaskHistory>) {
        self.entries.clear();
        let mut seen = HashSet::new();
        for task in tasks {
            if seen.insert(task.task_id.clone()) {
                self.push(task);
            }
        }
    }

    /// 合并导入：跳过已存在的 task_id，返回新增数量
    pub fn merge(&mut self, tasks: Vec<TaskHistory>) -> usize {
        let mut added = 0;
        for task in tasks {
            if !self.contains(&task.task_id) {
                self.push(task);
                added += 1;
            }
        }
        added
    }

    pub fn entries(&self) -> Vec<TaskHistory> {
        self.entries.iter().cloned().collect()
    }

    pub fn successful(&self) -> usize {
        self.entries.iter().filter(|t| t.success).count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
