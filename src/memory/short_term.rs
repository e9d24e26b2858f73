//! 短期记忆：有界 FIFO 队列
//!
//! 超出容量时丢弃最旧的条目并把被挤出的条目交还给调用方，由 MemoryStore 决定是否晋升到长期记忆。

use std::collections::VecDeque;

use crate::memory::{MemoryItem, MemoryType};

#[derive(Clone, Debug)]
pub struct ShortTermMemory {
    items: VecDeque<MemoryItem>,
    capacity: usize,
}

impl ShortTermMemory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// 追加条目，返回被挤出的条目（按挤出顺序）
    pub fn push(&mut self, item: MemoryItem) -> Vec<MemoryItem> {
        self.items.push_back(item);
        let mut evicted = Vec::new();
        while self.items.len() > self.capacity {
            if let Some(old) = self.items.pop_front() {
                evicted.push(old);
            }
        }
        evicted
    }

    /// 最近 limit 条（可按类型过滤），按时间正序返回
    pub fn recent(&self, limit: usize, filter: Option<MemoryType>) -> Vec<MemoryItem> {
        let mut out: Vec<MemoryItem> = self
            .items
            .iter()
            .rev()
            .filter(|i| filter.map_or(true, |k| i.kind == k))
            .take(limit)
            .cloned()
            .collect();
        out.reverse();
        out
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
