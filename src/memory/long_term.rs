//! 长期记忆：有界 FIFO、子串检索与按类型压缩
//!
//! 同 id 重复写入是幂等的（原地替换，不产生重复条目）；检索为大小写不敏感的子串匹配，按时间从新到旧排序。

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde_json::json;

use crate::memory::{MemoryItem, MemoryType, SearchOptions};

/// 同类型旧条目超过此数量才会被压缩为摘要
const COMPRESS_GROUP_THRESHOLD: usize = 5;

#[derive(Clone, Debug)]
pub struct LongTermMemory {
    items: VecDeque<MemoryItem>,
    capacity: usize,
}

impl LongTermMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// 写入条目；id 已存在时原地替换。返回因超出容量被丢弃的条目数
    pub fn insert(&mut self, item: MemoryItem) -> usize {
        if let Some(existing) = self.items.iter_mut().find(|i| i.id == item.id) {
            *existing = item;
            return 0;
        }
        self.items.push_back(item);
        self.enforce_capacity()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|i| i.id == id)
    }

    fn enforce_capacity(&mut self) -> usize {
        let mut dropped = 0;
        while self.items.len() > self.capacity {
            self.items.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// 子串检索：query 为空时匹配全部
    pub fn search(&self, query: &str, options: SearchOptions) -> Vec<MemoryItem> {
        let needle = query.trim().to_lowercase();
        // 倒序遍历 + 稳定排序：时间戳相同时后写入的排在前面
        let mut hits: Vec<&MemoryItem> = self
            .items
            .iter()
            .rev()
            .filter(|i| options.kind.map_or(true, |k| i.kind == k))
            .filter(|i| needle.is_empty() || i.content_text().to_lowercase().contains(&needle))
            .collect();
        hits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        hits.into_iter().take(options.limit).cloned().collect()
    }

    /// 压缩早于 cutoff（含）的条目：同类型超过阈值的组折叠为一条 context 摘要。
    /// 有损且不可逆，返回减少的条目数
    pub fn compress(&mut self, cutoff: i64) -> usize {
        let before = self.items.len();
        let (old, recent): (Vec<MemoryItem>, Vec<MemoryItem>) =
            self.items.drain(..).partition(|i| i.timestamp <= cutoff);

        let mut groups: BTreeMap<MemoryType, Vec<MemoryItem>> = BTreeMap::new();
        for item in old {
            groups.entry(item.kind).or_default().push(item);
        }

        let mut kept: Vec<MemoryItem> = Vec::new();
        for (kind, group) in groups {
            if group.len() > COMPRESS_GROUP_THRESHOLD {
                kept.push(summarize_group(kind, &group));
            } else {
                kept.extend(group);
            }
        }
        kept.extend(recent);
        kept.sort_by_key(|i| i.timestamp);

        self.items = kept.into();
        self.enforce_capacity();
        before - self.items.len()
    }

    /// 用导入数据整体替换（保留最新的 capacity 条）
    pub fn replace_all(&mut self, items: Vec<MemoryItem>) {
        self.items.clear();
        let mut seen = HashSet::new();
        for item in items {
            if seen.insert(item.id.clone()) {
                self.items.push_back(item);
            }
        }
        self.enforce_capacity();
    }

    /// 合并导入：跳过已存在的 id，返回新增数量
    pub fn merge(&mut self, items: Vec<MemoryItem>) -> usize {
        let mut added = 0;
        for item in items {
            if !self.contains(&item.id) {
                self.items.push_back(item);
                added += 1;
            }
        }
        self.enforce_capacity();
        added
    }

    pub fn items(&self) -> Vec<MemoryItem> {
        self.items.iter().cloned().collect()
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
}

fn summarize_group(kind: MemoryType, group: &[MemoryItem]) -> MemoryItem {
    let start = group.iter().map(|i| i.timestamp).min().unwrap_or_default();
    let end = group.iter().map(|i| i.timestamp).max().unwrap_or_default();
    MemoryItem::new(
        MemoryType::Context,
        json!({
            "summary": format!("Compressed {} {} memories", group.len(), kind.as_str()),
            "count": group.len(),
            "dateRange": { "start": start, "end": end },
            "originalType": kind.as_str(),
        }),
    )
    .with_timestamp(end)
    .with_metadata("compressed", true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(kind: MemoryType, text: &str, ts: i64) -> MemoryItem {
        MemoryItem::new(kind, text).with_timestamp(ts)
    }

    #[test]
    fn test_capacity_keeps_most_recent() {
        let mut lt = LongTermMemory::new(3);
        for n in 0..5 {
            lt.insert(item(MemoryType::Result, &format!("r{}", n), n));
        }
        let texts: Vec<String> = lt.items().iter().map(|i| i.content_text()).collect();
        assert_eq!(texts, vec!["r2", "r3", "r4"]);
    }

    #[test]
    fn test_duplicate_id_is_idempotent() {
        let mut lt = LongTermMemory::new(10);
        let a = item(MemoryType::Result, "a", 1);
        lt.insert(a.clone());
        lt.insert(a.clone());
        assert_eq!(lt.len(), 1);
    }

    #[test]
    fn test_search_case_insensitive_recent_first() {
        let mut lt = LongTermMemory::new(10);
        lt.insert(item(MemoryType::Result, "Rust async runtime", 10));
        lt.insert(item(MemoryType::Thought, "rust ownership", 20));
        lt.insert(item(MemoryType::Result, "Python GIL", 30));

        let hits = lt.search("RUST", SearchOptions::default());
        let texts: Vec<String> = hits.iter().map(|i| i.content_text()).collect();
        assert_eq!(texts, vec!["rust ownership", "Rust async runtime"]);

        let only_results = lt.search(
            "rust",
            SearchOptions { kind: Some(MemoryType::Result), limit: 10 },
        );
        assert_eq!(only_results.len(), 1);

        let limited = lt.search("", SearchOptions { kind: None, limit: 2 });
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].content_text(), "Python GIL");
    }

    #[test]
    fn test_compress_large_group_only() {
        let mut lt = LongTermMemory::new(100);
        for n in 0..6 {
            lt.insert(item(MemoryType::Observation, &format!("obs{}", n), n));
        }
        for n in 0..3 {
            lt.insert(item(MemoryType::Thought, &format!("th{}", n), 10 + n));
        }
        lt.insert(item(MemoryType::Observation, "fresh", 1_000));

        let removed = lt.compress(500);
        assert_eq!(removed, 5);
        assert_eq!(lt.len(), 5);

        let summaries = lt.search("", SearchOptions { kind: Some(MemoryType::Context), limit: 10 });
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].content["count"], 6);
        assert_eq!(summaries[0].content["originalType"], "observation");
        assert_eq!(summaries[0].content["dateRange"]["start"], 0);
        assert_eq!(summaries[0].content["dateRange"]["end"], 5);

        let thoughts = lt.search("", SearchOptions { kind: Some(MemoryType::Thought), limit: 10 });
        assert_eq!(thoughts.len(), 3);
        assert!(lt.search("fresh", SearchOptions::default()).len() == 1);
    }

    #[test]
    fn test_merge_skips_existing_ids() {
        let mut lt = LongTermMemory::new(10);
        let a = item(MemoryType::Result, "a", 1);
        lt.insert(a.clone());
        let added = lt.merge(vec![a, item(MemoryType::Result, "b", 2)]);
        assert_eq!(added, 1);
        assert_eq!(lt.len(), 2);
    }
}
