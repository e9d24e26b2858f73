//! Agent 准入判断：普通聊天消息是否升级为 Agent 运行
//!
//! 纯函数、无副作用：大小写不敏感的关键词子串匹配，受全局开关 `[agent] enabled` 控制。

use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};

/// 触发多步任务执行的关键词（中 / 日 / 英）
const AGENT_KEYWORDS: &[&str] = &[
    // 日本語
    "調べて",
    "検索して",
    "まとめて",
    "分析して",
    "比較して",
    "計算して",
    "実行して",
    "作成して",
    "リサーチ",
    // 中文
    "查一下",
    "搜索",
    "调研",
    "分析一下",
    "总结",
    "对比",
    "帮我执行",
    // English
    "research",
    "search for",
    "look up",
    "investigate",
    "analyze",
    "analyse",
    "compare",
    "calculate",
    "summarize",
    "find out",
    "step by step",
];

fn keyword_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            let alternation = AGENT_KEYWORDS
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");
            RegexBuilder::new(&alternation)
                .case_insensitive(true)
                .build()
                .ok()
        })
        .as_ref()
}

/// 判断消息是否应交给 Agent；`enabled` 为全局功能开关
pub fn should_use_agent(message: &str, enabled: bool) -> bool {
    if !enabled {
        return false;
    }
    let message = message.trim();
    !message.is_empty() && keyword_pattern().is_some_and(|p| p.is_match(message))
}
