//! 解析模型的 ReAct 输出
//!
//! 模型每步输出一个 JSON 动作：`{"tool": "...", "args": {...}}` 或 `{"final_answer": "..."}`；
//! 没有 JSON 的纯文本视为最终回复。JSON 可以包在 ```json 代码块里。

use serde_json::Value;

use crate::core::AgentError;

/// 解析失败后追加给模型的提示
pub const RETRY_PROMPT: &str = "Your last reply was not a valid action. Reply with exactly one JSON object: \
{\"tool\": \"<name>\", \"args\": {...}} to call a tool, or {\"final_answer\": \"...\"} to finish.";

/// 一步的决策
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Act { tool: String, args: Value },
    Answer(String),
}

/// 提取 JSON 片段：```json 代码块优先，其次第一个 '{' 到最后一个 '}'
fn extract_json(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        return Some(rest.find("```").map_or(rest, |end| &rest[..end]).trim());
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

pub fn parse_step(output: &str) -> Result<Step, AgentError> {
    let trimmed = output.trim();
    let Some(json_str) = extract_json(trimmed) else {
        return Ok(Step::Answer(trimmed.to_string()));
    };

    let parsed: Value = serde_json::from_str(json_str)
        .map_err(|e| AgentError::Loop(format!("Malformed action ({}): {}", e, json_str)))?;

    if let Some(answer) = parsed.get("final_answer") {
        let text = match answer {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Ok(Step::Answer(text));
    }

    match parsed.get("tool").and_then(Value::as_str) {
        Some(tool) if !tool.trim().is_empty() => Ok(Step::Act {
            tool: tool.trim().to_string(),
            args: parsed
                .get("args")
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default())),
        }),
        _ => Ok(Step::Answer(trimmed.to_string())),
    }
}
