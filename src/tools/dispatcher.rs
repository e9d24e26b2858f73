//! 工具分发：按解析链查找工具并统一结果形状
//!
//! 解析顺序：本次运行注入的工具快照 → 内置工具 → 外部工具提供者。
//! 任何路径都返回 {success: true, tool, result} 或 {success: false, tool, error}；
//! 工具返回错误或 panic 都在这里被截获，不会传播给调用方。每次调用输出一行 JSON 审计日志。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::{Tool, ToolSet, ToolSpec};

/// 单个解析器的结果
pub enum Resolution {
    Resolved(Arc<dyn Tool>),
    Unresolved,
}

/// 解析链中的一环
pub trait ToolResolver: Send + Sync {
    /// 审计日志中标记来源
    fn label(&self) -> &str;

    fn resolve(&self, name: &str) -> Resolution;

    fn specs(&self) -> Vec<ToolSpec>;
}

/// 外部工具提供者（宿主应用的插件、MCP 等）
pub trait ExternalTools: Send + Sync {
    fn find(&self, name: &str) -> Option<Arc<dyn Tool>>;

    fn specs(&self) -> Vec<ToolSpec> {
        Vec::new()
    }
}

/// 以工具快照作为解析器
pub struct SetResolver {
    label: &'static str,
    tools: ToolSet,
}

impl SetResolver {
    pub fn injected(tools: ToolSet) -> Self {
        Self { label: "injected", tools }
    }

    pub fn builtin(tools: ToolSet) -> Self {
        Self { label: "builtin", tools }
    }
}

impl ToolResolver for SetResolver {
    fn label(&self) -> &str {
        self.label
    }

    fn resolve(&self, name: &str) -> Resolution {
        self.tools.get(name).map_or(Resolution::Unresolved, Resolution::Resolved)
    }

    fn specs(&self) -> Vec<ToolSpec> {
        self.tools.specs()
    }
}

pub struct ExternalResolver {
    provider: Arc<dyn ExternalTools>,
}

impl ExternalResolver {
    pub fn new(provider: Arc<dyn ExternalTools>) -> Self {
        Self { provider }
    }
}

impl ToolResolver for ExternalResolver {
    fn label(&self) -> &str {
        "external"
    }

    fn resolve(&self, name: &str) -> Resolution {
        self.provider.find(name).map_or(Resolution::Unresolved, Resolution::Resolved)
    }

    fn specs(&self) -> Vec<ToolSpec> {
        self.provider.specs()
    }
}

/// 统一的工具调用结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(tool: &str, result: Value) -> Self {
        Self {
            success: true,
            tool: tool.to_string(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(tool: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            tool: tool.to_string(),
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({"success": false, "tool": self.tool, "error": e.to_string()})
        })
    }
}

/// 工具分发器（可廉价克隆，供回调闭包持有）
#[derive(Clone)]
pub struct ToolDispatcher {
    resolvers: Arc<[Box<dyn ToolResolver>]>,
}

impl ToolDispatcher {
    pub fn new(resolvers: Vec<Box<dyn ToolResolver>>) -> Self {
        Self {
            resolvers: resolvers.into(),
        }
    }

    /// 一次运行的标准解析链
    pub fn for_run(
        injected: ToolSet,
        builtins: ToolSet,
        external: Option<Arc<dyn ExternalTools>>,
    ) -> Self {
        let mut resolvers: Vec<Box<dyn ToolResolver>> = vec![
            Box::new(SetResolver::injected(injected)),
            Box::new(SetResolver::builtin(builtins)),
        ];
        if let Some(provider) = external {
            resolvers.push(Box::new(ExternalResolver::new(provider)));
        }
        Self::new(resolvers)
    }

    /// 第一个能解析该名称的解析器给出的工具
    pub fn resolve(&self, name: &str) -> Option<(&str, Arc<dyn Tool>)> {
        self.resolvers.iter().find_map(|r| match r.resolve(name) {
            Resolution::Resolved(tool) => Some((r.label(), tool)),
            Resolution::Unresolved => None,
        })
    }

    /// 所有可见工具的描述；同名时以解析链靠前者为准
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut seen = std::collections::HashSet::new();
        self.resolvers
            .iter()
            .flat_map(|r| r.specs())
            .filter(|s| seen.insert(s.name.clone()))
            .collect()
    }

    pub async fn dispatch(&self, name: &str, params: Value) -> ToolOutcome {
        let start = Instant::now();
        let args_preview = args_preview(&params);

        let (source, outcome) = match self.resolve(name) {
            None => ("none", ToolOutcome::failed(name, format!("Unknown tool: {}", name))),
            Some((source, tool)) => {
                let outcome = match AssertUnwindSafe(tool.execute(params)).catch_unwind().await {
                    Ok(Ok(result)) => ToolOutcome::ok(name, result),
                    Ok(Err(e)) => ToolOutcome::failed(name, format!("{:#}", e)),
                    Err(panic) => ToolOutcome::failed(name, format!("Tool panicked: {}", panic_message(&panic))),
                };
                (source, outcome)
            }
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": name,
            "source": source,
            "ok": outcome.success,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit, "tool");
        if let Some(error) = &outcome.error {
            tracing::warn!(tool = %name, error = %error, "Tool call failed");
        }
        outcome
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
