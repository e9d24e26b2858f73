//! 模型调用抽象
//!
//! 编排器只依赖 ModelInvoker：给定消息、模型名与（可选）工具 schema，返回文本或工具调用。
//! 具体 HTTP 客户端不在本 crate 内，测试与二进制使用 mock 实现。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::tools::ToolSchemaFormat;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 模型请求的一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }
}

/// 对话消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// 助手发起工具调用的消息
    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// 工具结果消息，关联到发起它的调用 id
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }
}

/// 模型回复：纯文本，或一组工具调用（content 可附带说明文字）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelReply {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ModelReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: String::new(),
            tool_calls: calls,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// 流式片段回调
pub type ChunkCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// 调用选项
#[derive(Clone, Default)]
pub struct InvokeOptions {
    pub stream: bool,
    pub cancel: Option<CancellationToken>,
    pub on_chunk: Option<ChunkCallback>,
}

impl fmt::Debug for InvokeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvokeOptions")
            .field("stream", &self.stream)
            .field("cancel", &self.cancel.is_some())
            .field("on_chunk", &self.on_chunk.is_some())
            .finish()
    }
}

impl InvokeOptions {
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn streaming(mut self, on_chunk: ChunkCallback) -> Self {
        self.stream = true;
        self.on_chunk = Some(on_chunk);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

/// 模型调用能力
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        model: &str,
        tools: Option<&[Value]>,
        options: InvokeOptions,
    ) -> Result<ModelReply, String>;

    /// 后端期望的工具 schema 方言
    fn schema_format(&self) -> ToolSchemaFormat {
        ToolSchemaFormat::OpenAi
    }
}
