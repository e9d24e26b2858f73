//! Mock 模型（用于测试与本地运行，无需 API）
//!
//! - EchoModel：回显最后一条 User 消息
//! - ScriptedModel：按脚本依次返回文本 / 工具调用 / 错误，并记录每次调用收到的消息

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{ChatMessage, InvokeOptions, ModelInvoker, ModelReply, Role, ToolCallRequest};

fn last_user(messages: &[ChatMessage]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("(no input)")
}

/// 回显用户最后一条消息
#[derive(Debug, Default)]
pub struct EchoModel;

#[async_trait]
impl ModelInvoker for EchoModel {
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        _model: &str,
        _tools: Option<&[Value]>,
        options: InvokeOptions,
    ) -> Result<ModelReply, String> {
        if options.is_cancelled() {
            return Err("Request cancelled".to_string());
        }
        let content = format!("Echo from Mock: {}", last_user(messages));
        if let Some(on_chunk) = options.on_chunk.as_ref().filter(|_| options.stream) {
            on_chunk(&content);
        }
        Ok(ModelReply::text(content))
    }
}

/// 脚本中的一步
#[derive(Clone, Debug)]
pub enum ScriptedReply {
    Text(String),
    /// (工具名, 参数)
    ToolCalls(Vec<(String, Value)>),
    Fail(String),
}

impl ScriptedReply {
    pub fn text(content: impl Into<String>) -> Self {
        ScriptedReply::Text(content.into())
    }

    pub fn tool(name: impl Into<String>, args: Value) -> Self {
        ScriptedReply::ToolCalls(vec![(name.into(), args)])
    }

    fn into_reply(self) -> Result<ModelReply, String> {
        match self {
            ScriptedReply::Text(content) => Ok(ModelReply::text(content)),
            ScriptedReply::ToolCalls(calls) => Ok(ModelReply::with_tool_calls(
                calls
                    .into_iter()
                    .map(|(name, args)| ToolCallRequest::new(name, args))
                    .collect(),
            )),
            ScriptedReply::Fail(reason) => Err(reason),
        }
    }
}

/// 脚本模型：脚本耗尽后返回 repeat（若设置），否则报错
#[derive(Debug, Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<ScriptedReply>>,
    repeat: Option<ScriptedReply>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    transcripts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new(script: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        }
    }

    /// 每次都返回同一回复
    pub fn repeating(reply: ScriptedReply) -> Self {
        Self {
            repeat: Some(reply),
            ..Self::default()
        }
    }

    pub fn then_repeat(mut self, reply: ScriptedReply) -> Self {
        self.repeat = Some(reply);
        self
    }

    /// 每次调用前等待（可被取消）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 每次调用收到的完整消息列表
    pub fn transcripts(&self) -> Vec<Vec<ChatMessage>> {
        self.transcripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn next_reply(&self) -> Option<ScriptedReply> {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .or_else(|| self.repeat.clone())
    }
}

#[async_trait]
impl ModelInvoker for ScriptedModel {
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        _model: &str,
        _tools: Option<&[Value]>,
        options: InvokeOptions,
    ) -> Result<ModelReply, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.transcripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(messages.to_vec());

        if let Some(delay) = self.delay {
            match options.cancel.clone() {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => return Err("Request cancelled".to_string()),
                    _ = tokio::time::sleep(delay) => {}
                },
                None => tokio::time::sleep(delay).await,
            }
        }
        if options.is_cancelled() {
            return Err("Request cancelled".to_string());
        }

        let reply = self
            .next_reply()
            .ok_or_else(|| "Scripted model exhausted".to_string())?
            .into_reply()?;

        if options.stream {
            if let Some(on_chunk) = &options.on_chunk {
                for piece in reply.content.split_inclusive(' ') {
                    on_chunk(piece);
                }
            }
        }
        Ok(reply)
    }
}
