//! Agent 错误类型
//!
//! 运行期错误分类：并发拒绝、工具失败、模型调用失败、持久化失败、导入校验失败、取消。
//! 工具与持久化错误在边界处被吸收，只有并发拒绝与不可恢复错误会返回给调用方。

use thiserror::Error;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    /// 已有运行中的任务，新的 run_agent 被立即拒绝
    #[error("Agent is already running")]
    AlreadyRunning,

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Model invocation failed: {0}")]
    ModelInvocation(String),

    /// 持久化失败只记录日志，不向调用方抛出
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid memory import: {0}")]
    ImportValidation(String),

    /// ReAct 推理循环自身的失败
    #[error("Reasoning loop failed: {0}")]
    Loop(String),

    #[error("Cancelled by user")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::Persistence(e.to_string())
    }
}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        AgentError::Persistence(e.to_string())
    }
}
