//! Hive - Agent 执行核心
//!
//! 模块划分：
//! - **agent**: 组合根，从配置组装编排器
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排器、运行监管、状态快照、准入判断、错误
//! - **llm**: 模型调用抽象与 mock 实现
//! - **memory**: 工作 / 短期 / 长期记忆、任务历史与持久化
//! - **react**: ReAct 推理循环、动作解析、过程事件
//! - **tools**: Tool trait、分发解析链、schema 转换、内置工具

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use agent::AgentBuilder;
pub use config::{load_config, load_config_or_default, AppConfig};
pub use core::{
    should_use_agent, AgentError, AgentMode, AgentResult, AgentState, Orchestrator, RunOptions,
    RunPhase,
};
pub use memory::{MemoryStore, MemoryType};
