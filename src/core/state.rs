//! 运行状态：模式、生命周期阶段与对外快照
//!
//! 生命周期：Idle → Running(mode) → {Completed, Failed, Aborted} → Idle。
//! 终态在 RunGuard 释放时回到 Idle，并保留为 last_outcome 供 UI 展示。

use serde::{Deserialize, Serialize};

use crate::react::LoopState;

/// 运行模式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// 委托给外部 ReAct 推理循环
    React,
    /// 由 Orchestrator 自己驱动模型 ↔ 工具的结构化调用循环
    #[default]
    FunctionCalling,
}

impl std::str::FromStr for AgentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "react" => Ok(AgentMode::React),
            "function_calling" | "function-calling" | "functions" => Ok(AgentMode::FunctionCalling),
            other => Err(format!("Unknown agent mode: {}", other)),
        }
    }
}

/// 生命周期阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Running { mode: AgentMode },
    Completed,
    Failed,
    Aborted,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Failed | RunPhase::Aborted)
    }
}

/// get_state() 返回的快照（值拷贝，不持有内部引用）
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub phase: RunPhase,
    pub is_running: bool,
    /// 上一次运行的终态
    pub last_outcome: Option<RunPhase>,
    pub task_id: Option<String>,
    pub goal: Option<String>,
    pub iteration: usize,
    /// 仅 ReAct 模式运行中可用
    pub loop_state: Option<LoopState>,
}
