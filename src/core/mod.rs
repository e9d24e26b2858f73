//! 核心编排层：错误、运行状态、单运行监管、准入判断与主控编排器

pub mod admission;
pub mod error;
pub mod orchestrator;
pub mod result;
pub mod run_supervisor;
pub mod state;

pub use admission::should_use_agent;
pub use error::AgentError;
pub use orchestrator::{Orchestrator, OrchestratorSettings, RunOptions};
pub use result::{AgentResult, IterationRecord};
pub use run_supervisor::{RunGuard, RunSupervisor};
pub use state::{AgentMode, AgentState, RunPhase};
