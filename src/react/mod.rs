//! 推理层：ReAct 循环、动作解析、过程事件

pub mod events;
pub mod loop_;
pub mod planner;

pub use events::{EventBus, LoopEvent, RunObserver, SubscriptionId};
pub use loop_::{
    ApiCall, LoopRequest, LoopState, LoopStatus, ReactLoop, ReasoningLoop, ToolExecutorFn,
};
pub use planner::{parse_step, Step};
