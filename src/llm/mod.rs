//! 模型层：调用抽象与 mock 实现

pub mod mock;
pub mod traits;

pub use mock::{EchoModel, ScriptedModel, ScriptedReply};
pub use traits::{
    ChatMessage, ChunkCallback, InvokeOptions, ModelInvoker, ModelReply, Role, ToolCallRequest,
};
