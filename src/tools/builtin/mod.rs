//! 内置工具：注入列表中找不到时的第二级解析

pub mod ask_user;
pub mod code_execute;
pub mod rag_search;
pub mod web_search;

use std::sync::Arc;

pub use ask_user::{AskUserTool, ChannelPrompter, UserPrompter, UserQuestion};
pub use code_execute::CodeExecuteTool;
pub use rag_search::RagSearchTool;
pub use web_search::WebSearchTool;

use crate::config::ToolsSection;
use crate::memory::MemoryStore;
use crate::tools::{Tool, ToolSet};

/// 内置工具集：web_search / rag_search / code_execute / ask_user
pub fn builtin_tools(
    config: &ToolsSection,
    memory: Arc<MemoryStore>,
    prompter: Option<Arc<dyn UserPrompter>>,
) -> ToolSet {
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(WebSearchTool::new(&config.search)),
        Arc::new(RagSearchTool::new(memory)),
        Arc::new(CodeExecuteTool::new(&config.code_execute)),
        Arc::new(AskUserTool::new(prompter)),
    ];
    ToolSet::new(tools)
}
