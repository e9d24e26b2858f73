//! 工具层：Tool trait 与注册表、分发解析链、后端 schema 转换、内置工具

pub mod builtin;
pub mod dispatcher;
pub mod registry;
pub mod schema;

pub use builtin::{builtin_tools, ChannelPrompter, UserPrompter, UserQuestion};
pub use dispatcher::{
    ExternalResolver, ExternalTools, Resolution, SetResolver, ToolDispatcher, ToolOutcome,
    ToolResolver,
};
pub use registry::{FnTool, Tool, ToolRegistry, ToolSet, ToolSpec};
pub use schema::{params_schema, react_action_schema_json, to_backend_schema, ToolSchemaFormat};
