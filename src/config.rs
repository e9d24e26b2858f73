//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__AGENT__MODE=react`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::AgentMode;
use crate::memory::MemoryCapacities;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub memory: MemorySection,
    pub tools: ToolsSection,
}

/// [agent] 段：功能开关、默认模式、迭代上限、模型名
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 全局开关；关闭时 should_use_agent 恒为 false
    pub enabled: bool,
    pub mode: AgentMode,
    pub max_iterations: usize,
    pub model: String,
    pub system_prompt: Option<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: AgentMode::FunctionCalling,
            max_iterations: 10,
            model: "gpt-4o-mini".to_string(),
            system_prompt: None,
        }
    }
}

/// [memory] 段：各层容量与持久化路径
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub short_term_capacity: usize,
    pub long_term_capacity: usize,
    pub task_history_capacity: usize,
    /// SQLite 数据库文件
    pub db_path: PathBuf,
    /// SQLite 不可用时的平面键值文件
    pub fallback_path: PathBuf,
    /// download_memory 的输出目录
    pub export_dir: PathBuf,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            short_term_capacity: 50,
            long_term_capacity: 1000,
            task_history_capacity: 100,
            db_path: PathBuf::from("data/agent_memory.db"),
            fallback_path: PathBuf::from("data/agent_memory.json"),
            export_dir: PathBuf::from("data/exports"),
        }
    }
}

impl MemorySection {
    pub fn capacities(&self) -> MemoryCapacities {
        MemoryCapacities {
            short_term: self.short_term_capacity,
            long_term: self.long_term_capacity,
            task_history: self.task_history_capacity,
        }
    }
}

/// [tools] 段：内置工具参数
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub search: SearchSection,
    pub code_execute: CodeExecuteSection,
}

/// [tools.search] 段：搜索端点、查询参数名、超时、最大字符数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub endpoint: String,
    pub query_param: String,
    pub timeout_secs: u64,
    pub max_result_chars: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            endpoint: "https://html.duckduckgo.com/html/".to_string(),
            query_param: "q".to_string(),
            timeout_secs: 15,
            max_result_chars: 8000,
        }
    }
}

/// [tools.code_execute] 段：允许的解释器、超时、输出上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CodeExecuteSection {
    pub interpreters: Vec<String>,
    pub timeout_secs: u64,
    pub max_output_chars: usize,
}

impl Default for CodeExecuteSection {
    fn default() -> Self {
        Self {
            interpreters: vec!["python3".into(), "node".into(), "sh".into()],
            timeout_secs: 10,
            max_output_chars: 4000,
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path.filter(|p| p.exists()) {
        builder = builder.add_source(config::File::from(path).required(false));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

/// 加载失败时记录警告并使用默认配置
pub fn load_config_or_default(config_path: Option<PathBuf>) -> AppConfig {
    load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    })
}
