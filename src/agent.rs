//! 组合根：从配置组装记忆、内置工具、推理循环与编排器
//!
//! 一个进程通常只构建一个 Orchestrator；它持有唯一的 RunSupervisor，保证同一时刻只有一次运行。

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{load_config, AppConfig};
use crate::core::{AgentError, Orchestrator, OrchestratorSettings};
use crate::llm::{EchoModel, ModelInvoker};
use crate::memory::MemoryStore;
use crate::react::{ReactLoop, ReasoningLoop};
use crate::tools::{builtin_tools, ExternalTools, UserPrompter};

pub struct AgentBuilder {
    config: AppConfig,
    model: Option<Arc<dyn ModelInvoker>>,
    reasoning: Option<Arc<dyn ReasoningLoop>>,
    prompter: Option<Arc<dyn UserPrompter>>,
    external: Option<Arc<dyn ExternalTools>>,
    memory: Option<Arc<MemoryStore>>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            model: None,
            reasoning: None,
            prompter: None,
            external: None,
            memory: None,
        }
    }

    /// 从配置文件构建；文件缺失时使用默认配置
    pub fn from_config_file(path: Option<PathBuf>) -> Result<Self, AgentError> {
        let config = load_config(path).map_err(|e| AgentError::Config(e.to_string()))?;
        Ok(Self::new(config))
    }

    pub fn model(mut self, model: Arc<dyn ModelInvoker>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn reasoning_loop(mut self, reasoning: Arc<dyn ReasoningLoop>) -> Self {
        self.reasoning = Some(reasoning);
        self
    }

    pub fn prompter(mut self, prompter: Arc<dyn UserPrompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    pub fn external_tools(mut self, external: Arc<dyn ExternalTools>) -> Self {
        self.external = Some(external);
        self
    }

    /// 使用现成的记忆存储（如测试中的内存版）
    pub fn memory(mut self, memory: Arc<MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn build(self) -> Orchestrator {
        let memory = match self.memory {
            Some(memory) => memory,
            None => {
                let section = &self.config.memory;
                MemoryStore::open(
                    section.capacities(),
                    section.db_path.clone(),
                    section.fallback_path.clone(),
                )
                .await
            }
        };

        let mut settings = OrchestratorSettings {
            default_mode: self.config.agent.mode,
            max_iterations: self.config.agent.max_iterations,
            model: self.config.agent.model.clone(),
            ..OrchestratorSettings::default()
        };
        if let Some(prompt) = self.config.agent.system_prompt.clone() {
            settings.system_prompt = prompt;
        }

        let builtins = builtin_tools(&self.config.tools, Arc::clone(&memory), self.prompter);
        let reasoning = self
            .reasoning
            .unwrap_or_else(|| Arc::new(ReactLoop::new(settings.system_prompt.clone())));
        let model = self.model.unwrap_or_else(|| {
            tracing::warn!("No model configured, falling back to echo model");
            Arc::new(EchoModel)
        });

        tracing::info!(
            backend = ?memory.backend_kind(),
            tools = ?builtins.names(),
            mode = ?settings.default_mode,
            "Agent assembled"
        );

        let orchestrator = Orchestrator::new(model, reasoning, memory, builtins, settings);
        match self.external {
            Some(external) => orchestrator.with_external_tools(external),
            None => orchestrator,
        }
    }
}
