//! Agent 编排器：一次运行的总控
//!
//! run_agent 先同步占用运行槽位（RunSupervisor），初始化工作记忆，再按模式执行：
//! - ReAct：委托给 ReasoningLoop，提供模型调用与工具分发回调，并把调用方的观察者挂到循环事件上
//! - Function-Calling：自己驱动「模型 → 工具调用（顺序执行）→ 模型」直到模型给出纯文本或达到上限
//! 结束时写入任务历史；RunGuard 释放时清除运行标记、令牌与事件订阅。

use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::core::result::now_millis;
use crate::core::{
    AgentError, AgentMode, AgentResult, AgentState, IterationRecord, RunPhase, RunSupervisor,
};
use crate::llm::{ChatMessage, InvokeOptions, ModelInvoker};
use crate::memory::{MemoryItem, MemoryStore, MemoryType, TaskHistory};
use crate::react::{ApiCall, LoopRequest, ReasoningLoop, RunObserver, ToolExecutorFn};
use crate::tools::{to_backend_schema, ExternalTools, ToolDispatcher, ToolSet};

/// max_iterations 的允许范围
pub const MIN_ITERATIONS: usize = 1;
pub const MAX_ITERATIONS: usize = 50;

/// system prompt 中附带的相似历史任务条数
const SIMILAR_TASKS_IN_PROMPT: usize = 3;

/// 编排器的默认值（来自配置）
#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub default_mode: AgentMode,
    pub max_iterations: usize,
    pub model: String,
    pub system_prompt: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            default_mode: AgentMode::FunctionCalling,
            max_iterations: 10,
            model: "gpt-4o-mini".to_string(),
            system_prompt: "You are an autonomous agent. Use the available tools when they help, \
                            and reply with a plain answer once the task is done."
                .to_string(),
        }
    }
}

/// 单次运行的选项；未设置的项使用编排器默认值
#[derive(Clone, Default)]
pub struct RunOptions {
    pub mode: Option<AgentMode>,
    pub max_iterations: Option<usize>,
    /// 本次运行注入的工具（不可变快照）
    pub tools: ToolSet,
    pub context: Value,
    pub observer: Option<Arc<dyn RunObserver>>,
    pub model: Option<String>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: AgentMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = Some(max);
        self
    }

    pub fn tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }

    pub fn context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

pub struct Orchestrator {
    supervisor: Arc<RunSupervisor>,
    model: Arc<dyn ModelInvoker>,
    reasoning: Arc<dyn ReasoningLoop>,
    memory: Arc<MemoryStore>,
    builtins: ToolSet,
    external: Option<Arc<dyn ExternalTools>>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn ModelInvoker>,
        reasoning: Arc<dyn ReasoningLoop>,
        memory: Arc<MemoryStore>,
        builtins: ToolSet,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            supervisor: Arc::new(RunSupervisor::new()),
            model,
            reasoning,
            memory,
            builtins,
            external: None,
            settings,
        }
    }

    pub fn with_external_tools(mut self, external: Arc<dyn ExternalTools>) -> Self {
        self.external = Some(external);
        self
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// 执行一次任务。已有运行时立即返回 AlreadyRunning。
    pub async fn run_agent(&self, goal: &str, options: RunOptions) -> Result<AgentResult, AgentError> {
        let mode = options.mode.unwrap_or(self.settings.default_mode);
        let mut guard = self.supervisor.try_begin(mode)?;
        let token = guard.token();
        let max_iterations = options
            .max_iterations
            .unwrap_or(self.settings.max_iterations)
            .clamp(MIN_ITERATIONS, MAX_ITERATIONS);

        let task_id = format!("task_{}", uuid::Uuid::new_v4().simple());
        let start_time = now_millis();
        self.memory.init_working_memory(&task_id, goal);
        self.memory.add_to_short_term(MemoryItem::new(
            MemoryType::Context,
            json!({ "taskId": task_id, "goal": goal, "mode": mode }),
        ));

        if mode == AgentMode::React {
            if let Some(observer) = options.observer.clone() {
                let id = self.reasoning.events().subscribe_observer(observer);
                let reasoning = Arc::clone(&self.reasoning);
                guard.on_release(move || {
                    reasoning.events().unsubscribe(id);
                });
            }
        }

        let dispatcher = ToolDispatcher::for_run(
            options.tools.clone(),
            self.builtins.clone(),
            self.external.clone(),
        );
        tracing::info!(task_id = %task_id, mode = ?mode, max_iterations, "Agent run started");

        let outcome = match mode {
            AgentMode::React => {
                self.run_react(goal, &options, max_iterations, &dispatcher, &token)
                    .await
            }
            AgentMode::FunctionCalling => {
                self.run_function_calling(goal, &options, max_iterations, &dispatcher, &token)
                    .await
            }
        };

        let phase = match &outcome {
            Ok(result) if result.success => RunPhase::Completed,
            Ok(_) if token.is_cancelled() => RunPhase::Aborted,
            _ => RunPhase::Failed,
        };
        guard.finish(phase);

        let (success, iterations, summary) = match &outcome {
            Ok(result) => (result.success, result.turns(), result.summary.clone()),
            Err(e) => (
                false,
                self.memory.get_working_memory().iteration,
                format!("Failed: {}", e),
            ),
        };
        self.memory.add_task_history(TaskHistory {
            task_id: task_id.clone(),
            goal: goal.to_string(),
            start_time,
            end_time: now_millis(),
            success,
            iterations,
            summary,
        });
        if let Ok(result) = &outcome {
            if result.success {
                self.memory
                    .add_to_short_term(MemoryItem::new(MemoryType::Result, result.result.clone()));
            }
        }
        tracing::info!(task_id = %task_id, phase = ?phase, iterations, "Agent run finished");

        // 先释放运行槽位，回调里可以立即发起下一次运行
        drop(guard);

        if let Some(observer) = &options.observer {
            match &outcome {
                Ok(result) => observer.on_complete(result),
                Err(e) => observer.on_error(e),
            }
        }
        outcome
    }

    async fn run_react(
        &self,
        goal: &str,
        options: &RunOptions,
        max_iterations: usize,
        dispatcher: &ToolDispatcher,
        token: &CancellationToken,
    ) -> Result<AgentResult, AgentError> {
        let api_call: ApiCall = {
            let model = Arc::clone(&self.model);
            let memory = Arc::clone(&self.memory);
            let model_name = options.model.clone().unwrap_or_else(|| self.settings.model.clone());
            let token = token.clone();
            Arc::new(move |messages: Vec<ChatMessage>| {
                let model = Arc::clone(&model);
                let model_name = model_name.clone();
                let token = token.clone();
                memory.increment_iteration();
                async move {
                    model
                        .invoke(&messages, &model_name, None, InvokeOptions::default().with_cancel(token))
                        .await
                        .map(|reply| reply.content)
                        .map_err(AgentError::ModelInvocation)
                }
                .boxed()
            })
        };

        let tool_executor: ToolExecutorFn = {
            let dispatcher = dispatcher.clone();
            let memory = Arc::clone(&self.memory);
            Arc::new(move |name: String, args: Value| {
                let dispatcher = dispatcher.clone();
                let memory = Arc::clone(&memory);
                async move {
                    record_action(&memory, &name, &args);
                    let outcome = dispatcher.dispatch(&name, args).await.to_value();
                    memory.add_to_short_term(MemoryItem::new(MemoryType::Result, outcome.clone()));
                    outcome
                }
                .boxed()
            })
        };

        let request = LoopRequest {
            task: goal.to_string(),
            context: options.context.clone(),
            tools: dispatcher.specs(),
            max_iterations,
            api_call,
            tool_executor,
            cancel: token.clone(),
        };
        self.reasoning.execute_loop(request).await
    }

    async fn run_function_calling(
        &self,
        goal: &str,
        options: &RunOptions,
        max_iterations: usize,
        dispatcher: &ToolDispatcher,
        token: &CancellationToken,
    ) -> Result<AgentResult, AgentError> {
        let model_name = options.model.clone().unwrap_or_else(|| self.settings.model.clone());
        let schemas = to_backend_schema(&dispatcher.specs(), self.model.schema_format());
        let tools = (!schemas.is_empty()).then_some(schemas.as_slice());

        let mut messages = vec![
            ChatMessage::system(self.build_system_prompt(goal, &options.context)),
            ChatMessage::user(goal),
        ];
        let mut iterations = Vec::new();

        for _ in 0..max_iterations {
            if token.is_cancelled() {
                return Ok(AgentResult::aborted(iterations));
            }
            let index = self.memory.increment_iteration();
            tracing::debug!(iteration = index, "Function-calling iteration");

            let reply = match self
                .model
                .invoke(
                    &messages,
                    &model_name,
                    tools,
                    InvokeOptions::default().with_cancel(token.clone()),
                )
                .await
            {
                Ok(reply) => reply,
                Err(e) => {
                    let err = AgentError::ModelInvocation(e);
                    if token.is_cancelled() {
                        return Err(err);
                    }
                    tracing::warn!(iteration = index, error = %err, "Iteration failed, continuing");
                    iterations.push(IterationRecord::error(index, &err));
                    continue;
                }
            };

            if !reply.has_tool_calls() {
                iterations.push(IterationRecord::completion(index, &reply.content));
                return Ok(AgentResult::completed(&reply.content, iterations, goal));
            }

            for call in reply.tool_calls {
                record_action(&self.memory, &call.name, &call.arguments);
                let outcome = dispatcher.dispatch(&call.name, call.arguments.clone()).await.to_value();
                self.memory
                    .add_to_short_term(MemoryItem::new(MemoryType::Result, outcome.clone()));
                messages.push(ChatMessage::assistant_tool_calls(
                    reply.content.clone(),
                    vec![call.clone()],
                ));
                messages.push(ChatMessage::tool(&call.id, outcome.to_string()));
                iterations.push(IterationRecord::tool_call(index, &call.name, call.arguments, outcome));
            }
        }

        Ok(AgentResult::exhausted(max_iterations, iterations, goal))
    }

    /// 基础 prompt + 工作记忆 + 相似历史任务 + 调用方上下文
    fn build_system_prompt(&self, goal: &str, context: &Value) -> String {
        let mut prompt = self.settings.system_prompt.clone();
        let working = self.memory.get_working_memory().to_prompt_section();
        if !working.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(working.trim_end());
        }
        let similar = self.memory.search_similar_tasks(goal, SIMILAR_TASKS_IN_PROMPT);
        if !similar.is_empty() {
            prompt.push_str("\n\n## Similar past tasks\n");
            for task in similar {
                prompt.push_str(&format!(
                    "- [{}] {}: {}\n",
                    if task.success { "ok" } else { "failed" },
                    task.goal,
                    task.summary
                ));
            }
        }
        if !context.is_null() {
            prompt.push_str(&format!("\n\n## Context\n{}", context));
        }
        prompt
    }

    /// 中止当前运行；无运行时返回 false
    pub fn stop_agent(&self) -> bool {
        let signalled = self.supervisor.cancel();
        self.reasoning.abort();
        if signalled {
            tracing::info!("Agent stop requested");
        }
        signalled
    }

    /// 仅 ReAct 模式有效
    pub fn pause_agent(&self) {
        self.reasoning.pause();
    }

    pub fn resume_agent(&self) {
        self.reasoning.resume();
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    pub fn get_state(&self) -> AgentState {
        let phase = self.supervisor.phase();
        let working = self.memory.get_working_memory();
        let loop_state = matches!(phase, RunPhase::Running { mode: AgentMode::React })
            .then(|| self.reasoning.current_state());
        AgentState {
            phase,
            is_running: self.supervisor.is_running(),
            last_outcome: self.supervisor.last_outcome(),
            task_id: working.task_id,
            goal: working.goal,
            iteration: working.iteration,
            loop_state,
        }
    }
}

fn record_action(memory: &MemoryStore, tool: &str, args: &Value) {
    memory.add_to_short_term(MemoryItem::new(
        MemoryType::Action,
        json!({ "tool": tool, "args": args }),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptedModel, ScriptedReply};
    use crate::memory::{HistoryQuery, MemoryCapacities};
    use crate::react::ReactLoop;
    use crate::tools::{FnTool, Tool};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn orchestrator(model: ScriptedModel) -> (Orchestrator, Arc<MemoryStore>) {
        let memory = Arc::new(MemoryStore::new(MemoryCapacities::default()));
        let orch = Orchestrator::new(
            Arc::new(model),
            Arc::new(ReactLoop::default()),
            Arc::clone(&memory),
            ToolSet::default(),
            OrchestratorSettings::default(),
        );
        (orch, memory)
    }

    fn counting_tool(name: &str, counter: Arc<AtomicUsize>) -> ToolSet {
        let tool: Arc<dyn Tool> = Arc::new(FnTool::new(name, "counts calls", move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(json!({ "hits": n })) }.boxed()
        }));
        ToolSet::new(vec![tool])
    }

    #[tokio::test]
    async fn test_plain_text_completes_in_one_iteration() {
        let (orch, memory) = orchestrator(ScriptedModel::new(vec![ScriptedReply::text("final text")]));
        let result = orch.run_agent("research X", RunOptions::new()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.iterations.len(), 1);
        assert_eq!(result.response(), Some("final text"));
        assert!(!orch.is_running());
        assert_eq!(orch.get_state().last_outcome, Some(RunPhase::Completed));

        let history = memory.get_task_history(&HistoryQuery::default());
        assert_eq!(history.len(), 1);
        assert!(history[0].success);
        assert_eq!(history[0].iterations, 1);
    }

    #[tokio::test]
    async fn test_iteration_ceiling() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (orch, _) = orchestrator(ScriptedModel::repeating(ScriptedReply::tool(
            "web_search",
            json!({"query": "x"}),
        )));
        let result = orch
            .run_agent(
                "research X",
                RunOptions::new()
                    .max_iterations(4)
                    .tools(counting_tool("web_search", counter.clone())),
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.iterations.len(), 4);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert_eq!(orch.get_state().last_outcome, Some(RunPhase::Failed));
        assert_eq!(orch.get_state().iteration, 4);
    }

    #[tokio::test]
    async fn test_max_iterations_clamped() {
        let (orch, _) = orchestrator(ScriptedModel::repeating(ScriptedReply::Fail("down".into())));
        let result = orch
            .run_agent("x", RunOptions::new().max_iterations(0))
            .await
            .unwrap();
        assert_eq!(result.iterations.len(), 1);

        let result = orch
            .run_agent("x", RunOptions::new().max_iterations(500))
            .await
            .unwrap();
        assert_eq!(result.iterations.len(), MAX_ITERATIONS);
        assert!(result.iterations.iter().all(IterationRecord::is_error));
    }

    #[tokio::test]
    async fn test_model_error_recorded_then_continues() {
        let (orch, _) = orchestrator(ScriptedModel::new(vec![
            ScriptedReply::Fail("rate limited".into()),
            ScriptedReply::text("recovered"),
        ]));
        let result = orch.run_agent("x", RunOptions::new()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.iterations.len(), 2);
        assert!(result.iterations[0].is_error());
        assert_eq!(result.iterations[1].index, 2);
    }

    #[tokio::test]
    async fn test_tool_messages_are_paired() {
        let model = Arc::new(
            ScriptedModel::new(vec![
                ScriptedReply::ToolCalls(vec![
                    ("a".into(), json!({})),
                    ("b".into(), json!({})),
                ]),
                ScriptedReply::text("done"),
            ]),
        );
        let memory = Arc::new(MemoryStore::new(MemoryCapacities::default()));
        let orch = Orchestrator::new(
            model.clone(),
            Arc::new(ReactLoop::default()),
            Arc::clone(&memory),
            ToolSet::default(),
            OrchestratorSettings::default(),
        );
        let counter = Arc::new(AtomicUsize::new(0));
        let tools: ToolSet = counting_tool("a", counter.clone())
            .get("a")
            .into_iter()
            .chain(counting_tool("b", counter.clone()).get("b"))
            .collect();
        let result = orch.run_agent("x", RunOptions::new().tools(tools)).await.unwrap();
        assert!(result.success);
        assert_eq!(result.iterations.len(), 3);
        assert_eq!(result.iterations[0].index, result.iterations[1].index);

        let second_call = &model.transcripts()[1];
        let roles: Vec<_> = second_call.iter().map(|m| m.role).collect();
        use crate::llm::Role;
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant, Role::Tool]
        );

        // 两次工具调用属于同一轮：历史与摘要都按模型轮次计数
        let history = memory.get_task_history(&HistoryQuery::default());
        assert_eq!(history[0].iterations, 2);
        assert_eq!(history[0].iterations, result.turns());
        assert!(history[0].summary.contains("2 iteration(s)"));
    }

    #[tokio::test]
    async fn test_stop_between_iterations() {
        let model = ScriptedModel::repeating(ScriptedReply::tool("slow", json!({})));
        let (orch, _) = orchestrator(model);
        let orch = Arc::new(orch);
        let tool: Arc<dyn Tool> = Arc::new(FnTool::new("slow", "", |_| {
            async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(json!("tick"))
            }
            .boxed()
        }));

        let runner = Arc::clone(&orch);
        let handle = tokio::spawn(async move {
            runner
                .run_agent("x", RunOptions::new().max_iterations(50).tools(ToolSet::new(vec![tool])))
                .await
        });
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(orch.stop_agent());

        let result = handle.await.unwrap().unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Cancelled by user"));
        assert!(result.iterations.len() < 50);
        assert_eq!(orch.get_state().last_outcome, Some(RunPhase::Aborted));
        assert!(!orch.stop_agent());
    }

    #[derive(Default)]
    struct ErrorLog {
        errors: std::sync::Mutex<Vec<String>>,
        completions: AtomicUsize,
    }

    impl RunObserver for ErrorLog {
        fn on_complete(&self, _result: &AgentResult) {
            self.completions.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&self, error: &AgentError) {
            self.errors.lock().unwrap().push(error.to_string());
        }
    }

    #[tokio::test]
    async fn test_stop_during_model_call_propagates_error() {
        let model = ScriptedModel::repeating(ScriptedReply::text("too late"))
            .with_delay(Duration::from_secs(5));
        let (orch, memory) = orchestrator(model);
        let orch = Arc::new(orch);
        let log = Arc::new(ErrorLog::default());

        let runner = Arc::clone(&orch);
        let observer = log.clone();
        let handle = tokio::spawn(async move {
            runner
                .run_agent("x", RunOptions::new().observer(observer))
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(orch.stop_agent());

        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, Err(AgentError::ModelInvocation(_))));
        assert_eq!(orch.get_state().last_outcome, Some(RunPhase::Failed));
        assert!(!orch.is_running());

        let errors = log.errors.lock().unwrap().clone();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Model invocation failed"));
        assert_eq!(log.completions.load(Ordering::SeqCst), 0);

        let history = memory.get_task_history(&HistoryQuery::default());
        assert!(!history[0].success);
        assert!(history[0].summary.starts_with("Failed:"));
    }
}
