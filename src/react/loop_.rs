//! ReAct 推理循环
//!
//! Observe → Think（调用模型）→ Act（分发工具）→ Result，直到模型给出最终回复或达到迭代上限。
//! 编排器通过 LoopRequest 提供模型调用与工具分发两个回调；循环只负责推进步骤与发布事件。
//! 暂停与中止只在两轮之间生效；进行中的模型调用在中止时被放弃。

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, AgentResult, IterationRecord};
use crate::llm::ChatMessage;
use crate::react::planner::{parse_step, Step, RETRY_PROMPT};
use crate::react::{EventBus, LoopEvent};
use crate::tools::{react_action_schema_json, ToolSpec};

/// 模型调用回调：完整消息列表 → 模型文本
pub type ApiCall =
    Arc<dyn Fn(Vec<ChatMessage>) -> BoxFuture<'static, Result<String, AgentError>> + Send + Sync>;

/// 工具分发回调：(工具名, 参数) → 统一结果形状
pub type ToolExecutorFn = Arc<dyn Fn(String, Value) -> BoxFuture<'static, Value> + Send + Sync>;

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 2000;

/// 一次循环的输入
pub struct LoopRequest {
    pub task: String,
    pub context: Value,
    pub tools: Vec<ToolSpec>,
    pub max_iterations: usize,
    pub api_call: ApiCall,
    pub tool_executor: ToolExecutorFn,
    /// 运行级取消令牌；循环在其上派生自己的子令牌
    pub cancel: CancellationToken,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Aborted,
}

/// current_state() 返回的快照
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopState {
    pub iteration: usize,
    pub status: LoopStatus,
    pub is_paused: bool,
}

/// 推理循环接口（ReAct 模式的委托对象）
#[async_trait]
pub trait ReasoningLoop: Send + Sync {
    async fn execute_loop(&self, request: LoopRequest) -> Result<AgentResult, AgentError>;

    fn events(&self) -> &EventBus;

    fn abort(&self);

    fn pause(&self);

    fn resume(&self);

    fn current_state(&self) -> LoopState;
}

/// 默认的 JSON 动作 ReAct 循环
pub struct ReactLoop {
    events: EventBus,
    state: Mutex<LoopState>,
    /// 当前运行的子令牌
    active: Mutex<Option<CancellationToken>>,
    paused: watch::Sender<bool>,
    system_prompt: String,
}

impl Default for ReactLoop {
    fn default() -> Self {
        Self::new("You are an autonomous agent that solves the user's task step by step.")
    }
}

impl ReactLoop {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            events: EventBus::new(),
            state: Mutex::new(LoopState::default()),
            active: Mutex::new(None),
            paused,
            system_prompt: system_prompt.into(),
        }
    }

    fn update_state(&self, f: impl FnOnce(&mut LoopState)) {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn build_system_prompt(&self, tools: &[ToolSpec], context: &Value) -> String {
        let mut prompt = self.system_prompt.clone();
        prompt.push_str("\n\n## Available tools\n");
        if tools.is_empty() {
            prompt.push_str("(none)\n");
        }
        for tool in tools {
            prompt.push_str(&format!(
                "- {}: {}\n  parameters: {}\n",
                tool.name, tool.description, tool.parameters
            ));
        }
        prompt.push_str("\n## Action format\nReply with one JSON object per step matching this schema:\n");
        prompt.push_str(&react_action_schema_json());
        if !context.is_null() {
            prompt.push_str(&format!("\n\n## Context\n{}", context));
        }
        prompt
    }

    /// 暂停时等待恢复；返回 false 表示等待期间被中止
    async fn wait_while_paused(&self, token: &CancellationToken) -> bool {
        let mut rx = self.paused.subscribe();
        tokio::select! {
            _ = token.cancelled() => false,
            res = rx.wait_for(|paused| !*paused) => res.is_ok(),
        }
    }

    async fn run_steps(&self, request: LoopRequest, token: &CancellationToken) -> AgentResult {
        let LoopRequest {
            task,
            context,
            tools,
            max_iterations,
            api_call,
            tool_executor,
            ..
        } = request;

        let mut messages = vec![
            ChatMessage::system(self.build_system_prompt(&tools, &context)),
            ChatMessage::user(task.clone()),
        ];
        let mut iterations = Vec::new();
        let mut observation = task.clone();

        for index in 1..=max_iterations {
            if !self.wait_while_paused(token).await || token.is_cancelled() {
                return AgentResult::aborted(iterations);
            }
            self.update_state(|s| s.iteration = index);
            tracing::debug!(iteration = index, "ReAct iteration");
            self.events.emit(&LoopEvent::Observe {
                iteration: index,
                observation: observation.clone(),
            });

            let reply = tokio::select! {
                _ = token.cancelled() => return AgentResult::aborted(iterations),
                reply = api_call(messages.clone()) => reply,
            };
            let output = match reply {
                Ok(output) => output,
                Err(e) => {
                    tracing::warn!(iteration = index, error = %e, "ReAct model call failed");
                    iterations.push(IterationRecord::error(index, &e));
                    observation = format!("Error: {}", e);
                    continue;
                }
            };
            self.events.emit(&LoopEvent::Think {
                iteration: index,
                thought: output.clone(),
            });

            match parse_step(&output) {
                Ok(Step::Answer(answer)) => {
                    iterations.push(IterationRecord::completion(index, &answer));
                    return AgentResult::completed(&answer, iterations, &task);
                }
                Ok(Step::Act { tool, args }) => {
                    self.events.emit(&LoopEvent::Act {
                        iteration: index,
                        tool: tool.clone(),
                        args: args.clone(),
                    });
                    let outcome = tool_executor(tool.clone(), args.clone()).await;
                    self.events.emit(&LoopEvent::Result {
                        iteration: index,
                        tool: tool.clone(),
                        outcome: outcome.clone(),
                    });
                    let preview: String = outcome.to_string().chars().take(OBSERVATION_PREVIEW_CHARS).collect();
                    observation = format!("Observation from {}: {}", tool, preview);
                    messages.push(ChatMessage::assistant(output));
                    messages.push(ChatMessage::user(observation.clone()));
                    iterations.push(IterationRecord::tool_call(index, &tool, args, outcome));
                }
                Err(e) => {
                    // 格式错误：记录并提示模型重新按格式输出
                    iterations.push(IterationRecord::error(index, &e));
                    messages.push(ChatMessage::assistant(output));
                    messages.push(ChatMessage::user(RETRY_PROMPT));
                    observation = RETRY_PROMPT.to_string();
                }
            }
        }

        AgentResult::exhausted(max_iterations, iterations, &task)
    }
}

#[async_trait]
impl ReasoningLoop for ReactLoop {
    async fn execute_loop(&self, request: LoopRequest) -> Result<AgentResult, AgentError> {
        let token = request.cancel.child_token();
        // 暂停只作用于当前运行
        self.paused.send_replace(false);
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        self.update_state(|s| {
            s.iteration = 0;
            s.status = LoopStatus::Running;
            s.is_paused = false;
        });

        let result = self.run_steps(request, &token).await;

        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.paused.send_replace(false);
        let status = if result.success {
            LoopStatus::Completed
        } else if token.is_cancelled() {
            LoopStatus::Aborted
        } else {
            LoopStatus::Failed
        };
        self.update_state(|s| {
            s.status = status;
            s.is_paused = false;
        });
        Ok(result)
    }

    fn events(&self) -> &EventBus {
        &self.events
    }

    fn abort(&self) {
        if let Some(token) = self.active.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            token.cancel();
        }
    }

    /// 没有进行中的运行时忽略
    fn pause(&self) {
        if self.active.lock().unwrap_or_else(PoisonError::into_inner).is_none() {
            return;
        }
        self.paused.send_replace(true);
        self.update_state(|s| s.is_paused = true);
    }

    fn resume(&self) {
        self.paused.send_replace(false);
        self.update_state(|s| s.is_paused = false);
    }

    fn current_state(&self) -> LoopState {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::time::Duration;

    fn scripted_api(replies: Vec<Result<String, AgentError>>) -> ApiCall {
        let queue = Arc::new(Mutex::new(VecDeque::from(replies)));
        Arc::new(move |_messages| {
            let next = queue.lock().unwrap().pop_front();
            async move { next.unwrap_or_else(|| Ok("{\"tool\": \"echo\"}".to_string())) }.boxed()
        })
    }

    fn echo_executor() -> ToolExecutorFn {
        Arc::new(|tool, args| async move { json!({"success": true, "tool": tool, "result": args}) }.boxed())
    }

    fn request(api_call: ApiCall, max_iterations: usize) -> LoopRequest {
        LoopRequest {
            task: "research X".into(),
            context: Value::Null,
            tools: Vec::new(),
            max_iterations,
            api_call,
            tool_executor: echo_executor(),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_tool_then_answer_emits_events() {
        let react = ReactLoop::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        react.events().subscribe(move |e| sink.lock().unwrap().push(e.clone()));

        let api = scripted_api(vec![
            Ok(r#"{"tool": "web_search", "args": {"query": "x"}}"#.into()),
            Ok(r#"{"final_answer": "X is great"}"#.into()),
        ]);
        let result = react.execute_loop(request(api, 5)).await.unwrap();
        assert!(result.success);
        assert_eq!(result.response(), Some("X is great"));
        assert_eq!(result.iterations.len(), 2);

        let kinds: Vec<&'static str> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|e| match e {
                LoopEvent::Observe { .. } => "observe",
                LoopEvent::Think { .. } => "think",
                LoopEvent::Act { .. } => "act",
                LoopEvent::Result { .. } => "result",
            })
            .collect();
        assert_eq!(kinds, vec!["observe", "think", "act", "result", "observe", "think"]);
        assert_eq!(react.current_state().status, LoopStatus::Completed);
    }

    #[tokio::test]
    async fn test_exhausts_after_max_iterations() {
        let react = ReactLoop::default();
        let result = react.execute_loop(request(scripted_api(vec![]), 3)).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.iterations.len(), 3);
        assert_eq!(react.current_state().status, LoopStatus::Failed);
    }

    #[tokio::test]
    async fn test_malformed_output_is_retried() {
        let react = ReactLoop::default();
        let api = scripted_api(vec![Ok("{\"tool\": broken".into()), Ok("done".into())]);
        let result = react.execute_loop(request(api, 3)).await.unwrap();
        assert!(result.success);
        assert!(result.iterations[0].is_error());
    }

    fn slow_api(delay: Duration) -> ApiCall {
        Arc::new(move |_messages| {
            async move {
                tokio::time::sleep(delay).await;
                Ok("{\"tool\": \"echo\"}".to_string())
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_abort_while_paused_then_next_run_proceeds() {
        let react = Arc::new(ReactLoop::default());
        let runner = Arc::clone(&react);
        let handle = tokio::spawn(async move {
            runner
                .execute_loop(request(slow_api(Duration::from_millis(30)), 10))
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        react.pause();
        assert!(react.current_state().is_paused);
        tokio::time::sleep(Duration::from_millis(60)).await;
        react.abort();

        let result = handle.await.unwrap().unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Cancelled by user"));
        assert_eq!(result.iterations.len(), 1);
        assert_eq!(react.current_state().status, LoopStatus::Aborted);
        assert!(!react.current_state().is_paused);

        let next = tokio::time::timeout(
            Duration::from_secs(2),
            react.execute_loop(request(scripted_api(vec![Ok("done".into())]), 3)),
        )
        .await
        .expect("next run must not stay paused")
        .unwrap();
        assert!(next.success);
    }

    #[tokio::test]
    async fn test_pause_without_active_run_is_ignored() {
        let react = ReactLoop::default();
        react.pause();
        assert!(!react.current_state().is_paused);

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            react.execute_loop(request(scripted_api(vec![Ok("done".into())]), 3)),
        )
        .await
        .expect("idle pause must not block the run")
        .unwrap();
        assert!(result.success);
        assert_eq!(result.response(), Some("done"));
    }
}
