//! 编排器端到端集成测试：两种模式、并发拒绝、中止、事件订阅、记忆沉淀

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use hive::core::{
    AgentError, AgentMode, Orchestrator, OrchestratorSettings, RunOptions, RunPhase,
};
use hive::llm::{ScriptedModel, ScriptedReply};
use hive::memory::{HistoryQuery, MemoryCapacities, MemoryStore, MemoryType};
use hive::react::{ReactLoop, RunObserver};
use hive::tools::{FnTool, Tool, ToolSet};
use serde_json::{json, Value};

fn build(model: ScriptedModel, reasoning: Arc<ReactLoop>) -> (Arc<Orchestrator>, Arc<MemoryStore>) {
    let memory = Arc::new(MemoryStore::new(MemoryCapacities::default()));
    let orch = Orchestrator::new(
        Arc::new(model),
        reasoning,
        Arc::clone(&memory),
        ToolSet::default(),
        OrchestratorSettings::default(),
    );
    (Arc::new(orch), memory)
}

fn search_tool(calls: Arc<AtomicUsize>) -> ToolSet {
    let tool: Arc<dyn Tool> = Arc::new(FnTool::new("web_search", "stub search", move |args: Value| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move { Ok(json!({ "query": args["query"], "content": "stub page" })) }.boxed()
    }));
    ToolSet::new(vec![tool])
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl RunObserver for Recorder {
    fn on_observe(&self, iteration: usize, _observation: &str) {
        self.events.lock().unwrap().push(format!("observe:{}", iteration));
    }

    fn on_think(&self, iteration: usize, _thought: &str) {
        self.events.lock().unwrap().push(format!("think:{}", iteration));
    }

    fn on_act(&self, iteration: usize, tool: &str, _args: &Value) {
        self.events.lock().unwrap().push(format!("act:{}:{}", iteration, tool));
    }

    fn on_result(&self, iteration: usize, tool: &str, outcome: &Value) {
        self.events
            .lock()
            .unwrap()
            .push(format!("result:{}:{}:{}", iteration, tool, outcome["success"]));
    }

    fn on_complete(&self, result: &hive::AgentResult) {
        self.events.lock().unwrap().push(format!("complete:{}", result.success));
    }
}

#[tokio::test]
async fn function_calling_hits_iteration_ceiling() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (orch, memory) = build(
        ScriptedModel::repeating(ScriptedReply::tool("web_search", json!({"query": "X"}))),
        Arc::new(ReactLoop::default()),
    );

    let result = orch
        .run_agent(
            "research X",
            RunOptions::new()
                .mode(AgentMode::FunctionCalling)
                .max_iterations(3)
                .tools(search_tool(calls.clone())),
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.iterations.len(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(result.summary.contains('3'));

    let history = memory.get_task_history(&HistoryQuery::default());
    assert_eq!(history.len(), 1);
    assert!(!history[0].success);
    assert_eq!(history[0].iterations, 3);
    assert_eq!(memory.get_short_term_context(50, Some(MemoryType::Action)).len(), 3);
}

#[tokio::test]
async fn function_calling_plain_reply_completes() {
    let (orch, _) = build(
        ScriptedModel::new(vec![ScriptedReply::text("final text")]),
        Arc::new(ReactLoop::default()),
    );
    let result = orch.run_agent("research X", RunOptions::new()).await.unwrap();
    assert!(result.success);
    assert_eq!(result.iterations.len(), 1);
    assert_eq!(result.response(), Some("final text"));
    assert_eq!(orch.get_state().last_outcome, Some(RunPhase::Completed));
}

#[tokio::test]
async fn second_run_is_rejected_while_first_is_active() {
    let (orch, _) = build(
        ScriptedModel::new(vec![ScriptedReply::text("slow answer")])
            .with_delay(Duration::from_millis(100)),
        Arc::new(ReactLoop::default()),
    );

    let (first, second) = tokio::join!(
        orch.run_agent("first", RunOptions::new()),
        orch.run_agent("second", RunOptions::new()),
    );
    assert!(first.unwrap().success);
    assert_eq!(second.unwrap_err(), AgentError::AlreadyRunning);

    // 运行结束后槽位已释放
    assert!(!orch.is_running());
}

#[tokio::test]
async fn unknown_tool_is_reported_to_model_and_run_continues() {
    let (orch, _) = build(
        ScriptedModel::new(vec![
            ScriptedReply::tool("does_not_exist", json!({})),
            ScriptedReply::text("gave up on tool"),
        ]),
        Arc::new(ReactLoop::default()),
    );
    let result = orch.run_agent("x", RunOptions::new()).await.unwrap();
    assert!(result.success);
    assert_eq!(result.iterations[0].result["success"], false);
    assert_eq!(result.iterations[0].result["error"], "Unknown tool: does_not_exist");
}

#[tokio::test]
async fn react_mode_delivers_events_and_unsubscribes() {
    let reasoning = Arc::new(ReactLoop::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let (orch, _) = build(
        ScriptedModel::new(vec![
            ScriptedReply::text(r#"{"tool": "web_search", "args": {"query": "rust"}}"#),
            ScriptedReply::text(r#"{"final_answer": "rust is a language"}"#),
        ]),
        Arc::clone(&reasoning),
    );
    let recorder = Arc::new(Recorder::default());

    let result = orch
        .run_agent(
            "research rust",
            RunOptions::new()
                .mode(AgentMode::React)
                .tools(search_tool(calls.clone()))
                .observer(recorder.clone()),
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.response(), Some("rust is a language"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        *recorder.events.lock().unwrap(),
        vec![
            "observe:1",
            "think:1",
            "act:1:web_search",
            "result:1:web_search:true",
            "observe:2",
            "think:2",
            "complete:true",
        ]
    );
    use hive::react::ReasoningLoop;
    assert_eq!(reasoning.events().subscriber_count(), 0);
}

#[tokio::test]
async fn react_model_error_is_recorded_and_loop_continues() {
    let (orch, _) = build(
        ScriptedModel::new(vec![
            ScriptedReply::Fail("upstream 500".into()),
            ScriptedReply::text(r#"{"final_answer": "ok"}"#),
        ]),
        Arc::new(ReactLoop::default()),
    );
    let result = orch
        .run_agent("x", RunOptions::new().mode(AgentMode::React))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.iterations.len(), 2);
    assert!(result.iterations[0].is_error());
}

#[tokio::test]
async fn stop_agent_aborts_in_flight_model_call() {
    let (orch, memory) = build(
        ScriptedModel::repeating(ScriptedReply::text("never seen"))
            .with_delay(Duration::from_secs(5)),
        Arc::new(ReactLoop::default()),
    );

    let runner = Arc::clone(&orch);
    let handle = tokio::spawn(async move {
        runner
            .run_agent("long task", RunOptions::new().mode(AgentMode::React))
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(orch.is_running());
    assert!(orch.stop_agent());

    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Cancelled by user"));
    assert_eq!(orch.get_state().last_outcome, Some(RunPhase::Aborted));
    assert!(!memory.get_task_history(&HistoryQuery::default())[0].success);
}

#[tokio::test]
async fn state_snapshot_reflects_working_memory() {
    let (orch, _) = build(
        ScriptedModel::new(vec![ScriptedReply::text("answer")]).with_delay(Duration::from_millis(100)),
        Arc::new(ReactLoop::default()),
    );
    let runner = Arc::clone(&orch);
    let handle = tokio::spawn(async move {
        runner
            .run_agent("inspect me", RunOptions::new().mode(AgentMode::React))
            .await
    });
    tokio::time::sleep(Duration::from_millis(30)).await;

    let state = orch.get_state();
    assert!(state.is_running);
    assert_eq!(state.phase, RunPhase::Running { mode: AgentMode::React });
    assert_eq!(state.goal.as_deref(), Some("inspect me"));
    assert!(state.task_id.as_deref().unwrap_or_default().starts_with("task_"));
    assert!(state.loop_state.is_some());

    handle.await.unwrap().unwrap();
    let state = orch.get_state();
    assert!(!state.is_running);
    assert!(state.loop_state.is_none());
}

#[tokio::test]
async fn similar_past_tasks_reach_the_system_prompt() {
    let model = Arc::new(ScriptedModel::repeating(ScriptedReply::text("done")));
    let memory = Arc::new(MemoryStore::new(MemoryCapacities::default()));
    let orch = Orchestrator::new(
        model.clone(),
        Arc::new(ReactLoop::default()),
        Arc::clone(&memory),
        ToolSet::default(),
        OrchestratorSettings::default(),
    );

    orch.run_agent("compare rust web frameworks", RunOptions::new()).await.unwrap();
    orch.run_agent("compare rust web frameworks again", RunOptions::new()).await.unwrap();

    let transcripts = model.transcripts();
    let system = &transcripts[1][0].content;
    assert!(system.contains("Similar past tasks"));
    assert!(system.contains("compare rust web frameworks"));
}

#[tokio::test]
async fn pause_then_stop_does_not_block_next_react_run() {
    let (orch, _) = build(
        ScriptedModel::repeating(ScriptedReply::text("answer")).with_delay(Duration::from_millis(100)),
        Arc::new(ReactLoop::default()),
    );

    let runner = Arc::clone(&orch);
    let handle = tokio::spawn(async move {
        runner
            .run_agent("first", RunOptions::new().mode(AgentMode::React))
            .await
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    orch.pause_agent();
    assert!(orch.stop_agent());
    let first = handle.await.unwrap().unwrap();
    assert_eq!(first.error.as_deref(), Some("Cancelled by user"));

    let next = tokio::time::timeout(
        Duration::from_secs(2),
        orch.run_agent("second", RunOptions::new().mode(AgentMode::React)),
    )
    .await
    .expect("next run must not inherit the pause")
    .unwrap();
    assert!(next.success);
    assert_eq!(orch.get_state().last_outcome, Some(RunPhase::Completed));
}

#[tokio::test]
async fn pause_while_idle_is_ignored() {
    let (orch, _) = build(
        ScriptedModel::repeating(ScriptedReply::text("answer")),
        Arc::new(ReactLoop::default()),
    );
    orch.pause_agent();

    let result = tokio::time::timeout(
        Duration::from_secs(2),
        orch.run_agent("task", RunOptions::new().mode(AgentMode::React)),
    )
    .await
    .expect("idle pause must not block the run")
    .unwrap();
    assert!(result.success);
    assert!(!orch.is_running());
}
