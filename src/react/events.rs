//! 推理循环过程事件与订阅
//!
//! 单一事件枚举 LoopEvent + 单一订阅列表 EventBus；编排器在运行期间把调用方的 RunObserver
//! 挂到 EventBus 上，运行结束时摘除。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value;

use crate::core::{AgentError, AgentResult};

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// 本轮开始时的观察（任务或上一轮结果）
    Observe { iteration: usize, observation: String },
    /// 模型的思考/规划内容
    Think { iteration: usize, thought: String },
    /// 调用工具
    Act { iteration: usize, tool: String, args: Value },
    /// 工具返回（统一结果形状）
    Result { iteration: usize, tool: String, outcome: Value },
}

impl LoopEvent {
    pub fn iteration(&self) -> usize {
        match self {
            LoopEvent::Observe { iteration, .. }
            | LoopEvent::Think { iteration, .. }
            | LoopEvent::Act { iteration, .. }
            | LoopEvent::Result { iteration, .. } => *iteration,
        }
    }

    /// 转交给观察者对应的回调
    pub fn deliver(&self, observer: &dyn RunObserver) {
        match self {
            LoopEvent::Observe { iteration, observation } => observer.on_observe(*iteration, observation),
            LoopEvent::Think { iteration, thought } => observer.on_think(*iteration, thought),
            LoopEvent::Act { iteration, tool, args } => observer.on_act(*iteration, tool, args),
            LoopEvent::Result { iteration, tool, outcome } => observer.on_result(*iteration, tool, outcome),
        }
    }
}

/// 运行生命周期回调；全部有空实现，按需覆盖
pub trait RunObserver: Send + Sync {
    fn on_observe(&self, _iteration: usize, _observation: &str) {}

    fn on_think(&self, _iteration: usize, _thought: &str) {}

    fn on_act(&self, _iteration: usize, _tool: &str, _args: &Value) {}

    fn on_result(&self, _iteration: usize, _tool: &str, _outcome: &Value) {}

    fn on_complete(&self, _result: &AgentResult) {}

    fn on_error(&self, _error: &AgentError) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&LoopEvent) + Send + Sync>;

/// 事件订阅列表
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(SubscriptionId, Handler)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: impl Fn(&LoopEvent) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        id
    }

    /// 把观察者的四个过程回调挂到事件上
    pub fn subscribe_observer(&self, observer: Arc<dyn RunObserver>) -> SubscriptionId {
        self.subscribe(move |event| event.deliver(observer.as_ref()))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }

    /// 在锁外调用处理函数，处理函数内可安全地订阅/退订
    pub fn emit(&self, event: &LoopEvent) {
        let handlers: Vec<Handler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
