//! 运行监管：单运行互斥、取消令牌与生命周期阶段
//!
//! try_begin 在任何 await 之前同步完成「检查并置位」，返回 RunGuard；
//! RunGuard 释放时（正常返回、出错或 future 被丢弃）清除运行标记、释放令牌并执行注销回调。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, AgentMode, RunPhase};

#[derive(Debug)]
struct Lifecycle {
    token: Option<CancellationToken>,
    phase: RunPhase,
    last_outcome: Option<RunPhase>,
}

/// 单运行监管者：进程内由组合根持有一份
#[derive(Debug)]
pub struct RunSupervisor {
    running: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
}

impl RunSupervisor {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            lifecycle: Mutex::new(Lifecycle {
                token: None,
                phase: RunPhase::Idle,
                last_outcome: None,
            }),
        }
    }

    /// 开始一次运行；已有运行时立即返回 AlreadyRunning
    pub fn try_begin(self: &Arc<Self>, mode: AgentMode) -> Result<RunGuard, AgentError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AgentError::AlreadyRunning);
        }
        let token = CancellationToken::new();
        {
            let mut lc = self.lock();
            lc.token = Some(token.clone());
            lc.phase = RunPhase::Running { mode };
        }
        Ok(RunGuard {
            supervisor: Arc::clone(self),
            token,
            cleanups: Vec::new(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 触发当前运行的取消令牌；无运行时返回 false
    pub fn cancel(&self) -> bool {
        match self.lock().token.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.lock().phase
    }

    pub fn last_outcome(&self) -> Option<RunPhase> {
        self.lock().last_outcome
    }

    fn set_phase(&self, phase: RunPhase) {
        self.lock().phase = phase;
    }

    fn release(&self) {
        {
            let mut lc = self.lock();
            lc.token = None;
            if lc.phase.is_terminal() {
                lc.last_outcome = Some(lc.phase);
            } else if matches!(lc.phase, RunPhase::Running { .. }) {
                // future 在运行中被丢弃
                lc.last_outcome = Some(RunPhase::Aborted);
            }
            lc.phase = RunPhase::Idle;
        }
        self.running.store(false, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RunSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// 一次运行的守卫：Drop 即 finally
pub struct RunGuard {
    supervisor: Arc<RunSupervisor>,
    token: CancellationToken,
    cleanups: Vec<Box<dyn FnOnce() + Send>>,
}

impl RunGuard {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 注册释放时执行的回调（如注销事件订阅）
    pub fn on_release(&mut self, cleanup: impl FnOnce() + Send + 'static) {
        self.cleanups.push(Box::new(cleanup));
    }

    /// 记录终态（Completed / Failed / Aborted）
    pub fn finish(&self, outcome: RunPhase) {
        self.supervisor.set_phase(outcome);
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        for cleanup in self.cleanups.drain(..) {
            cleanup();
        }
        self.supervisor.release();
    }
}
