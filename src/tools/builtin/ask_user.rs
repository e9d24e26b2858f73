//! ask_user：把问题交给注入的 UserPrompter 并等待回答
//!
//! 没有 prompter 时返回错误（由分发层统一转为 {success: false, error}）。

use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use crate::tools::{params_schema, Tool};

/// 向用户提问的能力（由宿主界面实现）
#[async_trait]
pub trait UserPrompter: Send + Sync {
    async fn ask(&self, question: &str, options: &[String]) -> anyhow::Result<String>;
}

/// 通过通道转发的问题；宿主通过 reply 回答
#[derive(Debug)]
pub struct UserQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub reply: oneshot::Sender<String>,
}

/// 基于 mpsc + oneshot 的 prompter：问题发给接收端，回答经 oneshot 返回
#[derive(Clone)]
pub struct ChannelPrompter {
    tx: mpsc::Sender<UserQuestion>,
}

impl ChannelPrompter {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<UserQuestion>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl UserPrompter for ChannelPrompter {
    async fn ask(&self, question: &str, options: &[String]) -> anyhow::Result<String> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(UserQuestion {
                question: question.to_string(),
                options: options.to_vec(),
                reply,
            })
            .await
            .map_err(|_| anyhow!("User prompt channel closed"))?;
        answer.await.context("User did not answer")
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AskUserArgs {
    /// 要问用户的问题
    pub question: String,
    /// 可选的候选答案
    #[serde(default)]
    pub options: Vec<String>,
}

pub struct AskUserTool {
    prompter: Option<Arc<dyn UserPrompter>>,
}

impl AskUserTool {
    pub fn new(prompter: Option<Arc<dyn UserPrompter>>) -> Self {
        Self { prompter }
    }
}

#[async_trait]
impl Tool for AskUserTool {
    fn name(&self) -> &str {
        "ask_user"
    }

    fn description(&self) -> &str {
        "Ask the user a clarifying question and wait for the answer. Args: {\"question\": \"...\", \"options\": [..]}."
    }

    fn parameters_schema(&self) -> Value {
        params_schema::<AskUserArgs>()
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let args: AskUserArgs = serde_json::from_value(args).context("Invalid ask_user args")?;
        let Some(prompter) = &self.prompter else {
            bail!("No user prompter available");
        };
        let answer = prompter.ask(&args.question, &args.options).await?;
        Ok(json!({ "question": args.question, "answer": answer }))
    }
}
