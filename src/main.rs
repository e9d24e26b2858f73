//! Hive 命令行入口：对一条目标跑一次 Agent，并以 JSON 输出结果
//!
//! 用法：`hive [--react] <goal...>`；未接入真实模型时使用回显模型。

use std::sync::Arc;

use anyhow::Context;
use hive::core::{should_use_agent, AgentMode, RunOptions};
use hive::llm::EchoModel;
use hive::{load_config_or_default, observability, AgentBuilder};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let react = args.first().map(|a| a == "--react").unwrap_or(false);
    if react {
        args.remove(0);
    }
    let goal = args.join(" ");
    if goal.trim().is_empty() {
        anyhow::bail!("Usage: hive [--react] <goal>");
    }

    let config = load_config_or_default(None);
    if !should_use_agent(&goal, config.agent.enabled) {
        tracing::info!("Message does not look like a multi-step task, running anyway");
    }
    let export_dir = config.memory.export_dir.clone();

    let orchestrator = AgentBuilder::new(config)
        .model(Arc::new(EchoModel))
        .build()
        .await;

    let mut options = RunOptions::new();
    if react {
        options = options.mode(AgentMode::React);
    }
    let result = orchestrator
        .run_agent(&goal, options)
        .await
        .context("Agent run failed")?;

    orchestrator.memory().flush().await;
    if let Err(e) = orchestrator.memory().download_memory(&export_dir).await {
        tracing::warn!(error = %e, "Memory export skipped");
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("Failed to serialize result")?
    );
    Ok(())
}
