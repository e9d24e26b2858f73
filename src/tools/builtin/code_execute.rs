//! code_execute：用白名单内的解释器执行代码片段
//!
//! 语言映射到解释器（python → python3 -c，javascript → node -e，shell → sh -c），解释器必须在配置白名单中；
//! 含危险子串的代码直接拒绝。进程带超时，超时后被杀掉。

use std::collections::HashSet;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::config::CodeExecuteSection;
use crate::tools::{params_schema, Tool};

/// 禁止出现在代码中的子串
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "curl | sh",
    "wget ",
    "chmod 777",
    "chmod +s",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    ":(){ :|:& };:",
];

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CodeExecuteArgs {
    /// python / javascript / shell
    pub language: String,
    pub code: String,
}

pub struct CodeExecuteTool {
    interpreters: HashSet<String>,
    timeout: Duration,
    max_output_chars: usize,
}

/// 语言 → (解释器, 内联代码参数)
fn interpreter_for(language: &str) -> Option<(&'static str, &'static str)> {
    match language.trim().to_lowercase().as_str() {
        "python" | "python3" | "py" => Some(("python3", "-c")),
        "javascript" | "js" | "node" => Some(("node", "-e")),
        "shell" | "sh" | "bash" => Some(("sh", "-c")),
        _ => None,
    }
}

fn clip(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        text.chars().take(max).collect::<String>() + "\n...[truncated]"
    } else {
        text.to_string()
    }
}

impl CodeExecuteTool {
    pub fn new(config: &CodeExecuteSection) -> Self {
        Self {
            interpreters: config.interpreters.iter().map(|s| s.to_lowercase()).collect(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_output_chars: config.max_output_chars,
        }
    }

    fn check(&self, language: &str, code: &str) -> anyhow::Result<(&'static str, &'static str)> {
        let lower = code.to_lowercase();
        if let Some(pattern) = FORBIDDEN_SUBSTR.iter().find(|p| lower.contains(*p)) {
            bail!("Forbidden pattern: {}", pattern);
        }
        let (program, flag) =
            interpreter_for(language).ok_or_else(|| anyhow!("Unsupported language: {}", language))?;
        if !self.interpreters.contains(program) {
            bail!("Interpreter '{}' not in allowlist", program);
        }
        Ok((program, flag))
    }
}

#[async_trait]
impl Tool for CodeExecuteTool {
    fn name(&self) -> &str {
        "code_execute"
    }

    fn description(&self) -> &str {
        "Execute a short code snippet and return stdout/stderr. Args: {\"language\": \"python|javascript|shell\", \"code\": \"...\"}."
    }

    fn parameters_schema(&self) -> Value {
        params_schema::<CodeExecuteArgs>()
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let args: CodeExecuteArgs = serde_json::from_value(args).context("Invalid code_execute args")?;
        if args.code.trim().is_empty() {
            bail!("Empty code");
        }
        let (program, flag) = self.check(&args.language, &args.code)?;
        tracing::info!(interpreter = program, "code_execute run");

        let child = Command::new(program)
            .arg(flag)
            .arg(&args.code)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", program))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow!("Execution timed out after {}s", self.timeout.as_secs()))?
            .context("Execution failed")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            bail!(
                "Exit {}\nstderr: {}",
                output.status.code().map_or("signal".to_string(), |c| c.to_string()),
                clip(stderr.trim(), self.max_output_chars)
            );
        }
        Ok(json!({
            "language": args.language,
            "stdout": clip(&stdout, self.max_output_chars),
            "stderr": clip(&stderr, self.max_output_chars),
            "exitCode": output.status.code(),
        }))
    }
}
