//! web_search：请求配置的搜索端点，HTML 响应转为可读文本并截断
//!
//! 查询作为 URL 参数发送（参数名可配置）；响应超过 max_result_chars 时截断并追加 ...[truncated]。

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use html2text::from_read;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::SearchSection;
use crate::tools::{params_schema, Tool};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WebSearchArgs {
    /// 搜索关键词
    pub query: String,
    /// 返回文本的最大字符数（不超过配置上限）
    #[serde(default)]
    pub max_chars: Option<usize>,
}

pub struct WebSearchTool {
    client: Client,
    endpoint: String,
    query_param: String,
    max_result_chars: usize,
}

/// html2text 失败时的回退：去标签并压缩空白
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    let head: String = s.chars().take(15).collect::<String>().to_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html")
        || (s.contains('<') && (s.contains("</") || s.contains("<head") || s.contains("<title")))
}

fn html_to_text(html: &str) -> String {
    match from_read(html.as_bytes(), 120) {
        Ok(text) if !text.trim().is_empty() => text,
        _ => strip_html_tags(html),
    }
}

/// 按字符截断；返回 (文本, 是否截断)
fn truncate_chars(text: &str, max: usize) -> (String, bool) {
    if text.chars().count() > max {
        (text.chars().take(max).collect::<String>() + "\n...[truncated]", true)
    } else {
        (text.to_string(), false)
    }
}

impl WebSearchTool {
    pub fn new(config: &SearchSection) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("ja,zh-CN;q=0.9,en;q=0.8"));
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: config.endpoint.clone(),
            query_param: config.query_param.clone(),
            max_result_chars: config.max_result_chars,
        }
    }

    async fn fetch(&self, query: &str) -> anyhow::Result<String> {
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[(self.query_param.as_str(), query)])
            .send()
            .await
            .context("Search request failed")?;
        if !resp.status().is_success() {
            bail!("Search endpoint returned HTTP {}", resp.status());
        }
        let body = resp.text().await.context("Read search response body")?;
        let body = body.trim_start_matches('\u{FEFF}');
        Ok(if looks_like_html(body) {
            html_to_text(body)
        } else {
            body.to_string()
        })
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return the result page as plain text. Args: {\"query\": \"...\"}."
    }

    fn parameters_schema(&self) -> Value {
        params_schema::<WebSearchArgs>()
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let args: WebSearchArgs = serde_json::from_value(args).context("Invalid web_search args")?;
        let query = args.query.trim();
        if query.is_empty() {
            bail!("Missing query");
        }
        tracing::info!(query = %query, "web_search fetch");
        let text = self.fetch(query).await?;
        let limit = args.max_chars.map_or(self.max_result_chars, |m| m.min(self.max_result_chars));
        let (content, truncated) = truncate_chars(&text, limit);
        Ok(json!({
            "query": query,
            "content": content,
            "truncated": truncated,
        }))
    }
}
