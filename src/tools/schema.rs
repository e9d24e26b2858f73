//! 工具 schema：按模型后端方言转换 ToolSpec，以及用 schemars 从参数结构体生成 JSON Schema

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tools::ToolSpec;

/// 模型后端期望的工具声明格式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSchemaFormat {
    /// `{"type": "function", "function": {name, description, parameters}}`
    #[default]
    OpenAi,
    /// `{name, description, input_schema}`
    Anthropic,
    /// 单个 `{"functionDeclarations": [...]}` 包装
    Gemini,
}

pub fn to_backend_schema(specs: &[ToolSpec], format: ToolSchemaFormat) -> Vec<Value> {
    match format {
        ToolSchemaFormat::OpenAi => specs
            .iter()
            .map(|s| {
                json!({
                    "type": "function",
                    "function": {
                        "name": s.name,
                        "description": s.description,
                        "parameters": s.parameters,
                    }
                })
            })
            .collect(),
        ToolSchemaFormat::Anthropic => specs
            .iter()
            .map(|s| {
                json!({
                    "name": s.name,
                    "description": s.description,
                    "input_schema": s.parameters,
                })
            })
            .collect(),
        ToolSchemaFormat::Gemini => {
            if specs.is_empty() {
                return Vec::new();
            }
            let declarations: Vec<Value> = specs
                .iter()
                .map(|s| {
                    json!({
                        "name": s.name,
                        "description": s.description,
                        "parameters": s.parameters,
                    })
                })
                .collect();
            vec![json!({ "functionDeclarations": declarations })]
        }
    }
}

/// 参数结构体的 JSON Schema（去掉 $schema / title，便于直接作为工具参数声明）
pub fn params_schema<T: JsonSchema>() -> Value {
    let mut schema = serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| json!({"type": "object"}));
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    schema
}

/// ReAct 文本协议中一步动作的格式（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ReactActionFormat {
    /// 要调用的工具名；给出最终答案时省略
    tool: Option<String>,
    /// 工具参数
    args: Option<Value>,
    /// 最终答案；与 tool 二选一
    final_answer: Option<String>,
}

/// ReAct 动作格式的 JSON Schema 字符串，拼入 system prompt
pub fn react_action_schema_json() -> String {
    serde_json::to_string_pretty(&params_schema::<ReactActionFormat>()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ToolSpec {
        ToolSpec {
            name: "web_search".into(),
            description: "search".into(),
            parameters: json!({"type": "object", "properties": {"query": {"type": "string"}}}),
        }
    }

    #[test]
    fn test_openai_shape() {
        let out = to_backend_schema(&[spec()], ToolSchemaFormat::OpenAi);
        assert_eq!(out[0]["type"], "function");
        assert_eq!(out[0]["function"]["name"], "web_search");
        assert_eq!(out[0]["function"]["parameters"]["properties"]["query"]["type"], "string");
    }

    #[test]
    fn test_anthropic_and_gemini_shapes() {
        let anthropic = to_backend_schema(&[spec()], ToolSchemaFormat::Anthropic);
        assert!(anthropic[0].get("input_schema").is_some());

        let gemini = to_backend_schema(&[spec(), spec()], ToolSchemaFormat::Gemini);
        assert_eq!(gemini.len(), 1);
        assert_eq!(gemini[0]["functionDeclarations"].as_array().unwrap().len(), 2);
        assert!(to_backend_schema(&[], ToolSchemaFormat::Gemini).is_empty());
    }

    #[test]
    fn test_params_schema_from_struct() {
        #[allow(dead_code)]
        #[derive(JsonSchema)]
        struct Args {
            query: String,
            limit: Option<u32>,
        }
        let schema = params_schema::<Args>();
        assert_eq!(schema["type"], "object");
        assert!(schema.get("$schema").is_none());
        assert_eq!(schema["required"], json!(["query"]));
        assert!(react_action_schema_json().contains("final_answer"));
    }
}
