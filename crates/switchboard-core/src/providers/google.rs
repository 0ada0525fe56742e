//! Google Gemini provider: `generateContent` REST API with function calling

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::types::*;
use crate::tools::ToolDefinition;

const API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// JSON schema keys the Gemini function-declaration subset rejects
const UNSUPPORTED_SCHEMA_KEYS: &[&str] = &["$schema", "additionalProperties", "default", "title"];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: &'a [ApiContent],
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<ApiContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct ApiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ApiPart>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
enum ApiPart {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: ApiFunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: ApiFunctionResponse,
    },
    /// Part kinds this client does not use (inline data, thoughts, ...)
    Other(Value),
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct ApiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct ApiFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiTool {
    function_declarations: Vec<ApiFunctionDeclaration>,
}

#[derive(Serialize)]
struct ApiFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    usage_metadata: Option<ApiUsageMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCandidate {
    #[serde(default)]
    content: Option<ApiContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

/// Google Gemini LLM provider
#[derive(Clone)]
pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String, max_tokens: u32) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            api_key,
            model,
            max_tokens,
            base_url: API_BASE_URL.to_string(),
        })
    }

    /// Point at a different API root (proxies, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn provider_name(&self) -> &str {
        "google"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        system: &str,
    ) -> Result<ChatResponse> {
        let contents = build_contents(messages);
        let request = GenerateContentRequest {
            contents: &contents,
            system_instruction: (!system.is_empty()).then(|| ApiContent {
                role: None,
                parts: vec![ApiPart::Text {
                    text: system.to_string(),
                }],
            }),
            tools: build_tools(tools),
            generation_config: GenerationConfig {
                max_output_tokens: self.max_tokens,
            },
        };

        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        debug!(
            "Gemini request model={} messages={} tools={}",
            self.model,
            messages.len(),
            tools.len()
        );

        let resp = self
            .http
            .post(&url)
            .query(&[("key", &self.api_key)])
            .json(&request)
            .send()
            .await
            .context("Failed to reach Gemini API")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!("Gemini error status={} body={}", status, body);
            return Err(anyhow!("Gemini API returned HTTP {}: {}", status, body));
        }

        let body: GenerateContentResponse = resp
            .json()
            .await
            .context("Failed to parse Gemini response")?;
        parse_response(body)
    }
}

/// Convert chat history into Gemini `contents`
fn build_contents(messages: &[ChatMessage]) -> Vec<ApiContent> {
    // functionResponse needs the function name, which only the call carries
    let mut call_names: HashMap<&str, &str> = HashMap::new();
    for msg in messages {
        if let ChatMessageContent::Blocks(blocks) = &msg.content {
            for block in blocks {
                if let ChatBlock::ToolCall { id, name, .. } = block {
                    call_names.insert(id.as_str(), name.as_str());
                }
            }
        }
    }

    messages
        .iter()
        .map(|msg| {
            let role = match msg.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "model",
            };
            let parts = match &msg.content {
                ChatMessageContent::Text(text) => vec![ApiPart::Text { text: text.clone() }],
                ChatMessageContent::Blocks(blocks) => blocks
                    .iter()
                    .map(|block| match block {
                        ChatBlock::Text { text } => ApiPart::Text { text: text.clone() },
                        ChatBlock::ToolCall { name, input, .. } => ApiPart::FunctionCall {
                            function_call: ApiFunctionCall {
                                name: name.clone(),
                                args: input.clone(),
                            },
                        },
                        ChatBlock::ToolResult {
                            tool_call_id,
                            content,
                            is_error,
                        } => {
                            let key = if *is_error { "error" } else { "result" };
                            ApiPart::FunctionResponse {
                                function_response: ApiFunctionResponse {
                                    name: call_names
                                        .get(tool_call_id.as_str())
                                        .copied()
                                        .unwrap_or("unknown")
                                        .to_string(),
                                    response: serde_json::json!({ key: content }),
                                },
                            }
                        }
                    })
                    .collect(),
            };
            ApiContent {
                role: Some(role.to_string()),
                parts,
            }
        })
        .collect()
}

fn build_tools(tools: &[ToolDefinition]) -> Vec<ApiTool> {
    if tools.is_empty() {
        return vec![];
    }
    vec![ApiTool {
        function_declarations: tools
            .iter()
            .map(|t| ApiFunctionDeclaration {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: sanitize_schema(&t.input_schema),
            })
            .collect(),
    }]
}

/// Strip schema keywords Gemini refuses, recursively
fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !UNSUPPORTED_SCHEMA_KEYS.contains(&k.as_str()))
                .map(|(k, v)| {
                    // property names live under "properties" and must be kept verbatim
                    if k == "properties" {
                        let props = v
                            .as_object()
                            .map(|p| {
                                p.iter()
                                    .map(|(name, s)| (name.clone(), sanitize_schema(s)))
                                    .collect()
                            })
                            .unwrap_or_default();
                        (k.clone(), Value::Object(props))
                    } else {
                        (k.clone(), sanitize_schema(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}

fn parse_response(body: GenerateContentResponse) -> Result<ChatResponse> {
    let candidate = body
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Gemini returned no candidates"))?;

    let mut blocks = Vec::new();
    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        match part {
            ApiPart::Text { text } if !text.is_empty() => {
                blocks.push(ChatResponseBlock::Text { text })
            }
            ApiPart::FunctionCall { function_call } => blocks.push(ChatResponseBlock::ToolCall {
                id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                name: function_call.name,
                input: if function_call.args.is_null() {
                    serde_json::json!({})
                } else {
                    function_call.args
                },
            }),
            _ => {}
        }
    }

    let has_tool_calls = blocks
        .iter()
        .any(|b| matches!(b, ChatResponseBlock::ToolCall { .. }));
    let stop_reason = match candidate.finish_reason.as_deref() {
        _ if has_tool_calls => StopReason::ToolUse,
        Some("STOP") => StopReason::EndTurn,
        Some("MAX_TOKENS") => StopReason::MaxTokens,
        _ => StopReason::Unknown,
    };
    let usage = body
        .usage_metadata
        .map(|u| ChatUsage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        blocks,
        stop_reason,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_contents_maps_tool_results_to_names() {
        let messages = vec![
            ChatMessage::user("What is 3 + 5?"),
            ChatMessage {
                role: ChatRole::Assistant,
                content: ChatMessageContent::Blocks(vec![ChatBlock::ToolCall {
                    id: "call_1".to_string(),
                    name: "add".to_string(),
                    input: serde_json::json!({"a": 3, "b": 5}),
                }]),
            },
            ChatMessage {
                role: ChatRole::User,
                content: ChatMessageContent::Blocks(vec![ChatBlock::ToolResult {
                    tool_call_id: "call_1".to_string(),
                    content: "8".to_string(),
                    is_error: false,
                }]),
            },
        ];

        let contents = build_contents(&messages);
        let json = serde_json::to_value(&contents).unwrap();
        assert_eq!(json[0]["role"], "user");
        assert_eq!(json[1]["role"], "model");
        assert_eq!(json[1]["parts"][0]["functionCall"]["name"], "add");
        assert_eq!(json[2]["parts"][0]["functionResponse"]["name"], "add");
        assert_eq!(
            json[2]["parts"][0]["functionResponse"]["response"]["result"],
            "8"
        );
    }

    #[test]
    fn test_sanitize_schema_keeps_property_names() {
        let schema = serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "title": {"type": "string", "title": "Title"},
                "amount": {"type": "number", "default": 1.0}
            }
        });
        let clean = sanitize_schema(&schema);
        assert!(clean.get("additionalProperties").is_none());
        assert!(clean["properties"]["title"].is_object());
        assert!(clean["properties"]["title"].get("title").is_none());
        assert!(clean["properties"]["amount"].get("default").is_none());
    }

    #[test]
    fn test_parse_function_call_response() {
        let body: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"functionCall": {"name": "add", "args": {"a": 3, "b": 5}}},
                        {"functionCall": {"name": "multiply", "args": {"a": 2, "b": 4}}}
                    ]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 7}
        }))
        .unwrap();

        let response = parse_response(body).unwrap();
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.usage.input_tokens, 12);
        let ids: Vec<&str> = response
            .blocks
            .iter()
            .filter_map(|b| match b {
                ChatResponseBlock::ToolCall { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn test_parse_text_response() {
        let body: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "3 + 5 = 8"}]},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();
        let response = parse_response(body).unwrap();
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(response.text(), "3 + 5 = 8");
    }

    #[test]
    fn test_parse_no_candidates() {
        let body: GenerateContentResponse =
            serde_json::from_value(serde_json::json!({"candidates": []})).unwrap();
        assert!(parse_response(body).is_err());
    }

    #[tokio::test]
    async fn test_chat_connection_refused() {
        let provider = GeminiProvider::new("key".to_string(), "gemini-2.0-flash".to_string(), 64)
            .unwrap()
            .with_base_url("http://127.0.0.1:1");
        let result = provider
            .chat(&[ChatMessage::user("hi")], &[], "be brief")
            .await;
        assert!(result.is_err());
        assert_eq!(provider.provider_name(), "google");
    }
}
