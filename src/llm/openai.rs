//! OpenAI-compatible chat-completions client with function calling.
//!
//! Works against any endpoint speaking the `/chat/completions` dialect
//! (OpenAI, DeepSeek, local gateways).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::{DeskError, Result};

use super::traits::{ChatMessage, LlmGateway, LlmResponse, ModelTier, Role, ToolCall, ToolSpec};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: Role,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded argument object
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

fn function_type() -> String {
    "function".to_string()
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        let tool_calls = (!msg.tool_calls.is_empty()).then(|| {
            msg.tool_calls
                .iter()
                .map(|c| WireToolCall {
                    id: c.id.clone(),
                    kind: function_type(),
                    function: WireFunctionCall {
                        name: c.name.clone(),
                        arguments: c.arguments.to_string(),
                    },
                })
                .collect()
        });
        Self {
            role: msg.role,
            content: Some(msg.content.clone()),
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
        }
    }
}

/// Convert a wire reply. Tool calls whose arguments do not parse are dropped,
/// so a reply with only malformed calls reads as final content.
fn into_response(message: WireMessage) -> LlmResponse {
    let mut tool_calls = Vec::new();
    for call in message.tool_calls.unwrap_or_default() {
        let raw = call.function.arguments.trim();
        let arguments = if raw.is_empty() {
            Ok(Value::Object(Default::default()))
        } else {
            serde_json::from_str::<Value>(raw)
        };
        match arguments {
            Ok(arguments) => tool_calls.push(ToolCall {
                id: call.id,
                name: call.function.name,
                arguments,
            }),
            Err(e) => warn!(
                tool = %call.function.name,
                "Dropping tool call with unparseable arguments: {}", e
            ),
        }
    }
    LlmResponse {
        content: message.content.unwrap_or_default(),
        tool_calls,
    }
}

pub struct OpenAiCompatibleClient {
    config: LlmConfig,
    http: Client,
}

impl OpenAiCompatibleClient {
    pub fn new(mut config: LlmConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            config.api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DeskError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, http })
    }

    pub fn is_configured(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    fn model(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Quick => &self.config.quick_model,
            ModelTier::Deep => &self.config.deep_model,
        }
    }
}

#[async_trait]
impl LlmGateway for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn complete(
        &self,
        tier: ModelTier,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<LlmResponse> {
        if !self.is_configured() {
            return Err(DeskError::Auth("LLM API key not configured".to_string()));
        }

        let model = self.model(tier);
        let request = ChatRequest {
            model,
            messages: messages.iter().map(WireMessage::from).collect(),
            tools: tools
                .iter()
                .map(|t| WireTool {
                    kind: "function",
                    function: WireFunction {
                        name: &t.name,
                        description: &t.description,
                        parameters: &t.parameters,
                    },
                })
                .collect(),
            temperature: self.config.temperature,
        };

        debug!(model, messages = messages.len(), tools = tools.len(), "Sending chat completion");

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("LLM API error: {} - {}", status, body);
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => DeskError::RateLimited(format!("LLM: {}", body)),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    DeskError::Auth(format!("invalid api key: {}", body))
                }
                _ => DeskError::Llm(format!("HTTP {} - {}", status.as_u16(), body)),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| DeskError::Llm(format!("Failed to parse completion: {}", e)))?;

        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| DeskError::Llm("completion has no choices".to_string()))?;

        let reply = into_response(message);
        debug!(
            chars = reply.content.len(),
            tool_calls = reply.tool_calls.len(),
            "Chat completion received"
        );
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_call_arguments_are_decoded() {
        let wire: WireMessage = serde_json::from_value(json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": {"name": "get_crypto_data", "arguments": "{\"limit\": 50}"}
            }]
        }))
        .unwrap();
        let reply = into_response(wire);
        assert!(reply.has_tool_calls());
        assert_eq!(reply.tool_calls[0].arguments["limit"], 50);
        assert_eq!(reply.content, "");
    }

    #[test]
    fn malformed_tool_calls_read_as_final_content() {
        let wire: WireMessage = serde_json::from_value(json!({
            "role": "assistant",
            "content": "report text",
            "tool_calls": [{
                "id": "call_1",
                "function": {"name": "get_order_book", "arguments": "{not json"}
            }]
        }))
        .unwrap();
        let reply = into_response(wire);
        assert!(!reply.has_tool_calls());
        assert_eq!(reply.content, "report text");
    }

    #[test]
    fn assistant_turn_round_trips_tool_calls() {
        let msg = ChatMessage::assistant(
            "",
            vec![ToolCall {
                id: "c".into(),
                name: "get_market_info".into(),
                arguments: json!({}),
            }],
        );
        let wire = WireMessage::from(&msg);
        let encoded = serde_json::to_value(&wire).unwrap();
        assert_eq!(encoded["tool_calls"][0]["function"]["arguments"], "{}");
        assert_eq!(encoded["role"], "assistant");
    }

    #[tokio::test]
    async fn missing_key_is_auth_error() {
        let client = OpenAiCompatibleClient {
            config: LlmConfig::default(),
            http: Client::new(),
        };
        let err = client
            .complete(ModelTier::Quick, &[ChatMessage::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DeskError::Auth(_)));
    }
}
