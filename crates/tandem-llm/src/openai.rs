use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use tandem_core::errors::GatewayError;
use tandem_core::ids::ToolCallId;
use tandem_core::provider::{ChatMessage, Completion, CompletionRequest, LanguageModel, ToolCall};

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// Base URL up to and including the version segment, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub temperature: Option<f32>,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiModel {
    client: Client,
    endpoint: String,
    config: OpenAiConfig,
}

impl OpenAiModel {
    pub fn new(config: OpenAiConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;
        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.extend(request.messages.iter().map(wire_message));

        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
        });
        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters_schema,
                        }
                    })
                })
                .collect();
        }
        if let Some(t) = request.options.temperature.or(self.config.temperature) {
            body["temperature"] = json!(t);
        }
        if let Some(max) = request.options.max_tokens {
            body["max_tokens"] = json!(max);
        }
        body
    }
}

fn wire_message(message: &ChatMessage) -> Value {
    match message {
        ChatMessage::User { content } => json!({"role": "user", "content": content}),
        ChatMessage::Assistant { content, tool_calls } if tool_calls.is_empty() => {
            json!({"role": "assistant", "content": content})
        }
        ChatMessage::Assistant { content, tool_calls } => json!({
            "role": "assistant",
            "content": content,
            "tool_calls": tool_calls.iter().map(|c| json!({
                "id": c.id,
                "type": "function",
                "function": {"name": c.name, "arguments": c.arguments.to_string()},
            })).collect::<Vec<_>>(),
        }),
        ChatMessage::Tool { tool_call_id, content } => {
            json!({"role": "tool", "tool_call_id": tool_call_id, "content": content})
        }
    }
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn parse_completion(body: &str) -> Result<Completion, GatewayError> {
    let response: WireResponse =
        serde_json::from_str(body).map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;
    let message = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| GatewayError::MalformedResponse("response has no choices".into()))?
        .message;

    let tool_calls = message
        .tool_calls
        .into_iter()
        .map(|call| {
            let arguments = if call.function.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&call.function.arguments).map_err(|e| {
                    GatewayError::MalformedResponse(format!("arguments for {}: {e}", call.function.name))
                })?
            };
            Ok(ToolCall {
                id: ToolCallId::from_raw(call.id),
                name: call.function.name,
                arguments,
            })
        })
        .collect::<Result<Vec<_>, GatewayError>>()?;

    Ok(Completion {
        text: message.content.unwrap_or_default(),
        tool_calls,
    })
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip_all, fields(model = %self.config.model, tools = request.tools.len()))]
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, GatewayError> {
        let mut req = self.client.post(&self.endpoint).json(&self.request_body(request));
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key.expose_secret());
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout(self.config.request_timeout)
            } else {
                GatewayError::NetworkError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let hint = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(match GatewayError::from_status(status.as_u16(), body) {
                GatewayError::RateLimited { .. } => GatewayError::RateLimited { retry_after: hint },
                other => other,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;
        let completion = parse_completion(&body)?;
        debug!(tool_calls = completion.tool_calls.len(), "completion received");
        Ok(completion)
    }
}
