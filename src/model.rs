use anyhow::{Context, Result};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Declared capability exposed to the tool-calling variant of `complete`.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone)]
pub enum ChatMessage {
    System { content: String },
    User { content: String },
    Assistant { content: Option<String>, tool_call: Option<ToolCall> },
    Tool { call_id: String, content: String },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage::User {
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub tools: Vec<ToolSpec>,
}

/// One completion outcome: either assistant text or a selected tool call.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: Option<String>,
    pub tool_call: Option<ToolCall>,
}

/// The model-invocation boundary. Given a structured request and a sampling
/// temperature, returns structured output; everything behind it is opaque.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse>;
}

pub fn resolve_api_key() -> Result<String> {
    std::env::var("OPENROUTER_API_KEY")
        .context("OPENROUTER_API_KEY is required for the OpenRouter model boundary")
}

/// Model ids follow the `openrouter/<vendor>/<model>` convention; the wire
/// format wants them without the routing prefix.
pub fn wire_model_id(model: &str) -> &str {
    model.strip_prefix("openrouter/").unwrap_or(model)
}

pub struct OpenRouterModel {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenRouterModel {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, OPENROUTER_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }
}

fn render_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| match message {
            ChatMessage::System { content } => json!({"role": "system", "content": content}),
            ChatMessage::User { content } => json!({"role": "user", "content": content}),
            ChatMessage::Assistant { content, tool_call } => {
                let mut rendered = json!({"role": "assistant", "content": content});
                if let Some(call) = tool_call {
                    rendered["tool_calls"] = json!([{
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        },
                    }]);
                }
                rendered
            }
            ChatMessage::Tool { call_id, content } => {
                json!({"role": "tool", "tool_call_id": call_id, "content": content})
            }
        })
        .collect()
}

fn render_tools(tools: &[ToolSpec]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                },
            })
        })
        .collect()
}

#[async_trait]
impl LanguageModel for OpenRouterModel {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        let mut body = json!({
            "model": wire_model_id(&request.model),
            "messages": render_messages(&request.messages),
            "temperature": request.temperature,
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(render_tools(&request.tools));
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("completion request failed for model '{}'", request.model))?;

        let status = response.status();
        let payload = response
            .text()
            .await
            .context("failed reading completion response body")?;
        if !status.is_success() {
            return Err(anyhow::anyhow!(
                "completion for model '{}' returned {}: {}",
                request.model,
                status,
                payload.trim()
            ));
        }

        let parsed = serde_json::from_str::<Value>(&payload)
            .with_context(|| format!("completion response was not JSON: {}", payload.trim()))?;
        let message = parsed
            .pointer("/choices/0/message")
            .ok_or_else(|| anyhow::anyhow!("completion response had no choices: {payload}"))?;

        if let Some(call) = message.pointer("/tool_calls/0") {
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let name = call
                .pointer("/function/name")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow::anyhow!("tool call without a function name: {call}"))?
                .to_string();
            let arguments = call
                .pointer("/function/arguments")
                .and_then(Value::as_str)
                .map(|raw| serde_json::from_str::<Value>(raw).unwrap_or(json!({})))
                .unwrap_or(json!({}));
            return Ok(ChatResponse {
                text: None,
                tool_call: Some(ToolCall {
                    id,
                    name,
                    arguments,
                }),
            });
        }

        let text = message
            .get("content")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(ChatResponse {
            text,
            tool_call: None,
        })
    }
}

/// Locate the first JSON object or array embedded in model output, tolerating
/// fenced code blocks and surrounding prose.
pub fn extract_json_payload(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let Some(start) = trimmed.find(open)
            && let Some(end) = trimmed.rfind(close)
            && end > start
        {
            return Some(&trimmed[start..=end]);
        }
    }
    None
}

fn join_sections(sections: &[(&str, &str)]) -> String {
    sections
        .iter()
        .map(|(label, text)| format!("## {label}\n{text}"))
        .collect::<Vec<String>>()
        .join("\n\n")
}

/// Free-text generation: instruction as the system turn, labelled input
/// sections as the user turn.
pub async fn generate(
    model: &dyn LanguageModel,
    model_id: &str,
    instruction: &str,
    sections: &[(&str, &str)],
    temperature: f64,
) -> Result<String> {
    let response = model
        .complete(ChatRequest {
            model: model_id.to_string(),
            messages: vec![
                ChatMessage::system(instruction),
                ChatMessage::user(join_sections(sections)),
            ],
            temperature,
            tools: Vec::new(),
        })
        .await?;

    response
        .text
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("model '{model_id}' returned an empty completion"))
}

/// Structured extraction: demand JSON matching `T`'s schema and parse the
/// assistant text as `T`.
pub async fn predict<T>(
    model: &dyn LanguageModel,
    model_id: &str,
    instruction: &str,
    sections: &[(&str, &str)],
    temperature: f64,
) -> Result<T>
where
    T: DeserializeOwned + JsonSchema,
{
    let schema = serde_json::to_string(&schemars::schema_for!(T))
        .context("failed to render output schema")?;
    let system = format!(
        "{instruction}\n\nRespond with a single JSON document conforming to this JSON schema, \
         with no commentary outside the JSON:\n{schema}"
    );

    let text = generate(model, model_id, &system, sections, temperature).await?;
    let payload = extract_json_payload(&text)
        .ok_or_else(|| anyhow::anyhow!("model '{model_id}' returned no JSON payload: {text}"))?;
    serde_json::from_str::<T>(payload)
        .with_context(|| format!("model '{model_id}' returned JSON that does not match the schema"))
}
