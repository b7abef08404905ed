//! # Anthropic Adapter
//!
//! Anthropic's Messages API diverges from the OpenAI wire format in three
//! ways this adapter bridges (spec §4.5):
//!
//! - System messages are a top-level `system` field, not a message with
//!   `role: "system"`.
//! - `reasoning_effort` becomes a `thinking: { type: "enabled",
//!   budget_tokens }` block; the budget comes from
//!   [`ReasoningEffort::anthropic_budget_tokens`].
//! - Streaming is a sequence of named events (`content_block_delta`,
//!   `message_delta`, …), not OpenAI's flat `chat.completion.chunk` shape.
//!
//! `stop_reason` values are translated back to the OpenAI `finish_reason`
//! vocabulary so the dispatcher's response shaping stays protocol-agnostic.

use super::{Adapter, Capability, ChatStream, ProviderConfig};
use crate::error::ProviderError;
use crate::http::HttpProviderClient;
use crate::models::*;
use crate::sse::SseParser;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicAdapter {
    config: ProviderConfig,
    http: HttpProviderClient,
}

impl AnthropicAdapter {
    pub fn new(config: ProviderConfig) -> Self {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "x-api-key",
            config.api_key.parse().expect("valid anthropic api key header"),
        );
        headers.insert("anthropic-version", ANTHROPIC_VERSION.parse().unwrap());
        headers.insert("content-type", "application/json".parse().unwrap());
        if config.capabilities.contains(&Capability::Chat) {
            // cache_control on the system block needs the beta header; harmless to
            // always send since Anthropic ignores unknown beta flags.
            headers.insert("anthropic-beta", "prompt-caching-2024-07-31".parse().unwrap());
        }
        let http = HttpProviderClient::with_headers(config.timeout, &config.base_url, headers)
            .expect("valid adapter http client configuration");
        Self { config, http }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<Vec<AnthropicSystemBlock>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<AnthropicThinking>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
}

#[derive(Debug, Serialize)]
struct AnthropicSystemBlock {
    #[serde(rename = "type")]
    block_type: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<AnthropicCacheControl>,
}

#[derive(Debug, Serialize)]
struct AnthropicCacheControl {
    #[serde(rename = "type")]
    cache_type: &'static str,
}

#[derive(Debug, Serialize)]
struct AnthropicThinking {
    #[serde(rename = "type")]
    thinking_type: &'static str,
    budget_tokens: u32,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    content: Vec<AnthropicContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text { text: String },
    Thinking { thinking: String, signature: Option<String> },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

/// Anthropic `stop_reason` -> OpenAI `finish_reason` (spec §4.5).
fn translate_stop_reason(stop_reason: Option<&str>) -> Option<String> {
    Some(
        match stop_reason? {
            "end_turn" | "stop_sequence" => "stop",
            "max_tokens" => "length",
            "tool_use" => "tool_calls",
            other => other,
        }
        .to_string(),
    )
}

/// Split request messages into a `system` block (with `cache_control` on
/// the last block, spec §4.5) and the remaining turn messages, which
/// Anthropic requires as plain alternating user/assistant turns.
fn split_system_and_turns(req: &ChatRequest) -> (Option<Vec<AnthropicSystemBlock>>, Vec<AnthropicMessage>) {
    let mut system_texts = Vec::new();
    let mut turns = Vec::new();
    for message in &req.messages {
        if message.role == Role::System {
            system_texts.push(message.content_as_text());
        } else {
            let role = match message.role {
                Role::Assistant => "assistant",
                _ => "user",
            };
            turns.push(AnthropicMessage {
                role: role.to_string(),
                content: message.content_as_text(),
            });
        }
    }

    if system_texts.is_empty() {
        return (None, turns);
    }
    let last = system_texts.len() - 1;
    let blocks = system_texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| AnthropicSystemBlock {
            block_type: "text",
            text,
            cache_control: (i == last).then(|| AnthropicCacheControl { cache_type: "ephemeral" }),
        })
        .collect();
    (Some(blocks), turns)
}

fn build_request(config: &ProviderConfig, req: &ChatRequest, stream: bool) -> AnthropicRequest {
    let (system, messages) = split_system_and_turns(req);
    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.function.name.clone(),
                description: t.function.description.clone(),
                input_schema: t.function.parameters.clone(),
            })
            .collect()
    });
    let mut max_tokens = req.max_tokens.or(req.max_completion_tokens).unwrap_or(DEFAULT_MAX_TOKENS);
    let mut temperature = req.temperature;
    let thinking = req.reasoning_effort.map(|effort| {
        let budget_tokens = effort.anthropic_budget_tokens();
        if max_tokens <= budget_tokens {
            max_tokens = budget_tokens + 1;
        }
        temperature = Some(1.0);
        AnthropicThinking {
            thinking_type: "enabled",
            budget_tokens,
        }
    });

    AnthropicRequest {
        model: config.mapped_model(&req.model).to_string(),
        messages,
        max_tokens,
        system,
        temperature,
        top_p: req.top_p,
        stop_sequences: req.stop.clone(),
        stream: Some(stream),
        thinking,
        tools,
    }
}

fn to_chat_response(resp: AnthropicResponse) -> ChatResponse {
    let mut text = String::new();
    let mut reasoning = Vec::new();
    let mut tool_calls = Vec::new();
    for block in resp.content {
        match block {
            AnthropicContentBlock::Text { text: t } => text.push_str(&t),
            AnthropicContentBlock::Thinking { thinking, signature } => reasoning.push(ReasoningBlock {
                block_type: "thinking".to_string(),
                thinking,
                signature,
            }),
            AnthropicContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                call_type: "function".to_string(),
                function: FunctionCall {
                    name,
                    arguments: input.to_string(),
                },
            }),
        }
    }

    ChatResponse {
        id: resp.id,
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp() as u64,
        model: resp.model,
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: Role::Assistant,
                content: text,
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
            },
            finish_reason: translate_stop_reason(resp.stop_reason.as_deref()),
        }],
        usage: Some(Usage {
            prompt_tokens: resp.usage.input_tokens,
            completion_tokens: resp.usage.output_tokens,
            total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
            completion_tokens_details: None,
        }),
        system_fingerprint: None,
    }
}

#[async_trait]
impl Adapter for AnthropicAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn chat_completion(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = build_request(&self.config, &req, false);
        let resp: AnthropicResponse = self.http.post_json("/messages", &body).await?;
        Ok(to_chat_response(resp))
    }

    async fn stream_chat_completion(&self, req: ChatRequest) -> Result<ChatStream, ProviderError> {
        let body = build_request(&self.config, &req, true);
        let resp = self.http.post_json_raw("/messages", &body).await?;
        let mut byte_stream = resp.bytes_stream();

        let stream = async_stream::try_stream! {
            let mut parser = SseParser::new();
            let mut index = 0u32;
            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk.map_err(ProviderError::Http)?;
                for event in parser.push_bytes(&chunk) {
                    let Ok(value) = serde_json::from_str::<serde_json::Value>(&event.data) else {
                        tracing::warn!("skipping malformed anthropic stream event");
                        continue;
                    };
                    let event_type = value.get("type").and_then(|t| t.as_str()).unwrap_or("");
                    match event_type {
                        "content_block_delta" => {
                            let delta = value.get("delta");
                            let text = delta.and_then(|d| d.get("text")).and_then(|t| t.as_str());
                            let thinking = delta.and_then(|d| d.get("thinking")).and_then(|t| t.as_str());
                            if text.is_some() || thinking.is_some() {
                                yield StreamEvent::Delta(StreamChunk {
                                    id: String::new(),
                                    object: "chat.completion.chunk".to_string(),
                                    created: 0,
                                    model: String::new(),
                                    choices: vec![StreamChoice {
                                        index,
                                        delta: Delta {
                                            role: None,
                                            content: text.map(|s| s.to_string()),
                                            reasoning_content: thinking.map(|s| s.to_string()),
                                            tool_calls: None,
                                        },
                                        finish_reason: None,
                                    }],
                                    usage: None,
                                });
                            }
                        }
                        "message_delta" => {
                            let stop_reason = value
                                .get("delta")
                                .and_then(|d| d.get("stop_reason"))
                                .and_then(|s| s.as_str());
                            if let Some(finish_reason) = translate_stop_reason(stop_reason) {
                                yield StreamEvent::Delta(StreamChunk {
                                    id: String::new(),
                                    object: "chat.completion.chunk".to_string(),
                                    created: 0,
                                    model: String::new(),
                                    choices: vec![StreamChoice {
                                        index,
                                        delta: Delta::default(),
                                        finish_reason: Some(finish_reason),
                                    }],
                                    usage: None,
                                });
                            }
                        }
                        "message_stop" => {
                            yield StreamEvent::Done;
                            return;
                        }
                        "content_block_start" => {
                            index += 1;
                        }
                        _ => {}
                    }
                }
            }
            yield StreamEvent::Done;
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_extracted_with_cache_control_on_last_block() {
        let req = ChatRequest {
            model: "claude-3-5-sonnet".to_string(),
            messages: vec![
                Message::system("be concise"),
                Message::system("never lie"),
                Message::user("hi"),
            ],
            ..Default::default()
        };
        let config = ProviderConfig::new("anthropic", "key", "https://api.anthropic.com/v1");
        let body = build_request(&config, &req, false);
        let system = body.system.expect("system blocks present");
        assert_eq!(system.len(), 2);
        assert!(system[0].cache_control.is_none());
        assert!(system[1].cache_control.is_some());
        assert_eq!(body.messages.len(), 1);
    }

    #[test]
    fn reasoning_effort_maps_to_thinking_budget() {
        let req = ChatRequest {
            model: "claude-3-5-sonnet".to_string(),
            messages: vec![Message::user("hi")],
            reasoning_effort: Some(ReasoningEffort::High),
            ..Default::default()
        };
        let config = ProviderConfig::new("anthropic", "key", "https://api.anthropic.com/v1");
        let body = build_request(&config, &req, false);
        let thinking = body.thinking.expect("thinking block present");
        assert_eq!(thinking.budget_tokens, 4096);
    }

    #[test]
    fn stop_reason_translation_matches_openai_vocabulary() {
        assert_eq!(translate_stop_reason(Some("end_turn")), Some("stop".to_string()));
        assert_eq!(translate_stop_reason(Some("max_tokens")), Some("length".to_string()));
        assert_eq!(translate_stop_reason(Some("tool_use")), Some("tool_calls".to_string()));
        assert_eq!(translate_stop_reason(None), None);
    }
}
