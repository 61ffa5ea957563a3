use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::base::{Completion, ModelOptions, Provider, Usage};
use super::configs::AnthropicProviderConfig;
use super::utils::{convert_image, ImageFormat};
use crate::models::content::Content;
use crate::models::message::{Conversation, Message, MessageContent};
use crate::models::role::Role;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: i64 = 4096;

const TOOL_ADDENDUM: &str = "Work on the task step by step using the provided tools. \
Every reply must contain at least one tool use. \
Call \"report_result\" once the task is complete.";

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn messages_to_anthropic_spec(messages: &[Message]) -> Vec<Value> {
        let mut anthropic_messages = Vec::new();

        for message in messages {
            match message.role {
                Role::User => {
                    anthropic_messages.push(json!({
                        "role": "user",
                        "content": message.text(),
                    }));
                }
                Role::Assistant => {
                    let mut blocks = Vec::new();
                    let mut result_blocks = Vec::new();

                    for content in &message.content {
                        match content {
                            MessageContent::Thinking(thinking) => {
                                blocks.push(json!({
                                    "type": "thinking",
                                    "thinking": thinking.thinking,
                                    "signature": thinking.signature,
                                }));
                            }
                            MessageContent::Text(text) => {
                                if !text.text.is_empty() {
                                    blocks.push(json!({"type": "text", "text": text.text}));
                                }
                            }
                            MessageContent::ToolCall(call) => {
                                blocks.push(json!({
                                    "type": "tool_use",
                                    "id": call.id,
                                    "name": call.name,
                                    "input": call.arguments,
                                }));

                                if let Some(result) = &call.result {
                                    let content: Vec<Value> = result
                                        .content
                                        .iter()
                                        .map(|content| match content {
                                            Content::Text(text) => {
                                                json!({"type": "text", "text": text.text})
                                            }
                                            Content::Image(image) => {
                                                convert_image(image, &ImageFormat::Anthropic)
                                            }
                                        })
                                        .collect();

                                    let mut block = json!({
                                        "type": "tool_result",
                                        "tool_use_id": call.id,
                                        "content": content,
                                    });
                                    if result.is_error {
                                        block["is_error"] = json!(true);
                                    }
                                    result_blocks.push(block);
                                }
                            }
                        }
                    }

                    if !blocks.is_empty() {
                        anthropic_messages.push(json!({
                            "role": "assistant",
                            "content": blocks,
                        }));
                    }
                    // tool results ride in a user-role message
                    if !result_blocks.is_empty() {
                        anthropic_messages.push(json!({
                            "role": "user",
                            "content": result_blocks,
                        }));
                    }
                    if let Some(tool_error) = &message.tool_error {
                        anthropic_messages.push(json!({
                            "role": "user",
                            "content": tool_error,
                        }));
                    }
                }
            }
        }

        anthropic_messages
    }

    fn response_to_message(response: &Value) -> Result<Message> {
        let content = response["content"]
            .as_array()
            .ok_or_else(|| anyhow!("Invalid response format from Anthropic API"))?;

        let mut message = Message::assistant();
        for block in content {
            let block_type = block["type"].as_str().unwrap_or_default();
            match block_type {
                "text" => {
                    if let Some(text) = block["text"].as_str() {
                        message = message.with_text(text);
                    }
                }
                "thinking" => {
                    message = message.with_content(MessageContent::thinking(
                        block["thinking"].as_str().unwrap_or_default(),
                        block["signature"].as_str().unwrap_or_default(),
                    ));
                }
                "tool_use" => {
                    message = message.with_tool_call(
                        block["id"].as_str().unwrap_or_default(),
                        block["name"].as_str().unwrap_or_default(),
                        block["input"].clone(),
                    );
                }
                other => {
                    return Err(anyhow!("Unsupported content part type: {}", other));
                }
            }
        }

        Ok(message)
    }

    async fn post(&self, payload: Value) -> Result<Value> {
        let url = format!("{}/v1/messages", self.config.host.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "API error: {} {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or_default(),
                body
            ));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(
        &self,
        conversation: &Conversation,
        options: &ModelOptions,
    ) -> Result<Completion> {
        let system = if conversation.tools.is_empty() {
            conversation.system_prompt.clone()
        } else {
            format!("{}\n\n{}", conversation.system_prompt, TOOL_ADDENDUM)
        };

        let max_tokens = options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        let mut payload = json!({
            "model": options.model,
            "system": system,
            "messages": Self::messages_to_anthropic_spec(&conversation.messages),
            "max_tokens": max_tokens,
        });

        if !conversation.tools.is_empty() {
            let tools: Vec<Value> = conversation
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.input_schema,
                    })
                })
                .collect();
            payload["tools"] = json!(tools);
        }
        if let Some(temperature) = options.temperature {
            payload["temperature"] = json!(temperature);
        }
        if options.reasoning {
            payload["thinking"] = json!({
                "type": "enabled",
                "budget_tokens": max_tokens / 10,
            });
        }

        if options.debug {
            debug!(payload = %payload, "anthropic request");
        }

        let response = self.post(payload).await?;

        let message = Self::response_to_message(&response)?;
        let usage = Usage::new(
            response["usage"]["input_tokens"].as_i64().unwrap_or(0),
            response["usage"]["output_tokens"].as_i64().unwrap_or(0),
        );

        Ok(Completion { message, usage })
    }
}
