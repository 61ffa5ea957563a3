use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::base::{Completion, ModelOptions, Provider, Usage};
use super::configs::OpenAiProviderConfig;
use super::utils::sanitize_function_name;
use crate::models::content::Content;
use crate::models::message::{Conversation, Message, MessageContent};
use crate::models::role::Role;

const TOOL_ADDENDUM: &str = "Work on the task step by step using the provided tools. \
Every reply must contain at least one tool call. \
Call \"report_result\" once the task is complete.";

/// OpenAI Responses adapter. Same account and auth as chat completions but
/// a different wire format: flat `input` items instead of `messages`, and
/// opaque item ids/statuses that must be echoed back verbatim on reuse.
pub struct OpenAiResponsesProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiResponsesProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;

        Ok(Self { client, config })
    }

    fn messages_to_input_items(messages: &[Message]) -> Vec<Value> {
        let mut items = Vec::new();

        for message in messages {
            match message.role {
                Role::User => {
                    items.push(json!({
                        "type": "message",
                        "role": "user",
                        "content": [{"type": "input_text", "text": message.text()}],
                    }));
                }
                Role::Assistant => {
                    let mut text_items = Vec::new();
                    let mut call_items = Vec::new();

                    for content in &message.content {
                        match content {
                            MessageContent::Text(text) => {
                                text_items.push(json!({"type": "output_text", "text": text.text}));
                            }
                            MessageContent::Thinking(_) => {}
                            MessageContent::ToolCall(call) => {
                                let mut item = json!({
                                    "type": "function_call",
                                    "call_id": call.id,
                                    "name": sanitize_function_name(&call.name),
                                    "arguments": call.arguments.to_string(),
                                });
                                if let Some(item_id) = &call.item_id {
                                    item["id"] = json!(item_id);
                                }
                                if let Some(status) = &call.status {
                                    item["status"] = json!(status);
                                }
                                call_items.push(item);

                                if let Some(result) = &call.result {
                                    let mut image_items = Vec::new();
                                    let mut output_text = Vec::new();
                                    for content in &result.content {
                                        match content {
                                            Content::Text(text) => {
                                                output_text.push(text.text.clone())
                                            }
                                            Content::Image(image) => {
                                                output_text.push("This tool result included an image that is uploaded in the next message.".to_string());
                                                image_items.push(json!({
                                                    "type": "message",
                                                    "role": "user",
                                                    "content": [{
                                                        "type": "input_image",
                                                        "image_url": format!(
                                                            "data:{};base64,{}",
                                                            image.mime_type, image.data
                                                        ),
                                                    }],
                                                }));
                                            }
                                        }
                                    }
                                    call_items.push(json!({
                                        "type": "function_call_output",
                                        "call_id": call.id,
                                        "output": output_text.join("\n"),
                                    }));
                                    call_items.extend(image_items);
                                }
                            }
                        }
                    }

                    if !text_items.is_empty() {
                        let mut item = json!({
                            "type": "message",
                            "role": "assistant",
                            "content": text_items,
                        });
                        if let Some(response_id) = &message.response_id {
                            item["id"] = json!(response_id);
                        }
                        if let Some(status) = &message.status {
                            item["status"] = json!(status);
                        }
                        items.push(item);
                    }
                    items.extend(call_items);

                    if let Some(tool_error) = &message.tool_error {
                        items.push(json!({
                            "type": "message",
                            "role": "user",
                            "content": [{"type": "input_text", "text": tool_error}],
                        }));
                    }
                }
            }
        }

        items
    }

    fn response_to_message(response: &Value) -> Result<Message> {
        let output = response["output"]
            .as_array()
            .ok_or_else(|| anyhow!("No output in response"))?;

        let mut message = Message::assistant();

        for item in output {
            let item_type = item["type"].as_str().unwrap_or_default();
            match item_type {
                "message" => {
                    message.response_id = item["id"].as_str().map(String::from);
                    message.status = item["status"].as_str().map(String::from);
                    for content in item["content"].as_array().into_iter().flatten() {
                        if content["type"] == "output_text" {
                            if let Some(text) = content["text"].as_str() {
                                message = message.with_text(text);
                            }
                        }
                    }
                }
                "function_call" => {
                    let raw_arguments = item["arguments"].as_str().unwrap_or_default();
                    let arguments = serde_json::from_str::<Value>(raw_arguments)
                        .unwrap_or_else(|_| Value::String(raw_arguments.to_string()));
                    let mut part = crate::models::message::ToolCallPart {
                        id: item["call_id"].as_str().unwrap_or_default().to_string(),
                        name: item["name"].as_str().unwrap_or_default().to_string(),
                        arguments,
                        result: None,
                        thought_signature: None,
                        item_id: item["id"].as_str().map(String::from),
                        status: item["status"].as_str().map(String::from),
                    };
                    if part.id.is_empty() {
                        part.id = part.item_id.clone().unwrap_or_default();
                    }
                    message.content.push(MessageContent::ToolCall(part));
                }
                other => {
                    return Err(anyhow!("Unsupported content part type: {}", other));
                }
            }
        }

        Ok(message)
    }

    async fn post(&self, payload: Value) -> Result<Value> {
        let url = format!("{}/v1/responses", self.config.host.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
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
impl Provider for OpenAiResponsesProvider {
    fn name(&self) -> &'static str {
        "openai-responses"
    }

    async fn complete(
        &self,
        conversation: &Conversation,
        options: &ModelOptions,
    ) -> Result<Completion> {
        let instructions = if conversation.tools.is_empty() {
            conversation.system_prompt.clone()
        } else {
            format!("{}\n\n{}", conversation.system_prompt, TOOL_ADDENDUM)
        };

        let mut payload = json!({
            "model": options.model,
            "instructions": instructions,
            "input": Self::messages_to_input_items(&conversation.messages),
            "parallel_tool_calls": false,
        });

        if !conversation.tools.is_empty() {
            let tools: Vec<Value> = conversation
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.input_schema,
                    })
                })
                .collect();
            payload["tools"] = json!(tools);
        }
        if let Some(temperature) = options.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            payload["max_output_tokens"] = json!(max_tokens);
        }

        if options.debug {
            debug!(payload = %payload, "openai responses request");
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
