use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::base::{Completion, ModelOptions, Provider, Usage};
use super::configs::GoogleProviderConfig;
use super::utils::strip_additional_properties;
use crate::models::content::Content;
use crate::models::message::{Conversation, Message, MessageContent, TextPart, ToolCallPart};
use crate::models::role::Role;

const TOOL_ADDENDUM: &str = "Work on the task step by step using the provided tools. \
Every reply must contain at least one function call. \
Call \"report_result\" once the task is complete.";

pub struct GoogleProvider {
    client: Client,
    config: GoogleProviderConfig,
}

/// Gemini omits tool-call ids, so the adapter mints one per parsed call and
/// keeps it on the part for the rest of the conversation
fn synthesize_call_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("call_{suffix}")
}

impl GoogleProvider {
    pub fn new(config: GoogleProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;

        Ok(Self { client, config })
    }

    fn messages_to_contents(messages: &[Message]) -> Vec<Value> {
        let mut contents = Vec::new();

        for message in messages {
            match message.role {
                Role::User => {
                    contents.push(json!({
                        "role": "user",
                        "parts": [{"text": message.text()}],
                    }));
                }
                Role::Assistant => {
                    let mut parts = Vec::new();
                    let mut result_parts = Vec::new();
                    let mut image_contents = Vec::new();

                    for content in &message.content {
                        match content {
                            MessageContent::Text(text) => {
                                let mut part = json!({"text": text.text});
                                if let Some(signature) = &text.thought_signature {
                                    part["thoughtSignature"] = json!(signature);
                                }
                                parts.push(part);
                            }
                            MessageContent::Thinking(_) => {}
                            MessageContent::ToolCall(call) => {
                                let mut part = json!({
                                    "functionCall": {
                                        "name": call.name,
                                        "args": call.arguments,
                                    }
                                });
                                if let Some(signature) = &call.thought_signature {
                                    part["thoughtSignature"] = json!(signature);
                                }
                                parts.push(part);

                                if let Some(result) = &call.result {
                                    let mut texts = Vec::new();
                                    for content in &result.content {
                                        match content {
                                            Content::Text(text) => texts.push(text.text.clone()),
                                            Content::Image(image) => {
                                                texts.push("This tool result included an image that is uploaded in the next message.".to_string());
                                                image_contents.push(json!({
                                                    "role": "user",
                                                    "parts": [{
                                                        "inline_data": {
                                                            "mime_type": image.mime_type,
                                                            "data": image.data,
                                                        }
                                                    }],
                                                }));
                                            }
                                        }
                                    }
                                    let response = if result.is_error {
                                        json!({"error": texts.join("\n")})
                                    } else {
                                        json!({"content": texts.join("\n")})
                                    };
                                    result_parts.push(json!({
                                        "functionResponse": {
                                            "name": call.name,
                                            "response": response,
                                        }
                                    }));
                                }
                            }
                        }
                    }

                    if !parts.is_empty() {
                        contents.push(json!({"role": "model", "parts": parts}));
                    }
                    if !result_parts.is_empty() {
                        contents.push(json!({"role": "function", "parts": result_parts}));
                    }
                    contents.extend(image_contents);
                    if let Some(tool_error) = &message.tool_error {
                        contents.push(json!({
                            "role": "user",
                            "parts": [{"text": tool_error}],
                        }));
                    }
                }
            }
        }

        contents
    }

    fn response_to_message(response: &Value) -> Result<Message> {
        let parts = response["candidates"]
            .as_array()
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate["content"]["parts"].as_array())
            .ok_or_else(|| anyhow!("No candidates in response"))?;

        let mut message = Message::assistant();
        for part in parts {
            let thought_signature = part["thoughtSignature"].as_str().map(String::from);
            if let Some(text) = part["text"].as_str() {
                message.content.push(MessageContent::Text(TextPart {
                    text: text.to_string(),
                    thought_signature,
                    copilot_tool_call_id: None,
                }));
            } else if let Some(function_call) = part.get("functionCall") {
                message.content.push(MessageContent::ToolCall(ToolCallPart {
                    id: synthesize_call_id(),
                    name: function_call["name"].as_str().unwrap_or_default().to_string(),
                    arguments: function_call
                        .get("args")
                        .cloned()
                        .unwrap_or_else(|| json!({})),
                    result: None,
                    thought_signature,
                    item_id: None,
                    status: None,
                }));
            }
            // parts with neither text nor functionCall are dropped
        }

        Ok(message)
    }

    async fn post(&self, model: &str, payload: Value) -> Result<Value> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.host.trim_end_matches('/'),
            model
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
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
impl Provider for GoogleProvider {
    fn name(&self) -> &'static str {
        "google"
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

        let mut payload = json!({
            "systemInstruction": {"parts": [{"text": system}]},
            "contents": Self::messages_to_contents(&conversation.messages),
        });

        if !conversation.tools.is_empty() {
            let declarations: Vec<Value> = conversation
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": strip_additional_properties(&tool.input_schema),
                    })
                })
                .collect();
            payload["tools"] = json!([{"functionDeclarations": declarations}]);
        }

        let mut generation_config = json!({});
        if let Some(temperature) = options.temperature {
            generation_config["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            generation_config["maxOutputTokens"] = json!(max_tokens);
        }
        if generation_config.as_object().is_some_and(|map| !map.is_empty()) {
            payload["generationConfig"] = generation_config;
        }

        if options.debug {
            debug!(payload = %payload, "gemini request");
        }

        let response = self.post(&options.model, payload).await?;

        let message = Self::response_to_message(&response)?;
        let usage = Usage::new(
            response["usageMetadata"]["promptTokenCount"]
                .as_i64()
                .unwrap_or(0),
            response["usageMetadata"]["candidatesTokenCount"]
                .as_i64()
                .unwrap_or(0),
        );

        Ok(Completion { message, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tool::{Tool, ToolResult};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_messages_to_contents_roles_and_results() {
        let mut assistant = Message::assistant()
            .with_tool_call("call_abc", "counter", json!({"op": "read"}));
        if let MessageContent::ToolCall(call) = &mut assistant.content[0] {
            call.thought_signature = Some("sig_1".to_string());
            call.result = Some(ToolResult::text("Counter value is 43"));
        }

        let contents = GoogleProvider::messages_to_contents(&[
            Message::user().with_text("Query the counter"),
            assistant,
        ]);

        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["functionCall"]["name"], "counter");
        assert_eq!(contents[1]["parts"][0]["thoughtSignature"], "sig_1");
        assert_eq!(contents[2]["role"], "function");
        assert_eq!(
            contents[2]["parts"][0]["functionResponse"]["response"]["content"],
            "Counter value is 43"
        );
    }

    #[test]
    fn test_image_result_becomes_inline_data_message() {
        let mut assistant = Message::assistant().with_tool_call("call_1", "capture", json!({}));
        if let MessageContent::ToolCall(call) = &mut assistant.content[0] {
            call.result = Some(ToolResult {
                content: vec![Content::image("aGk=", "image/png")],
                is_error: false,
                meta: None,
            });
        }

        let contents = GoogleProvider::messages_to_contents(&[assistant]);

        assert_eq!(contents.len(), 3);
        assert_eq!(contents[2]["role"], "user");
        assert_eq!(contents[2]["parts"][0]["inline_data"]["data"], "aGk=");
    }

    #[test]
    fn test_response_to_message_drops_empty_parts() {
        let response = json!({
            "candidates": [{
                "content": {
                    "parts": [
                        {"text": "On it.", "thoughtSignature": "sig_9"},
                        {"functionCall": {"name": "counter", "args": {"op": "read"}}},
                        {"somethingElse": true}
                    ]
                }
            }]
        });

        let message = GoogleProvider::response_to_message(&response).unwrap();
        assert_eq!(message.content.len(), 2);
        if let MessageContent::Text(text) = &message.content[0] {
            assert_eq!(text.thought_signature.as_deref(), Some("sig_9"));
        } else {
            panic!("expected text part");
        }
        let calls = message.tool_calls();
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(calls[0].name, "counter");
    }

    #[test]
    fn test_response_without_candidates() {
        let err = GoogleProvider::response_to_message(&json!({})).unwrap_err();
        assert_eq!(err.to_string(), "No candidates in response");
    }

    #[test]
    fn test_synthesized_ids_are_distinct() {
        assert_ne!(synthesize_call_id(), synthesize_call_id());
    }

    #[tokio::test]
    async fn test_complete_strips_additional_properties() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .and(header("x-goog-api-key", "test_api_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "Hello!"}]}}],
                "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = GoogleProvider::new(GoogleProviderConfig {
            host: mock_server.uri(),
            api_key: "test_api_key".to_string(),
        })?;

        let tool = Tool::new(
            "search",
            "Search things",
            json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {"q": {"type": "string"}},
                "required": ["q"]
            }),
        );

        let conversation = Conversation::new(
            "You are a helpful assistant.",
            vec![Message::user().with_text("Hello?")],
            vec![tool],
        );

        let completion = provider
            .complete(&conversation, &ModelOptions::new("gemini-2.0-flash"))
            .await?;

        assert_eq!(completion.message.text(), "Hello!");
        assert_eq!(completion.usage.input_tokens, 3);

        let requests = mock_server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(!body["tools"].to_string().contains("additionalProperties"));

        Ok(())
    }
}
