use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::base::{Completion, ModelOptions, Provider};
use super::configs::CopilotProviderConfig;
use super::utils::{
    inject_intent_property, messages_to_openai_spec, openai_response_to_message, openai_usage,
    tools_to_openai_spec, ImageFormat, INTENT_PROPERTY,
};
use crate::models::message::{Conversation, Message, MessageContent, TextPart};
use crate::models::role::Role;

const EDITOR_VERSION: &str = "vscode/1.96.0";
const EDITOR_PLUGIN_VERSION: &str = "copilot-chat/0.23.2";
const USER_AGENT: &str = "GitHubCopilotChat/0.23.2";

const EMPTY_CHOICES_RETRIES: usize = 3;

const TOOL_ADDENDUM: &str = "Work on the task step by step using the provided tools. \
Every reply must contain at least one tool call. \
Call \"report_result\" once the task is complete.";

#[derive(Debug, Clone, Deserialize)]
struct CopilotToken {
    token: String,
    expires_at: u64,
}

/// GitHub Copilot adapter. Speaks the OpenAI chat dialect through the shared
/// conversion helpers, with three endpoint quirks papered over: an `_intent`
/// property injected into every tool schema (the endpoint likes to narrate
/// instead of calling tools), no parallel tool calls, and a retry on replies
/// that arrive with zero choices.
pub struct CopilotProvider {
    client: Client,
    config: CopilotProviderConfig,
    token: Mutex<Option<CopilotToken>>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

impl CopilotProvider {
    pub fn new(config: CopilotProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;

        Ok(Self {
            client,
            config,
            token: Mutex::new(None),
        })
    }

    /// Exchange the device-flow credential for a short-lived bearer token,
    /// reusing the previous one until shortly before it expires
    async fn bearer_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > unix_now() + 60 {
                return Ok(token.token.clone());
            }
        }

        let url = format!(
            "{}/copilot_internal/v2/token",
            self.config.token_host.trim_end_matches('/')
        );
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("token {}", self.config.api_key))
            .header("Editor-Version", EDITOR_VERSION)
            .header("Editor-Plugin-Version", EDITOR_PLUGIN_VERSION)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|_| anyhow!("Failed to get Copilot token"))?;

        if !response.status().is_success() {
            return Err(anyhow!("Failed to get Copilot token"));
        }

        let token: CopilotToken = response
            .json()
            .await
            .map_err(|_| anyhow!("Failed to get Copilot token"))?;

        let bearer = token.token.clone();
        *cached = Some(token);
        Ok(bearer)
    }

    /// Fold narration text parts back into the arguments of the tool call
    /// they were extracted from, so the endpoint sees the same `_intent` it
    /// produced
    fn reattach_intents(messages: &[Message]) -> Vec<Message> {
        messages
            .iter()
            .map(|message| {
                if message.role != Role::Assistant {
                    return message.clone();
                }

                let mut message = message.clone();
                let mut intents = Vec::new();
                message.content.retain(|content| match content {
                    MessageContent::Text(text) => {
                        if let Some(call_id) = &text.copilot_tool_call_id {
                            intents.push((call_id.clone(), text.text.clone()));
                            false
                        } else {
                            true
                        }
                    }
                    _ => true,
                });

                for (call_id, intent) in intents {
                    for content in &mut message.content {
                        if let MessageContent::ToolCall(call) = content {
                            if call.id == call_id {
                                if let Some(arguments) = call.arguments.as_object_mut() {
                                    arguments
                                        .insert(INTENT_PROPERTY.to_string(), json!(intent));
                                }
                            }
                        }
                    }
                }

                message
            })
            .collect()
    }

    /// Strip `_intent` out of returned tool-call arguments and surface each
    /// one as a companion text part keyed by the call id
    fn extract_intents(message: Message) -> Message {
        let Message {
            role,
            content: parts,
            tool_error,
            response_id,
            status,
        } = message;
        let mut content = Vec::with_capacity(parts.len());

        for part in parts {
            match part {
                MessageContent::ToolCall(mut call) => {
                    let intent = call
                        .arguments
                        .as_object_mut()
                        .and_then(|arguments| arguments.remove(INTENT_PROPERTY));
                    if let Some(Value::String(intent)) = intent {
                        if !intent.is_empty() {
                            content.push(MessageContent::Text(TextPart {
                                text: intent,
                                thought_signature: None,
                                copilot_tool_call_id: Some(call.id.clone()),
                            }));
                        }
                    }
                    content.push(MessageContent::ToolCall(call));
                }
                other => content.push(other),
            }
        }

        Message {
            role,
            content,
            tool_error,
            response_id,
            status,
        }
    }

    async fn post(&self, payload: &Value) -> Result<Value> {
        let bearer = self.bearer_token().await?;
        let url = format!(
            "{}/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {bearer}"))
            .header("Editor-Version", EDITOR_VERSION)
            .header("Editor-Plugin-Version", EDITOR_PLUGIN_VERSION)
            .header("User-Agent", USER_AGENT)
            .json(payload)
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
impl Provider for CopilotProvider {
    fn name(&self) -> &'static str {
        "github"
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

        let messages = Self::reattach_intents(&conversation.messages);
        let mut messages_array = vec![json!({"role": "system", "content": system})];
        messages_array.extend(messages_to_openai_spec(&messages, &ImageFormat::OpenAi));

        let mut payload = json!({
            "model": options.model,
            "messages": messages_array,
        });

        if !conversation.tools.is_empty() {
            let tools: Vec<_> = conversation
                .tools
                .iter()
                .map(|tool| {
                    let mut tool = tool.clone();
                    tool.input_schema = inject_intent_property(&tool.input_schema);
                    tool
                })
                .collect();
            payload["tools"] = json!(tools_to_openai_spec(&tools)?);
            payload["tool_choice"] = json!("auto");
            payload["parallel_tool_calls"] = json!(false);
        }
        if let Some(temperature) = options.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }

        if options.debug {
            debug!(payload = %payload, "copilot request");
        }

        // The endpoint occasionally replies 200 with no choices at all
        let mut response = self.post(&payload).await?;
        let mut attempt = 1;
        while response["choices"].as_array().map_or(true, Vec::is_empty) {
            if attempt >= EMPTY_CHOICES_RETRIES {
                return Err(anyhow!("No choices in response"));
            }
            warn!(attempt, "copilot returned no choices, retrying");
            response = self.post(&payload).await?;
            attempt += 1;
        }

        let message = Self::extract_intents(openai_response_to_message(&response)?);
        let usage = openai_usage(&response);

        Ok(Completion { message, usage })
    }
}
