use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::base::{Completion, ModelOptions, Provider};
use super::configs::OpenAiProviderConfig;
use super::utils::{
    messages_to_openai_spec, openai_response_to_message, openai_usage, tools_to_openai_spec,
    ImageFormat,
};
use crate::models::message::Conversation;

const TOOL_ADDENDUM: &str = "Work on the task step by step using the provided tools. \
Every reply must contain at least one tool call. \
Call \"report_result\" once the task is complete.";

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    async fn post(&self, payload: Value) -> Result<Value> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

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
impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
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

        let mut messages_array = vec![json!({"role": "system", "content": system})];
        messages_array.extend(messages_to_openai_spec(
            &conversation.messages,
            &ImageFormat::OpenAi,
        ));

        let mut payload = json!({
            "model": options.model,
            "messages": messages_array,
        });

        if !conversation.tools.is_empty() {
            payload["tools"] = json!(tools_to_openai_spec(&conversation.tools)?);
            payload["tool_choice"] = json!("auto");
        }
        if let Some(temperature) = options.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }

        if options.debug {
            debug!(payload = %payload, "openai request");
        }

        let response = self.post(payload).await?;

        let message = openai_response_to_message(&response)?;
        let usage = openai_usage(&response);

        Ok(Completion { message, usage })
    }
}
