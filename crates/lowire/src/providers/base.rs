use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::message::{Conversation, Message};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: i64,
    pub output_tokens: i64,
}

impl Usage {
    pub fn new(input_tokens: i64, output_tokens: i64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Accumulate another turn's counts into this one
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    pub fn total(&self) -> i64 {
        self.input_tokens + self.output_tokens
    }
}

/// One provider reply: the assistant message plus what it cost.
///
/// Serialises as `{result, usage}`, which is also the replay-cache entry
/// format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    #[serde(rename = "result")]
    pub message: Message,
    pub usage: Usage,
}

/// Per-request knobs shared by every adapter
#[derive(Debug, Clone, Default)]
pub struct ModelOptions {
    pub model: String,
    pub max_tokens: Option<i64>,
    pub temperature: Option<f32>,
    pub reasoning: bool,
    pub debug: bool,
}

impl ModelOptions {
    pub fn new<S: Into<String>>(model: S) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

/// Base trait for LLM providers (OpenAI, Anthropic, etc)
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable name used for registry lookups and cache directories
    fn name(&self) -> &'static str;

    /// Generate the next assistant message for the conversation
    async fn complete(
        &self,
        conversation: &Conversation,
        options: &ModelOptions,
    ) -> Result<Completion>;
}
