use anyhow::Result;
use strum_macros::EnumIter;

use super::anthropic::AnthropicProvider;
use super::base::Provider;
use super::configs::{
    AnthropicProviderConfig, CopilotProviderConfig, GoogleProviderConfig, OpenAiProviderConfig,
    ProviderConfig,
};
use super::copilot::CopilotProvider;
use super::google::GoogleProvider;
use super::openai::OpenAiProvider;
use super::responses::OpenAiResponsesProvider;
use crate::errors::{AgentError, AgentResult};

#[derive(EnumIter, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    OpenAi,
    OpenAiResponses,
    Anthropic,
    Google,
    Copilot,
}

impl ProviderType {
    /// Resolve a registry name, including the legacy aliases
    pub fn from_name(name: &str) -> AgentResult<Self> {
        match name {
            "openai" => Ok(ProviderType::OpenAi),
            "openai-responses" => Ok(ProviderType::OpenAiResponses),
            "anthropic" | "claude" => Ok(ProviderType::Anthropic),
            "google" | "gemini" => Ok(ProviderType::Google),
            "github" | "copilot" => Ok(ProviderType::Copilot),
            other => Err(AgentError::UnknownProvider(other.to_string())),
        }
    }
}

/// Build a provider by registry name, with credentials from the environment
pub fn get_provider(name: &str) -> Result<Box<dyn Provider>> {
    let config = match ProviderType::from_name(name)? {
        ProviderType::OpenAi => ProviderConfig::OpenAi(OpenAiProviderConfig::from_env()),
        ProviderType::OpenAiResponses => {
            ProviderConfig::OpenAiResponses(OpenAiProviderConfig::from_env())
        }
        ProviderType::Anthropic => ProviderConfig::Anthropic(AnthropicProviderConfig::from_env()),
        ProviderType::Google => ProviderConfig::Google(GoogleProviderConfig::from_env()),
        ProviderType::Copilot => ProviderConfig::Copilot(CopilotProviderConfig::from_env()),
    };
    get_provider_with_config(config)
}

pub fn get_provider_with_config(config: ProviderConfig) -> Result<Box<dyn Provider>> {
    match config {
        ProviderConfig::OpenAi(config) => Ok(Box::new(OpenAiProvider::new(config)?)),
        ProviderConfig::OpenAiResponses(config) => {
            Ok(Box::new(OpenAiResponsesProvider::new(config)?))
        }
        ProviderConfig::Anthropic(config) => Ok(Box::new(AnthropicProvider::new(config)?)),
        ProviderConfig::Google(config) => Ok(Box::new(GoogleProvider::new(config)?)),
        ProviderConfig::Copilot(config) => Ok(Box::new(CopilotProvider::new(config)?)),
    }
}
