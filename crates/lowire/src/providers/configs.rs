use std::env;

pub const OPENAI_HOST: &str = "https://api.openai.com";
pub const ANTHROPIC_HOST: &str = "https://api.anthropic.com";
pub const GOOGLE_HOST: &str = "https://generativelanguage.googleapis.com";
pub const COPILOT_HOST: &str = "https://api.githubcopilot.com";
pub const GITHUB_API_HOST: &str = "https://api.github.com";

/// Unified enum to wrap different provider configurations
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    OpenAi(OpenAiProviderConfig),
    OpenAiResponses(OpenAiProviderConfig),
    Anthropic(AnthropicProviderConfig),
    Google(GoogleProviderConfig),
    Copilot(CopilotProviderConfig),
}

// Hosts are overridable so the adapters can be pointed at a mock server.
// Keys are read lazily and unvalidated; a missing key surfaces as the
// provider's own 401 body.

#[derive(Debug, Clone)]
pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: String,
}

impl OpenAiProviderConfig {
    pub fn from_env() -> Self {
        Self {
            host: OPENAI_HOST.to_string(),
            api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicProviderConfig {
    pub host: String,
    pub api_key: String,
}

impl AnthropicProviderConfig {
    pub fn from_env() -> Self {
        Self {
            host: ANTHROPIC_HOST.to_string(),
            api_key: env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GoogleProviderConfig {
    pub host: String,
    pub api_key: String,
}

impl GoogleProviderConfig {
    pub fn from_env() -> Self {
        Self {
            host: GOOGLE_HOST.to_string(),
            api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CopilotProviderConfig {
    pub host: String,
    /// Host of the token-exchange endpoint
    pub token_host: String,
    /// Device-flow credential exchanged for short-lived bearer tokens
    pub api_key: String,
}

impl CopilotProviderConfig {
    pub fn from_env() -> Self {
        Self {
            host: COPILOT_HOST.to_string(),
            token_host: GITHUB_API_HOST.to_string(),
            api_key: env::var("COPILOT_API_KEY").unwrap_or_default(),
        }
    }
}
