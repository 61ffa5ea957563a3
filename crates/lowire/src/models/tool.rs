use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::content::Content;

/// `_meta` key under which a tool result may report history entries for the
/// conversation summary, as a list of `{category, content}` objects.
pub const META_HISTORY: &str = "dev.lowire/history";

/// `_meta` key under which a tool result may report named state for the
/// conversation summary, as a `{name: content}` map.
pub const META_STATE: &str = "dev.lowire/state";

/// `_meta` key injected into tool-call arguments when the assistant attached
/// a narration to the call.
pub const META_INTENT: &str = "dev.lowire/intent";

/// A tool that can be called by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// JSON schema describing the tool's input
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl Tool {
    pub fn new<N, D>(name: N, description: D, input_schema: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A single tool invocation handed to the tool callback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// The name of the tool to execute
    pub name: String,
    /// The arguments for the execution
    pub arguments: Value,
}

impl ToolCall {
    pub fn new<S: Into<String>>(name: S, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// What a tool callback hands back: content for the model plus an error flag
/// and optional `_meta` hints for the summariser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub content: Vec<Content>,
    #[serde(rename = "isError", default, skip_serializing_if = "is_false")]
    pub is_error: bool,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl ToolResult {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
            meta: None,
        }
    }

    pub fn error<S: Into<String>>(text: S) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: true,
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// All text content joined with newlines
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(Content::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Look up an entry of the `_meta` map by key
    pub fn meta_entry(&self, key: &str) -> Option<&Value> {
        self.meta.as_ref().and_then(|meta| meta.get(key))
    }
}
