use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::role::Role;
use super::tool::{Tool, ToolResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextPart {
    pub text: String,
    /// Opaque reasoning signature echoed back to Gemini on reuse
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
    /// Set when this text is a narration extracted from a Copilot tool call;
    /// the next serialisation folds it back into that call's arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copilot_tool_call_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingPart {
    pub thinking: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPart {
    /// Correlation id, unique within a conversation
    pub id: String,
    pub name: String,
    pub arguments: Value,
    /// Attached once the call has been dispatched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResult>,
    /// Opaque reasoning signature echoed back to Gemini on reuse
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
    /// Opaque OpenAI Responses item id, round-tripped on reuse
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    /// Opaque OpenAI Responses item status, round-tripped on reuse
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
/// Content part of a message
pub enum MessageContent {
    Text(TextPart),
    Thinking(ThinkingPart),
    ToolCall(ToolCallPart),
}

impl MessageContent {
    pub fn text<S: Into<String>>(text: S) -> Self {
        MessageContent::Text(TextPart {
            text: text.into(),
            thought_signature: None,
            copilot_tool_call_id: None,
        })
    }

    pub fn thinking<S: Into<String>, T: Into<String>>(thinking: S, signature: T) -> Self {
        MessageContent::Thinking(ThinkingPart {
            thinking: thinking.into(),
            signature: signature.into(),
        })
    }

    pub fn tool_call<I: Into<String>, N: Into<String>>(id: I, name: N, arguments: Value) -> Self {
        MessageContent::ToolCall(ToolCallPart {
            id: id.into(),
            name: name.into(),
            arguments,
            result: None,
            thought_signature: None,
            item_id: None,
            status: None,
        })
    }

    pub fn as_text(&self) -> Option<&TextPart> {
        match self {
            MessageContent::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCallPart> {
        match self {
            MessageContent::ToolCall(call) => Some(call),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A message to or from an LLM
pub struct Message {
    pub role: Role,
    pub content: Vec<MessageContent>,
    /// Set when the previous turn produced no tool call; surfaced to the
    /// provider as a trailing synthetic user message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_error: Option<String>,
    /// Opaque OpenAI Responses message id, round-tripped on reuse
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    /// Opaque OpenAI Responses message status, round-tripped on reuse
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Message {
    /// Create a new empty user message
    pub fn user() -> Self {
        Message {
            role: Role::User,
            content: Vec::new(),
            tool_error: None,
            response_id: None,
            status: None,
        }
    }

    /// Create a new empty assistant message
    pub fn assistant() -> Self {
        Message {
            role: Role::Assistant,
            content: Vec::new(),
            tool_error: None,
            response_id: None,
            status: None,
        }
    }

    /// Add any MessageContent to the message
    pub fn with_content(mut self, content: MessageContent) -> Self {
        self.content.push(content);
        self
    }

    /// Add text content to the message
    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_content(MessageContent::text(text))
    }

    /// Add a tool call to the message
    pub fn with_tool_call<I: Into<String>, N: Into<String>>(
        self,
        id: I,
        name: N,
        arguments: Value,
    ) -> Self {
        self.with_content(MessageContent::tool_call(id, name, arguments))
    }

    /// All text parts joined with newlines
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|content| content.as_text().map(|text| text.text.clone()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tool_calls(&self) -> Vec<&ToolCallPart> {
        self.content
            .iter()
            .filter_map(MessageContent::as_tool_call)
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.content
            .iter()
            .any(|content| matches!(content, MessageContent::ToolCall(_)))
    }

    /// Find the narration text attached to a tool call, if the assistant
    /// produced one
    pub fn intent_for_call(&self, call_id: &str) -> Option<&str> {
        self.content.iter().find_map(|content| match content {
            MessageContent::Text(text)
                if text.copilot_tool_call_id.as_deref() == Some(call_id) =>
            {
                Some(text.text.as_str())
            }
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Everything a provider needs for one completion request
pub struct Conversation {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
}

impl Conversation {
    pub fn new<S: Into<String>>(system_prompt: S, messages: Vec<Message>, tools: Vec<Tool>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages,
            tools,
        }
    }

    /// Assistant messages in order
    pub fn assistant_messages(&self) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|message| message.role == Role::Assistant)
            .collect()
    }
}
