use anyhow::{anyhow, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::models::content::{Content, ImageContent};
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::Tool;

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub enum ImageFormat {
    OpenAi,
    Anthropic,
}

/// Convert internal messages to OpenAI's chat message specification.
///   tool results attached to a call are expanded into `tool` role messages
///   immediately after the assistant message that made the call, and a
///   `tool_error` becomes a trailing synthetic user message
pub fn messages_to_openai_spec(messages: &[Message], image_format: &ImageFormat) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        match message.role {
            Role::User => {
                messages_spec.push(json!({
                    "role": "user",
                    "content": message.text(),
                }));
            }
            Role::Assistant => {
                let mut text_parts = Vec::new();
                let mut tool_calls = Vec::new();
                let mut result_messages = Vec::new();

                for content in &message.content {
                    match content {
                        MessageContent::Text(text) => {
                            if !text.text.is_empty() {
                                text_parts.push(text.text.clone());
                            }
                        }
                        // Anthropic-only; other dialects never see these
                        MessageContent::Thinking(_) => {}
                        MessageContent::ToolCall(call) => {
                            tool_calls.push(json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": sanitize_function_name(&call.name),
                                    "arguments": call.arguments.to_string(),
                                }
                            }));

                            if let Some(result) = &call.result {
                                let mut tool_content = Vec::new();
                                let mut image_messages = Vec::new();

                                for content in &result.content {
                                    match content {
                                        Content::Image(image) => {
                                            // The tool message itself can only carry text,
                                            // so the image rides in a follow-up user message
                                            tool_content.push(Content::text("This tool result included an image that is uploaded in the next message."));
                                            image_messages.push(json!({
                                                "role": "user",
                                                "content": [convert_image(image, image_format)]
                                            }));
                                        }
                                        _ => tool_content.push(content.clone()),
                                    }
                                }

                                result_messages.push(json!({
                                    "role": "tool",
                                    "content": tool_content,
                                    "tool_call_id": call.id,
                                }));
                                result_messages.extend(image_messages);
                            }
                        }
                    }
                }

                let mut converted = json!({"role": "assistant"});
                if !text_parts.is_empty() {
                    converted["content"] = json!(text_parts.join("\n"));
                }
                if !tool_calls.is_empty() {
                    converted["tool_calls"] = json!(tool_calls);
                }
                if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
                    messages_spec.push(converted);
                }
                messages_spec.extend(result_messages);

                if let Some(tool_error) = &message.tool_error {
                    messages_spec.push(json!({
                        "role": "user",
                        "content": tool_error,
                    }));
                }
            }
        }
    }

    messages_spec
}

/// Convert an image content into an image json based on format
pub fn convert_image(image: &ImageContent, image_format: &ImageFormat) -> Value {
    match image_format {
        ImageFormat::OpenAi => json!({
            "type": "image_url",
            "image_url": {
                "url": format!("data:{};base64,{}", image.mime_type, image.data)
            }
        }),
        ImageFormat::Anthropic => json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": image.mime_type,
                "data": image.data,
            }
        }),
    }
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            }
        }));
    }

    Ok(result)
}

/// Convert OpenAI's API response to internal Message format
pub fn openai_response_to_message(response: &Value) -> Result<Message> {
    let original = &response["choices"][0]["message"];
    let mut message = Message::assistant();

    if let Some(text) = original.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            message = message.with_text(text);
        }
    }

    if let Some(tool_calls) = original.get("tool_calls").and_then(Value::as_array) {
        for tool_call in tool_calls {
            let id = tool_call["id"].as_str().unwrap_or_default().to_string();
            let name = tool_call["function"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let raw_arguments = tool_call["function"]["arguments"]
                .as_str()
                .unwrap_or_default();

            // Arguments arrive as a JSON string; a model that emits broken
            // JSON still gets its call dispatched so the tool can complain
            let arguments = serde_json::from_str::<Value>(raw_arguments)
                .unwrap_or_else(|_| Value::String(raw_arguments.to_string()));

            message = message.with_tool_call(id, name, arguments);
        }
    }

    Ok(message)
}

/// Token usage from an OpenAI-dialect response; missing counts read as zero
pub fn openai_usage(response: &Value) -> super::base::Usage {
    let usage = &response["usage"];
    super::base::Usage::new(
        usage["prompt_tokens"].as_i64().unwrap_or(0),
        usage["completion_tokens"].as_i64().unwrap_or(0),
    )
}

pub fn sanitize_function_name(name: &str) -> String {
    let re = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
    re.replace_all(name, "_").to_string()
}

/// Recursively copy a JSON schema, dropping every `additionalProperties`
/// key. Gemini rejects schemas that carry it at any depth.
pub fn strip_additional_properties(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut stripped = Map::new();
            for (key, value) in map {
                if key == "additionalProperties" {
                    continue;
                }
                stripped.insert(key.clone(), strip_additional_properties(value));
            }
            Value::Object(stripped)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(strip_additional_properties).collect())
        }
        other => other.clone(),
    }
}

/// Name of the narration property injected into Copilot tool schemas
pub const INTENT_PROPERTY: &str = "_intent";

/// Copy a tool schema with a required `_intent` string property added, so
/// the model puts its narration inside the call instead of replying with
/// prose and no tool call.
pub fn inject_intent_property(schema: &Value) -> Value {
    let mut schema = match schema {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    let properties = schema
        .entry("properties".to_string())
        .or_insert_with(|| json!({}));
    if let Some(properties) = properties.as_object_mut() {
        properties.insert(
            INTENT_PROPERTY.to_string(),
            json!({
                "type": "string",
                "description": "One short sentence describing what this call is doing.",
            }),
        );
    }

    let required = schema
        .entry("required".to_string())
        .or_insert_with(|| json!([]));
    if let Some(required) = required.as_array_mut() {
        if !required.iter().any(|name| name == INTENT_PROPERTY) {
            required.push(json!(INTENT_PROPERTY));
        }
    }

    Value::Object(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tool::ToolResult;
    use serde_json::json;

    #[test]
    fn test_messages_to_openai_spec_user() {
        let message = Message::user().with_text("Hello");
        let spec = messages_to_openai_spec(&[message], &ImageFormat::OpenAi);

        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["role"], "user");
        assert_eq!(spec[0]["content"], "Hello");
    }

    #[test]
    fn test_messages_to_openai_spec_tool_flow() {
        let mut assistant = Message::assistant()
            .with_text("Adding now.")
            .with_tool_call("call_1", "add", json!({"a": 2, "b": 3}));
        if let MessageContent::ToolCall(call) = &mut assistant.content[1] {
            call.result = Some(ToolResult::text("5"));
        }
        let messages = vec![Message::user().with_text("Add 2 and 3"), assistant];

        let spec = messages_to_openai_spec(&messages, &ImageFormat::OpenAi);

        assert_eq!(spec.len(), 3);
        assert_eq!(spec[1]["role"], "assistant");
        assert_eq!(spec[1]["content"], "Adding now.");
        assert_eq!(spec[1]["tool_calls"][0]["id"], "call_1");
        assert_eq!(
            spec[1]["tool_calls"][0]["function"]["arguments"],
            json!({"a": 2, "b": 3}).to_string()
        );
        assert_eq!(spec[2]["role"], "tool");
        assert_eq!(spec[2]["tool_call_id"], "call_1");
        assert_eq!(spec[2]["content"], json!([{"type": "text", "text": "5"}]));
    }

    #[test]
    fn test_messages_to_openai_spec_image_result() {
        let mut assistant = Message::assistant().with_tool_call("call_1", "capture", json!({}));
        if let MessageContent::ToolCall(call) = &mut assistant.content[0] {
            call.result = Some(ToolResult {
                content: vec![Content::image("aGk=", "image/png")],
                is_error: false,
                meta: None,
            });
        }

        let spec = messages_to_openai_spec(&[assistant], &ImageFormat::OpenAi);

        assert_eq!(spec.len(), 3);
        assert_eq!(spec[1]["role"], "tool");
        assert_eq!(spec[2]["role"], "user");
        assert_eq!(
            spec[2]["content"][0]["image_url"]["url"],
            "data:image/png;base64,aGk="
        );
    }

    #[test]
    fn test_messages_to_openai_spec_tool_error() {
        let mut assistant = Message::assistant().with_text("Done, I think.");
        assistant.tool_error = Some("Error: tool call is expected".to_string());

        let spec = messages_to_openai_spec(&[assistant], &ImageFormat::OpenAi);

        assert_eq!(spec.len(), 2);
        assert_eq!(spec[1]["role"], "user");
        assert_eq!(spec[1]["content"], "Error: tool call is expected");
    }

    #[test]
    fn test_tools_to_openai_spec() {
        let tool = Tool::new(
            "test_tool",
            "A test tool",
            json!({
                "type": "object",
                "properties": {
                    "input": {"type": "string"}
                },
                "required": ["input"]
            }),
        );

        let spec = tools_to_openai_spec(&[tool]).unwrap();

        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["type"], "function");
        assert_eq!(spec[0]["function"]["name"], "test_tool");
    }

    #[test]
    fn test_tools_to_openai_spec_duplicate() {
        let tool = Tool::new("dup", "Duplicated", json!({"type": "object"}));
        let result = tools_to_openai_spec(&[tool.clone(), tool]);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Duplicate tool name"));
    }

    #[test]
    fn test_openai_response_to_message_text() {
        let response = json!({
            "choices": [{
                "message": {"role": "assistant", "content": "Hello!"}
            }]
        });

        let message = openai_response_to_message(&response).unwrap();
        assert_eq!(message.text(), "Hello!");
        assert!(!message.has_tool_calls());
    }

    #[test]
    fn test_openai_response_to_message_tool_call() {
        let response = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "add", "arguments": "{\"a\":2,\"b\":3}"}
                    }]
                }
            }]
        });

        let message = openai_response_to_message(&response).unwrap();
        let calls = message.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "add");
        assert_eq!(calls[0].arguments, json!({"a": 2, "b": 3}));
    }

    #[test]
    fn test_openai_response_to_message_broken_arguments() {
        let response = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {"name": "add", "arguments": "not json {"}
                    }]
                }
            }]
        });

        let message = openai_response_to_message(&response).unwrap();
        assert_eq!(
            message.tool_calls()[0].arguments,
            Value::String("not json {".to_string())
        );
    }

    #[test]
    fn test_openai_usage_defaults() {
        let usage = openai_usage(&json!({}));
        assert_eq!(usage.input_tokens, 0);
        assert_eq!(usage.output_tokens, 0);

        let usage = openai_usage(&json!({"usage": {"prompt_tokens": 3, "completion_tokens": 9}}));
        assert_eq!(usage.input_tokens, 3);
        assert_eq!(usage.output_tokens, 9);
    }

    #[test]
    fn test_sanitize_function_name() {
        assert_eq!(sanitize_function_name("hello-world"), "hello-world");
        assert_eq!(sanitize_function_name("hello world"), "hello_world");
        assert_eq!(sanitize_function_name("hello@world"), "hello_world");
    }

    #[test]
    fn test_strip_additional_properties() {
        let schema = json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "filters": {
                    "type": "object",
                    "additionalProperties": {"type": "string"},
                    "properties": {
                        "tags": {"type": "array", "items": {"type": "object", "additionalProperties": false}}
                    }
                }
            }
        });

        let stripped = strip_additional_properties(&schema);
        assert!(!stripped.to_string().contains("additionalProperties"));
        // everything else survives
        assert_eq!(stripped["properties"]["filters"]["type"], "object");
        assert_eq!(
            stripped["properties"]["filters"]["properties"]["tags"]["items"]["type"],
            "object"
        );
    }

    #[test]
    fn test_inject_intent_property() {
        let schema = json!({
            "type": "object",
            "properties": {"url": {"type": "string"}},
            "required": ["url"]
        });

        let injected = inject_intent_property(&schema);
        assert_eq!(injected["properties"]["_intent"]["type"], "string");
        assert_eq!(injected["required"], json!(["url", "_intent"]));

        // injecting twice stays stable
        let twice = inject_intent_property(&injected);
        assert_eq!(twice["required"], json!(["url", "_intent"]));
    }
}
