//! Conversation summarisation -- render all but the latest turn as an
//! indented text history so the next provider call carries a compact
//! transcript instead of the full message list.
//!
//! The summary keeps, per earlier turn: the assistant's narration, each
//! tool call with its arguments, any history entries the tools reported
//! under `_meta["dev.lowire/history"]`, and the turn's tool error. Named
//! state reported under `_meta["dev.lowire/state"]` is merged across turns
//! and appended as top-level `state:` blocks. The latest assistant message
//! is not summarised at all; it is handed back verbatim so the in-flight
//! turn keeps its exact tool calls and signatures.

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::models::message::{Conversation, Message, MessageContent};
use crate::models::tool::{META_HISTORY, META_STATE};

/// A label plus optional parenthesised parameter, inline text, and nested
/// children, rendered with two spaces per nesting level
struct Block {
    label: String,
    param: Option<String>,
    text: Option<String>,
    children: Vec<Block>,
}

impl Block {
    fn new<S: Into<String>>(label: S) -> Self {
        Self {
            label: label.into(),
            param: None,
            text: None,
            children: Vec::new(),
        }
    }

    fn param<S: Into<String>>(mut self, param: S) -> Self {
        self.param = Some(param.into());
        self
    }

    fn text<S: Into<String>>(mut self, text: S) -> Self {
        self.text = Some(text.into());
        self
    }

    fn push(&mut self, child: Block) {
        self.children.push(child);
    }

    fn render(&self, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        out.push_str(&indent);
        out.push_str(&self.label);
        out.push(':');
        if let Some(param) = &self.param {
            out.push_str(&format!(" ({param})"));
        }
        if let Some(text) = &self.text {
            let mut lines = text.lines();
            if let Some(first) = lines.next() {
                out.push(' ');
                out.push_str(first);
            }
            // continuation lines sit at the child level, uniformly
            for line in lines {
                out.push('\n');
                out.push_str(&"  ".repeat(depth + 1));
                out.push_str(line);
            }
        }
        out.push('\n');
        for child in &self.children {
            child.render(depth + 1, out);
        }
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub summary: String,
    pub last_message: Option<Message>,
}

/// Summarise every assistant turn except the latest into an indented text
/// history, returning the latest assistant message untouched
pub fn summarize(task: &str, conversation: &Conversation) -> Summary {
    let assistants = conversation.assistant_messages();
    let kept = assistants.len().saturating_sub(1);

    let mut blocks = vec![Block::new("task").text(task)];
    let mut combined_state: BTreeMap<String, Value> = BTreeMap::new();

    for (index, message) in assistants.iter().take(kept).enumerate() {
        let mut step = Block::new("step").param(format!("turn={}", index + 1));

        let title = message.text();
        if !title.is_empty() {
            step.push(Block::new("title").text(title));
        }

        for content in &message.content {
            let MessageContent::ToolCall(call) = content else {
                continue;
            };

            let mut tool_call = Block::new("tool-call");
            tool_call.push(Block::new("name").text(&call.name));
            if let Some(arguments) = call.arguments.as_object() {
                if !arguments.is_empty() {
                    let mut rendered = Block::new("arguments");
                    for (key, value) in arguments {
                        rendered.push(Block::new(key).text(value.to_string()));
                    }
                    tool_call.push(rendered);
                }
            }
            step.push(tool_call);

            let Some(result) = &call.result else {
                continue;
            };
            if let Some(entries) = result.meta_entry(META_HISTORY).and_then(Value::as_array) {
                for entry in entries {
                    let category = entry["category"].as_str().unwrap_or("history");
                    step.push(Block::new(category).text(render_value(&entry["content"])));
                }
            }
            // state from the latest turn is excluded: that message rides
            // along verbatim and still carries it
            if let Some(state) = result.meta_entry(META_STATE).and_then(Value::as_object) {
                for (name, value) in state {
                    combined_state.insert(name.clone(), value.clone());
                }
            }
        }

        if let Some(error) = &message.tool_error {
            step.push(Block::new("error").text(error));
        }

        blocks.push(step);
    }

    for (name, value) in &combined_state {
        blocks.push(
            Block::new("state")
                .param(format!("name={name}"))
                .text(render_value(value)),
        );
    }

    let mut summary = String::new();
    for block in &blocks {
        block.render(0, &mut summary);
    }

    debug!(
        turns = kept,
        state_entries = combined_state.len(),
        "summarised conversation"
    );

    Summary {
        summary,
        last_message: assistants.last().map(|message| (*message).clone()),
    }
}
