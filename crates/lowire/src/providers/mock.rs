use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::models::message::{Conversation, Message};
use crate::providers::base::{Completion, ModelOptions, Provider, Usage};

/// A mock provider that returns pre-configured completions for testing and
/// records every conversation it was asked to complete
pub struct MockProvider {
    completions: Arc<Mutex<Vec<Completion>>>,
    requests: Arc<Mutex<Vec<Conversation>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of response messages
    pub fn new(messages: Vec<Message>) -> Self {
        let completions = messages
            .into_iter()
            .map(|message| Completion {
                message,
                usage: Usage::default(),
            })
            .collect();
        Self {
            completions: Arc::new(Mutex::new(completions)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Same, with explicit usage per reply
    pub fn with_usage(completions: Vec<Completion>) -> Self {
        Self {
            completions: Arc::new(Mutex::new(completions)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of completions served so far
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Conversations received, in order
    pub fn requests(&self) -> Vec<Conversation> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn complete(
        &self,
        conversation: &Conversation,
        _options: &ModelOptions,
    ) -> Result<Completion> {
        self.requests.lock().unwrap().push(conversation.clone());

        let mut completions = self.completions.lock().unwrap();
        if completions.is_empty() {
            // Return empty response if no more pre-configured responses
            Ok(Completion {
                message: Message::assistant().with_text(""),
                usage: Usage::default(),
            })
        } else {
            Ok(completions.remove(0))
        }
    }
}
