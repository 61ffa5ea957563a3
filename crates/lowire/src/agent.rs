use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::errors::AgentError;
use crate::models::message::{Conversation, Message, MessageContent};
use crate::models::tool::{Tool, ToolCall, ToolResult, META_INTENT};
use crate::providers::base::{ModelOptions, Provider, Usage};
use crate::providers::factory;
use crate::replay::{cached_complete, ReplayCaches};
use crate::summarize::summarize;

pub const DEFAULT_MAX_TURNS: usize = 100;

/// The distinguished tool whose arguments become the run's result
pub const REPORT_RESULT: &str = "report_result";

const AGENT_PREAMBLE: &str = "You are an autonomous agent completing a task on behalf of a user. \
Work step by step: use the available tools to make progress, inspect each result before \
deciding the next step, and recover from tool errors where possible. \
When the task is complete, call the \"report_result\" tool with the final answer. \
Do not reply with prose alone.";

const TOOL_CALL_EXPECTED: &str = "Error: tool call is expected in every assistant message. \
Call \"report_result\" when complete.";
const TOOL_CALL_DISALLOWED: &str = "Tool call is disallowed.";
const TOOL_RESULT_DISALLOWED: &str = "Tool result is disallowed to be reported.";

fn default_result_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"result": {"type": "string"}},
        "required": ["result"],
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookAction {
    #[default]
    Continue,
    Break,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolHookAction {
    #[default]
    Continue,
    Break,
    /// Refuse this call or its result; the run continues
    Disallow,
}

/// Executes the tool calls the model makes. One handler serves every tool;
/// it dispatches on `call.name`.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, call: ToolCall) -> Result<ToolResult>;
}

/// Observation points in the turn state machine. Every method defaults to
/// `Continue`; implement only the ones you care about.
#[async_trait]
pub trait Hooks: Send + Sync {
    async fn before_turn(
        &self,
        _conversation: &Conversation,
        _total_usage: &Usage,
        _budget_tokens: Option<i64>,
    ) -> HookAction {
        HookAction::Continue
    }

    async fn after_turn(&self, _message: &Message, _total_usage: &Usage) -> HookAction {
        HookAction::Continue
    }

    async fn before_tool_call(&self, _call: &ToolCall) -> ToolHookAction {
        ToolHookAction::Continue
    }

    async fn after_tool_call(&self, _call: &ToolCall, _result: &ToolResult) -> ToolHookAction {
        ToolHookAction::Continue
    }

    async fn on_tool_call_error(&self, _call: &ToolCall, _error: &anyhow::Error) -> HookAction {
        HookAction::Continue
    }
}

struct DefaultHooks;

impl Hooks for DefaultHooks {}

#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub model: String,
    pub max_tokens: Option<i64>,
    pub temperature: Option<f32>,
    pub reasoning: bool,
    pub debug: bool,
    pub max_turns: usize,
    /// Hard token ceiling for the whole run; also caps each turn's
    /// `max_tokens` at whatever is left
    pub budget_tokens: Option<i64>,
    /// Input schema for `report_result`; a plain `{result: string}` object
    /// when unset
    pub result_schema: Option<Value>,
    /// Compress prior turns into a textual history before each provider call
    pub summarize: bool,
    pub tools: Vec<Tool>,
}

impl AgentOptions {
    pub fn new<S: Into<String>>(model: S) -> Self {
        Self {
            model: model.into(),
            max_tokens: None,
            temperature: None,
            reasoning: false,
            debug: false,
            max_turns: DEFAULT_MAX_TURNS,
            budget_tokens: None,
            result_schema: None,
            summarize: false,
            tools: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The model reported a result
    Ok,
    /// A hook voted to stop, or the turn limit was reached with summarize on
    Break,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub result: Option<Value>,
    pub status: RunStatus,
    pub usage: Usage,
    pub turns: usize,
}

/// The agent loop: ask the provider for the next step, run the tools it
/// picked, attach their results, repeat until it reports a result.
pub struct Agent {
    provider: Box<dyn Provider>,
    options: AgentOptions,
    tool_handler: Option<Arc<dyn ToolHandler>>,
    hooks: Arc<dyn Hooks>,
    caches: Option<ReplayCaches>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("provider", &self.provider.name())
            .field("options", &self.options)
            .field("caches", &self.caches.is_some())
            .finish()
    }
}

impl Agent {
    /// Create an agent for a registry provider name, with credentials from
    /// the environment
    pub fn new(provider_name: &str, options: AgentOptions) -> Result<Self> {
        Ok(Self::with_provider(
            factory::get_provider(provider_name)?,
            options,
        ))
    }

    /// Create an agent around an already-constructed provider
    pub fn with_provider(provider: Box<dyn Provider>, options: AgentOptions) -> Self {
        Self {
            provider,
            options,
            tool_handler: None,
            hooks: Arc::new(DefaultHooks),
            caches: None,
        }
    }

    pub fn tool_handler(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.tool_handler = Some(handler);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn Hooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn caches(mut self, caches: ReplayCaches) -> Self {
        self.caches = Some(caches);
        self
    }

    /// Hand the caches back, typically to persist `output` after a run
    pub fn take_caches(&mut self) -> Option<ReplayCaches> {
        self.caches.take()
    }

    fn report_result_tool(&self) -> Tool {
        Tool::new(
            REPORT_RESULT,
            "Report the final result of the task. Calling this tool ends the run.",
            self.options
                .result_schema
                .clone()
                .unwrap_or_else(default_result_schema),
        )
    }

    pub async fn run(&mut self, task: &str) -> Result<RunOutcome> {
        let mut tools = self.options.tools.clone();
        tools.push(self.report_result_tool());

        let mut conversation = Conversation::new(
            AGENT_PREAMBLE,
            vec![Message::user().with_text(task)],
            tools,
        );
        let mut total_usage = Usage::default();
        let mut remaining_budget = self.options.budget_tokens;

        for turn in 0..self.options.max_turns {
            if let Some(remaining) = remaining_budget {
                if remaining <= 0 {
                    let budget = self.options.budget_tokens.unwrap_or_default();
                    return Err(AgentError::BudgetExhausted(budget).into());
                }
            }

            // the provider sees a compacted transcript, the original keeps
            // growing untouched
            let summarized = self.options.summarize.then(|| {
                let summary = summarize(task, &conversation);
                let mut messages = vec![Message::user().with_text(&summary.summary)];
                messages.extend(summary.last_message);
                Conversation::new(
                    conversation.system_prompt.clone(),
                    messages,
                    conversation.tools.clone(),
                )
            });
            let call_conversation = summarized.as_ref().unwrap_or(&conversation);

            if self
                .hooks
                .before_turn(call_conversation, &total_usage, remaining_budget)
                .await
                == HookAction::Break
            {
                return Ok(break_outcome(total_usage, turn));
            }

            let model_options = ModelOptions {
                model: self.options.model.clone(),
                max_tokens: remaining_budget.or(self.options.max_tokens),
                temperature: self.options.temperature,
                reasoning: self.options.reasoning,
                debug: self.options.debug,
            };

            let completion = cached_complete(
                self.provider.as_ref(),
                call_conversation,
                self.caches.as_mut(),
                &model_options,
            )
            .await?;

            total_usage.add(&completion.usage);
            if let Some(remaining) = &mut remaining_budget {
                *remaining -= completion.usage.total();
            }
            info!(
                turn,
                input_tokens = completion.usage.input_tokens,
                output_tokens = completion.usage.output_tokens,
                "completed provider turn"
            );

            if self.hooks.after_turn(&completion.message, &total_usage).await == HookAction::Break {
                return Ok(break_outcome(total_usage, turn + 1));
            }

            conversation.messages.push(completion.message);
            let message_index = conversation.messages.len() - 1;

            let pending: Vec<(usize, String, String, Value)> = conversation.messages
                [message_index]
                .content
                .iter()
                .enumerate()
                .filter_map(|(part_index, content)| {
                    content.as_tool_call().map(|call| {
                        (
                            part_index,
                            call.id.clone(),
                            call.name.clone(),
                            call.arguments.clone(),
                        )
                    })
                })
                .collect();

            if pending.is_empty() {
                warn!(turn, "assistant message carried no tool call");
                conversation.messages[message_index].tool_error =
                    Some(TOOL_CALL_EXPECTED.to_string());
                continue;
            }

            for (part_index, call_id, name, mut arguments) in pending {
                if name == REPORT_RESULT {
                    debug!(turn, "result reported");
                    return Ok(RunOutcome {
                        result: Some(arguments),
                        status: RunStatus::Ok,
                        usage: total_usage,
                        turns: turn + 1,
                    });
                }

                if let Some(intent) = conversation.messages[message_index]
                    .intent_for_call(&call_id)
                    .map(String::from)
                {
                    if let Some(object) = arguments.as_object_mut() {
                        let meta = object
                            .entry("_meta".to_string())
                            .or_insert_with(|| json!({}));
                        if let Some(meta) = meta.as_object_mut() {
                            meta.insert(META_INTENT.to_string(), json!(intent));
                        }
                    }
                }

                let call = ToolCall::new(&name, arguments);

                match self.hooks.before_tool_call(&call).await {
                    ToolHookAction::Disallow => {
                        attach_result(
                            &mut conversation,
                            message_index,
                            part_index,
                            ToolResult::error(TOOL_CALL_DISALLOWED),
                        );
                        continue;
                    }
                    ToolHookAction::Break => return Ok(break_outcome(total_usage, turn + 1)),
                    ToolHookAction::Continue => {}
                }

                debug!(tool = %name, id = %call_id, "dispatching tool call");
                let dispatched = match &self.tool_handler {
                    Some(handler) => handler.call(call.clone()).await,
                    None => Err(AgentError::ToolNotFound(name.clone()).into()),
                };

                match dispatched {
                    Ok(mut result) => {
                        match self.hooks.after_tool_call(&call, &result).await {
                            ToolHookAction::Disallow => {
                                result = ToolResult::error(TOOL_RESULT_DISALLOWED);
                            }
                            ToolHookAction::Break => {
                                return Ok(break_outcome(total_usage, turn + 1))
                            }
                            ToolHookAction::Continue => {}
                        }
                        attach_result(&mut conversation, message_index, part_index, result);
                    }
                    Err(error) => {
                        warn!(tool = %name, error = %error, "tool call failed");
                        if self.hooks.on_tool_call_error(&call, &error).await == HookAction::Break
                        {
                            return Ok(break_outcome(total_usage, turn + 1));
                        }
                        attach_result(
                            &mut conversation,
                            message_index,
                            part_index,
                            ToolResult::error(format!(
                                "Error while executing tool \"{name}\": {error}\n\nPlease try to recover and complete the task."
                            )),
                        );
                    }
                }
            }
        }

        if self.options.summarize {
            // hand the transcript back instead of failing outright
            let summary = summarize(task, &conversation);
            return Ok(RunOutcome {
                result: Some(Value::String(summary.summary)),
                status: RunStatus::Break,
                usage: total_usage,
                turns: self.options.max_turns,
            });
        }
        Err(AgentError::MaxAttemptsReached.into())
    }
}

fn break_outcome(usage: Usage, turns: usize) -> RunOutcome {
    RunOutcome {
        result: None,
        status: RunStatus::Break,
        usage,
        turns,
    }
}

fn attach_result(
    conversation: &mut Conversation,
    message_index: usize,
    part_index: usize,
    result: ToolResult,
) {
    if let Some(MessageContent::ToolCall(call)) =
        conversation.messages[message_index].content.get_mut(part_index)
    {
        call.result = Some(result);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::TextPart;
    use crate::providers::base::Completion;
    use crate::providers::mock::MockProvider;
    use anyhow::anyhow;
    use std::sync::Mutex;

    fn report(result: Value) -> Message {
        Message::assistant().with_tool_call("call_report", REPORT_RESULT, result)
    }

    struct AddHandler {
        calls: Mutex<Vec<ToolCall>>,
    }

    impl AddHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ToolHandler for AddHandler {
        async fn call(&self, call: ToolCall) -> Result<ToolResult> {
            self.calls.lock().unwrap().push(call.clone());
            match call.name.as_str() {
                "add" => {
                    let a = call.arguments["a"].as_i64().unwrap_or(0);
                    let b = call.arguments["b"].as_i64().unwrap_or(0);
                    Ok(ToolResult::text((a + b).to_string()))
                }
                "explode" => Err(anyhow!("boom")),
                other => Err(AgentError::ToolNotFound(other.to_string()).into()),
            }
        }
    }

    /// Records every conversation the provider is asked to complete
    struct Recorder {
        conversations: Arc<Mutex<Vec<Conversation>>>,
    }

    impl Recorder {
        fn new() -> (Arc<Self>, Arc<Mutex<Vec<Conversation>>>) {
            let conversations = Arc::new(Mutex::new(Vec::new()));
            (
                Arc::new(Self {
                    conversations: conversations.clone(),
                }),
                conversations,
            )
        }
    }

    #[async_trait]
    impl Hooks for Recorder {
        async fn before_turn(
            &self,
            conversation: &Conversation,
            _total_usage: &Usage,
            _budget_tokens: Option<i64>,
        ) -> HookAction {
            self.conversations.lock().unwrap().push(conversation.clone());
            HookAction::Continue
        }
    }

    fn agent(provider: MockProvider, options: AgentOptions) -> Agent {
        Agent::with_provider(Box::new(provider), options)
    }

    #[tokio::test]
    async fn test_report_result_ends_the_run() -> Result<()> {
        let provider = MockProvider::new(vec![report(json!({"result": "Hello world"}))]);
        let mut agent = agent(provider, AgentOptions::new("test-model"));

        let outcome = agent.run("This is a test").await?;

        assert_eq!(outcome.status, RunStatus::Ok);
        assert_eq!(outcome.result, Some(json!({"result": "Hello world"})));
        assert_eq!(outcome.turns, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_tool_dispatch_then_report() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant()
                .with_text("Adding.")
                .with_tool_call("call_1", "add", json!({"a": 2, "b": 3})),
            report(json!({"sum": 5})),
        ]);
        let handler = AddHandler::new();
        let mut agent =
            agent(provider, AgentOptions::new("test-model")).tool_handler(handler.clone());

        let outcome = agent.run("Use add tool to add 2 and 3.").await?;

        assert_eq!(outcome.result, Some(json!({"sum": 5})));
        assert_eq!(outcome.turns, 2);
        assert_eq!(handler.calls.lock().unwrap().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_second_request_carries_attached_result() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant().with_tool_call("call_1", "add", json!({"a": 2, "b": 3})),
            report(json!({"sum": 5})),
        ]);
        let (recorder, conversations) = Recorder::new();
        let mut agent = agent(provider, AgentOptions::new("test-model"))
            .tool_handler(AddHandler::new())
            .hooks(recorder);

        agent.run("Add 2 and 3").await?;

        let conversations = conversations.lock().unwrap();
        assert_eq!(conversations.len(), 2);
        let call = conversations[1].messages[1].tool_calls()[0].clone();
        assert_eq!(call.id, "call_1");
        assert_eq!(call.result.unwrap().text_content(), "5");
        Ok(())
    }

    #[tokio::test]
    async fn test_results_attach_in_emission_order() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant()
                .with_tool_call("call_1", "add", json!({"a": 1, "b": 1}))
                .with_tool_call("call_2", "add", json!({"a": 2, "b": 2})),
            report(json!({"result": "done"})),
        ]);
        let (recorder, conversations) = Recorder::new();
        let handler = AddHandler::new();
        let mut agent = agent(provider, AgentOptions::new("test-model"))
            .tool_handler(handler.clone())
            .hooks(recorder);

        agent.run("Add twice").await?;

        let calls = handler.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].arguments["a"], 1);
        assert_eq!(calls[1].arguments["a"], 2);

        let conversations = conversations.lock().unwrap();
        let attached = conversations[1].messages[1].tool_calls();
        assert_eq!(attached[0].result.as_ref().unwrap().text_content(), "2");
        assert_eq!(attached[1].result.as_ref().unwrap().text_content(), "4");
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_tool_call_sets_tool_error() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant().with_text("I think we're done."),
            report(json!({"result": "ok"})),
        ]);
        let (recorder, conversations) = Recorder::new();
        let mut agent = agent(provider, AgentOptions::new("test-model")).hooks(recorder);

        let outcome = agent.run("Say hi").await?;

        assert_eq!(outcome.status, RunStatus::Ok);
        let conversations = conversations.lock().unwrap();
        assert_eq!(
            conversations[1].messages[1].tool_error.as_deref(),
            Some(
                "Error: tool call is expected in every assistant message. \
Call \"report_result\" when complete."
            )
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_disallowed_tool_call_gets_error_result() -> Result<()> {
        struct DisallowAll;
        #[async_trait]
        impl Hooks for DisallowAll {
            async fn before_tool_call(&self, _call: &ToolCall) -> ToolHookAction {
                ToolHookAction::Disallow
            }
        }

        let provider = MockProvider::new(vec![
            Message::assistant().with_tool_call("call_1", "add", json!({"a": 1, "b": 1})),
            report(json!({"result": "gave up"})),
        ]);
        let handler = AddHandler::new();
        let mut agent = agent(provider, AgentOptions::new("test-model"))
            .tool_handler(handler.clone())
            .hooks(Arc::new(DisallowAll));

        let outcome = agent.run("Add").await?;

        assert_eq!(outcome.status, RunStatus::Ok);
        // the handler never ran
        assert!(handler.calls.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_disallowed_result_is_overwritten() -> Result<()> {
        struct DisallowResults {
            conversations: Arc<Mutex<Vec<Conversation>>>,
        }
        #[async_trait]
        impl Hooks for DisallowResults {
            async fn before_turn(
                &self,
                conversation: &Conversation,
                _total_usage: &Usage,
                _budget_tokens: Option<i64>,
            ) -> HookAction {
                self.conversations.lock().unwrap().push(conversation.clone());
                HookAction::Continue
            }
            async fn after_tool_call(
                &self,
                _call: &ToolCall,
                _result: &ToolResult,
            ) -> ToolHookAction {
                ToolHookAction::Disallow
            }
        }

        let provider = MockProvider::new(vec![
            Message::assistant().with_tool_call("call_1", "add", json!({"a": 1, "b": 1})),
            report(json!({"result": "ok"})),
        ]);
        let conversations = Arc::new(Mutex::new(Vec::new()));
        let mut agent = agent(provider, AgentOptions::new("test-model"))
            .tool_handler(AddHandler::new())
            .hooks(Arc::new(DisallowResults {
                conversations: conversations.clone(),
            }));

        agent.run("Add").await?;

        let conversations = conversations.lock().unwrap();
        let result = conversations[1].messages[1].tool_calls()[0]
            .result
            .clone()
            .unwrap();
        assert!(result.is_error);
        assert_eq!(result.text_content(), "Tool result is disallowed to be reported.");
        Ok(())
    }

    #[tokio::test]
    async fn test_break_before_first_turn() -> Result<()> {
        struct BreakImmediately;
        #[async_trait]
        impl Hooks for BreakImmediately {
            async fn before_turn(
                &self,
                _conversation: &Conversation,
                _total_usage: &Usage,
                _budget_tokens: Option<i64>,
            ) -> HookAction {
                HookAction::Break
            }
        }

        let provider = MockProvider::new(vec![report(json!({"result": "never"}))]);
        let mut agent =
            agent(provider, AgentOptions::new("test-model")).hooks(Arc::new(BreakImmediately));

        let outcome = agent.run("Anything").await?;

        assert_eq!(outcome.status, RunStatus::Break);
        assert_eq!(outcome.result, None);
        assert_eq!(outcome.turns, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_tool_failure_surfaces_and_run_recovers() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant().with_tool_call("call_1", "explode", json!({})),
            report(json!({"result": "recovered"})),
        ]);
        let (recorder, conversations) = Recorder::new();
        let mut agent = agent(provider, AgentOptions::new("test-model"))
            .tool_handler(AddHandler::new())
            .hooks(recorder);

        let outcome = agent.run("Explode").await?;
        assert_eq!(outcome.status, RunStatus::Ok);

        let conversations = conversations.lock().unwrap();
        let result = conversations[1].messages[1].tool_calls()[0]
            .result
            .clone()
            .unwrap();
        assert!(result.is_error);
        assert_eq!(
            result.text_content(),
            "Error while executing tool \"explode\": boom\n\nPlease try to recover and complete the task."
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_budget_exhaustion() {
        let expensive = Completion {
            message: Message::assistant().with_text("thinking out loud"),
            usage: Usage::new(400, 200),
        };
        let provider = MockProvider::with_usage(vec![expensive.clone(), expensive]);

        let mut options = AgentOptions::new("test-model");
        options.budget_tokens = Some(500);
        let mut agent = agent(provider, options);

        let err = agent.run("Spend it all").await.unwrap_err();
        assert_eq!(err.to_string(), "Budget tokens 500 exhausted");
    }

    #[tokio::test]
    async fn test_max_turns_exhausted() {
        let provider = MockProvider::new(vec![
            Message::assistant().with_text("no call"),
            Message::assistant().with_text("still no call"),
        ]);
        let mut options = AgentOptions::new("test-model");
        options.max_turns = 2;
        let mut agent = agent(provider, options);

        let err = agent.run("Stall").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to perform step, max attempts reached"
        );
    }

    #[tokio::test]
    async fn test_max_turns_with_summarize_returns_summary() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant().with_text("no call"),
            Message::assistant().with_text("still no call"),
        ]);
        let mut options = AgentOptions::new("test-model");
        options.max_turns = 2;
        options.summarize = true;
        let mut agent = agent(provider, options);

        let outcome = agent.run("Stall").await?;

        assert_eq!(outcome.status, RunStatus::Break);
        let summary = outcome.result.unwrap();
        assert!(summary.as_str().unwrap().starts_with("task: Stall"));
        Ok(())
    }

    #[tokio::test]
    async fn test_summarized_provider_call_shape() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant()
                .with_text("Adding.")
                .with_tool_call("call_1", "add", json!({"a": 2, "b": 3})),
            report(json!({"sum": 5})),
        ]);
        let (recorder, conversations) = Recorder::new();
        let mut options = AgentOptions::new("test-model");
        options.summarize = true;
        let mut agent = agent(provider, options)
            .tool_handler(AddHandler::new())
            .hooks(recorder);

        let outcome = agent.run("Add 2 and 3").await?;
        assert_eq!(outcome.result, Some(json!({"sum": 5})));

        let conversations = conversations.lock().unwrap();
        // second provider call sees [summary, latest assistant message]
        assert_eq!(conversations[1].messages.len(), 2);
        assert!(conversations[1].messages[0]
            .text()
            .starts_with("task: Add 2 and 3"));
        assert_eq!(conversations[1].messages[1].text(), "Adding.");
        Ok(())
    }

    #[tokio::test]
    async fn test_intent_injected_into_meta() -> Result<()> {
        let mut narrated =
            Message::assistant().with_tool_call("call_1", "add", json!({"a": 1, "b": 2}));
        narrated.content.insert(
            0,
            MessageContent::Text(TextPart {
                text: "Adding one and two".to_string(),
                thought_signature: None,
                copilot_tool_call_id: Some("call_1".to_string()),
            }),
        );

        let provider = MockProvider::new(vec![narrated, report(json!({"result": "3"}))]);
        let handler = AddHandler::new();
        let mut agent =
            agent(provider, AgentOptions::new("test-model")).tool_handler(handler.clone());

        agent.run("Add").await?;

        let calls = handler.calls.lock().unwrap();
        assert_eq!(
            calls[0].arguments["_meta"][META_INTENT],
            "Adding one and two"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_report_result_uses_custom_schema() -> Result<()> {
        let provider = MockProvider::new(vec![report(json!({"magic": 42}))]);
        let (recorder, conversations) = Recorder::new();

        let mut options = AgentOptions::new("test-model");
        options.result_schema = Some(json!({
            "type": "object",
            "properties": {"magic": {"type": "number"}},
            "required": ["magic"],
        }));
        let mut agent = agent(provider, options).hooks(recorder);

        let outcome = agent.run("Reply with 42 using the given schema").await?;
        assert_eq!(outcome.result, Some(json!({"magic": 42})));

        let conversations = conversations.lock().unwrap();
        let report_tool = conversations[0]
            .tools
            .iter()
            .find(|tool| tool.name == REPORT_RESULT)
            .unwrap();
        assert_eq!(
            report_tool.input_schema["properties"]["magic"]["type"],
            "number"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_no_handler_surfaces_tool_not_found() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant().with_tool_call("call_1", "mystery", json!({})),
            report(json!({"result": "ok"})),
        ]);
        let (recorder, conversations) = Recorder::new();
        let mut agent = agent(provider, AgentOptions::new("test-model")).hooks(recorder);

        let outcome = agent.run("Do something").await?;
        assert_eq!(outcome.status, RunStatus::Ok);

        let conversations = conversations.lock().unwrap();
        let result = conversations[1].messages[1].tool_calls()[0]
            .result
            .clone()
            .unwrap();
        assert!(result.is_error);
        assert!(result.text_content().contains("Tool not found: mystery"));
        Ok(())
    }
}
