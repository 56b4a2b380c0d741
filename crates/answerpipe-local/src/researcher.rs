//! One research turn: drive the model with the search tool bound, route the
//! streamed text to the right sink, and extend the transcript.

use crate::config::ProviderProfile;
use crate::search::ProviderRegistry;
use crate::search_tool::SearchTool;
use answerpipe_core::{
    has_tool_response, DeltaEvent, GuardedSink, Message, ModelBackend, ModelRequest, Part, Result,
    Role, Sink, Tool, ToolCallPart, ToolResultPart, UiElement, UiStream,
};
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const MAX_TOKENS: u32 = 2500;
pub const TOOL_ERROR_SUFFIX: &str = "\nError occurred while executing the tool";
pub const DEFAULT_MAX_TURNS: usize = 3;

/// Main model plus the optional cheaper model used for post-tool turns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: String,
    pub sub_model: Option<String>,
}

impl ModelSelection {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            sub_model: None,
        }
    }

    pub fn with_sub_model(mut self, sub_model: Option<String>) -> Self {
        self.sub_model = sub_model;
        self
    }

    /// The sub-model only applies to tool-limited providers once a tool
    /// response is already in the history.
    pub fn pick(&self, profile: ProviderProfile, has_tool_response: bool) -> &str {
        if profile == ProviderProfile::ToolLimited && has_tool_response {
            self.sub_model.as_deref().unwrap_or(&self.model)
        } else {
            &self.model
        }
    }
}

/// The consumer-owned outputs of one turn.
#[derive(Clone)]
pub struct TurnSinks {
    pub ui: Arc<dyn UiStream>,
    pub answer: Arc<dyn Sink>,
    pub text: Arc<dyn Sink>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TurnOutcome {
    pub full_response: String,
    pub had_error: bool,
    /// Empty when the model never reported a normal finish.
    pub finish_reason: String,
}

/// Rewrite `tool` messages as assistant text for providers without a native
/// tool-result role.
pub fn transform_tool_messages(messages: &[Message]) -> Vec<Message> {
    messages
        .iter()
        .map(|m| {
            if m.role != Role::Tool {
                return m.clone();
            }
            let parts = m
                .tool_results()
                .into_iter()
                .map(|r| Part::Text {
                    text: format!(
                        "Tool {} ({}) returned: {}",
                        r.tool_name, r.call_id, r.result
                    ),
                })
                .collect::<Vec<_>>();
            if parts.is_empty() {
                Message::new(Role::Assistant, m.text())
            } else {
                Message::parts(Role::Assistant, parts)
            }
        })
        .collect()
}

pub fn system_prompt(now: chrono::DateTime<chrono::Local>) -> String {
    format!(
        "As a professional search expert, you can search for any information on the web.\n\
         For each user query, use the search results to their fullest to provide additional information and assistance in your response.\n\
         If there are images relevant to your answer, include them as well.\n\
         Address the user's question directly, augmenting your response with insights from the search results.\n\
         Whenever quoting or referencing information from a specific URL, always cite the source URL using the [[number]](url) format. Multiple citations can be included as needed, e.g., [[number]](url), [[number]](url).\n\
         The number must always match the order of the search results.\n\
         If the user gives a domain instead of a URL, put it in the include_domains of the search tool.\n\
         Match the language of the response to the user's language. Current date and time: {}",
        now.format("%Y-%m-%d %H:%M:%S")
    )
}

/// Mutable state of one turn. Only the turn loop touches it.
struct Turn {
    answer: GuardedSink,
    text: GuardedSink,
    full_response: String,
    finish_reason: String,
    had_error: Arc<AtomicBool>,
    route_to_text: bool,
}

impl Turn {
    fn both_active(&self) -> bool {
        self.answer.is_active() && self.text.is_active()
    }

    fn mark_error(&self) {
        self.had_error.store(true, Ordering::SeqCst);
    }

    fn push_streamed(&mut self) {
        if self.route_to_text {
            self.text.write(&self.full_response);
        } else {
            self.answer.write(&self.full_response);
        }
    }

    fn push_both(&mut self) {
        self.text.write(&self.full_response);
        self.answer.write(&self.full_response);
    }

    fn close(&mut self) {
        self.answer.close();
        self.text.close();
    }
}

pub struct Researcher {
    backend: Arc<dyn ModelBackend>,
    providers: Arc<ProviderRegistry>,
    profile: ProviderProfile,
    models: ModelSelection,
}

impl Researcher {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        providers: Arc<ProviderRegistry>,
        profile: ProviderProfile,
        models: ModelSelection,
    ) -> Self {
        Self {
            backend,
            providers,
            profile,
            models,
        }
    }

    /// Run one turn and append its assistant (and tool) messages to `messages`.
    ///
    /// Both sinks are closed before this returns, whatever happened upstream.
    pub async fn run(&self, messages: &mut Vec<Message>, sinks: TurnSinks) -> TurnOutcome {
        let has_tool_result = has_tool_response(messages);
        let mut turn = Turn {
            answer: GuardedSink::new("answer", sinks.answer),
            text: GuardedSink::new("text", sinks.text),
            full_response: String::new(),
            finish_reason: String::new(),
            had_error: Arc::new(AtomicBool::new(false)),
            route_to_text: self.profile == ProviderProfile::PostToolUi && !has_tool_result,
        };
        turn.answer.start();
        turn.text.start();

        if let Err(e) = self
            .stream_turn(&mut turn, messages, sinks.ui, has_tool_result)
            .await
        {
            tracing::error!(backend = self.backend.name(), error = %e, "research turn failed");
            turn.mark_error();
            turn.full_response = format!("Error: {e}");
            turn.push_both();
        }
        turn.close();

        TurnOutcome {
            had_error: turn.had_error.load(Ordering::SeqCst),
            full_response: turn.full_response,
            finish_reason: turn.finish_reason,
        }
    }

    async fn stream_turn(
        &self,
        turn: &mut Turn,
        messages: &mut Vec<Message>,
        ui: Arc<dyn UiStream>,
        has_tool_result: bool,
    ) -> Result<()> {
        let history = if self.profile == ProviderProfile::ToolLimited {
            transform_tool_messages(messages)
        } else {
            messages.clone()
        };
        let model = self.models.pick(self.profile, has_tool_result).to_string();
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(SearchTool::new(
            self.providers.clone(),
            ui.clone(),
            turn.had_error.clone(),
        ))];
        tracing::info!(
            backend = self.backend.name(),
            %model,
            profile = self.profile.as_str(),
            messages = history.len(),
            "starting research turn"
        );

        let mut response = self
            .backend
            .stream(ModelRequest {
                model,
                system: system_prompt(chrono::Local::now()),
                messages: history,
                tools,
                max_tokens: MAX_TOKENS,
            })
            .await?;

        if !turn.route_to_text {
            if let Err(e) = ui.append(UiElement::AnswerSection) {
                tracing::error!(error = %e, "error appending answer section");
            }
        }

        let mut tool_calls: Vec<ToolCallPart> = Vec::new();
        let mut tool_results: Vec<ToolResultPart> = Vec::new();
        while let Some(delta) = response.deltas.next().await {
            if !turn.both_active() {
                tracing::debug!("sink left active state; stopping delta loop");
                break;
            }
            match delta? {
                DeltaEvent::TextDelta { text } => {
                    if !text.is_empty() {
                        turn.full_response.push_str(&text);
                        turn.push_streamed();
                    }
                }
                DeltaEvent::ToolCall(call) => tool_calls.push(call),
                DeltaEvent::ToolResult(result) => {
                    if result.is_empty_payload() {
                        turn.mark_error();
                    }
                    tool_results.push(result);
                }
                DeltaEvent::Error { error } => {
                    tracing::warn!(%error, "model stream error");
                    turn.mark_error();
                    turn.full_response.push_str(TOOL_ERROR_SUFFIX);
                    turn.push_both();
                }
            }
        }

        if let Some(finish) = response.take_finish() {
            turn.finish_reason = finish.finish_reason.as_str().to_string();
        }

        let mut parts = vec![Part::Text {
            text: turn.full_response.clone(),
        }];
        parts.extend(tool_calls.into_iter().map(Part::ToolCall));
        messages.push(Message::parts(Role::Assistant, parts));
        if !tool_results.is_empty() {
            messages.push(Message::parts(
                Role::Tool,
                tool_results.into_iter().map(Part::ToolResult).collect(),
            ));
        }
        Ok(())
    }

    /// Run turns on one transcript until the model produced a final answer,
    /// a turn errored, or `max_turns` turns have run. `sinks_for` supplies fresh
    /// sinks for each turn index.
    pub async fn run_session(
        &self,
        messages: &mut Vec<Message>,
        max_turns: usize,
        mut sinks_for: impl FnMut(usize) -> TurnSinks,
    ) -> TurnOutcome {
        let mut outcome = TurnOutcome {
            full_response: String::new(),
            had_error: false,
            finish_reason: String::new(),
        };
        for i in 0..max_turns.max(1) {
            outcome = self.run(messages, sinks_for(i)).await;
            let answered =
                !outcome.full_response.trim().is_empty() && outcome.finish_reason != "tool-calls";
            if outcome.had_error || answered {
                break;
            }
        }
        outcome
    }
}
