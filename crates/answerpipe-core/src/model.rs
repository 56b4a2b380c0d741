//! The model invocation boundary: requests, the delta stream, and tool bindings.

use crate::message::{Message, ToolCallPart, ToolResultPart};
use crate::Result;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// One incremental unit of the model's streamed output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DeltaEvent {
    TextDelta { text: String },
    ToolCall(ToolCallPart),
    ToolResult(ToolResultPart),
    Error { error: String },
}

impl DeltaEvent {
    pub fn text(s: impl Into<String>) -> Self {
        DeltaEvent::TextDelta { text: s.into() }
    }

    pub fn error(s: impl Into<String>) -> Self {
        DeltaEvent::Error { error: s.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Other,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool-calls",
            FinishReason::ContentFilter => "content-filter",
            FinishReason::Error => "error",
            FinishReason::Other => "other",
        }
    }

    /// Map provider spellings (`tool_calls`, `end_turn`, ...) onto the closed set.
    pub fn from_provider(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stop" | "end_turn" | "stop_sequence" => FinishReason::Stop,
            "length" | "max_tokens" => FinishReason::Length,
            "tool_calls" | "tool-calls" | "function_call" | "tool_use" => FinishReason::ToolCalls,
            "content_filter" | "content-filter" => FinishReason::ContentFilter,
            "error" => FinishReason::Error,
            _ => FinishReason::Other,
        }
    }
}

/// Delivered once when the model finishes normally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishEvent {
    pub text: String,
    pub finish_reason: FinishReason,
}

/// A callable tool the model may invoke.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;
    async fn call(&self, args: Value) -> Result<Value>;
}

pub struct ModelRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Arc<dyn Tool>>,
    pub max_tokens: u32,
}

impl std::fmt::Debug for ModelRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRequest")
            .field("model", &self.model)
            .field("messages", &self.messages.len())
            .field(
                "tools",
                &self.tools.iter().map(|t| t.name().to_string()).collect::<Vec<_>>(),
            )
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Lazy, finite, non-restartable. An `Err` item is a failure of the invocation itself.
pub type DeltaStream = BoxStream<'static, Result<DeltaEvent>>;

pub struct ModelResponse {
    pub deltas: DeltaStream,
    /// Backends send the finish event before the delta stream ends.
    pub finish: tokio::sync::oneshot::Receiver<FinishEvent>,
}

impl ModelResponse {
    /// The finish event, if the model already reported one.
    pub fn take_finish(&mut self) -> Option<FinishEvent> {
        self.finish.try_recv().ok()
    }
}

#[async_trait::async_trait]
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn stream(&self, req: ModelRequest) -> Result<ModelResponse>;
}

/// Run one requested tool call against the bound tools.
///
/// Tool failures come back as an `Error` delta rather than an `Err`.
pub async fn run_tool_call(tools: &[Arc<dyn Tool>], call: &ToolCallPart) -> DeltaEvent {
    let Some(tool) = tools.iter().find(|t| t.name() == call.tool_name) else {
        return DeltaEvent::error(format!("unknown tool: {}", call.tool_name));
    };
    match tool.call(call.args.clone()).await {
        Ok(result) => DeltaEvent::ToolResult(ToolResultPart {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            result,
        }),
        Err(e) => DeltaEvent::error(e.to_string()),
    }
}
