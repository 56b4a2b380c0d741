use crate::backend::{self, Emitter, LineBuffer, PendingCalls};
use answerpipe_core::{
    DeltaEvent, Error, FinishReason, Message, ModelBackend, ModelRequest, ModelResponse, Result,
    Role, Tool,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Streaming Messages API client for Anthropic models.
#[derive(Debug, Clone)]
pub struct AnthropicBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl AnthropicBackend {
    pub fn new(client: reqwest::Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
            timeout: backend::DEFAULT_LLM_TIMEOUT,
        }
    }

    /// Deadline for the response headers and for each gap between streamed
    /// events.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint_messages(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/messages")
        } else {
            format!("{base}/v1/messages")
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    system: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    stream: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Debug, Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: Value,
}

/// System messages in the history are folded into the system prompt; tool
/// results travel as `tool_result` blocks in a user turn. Consecutive turns of
/// the same role are merged since the API requires alternation.
fn to_wire(system: &str, messages: &[Message]) -> (String, Vec<WireMessage>) {
    let mut system = system.to_string();
    let mut out: Vec<WireMessage> = Vec::with_capacity(messages.len());

    for m in messages {
        let (role, content) = match m.role {
            Role::System => {
                let text = m.text();
                if !text.is_empty() {
                    if !system.is_empty() {
                        system.push_str("\n\n");
                    }
                    system.push_str(&text);
                }
                continue;
            }
            Role::User => ("user", text_block(m.text())),
            Role::Assistant => {
                let mut blocks = text_block(m.text());
                blocks.extend(m.tool_calls().into_iter().map(|c| ContentBlock::ToolUse {
                    id: c.call_id.clone(),
                    name: c.tool_name.clone(),
                    input: c.args.clone(),
                }));
                ("assistant", blocks)
            }
            Role::Tool => (
                "user",
                m.tool_results()
                    .into_iter()
                    .map(|r| ContentBlock::ToolResult {
                        tool_use_id: r.call_id.clone(),
                        content: r.result.to_string(),
                    })
                    .collect(),
            ),
        };
        if content.is_empty() {
            continue;
        }
        match out.last_mut() {
            Some(prev) if prev.role == role => prev.content.extend(content),
            _ => out.push(WireMessage { role, content }),
        };
    }
    (system, out)
}

fn text_block(text: String) -> Vec<ContentBlock> {
    if text.is_empty() {
        Vec::new()
    } else {
        vec![ContentBlock::Text { text }]
    }
}

fn to_wire_tools(tools: &[Arc<dyn Tool>]) -> Vec<WireTool> {
    tools
        .iter()
        .map(|t| WireTool {
            name: t.name().to_string(),
            description: t.description().to_string(),
            input_schema: t.parameters(),
        })
        .collect()
}

/// One `data:` payload. The fields present depend on `type`.
#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    index: usize,
    #[serde(default)]
    content_block: Option<StartBlock>,
    #[serde(default)]
    delta: Option<EventDelta>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct StartBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EventDelta {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    partial_json: Option<String>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default)]
struct EventState {
    calls: PendingCalls,
    stop_reason: Option<String>,
    done: bool,
}

impl EventState {
    /// Apply one SSE line; returns any text to emit.
    fn apply_line(&mut self, line: &str) -> Result<Option<String>> {
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(None);
        };
        let data = data.trim();
        if data.is_empty() {
            return Ok(None);
        }
        let ev: StreamEvent = serde_json::from_str(data)
            .map_err(|e| Error::Llm(format!("anthropic stream event: {e}")))?;
        match ev.kind.as_str() {
            "content_block_start" => match ev.content_block {
                Some(b) if b.kind == "tool_use" => {
                    let pending = self.calls.entry(ev.index);
                    pending.id = b.id.unwrap_or_default();
                    pending.name = b.name.unwrap_or_default();
                    Ok(None)
                }
                Some(b) => Ok(b.text.filter(|t| !t.is_empty())),
                None => Ok(None),
            },
            "content_block_delta" => {
                let d = ev.delta.unwrap_or_default();
                match d.kind.as_deref() {
                    Some("text_delta") => Ok(d.text.filter(|t| !t.is_empty())),
                    Some("input_json_delta") if self.calls.contains(ev.index) => {
                        if let Some(part) = d.partial_json {
                            self.calls.entry(ev.index).arguments.push_str(&part);
                        }
                        Ok(None)
                    }
                    _ => Ok(None),
                }
            }
            "message_delta" => {
                if let Some(r) = ev.delta.and_then(|d| d.stop_reason) {
                    self.stop_reason = Some(r);
                }
                Ok(None)
            }
            "message_stop" => {
                self.done = true;
                Ok(None)
            }
            "error" => {
                let e = ev.error.unwrap_or(ApiError {
                    kind: "error".to_string(),
                    message: String::new(),
                });
                Err(Error::Llm(format!("anthropic {}: {}", e.kind, e.message)))
            }
            _ => Ok(None),
        }
    }
}

async fn pump(
    resp: reqwest::Response,
    tools: Vec<Arc<dyn Tool>>,
    mut em: Emitter,
    idle: Duration,
) {
    let mut state = EventState::default();
    let mut lines = LineBuffer::default();
    let mut body = resp.bytes_stream();

    let mut eof = false;
    'read: while !eof {
        let batch = match backend::next_chunk(&mut body, idle, "anthropic").await {
            Ok(Some(chunk)) => lines.push(&chunk),
            Ok(None) => {
                eof = true;
                lines.rest().into_iter().collect()
            }
            Err(e) => {
                em.fail(e).await;
                return;
            }
        };
        for line in batch {
            match state.apply_line(&line) {
                Ok(Some(text)) => {
                    if !em.send(DeltaEvent::text(text)).await {
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    em.fail(e).await;
                    return;
                }
            }
            if state.done {
                break 'read;
            }
        }
    }

    let (calls, errors) = state.calls.take();
    for e in errors {
        if !em.send(DeltaEvent::error(e)).await {
            return;
        }
    }
    let had_calls = !calls.is_empty();
    if !em.run_tools(&tools, calls).await {
        return;
    }
    let reason = match state.stop_reason.as_deref() {
        Some(r) => FinishReason::from_provider(r),
        None if had_calls => FinishReason::ToolCalls,
        None => FinishReason::Other,
    };
    em.finish(reason);
}

#[async_trait::async_trait]
impl ModelBackend for AnthropicBackend {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn stream(&self, req: ModelRequest) -> Result<ModelResponse> {
        let (system, messages) = to_wire(&req.system, &req.messages);
        let body = MessagesRequest {
            model: req.model.clone(),
            max_tokens: req.max_tokens,
            system,
            messages,
            tools: to_wire_tools(&req.tools),
            stream: true,
        };
        let endpoint = self.endpoint_messages();
        tracing::debug!(%endpoint, model = %req.model, "anthropic messages");

        let rb = self
            .client
            .post(&endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body);
        let resp = backend::send_within(rb, self.timeout, "anthropic").await?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(Error::Llm(format!(
                "anthropic messages HTTP {status}: {}",
                detail.trim()
            )));
        }

        let (em, response) = backend::channel();
        tokio::spawn(pump(resp, req.tools, em, self.timeout));
        Ok(response)
    }
}
