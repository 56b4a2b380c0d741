use crate::backend::{self, Emitter, LineBuffer, PendingCalls};
use answerpipe_core::{
    DeltaEvent, Error, FinishReason, Message, ModelBackend, ModelRequest, ModelResponse, Result,
    Role, Tool, ToolCallPart,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Streaming `chat/completions` client for OpenAI-compatible servers.
#[derive(Debug, Clone)]
pub struct OpenAiCompatBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl OpenAiCompatBackend {
    pub fn new(client: reqwest::Client, base_url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url,
            api_key,
            timeout: backend::DEFAULT_LLM_TIMEOUT,
        }
    }

    /// Deadline for the response headers and for each gap between streamed
    /// chunks.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint_chat_completions(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Clone, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Debug, Clone, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

fn to_wire_messages(system: &str, messages: &[Message]) -> Vec<WireMessage> {
    let plain = |role: &str, content: String| WireMessage {
        role: role.to_string(),
        content: Some(content),
        tool_calls: Vec::new(),
        tool_call_id: None,
    };

    let mut out = Vec::with_capacity(messages.len() + 1);
    if !system.is_empty() {
        out.push(plain("system", system.to_string()));
    }
    for m in messages {
        match m.role {
            Role::Tool => {
                for r in m.tool_results() {
                    out.push(WireMessage {
                        tool_call_id: Some(r.call_id.clone()),
                        ..plain("tool", r.result.to_string())
                    });
                }
            }
            Role::Assistant => {
                let text = m.text();
                out.push(WireMessage {
                    role: "assistant".to_string(),
                    content: if text.is_empty() { None } else { Some(text) },
                    tool_calls: m
                        .tool_calls()
                        .into_iter()
                        .map(|c| WireToolCall {
                            id: c.call_id.clone(),
                            kind: "function".to_string(),
                            function: WireFunctionCall {
                                name: c.tool_name.clone(),
                                arguments: c.args.to_string(),
                            },
                        })
                        .collect(),
                    tool_call_id: None,
                });
            }
            Role::User | Role::System => out.push(plain(m.role.as_str(), m.text())),
        }
    }
    out
}

fn to_wire_tools(tools: &[Arc<dyn Tool>]) -> Vec<WireTool> {
    tools
        .iter()
        .map(|t| WireTool {
            kind: "function",
            function: WireFunction {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            },
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallChunk>,
}

#[derive(Debug, Deserialize)]
struct ToolCallChunk {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionChunk>,
}

#[derive(Debug, Deserialize)]
struct FunctionChunk {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Accumulated state of one streamed completion.
#[derive(Debug, Default)]
struct SseState {
    calls: PendingCalls,
    finish_reason: Option<String>,
    done: bool,
}

impl SseState {
    /// Apply one SSE line; returns any text to emit.
    fn apply_line(&mut self, line: &str) -> Result<Option<String>> {
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(None);
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.done = true;
            return Ok(None);
        }
        if data.is_empty() {
            return Ok(None);
        }
        let chunk: StreamChunk = serde_json::from_str(data)
            .map_err(|e| Error::Llm(format!("openai_compat stream chunk: {e}")))?;
        let mut text = String::new();
        for choice in chunk.choices {
            if let Some(c) = choice.delta.content {
                text.push_str(&c);
            }
            for tc in choice.delta.tool_calls {
                let pending = self.calls.entry(tc.index);
                if let Some(id) = tc.id {
                    pending.id = id;
                }
                if let Some(f) = tc.function {
                    if let Some(n) = f.name {
                        pending.name.push_str(&n);
                    }
                    if let Some(a) = f.arguments {
                        pending.arguments.push_str(&a);
                    }
                }
            }
            if let Some(r) = choice.finish_reason {
                self.finish_reason = Some(r);
            }
        }
        Ok(if text.is_empty() { None } else { Some(text) })
    }
}

async fn pump(
    resp: reqwest::Response,
    tools: Vec<Arc<dyn Tool>>,
    mut em: Emitter,
    idle: Duration,
) {
    let mut state = SseState::default();
    let mut lines = LineBuffer::default();
    let mut body = resp.bytes_stream();

    'read: loop {
        let chunk = match backend::next_chunk(&mut body, idle, "openai_compat").await {
            Ok(Some(c)) => c,
            Ok(None) => break,
            Err(e) => {
                em.fail(e).await;
                return;
            }
        };
        for line in lines.push(&chunk) {
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
    if let Some(line) = lines.rest() {
        if let Ok(Some(text)) = state.apply_line(&line) {
            if !em.send(DeltaEvent::text(text)).await {
                return;
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

    let reason = match state.finish_reason.as_deref() {
        Some(r) => FinishReason::from_provider(r),
        None if had_calls => FinishReason::ToolCalls,
        None => FinishReason::Other,
    };
    em.finish(reason);
}

#[async_trait::async_trait]
impl ModelBackend for OpenAiCompatBackend {
    fn name(&self) -> &'static str {
        "openai_compat"
    }

    async fn stream(&self, req: ModelRequest) -> Result<ModelResponse> {
        let body = ChatCompletionsRequest {
            model: req.model.clone(),
            messages: to_wire_messages(&req.system, &req.messages),
            max_tokens: Some(req.max_tokens),
            stream: true,
            tools: to_wire_tools(&req.tools),
        };
        let endpoint = self.endpoint_chat_completions();
        tracing::debug!(%endpoint, model = %req.model, "openai_compat chat.completions");

        let mut rb = self
            .client
            .post(&endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(k) = &self.api_key {
            rb = rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {k}"));
        }

        let resp = backend::send_within(rb.json(&body), self.timeout, "openai_compat").await?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(Error::Llm(format!(
                "openai_compat chat.completions HTTP {status}: {}",
                detail.trim()
            )));
        }

        let (em, response) = backend::channel();
        tokio::spawn(pump(resp, req.tools, em, self.timeout));
        Ok(response)
    }
}
