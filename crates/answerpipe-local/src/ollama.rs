use crate::backend::{self, Emitter, LineBuffer};
use answerpipe_core::{
    DeltaEvent, Error, FinishReason, Message, ModelBackend, ModelRequest, ModelResponse, Result,
    Role, Tool, ToolCallPart,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Streaming `/api/chat` client for a local Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl OllamaBackend {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self {
            client,
            base_url,
            timeout: backend::DEFAULT_LLM_TIMEOUT,
        }
    }

    /// Deadline for the response headers and for each gap between streamed
    /// lines. Long answers that keep streaming are not cut off.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint_chat(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ChatTool>,
    options: ChatOptions,
}

#[derive(Debug, Clone, Serialize)]
struct ChatOptions {
    num_predict: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ChatToolCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatToolCall {
    function: ChatFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatFunctionCall {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ChatFunction,
}

#[derive(Debug, Clone, Serialize)]
struct ChatFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: ChatMessage,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn to_chat_messages(system: &str, messages: &[Message]) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    if !system.is_empty() {
        out.push(ChatMessage {
            role: "system".to_string(),
            content: system.to_string(),
            tool_calls: Vec::new(),
        });
    }
    for m in messages {
        match m.role {
            Role::Tool => {
                for r in m.tool_results() {
                    out.push(ChatMessage {
                        role: "tool".to_string(),
                        content: r.result.to_string(),
                        tool_calls: Vec::new(),
                    });
                }
            }
            role => out.push(ChatMessage {
                role: role.as_str().to_string(),
                content: m.text(),
                tool_calls: m
                    .tool_calls()
                    .into_iter()
                    .map(|c| ChatToolCall {
                        function: ChatFunctionCall {
                            name: c.tool_name.clone(),
                            arguments: c.args.clone(),
                        },
                    })
                    .collect(),
            }),
        }
    }
    out
}

fn to_chat_tools(tools: &[Arc<dyn Tool>]) -> Vec<ChatTool> {
    tools
        .iter()
        .map(|t| ChatTool {
            kind: "function",
            function: ChatFunction {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            },
        })
        .collect()
}

fn parse_chunk(line: &str) -> Result<Option<ChatChunk>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let chunk: ChatChunk = serde_json::from_str(line)
        .map_err(|e| Error::Llm(format!("ollama stream chunk: {e}")))?;
    if let Some(err) = chunk.error {
        return Err(Error::Llm(format!("ollama: {err}")));
    }
    Ok(Some(chunk))
}

async fn pump(
    resp: reqwest::Response,
    tools: Vec<Arc<dyn Tool>>,
    mut em: Emitter,
    idle: Duration,
) {
    let mut lines = LineBuffer::default();
    let mut body = resp.bytes_stream();
    let mut calls: Vec<ToolCallPart> = Vec::new();
    let mut done_reason: Option<String> = None;
    let mut done = false;

    let mut eof = false;
    while !done && !eof {
        let batch = match backend::next_chunk(&mut body, idle, "ollama").await {
            Ok(Some(chunk)) => lines.push(&chunk),
            Ok(None) => {
                // The last object may lack its trailing newline.
                eof = true;
                lines.rest().into_iter().collect()
            }
            Err(e) => {
                em.fail(e).await;
                return;
            }
        };
        for line in batch {
            let parsed = match parse_chunk(&line) {
                Ok(Some(c)) => c,
                Ok(None) => continue,
                Err(e) => {
                    em.fail(e).await;
                    return;
                }
            };
            if !parsed.message.content.is_empty()
                && !em.send(DeltaEvent::text(parsed.message.content)).await
            {
                return;
            }
            for tc in parsed.message.tool_calls {
                calls.push(ToolCallPart {
                    call_id: format!("call_{}", calls.len()),
                    tool_name: tc.function.name,
                    args: tc.function.arguments,
                });
            }
            if parsed.done {
                done_reason = parsed.done_reason;
                done = true;
                break;
            }
        }
    }

    let had_calls = !calls.is_empty();
    if !em.run_tools(&tools, calls).await {
        return;
    }
    let reason = if had_calls {
        FinishReason::ToolCalls
    } else {
        match done_reason.as_deref() {
            Some(r) => FinishReason::from_provider(r),
            None if done => FinishReason::Stop,
            None => FinishReason::Other,
        }
    };
    em.finish(reason);
}

#[async_trait::async_trait]
impl ModelBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn stream(&self, req: ModelRequest) -> Result<ModelResponse> {
        let body = ChatRequest {
            model: req.model.clone(),
            messages: to_chat_messages(&req.system, &req.messages),
            stream: true,
            tools: to_chat_tools(&req.tools),
            options: ChatOptions {
                num_predict: req.max_tokens,
            },
        };
        let endpoint = self.endpoint_chat();
        tracing::debug!(%endpoint, model = %req.model, "ollama chat");

        let rb = self
            .client
            .post(&endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&body);
        let resp = backend::send_within(rb, self.timeout, "ollama").await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Llm(format!("ollama chat HTTP {status}")));
        }

        let (em, response) = backend::channel();
        tokio::spawn(pump(resp, req.tools, em, self.timeout));
        Ok(response)
    }
}
