//! Plumbing shared by the streaming model backends.

use crate::anthropic::AnthropicBackend;
use crate::config::ModelConfig;
use crate::ollama::OllamaBackend;
use crate::openai_compat::OpenAiCompatBackend;
use crate::researcher::ModelSelection;
use answerpipe_core::{
    run_tool_call, DeltaEvent, Error, FinishEvent, FinishReason, ModelBackend, ModelResponse,
    Result, Tool, ToolCallPart,
};
use futures_util::{Stream, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

/// Bound on the wait for response headers and on each silence between body
/// chunks. A stream that keeps producing is never cut off.
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(120);

/// Build the configured backend and the models it should be asked for.
pub fn backend_from_config(
    client: reqwest::Client,
    cfg: &ModelConfig,
) -> (Arc<dyn ModelBackend>, ModelSelection) {
    match cfg {
        ModelConfig::OpenAiCompat {
            base_url,
            api_key,
            model,
        } => (
            Arc::new(OpenAiCompatBackend::new(
                client,
                base_url.clone(),
                api_key.clone(),
            )),
            ModelSelection::new(model.clone()),
        ),
        ModelConfig::Anthropic {
            base_url,
            api_key,
            model,
        } => (
            Arc::new(AnthropicBackend::new(
                client,
                base_url.clone(),
                api_key.clone(),
            )),
            ModelSelection::new(model.clone()),
        ),
        ModelConfig::Ollama {
            base_url,
            model,
            sub_model,
        } => (
            Arc::new(OllamaBackend::new(client, base_url.clone())),
            ModelSelection::new(model.clone()).with_sub_model(sub_model.clone()),
        ),
    }
}

/// Send a model request, bounding only the wait for the response headers.
pub(crate) async fn send_within(
    rb: reqwest::RequestBuilder,
    deadline: Duration,
    backend: &str,
) -> Result<reqwest::Response> {
    match tokio::time::timeout(deadline, rb.send()).await {
        Ok(Ok(resp)) => Ok(resp),
        Ok(Err(e)) if e.is_timeout() => Err(Error::Timeout(format!("{backend}: {e}"))),
        Ok(Err(e)) => Err(Error::Llm(format!("{backend}: {e}"))),
        Err(_) => Err(Error::Timeout(format!(
            "{backend}: no response within {deadline:?}"
        ))),
    }
}

/// Next body chunk. `Ok(None)` at end of body; `Error::Timeout` once the
/// server has been silent for longer than `idle`.
pub(crate) async fn next_chunk<S, T, E>(
    body: &mut S,
    idle: Duration,
    backend: &str,
) -> Result<Option<T>>
where
    S: Stream<Item = std::result::Result<T, E>> + Unpin,
    E: std::fmt::Display,
{
    match tokio::time::timeout(idle, body.next()).await {
        Ok(Some(Ok(chunk))) => Ok(Some(chunk)),
        Ok(Some(Err(e))) => Err(Error::Llm(format!("{backend} stream: {e}"))),
        Ok(None) => Ok(None),
        Err(_) => Err(Error::Timeout(format!(
            "{backend} stream idle for {idle:?}"
        ))),
    }
}

/// Producer half of a [`ModelResponse`].
pub(crate) struct Emitter {
    tx: mpsc::Sender<Result<DeltaEvent>>,
    finish: Option<oneshot::Sender<FinishEvent>>,
    text: String,
}

pub(crate) fn channel() -> (Emitter, ModelResponse) {
    let (tx, rx) = mpsc::channel(64);
    let (finish_tx, finish_rx) = oneshot::channel();
    (
        Emitter {
            tx,
            finish: Some(finish_tx),
            text: String::new(),
        },
        ModelResponse {
            deltas: ReceiverStream::new(rx).boxed(),
            finish: finish_rx,
        },
    )
}

impl Emitter {
    /// Returns false once the consumer has dropped the stream.
    pub(crate) async fn send(&mut self, delta: DeltaEvent) -> bool {
        if let DeltaEvent::TextDelta { text } = &delta {
            self.text.push_str(text);
        }
        self.tx.send(Ok(delta)).await.is_ok()
    }

    pub(crate) async fn fail(&self, e: Error) {
        let _ = self.tx.send(Err(e)).await;
    }

    /// Report each call, then run it against the bound tools.
    pub(crate) async fn run_tools(
        &mut self,
        tools: &[Arc<dyn Tool>],
        calls: Vec<ToolCallPart>,
    ) -> bool {
        for call in calls {
            tracing::debug!(tool = %call.tool_name, call_id = %call.call_id, "tool call");
            if !self.send(DeltaEvent::ToolCall(call.clone())).await {
                return false;
            }
            let result = run_tool_call(tools, &call).await;
            if !self.send(result).await {
                return false;
            }
        }
        true
    }

    /// Deliver the finish event. Must run before the emitter is dropped.
    pub(crate) fn finish(&mut self, reason: FinishReason) {
        if let Some(tx) = self.finish.take() {
            let _ = tx.send(FinishEvent {
                text: self.text.clone(),
                finish_reason: reason,
            });
        }
    }
}

/// Splits a byte stream into UTF-8 lines across chunk boundaries.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            lines.push(line.trim_end_matches(['\r', '\n']).to_string());
        }
        lines
    }

    /// Whatever is left after the final newline.
    pub(crate) fn rest(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&std::mem::take(&mut self.buf))
            .trim()
            .to_string();
        if rest.is_empty() {
            None
        } else {
            Some(rest)
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct PendingCall {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) arguments: String,
}

/// Tool calls assembled from streamed fragments, keyed by their block index.
#[derive(Debug, Default)]
pub(crate) struct PendingCalls {
    calls: BTreeMap<usize, PendingCall>,
}

impl PendingCalls {
    pub(crate) fn entry(&mut self, index: usize) -> &mut PendingCall {
        self.calls.entry(index).or_default()
    }

    pub(crate) fn contains(&self, index: usize) -> bool {
        self.calls.contains_key(&index)
    }

    /// Drain in index order. Calls whose arguments do not parse come back as
    /// error messages instead.
    pub(crate) fn take(&mut self) -> (Vec<ToolCallPart>, Vec<String>) {
        let mut calls = Vec::new();
        let mut errors = Vec::new();
        for (i, p) in std::mem::take(&mut self.calls) {
            match parse_tool_args(&p.arguments) {
                Ok(args) => calls.push(ToolCallPart {
                    call_id: if p.id.is_empty() {
                        format!("call_{i}")
                    } else {
                        p.id
                    },
                    tool_name: p.name,
                    args,
                }),
                Err(e) => errors.push(e.to_string()),
            }
        }
        (calls, errors)
    }
}

/// Parse streamed tool arguments; an empty string means no arguments.
pub(crate) fn parse_tool_args(raw: &str) -> Result<serde_json::Value> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(raw).map_err(|e| Error::Tool(format!("invalid tool arguments: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_joins_split_lines() {
        let mut b = LineBuffer::default();
        assert!(b.push(b"data: {\"a\"").is_empty());
        assert_eq!(b.push(b":1}\r\n\ndata: x"), vec!["data: {\"a\":1}", ""]);
        assert_eq!(b.rest().as_deref(), Some("data: x"));
        assert_eq!(b.rest(), None);
    }

    #[test]
    fn pending_calls_drain_in_index_order() {
        let mut p = PendingCalls::default();
        p.entry(1).name.push_str("search");
        p.entry(1).arguments.push_str("{\"query\":");
        p.entry(0).name.push_str("search");
        p.entry(0).id.push_str("toolu_a");
        p.entry(1).arguments.push_str("\"cats\"}");
        p.entry(2).arguments.push_str("{broken");
        let (calls, errors) = p.take();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].call_id, "toolu_a");
        assert_eq!(calls[0].args, serde_json::json!({}));
        assert_eq!(calls[1].call_id, "call_1");
        assert_eq!(calls[1].args, serde_json::json!({"query": "cats"}));
        assert_eq!(errors.len(), 1);
        assert!(!p.contains(0));
    }

    #[tokio::test]
    async fn quiet_body_times_out_between_chunks() {
        let mut body = futures_util::stream::pending::<std::result::Result<Vec<u8>, String>>();
        let err = next_chunk(&mut body, Duration::from_millis(20), "test")
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        let mut body = futures_util::stream::iter(vec![Ok::<_, String>(vec![1u8])]);
        let first = next_chunk(&mut body, Duration::from_millis(20), "test").await;
        assert_eq!(first.unwrap(), Some(vec![1u8]));
        let end = next_chunk(&mut body, Duration::from_millis(20), "test").await;
        assert_eq!(end.unwrap(), None);
    }

    #[test]
    fn empty_tool_args_are_an_empty_object() {
        assert_eq!(parse_tool_args("  ").unwrap(), serde_json::json!({}));
        assert!(matches!(parse_tool_args("{oops"), Err(Error::Tool(_))));
    }

    #[tokio::test]
    async fn finish_is_ready_once_the_stream_ends() {
        let (mut em, mut resp) = channel();
        tokio::spawn(async move {
            em.send(DeltaEvent::text("a")).await;
            em.send(DeltaEvent::text("b")).await;
            em.finish(FinishReason::Stop);
        });
        let got: Vec<_> = resp.deltas.by_ref().collect().await;
        assert_eq!(got.len(), 2);
        let fin = resp.take_finish().unwrap();
        assert_eq!(fin.text, "ab");
        assert_eq!(fin.finish_reason, FinishReason::Stop);
    }

    #[test]
    fn ollama_config_carries_sub_model() {
        let (backend, models) = backend_from_config(
            reqwest::Client::new(),
            &ModelConfig::Ollama {
                base_url: "http://127.0.0.1:11434".to_string(),
                model: "llama3.1".to_string(),
                sub_model: Some("qwen2.5".to_string()),
            },
        );
        assert_eq!(backend.name(), "ollama");
        assert_eq!(models.sub_model.as_deref(), Some("qwen2.5"));
    }

    #[test]
    fn anthropic_config_builds_the_messages_backend() {
        let (backend, models) = backend_from_config(
            reqwest::Client::new(),
            &ModelConfig::Anthropic {
                base_url: "https://api.anthropic.com".to_string(),
                api_key: "k".to_string(),
                model: "claude-test".to_string(),
            },
        );
        assert_eq!(backend.name(), "anthropic");
        assert_eq!(models, ModelSelection::new("claude-test"));
    }
}
