pub mod message;
pub mod model;
pub mod search;
pub mod stream;

pub use message::{
    has_tool_response, Message, MessageContent, Part, Role, ToolCallPart, ToolResultPart,
};
pub use model::{
    run_tool_call, DeltaEvent, DeltaStream, FinishEvent, FinishReason, ModelBackend, ModelRequest,
    ModelResponse, Tool,
};
pub use search::{
    pad_query, SearchDepth, SearchImage, SearchOptions, SearchProvider, SearchResultImage,
    SearchResultItem, SearchResults, MIN_QUERY_CHARS,
};
pub use stream::{GuardedSink, Sink, StreamState, UiElement, UiStream};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("{provider} HTTP {status}: {message}")]
    Http {
        provider: String,
        status: u16,
        message: String,
    },
    #[error("search failed: {0}")]
    Search(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("tool failed: {0}")]
    Tool(String),
    #[error("sink closed: {0}")]
    SinkClosed(String),
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
