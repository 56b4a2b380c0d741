use answerpipe_core::Result;
use std::sync::Arc;

pub mod anthropic;
pub mod backend;
pub mod config;
pub mod crawl;
pub mod extract;
pub mod ollama;
pub mod openai_compat;
pub mod render_playwright;
pub mod researcher;
pub mod search;
pub mod search_tool;

pub use config::{AgentConfig, ProviderProfile, SearchBackend};
pub use researcher::{Researcher, TurnOutcome, TurnSinks};
pub use search::ProviderRegistry;

const USER_AGENT: &str = concat!("answerpipe/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client for providers, crawling, and model calls.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()
        .map_err(|e| answerpipe_core::Error::NotConfigured(format!("http client: {e}")))
}

/// Wire a researcher from resolved configuration.
pub fn researcher_from_config(client: reqwest::Client, cfg: &AgentConfig) -> Researcher {
    let providers = Arc::new(ProviderRegistry::from_config(client.clone(), &cfg.search));
    let (backend, models) = backend::backend_from_config(client, &cfg.model);
    tracing::info!(
        search = providers.active_key().as_str(),
        backend = backend.name(),
        profile = cfg.profile.as_str(),
        "researcher configured"
    );
    Researcher::new(backend, providers, cfg.profile, models)
}
