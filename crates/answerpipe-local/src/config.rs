//! Process configuration, resolved once from the environment and then injected.

use std::time::Duration;

pub const DEFAULT_TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";
pub const DEFAULT_EXA_ENDPOINT: &str = "https://api.exa.ai/search";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-latest";
pub const SEARXNG_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SearchBackend {
    #[default]
    Tavily,
    Exa,
    Searxng,
}

impl SearchBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchBackend::Tavily => "tavily",
            SearchBackend::Exa => "exa",
            SearchBackend::Searxng => "searxng",
        }
    }

    /// Unknown tokens fall back to Tavily.
    pub fn from_token(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("tavily") => SearchBackend::Tavily,
            Some("exa") => SearchBackend::Exa,
            Some("searxng") | Some("searchxng") => SearchBackend::Searxng,
            Some(other) => {
                tracing::warn!(search_api = other, "unknown SEARCH_API; using tavily");
                SearchBackend::Tavily
            }
        }
    }
}

/// Provider quirks that change how a turn routes its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderProfile {
    #[default]
    Standard,
    /// No native tool-result messages; tool results are folded into assistant text
    /// and follow-up turns use the sub-model.
    ToolLimited,
    /// The answer section is reserved for post-tool synthesis; first-turn text
    /// goes to the raw-text sink.
    PostToolUi,
}

impl ProviderProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderProfile::Standard => "standard",
            ProviderProfile::ToolLimited => "tool_limited",
            ProviderProfile::PostToolUi => "post_tool_ui",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrawlRenderer {
    #[default]
    Http,
    Playwright,
}

#[derive(Debug, Clone, Default)]
pub struct SearchConfig {
    pub backend: SearchBackend,
    pub tavily_api_key: Option<String>,
    pub tavily_endpoint: Option<String>,
    pub exa_api_key: Option<String>,
    pub exa_endpoint: Option<String>,
    pub searxng_api_url: Option<String>,
    pub crawl_renderer: CrawlRenderer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelConfig {
    OpenAiCompat {
        base_url: String,
        api_key: Option<String>,
        model: String,
    },
    Anthropic {
        base_url: String,
        api_key: String,
        model: String,
    },
    Ollama {
        base_url: String,
        model: String,
        sub_model: Option<String>,
    },
}

impl ModelConfig {
    pub fn backend_name(&self) -> &'static str {
        match self {
            ModelConfig::OpenAiCompat { .. } => "openai_compat",
            ModelConfig::Anthropic { .. } => "anthropic",
            ModelConfig::Ollama { .. } => "ollama",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub search: SearchConfig,
    pub profile: ProviderProfile,
    pub model: ModelConfig,
}

impl AgentConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from any key lookup. Empty/whitespace values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |k: &str| {
            lookup(k)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let search = SearchConfig {
            backend: SearchBackend::from_token(get("SEARCH_API").as_deref()),
            tavily_api_key: get("TAVILY_API_KEY"),
            tavily_endpoint: get("TAVILY_API_ENDPOINT"),
            exa_api_key: get("EXA_API_KEY"),
            exa_endpoint: get("EXA_API_ENDPOINT"),
            searxng_api_url: get("SEARXNG_API_URL").or_else(|| get("SEARCHXNG_API_URL")),
            crawl_renderer: match get("ANSWERPIPE_CRAWL_RENDERER")
                .map(|s| s.to_ascii_lowercase())
                .as_deref()
            {
                Some("playwright") => CrawlRenderer::Playwright,
                _ => CrawlRenderer::Http,
            },
        };

        let ollama_model = get("OLLAMA_MODEL");
        let ollama_base_url = get("OLLAMA_BASE_URL");

        // The profile follows whichever backend actually serves the turn.
        let (profile, model) = match (ollama_model, ollama_base_url, get("ANTHROPIC_API_KEY")) {
            (Some(model), Some(base_url), _) => (
                ProviderProfile::ToolLimited,
                ModelConfig::Ollama {
                    base_url,
                    model,
                    sub_model: get("OLLAMA_SUB_MODEL"),
                },
            ),
            (_, _, Some(api_key)) => (
                ProviderProfile::PostToolUi,
                ModelConfig::Anthropic {
                    base_url: get("ANTHROPIC_API_BASE")
                        .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.to_string()),
                    api_key,
                    model: get("ANTHROPIC_API_MODEL")
                        .unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
                },
            ),
            _ => (
                ProviderProfile::Standard,
                ModelConfig::OpenAiCompat {
                    base_url: get("OPENAI_API_BASE")
                        .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
                    api_key: get("OPENAI_API_KEY"),
                    model: get("OPENAI_API_MODEL")
                        .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
                },
            ),
        };

        Self {
            search,
            profile,
            model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(pairs: &[(&str, &str)]) -> AgentConfig {
        let m: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AgentConfig::from_lookup(|k| m.get(k).cloned())
    }

    #[test]
    fn defaults_to_tavily_and_standard_profile() {
        let c = cfg(&[]);
        assert_eq!(c.search.backend, SearchBackend::Tavily);
        assert_eq!(c.profile, ProviderProfile::Standard);
        assert_eq!(c.model.backend_name(), "openai_compat");
    }

    #[test]
    fn unknown_search_api_falls_back_to_tavily() {
        assert_eq!(cfg(&[("SEARCH_API", "bing")]).search.backend, SearchBackend::Tavily);
        assert_eq!(cfg(&[("SEARCH_API", "EXA")]).search.backend, SearchBackend::Exa);
        assert_eq!(
            cfg(&[("SEARCH_API", "searchxng")]).search.backend,
            SearchBackend::Searxng
        );
    }

    #[test]
    fn ollama_needs_both_settings() {
        let c = cfg(&[("OLLAMA_MODEL", "llama3.1")]);
        assert_eq!(c.profile, ProviderProfile::Standard);
        let c = cfg(&[
            ("OLLAMA_MODEL", "llama3.1"),
            ("OLLAMA_BASE_URL", "http://127.0.0.1:11434"),
            ("OLLAMA_SUB_MODEL", "qwen2.5"),
        ]);
        assert_eq!(c.profile, ProviderProfile::ToolLimited);
        assert_eq!(
            c.model,
            ModelConfig::Ollama {
                base_url: "http://127.0.0.1:11434".to_string(),
                model: "llama3.1".to_string(),
                sub_model: Some("qwen2.5".to_string()),
            }
        );
    }

    #[test]
    fn tool_limited_wins_over_post_tool_ui() {
        let c = cfg(&[
            ("OLLAMA_MODEL", "llama3.1"),
            ("OLLAMA_BASE_URL", "http://x"),
            ("ANTHROPIC_API_KEY", "k"),
        ]);
        assert_eq!(c.profile, ProviderProfile::ToolLimited);
        assert_eq!(c.model.backend_name(), "ollama");
    }

    #[test]
    fn anthropic_key_selects_the_anthropic_backend() {
        let c = cfg(&[("ANTHROPIC_API_KEY", "sk-ant"), ("OPENAI_API_KEY", "sk-oa")]);
        assert_eq!(c.profile, ProviderProfile::PostToolUi);
        assert_eq!(
            c.model,
            ModelConfig::Anthropic {
                base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
                api_key: "sk-ant".to_string(),
                model: DEFAULT_ANTHROPIC_MODEL.to_string(),
            }
        );

        let c = cfg(&[
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("ANTHROPIC_API_BASE", "http://127.0.0.1:9"),
            ("ANTHROPIC_API_MODEL", "claude-test"),
        ]);
        assert_eq!(
            c.model,
            ModelConfig::Anthropic {
                base_url: "http://127.0.0.1:9".to_string(),
                api_key: "sk-ant".to_string(),
                model: "claude-test".to_string(),
            }
        );
    }

    #[test]
    fn blank_values_are_unset_and_legacy_searxng_name_is_read() {
        let c = cfg(&[
            ("TAVILY_API_KEY", "   "),
            ("SEARCHXNG_API_URL", "http://searx.local"),
        ]);
        assert!(c.search.tavily_api_key.is_none());
        assert_eq!(c.search.searxng_api_url.as_deref(), Some("http://searx.local"));
    }
}
