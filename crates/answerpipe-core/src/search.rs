use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Some backends reject queries shorter than this.
pub const MIN_QUERY_CHARS: usize = 5;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    #[default]
    Basic,
    Advanced,
}

impl SearchDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchDepth::Basic => "basic",
            SearchDepth::Advanced => "advanced",
        }
    }
}

impl std::str::FromStr for SearchDepth {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(SearchDepth::Basic),
            "advanced" => Ok(SearchDepth::Advanced),
            other => Err(Error::InvalidInput(format!(
                "unknown search_depth {other:?} (allowed: basic, advanced)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchOptions {
    pub query: String,
    pub max_results: usize,
    pub search_depth: SearchDepth,
    pub include_domains: Vec<String>,
    pub exclude_domains: Vec<String>,
}

impl SearchOptions {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_results: 10,
            search_depth: SearchDepth::Basic,
            include_domains: Vec::new(),
            exclude_domains: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(Error::InvalidInput("query must be non-empty".to_string()));
        }
        if self.max_results < 1 {
            return Err(Error::InvalidInput(
                "max_results must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Right-pad `query` with spaces up to [`MIN_QUERY_CHARS`] characters.
pub fn pad_query(query: &str) -> String {
    let n = query.chars().count();
    if n >= MIN_QUERY_CHARS {
        return query.to_string();
    }
    let mut out = String::with_capacity(query.len() + (MIN_QUERY_CHARS - n));
    out.push_str(query);
    out.extend(std::iter::repeat(' ').take(MIN_QUERY_CHARS - n));
    out
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResultItem {
    pub title: String,
    pub url: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResultImage {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Providers return either bare image URLs or described images.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SearchImage {
    Url(String),
    Described(SearchResultImage),
}

impl SearchImage {
    pub fn url(&self) -> &str {
        match self {
            SearchImage::Url(u) => u,
            SearchImage::Described(img) => &img.url,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResults {
    pub results: Vec<SearchResultItem>,
    pub images: Vec<SearchImage>,
    pub query: String,
    /// Provider-reported total; may exceed `results.len()`.
    pub number_of_results: u64,
}

impl SearchResults {
    pub fn empty(query: impl Into<String>) -> Self {
        Self {
            results: Vec::new(),
            images: Vec::new(),
            query: query.into(),
            number_of_results: 0,
        }
    }
}

#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(&self, opts: &SearchOptions) -> Result<SearchResults>;
}
