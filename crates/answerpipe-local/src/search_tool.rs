//! The `search` tool bound to the model: pads the query, dispatches to the
//! active provider, and mirrors progress into the UI stream.

use crate::search::ProviderRegistry;
use answerpipe_core::{
    pad_query, Error, Result, SearchDepth, SearchOptions, SearchResults, Tool, UiElement, UiStream,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const SEARCH_TOOL_NAME: &str = "search";
const SEARCH_TOOL_DESCRIPTION: &str = "Search the web for information";

fn default_max_results() -> usize {
    10
}

#[derive(Debug, Clone, Copy, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
enum DepthArg {
    #[default]
    Basic,
    Advanced,
}

impl From<DepthArg> for SearchDepth {
    fn from(d: DepthArg) -> Self {
        match d {
            DepthArg::Basic => SearchDepth::Basic,
            DepthArg::Advanced => SearchDepth::Advanced,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchArgs {
    /// The query to search for.
    query: String,
    /// The maximum number of results to return.
    #[serde(default = "default_max_results")]
    max_results: usize,
    /// The depth of the search.
    #[serde(default)]
    search_depth: DepthArg,
    /// A list of domains to specifically include in the search results.
    #[serde(default)]
    include_domains: Vec<String>,
    /// A list of domains to specifically exclude from the search results.
    #[serde(default)]
    exclude_domains: Vec<String>,
}

impl SearchArgs {
    fn into_options(self) -> SearchOptions {
        SearchOptions {
            query: self.query,
            max_results: self.max_results,
            search_depth: self.search_depth.into(),
            include_domains: self.include_domains,
            exclude_domains: self.exclude_domains,
        }
    }
}

fn parameters_schema() -> Value {
    let mut v: Value = schemars::schema_for!(SearchArgs).into();
    if let Some(obj) = v.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    v
}

pub struct SearchTool {
    providers: Arc<ProviderRegistry>,
    ui: Arc<dyn UiStream>,
    error_flag: Arc<AtomicBool>,
}

impl SearchTool {
    /// `error_flag` is the turn's error flag; adapter failures set it.
    pub fn new(
        providers: Arc<ProviderRegistry>,
        ui: Arc<dyn UiStream>,
        error_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            providers,
            ui,
            error_flag,
        }
    }

    fn show(&self, element: Option<UiElement>) {
        if let Err(e) = self.ui.update(element) {
            tracing::error!(error = %e, "error updating search section");
        }
    }

    /// Run one search. Adapter failures never escape: they log, flag the turn,
    /// clear the UI section, and return empty results for the padded query.
    pub async fn execute(&self, opts: SearchOptions) -> SearchResults {
        let section = |results: Option<String>| UiElement::SearchSection {
            query: opts.query.clone(),
            include_domains: opts.include_domains.clone(),
            results,
        };
        self.show(Some(section(None)));

        let padded = SearchOptions {
            query: pad_query(&opts.query),
            ..opts.clone()
        };

        let outcome = match self.providers.active() {
            Ok(provider) => {
                tracing::info!(
                    provider = provider.name(),
                    depth = padded.search_depth.as_str(),
                    max_results = padded.max_results,
                    "search"
                );
                provider.search(&padded).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(results) => {
                match serde_json::to_string(&results) {
                    Ok(json) => self.show(Some(section(Some(json)))),
                    Err(e) => tracing::error!(error = %e, "error serializing search results"),
                }
                results
            }
            Err(e) => {
                tracing::warn!(
                    provider = self.providers.active_key().as_str(),
                    error = %e,
                    "search API error"
                );
                self.error_flag.store(true, Ordering::SeqCst);
                self.show(None);
                SearchResults::empty(padded.query)
            }
        }
    }
}

#[async_trait::async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        SEARCH_TOOL_NAME
    }

    fn description(&self) -> &str {
        SEARCH_TOOL_DESCRIPTION
    }

    fn parameters(&self) -> Value {
        parameters_schema()
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let args: SearchArgs = serde_json::from_value(args)
            .map_err(|e| Error::Tool(format!("invalid search arguments: {e}")))?;
        let opts = args.into_options();
        opts.validate().map_err(|e| Error::Tool(e.to_string()))?;
        let results = self.execute(opts).await;
        serde_json::to_value(results).map_err(|e| Error::Tool(e.to_string()))
    }
}
