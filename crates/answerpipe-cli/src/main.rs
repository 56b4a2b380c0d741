use anyhow::{Context, Result};
use answerpipe_core::{Message, SearchDepth, SearchOptions};
use answerpipe_local::config::{AgentConfig, SearchBackend};
use answerpipe_local::researcher::{TurnSinks, DEFAULT_MAX_TURNS};
use answerpipe_local::search::ProviderRegistry;
use answerpipe_local::search_tool::SearchTool;
use clap::{Parser, Subcommand};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

mod terminal;

#[derive(Parser, Debug)]
#[command(name = "answerpipe")]
#[command(about = "Streaming web research agent", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Research a question: search the web and stream a cited answer.
    Ask(AskCmd),
    /// Run one search through the configured provider (json).
    Search(SearchCmd),
    /// Report which settings are configured (json; booleans only, no secrets).
    Doctor,
}

#[derive(clap::Args, Debug)]
struct AskCmd {
    /// The question. Appended as a user message after any `--messages` history.
    prompt: Option<String>,
    /// Prior transcript as a JSON array of messages.
    #[arg(long)]
    messages: Option<std::path::PathBuf>,
    /// Stop after this many model turns.
    #[arg(long, default_value_t = DEFAULT_MAX_TURNS)]
    max_turns: usize,
    /// Write the final transcript (JSON) to this path.
    #[arg(long)]
    transcript_out: Option<std::path::PathBuf>,
    /// Print the turn outcome as JSON on stderr when done.
    #[arg(long)]
    outcome_json: bool,
}

#[derive(clap::Args, Debug)]
struct SearchCmd {
    query: String,
    #[arg(long, default_value_t = 10)]
    max_results: usize,
    /// basic|advanced
    #[arg(long, default_value = "basic")]
    depth: String,
    /// Restrict results to this domain (repeatable).
    #[arg(long = "include-domain")]
    include_domains: Vec<String>,
    /// Drop results from this domain (repeatable).
    #[arg(long = "exclude-domain")]
    exclude_domains: Vec<String>,
    /// Override SEARCH_API for this call: tavily|exa|searxng
    #[arg(long)]
    provider: Option<String>,
}

fn init_tracing(json: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "answerpipe=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_history(path: Option<&std::path::Path>, prompt: Option<String>) -> Result<Vec<Message>> {
    let mut messages: Vec<Message> = match path {
        Some(p) => {
            let txt = std::fs::read_to_string(p)
                .with_context(|| format!("read messages file {}", p.display()))?;
            serde_json::from_str(&txt)
                .with_context(|| format!("parse messages file {}", p.display()))?
        }
        None => Vec::new(),
    };
    if let Some(p) = prompt.filter(|p| !p.trim().is_empty()) {
        messages.push(Message::user(p));
    }
    if messages.is_empty() {
        anyhow::bail!("nothing to ask: pass a prompt or --messages");
    }
    Ok(messages)
}

async fn ask(cfg: &AgentConfig, args: AskCmd) -> Result<()> {
    let mut messages = load_history(args.messages.as_deref(), args.prompt)?;
    let client = answerpipe_local::http_client()?;
    let researcher = answerpipe_local::researcher_from_config(client, cfg);
    let ui: Arc<terminal::StderrUi> = Arc::new(terminal::StderrUi);

    let outcome = researcher
        .run_session(&mut messages, args.max_turns, |_| {
            let printer = terminal::StdoutPrinter::default();
            TurnSinks {
                ui: ui.clone(),
                answer: printer.sink(),
                text: printer.sink(),
            }
        })
        .await;

    if let Some(path) = &args.transcript_out {
        std::fs::write(path, serde_json::to_vec_pretty(&messages)?)
            .with_context(|| format!("write transcript {}", path.display()))?;
    }
    if args.outcome_json {
        eprintln!("{}", serde_json::to_string(&outcome)?);
    }
    if outcome.had_error {
        tracing::warn!(finish_reason = %outcome.finish_reason, "turn finished with errors");
    }
    Ok(())
}

async fn search(cfg: &AgentConfig, args: SearchCmd) -> Result<()> {
    let mut search_cfg = cfg.search.clone();
    if let Some(p) = args.provider.as_deref() {
        search_cfg.backend = SearchBackend::from_token(Some(p));
    }
    let opts = SearchOptions {
        query: args.query,
        max_results: args.max_results,
        search_depth: args.depth.parse::<SearchDepth>()?,
        include_domains: args.include_domains,
        exclude_domains: args.exclude_domains,
    };
    opts.validate()?;

    let client = answerpipe_local::http_client()?;
    let providers = Arc::new(ProviderRegistry::from_config(client, &search_cfg));
    let failed = Arc::new(AtomicBool::new(false));
    let tool = SearchTool::new(providers, Arc::new(terminal::StderrUi), failed);
    let results = tool.execute(opts).await;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn doctor(cfg: &AgentConfig) -> Result<()> {
    fn has_env(k: &str) -> bool {
        std::env::var(k).ok().is_some_and(|v| !v.trim().is_empty())
    }

    let payload = serde_json::json!({
        "schema_version": 1,
        "name": "answerpipe",
        "version": env!("CARGO_PKG_VERSION"),
        "search_api": cfg.search.backend.as_str(),
        "profile": cfg.profile.as_str(),
        "model_backend": cfg.model.backend_name(),
        "configured": {
            "search": {
                "tavily": cfg.search.tavily_api_key.is_some(),
                "exa": cfg.search.exa_api_key.is_some(),
                "searxng": cfg.search.searxng_api_url.is_some(),
            },
            "llm": {
                "openai_api_key": has_env("OPENAI_API_KEY"),
                "anthropic": has_env("ANTHROPIC_API_KEY"),
                "ollama": matches!(cfg.model, answerpipe_local::config::ModelConfig::Ollama { .. }),
            },
        },
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Explicit process env wins over the file.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let cfg = AgentConfig::from_env();
    match cli.command {
        Commands::Ask(args) => ask(&cfg, args).await?,
        Commands::Search(args) => search(&cfg, args).await?,
        Commands::Doctor => doctor(&cfg)?,
    }
    Ok(())
}
