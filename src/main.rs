//! # SOP voice assistant CLI (`sop-agent`)
//!
//! ## Usage
//!
//! ```bash
//! sop-agent --config ./config/sop-agent.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sop-agent build-index` | Chunk, embed, self-test, and persist the SOP documents |
//! | `sop-agent search "<query>"` | Raw similarity search with scores |
//! | `sop-agent lookup <topic>` | Procedure for a canonical topic |
//! | `sop-agent ask "<question>"` | One assistant turn |
//! | `sop-agent chat` | Interactive call on stdin |
//! | `sop-agent stats` | Summary of the persisted index |
//! | `sop-agent serve` | Start the HTTP server |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use sop_agent::agent::SopAgent;
use sop_agent::config::{self, Config, LoggingConfig};
use sop_agent::embedding::create_provider;
use sop_agent::indexer::{self, BuildOptions};
use sop_agent::llm::OpenAiChatModel;
use sop_agent::retriever::Retriever;
use sop_agent::server::{self, AppState};
use sop_agent::stats;
use sop_agent::tools::{LookupTopicTool, Tool, ToolContext};

/// Retrieval-augmented voice assistant for clinic call-center procedures.
#[derive(Parser)]
#[command(name = "sop-agent", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sop-agent.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the vector index from the SOP documents.
    ///
    /// Scans `[index].data_dir` unless `--doc` is given.
    BuildIndex {
        /// Index only these documents (repeatable).
        #[arg(long = "doc")]
        docs: Vec<PathBuf>,

        /// Skip the retrieval self-test after building.
        #[arg(long)]
        skip_self_test: bool,
    },

    /// Search the index and print scored chunks.
    Search {
        query: String,

        /// Number of results (defaults to `[retrieval].top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Only return chunks from this source document.
        #[arg(long)]
        source: Option<String>,
    },

    /// Print the procedure for a canonical topic (e.g. "late arrival").
    Lookup { topic: String },

    /// Ask the assistant a single question.
    Ask { question: String },

    /// Talk to the assistant interactively. Type `quit` to hang up.
    Chat,

    /// Show index statistics.
    Stats,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = config::load_config(&cli.config);
    let logging = loaded
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    init_tracing(&logging);
    let cfg = loaded?;

    match cli.command {
        Commands::BuildIndex {
            docs,
            skip_self_test,
        } => run_build(&cfg, docs, skip_self_test).await?,
        Commands::Search {
            query,
            top_k,
            source,
        } => run_search(&cfg, &query, top_k, source.as_deref()).await?,
        Commands::Lookup { topic } => {
            let ctx = ToolContext::new(open_retriever(&cfg)?);
            let out = LookupTopicTool
                .execute(serde_json::json!({ "topic": topic }), &ctx)
                .await?;
            println!("{}", out);
        }
        Commands::Ask { question } => {
            let agent = build_agent(&cfg)?;
            let (answer, _) = agent.respond(&question, &[]).await;
            println!("{}", answer);
        }
        Commands::Chat => run_chat(&cfg).await?,
        Commands::Stats => stats::run_stats(&cfg)?,
        Commands::Serve => {
            let agent = build_agent(&cfg)?;
            server::run_server(&cfg.server.bind, AppState::new(agent)).await?;
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_retriever(cfg: &Config) -> Result<Retriever> {
    let embedder = create_provider(&cfg.embedding)?;
    Retriever::open(&cfg.index.dir, embedder, cfg.retrieval.top_k)
}

fn build_agent(cfg: &Config) -> Result<SopAgent> {
    let retriever = open_retriever(cfg)?;
    let model = OpenAiChatModel::new(&cfg.llm)?;
    Ok(SopAgent::new(Arc::new(model), retriever, &cfg.agent))
}

async fn run_build(cfg: &Config, docs: Vec<PathBuf>, skip_self_test: bool) -> Result<()> {
    let embedder = create_provider(&cfg.embedding)?;
    let report = indexer::build_index(
        cfg,
        embedder,
        BuildOptions {
            documents: docs,
            skip_self_test,
        },
    )
    .await?;

    let m = &report.manifest;
    println!("Index built at {}", cfg.index.dir.display());
    println!("  documents: {}", m.statistics.total_documents);
    println!("  chunks:    {}", m.statistics.total_chunks);
    println!("  avg chunk: {:.1} chars", m.statistics.avg_chunk_chars);
    println!("  model:     {} ({} dims)", m.settings.embedding_model, m.settings.dims);
    println!("  time:      {:.2}s", m.performance.pipeline_time_seconds);

    if let Some(test) = &report.self_test {
        println!();
        println!("Self-test ({} queries, {:.2} ms avg):", test.total_queries, test.avg_time_ms);
        for q in &test.queries {
            let hits: Vec<String> = q
                .results
                .iter()
                .map(|h| format!("{} ({:.3})", h.chunk_id, h.score))
                .collect();
            println!("  {:<45} {}", q.query, hits.join(", "));
        }
    }
    Ok(())
}

async fn run_search(
    cfg: &Config,
    query: &str,
    top_k: Option<usize>,
    source: Option<&str>,
) -> Result<()> {
    let retriever = open_retriever(cfg)?;
    let k = top_k.unwrap_or(retriever.default_top_k());
    let results = retriever.search_with_filter(query, k, source).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (rank, r) in results.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} ({}, {})",
            rank + 1,
            r.score,
            r.chunk.label(),
            r.chunk.source_name,
            r.chunk.position
        );
        for line in r.chunk.content.trim().lines() {
            println!("   {}", line);
        }
    }
    Ok(())
}

async fn run_chat(cfg: &Config) -> Result<()> {
    let agent = build_agent(cfg)?;
    let mut history = Vec::new();
    println!("Sarah: {}", agent.greet());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line.to_lowercase().as_str(), "quit" | "exit") {
            break;
        }
        let (answer, updated) = agent.respond(line, &history).await;
        history = updated;
        println!("Sarah: {}", answer);
    }
    Ok(())
}
