//! Genesis CLI
//!
//! Builds the semantic graph twin of a PostgreSQL schema in Neo4j.
//!
//! Usage:
//!   GENESIS_SOURCE_URL=postgres://reader:pw@localhost/erp \
//!   GENESIS_GRAPH_PASSWORD=secret \
//!   GENESIS_LLM_API_KEY=sk-... \
//!   cargo run --features cli --bin genesis -- genesis.toml --sample-size 20 --seed 7
//!
//! Secrets come from the environment only; everything else from the TOML
//! file, with the flags below taking precedence.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::Parser;
use tracing::info;

use genesis::checkpoint::FileCheckpoints;
use genesis::export::export_cypher_dump;
use genesis::pipeline::{AutoApprove, ConfirmationGate};
use genesis::source::PostgresSource;
use genesis::storage::Neo4jHttpStore;
use genesis::synth::{CostEstimate, OpenAiClient};
use genesis::{GenesisConfig, PipelineController};

#[derive(Parser, Debug)]
#[command(name = "genesis")]
#[command(about = "Turn a relational schema into a semantically enriched graph twin")]
struct Args {
    /// TOML configuration file (defaults apply when missing)
    #[arg(default_value = "genesis.toml")]
    config: PathBuf,

    /// Approve every cost estimate without prompting
    #[arg(long, short = 'y')]
    yes: bool,

    /// Number of entities to sample
    #[arg(long, short = 'n')]
    sample_size: Option<usize>,

    /// Seed for entity and row sampling
    #[arg(long)]
    seed: Option<u64>,

    /// Explicit entities (comma-separated, `schema.table` or `table`)
    #[arg(long, value_delimiter = ',')]
    entities: Vec<String>,

    /// Write an idempotent Cypher script of the resulting graph
    #[arg(long)]
    dump: Option<PathBuf>,
}

/// Prompts on the terminal for every batch.
struct StdinGate;

#[async_trait]
impl ConfirmationGate for StdinGate {
    async fn confirm(&self, estimate: &CostEstimate) -> bool {
        let prompt = format!("Estimated cost: {estimate}\nProceed? [y/N] ");
        tokio::task::spawn_blocking(move || {
            print!("{prompt}");
            if std::io::stdout().flush().is_err() {
                return false;
            }
            let mut answer = String::new();
            match std::io::stdin().lock().read_line(&mut answer) {
                Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
                Err(_) => false,
            }
        })
        .await
        .unwrap_or(false)
    }
}

fn secret(name: &str) -> anyhow::Result<String> {
    std::env::var(name).with_context(|| format!("{name} must be set"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = GenesisConfig::load(&args.config)?;
    if args.sample_size.is_some() {
        config.sampling.sample_size = args.sample_size;
    }
    if args.seed.is_some() {
        config.sampling.seed = args.seed;
    }
    if !args.entities.is_empty() {
        config.sampling.entities = Some(args.entities.clone());
    }
    config.validate()?;

    let source_url = match secret("GENESIS_SOURCE_URL") {
        Ok(url) => url,
        Err(e) => config.source.url.clone().context(e)?,
    };
    let Some(graph_url) = config.graph.url.clone() else {
        bail!("graph.url must be set in {}", args.config.display());
    };

    let source =
        PostgresSource::connect(&source_url, config.workers.concurrency as u32 + 1, config.timeouts.query()).await?;
    let graph = Neo4jHttpStore::new(
        &graph_url,
        &config.graph.database,
        &config.graph.user,
        &secret("GENESIS_GRAPH_PASSWORD")?,
        config.timeouts.graph(),
    )?;
    let llm = OpenAiClient::new(config.llm.base_url.clone(), secret("GENESIS_LLM_API_KEY")?, config.timeouts.llm())?;

    let checkpoints = FileCheckpoints::open(&config.checkpoint.path)
        .with_context(|| format!("opening {}", config.checkpoint.path.display()))?;
    info!(path = %checkpoints.path().display(), "checkpoint file");

    let controller = if args.yes {
        PipelineController::new(config, source, graph, llm, checkpoints, AutoApprove)
    } else {
        PipelineController::new(config, source, graph, llm, checkpoints, StdinGate)
    };
    let summary = controller.run().await?;

    if let Some(path) = &args.dump {
        let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
        let mut writer = std::io::BufWriter::new(file);
        export_cypher_dump(controller.graph(), &mut writer).await?;
        writer.flush()?;
        info!(path = %path.display(), "cypher dump written");
    }

    println!("{summary}");
    if summary.was_declined() {
        std::process::exit(2);
    }
    Ok(())
}
