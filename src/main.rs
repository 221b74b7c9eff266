use anyhow::Result;
use clap::{Parser, Subcommand};
use memory_curator::memory::provider::InMemoryWorkingMemory;
use memory_curator::relevance::{EmbeddingRelevanceScorer, RelevanceProvider};
use memory_curator::scheduler::CurationScheduler;
use memory_curator::Config;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "memory-curator")]
#[command(about = "Background curation scheduler for conversational working memory")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Start,
    /// Check connectivity to the configured relevance provider
    Health,
    /// Print the effective configuration as JSON
    ShowConfig,
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.operational.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn build_scorer(config: &Config) -> Result<Arc<dyn RelevanceProvider>> {
    let scorer = match config.relevance.provider.as_str() {
        "mock" => EmbeddingRelevanceScorer::new_mock(),
        _ => EmbeddingRelevanceScorer::new_ollama(
            config.relevance.base_url.clone(),
            config.relevance.model.clone(),
            config.relevance.timeout_seconds,
        )?,
    };
    Ok(Arc::new(scorer))
}

async fn run_scheduler(config: Config) -> Result<()> {
    let scorer = build_scorer(&config)?;
    let memory = Arc::new(InMemoryWorkingMemory::new(config.curation.working_memory_cap));

    let scheduler = CurationScheduler::new(config, memory, scorer);
    scheduler.start().await?;

    info!("memory curator running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("interrupt received");
    scheduler.shutdown().await;
    Ok(())
}

async fn check_health(config: &Config) -> Result<()> {
    let scorer = build_scorer(config)?;
    match scorer.similarity("hello", "hello").await {
        Ok(score) => {
            info!(
                provider = %config.relevance.provider,
                model = %config.relevance.model,
                self_similarity = score,
                "relevance provider reachable"
            );
            Ok(())
        }
        Err(err) => {
            error!(%err, "relevance provider unreachable");
            Err(err.into())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    config.validate()?;
    init_logging(&config);

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => run_scheduler(config).await,
        Commands::Health => check_health(&config).await,
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
