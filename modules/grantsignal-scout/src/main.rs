use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ai_client::OpenAi;
use grantsignal_common::rules::RuleConfig;
use grantsignal_common::types::SearchIntent;
use grantsignal_common::Config;
use grantsignal_scout::scout::GrantScout;
use grantsignal_scout::store::MemoryGrantStore;

#[derive(Parser, Debug)]
#[command(name = "grantsignal-scout", about = "Discover and score funding opportunities")]
struct Args {
    /// Path to the TOML rule config.
    #[arg(long, default_value = "config/grantsignal.toml")]
    rules: PathBuf,

    /// Extra keywords appended to every chunk with spare slots.
    #[arg(long = "keyword")]
    keywords: Vec<String>,

    /// Cap the number of chunks dispatched this run.
    #[arg(long)]
    max_chunks: Option<usize>,

    /// Minimum award size, USD.
    #[arg(long)]
    funding_min: Option<f64>,

    /// Maximum award size, USD.
    #[arg(long)]
    funding_max: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("grantsignal=info".parse()?))
        .init();

    let args = Args::parse();

    info!("GrantSignal scout starting...");

    // Rule tables are fatal if malformed; the pipeline must not start
    // without them.
    let rules = RuleConfig::load(&args.rules)?;

    let config = Config::from_env();
    config.log_redacted();

    let mut model = OpenAi::new(&config.openai_api_key, &config.model);
    if let Some(ref base_url) = config.openai_base_url {
        model = model.with_base_url(base_url);
    }

    // Local runs persist in memory; deployments wire a database-backed
    // gateway behind the same trait.
    let store = Arc::new(MemoryGrantStore::new());

    let scout = GrantScout::new(rules, Arc::new(model), store)?;

    let intent = SearchIntent::builder()
        .base_keywords(args.keywords)
        .funding_min(args.funding_min)
        .funding_max(args.funding_max)
        .max_chunks(args.max_chunks)
        .build();

    let outcome = scout.run(&intent).await;

    info!(status = ?outcome.status, "{}", outcome.stats);

    let mut ranked = outcome.grants;
    ranked.sort_by(|a, b| {
        b.composite_score
            .partial_cmp(&a.composite_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for grant in &ranked {
        info!(
            score = grant.composite_score.unwrap_or(0.0),
            deadline = grant.deadline.as_deref().unwrap_or("unknown"),
            url = grant.source_url.as_str(),
            "{}",
            grant.title
        );
    }

    Ok(())
}
