//! # The Daily Token
//!
//! A daily AI newspaper generator. Raw stories from HackerNews and lab RSS
//! feeds are categorized and summarized by language models routed across
//! several providers, laid out by a single editorial pass, and archived as
//! one edition per calendar day.
//!
//! ## Usage
//!
//! ```sh
//! HF_TOKEN=... OPENROUTER_API_KEY=... daily_token --start 2025-03-01 -a ./output/archive
//! ```
//!
//! ## Architecture
//!
//! 1. **Routing**: weighted model selection with a fallback chain ([`router`])
//! 2. **Extraction**: structured fields from free-form model text ([`extract`])
//! 3. **Processing**: bounded-concurrency enrichment per story ([`processor`])
//! 4. **Editorial**: one front-page decision per edition ([`editorial`])
//! 5. **Archive**: exactly one persisted edition per requested day ([`archive`])

use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod archive;
mod cli;
mod config;
mod editorial;
mod extract;
mod models;
mod processor;
mod router;
mod sources;
mod utils;

use archive::store::ArchiveStore;
use archive::{ArchiveOrchestrator, ArchiveSettings};
use cli::Cli;
use config::PipelineConfig;
use editorial::EditorialAggregator;
use processor::{ProcessorSettings, StoryProcessor};
use router::LlmRouter;
use router::catalog::emergency_model;
use router::providers::{ChatCompletionsClient, PollinationsClient};
use sources::hackernews::HackerNewsSource;
use sources::images::HtmlImageFetcher;
use sources::rss::RssSource;
use sources::NewsAggregator;
use utils::{BoxError, ensure_writable_dir};

/// Register a client for every provider that has a credential.
fn build_router(args: &Cli, config: &PipelineConfig) -> Result<LlmRouter, BoxError> {
    let mut router = LlmRouter::new(config.model_catalog()?)
        .with_fallback_extra(config.fallback_extra_models);

    match args.hf_token.as_deref().filter(|t| !t.trim().is_empty()) {
        Some(token) => {
            router = router.with_client("huggingface", Arc::new(ChatCompletionsClient::huggingface(token)));
        }
        None => warn!("HF_TOKEN not set; HuggingFace models will be skipped"),
    }
    match args.openrouter_api_key.as_deref().filter(|t| !t.trim().is_empty()) {
        Some(key) => {
            router = router.with_client("openrouter", Arc::new(ChatCompletionsClient::openrouter(key)));
        }
        None => warn!("OPENROUTER_API_KEY not set; OpenRouter models will be skipped"),
    }
    if !args.no_emergency {
        router = router.with_emergency(emergency_model(), Arc::new(PollinationsClient::default()));
    }
    debug!(?router, "Router ready");
    Ok(router)
}

fn build_sources(config: &PipelineConfig) -> NewsAggregator {
    let aggregator = NewsAggregator::new(config.ai_keywords.clone(), config.max_stories_per_day)
        .with_source(Arc::new(HackerNewsSource::new(config.hackernews_story_limit)));
    config
        .rss_feeds
        .iter()
        .fold(aggregator, |agg, (name, url)| {
            agg.with_source(Arc::new(RssSource::new(name, url)))
        })
}

#[tokio::main]
#[instrument]
async fn main() -> Result<(), BoxError> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("daily_token starting up");

    let args = Cli::parse();
    let (start, end) = args.date_range(Utc::now().date_naive())?;
    debug!(%start, %end, overwrite = args.overwrite, archive_root = %args.archive_root.display(), "Parsed CLI arguments");

    let mut config = config::load_config(args.config.as_deref())?;
    if let Some(max) = args.max_stories {
        config.max_stories_per_day = max;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    config.validate()?;

    // Early check: the archive root must be writable
    if let Err(e) = ensure_writable_dir(&args.archive_root).await {
        error!(
            path = %args.archive_root.display(),
            error = %e,
            "Archive root is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let router = Arc::new(build_router(&args, &config)?);
    let aggregator = build_sources(&config);
    info!(sources = aggregator.source_count(), models = router.catalog().len(), "Pipeline assembled");

    let processor = StoryProcessor::new(
        Arc::clone(&router),
        Arc::new(HtmlImageFetcher::new()),
        ProcessorSettings::from(&config),
    );
    let editorial = EditorialAggregator::new(Arc::clone(&router), config.prefer_cheap);
    let orchestrator = ArchiveOrchestrator::new(
        ArchiveStore::new(&args.archive_root),
        Arc::new(aggregator),
        processor,
        editorial,
        router.ledger().clone(),
        ArchiveSettings::from(&config),
    );

    let report = orchestrator.run(start, end, args.overwrite).await;
    let stats = router.ledger().stats();

    info!(
        days = report.total(),
        skipped = ?report.skipped,
        generated = ?report.generated,
        placeholders = ?report.placeholders,
        failed = ?report.failed,
        llm_calls = stats.total_calls,
        llm_cost = stats.total_cost,
        elapsed_secs = start_time.elapsed().as_secs_f64(),
        "daily_token finished"
    );
    Ok(())
}
