//! Zero Screener - one-shot A-share growth stock screener.
//!
//! Loads configuration, opens the on-disk cache, runs a single screening
//! pass and writes the configured reports.

use anyhow::{Context, Result};
use std::sync::Arc;
use zero_common::config::Config;
use zero_common::logging::init_logging_with_exclusions;
use zero_common::util::{format_bytes, truncate_with_ellipsis};
use zero_screener::cache::CacheStore;
use zero_screener::data::{
    CachedQuoteProvider, CachedReportProvider, EastmoneyReportSource, TencentQuoteSource,
};
use zero_screener::screener::{FileReportEmitter, ScreenerConfig, ScreenerEngine};

#[tokio::main]
async fn main() -> Result<()> {
    let startup_start = std::time::Instant::now();

    // Load configuration
    let config = Config::load_with_env().context("Failed to load configuration")?;

    // Initialize logging
    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    tracing::info!("Zero Screener v{}", env!("CARGO_PKG_VERSION"));

    let screener_config = ScreenerConfig::from_config(&config)?;
    screener_config.validate()?;

    // Cache
    let cache_dir = screener_config.cache_dir();
    let cache = Arc::new(
        CacheStore::open(&cache_dir)
            .with_context(|| format!("Failed to open cache at {}", cache_dir.display()))?,
    );
    match cache.purge_expired() {
        Ok(0) => {}
        Ok(purged) => tracing::info!(purged, "Purged expired cache entries"),
        Err(e) => tracing::warn!(error = %e, "Failed to purge expired cache entries"),
    }
    let stats = cache.stats();
    tracing::info!(
        dir = %cache_dir.display(),
        valid = stats.valid_count,
        expired = stats.expired_count,
        size = %format_bytes(stats.total_size_bytes),
        "Cache opened"
    );

    // Providers
    let timeout = screener_config.request_timeout();
    let quotes = CachedQuoteProvider::new(
        TencentQuoteSource::with_timeout(timeout),
        Arc::clone(&cache),
        screener_config.fetch_policy(),
        screener_config.quote_ttl(),
    );
    let reports = CachedReportProvider::new(
        EastmoneyReportSource::with_timeout(timeout),
        Arc::clone(&cache),
        timeout,
        screener_config.report_ttl(),
    );

    let emitter = FileReportEmitter::from_config(&screener_config);
    let engine = ScreenerEngine::new(screener_config, Arc::new(quotes), Arc::new(reports))
        .with_emitter(Arc::new(emitter));

    tracing::info!(
        duration_ms = startup_start.elapsed().as_millis() as u64,
        "Service initialized"
    );

    let result = engine.run().await?;

    tracing::info!("{}", result.summary());
    for (i, candidate) in result.candidates.iter().enumerate() {
        tracing::info!(
            rank = i + 1,
            code = %candidate.code,
            name = %truncate_with_ellipsis(&candidate.name, 12),
            pe = candidate.pe,
            price = candidate.price,
            avg_revenue_growth = ?candidate.avg_revenue_growth,
            avg_profit_growth = ?candidate.avg_profit_growth,
            "Candidate"
        );
    }

    Ok(())
}
