//! Screener engine.
//!
//! Drives one run through its stages:
//!
//! ```text
//! UniverseBuilt → QuotesFetched → CheapFiltered → ExpensiveFiltered → Ranked → Reported
//! ```
//!
//! Per-candidate failures only remove that candidate and are tallied in
//! [`Stats::skipped`]. The run fails only on invalid configuration or when
//! no quote at all could be obtained.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::config::ScreenerConfig;
use super::filter::{CheapFilter, GrowthFilter, GrowthSummary, SkipReason};
use super::pool::{fan_out_reports, ReportOutcome};
use super::report::ReportEmitter;
use crate::data::{Quote, QuoteProvider, ReportProvider};

// ============================================================================
// Candidate
// ============================================================================

/// An instrument moving through the pipeline, enriched stage by stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub code: String,
    pub name: String,
    pub price: f64,
    pub pe: f64,
    pub pb: f64,
    pub market_cap: f64,
    /// Keyword that matched the category filter
    pub category: String,
    pub week_52_low: f64,
    pub week_52_high: f64,
    /// Yearly revenue growth (%), newest first
    #[serde(default)]
    pub revenue_growth: Vec<f64>,
    /// Yearly profit growth (%), newest first
    #[serde(default)]
    pub profit_growth: Vec<f64>,
    #[serde(default)]
    pub avg_revenue_growth: Option<f64>,
    #[serde(default)]
    pub avg_profit_growth: Option<f64>,
}

impl Candidate {
    pub fn from_quote(quote: &Quote, category: impl Into<String>) -> Self {
        Self {
            code: quote.code.clone(),
            name: quote.name.clone(),
            price: quote.price,
            pe: quote.pe,
            pb: quote.pb,
            market_cap: quote.market_cap,
            category: category.into(),
            week_52_low: quote.week_52_low,
            week_52_high: quote.week_52_high,
            revenue_growth: Vec::new(),
            profit_growth: Vec::new(),
            avg_revenue_growth: None,
            avg_profit_growth: None,
        }
    }

    pub fn with_growth(mut self, growth: GrowthSummary) -> Self {
        self.revenue_growth = growth.revenue_growth;
        self.profit_growth = growth.profit_growth;
        self.avg_revenue_growth = Some(growth.avg_revenue_growth);
        self.avg_profit_growth = Some(growth.avg_profit_growth);
        self
    }

    /// Price relative to the 52-week low.
    pub fn price_to_low(&self) -> f64 {
        if self.week_52_low > 0.0 {
            self.price / self.week_52_low
        } else {
            0.0
        }
    }
}

/// Sort ascending by P/E, ties by code, and keep the first `top_n`.
pub fn rank(mut candidates: Vec<Candidate>, top_n: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| match a.pe.total_cmp(&b.pe) {
        Ordering::Equal => a.code.cmp(&b.code),
        other => other,
    });
    candidates.truncate(top_n);
    candidates
}

// ============================================================================
// Stats
// ============================================================================

/// Funnel counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Identifiers enumerated
    pub universe_size: usize,
    /// Identifiers with a quote
    pub valid_quotes: usize,
    /// Candidates that matched a category keyword
    pub category_matched: usize,
    /// Candidates that passed every cheap predicate
    pub after_cheap_filter: usize,
    /// Candidates that passed the growth predicate
    pub after_expensive_filter: usize,
    /// Candidates lost per reason
    #[serde(default)]
    pub skipped: BTreeMap<SkipReason, usize>,
}

impl Stats {
    pub fn skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_default() += 1;
    }

    pub fn skipped_for(&self, reason: SkipReason) -> usize {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }
}

// ============================================================================
// Run Stage
// ============================================================================

/// Pipeline state within a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    UniverseBuilt,
    QuotesFetched,
    CheapFiltered,
    ExpensiveFiltered,
    Ranked,
    Reported,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UniverseBuilt => "universe_built",
            Self::QuotesFetched => "quotes_fetched",
            Self::CheapFiltered => "cheap_filtered",
            Self::ExpensiveFiltered => "expensive_filtered",
            Self::Ranked => "ranked",
            Self::Reported => "reported",
        };
        f.write_str(name)
    }
}

/// Wall time spent reaching a stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: RunStage,
    pub elapsed_ms: u64,
}

// ============================================================================
// Screener Result
// ============================================================================

/// Result of a screening run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenerResult {
    /// Run ID (timestamp-based)
    pub id: String,
    /// Ranked candidates (ascending P/E, at most `top_n`)
    pub candidates: Vec<Candidate>,
    pub stats: Stats,
    /// Parameters that shaped this run
    pub params_summary: BTreeMap<String, String>,
    /// Last stage reached
    pub stage: RunStage,
    #[serde(default)]
    pub stage_timings: Vec<StageTiming>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_secs: f64,
}

impl ScreenerResult {
    pub fn codes(&self) -> Vec<&str> {
        self.candidates.iter().map(|c| c.code.as_str()).collect()
    }

    /// Summary string for logging.
    pub fn summary(&self) -> String {
        format!(
            "Screened {} instruments in {:.1}s: {} quoted, {} after cheap filter, {} after growth filter, {} ranked",
            self.stats.universe_size,
            self.duration_secs,
            self.stats.valid_quotes,
            self.stats.after_cheap_filter,
            self.stats.after_expensive_filter,
            self.candidates.len()
        )
    }
}

// ============================================================================
// Screener Error
// ============================================================================

/// Conditions that abort a run.
#[derive(Debug, Error)]
pub enum ScreenerError {
    /// Rejected before any network activity
    #[error("Invalid screener configuration: {0}")]
    InvalidConfig(String),

    /// Not a single quote was obtained for the universe
    #[error("No quote data obtained for any of {} instruments", .stats.universe_size)]
    NoQuoteData { stats: Stats },
}

impl ScreenerError {
    /// Funnel counts accumulated before the failure, if any.
    pub fn stats(&self) -> Option<&Stats> {
        match self {
            Self::InvalidConfig(_) => None,
            Self::NoQuoteData { stats } => Some(stats),
        }
    }
}

// ============================================================================
// Screener Engine
// ============================================================================

/// The main screener engine.
pub struct ScreenerEngine {
    config: ScreenerConfig,
    quotes: Arc<dyn QuoteProvider>,
    reports: Arc<dyn ReportProvider>,
    emitter: Option<Arc<dyn ReportEmitter>>,
}

impl ScreenerEngine {
    pub fn new(
        config: ScreenerConfig,
        quotes: Arc<dyn QuoteProvider>,
        reports: Arc<dyn ReportProvider>,
    ) -> Self {
        Self {
            config,
            quotes,
            reports,
            emitter: None,
        }
    }

    /// Hand each successful result to `emitter` as the final stage.
    pub fn with_emitter(mut self, emitter: Arc<dyn ReportEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn config(&self) -> &ScreenerConfig {
        &self.config
    }

    /// Run one full screening pass.
    pub async fn run(&self) -> Result<ScreenerResult, ScreenerError> {
        self.config
            .validate()
            .map_err(|e| ScreenerError::InvalidConfig(e.to_string()))?;

        let started_at = Utc::now();
        let clock = Instant::now();
        let id = format!(
            "scan_{}_{}",
            started_at.format("%Y%m%d_%H%M%S"),
            zero_common::logging::generate_span_id()
        );
        let mut stats = Stats::default();
        let mut timings = Vec::new();
        let mut mark = |stage: RunStage| {
            timings.push(StageTiming {
                stage,
                elapsed_ms: clock.elapsed().as_millis() as u64,
            });
        };

        info!(
            scan_id = %id,
            quotes = self.quotes.name(),
            reports = self.reports.name(),
            "Starting screener run"
        );

        // Stage 1: universe
        let universe = self.quotes.universe();
        stats.universe_size = universe.len();
        mark(RunStage::UniverseBuilt);
        info!(size = universe.len(), stage = %RunStage::UniverseBuilt, "Universe built");

        // Stage 2: quotes
        let quotes = self.quotes.fetch_batch(universe.codes()).await;
        stats.valid_quotes = universe
            .codes()
            .iter()
            .filter(|code| quotes.contains_key(*code))
            .count();
        mark(RunStage::QuotesFetched);
        info!(quotes = stats.valid_quotes, stage = %RunStage::QuotesFetched, "Quotes fetched");

        if stats.valid_quotes == 0 {
            warn!(
                scan_id = %id,
                universe = stats.universe_size,
                "No quote data for the universe, aborting run"
            );
            return Err(ScreenerError::NoQuoteData { stats });
        }

        // Stage 3: cheap filter, in universe order
        let cheap = CheapFilter::new(&self.config);
        let mut survivors = Vec::new();
        for code in universe.codes() {
            let Some(quote) = quotes.get(code) else {
                continue;
            };
            match cheap.evaluate(quote) {
                Ok(candidate) => {
                    stats.category_matched += 1;
                    survivors.push(candidate);
                }
                Err(reason) => {
                    if reason == SkipReason::PriceTooHigh {
                        stats.category_matched += 1;
                    }
                    stats.skip(reason);
                }
            }
        }
        stats.after_cheap_filter = survivors.len();
        mark(RunStage::CheapFiltered);
        info!(
            category_matched = stats.category_matched,
            passed = survivors.len(),
            invalid = stats.skipped_for(SkipReason::InvalidData),
            pe_too_high = stats.skipped_for(SkipReason::PeTooHigh),
            price_too_high = stats.skipped_for(SkipReason::PriceTooHigh),
            stage = %RunStage::CheapFiltered,
            "Cheap filter complete"
        );

        // Stage 4: growth filter under bounded concurrency
        let growth = GrowthFilter::new(&self.config);
        let outcomes = fan_out_reports(
            Arc::clone(&self.reports),
            survivors,
            self.config.max_workers,
            self.config.request_timeout(),
        )
        .await;

        let mut passed = Vec::new();
        for (candidate, outcome) in outcomes {
            let verdict = match outcome {
                ReportOutcome::Found(report) => growth.evaluate(&report),
                ReportOutcome::Absent => Err(SkipReason::NoReport),
                ReportOutcome::TimedOut => Err(SkipReason::Timeout),
                ReportOutcome::Failed => Err(SkipReason::WorkerFailed),
            };
            match verdict {
                Ok(summary) => passed.push(candidate.with_growth(summary)),
                Err(reason) => {
                    debug!(code = %candidate.code, reason = ?reason, "Candidate skipped");
                    stats.skip(reason);
                }
            }
        }
        stats.after_expensive_filter = passed.len();
        mark(RunStage::ExpensiveFiltered);
        info!(
            passed = passed.len(),
            no_report = stats.skipped_for(SkipReason::NoReport),
            incomplete = stats.skipped_for(SkipReason::IncompleteReport),
            stage = %RunStage::ExpensiveFiltered,
            "Growth filter complete"
        );

        // Stage 5: rank
        let candidates = rank(passed, self.config.top_n);
        mark(RunStage::Ranked);

        let completed_at = Utc::now();
        let mut result = ScreenerResult {
            id,
            candidates,
            stats,
            params_summary: self.config.params_summary(),
            stage: RunStage::Ranked,
            stage_timings: timings,
            started_at,
            completed_at,
            duration_secs: clock.elapsed().as_secs_f64(),
        };

        // Stage 6: report
        if let Some(emitter) = &self.emitter {
            match emitter.emit(&result, &self.config).await {
                Ok(paths) => {
                    result.stage = RunStage::Reported;
                    result.stage_timings.push(StageTiming {
                        stage: RunStage::Reported,
                        elapsed_ms: clock.elapsed().as_millis() as u64,
                    });
                    info!(files = paths.len(), stage = %RunStage::Reported, "Reports emitted");
                }
                Err(e) => warn!(error = %e, "Failed to emit reports"),
            }
        }

        info!(
            scan_id = %result.id,
            candidates = result.candidates.len(),
            duration = format!("{:.1}s", result.duration_secs),
            "Screener run complete"
        );

        Ok(result)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(code: &str, pe: f64) -> Candidate {
        Candidate {
            code: code.into(),
            name: format!("{code}科技"),
            price: 10.0,
            pe,
            pb: 1.0,
            market_cap: 50.0,
            category: "科技".into(),
            week_52_low: 6.0,
            week_52_high: 15.0,
            revenue_growth: Vec::new(),
            profit_growth: Vec::new(),
            avg_revenue_growth: None,
            avg_profit_growth: None,
        }
    }

    #[test]
    fn test_rank_ties_broken_by_code() {
        let ranked = rank(
            vec![
                candidate("D", 12.5),
                candidate("C", 8.0),
                candidate("A", 8.0),
                candidate("B", 30.0),
            ],
            3,
        );
        let codes: Vec<&str> = ranked.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["A", "C", "D"]);
    }

    #[test]
    fn test_stats_skip_counts() {
        let mut stats = Stats::default();
        stats.skip(SkipReason::NoReport);
        stats.skip(SkipReason::NoReport);
        stats.skip(SkipReason::PeTooHigh);
        assert_eq!(stats.skipped_for(SkipReason::NoReport), 2);
        assert_eq!(stats.skipped_for(SkipReason::Timeout), 0);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["skipped"]["no_report"], 2);
    }

    #[test]
    fn test_candidate_with_growth() {
        let enriched = candidate("A", 10.0).with_growth(GrowthSummary {
            revenue_growth: vec![40.0, 35.0, 45.0],
            profit_growth: vec![50.0, 50.0, 50.0],
            avg_revenue_growth: 40.0,
            avg_profit_growth: 50.0,
        });
        assert_eq!(enriched.avg_revenue_growth, Some(40.0));
        assert_eq!(enriched.profit_growth.len(), 3);
        assert!((enriched.price_to_low() - 10.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_run_stage_order() {
        assert!(RunStage::UniverseBuilt < RunStage::QuotesFetched);
        assert!(RunStage::ExpensiveFiltered < RunStage::Ranked);
        assert_eq!(RunStage::CheapFiltered.to_string(), "cheap_filtered");
    }

    #[test]
    fn test_no_quote_error_carries_stats() {
        let err = ScreenerError::NoQuoteData {
            stats: Stats {
                universe_size: 3,
                ..Default::default()
            },
        };
        assert!(err.to_string().contains("3 instruments"));
        assert_eq!(err.stats().map(|s| s.universe_size), Some(3));
        assert!(ScreenerError::InvalidConfig("x".into()).stats().is_none());
    }
}
